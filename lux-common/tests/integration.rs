//! Integration tests for lux-common library.

use lux_common::{
    DEFAULT_BANK, MqttConfig, PayloadError, coerce_numeric, decode_readings, telemetry_topic,
};

#[test]
fn test_full_message_workflow() {
    let topic = telemetry_topic("BA12345678", DEFAULT_BANK);
    assert_eq!(topic, "BA12345678/inputbank1");

    let body = br#"{"payload": {"soc": 87, "v_bat": "52.4", "status": "standby"}}"#;
    let readings = decode_readings(body).expect("decode failed");

    let mut numeric: Vec<(String, f64)> = readings
        .iter()
        .filter_map(|(k, v)| coerce_numeric(k, v).ok().map(|n| (k.clone(), n)))
        .collect();
    numeric.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(
        numeric,
        vec![("soc".to_string(), 87.0), ("v_bat".to_string(), 52.4)]
    );
}

#[test]
fn test_error_kinds_are_distinguishable() {
    assert!(matches!(
        decode_readings(b"{not json"),
        Err(PayloadError::Decode(_))
    ));
    assert!(matches!(
        decode_readings(br#"{"nope": {}}"#),
        Err(PayloadError::Structure(_))
    ));
}

#[test]
fn test_mqtt_config_from_json5() {
    #[derive(serde::Deserialize)]
    struct Wrapper {
        mqtt: MqttConfig,
    }

    let wrapper: Wrapper = json5::from_str(
        r#"{
            // comments are allowed in JSON5
            mqtt: { host: "10.0.0.5", username: "lux", password: "pw" },
        }"#,
    )
    .expect("parse failed");

    assert!(wrapper.mqtt.validate().is_ok());
    assert_eq!(wrapper.mqtt.port, 1883);
    assert_eq!(wrapper.mqtt.masked_password(), "**");
}
