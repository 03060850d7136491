//! MQTT topic builders.
//!
//! Dongles publish their readings to `<dongle>/<bank>`, for example
//! `BA12345678/inputbank1`.

/// Default register bank carrying live readings.
pub const DEFAULT_BANK: &str = "inputbank1";

/// Build the telemetry topic for a dongle and bank.
///
/// # Example
/// ```
/// use lux_common::topic::telemetry_topic;
///
/// assert_eq!(telemetry_topic("BA12345678", "inputbank1"), "BA12345678/inputbank1");
/// ```
pub fn telemetry_topic(dongle: &str, bank: &str) -> String {
    format!("{}/{}", dongle, bank)
}
