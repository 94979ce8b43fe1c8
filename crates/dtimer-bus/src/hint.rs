//! Wake hint wire format
//!
//! A hint is the JSON object `{"interval": <ms>}` telling a node to poll
//! again within `interval` milliseconds.

use crate::error::{BusError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeHint {
    /// Milliseconds until the receiver should poll
    pub interval: u64,
}

impl WakeHint {
    pub fn new(interval: u64) -> Self {
        Self { interval }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a hint message.
    ///
    /// Text that is not JSON is an error. Well-formed JSON without a numeric
    /// `interval` is not a hint and yields `Ok(None)`. Negative intervals mean
    /// "poll now".
    pub fn decode(message: &[u8]) -> Result<Option<Self>> {
        let value: serde_json::Value = serde_json::from_slice(message).map_err(|e| {
            BusError::MalformedHint(format!(
                "{} ({})",
                e,
                String::from_utf8_lossy(message)
            ))
        })?;

        let Some(interval) = value.get("interval") else {
            return Ok(None);
        };
        let interval = if let Some(ms) = interval.as_u64() {
            ms
        } else if let Some(ms) = interval.as_f64() {
            // Fractional milliseconds round up; negatives clamp to zero
            if ms.is_finite() {
                ms.max(0.0).ceil() as u64
            } else {
                return Ok(None);
            }
        } else {
            return Ok(None);
        };

        Ok(Some(Self { interval }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_shape() {
        let bytes = WakeHint::new(250).encode().unwrap();
        assert_eq!(bytes, br#"{"interval":250}"#.to_vec());
    }

    #[test]
    fn test_decode_numeric_interval() {
        assert_eq!(
            WakeHint::decode(br#"{"interval":40}"#).unwrap(),
            Some(WakeHint::new(40))
        );
        assert_eq!(
            WakeHint::decode(br#"{"interval":-3}"#).unwrap(),
            Some(WakeHint::new(0))
        );
        assert_eq!(
            WakeHint::decode(br#"{"interval":1.2}"#).unwrap(),
            Some(WakeHint::new(2))
        );
    }

    #[test]
    fn test_non_numeric_interval_is_ignored() {
        assert_eq!(WakeHint::decode(br#"{"interval":"soon"}"#).unwrap(), None);
        assert_eq!(WakeHint::decode(br#"{"other":1}"#).unwrap(), None);
        assert_eq!(WakeHint::decode(b"[1,2,3]").unwrap(), None);
    }

    #[test]
    fn test_malformed_message_is_error() {
        let err = WakeHint::decode(b"{bad json").unwrap_err();
        assert!(matches!(err, BusError::MalformedHint(_)));
    }
}
