//! Tri-state indicator driven by characteristic writes.
//!
//! The peripheral never lets a remote peer set the indicator directly; it is
//! always derived from the last written payload through [`IndicatorState::from_payload`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{LinkError, Result};

/// Payload that turns the indicator red
pub const RED_COMMAND: &str = "RED";

/// Payload that turns the indicator green
pub const GREEN_COMMAND: &str = "GREEN";

/// Indicator light state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorState {
    /// Last write was `RED`
    Red,
    /// Last write was `GREEN`
    Green,
    /// Anything else, including no peer at all
    #[default]
    Neutral,
}

impl IndicatorState {
    /// Derive the indicator state from a write payload
    ///
    /// Exact, case-sensitive match on the UTF-8 text. Undecodable bytes map to
    /// [`IndicatorState::Neutral`] rather than being rejected.
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Self {
        match decode_command(payload) {
            Ok(RED_COMMAND) => Self::Red,
            Ok(GREEN_COMMAND) => Self::Green,
            Ok(_) => Self::Neutral,
            Err(e) => {
                debug!("{e}, falling back to neutral");
                Self::Neutral
            }
        }
    }

    /// RGB colour a presentation layer should paint for this state
    #[must_use]
    pub const fn rgb(self) -> [u8; 3] {
        match self {
            Self::Red => [0xF4, 0x43, 0x36],
            Self::Green => [0x4C, 0xAF, 0x50],
            Self::Neutral => [0x9E, 0x9E, 0x9E],
        }
    }
}

impl fmt::Display for IndicatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Red => write!(f, "RED"),
            Self::Green => write!(f, "GREEN"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Decode a write payload as UTF-8 command text
///
/// # Errors
///
/// Returns [`LinkError::MalformedPayload`] if the bytes are not valid UTF-8.
pub fn decode_command(payload: &[u8]) -> Result<&str> {
    std::str::from_utf8(payload).map_err(|e| LinkError::MalformedPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    #[test]
    fn test_payload_mapping_is_total() {
        let cases: [(&[u8], IndicatorState); 6] = [
            (b"RED", IndicatorState::Red),
            (b"GREEN", IndicatorState::Green),
            (b"", IndicatorState::Neutral),
            (b"red", IndicatorState::Neutral),
            (b"RED ", IndicatorState::Neutral),
            (&[0xFF, 0xFE, 0x52], IndicatorState::Neutral),
        ];

        for (payload, expected) in cases {
            assert_eq!(
                IndicatorState::from_payload(payload),
                expected,
                "payload {payload:?}"
            );
        }
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let result = decode_command(&[0xC3, 0x28]);
        let error = assert_err!(result);
        assert!(error.is_absorbed());
    }

    #[test]
    fn test_default_is_neutral() {
        assert_eq!(IndicatorState::default(), IndicatorState::Neutral);
    }

    #[test]
    fn test_presentation_mapping_distinct() {
        assert_ne!(IndicatorState::Red.rgb(), IndicatorState::Green.rgb());
        assert_ne!(IndicatorState::Green.rgb(), IndicatorState::Neutral.rgb());
        assert_eq!(IndicatorState::Neutral.to_string(), "NEUTRAL");
    }
}
