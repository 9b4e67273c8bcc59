//! # Gateway Frame Parser
//!
//! The radio gateway prints one line per received NRF24 packet:
//!
//! ```text
//! R <len> <network>,<channel>,<node>:<key>=<value>,<key>=<value>,...
//! ```
//!
//! for example `R 20 1,2,47:h=321,t=261,p=10044,v=3290`. Anything else the
//! gateway prints (boot banners, radio diagnostics) is a diagnostic line and
//! is never published.
//!
//! The parser only validates the syntactic shape of a frame. Turning the
//! measurement into physical units is left to [`sensor::SensorValues`] so a
//! node with an unusual field set still gets its raw payload republished.
//!
//! ```rust
//! use nrf24mqtt::frame::{parse_line, ParsedLine};
//!
//! match parse_line("R 20 1,2,47:h=321,t=261,p=10044,v=3290").unwrap() {
//!     ParsedLine::Reading(reading) => assert_eq!(reading.address.node, 47),
//!     ParsedLine::Diagnostic(_) => unreachable!(),
//! }
//! ```

pub mod sensor;

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Marker token that starts every data frame.
pub const FRAME_MARKER: &str = "R ";

/// NRF24 hardware payload ceiling in bytes.
pub const MAX_PAYLOAD_LEN: usize = 32;

/// Reasons a line that looked like a data frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Malformed frame: expected 'R <len> <payload>'")]
    MalformedFrame,

    #[error("Invalid length field '{0}'")]
    InvalidLength(String),

    #[error(
        "Possible data corruption - NRF24 max payload size exceeded ({len} > {max})",
        max = MAX_PAYLOAD_LEN
    )]
    PayloadTooLarge { len: usize },

    #[error("Malformed address '{0}': expected <network>,<channel>,<node>")]
    MalformedAddress(String),

    #[error("Malformed measurement chunk '{0}': expected key=value")]
    MalformedMeasurement(String),

    #[error("Missing measurement field '{key}'")]
    MissingField { key: char },

    #[error("Measurement field '{key}' is not an integer: '{value}'")]
    InvalidFieldValue { key: char, value: String },
}

impl FrameError {
    /// Short stable label, used as a metrics key.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameError::MalformedFrame => "malformed_frame",
            FrameError::InvalidLength(_) => "invalid_length",
            FrameError::PayloadTooLarge { .. } => "payload_too_large",
            FrameError::MalformedAddress(_) => "malformed_address",
            FrameError::MalformedMeasurement(_) => "malformed_measurement",
            FrameError::MissingField { .. } => "missing_field",
            FrameError::InvalidFieldValue { .. } => "invalid_field_value",
        }
    }
}

/// Identifies a sensor source on the radio network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Address {
    pub network: u16,
    pub channel: u16,
    pub node: u16,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.network, self.channel, self.node)
    }
}

impl std::str::FromStr for Address {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || FrameError::MalformedAddress(s.to_string());
        let mut parts = s.split(',');
        let mut next = || -> Result<u16, FrameError> {
            parts
                .next()
                .and_then(|p| p.trim().parse::<u16>().ok())
                .ok_or_else(malformed)
        };
        let address = Address {
            network: next()?,
            channel: next()?,
            node: next()?,
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(address)
    }
}

/// Raw `key=value` fields of one frame, in transmission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Measurement {
    fields: Vec<(String, String)>,
}

impl Measurement {
    fn parse(s: &str) -> Result<Self, FrameError> {
        let mut fields = Vec::new();
        for chunk in s.split(',') {
            let mut kv = chunk.split('=');
            match (kv.next(), kv.next(), kv.next()) {
                (Some(key), Some(value), None) if !key.trim().is_empty() => {
                    fields.push((key.trim().to_string(), value.to_string()));
                }
                _ => return Err(FrameError::MalformedMeasurement(chunk.to_string())),
            }
        }
        Ok(Self { fields })
    }

    /// Raw value for `key`. Later duplicates win, like a dictionary rebuild would.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A syntactically valid data frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reading {
    /// Length declared by the gateway (already checked against [`MAX_PAYLOAD_LEN`]).
    pub declared_len: usize,
    pub address: Address,
    pub measurement: Measurement,
    /// Measurement text exactly as received, republished unchanged.
    pub raw: String,
}

/// Classification of one serial line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// Not a data frame: gateway log output, echoed but never published.
    Diagnostic(String),
    Reading(Reading),
}

/// Parse one line of gateway output.
pub fn parse_line(line: &str) -> Result<ParsedLine, FrameError> {
    let line = line.trim();
    if !line.starts_with(FRAME_MARKER) {
        return Ok(ParsedLine::Diagnostic(line.to_string()));
    }

    // Limit to 3 tokens so short values such as 'p= 9999' survive in the payload.
    let mut tokens = line.splitn(3, ' ');
    let (_marker, len_field, payload) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(m), Some(l), Some(p)) => (m, l, p),
        _ => return Err(FrameError::MalformedFrame),
    };

    let declared_len: usize = match len_field.parse() {
        Ok(len) => len,
        // Digits too long for usize are still a length, just an absurd one.
        Err(_) if !len_field.is_empty() && len_field.bytes().all(|b| b.is_ascii_digit()) => {
            usize::MAX
        }
        Err(_) => return Err(FrameError::InvalidLength(len_field.to_string())),
    };
    if declared_len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge { len: declared_len });
    }

    let mut halves = payload.split(':');
    let (address_part, measurement_part) = match (halves.next(), halves.next(), halves.next()) {
        (Some(a), Some(m), None) => (a, m),
        _ => return Err(FrameError::MalformedAddress(payload.to_string())),
    };

    let address: Address = address_part.parse()?;
    let measurement = Measurement::parse(measurement_part)?;

    Ok(ParsedLine::Reading(Reading {
        declared_len,
        address,
        measurement,
        raw: measurement_part.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(line: &str) -> Reading {
        match parse_line(line).expect("line should parse") {
            ParsedLine::Reading(r) => r,
            ParsedLine::Diagnostic(d) => panic!("unexpected diagnostic: {d}"),
        }
    }

    #[test]
    fn decodes_reference_frame() {
        let r = reading("R 20 1,2,47:h=321,t=261,p=10044,v=3290\r\n");
        assert_eq!(
            r.address,
            Address {
                network: 1,
                channel: 2,
                node: 47
            }
        );
        assert_eq!(r.declared_len, 20);
        assert_eq!(r.measurement.len(), 4);
        assert_eq!(r.measurement.get("h"), Some("321"));
        assert_eq!(r.measurement.get("t"), Some("261"));
        assert_eq!(r.measurement.get("p"), Some("10044"));
        assert_eq!(r.measurement.get("v"), Some("3290"));
        assert_eq!(r.raw, "h=321,t=261,p=10044,v=3290");
    }

    #[test]
    fn non_marker_lines_are_diagnostics() {
        for line in ["", "Radio init OK", "R", "RX 20 1,2,3:t=1", "r 20 1,2,3:t=1"] {
            assert!(
                matches!(parse_line(line), Ok(ParsedLine::Diagnostic(_))),
                "{line:?} should be a diagnostic line"
            );
        }
    }

    #[test]
    fn missing_payload_is_malformed_frame() {
        assert_eq!(parse_line("R 20"), Err(FrameError::MalformedFrame));
    }

    #[test]
    fn non_numeric_length_is_rejected() {
        assert_eq!(
            parse_line("R xx 1,2,3:t=1"),
            Err(FrameError::InvalidLength("xx".into()))
        );
    }

    #[test]
    fn oversize_length_rejected_even_when_payload_is_fine() {
        assert_eq!(
            parse_line("R 33 1,2,47:h=321,t=261,p=10044,v=3290"),
            Err(FrameError::PayloadTooLarge { len: 33 })
        );
        assert!(parse_line("R 32 1,2,47:t=1").is_ok());
    }

    #[test]
    fn length_overflowing_usize_is_too_large_not_invalid() {
        assert!(matches!(
            parse_line("R 99999999999999999999999 1,2,47:t=261"),
            Err(FrameError::PayloadTooLarge { .. })
        ));
        assert!(matches!(
            parse_line("R -1 1,2,47:t=261"),
            Err(FrameError::InvalidLength(_))
        ));
    }

    #[test]
    fn address_must_have_three_integers() {
        assert!(matches!(
            parse_line("R 20 1,2:t=261"),
            Err(FrameError::MalformedAddress(_))
        ));
        assert!(matches!(
            parse_line("R 20 1,2,3,4:t=261"),
            Err(FrameError::MalformedAddress(_))
        ));
        assert!(matches!(
            parse_line("R 20 1,x,3:t=261"),
            Err(FrameError::MalformedAddress(_))
        ));
        assert!(matches!(
            parse_line("R 20 1,2,3"),
            Err(FrameError::MalformedAddress(_))
        ));
        assert!(matches!(
            parse_line("R 20 1,2,3:t=1:h=2"),
            Err(FrameError::MalformedAddress(_))
        ));
    }

    #[test]
    fn measurement_chunks_need_key_and_value() {
        assert_eq!(
            parse_line("R 20 1,2,3:t=261,h"),
            Err(FrameError::MalformedMeasurement("h".into()))
        );
        assert_eq!(
            parse_line("R 20 1,2,3:t=2=6"),
            Err(FrameError::MalformedMeasurement("t=2=6".into()))
        );
        assert_eq!(
            parse_line("R 20 1,2,3:=5"),
            Err(FrameError::MalformedMeasurement("=5".into()))
        );
    }

    #[test]
    fn payload_keeps_embedded_spaces() {
        let r = reading("R 24 1,2,47:h=321,t=261,p= 9999,v=3290");
        assert_eq!(r.measurement.get("p"), Some(" 9999"));
        assert_eq!(r.raw, "h=321,t=261,p= 9999,v=3290");
    }

    #[test]
    fn address_display_matches_raw_topic_layout() {
        let a: Address = "1,2,47".parse().unwrap();
        assert_eq!(a.to_string(), "1.2/47");
    }
}
