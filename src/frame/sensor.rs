//! Physical units for the fixed weather-node field set.
//!
//! Nodes send fixed-point integers: `t`, `h` and `p` are tenths of a degree,
//! percent and hPa; `v` is the supply voltage in millivolts.

use super::{FrameError, Measurement};
use serde::Serialize;

/// Decoded readings of a weather node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorValues {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    /// Millivolts, unscaled.
    pub vcc: i64,
}

impl SensorValues {
    pub fn decode(measurement: &Measurement) -> Result<Self, FrameError> {
        Ok(Self {
            temperature: field(measurement, 't')? as f64 / 10.0,
            humidity: field(measurement, 'h')? as f64 / 10.0,
            pressure: field(measurement, 'p')? as f64 / 10.0,
            vcc: field(measurement, 'v')?,
        })
    }

    /// `(field name, payload)` pairs in publish order.
    pub fn payloads(&self) -> [(&'static str, String); 4] {
        [
            ("temperature", format!("{:.1}", self.temperature)),
            ("humidity", format!("{:.1}", self.humidity)),
            ("pressure", format!("{:.1}", self.pressure)),
            ("vcc", self.vcc.to_string()),
        ]
    }
}

fn field(measurement: &Measurement, key: char) -> Result<i64, FrameError> {
    let mut buf = [0u8; 4];
    let raw = measurement
        .get(key.encode_utf8(&mut buf))
        .ok_or(FrameError::MissingField { key })?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| FrameError::InvalidFieldValue {
            key,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{parse_line, ParsedLine};

    fn measurement(line: &str) -> Measurement {
        match parse_line(line).unwrap() {
            ParsedLine::Reading(r) => r.measurement,
            ParsedLine::Diagnostic(_) => panic!("not a frame"),
        }
    }

    #[test]
    fn scales_reference_values() {
        let values =
            SensorValues::decode(&measurement("R 20 1,2,47:h=321,t=261,p=10044,v=3290")).unwrap();
        assert!((values.temperature - 26.1).abs() < 1e-9);
        assert!((values.humidity - 32.1).abs() < 1e-9);
        assert!((values.pressure - 1004.4).abs() < 1e-9);
        assert_eq!(values.vcc, 3290);

        let payloads = values.payloads();
        assert_eq!(payloads[0], ("temperature", "26.1".to_string()));
        assert_eq!(payloads[1], ("humidity", "32.1".to_string()));
        assert_eq!(payloads[2], ("pressure", "1004.4".to_string()));
        assert_eq!(payloads[3], ("vcc", "3290".to_string()));
    }

    #[test]
    fn whole_and_negative_values_keep_one_decimal() {
        let values =
            SensorValues::decode(&measurement("R 20 1,2,3:t=-5,h=600,p=9999,v=2900")).unwrap();
        let payloads = values.payloads();
        assert_eq!(payloads[0].1, "-0.5");
        assert_eq!(payloads[1].1, "60.0");
        assert_eq!(payloads[2].1, "999.9");
    }

    #[test]
    fn missing_key_is_reported() {
        let err = SensorValues::decode(&measurement("R 20 1,2,3:t=261,h=321,p=10044")).unwrap_err();
        assert_eq!(err, FrameError::MissingField { key: 'v' });
    }

    #[test]
    fn non_integer_value_is_reported() {
        let err =
            SensorValues::decode(&measurement("R 20 1,2,3:t=abc,h=321,p=10044,v=1")).unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidFieldValue {
                key: 't',
                value: "abc".into()
            }
        );
    }

    #[test]
    fn padded_value_is_accepted() {
        let values =
            SensorValues::decode(&measurement("R 24 1,2,3:t=261,h=321,p= 9999,v=3290")).unwrap();
        assert!((values.pressure - 999.9).abs() < 1e-9);
    }
}
