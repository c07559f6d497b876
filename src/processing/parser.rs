use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Position;

/// Default topic pattern anchors publish ranging reports on
pub const ANCHOR_DATA_TOPIC: &str = "warehouse/anchors/+/data";
/// Default topic handheld scanners publish rack scans on
pub const RACK_SCAN_TOPIC: &str = "warehouse/scanner/rack_scan";

/// Field count of the delimited anchor payload
/// `anchor_id,anchor_x,anchor_y,distance,rssi,tag_id`
const RANGING_FIELD_COUNT: usize = 6;

/// Ranging report from one anchor about one tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangingMeasurement {
    pub tag_id: String,
    pub anchor_id: String,
    /// Measured distance (meters)
    pub distance: f64,
    pub rssi: i32,
    /// Position the anchor claims for itself; informational only, estimation
    /// uses the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_position: Option<Position>,
}

impl RangingMeasurement {
    pub fn new(tag_id: impl Into<String>, anchor_id: impl Into<String>, distance: f64, rssi: i32) -> Self {
        Self {
            tag_id: tag_id.into(),
            anchor_id: anchor_id.into(),
            distance,
            rssi,
            reported_position: None,
        }
    }

    /// Encode in the anchor wire format. A missing self-reported position is
    /// written as the origin.
    pub fn to_wire(&self) -> String {
        let reported = self.reported_position.unwrap_or(Position::new(0.0, 0.0));
        format!(
            "{},{:.2},{:.2},{:.2},{},{}",
            self.anchor_id, reported.x, reported.y, self.distance, self.rssi, self.tag_id
        )
    }
}

/// RFID rack scan forwarded by a tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RackScan {
    pub uid: String,
    pub tag_id: String,
}

/// Typed message decoded from the bus
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Ranging(RangingMeasurement),
    RackScan(RackScan),
}

/// Errors that can occur during message decoding
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("payload is not valid UTF-8")]
    InvalidEncoding,
    #[error("expected {expected} comma-separated fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
    #[error("empty {field} field")]
    EmptyField { field: &'static str },
    #[error("invalid {field} value '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("invalid rack scan payload: {0}")]
    InvalidScan(String),
    #[error("no handler for topic '{0}'")]
    UnknownTopic(String),
}

/// MQTT-style topic filter; `+` matches one level, a trailing `#` the rest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pattern: String,
}

impl TopicFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into() }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, topic: &str) -> bool {
        let mut levels = topic.split('/');
        for segment in self.pattern.split('/') {
            match (segment, levels.next()) {
                ("#", _) => return true,
                ("+", Some(_)) => {}
                (expected, Some(level)) if expected == level => {}
                _ => return false,
            }
        }
        levels.next().is_none()
    }
}

/// Decoder turning raw bus payloads into typed messages
#[derive(Debug, Clone)]
pub struct MessageParser {
    anchor_topic: TopicFilter,
    scan_topic: TopicFilter,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(ANCHOR_DATA_TOPIC, RACK_SCAN_TOPIC)
    }
}

impl MessageParser {
    pub fn new(anchor_pattern: &str, scan_pattern: &str) -> Self {
        Self {
            anchor_topic: TopicFilter::new(anchor_pattern),
            scan_topic: TopicFilter::new(scan_pattern),
        }
    }

    /// Route a payload by topic and decode it
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<InboundMessage, ParseError> {
        let text = std::str::from_utf8(payload).map_err(|_| ParseError::InvalidEncoding)?;

        if self.anchor_topic.matches(topic) {
            self.parse_ranging(text).map(InboundMessage::Ranging)
        } else if self.scan_topic.matches(topic) {
            self.parse_rack_scan(text).map(InboundMessage::RackScan)
        } else {
            Err(ParseError::UnknownTopic(topic.to_string()))
        }
    }

    /// Parse `anchor_id,anchor_x,anchor_y,distance,rssi,tag_id`
    pub fn parse_ranging(&self, payload: &str) -> Result<RangingMeasurement, ParseError> {
        let fields: Vec<&str> = payload.trim().split(',').map(str::trim).collect();
        if fields.len() != RANGING_FIELD_COUNT {
            return Err(ParseError::FieldCount {
                expected: RANGING_FIELD_COUNT,
                actual: fields.len(),
            });
        }

        let anchor_id = Self::non_empty(fields[0], "anchor_id")?;
        let anchor_x = Self::parse_f64(fields[1], "anchor_x")?;
        let anchor_y = Self::parse_f64(fields[2], "anchor_y")?;
        let distance = Self::parse_f64(fields[3], "distance")?;
        let rssi = fields[4].parse::<i32>().map_err(|_| ParseError::InvalidNumber {
            field: "rssi",
            value: fields[4].to_string(),
        })?;
        let tag_id = Self::non_empty(fields[5], "tag_id")?;

        if distance < 0.0 {
            return Err(ParseError::OutOfRange { field: "distance", value: distance });
        }

        Ok(RangingMeasurement {
            tag_id: tag_id.to_string(),
            anchor_id: anchor_id.to_string(),
            distance,
            rssi,
            reported_position: Some(Position::new(anchor_x, anchor_y)),
        })
    }

    /// Parse the JSON rack scan `{"uid": .., "tag_id": ..}`
    pub fn parse_rack_scan(&self, payload: &str) -> Result<RackScan, ParseError> {
        let scan: RackScan =
            serde_json::from_str(payload).map_err(|e| ParseError::InvalidScan(e.to_string()))?;
        if scan.uid.is_empty() {
            return Err(ParseError::EmptyField { field: "uid" });
        }
        if scan.tag_id.is_empty() {
            return Err(ParseError::EmptyField { field: "tag_id" });
        }
        Ok(scan)
    }

    fn non_empty<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ParseError> {
        if value.is_empty() {
            Err(ParseError::EmptyField { field })
        } else {
            Ok(value)
        }
    }

    fn parse_f64(value: &str, field: &'static str) -> Result<f64, ParseError> {
        let parsed = value.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
            field,
            value: value.to_string(),
        })?;
        if !parsed.is_finite() {
            return Err(ParseError::OutOfRange { field, value: parsed });
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_anchor_report() {
        let parser = MessageParser::default();
        let message = parser
            .decode("warehouse/anchors/ANCHOR_2/data", b"ANCHOR_2,50.00,0.00,38.08,-61,TAG_001")
            .unwrap();

        let InboundMessage::Ranging(m) = message else {
            panic!("expected ranging message");
        };
        assert_eq!(m.anchor_id, "ANCHOR_2");
        assert_eq!(m.tag_id, "TAG_001");
        assert_eq!(m.distance, 38.08);
        assert_eq!(m.rssi, -61);
        assert_eq!(m.reported_position, Some(Position::new(50.0, 0.0)));
    }

    #[test]
    fn test_wire_encoding_decodes_back() {
        let parser = MessageParser::default();
        let mut original = RangingMeasurement::new("TAG_7", "ANCHOR_4", 12.5, -72);
        original.reported_position = Some(Position::new(0.0, 50.0));

        let decoded = parser.parse_ranging(&original.to_wire()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_wrong_field_count_rejected() {
        let parser = MessageParser::default();
        assert_eq!(
            parser.parse_ranging("ANCHOR_1,0,0,10,-40"),
            Err(ParseError::FieldCount { expected: 6, actual: 5 })
        );
        assert_eq!(
            parser.parse_ranging("ANCHOR_1,0,0,10,-40,TAG,extra"),
            Err(ParseError::FieldCount { expected: 6, actual: 7 })
        );
    }

    #[test]
    fn test_bad_field_types_rejected() {
        let parser = MessageParser::default();
        assert!(matches!(
            parser.parse_ranging("ANCHOR_1,0,0,ten,-40,TAG"),
            Err(ParseError::InvalidNumber { field: "distance", .. })
        ));
        assert!(matches!(
            parser.parse_ranging("ANCHOR_1,0,0,10,-40.5,TAG"),
            Err(ParseError::InvalidNumber { field: "rssi", .. })
        ));
        assert!(matches!(
            parser.parse_ranging("ANCHOR_1,0,0,-3,-40,TAG"),
            Err(ParseError::OutOfRange { field: "distance", .. })
        ));
        assert!(matches!(
            parser.parse_ranging("ANCHOR_1,0,0,inf,-40,TAG"),
            Err(ParseError::OutOfRange { field: "distance", .. })
        ));
        assert_eq!(
            parser.parse_ranging("ANCHOR_1,0,0,10,-40,"),
            Err(ParseError::EmptyField { field: "tag_id" })
        );
    }

    #[test]
    fn test_rack_scan() {
        let parser = MessageParser::default();
        let message = parser
            .decode(RACK_SCAN_TOPIC, br#"{"uid": "04A1B2C3", "tag_id": "TAG_001"}"#)
            .unwrap();
        assert_eq!(
            message,
            InboundMessage::RackScan(RackScan {
                uid: "04A1B2C3".to_string(),
                tag_id: "TAG_001".to_string(),
            })
        );

        assert!(matches!(
            parser.decode(RACK_SCAN_TOPIC, b"not json"),
            Err(ParseError::InvalidScan(_))
        ));
    }

    #[test]
    fn test_unknown_topic_and_encoding() {
        let parser = MessageParser::default();
        assert_eq!(
            parser.decode("warehouse/other", b"x"),
            Err(ParseError::UnknownTopic("warehouse/other".to_string()))
        );
        assert_eq!(
            parser.decode("warehouse/anchors/A/data", &[0xff, 0xfe]),
            Err(ParseError::InvalidEncoding)
        );
    }

    #[test]
    fn test_topic_filter() {
        let filter = TopicFilter::new("warehouse/anchors/+/data");
        assert!(filter.matches("warehouse/anchors/ANCHOR_1/data"));
        assert!(!filter.matches("warehouse/anchors/data"));
        assert!(!filter.matches("warehouse/anchors/ANCHOR_1/data/extra"));

        let all = TopicFilter::new("warehouse/#");
        assert!(all.matches("warehouse/scanner/rack_scan"));
        assert!(!all.matches("factory/scanner"));
    }
}
