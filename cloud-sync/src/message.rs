//! Inbound message parsing
//!
//! Malformed input stops here as a [`ProtocolError`]; nothing that fails to
//! parse reaches the state manager.

use crate::error::ProtocolError;
use crate::topics::Topics;
use crate::transport::Message;
use incubator_state::CaptureKind;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Partial desired state sent by the cloud
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaMessage {
    pub req_id: String,
    pub desired: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRequest {
    pub kind: CaptureKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Delta(DeltaMessage),
    ImageRequest(ImageRequest),
}

#[derive(Deserialize)]
struct RawDelta {
    req_id: Option<String>,
    state: Option<RawState>,
}

#[derive(Deserialize)]
struct RawState {
    desired: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct RawImageRequest {
    #[serde(rename = "type")]
    kind: Option<CaptureKind>,
}

impl InboundMessage {
    /// Route and parse a message by topic
    pub fn parse(topics: &Topics, message: &Message) -> Result<Self, ProtocolError> {
        let topic = &message.topic;
        let malformed = |source| ProtocolError::MalformedJson {
            topic: topic.clone(),
            source,
        };
        let missing = |field| ProtocolError::MissingField {
            topic: topic.clone(),
            field,
        };

        if *topic == topics.desired {
            let raw: RawDelta = serde_json::from_str(&message.payload).map_err(malformed)?;
            let req_id = raw.req_id.ok_or_else(|| missing("req_id"))?;
            let desired = raw
                .state
                .and_then(|s| s.desired)
                .ok_or_else(|| missing("state.desired"))?;
            Ok(InboundMessage::Delta(DeltaMessage { req_id, desired }))
        } else if *topic == topics.image_request {
            let raw: RawImageRequest = serde_json::from_str(&message.payload).map_err(malformed)?;
            let kind = raw.kind.ok_or_else(|| missing("type"))?;
            Ok(InboundMessage::ImageRequest(ImageRequest { kind }))
        } else {
            Err(ProtocolError::UnknownTopic(topic.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::TopicTemplates;
    use rstest::rstest;

    fn topics() -> Topics {
        Topics::new(&TopicTemplates::default(), "dev-1")
    }

    #[test]
    fn test_parse_delta() {
        let topics = topics();
        let message = Message::new(
            topics.desired.clone(),
            r#"{"req_id": "r-1", "state": {"desired": {"TP": 37.0}}}"#,
        );

        match InboundMessage::parse(&topics, &message).unwrap() {
            InboundMessage::Delta(delta) => {
                assert_eq!(delta.req_id, "r-1");
                assert_eq!(delta.desired["TP"], 37.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[rstest]
    #[case("experiment", CaptureKind::Experiment)]
    #[case("dpc-capture", CaptureKind::Dpc)]
    #[case("gfp-capture", CaptureKind::Gfp)]
    fn test_parse_image_request(#[case] wire: &str, #[case] kind: CaptureKind) {
        let topics = topics();
        let message = Message::new(topics.image_request.clone(), format!(r#"{{"type": "{wire}"}}"#));
        assert_eq!(
            InboundMessage::parse(&topics, &message).unwrap(),
            InboundMessage::ImageRequest(ImageRequest { kind })
        );
    }

    #[test]
    fn test_malformed_json_is_protocol_error() {
        let topics = topics();
        let message = Message::new(topics.desired.clone(), "{not json");
        assert!(matches!(
            InboundMessage::parse(&topics, &message),
            Err(ProtocolError::MalformedJson { .. })
        ));
    }

    #[test]
    fn test_missing_fields() {
        let topics = topics();
        let no_id = Message::new(topics.desired.clone(), r#"{"state": {"desired": {}}}"#);
        assert!(matches!(
            InboundMessage::parse(&topics, &no_id),
            Err(ProtocolError::MissingField { field: "req_id", .. })
        ));

        let no_state = Message::new(topics.desired.clone(), r#"{"req_id": "r"}"#);
        assert!(matches!(
            InboundMessage::parse(&topics, &no_state),
            Err(ProtocolError::MissingField { field: "state.desired", .. })
        ));
    }

    #[test]
    fn test_unknown_image_type_is_malformed() {
        let topics = topics();
        let message = Message::new(topics.image_request.clone(), r#"{"type": "xray"}"#);
        assert!(InboundMessage::parse(&topics, &message).is_err());
    }

    #[test]
    fn test_unknown_topic() {
        let topics = topics();
        let message = Message::new("elsewhere", "{}");
        assert!(matches!(
            InboundMessage::parse(&topics, &message),
            Err(ProtocolError::UnknownTopic(_))
        ));
    }
}
