//! Inbound message definitions and decoding

use crate::error::{MatchmakingError, Result};
use crate::types::{MatchRequest, PlayerId};
use serde::{Deserialize, Serialize};

/// Longest slice of a raw payload included in log lines
pub const PAYLOAD_PREVIEW_LIMIT: usize = 256;

/// Marker for a leave request; only `"leave"` is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveAction {
    Leave,
}

/// Request to stop waiting in every bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub player_id: PlayerId,
    pub action: LeaveAction,
}

/// Any message accepted on the request topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Leave(LeaveRequest),
    Match(MatchRequest),
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Decode and validate a message from the request topic
    pub fn deserialize_inbound(bytes: &[u8]) -> Result<InboundMessage> {
        let message: InboundMessage =
            serde_json::from_slice(bytes).map_err(|e| MatchmakingError::InvalidMatchRequest {
                reason: format!("Failed to deserialize request: {}", e),
            })?;

        match &message {
            InboundMessage::Match(request) => Self::validate_match_request(request)?,
            InboundMessage::Leave(request) => Self::validate_player_id(&request.player_id)?,
        }
        Ok(message)
    }

    /// Decode and validate a match request
    pub fn deserialize_match_request(bytes: &[u8]) -> Result<MatchRequest> {
        let request: MatchRequest =
            serde_json::from_slice(bytes).map_err(|e| MatchmakingError::InvalidMatchRequest {
                reason: format!("Failed to deserialize match request: {}", e),
            })?;

        Self::validate_match_request(&request)?;
        Ok(request)
    }

    /// Validate a match request
    ///
    /// Difficulty and duration are not checked here; classification into a
    /// bucket happens inside the engine.
    pub fn validate_match_request(request: &MatchRequest) -> Result<()> {
        Self::validate_player_id(&request.player_id)?;

        if request.skill < 0 {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: "Skill cannot be negative".to_string(),
            }
            .into());
        }

        Ok(())
    }

    fn validate_player_id(player_id: &str) -> Result<()> {
        if player_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: "Player ID cannot be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Serialize any outbound message to bytes
    pub fn serialize_message<T: Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Lossy UTF-8 preview of a raw payload, for logging
    pub fn payload_preview(bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        if text.chars().count() <= PAYLOAD_PREVIEW_LIMIT {
            return text.into_owned();
        }
        let mut preview: String = text.chars().take(PAYLOAD_PREVIEW_LIMIT).collect();
        preview.push_str("...");
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_producer_payload() {
        let bytes = br#"{"player_id":"7","elo_rank":1350,"difficulty":"Hard","time":"30","timestamp":1700000000123}"#;
        let request = MessageUtils::deserialize_match_request(bytes).unwrap();
        assert_eq!(request.player_id, "7");
        assert_eq!(request.skill, 1350);
        assert_eq!(request.duration, "30");
        assert_eq!(request.timestamp, 1_700_000_000_123);
    }

    #[test]
    fn test_validation_rejects_bad_requests() {
        let empty_id = br#"{"player_id":"","skill":10,"difficulty":"easy","duration":"10"}"#;
        assert!(MessageUtils::deserialize_match_request(empty_id).is_err());

        let negative = br#"{"player_id":"p","skill":-1,"difficulty":"easy","duration":"10"}"#;
        assert!(MessageUtils::deserialize_match_request(negative).is_err());

        assert!(MessageUtils::deserialize_match_request(b"not json").is_err());
        assert!(MessageUtils::deserialize_match_request(br#"{"player_id":"p"}"#).is_err());
    }

    #[test]
    fn test_unknown_difficulty_still_decodes() {
        let bytes = br#"{"player_id":"p","skill":10,"difficulty":"extreme","duration":"20"}"#;
        let request = MessageUtils::deserialize_match_request(bytes).unwrap();
        assert_eq!(request.difficulty, "extreme");
    }

    #[test]
    fn test_inbound_message_variants() {
        let leave = br#"{"player_id":"p","action":"leave"}"#;
        assert!(matches!(
            MessageUtils::deserialize_inbound(leave).unwrap(),
            InboundMessage::Leave(_)
        ));

        let join = br#"{"player_id":"p","skill":10,"difficulty":"easy","duration":10}"#;
        assert!(matches!(
            MessageUtils::deserialize_inbound(join).unwrap(),
            InboundMessage::Match(_)
        ));

        let bad_leave = br#"{"player_id":"","action":"leave"}"#;
        assert!(MessageUtils::deserialize_inbound(bad_leave).is_err());

        let unknown_action = br#"{"player_id":"p","action":"dance"}"#;
        assert!(MessageUtils::deserialize_inbound(unknown_action).is_err());
    }

    #[test]
    fn test_payload_preview_truncates() {
        let long = vec![b'a'; PAYLOAD_PREVIEW_LIMIT + 10];
        let preview = MessageUtils::payload_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.len(), PAYLOAD_PREVIEW_LIMIT + 3);

        assert_eq!(MessageUtils::payload_preview(b"short"), "short");
        assert!(!MessageUtils::payload_preview(&[0xff, 0xfe]).is_empty());
    }

    #[test]
    fn test_serialize_message() {
        let leave = LeaveRequest {
            player_id: "p".to_string(),
            action: LeaveAction::Leave,
        };
        let bytes = MessageUtils::serialize_message(&leave).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"player_id":"p","action":"leave"}"#
        );
    }
}
