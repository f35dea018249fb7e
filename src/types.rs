//! Common types used throughout the matchmaking service

use crate::error::MatchmakingError;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for players
pub type PlayerId = String;

/// Unique identifier for formed matches
pub type MatchId = Uuid;

/// Difficulty a player asks to be matched at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Every difficulty, in code order
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    /// Single-digit code used in bucket keys
    pub fn code(self) -> u32 {
        match self {
            Difficulty::Easy => 1,
            Difficulty::Medium => 2,
            Difficulty::Hard => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Difficulty::Easy),
            2 => Some(Difficulty::Medium),
            3 => Some(Difficulty::Hard),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = MatchmakingError;

    /// Case-insensitive: "easy", "EASY" and "Easy" all parse
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(MatchmakingError::InvalidMatchRequest {
                reason: format!("Unknown difficulty: {}", s),
            }),
        }
    }
}

/// Request to wait for a match, as decoded from the inbound bus
///
/// Difficulty and duration are kept as received; they are only checked when the
/// engine classifies the request into a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub player_id: PlayerId,
    #[serde(alias = "elo_rank")]
    pub skill: i64,
    pub difficulty: String,
    #[serde(alias = "time", deserialize_with = "string_or_number")]
    pub duration: String,
    /// Unix seconds or milliseconds; zero means "use arrival time"
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Number(i64),
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Text(text) => text,
        StringOrNumber::Number(number) => number.to_string(),
    })
}

/// A waiting player inside one bucket queue
///
/// Ordered by skill, then player id. The enqueue time does not take part in
/// ordering or equality, so an entry can be found again from (skill, id) alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub player_id: PlayerId,
    pub skill: i64,
    /// Unix seconds
    pub enqueued_at: i64,
}

impl QueueEntry {
    pub fn new(player_id: impl Into<PlayerId>, skill: i64, enqueued_at: i64) -> Self {
        Self {
            player_id: player_id.into(),
            skill,
            enqueued_at,
        }
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.skill == other.skill && self.player_id == other.player_id
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.skill
            .cmp(&other.skill)
            .then_with(|| self.player_id.cmp(&other.player_id))
    }
}

/// Players paired together by one sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub match_id: MatchId,
    pub player_ids: Vec<PlayerId>,
    pub created_at: i64,
}

/// Matches formed in one bucket during one sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchGroup {
    pub difficulty: Difficulty,
    /// Minutes
    pub duration: u32,
    pub matches: Vec<Match>,
}

/// Every match formed by one sweep, across all buckets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchBatch {
    pub groups: Vec<MatchGroup>,
    pub created_at: i64,
}

impl MatchBatch {
    /// Message key used on the match-found topic
    ///
    /// Sweeps can run more than once per second, so the key carries the id of
    /// the batch's first match alongside the creation time.
    pub fn key(&self) -> String {
        let first_match = self
            .groups
            .iter()
            .flat_map(|group| group.matches.iter())
            .next();
        match first_match {
            Some(first) => format!("batch-{}-{}", self.created_at, first.match_id),
            None => format!("batch-{}", self.created_at),
        }
    }

    pub fn match_count(&self) -> usize {
        self.groups.iter().map(|group| group.matches.len()).sum()
    }

    pub fn player_count(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|group| group.matches.iter())
            .map(|m| m.player_ids.len())
            .sum()
    }
}

/// Status carried by a queue update notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Joined,
    Requeued,
    Left,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Joined => write!(f, "joined"),
            QueueStatus::Requeued => write!(f, "requeued"),
            QueueStatus::Left => write!(f, "left"),
        }
    }
}

/// Fire-and-forget notice telling a player where they stand in their queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueUpdate {
    pub player_id: PlayerId,
    pub status: QueueStatus,
    pub message: String,
    /// 1-based, zero when the player is no longer queued
    pub position: u32,
    /// Estimated wait in seconds
    pub eta: u32,
    pub timestamp: i64,
}

/// Lifecycle of the engine coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Draining => write!(f, "draining"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_parsing_is_case_insensitive() {
        assert_eq!("easy".parse::<Difficulty>().unwrap(), Difficulty::Easy);
        assert_eq!("MEDIUM".parse::<Difficulty>().unwrap(), Difficulty::Medium);
        assert_eq!("Hard".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert!("extreme".parse::<Difficulty>().is_err());
    }

    #[test]
    fn test_difficulty_codes() {
        for difficulty in Difficulty::ALL {
            assert_eq!(Difficulty::from_code(difficulty.code()), Some(difficulty));
        }
        assert_eq!(Difficulty::from_code(0), None);
        assert_eq!(Difficulty::from_code(4), None);
    }

    #[test]
    fn test_queue_entry_ordering() {
        let low = QueueEntry::new("zed", 900, 0);
        let tie_a = QueueEntry::new("alice", 1000, 50);
        let tie_b = QueueEntry::new("bob", 1000, 10);

        assert!(low < tie_a);
        assert!(tie_a < tie_b);
        // enqueue time is not part of identity
        assert_eq!(tie_a, QueueEntry::new("alice", 1000, 999));
    }

    #[test]
    fn test_match_request_accepts_legacy_field_names() {
        let json = r#"{"player_id":"42","elo_rank":1200,"difficulty":"easy","time":"10","timestamp":1700000000}"#;
        let request: MatchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.skill, 1200);
        assert_eq!(request.duration, "10");

        let json = r#"{"player_id":"42","skill":1200,"difficulty":"easy","duration":30}"#;
        let request: MatchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.duration, "30");
        assert_eq!(request.timestamp, 0);
    }

    #[test]
    fn test_queue_update_wire_format() {
        let update = QueueUpdate {
            player_id: "p1".to_string(),
            status: QueueStatus::Joined,
            message: "joined queue".to_string(),
            position: 3,
            eta: 2,
            timestamp: 1_700_000_000,
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["status"], "joined");
        assert_eq!(value["position"], 3);
        assert_eq!(value["eta"], 2);
    }

    fn single_match_batch(created_at: i64) -> MatchBatch {
        MatchBatch {
            groups: vec![MatchGroup {
                difficulty: Difficulty::Medium,
                duration: 20,
                matches: vec![Match {
                    match_id: Uuid::new_v4(),
                    player_ids: vec!["a".to_string(), "b".to_string()],
                    created_at,
                }],
            }],
            created_at,
        }
    }

    #[test]
    fn test_batch_key_and_counts() {
        let batch = single_match_batch(5);
        let match_id = batch.groups[0].matches[0].match_id;
        assert_eq!(batch.key(), format!("batch-5-{}", match_id));
        assert_eq!(batch.match_count(), 1);
        assert_eq!(batch.player_count(), 2);

        let empty = MatchBatch {
            groups: Vec::new(),
            created_at: 5,
        };
        assert_eq!(empty.key(), "batch-5");
    }

    #[test]
    fn test_batches_from_the_same_second_have_distinct_keys() {
        let first = single_match_batch(1_700_000_000);
        let second = single_match_batch(1_700_000_000);
        assert_ne!(first.key(), second.key());
    }
}
