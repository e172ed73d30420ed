use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::request::ConversationId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryTier {
    Working,
    Episodic,
    Semantic,
    Procedural,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 4] =
        [Self::Working, Self::Episodic, Self::Semantic, Self::Procedural];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "working" => Some(Self::Working),
            "episodic" => Some(Self::Episodic),
            "semantic" => Some(Self::Semantic),
            "procedural" => Some(Self::Procedural),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkingMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodicEntry {
    pub embedding: Vec<f32>,
    pub content: String,
    pub episode_context: String,
    /// Clamped to `[0, 1]`.
    pub importance: f64,
    pub timestamp: DateTime<Utc>,
}

/// Read-only view over the four memory tiers for one conversation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub working: Vec<WorkingMessage>,
    pub episodic: Vec<EpisodicEntry>,
    pub semantic: BTreeMap<String, Value>,
    pub procedural: BTreeMap<String, Value>,
    /// Tiers that could not be loaded and were replaced by empty results.
    #[serde(default)]
    pub degraded_tiers: Vec<MemoryTier>,
}

impl MemorySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
            && self.episodic.is_empty()
            && self.semantic.is_empty()
            && self.procedural.is_empty()
    }

    pub fn last_user_message(&self) -> Option<&WorkingMessage> {
        self.working.iter().rev().find(|message| message.role == MessageRole::User)
    }

    /// Tool names remembered by procedural templates (`tool.<name>` keys).
    pub fn available_tools(&self) -> Vec<String> {
        self.procedural
            .keys()
            .filter_map(|key| key.strip_prefix("tool."))
            .map(str::to_string)
            .collect()
    }
}

/// Query parameters understood by a memory store.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryFilters {
    pub tiers: Vec<MemoryTier>,
    pub query_text: Option<String>,
    pub query_embedding: Option<Vec<f32>>,
    pub working_limit: usize,
    pub episodic_limit: usize,
}

impl MemoryFilters {
    pub fn for_tier(tier: MemoryTier) -> Self {
        Self {
            tiers: vec![tier],
            query_text: None,
            query_embedding: None,
            working_limit: 50,
            episodic_limit: 5,
        }
    }

    pub fn includes(&self, tier: MemoryTier) -> bool {
        self.tiers.is_empty() || self.tiers.contains(&tier)
    }
}

/// Append-only memory record handed to the store once emitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub id: String,
    pub conversation_id: ConversationId,
    pub tier: MemoryTier,
    pub summary: String,
    pub payload: Value,
    pub idempotency_key: String,
}
