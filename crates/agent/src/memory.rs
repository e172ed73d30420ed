//! Tiered conversation memory.
//!
//! The [`MemoryManager`] is the only component that talks to the [`MemoryStore`]. It fans tier
//! reads out concurrently, degrades a failing tier to an empty one, and makes appends
//! idempotent under request retries.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cerebro_core::config::MemoryConfig;
use cerebro_core::domain::context::{Context, MESSAGE_KEY};
use cerebro_core::domain::intent::clamp_confidence;
use cerebro_core::domain::memory::{
    EpisodicEntry, MemoryFilters, MemorySnapshot, MemoryTier, MemoryUpdate, MessageRole,
    WorkingMessage,
};
use cerebro_core::domain::request::{ConversationId, Request};
use cerebro_core::domain::response::Response;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::conversation::tokenize;

const SIMILARITY_WEIGHT: f64 = 0.7;
const IMPORTANCE_WEIGHT: f64 = 0.3;
/// Idempotency keys remembered per manager. Older keys fall back to the store's own dedup by id.
pub const LEDGER_CAPACITY: usize = 4_096;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MemoryStoreError {
    #[error("memory store unavailable: {0}")]
    Unavailable(String),
    #[error("memory update `{id}` has an invalid payload: {reason}")]
    InvalidPayload { id: String, reason: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("failed to append memory update `{update_id}` ({tier:?}): {source}")]
    Append {
        update_id: String,
        tier: MemoryTier,
        #[source]
        source: MemoryStoreError,
    },
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn retrieve_memory(
        &self,
        conversation_id: &ConversationId,
        filters: &MemoryFilters,
    ) -> Result<MemorySnapshot, MemoryStoreError>;

    async fn append_memory_update(&self, update: MemoryUpdate) -> Result<(), MemoryStoreError>;

    async fn consolidate(&self, conversation_id: &ConversationId) -> Result<(), MemoryStoreError>;
}

/// Deterministic hashed bag-of-words embedding, L2-normalised.
pub fn embed_text(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dims.max(1)];
    for token in tokenize(text) {
        let hash = blake3::hash(token.as_bytes());
        let bytes = hash.as_bytes();
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&bytes[..8]);
        let index = (u64::from_le_bytes(index_bytes) % vector.len() as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }

    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let dot = left.iter().zip(right).map(|(a, b)| f64::from(*a) * f64::from(*b)).sum::<f64>();
    let left_norm = left.iter().map(|a| f64::from(*a).powi(2)).sum::<f64>().sqrt();
    let right_norm = right.iter().map(|b| f64::from(*b).powi(2)).sum::<f64>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

/// Idempotency key for one update slot of one request/response pair.
pub fn idempotency_key(request: &Request, response_id: &str, tier: MemoryTier, slot: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(request.request_id().0.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(response_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(tier.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(slot.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Insertion-ordered set of idempotency keys that evicts the oldest key once full.
#[derive(Debug)]
struct IdempotencyLedger {
    capacity: usize,
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl IdempotencyLedger {
    fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), order: VecDeque::new(), keys: HashSet::new() }
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: String) {
        if !self.keys.insert(key.clone()) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.keys.remove(&evicted);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    config: MemoryConfig,
    ledger: Mutex<IdempotencyLedger>,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn MemoryStore>, config: MemoryConfig) -> Self {
        Self::with_ledger_capacity(store, config, LEDGER_CAPACITY)
    }

    pub fn with_ledger_capacity(
        store: Arc<dyn MemoryStore>,
        config: MemoryConfig,
        capacity: usize,
    ) -> Self {
        Self { store, config, ledger: Mutex::new(IdempotencyLedger::new(capacity)) }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Reads every tier concurrently. Never fails; a tier that errors or times out is empty.
    pub async fn retrieve(&self, conversation_id: &ConversationId, context: &Context) -> MemorySnapshot {
        let query_text =
            context.environment().get(MESSAGE_KEY).and_then(|value| value.as_str().map(str::to_string));
        let query_embedding =
            query_text.as_deref().map(|text| embed_text(text, self.config.embedding_dims));

        let filters_for = |tier: MemoryTier| MemoryFilters {
            tiers: vec![tier],
            query_text: query_text.clone(),
            query_embedding: query_embedding.clone(),
            working_limit: self.config.working_limit,
            episodic_limit: self.config.episodic_limit,
        };

        let (working, episodic, semantic, procedural) = tokio::join!(
            self.fetch_tier(conversation_id, filters_for(MemoryTier::Working)),
            self.fetch_tier(conversation_id, filters_for(MemoryTier::Episodic)),
            self.fetch_tier(conversation_id, filters_for(MemoryTier::Semantic)),
            self.fetch_tier(conversation_id, filters_for(MemoryTier::Procedural)),
        );

        let mut snapshot = MemorySnapshot::empty();
        match working {
            Some(tier) => snapshot.working = tier.working,
            None => snapshot.degraded_tiers.push(MemoryTier::Working),
        }
        match episodic {
            Some(tier) => snapshot.episodic = tier.episodic,
            None => snapshot.degraded_tiers.push(MemoryTier::Episodic),
        }
        match semantic {
            Some(tier) => snapshot.semantic = tier.semantic,
            None => snapshot.degraded_tiers.push(MemoryTier::Semantic),
        }
        match procedural {
            Some(tier) => snapshot.procedural = tier.procedural,
            None => snapshot.degraded_tiers.push(MemoryTier::Procedural),
        }

        debug!(
            event_name = "agent.memory.retrieved",
            conversation_id = %conversation_id,
            working = snapshot.working.len(),
            episodic = snapshot.episodic.len(),
            semantic = snapshot.semantic.len(),
            procedural = snapshot.procedural.len(),
            degraded_tiers = snapshot.degraded_tiers.len(),
            "memory snapshot assembled"
        );

        snapshot
    }

    async fn fetch_tier(
        &self,
        conversation_id: &ConversationId,
        filters: MemoryFilters,
    ) -> Option<MemorySnapshot> {
        let tier = filters.tiers.first().map(MemoryTier::as_str).unwrap_or("all");
        let budget = Duration::from_millis(self.config.retrieval_timeout_ms);

        match tokio::time::timeout(budget, self.store.retrieve_memory(conversation_id, &filters)).await
        {
            Ok(Ok(snapshot)) => Some(snapshot),
            Ok(Err(error)) => {
                warn!(
                    event_name = "agent.memory.tier_degraded",
                    conversation_id = %conversation_id,
                    tier,
                    error = %error,
                    "memory tier unavailable; continuing with empty tier"
                );
                None
            }
            Err(_) => {
                warn!(
                    event_name = "agent.memory.tier_degraded",
                    conversation_id = %conversation_id,
                    tier,
                    timeout_ms = self.config.retrieval_timeout_ms,
                    "memory tier timed out; continuing with empty tier"
                );
                None
            }
        }
    }

    /// Updates produced by one exchange. Ids and keys are stable for a request/response pair.
    pub fn prepare_updates(
        &self,
        request: &Request,
        response: &Response,
        context: &Context,
    ) -> Vec<MemoryUpdate> {
        let now = Utc::now();
        let conversation_id = request.conversation_id().clone();
        let response_id = response.response_id.as_str();
        let make = |tier: MemoryTier, slot: &str, summary: String, payload: Value| {
            let key = idempotency_key(request, response_id, tier, slot);
            MemoryUpdate {
                id: format!("mu_{}", &key[..24]),
                conversation_id: conversation_id.clone(),
                tier,
                summary,
                payload,
                idempotency_key: key,
            }
        };

        let mut updates = vec![
            make(
                MemoryTier::Working,
                "user",
                truncate(request.message(), 120),
                json!({
                    "role": MessageRole::User.as_str(),
                    "content": request.message(),
                    "timestamp": request.timestamp().to_rfc3339(),
                    "request_id": request.request_id().0,
                }),
            ),
            make(
                MemoryTier::Working,
                "assistant",
                truncate(&response.content, 120),
                json!({
                    "role": MessageRole::Assistant.as_str(),
                    "content": response.content,
                    "timestamp": now.to_rfc3339(),
                    "response_id": response_id,
                }),
            ),
        ];

        let exchange = format!("user: {} | assistant: {}", request.message(), response.content);
        let episode_context = context
            .domain()
            .get("intent.domain")
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "general".to_string());
        updates.push(make(
            MemoryTier::Episodic,
            "exchange",
            truncate(&exchange, 160),
            json!({
                "content": exchange,
                "embedding": embed_text(&exchange, self.config.embedding_dims),
                "episode_context": episode_context,
                "importance": clamp_confidence(response.confidence),
                "timestamp": now.to_rfc3339(),
            }),
        ));

        for (key, value) in context.domain().snapshot() {
            updates.push(make(
                MemoryTier::Semantic,
                &key,
                format!("{key} = {value}"),
                json!({ "key": key, "value": value }),
            ));
        }

        for tool in &response.executed_tools {
            let key = format!("tool.{tool}");
            updates.push(make(
                MemoryTier::Procedural,
                &key,
                format!("used tool {tool}"),
                json!({
                    "key": key,
                    "tool": tool,
                    "intent_type": context.domain().get("intent.type").unwrap_or(Value::Null),
                    "last_used": now.to_rfc3339(),
                }),
            ));
        }

        updates
    }

    /// Appends the exchange to the store and returns how many updates were newly appended.
    pub async fn store(
        &self,
        request: &Request,
        response: &Response,
        context: &Context,
    ) -> Result<usize, MemoryError> {
        let mut appended = 0;
        for update in self.prepare_updates(request, response, context) {
            if self.already_stored(&update.idempotency_key) {
                continue;
            }

            let key = update.idempotency_key.clone();
            let update_id = update.id.clone();
            let tier = update.tier;
            self.store
                .append_memory_update(update)
                .await
                .map_err(|source| MemoryError::Append { update_id, tier, source })?;
            self.mark_stored(key);
            appended += 1;
        }

        info!(
            event_name = "agent.memory.stored",
            conversation_id = %request.conversation_id(),
            request_id = %request.request_id(),
            appended,
            "memory updates appended"
        );
        Ok(appended)
    }

    pub fn should_consolidate(&self, snapshot: &MemorySnapshot) -> bool {
        snapshot.working.len() >= self.config.consolidation_threshold
    }

    /// Schedules consolidation on a detached task. Callers may drop the handle.
    pub fn consolidate(&self, conversation_id: &ConversationId) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let conversation_id = conversation_id.clone();
        tokio::spawn(async move {
            match store.consolidate(&conversation_id).await {
                Ok(()) => debug!(
                    event_name = "agent.memory.consolidated",
                    conversation_id = %conversation_id,
                    "memory consolidation finished"
                ),
                Err(error) => warn!(
                    event_name = "agent.memory.consolidation_failed",
                    conversation_id = %conversation_id,
                    error = %error,
                    "memory consolidation failed"
                ),
            }
        })
    }

    fn already_stored(&self, key: &str) -> bool {
        let ledger = self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ledger.contains(key)
    }

    fn mark_stored(&self, key: String) {
        let mut ledger = self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ledger.insert(key);
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}

#[derive(Debug, Default)]
struct ConversationMemory {
    working: Vec<WorkingMessage>,
    episodic: Vec<EpisodicEntry>,
    semantic: BTreeMap<String, Value>,
    procedural: BTreeMap<String, Value>,
    applied_ids: HashSet<String>,
    summaries: usize,
}

/// Process-local [`MemoryStore`]. Appends are deduplicated by update id.
#[derive(Debug)]
pub struct InMemoryMemoryStore {
    conversations: RwLock<HashMap<ConversationId, ConversationMemory>>,
    keep_recent: usize,
    embedding_dims: usize,
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new(10, MemoryConfig::default().embedding_dims)
    }
}

impl InMemoryMemoryStore {
    pub fn new(keep_recent: usize, embedding_dims: usize) -> Self {
        Self { conversations: RwLock::new(HashMap::new()), keep_recent, embedding_dims }
    }

    pub async fn applied_update_count(&self, conversation_id: &ConversationId) -> usize {
        let conversations = self.conversations.read().await;
        conversations.get(conversation_id).map_or(0, |memory| memory.applied_ids.len())
    }

    /// Seeds a procedural template, e.g. to advertise a tool to later requests.
    pub async fn remember_procedure(
        &self,
        conversation_id: &ConversationId,
        key: impl Into<String>,
        template: Value,
    ) {
        let mut conversations = self.conversations.write().await;
        conversations.entry(conversation_id.clone()).or_default().procedural.insert(key.into(), template);
    }

    fn apply(memory: &mut ConversationMemory, update: &MemoryUpdate) -> Result<(), MemoryStoreError> {
        let invalid = |reason: &str| MemoryStoreError::InvalidPayload {
            id: update.id.clone(),
            reason: reason.to_string(),
        };
        let payload = &update.payload;

        match update.tier {
            MemoryTier::Working => {
                let role = payload
                    .get("role")
                    .and_then(Value::as_str)
                    .and_then(MessageRole::parse)
                    .ok_or_else(|| invalid("missing or unknown role"))?;
                let content = payload
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("missing content"))?;
                memory.working.push(WorkingMessage {
                    role,
                    content: content.to_string(),
                    timestamp: parse_timestamp(payload),
                    metadata: BTreeMap::from([("update_id".to_string(), json!(update.id))]),
                });
            }
            MemoryTier::Episodic => {
                let content = payload
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("missing content"))?;
                let embedding = payload
                    .get("embedding")
                    .and_then(Value::as_array)
                    .map(|values| {
                        values.iter().filter_map(Value::as_f64).map(|value| value as f32).collect()
                    })
                    .unwrap_or_default();
                memory.episodic.push(EpisodicEntry {
                    embedding,
                    content: content.to_string(),
                    episode_context: payload
                        .get("episode_context")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    importance: clamp_confidence(
                        payload.get("importance").and_then(Value::as_f64).unwrap_or(0.0),
                    ),
                    timestamp: parse_timestamp(payload),
                });
            }
            MemoryTier::Semantic => {
                let key = payload
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("missing key"))?;
                let value = payload.get("value").cloned().unwrap_or(Value::Null);
                memory.semantic.insert(key.to_string(), value);
            }
            MemoryTier::Procedural => {
                let key = payload
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("missing key"))?;
                memory.procedural.insert(key.to_string(), payload.clone());
            }
        }

        Ok(())
    }
}

fn parse_timestamp(payload: &Value) -> DateTime<Utc> {
    payload
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn retrieve_memory(
        &self,
        conversation_id: &ConversationId,
        filters: &MemoryFilters,
    ) -> Result<MemorySnapshot, MemoryStoreError> {
        let conversations = self.conversations.read().await;
        let Some(memory) = conversations.get(conversation_id) else {
            return Ok(MemorySnapshot::empty());
        };

        let mut snapshot = MemorySnapshot::empty();
        if filters.includes(MemoryTier::Working) {
            let skip = memory.working.len().saturating_sub(filters.working_limit);
            snapshot.working = memory.working[skip..].to_vec();
        }
        if filters.includes(MemoryTier::Episodic) {
            let mut ranked = memory
                .episodic
                .iter()
                .map(|entry| {
                    let similarity = filters
                        .query_embedding
                        .as_deref()
                        .map_or(0.0, |query| cosine_similarity(query, &entry.embedding));
                    (similarity * SIMILARITY_WEIGHT + entry.importance * IMPORTANCE_WEIGHT, entry)
                })
                .collect::<Vec<_>>();
            ranked.sort_by(|left, right| {
                right
                    .0
                    .total_cmp(&left.0)
                    .then_with(|| right.1.timestamp.cmp(&left.1.timestamp))
            });
            snapshot.episodic = ranked
                .into_iter()
                .take(filters.episodic_limit)
                .map(|(_, entry)| entry.clone())
                .collect();
        }
        if filters.includes(MemoryTier::Semantic) {
            snapshot.semantic = memory.semantic.clone();
        }
        if filters.includes(MemoryTier::Procedural) {
            snapshot.procedural = memory.procedural.clone();
        }

        Ok(snapshot)
    }

    async fn append_memory_update(&self, update: MemoryUpdate) -> Result<(), MemoryStoreError> {
        let mut conversations = self.conversations.write().await;
        let memory = conversations.entry(update.conversation_id.clone()).or_default();
        if memory.applied_ids.contains(&update.id) {
            return Ok(());
        }

        Self::apply(memory, &update)?;
        memory.applied_ids.insert(update.id);
        Ok(())
    }

    async fn consolidate(&self, conversation_id: &ConversationId) -> Result<(), MemoryStoreError> {
        let mut conversations = self.conversations.write().await;
        let Some(memory) = conversations.get_mut(conversation_id) else {
            return Ok(());
        };
        if memory.working.len() <= self.keep_recent {
            return Ok(());
        }

        let fold_count = memory.working.len() - self.keep_recent;
        let folded = memory.working.drain(..fold_count).collect::<Vec<_>>();
        let summary = folded
            .iter()
            .map(|message| format!("{}: {}", message.role.as_str(), truncate(&message.content, 60)))
            .collect::<Vec<_>>()
            .join("; ");

        memory.summaries += 1;
        memory.episodic.push(EpisodicEntry {
            embedding: embed_text(&summary, self.embedding_dims),
            content: summary.clone(),
            episode_context: "consolidated".to_string(),
            importance: 0.5,
            timestamp: Utc::now(),
        });
        memory.semantic.insert(format!("summary.{}", memory.summaries), json!(summary));

        Ok(())
    }
}
