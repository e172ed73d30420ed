use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::request::{ConversationId, UserId};

pub const PERMISSION_READ: &str = "read";
pub const PERMISSION_WRITE: &str = "write";

/// Technical state key listing tool names the request may use.
pub const TOOLS_AVAILABLE_KEY: &str = "tools.available";
/// Environment key holding the raw user message of the current request.
pub const MESSAGE_KEY: &str = "request.message";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub preferences: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl UserProfile {
    /// Profile used when no lookup is wired or the lookup has nothing for the user.
    pub fn minimal(user_id: UserId) -> Self {
        let name = user_id.0.clone();
        Self {
            id: user_id,
            name,
            permissions: [PERMISSION_READ, PERMISSION_WRITE]
                .into_iter()
                .map(str::to_string)
                .collect(),
            preferences: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateScope {
    Environment,
    Domain,
    Technical,
}

impl StateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Domain => "domain",
            Self::Technical => "technical",
        }
    }
}

/// Internally synchronized key/value container scoped to one request.
///
/// Readers never observe a torn write. A poisoned lock is recovered: a panicking
/// writer leaves an entry either fully inserted or untouched.
#[derive(Debug)]
pub struct StateMap {
    scope: StateScope,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl StateMap {
    pub fn new(scope: StateScope) -> Self {
        Self { scope, entries: RwLock::new(BTreeMap::new()) }
    }

    pub fn scope(&self) -> StateScope {
        self.scope
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every entry, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.clone()
    }

    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(values)) => {
                values.iter().filter_map(|value| value.as_str().map(str::to_string)).collect()
            }
            Some(Value::String(value)) => vec![value],
            _ => Vec::new(),
        }
    }
}

/// Request-scoped context. Built once per request and dropped when it completes.
#[derive(Debug)]
pub struct Context {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub profile: UserProfile,
    environment: StateMap,
    domain: StateMap,
    technical: StateMap,
}

impl Context {
    pub fn new(conversation_id: ConversationId, user_id: UserId, profile: UserProfile) -> Self {
        Self {
            conversation_id,
            user_id,
            profile,
            environment: StateMap::new(StateScope::Environment),
            domain: StateMap::new(StateScope::Domain),
            technical: StateMap::new(StateScope::Technical),
        }
    }

    pub fn environment(&self) -> &StateMap {
        &self.environment
    }

    pub fn domain(&self) -> &StateMap {
        &self.domain
    }

    pub fn technical(&self) -> &StateMap {
        &self.technical
    }

    pub fn state(&self, scope: StateScope) -> &StateMap {
        match scope {
            StateScope::Environment => &self.environment,
            StateScope::Domain => &self.domain,
            StateScope::Technical => &self.technical,
        }
    }

    pub fn available_tools(&self) -> Vec<String> {
        self.technical.string_list(TOOLS_AVAILABLE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{Context, StateScope, UserProfile, PERMISSION_READ, PERMISSION_WRITE};
    use crate::domain::request::{ConversationId, UserId};

    fn context() -> Context {
        let user_id = UserId("u-1".to_string());
        Context::new(
            ConversationId("c-1".to_string()),
            user_id.clone(),
            UserProfile::minimal(user_id),
        )
    }

    #[test]
    fn minimal_profile_grants_read_write() {
        let profile = UserProfile::minimal(UserId("u-9".to_string()));
        assert!(profile.has_permission(PERMISSION_READ));
        assert!(profile.has_permission(PERMISSION_WRITE));
        assert!(!profile.has_permission("admin"));
    }

    #[test]
    fn state_maps_are_independent() {
        let context = context();
        context.environment().insert("k", json!(1));

        assert_eq!(context.environment().get("k"), Some(json!(1)));
        assert!(context.domain().get("k").is_none());
        assert!(context.technical().is_empty());
        assert_eq!(context.state(StateScope::Environment).len(), 1);
    }

    #[test]
    fn string_list_accepts_arrays_and_scalars() {
        let context = context();
        context.technical().insert("tools.available", json!(["ticket-tool", 3, "search"]));
        context.technical().insert("single", json!("only"));

        assert_eq!(context.available_tools(), vec!["ticket-tool", "search"]);
        assert_eq!(context.technical().string_list("single"), vec!["only"]);
        assert!(context.technical().string_list("missing").is_empty());
    }

    #[test]
    fn state_map_supports_concurrent_writers() {
        let context = Arc::new(context());
        let handles = (0..8)
            .map(|index| {
                let context = Arc::clone(&context);
                std::thread::spawn(move || {
                    for offset in 0..50 {
                        context.domain().insert(format!("fact.{index}.{offset}"), json!(offset));
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert!(handle.join().is_ok());
        }

        assert_eq!(context.domain().len(), 400);
    }
}
