use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use cerebro_core::domain::context::{Context, UserProfile, MESSAGE_KEY, TOOLS_AVAILABLE_KEY};
use cerebro_core::domain::request::{Request, UserId};
use serde_json::{json, Value};
use tracing::warn;

/// Request context key whose array value adds tools for a single request.
pub const REQUEST_TOOLS_KEY: &str = "tools";
/// Upper bound on a profile lookup unless the builder is given another.
pub const DEFAULT_PROFILE_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn get_profile(&self, user_id: &UserId) -> Result<Option<UserProfile>>;
}

/// Builds the per-request [`Context`]. Never fails: missing data falls back to defaults.
#[derive(Clone)]
pub struct ContextBuilder {
    profiles: Option<Arc<dyn ProfileLookup>>,
    tool_catalog: Vec<String>,
    profile_timeout: Duration,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(None, Vec::new())
    }
}

impl ContextBuilder {
    pub fn new(profiles: Option<Arc<dyn ProfileLookup>>, tool_catalog: Vec<String>) -> Self {
        Self { profiles, tool_catalog, profile_timeout: DEFAULT_PROFILE_TIMEOUT }
    }

    pub fn with_profile_timeout(mut self, timeout: Duration) -> Self {
        self.profile_timeout = timeout;
        self
    }

    pub async fn build_context(&self, request: &Request) -> Context {
        let profile = self.resolve_profile(request.user_id()).await;
        let context =
            Context::new(request.conversation_id().clone(), request.user_id().clone(), profile);

        let environment = context.environment();
        for (key, value) in request.context() {
            environment.insert(key.clone(), value.clone());
        }
        environment.insert("session_id", json!(request.session_id()));
        environment.insert("timestamp", json!(request.timestamp().to_rfc3339()));
        environment.insert("attachment_count", json!(request.attachments().len()));
        environment.insert(MESSAGE_KEY, json!(request.message()));

        let technical = context.technical();
        technical.insert(TOOLS_AVAILABLE_KEY, json!(self.available_tools(request)));
        let attachments = request
            .attachments()
            .iter()
            .map(|attachment| {
                json!({
                    "id": attachment.id,
                    "filename": attachment.filename,
                    "content_type": attachment.content_type,
                    "size": attachment.size,
                })
            })
            .collect::<Vec<_>>();
        technical.insert("attachments", Value::Array(attachments));

        context
    }

    async fn resolve_profile(&self, user_id: &UserId) -> UserProfile {
        let Some(profiles) = &self.profiles else {
            return UserProfile::minimal(user_id.clone());
        };

        match tokio::time::timeout(self.profile_timeout, profiles.get_profile(user_id)).await {
            Ok(Ok(Some(profile))) => profile,
            Ok(Ok(None)) => UserProfile::minimal(user_id.clone()),
            Err(_) => {
                warn!(
                    event_name = "agent.context.profile_lookup_timed_out",
                    user_id = %user_id.0,
                    timeout_ms = self.profile_timeout.as_millis() as u64,
                    "profile lookup timed out; using minimal profile"
                );
                UserProfile::minimal(user_id.clone())
            }
            Ok(Err(error)) => {
                warn!(
                    event_name = "agent.context.profile_lookup_failed",
                    user_id = %user_id.0,
                    error = %error,
                    "profile lookup failed; using minimal profile"
                );
                UserProfile::minimal(user_id.clone())
            }
        }
    }

    fn available_tools(&self, request: &Request) -> Vec<String> {
        let mut tools = self.tool_catalog.iter().cloned().collect::<BTreeSet<_>>();
        if let Some(Value::Array(extra)) = request.context().get(REQUEST_TOOLS_KEY) {
            tools.extend(extra.iter().filter_map(Value::as_str).map(str::to_string));
        }
        tools.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use cerebro_core::domain::context::{UserProfile, MESSAGE_KEY, PERMISSION_READ, PERMISSION_WRITE};
    use cerebro_core::domain::request::{Attachment, Request, UserId};
    use serde_json::json;

    use super::{ContextBuilder, ProfileLookup};

    struct FailingProfiles;

    #[async_trait]
    impl ProfileLookup for FailingProfiles {
        async fn get_profile(&self, _user_id: &UserId) -> Result<Option<UserProfile>> {
            Err(anyhow!("profile service offline"))
        }
    }

    struct HangingProfiles;

    #[async_trait]
    impl ProfileLookup for HangingProfiles {
        async fn get_profile(&self, _user_id: &UserId) -> Result<Option<UserProfile>> {
            std::future::pending().await
        }
    }

    struct AdminProfiles;

    #[async_trait]
    impl ProfileLookup for AdminProfiles {
        async fn get_profile(&self, user_id: &UserId) -> Result<Option<UserProfile>> {
            let mut profile = UserProfile::minimal(user_id.clone());
            profile.name = "Admin".to_string();
            profile.permissions.insert("admin".to_string());
            Ok(Some(profile))
        }
    }

    #[tokio::test]
    async fn bare_request_gets_defaults() {
        let request = Request::builder("c1", "what is my balance?").build();
        let context = ContextBuilder::default().build_context(&request).await;

        assert!(context.profile.has_permission(PERMISSION_READ));
        assert!(context.profile.has_permission(PERMISSION_WRITE));
        assert_eq!(context.environment().get("attachment_count"), Some(json!(0)));
        assert_eq!(context.environment().get(MESSAGE_KEY), Some(json!("what is my balance?")));
        assert!(context.available_tools().is_empty());
        assert!(context.domain().is_empty());
    }

    #[tokio::test]
    async fn failing_profile_lookup_degrades_to_minimal_profile() {
        let request = Request::builder("c1", "hello").user_id("u-7").build();
        let builder = ContextBuilder::new(Some(Arc::new(FailingProfiles)), vec![]);

        let context = builder.build_context(&request).await;

        assert_eq!(context.profile.id, UserId("u-7".to_string()));
        assert!(context.profile.has_permission(PERMISSION_WRITE));
    }

    #[tokio::test]
    async fn hanging_profile_lookup_times_out_to_minimal_profile() {
        let request = Request::builder("c1", "hello").user_id("u-9").build();
        let builder = ContextBuilder::new(Some(Arc::new(HangingProfiles)), vec![])
            .with_profile_timeout(Duration::from_millis(20));

        let context = tokio::time::timeout(Duration::from_secs(2), builder.build_context(&request))
            .await
            .expect("profile lookup should be bounded");

        assert_eq!(context.profile.id, UserId("u-9".to_string()));
        assert!(context.profile.has_permission(PERMISSION_READ));
    }

    #[tokio::test]
    async fn profile_lookup_result_is_used() {
        let request = Request::builder("c1", "hello").build();
        let builder = ContextBuilder::new(Some(Arc::new(AdminProfiles)), vec![]);

        let context = builder.build_context(&request).await;

        assert_eq!(context.profile.name, "Admin");
        assert!(context.profile.has_permission("admin"));
    }

    #[tokio::test]
    async fn tools_merge_catalog_and_request_context() {
        let request = Request::builder("c1", "create a new ticket")
            .context_value("tools", json!(["weather-tool", "ticket-tool"]))
            .context_value("locale", json!("en-GB"))
            .attachment(Attachment::new("notes.txt", "text/plain", b"hi".to_vec()))
            .build();
        let builder = ContextBuilder::new(None, vec!["ticket-tool".to_string()]);

        let context = builder.build_context(&request).await;

        assert_eq!(context.available_tools(), vec!["ticket-tool", "weather-tool"]);
        assert_eq!(context.environment().get("locale"), Some(json!("en-GB")));
        assert_eq!(context.environment().get("attachment_count"), Some(json!(1)));
        let attachments = context.technical().get("attachments").expect("attachments");
        assert_eq!(attachments[0]["filename"], "notes.txt");
        assert_eq!(attachments[0]["size"], 2);
    }
}
