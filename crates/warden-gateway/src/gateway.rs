//! The tool-invocation gateway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use warden_core::audit::{self, AuditAction, AuditEvent, AuditOutcome, AuditSink, RequestContext};
use warden_core::{GatewaySettings, ToolError};

use crate::cache::ResultCache;
use crate::filter::filter_sensitive_fields;
use crate::tool::Tool;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Registers tools and mediates every call to them.
///
/// Results are filtered before they are cached, so a cache hit can never
/// return a field the filter would have removed.
pub struct ToolGateway {
    tools: DashMap<String, Arc<dyn Tool>>,
    cache: ResultCache,
    audit: Arc<dyn AuditSink>,
    audit_cache_hits: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ToolGateway {
    pub fn new(settings: &GatewaySettings, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            tools: DashMap::new(),
            cache: ResultCache::new(settings.cache_max_entries, settings.cache_ttl()),
            audit,
            audit_cache_hits: settings.audit_cache_hits,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Register a tool under its name. An existing tool of that name is replaced.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Tool re-registered, previous implementation replaced");
        } else {
            debug!(tool = %name, "Registered tool");
        }
    }

    /// Remove a tool; later calls to it fail with `NotFound`.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name).map(|(_, tool)| tool)
    }

    /// Registered tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// `{name, description}` for every registered tool, sorted by name.
    pub fn describe_tools(&self) -> Vec<Value> {
        let mut tools: Vec<(String, String)> = self
            .tools
            .iter()
            .map(|e| (e.key().clone(), e.value().description().to_string()))
            .collect();
        tools.sort();
        tools
            .into_iter()
            .map(|(name, description)| json!({"name": name, "description": description}))
            .collect()
    }

    /// Invoke `tool_name` for `user_id`, serving repeated calls from cache.
    pub fn execute(
        &self,
        tool_name: &str,
        user_id: &str,
        params: &Value,
        context: &RequestContext,
    ) -> Result<Value, ToolError> {
        // Clone out of the map so no shard lock is held while the tool runs.
        let tool = self
            .tools
            .get(tool_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                warn!(tool = tool_name, user = user_id, "Call to unregistered tool");
                ToolError::NotFound(tool_name.to_string())
            })?;

        if user_id.trim().is_empty() {
            warn!(tool = tool_name, "Tool call without an authenticated user");
            return Err(ToolError::Unauthorized(tool_name.to_string()));
        }

        let key = cache_key(tool_name, user_id, params);
        if let Some(cached) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(tool = tool_name, user = user_id, "Tool result served from cache");
            if self.audit_cache_hits {
                self.audit(
                    tool_name,
                    user_id,
                    params,
                    context,
                    AuditOutcome::Success,
                    true,
                    None,
                );
            }
            return Ok(cached);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        match tool.execute(user_id, params) {
            Ok(mut result) => {
                let removed = filter_sensitive_fields(&mut result);
                if removed > 0 {
                    debug!(tool = tool_name, removed, "Sensitive fields stripped from tool result");
                }
                self.cache.put(key, user_id, result.clone());
                self.audit(
                    tool_name,
                    user_id,
                    params,
                    context,
                    AuditOutcome::Success,
                    false,
                    None,
                );
                info!(tool = tool_name, user = user_id, "Tool executed");
                Ok(result)
            }
            Err(source) => {
                warn!(tool = tool_name, user = user_id, "Tool execution failed: {}", source);
                let detail = source.to_string();
                self.audit(
                    tool_name,
                    user_id,
                    params,
                    context,
                    AuditOutcome::Failure,
                    false,
                    Some(detail),
                );
                Err(ToolError::ExecutionFailed {
                    tool: tool_name.to_string(),
                    source,
                })
            }
        }
    }

    /// Hit and miss counters since start-up, with the live entry count.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
        }
    }

    /// Drop expired cache entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Forget every cached result of `user_id`, e.g. after their data changed.
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        self.cache.invalidate_user(user_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn audit(
        &self,
        tool_name: &str,
        user_id: &str,
        params: &Value,
        context: &RequestContext,
        outcome: AuditOutcome,
        cached: bool,
        error: Option<String>,
    ) {
        // Parameter names only, never their values.
        let param_keys: Vec<&str> = match params {
            Value::Object(map) => {
                let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
                keys.sort_unstable();
                keys
            }
            _ => Vec::new(),
        };
        let mut summary = json!({
            "tool": tool_name,
            "param_keys": param_keys,
            "param_count": param_keys.len(),
            "cached": cached,
        });
        if let (Some(error), Value::Object(map)) = (error, &mut summary) {
            map.insert("error".into(), Value::String(error));
        }

        let event = AuditEvent::new(user_id, AuditAction::ToolExecution, outcome, summary)
            .with_context(context.clone());
        audit::record(self.audit.as_ref(), event);
    }
}

/// Deterministic cache key: SHA-256 over the canonical JSON of
/// `{params, tool, user}` with object keys sorted at every depth.
pub fn cache_key(tool_name: &str, user_id: &str, params: &Value) -> String {
    let material = canonicalize(&json!({
        "tool": tool_name,
        "user": user_id,
        "params": params,
    }));
    hex::encode(Sha256::digest(material.to_string().as_bytes()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, child) in entries {
                sorted.insert(key.clone(), canonicalize(child));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use warden_core::{BoxError, MemoryAuditLog};

    struct Counting {
        calls: AtomicUsize,
    }

    impl Tool for Counting {
        fn name(&self) -> &str {
            "search_jobs"
        }

        fn execute(&self, user_id: &str, params: &Value) -> Result<Value, BoxError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({
                "user": user_id,
                "query": params["q"],
                "call": n,
                "api_key": "sk-live-123",
            }))
        }
    }

    struct Failing;

    impl Tool for Failing {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn execute(&self, _user_id: &str, _params: &Value) -> Result<Value, BoxError> {
            Err("upstream timed out".into())
        }
    }

    fn gateway(settings: GatewaySettings) -> (ToolGateway, Arc<MemoryAuditLog>, Arc<Counting>) {
        let log = Arc::new(MemoryAuditLog::new(100));
        let gw = ToolGateway::new(&settings, log.clone());
        let tool = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        gw.register(tool.clone());
        (gw, log, tool)
    }

    #[test]
    fn test_cache_key_ignores_param_order() {
        let a = cache_key("t", "u", &json!({"a": 1, "b": {"x": 1, "y": 2}}));
        let b = cache_key("t", "u", &json!({"b": {"y": 2, "x": 1}, "a": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, cache_key("t", "v", &json!({"a": 1, "b": {"x": 1, "y": 2}})));
        assert_ne!(a, cache_key("t2", "u", &json!({"a": 1, "b": {"x": 1, "y": 2}})));
    }

    #[test]
    fn test_second_call_served_from_cache() {
        let (gw, log, tool) = gateway(GatewaySettings::default());
        let ctx = RequestContext::default();
        let first = gw.execute("search_jobs", "alice", &json!({"q": "rust"}), &ctx).unwrap();
        let second = gw.execute("search_jobs", "alice", &json!({"q": "rust"}), &ctx).unwrap();

        assert_eq!(first, second);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.len(), 1);
        assert_eq!(
            gw.cache_stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
    }

    #[test]
    fn test_result_filtered() {
        let (gw, _, _) = gateway(GatewaySettings::default());
        let result = gw
            .execute("search_jobs", "alice", &json!({"q": "go"}), &RequestContext::default())
            .unwrap();
        assert!(result.get("api_key").is_none());
        assert_eq!(result["query"], "go");
    }

    #[test]
    fn test_not_found_and_unauthorized() {
        let (gw, log, _) = gateway(GatewaySettings::default());
        let ctx = RequestContext::default();
        assert!(matches!(
            gw.execute("missing", "alice", &json!({}), &ctx),
            Err(ToolError::NotFound(_))
        ));
        assert!(matches!(
            gw.execute("search_jobs", "", &json!({}), &ctx),
            Err(ToolError::Unauthorized(_))
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn test_failure_audited_and_not_cached() {
        let log = Arc::new(MemoryAuditLog::new(10));
        let gw = ToolGateway::new(&GatewaySettings::default(), log.clone());
        gw.register(Arc::new(Failing));

        let err = gw
            .execute("broken", "alice", &json!({"q": 1}), &RequestContext::default())
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
        assert!(std::error::Error::source(&err).is_some());

        let events = log.by_action(AuditAction::ToolExecution);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, AuditOutcome::Failure);
        assert_eq!(gw.cache_stats().entries, 0);
    }

    #[test]
    fn test_audit_summary_has_no_param_values() {
        let (gw, log, _) = gateway(GatewaySettings::default());
        let ctx = RequestContext {
            session_id: Some("s-1".into()),
            ip_address: Some("10.0.0.7".into()),
            user_agent: Some("cli".into()),
        };
        gw.execute("search_jobs", "alice", &json!({"q": "secret-query"}), &ctx)
            .unwrap();

        let event = &log.recent(1)[0];
        assert_eq!(event.summary["param_keys"], json!(["q"]));
        assert_eq!(event.summary["param_count"], 1);
        assert!(!event.summary.to_string().contains("secret-query"));
        assert_eq!(event.context.ip_address.as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn test_audit_cache_hits_flag() {
        let settings = GatewaySettings {
            audit_cache_hits: true,
            ..GatewaySettings::default()
        };
        let (gw, log, _) = gateway(settings);
        let ctx = RequestContext::default();
        gw.execute("search_jobs", "alice", &json!({}), &ctx).unwrap();
        gw.execute("search_jobs", "alice", &json!({}), &ctx).unwrap();

        let events = log.by_action(AuditAction::ToolExecution);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].summary["cached"], true);
    }

    #[test]
    fn test_cache_expiry_reinvokes_tool() {
        let settings = GatewaySettings::default();
        let log = Arc::new(MemoryAuditLog::new(10));
        let gw = ToolGateway {
            cache: ResultCache::new(10, Duration::from_millis(5)),
            ..ToolGateway::new(&settings, log)
        };
        let tool = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        gw.register(tool.clone());
        let ctx = RequestContext::default();

        gw.execute("search_jobs", "alice", &json!({}), &ctx).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        gw.execute("search_jobs", "alice", &json!({}), &ctx).unwrap();
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_registry_management() {
        let (gw, _, _) = gateway(GatewaySettings::default());
        gw.register(Arc::new(Failing));
        assert_eq!(gw.tool_names(), vec!["broken", "search_jobs"]);
        assert_eq!(
            gw.describe_tools(),
            vec![
                json!({"name": "broken", "description": "Always fails"}),
                json!({"name": "search_jobs", "description": ""}),
            ]
        );

        // Re-registration replaces without error.
        gw.register(Arc::new(Failing));
        assert_eq!(gw.tool_names().len(), 2);

        assert!(gw.unregister("broken").is_some());
        assert!(gw.unregister("broken").is_none());
        assert_eq!(gw.tool_names(), vec!["search_jobs"]);
    }

    #[test]
    fn test_invalidate_user() {
        let (gw, _, tool) = gateway(GatewaySettings::default());
        let ctx = RequestContext::default();
        gw.execute("search_jobs", "alice", &json!({}), &ctx).unwrap();
        gw.execute("search_jobs", "bob", &json!({}), &ctx).unwrap();

        assert_eq!(gw.invalidate_user("alice"), 1);
        gw.execute("search_jobs", "alice", &json!({}), &ctx).unwrap();
        gw.execute("search_jobs", "bob", &json!({}), &ctx).unwrap();
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    }
}
