//! Append-only audit trail for security-relevant actions.
//!
//! Components never call a sink directly: they go through [`record`], which
//! logs and swallows sink failures so an audit outage can never fail or block
//! the caller.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AuditError;

/// Kind of action being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ToolExecution,
    InjectionAttempt,
    ConsentRequested,
    ConsentDecided,
    ConsentValidated,
    ActionExecuted,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::ToolExecution => "tool_execution",
            Self::InjectionAttempt => "injection_attempt",
            Self::ConsentRequested => "consent_requested",
            Self::ConsentDecided => "consent_decided",
            Self::ConsentValidated => "consent_validated",
            Self::ActionExecuted => "action_executed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Blocked,
}

/// Transport metadata attached to a call. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

/// One immutable audit record. `summary` never holds raw sensitive values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub actor: String,
    pub action: AuditAction,
    pub summary: serde_json::Value,
    pub outcome: AuditOutcome,
    #[serde(default)]
    pub context: RequestContext,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        actor: impl Into<String>,
        action: AuditAction,
        outcome: AuditOutcome,
        summary: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            actor: actor.into(),
            action,
            summary,
            outcome,
            context: RequestContext::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Write an event to `sink`, logging and discarding any failure.
pub fn record(sink: &dyn AuditSink, event: AuditEvent) {
    let id = event.id.clone();
    let action = event.action;
    if let Err(e) = sink.append(event) {
        warn!(event_id = %id, %action, "Audit write failed: {}", e);
    }
}

/// Bounded in-memory audit log. Oldest events are evicted at capacity.
pub struct MemoryAuditLog {
    events: RwLock<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl MemoryAuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        self.events.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn by_actor(&self, actor: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.actor == actor)
            .cloned()
            .collect()
    }

    pub fn by_action(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.write();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }
}

/// Emits each event as JSON under the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(&event)?;
        info!(target: "audit", actor = %event.actor, action = %event.action, "{}", json);
        Ok(())
    }
}

/// Forwards every event to several sinks. Fails only when all of them fail.
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        if self.sinks.is_empty() {
            return Ok(());
        }
        let mut last_err = None;
        let mut delivered = 0usize;
        for sink in &self.sinks {
            match sink.append(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(event_id = %event.id, "Audit sink failed: {}", e);
                    last_err = Some(e);
                }
            }
        }
        match (delivered, last_err) {
            (0, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }
}
