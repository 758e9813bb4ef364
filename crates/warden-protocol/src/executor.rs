//! Consent-gated execution of sensitive actions.
//!
//! Any mutation that needs the user's explicit permission implements
//! [`SensitiveAction`] and runs behind an [`ActionExecutor`], which checks
//! ownership and consumes the consent token before `apply` is ever reached.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use warden_core::audit::{self, AuditAction, AuditEvent, AuditOutcome, AuditSink};
use warden_core::ExecutionError;

use crate::consent::{ActionType, ConsentEngine};

/// A mutation guarded by consent.
pub trait SensitiveAction: Send + Sync {
    /// Action type a consent token must be bound to.
    fn action_type(&self) -> ActionType;

    /// Owner of `resource_id`, or `None` if the resource does not exist.
    fn owner_of(&self, resource_id: &str) -> Option<String>;

    /// Perform the mutation. Only called after consent was consumed.
    fn apply(
        &self,
        user_id: &str,
        resource_id: &str,
        target_id: &str,
    ) -> Result<Value, ExecutionError>;
}

/// Immutable record of one performed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "actionType")]
    pub action_type: ActionType,
    #[serde(rename = "resourceId")]
    pub resource_id: String,
    #[serde(rename = "targetId")]
    pub target_id: String,
    #[serde(rename = "executedAt")]
    pub executed_at: DateTime<Utc>,
    pub result: Value,
}

/// Runs a [`SensitiveAction`] behind the consent check.
pub struct ActionExecutor<A: SensitiveAction> {
    consent: Arc<ConsentEngine>,
    action: A,
    executions: RwLock<Vec<ExecutionRecord>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl<A: SensitiveAction> ActionExecutor<A> {
    pub fn new(consent: Arc<ConsentEngine>, action: A) -> Self {
        Self {
            consent,
            action,
            executions: RwLock::new(Vec::new()),
            audit: None,
        }
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    /// Perform the action on `resource_id` for `target_id` using a consent token.
    ///
    /// On any failure nothing is mutated. Ownership is checked before the
    /// token is presented, so a wrong resource id does not burn the token.
    #[instrument(skip(self, token), fields(action = %self.action.action_type()))]
    pub fn perform(
        &self,
        user_id: &str,
        resource_id: &str,
        target_id: &str,
        token: &str,
    ) -> Result<ExecutionRecord, ExecutionError> {
        let result = self.perform_inner(user_id, resource_id, target_id, token);

        let (outcome, summary) = match &result {
            Ok(record) => (
                AuditOutcome::Success,
                json!({
                    "execution_id": record.id,
                    "action_type": record.action_type,
                    "resource_id": resource_id,
                    "target_id": target_id,
                }),
            ),
            Err(e) => (
                match e {
                    ExecutionError::Failed(_) => AuditOutcome::Failure,
                    _ => AuditOutcome::Blocked,
                },
                json!({
                    "action_type": self.action.action_type(),
                    "resource_id": resource_id,
                    "target_id": target_id,
                    "error": e.to_string(),
                }),
            ),
        };
        if let Some(sink) = &self.audit {
            audit::record(
                sink.as_ref(),
                AuditEvent::new(user_id, AuditAction::ActionExecuted, outcome, summary),
            );
        }
        result
    }

    fn perform_inner(
        &self,
        user_id: &str,
        resource_id: &str,
        target_id: &str,
        token: &str,
    ) -> Result<ExecutionRecord, ExecutionError> {
        for (name, value) in [
            ("user id", user_id),
            ("resource id", resource_id),
            ("target id", target_id),
        ] {
            if value.trim().is_empty() {
                return Err(ExecutionError::Validation(format!("{} is empty", name)));
            }
        }
        if token.is_empty() {
            return Err(ExecutionError::EmptyToken);
        }

        match self.action.owner_of(resource_id) {
            None => return Err(ExecutionError::ResourceNotFound(resource_id.to_string())),
            Some(owner) if owner != user_id => {
                warn!(resource_id, user = user_id, "Resource ownership mismatch");
                return Err(ExecutionError::Ownership {
                    resource_id: resource_id.to_string(),
                    user: user_id.to_string(),
                });
            }
            Some(_) => {}
        }

        let action_type = self.action.action_type();
        if let Err(e) = self.consent.check(token, user_id, action_type, target_id) {
            warn!(user = user_id, target = target_id, "Consent rejected: {}", e);
            return Err(ExecutionError::ConsentRejected {
                action: action_type.to_string(),
                target: target_id.to_string(),
            });
        }

        let result = self.action.apply(user_id, resource_id, target_id)?;
        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            action_type,
            resource_id: resource_id.to_string(),
            target_id: target_id.to_string(),
            executed_at: Utc::now(),
            result,
        };
        self.executions.write().push(record.clone());
        info!(execution_id = %record.id, "Sensitive action performed");
        Ok(record)
    }

    /// Execution records of a user, oldest first.
    pub fn executions_for(&self, user_id: &str) -> Vec<ExecutionRecord> {
        self.executions
            .read()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }
}

/// A document owned by a user, eligible for submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    #[serde(rename = "documentId")]
    pub document_id: String,
    #[serde(rename = "targetId")]
    pub target_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "submittedAt")]
    pub submitted_at: DateTime<Utc>,
}

/// Submits a user's document to a target (e.g. an opportunity).
#[derive(Default)]
pub struct DocumentSubmission {
    documents: RwLock<HashMap<String, StoredDocument>>,
    submissions: RwLock<Vec<Submission>>,
}

impl DocumentSubmission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document and return its id.
    pub fn add_document(&self, owner: &str, name: &str) -> String {
        let doc = StoredDocument {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
        };
        let id = doc.id.clone();
        self.documents.write().insert(id.clone(), doc);
        debug!(document_id = %id, "Document registered");
        id
    }

    pub fn submissions_for(&self, target_id: &str) -> Vec<Submission> {
        self.submissions
            .read()
            .iter()
            .filter(|s| s.target_id == target_id)
            .cloned()
            .collect()
    }
}

impl SensitiveAction for DocumentSubmission {
    fn action_type(&self) -> ActionType {
        ActionType::SubmitDocument
    }

    fn owner_of(&self, resource_id: &str) -> Option<String> {
        self.documents
            .read()
            .get(resource_id)
            .map(|doc| doc.owner.clone())
    }

    fn apply(
        &self,
        user_id: &str,
        resource_id: &str,
        target_id: &str,
    ) -> Result<Value, ExecutionError> {
        let name = self
            .documents
            .read()
            .get(resource_id)
            .map(|doc| doc.name.clone())
            .ok_or_else(|| ExecutionError::ResourceNotFound(resource_id.to_string()))?;

        let submission = Submission {
            id: Uuid::new_v4().to_string(),
            document_id: resource_id.to_string(),
            target_id: target_id.to_string(),
            user_id: user_id.to_string(),
            submitted_at: Utc::now(),
        };
        let value = json!({
            "submissionId": submission.id,
            "documentName": name,
            "targetId": target_id,
        });
        self.submissions.write().push(submission);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_core::MemoryAuditLog;

    fn grant(engine: &ConsentEngine, user: &str, action: ActionType, target: &str) -> String {
        let request = engine
            .create_request(user, action, target, "test", vec![])
            .unwrap();
        engine
            .decide(&request.id, true, user)
            .unwrap()
            .token()
            .unwrap()
            .to_string()
    }

    fn setup() -> (Arc<ConsentEngine>, ActionExecutor<DocumentSubmission>, String) {
        let engine = Arc::new(ConsentEngine::new());
        let executor = ActionExecutor::new(engine.clone(), DocumentSubmission::new());
        let doc = executor.action().add_document("alice", "cv.pdf");
        (engine, executor, doc)
    }

    #[test]
    fn test_submit_with_consent() {
        let (engine, executor, doc) = setup();
        let token = grant(&engine, "alice", ActionType::SubmitDocument, "opp-1");

        let record = executor.perform("alice", &doc, "opp-1", &token).unwrap();
        assert_eq!(record.action_type, ActionType::SubmitDocument);
        assert_eq!(record.result["documentName"], "cv.pdf");
        assert_eq!(executor.action().submissions_for("opp-1").len(), 1);
        assert_eq!(executor.executions_for("alice").len(), 1);
    }

    #[test]
    fn test_replay_is_rejected_without_mutation() {
        let (engine, executor, doc) = setup();
        let token = grant(&engine, "alice", ActionType::SubmitDocument, "opp-1");
        executor.perform("alice", &doc, "opp-1", &token).unwrap();

        let err = executor.perform("alice", &doc, "opp-1", &token).unwrap_err();
        assert!(matches!(err, ExecutionError::ConsentRejected { .. }));
        assert_eq!(executor.action().submissions_for("opp-1").len(), 1);
    }

    #[test]
    fn test_empty_token() {
        let (_, executor, doc) = setup();
        assert!(matches!(
            executor.perform("alice", &doc, "opp-1", ""),
            Err(ExecutionError::EmptyToken)
        ));
    }

    #[test]
    fn test_ownership_checked_before_token_use() {
        let (engine, executor, _) = setup();
        let bobs_doc = executor.action().add_document("bob", "secret.pdf");
        let token = grant(&engine, "alice", ActionType::SubmitDocument, "opp-1");

        assert!(matches!(
            executor.perform("alice", &bobs_doc, "opp-1", &token),
            Err(ExecutionError::Ownership { .. })
        ));
        assert!(matches!(
            executor.perform("alice", "missing", "opp-1", &token),
            Err(ExecutionError::ResourceNotFound(_))
        ));
        assert!(executor.action().submissions_for("opp-1").is_empty());
        // Token survived both failures.
        assert!(engine.validate(&token, "alice", ActionType::SubmitDocument, "opp-1"));
    }

    #[test]
    fn test_token_for_other_action_rejected() {
        let (engine, executor, doc) = setup();
        let token = grant(&engine, "alice", ActionType::ShareData, "opp-1");
        assert!(matches!(
            executor.perform("alice", &doc, "opp-1", &token),
            Err(ExecutionError::ConsentRejected { .. })
        ));
        assert!(executor.executions_for("alice").is_empty());
    }

    #[test]
    fn test_denied_request_yields_no_usable_token() {
        let (engine, executor, doc) = setup();
        let request = engine
            .create_request("alice", ActionType::SubmitDocument, "opp-1", "", vec![])
            .unwrap();
        let decision = engine.decide(&request.id, false, "alice").unwrap();
        assert!(decision.token().is_none());
        assert_eq!(engine.stats().live_tokens, 0);

        // Whatever the caller holds after a denial is refused.
        assert!(matches!(
            executor.perform("alice", &doc, "opp-1", decision.token().unwrap_or("")),
            Err(ExecutionError::EmptyToken)
        ));
        let forged = "ab".repeat(48);
        assert!(matches!(
            executor.perform("alice", &doc, "opp-1", &forged),
            Err(ExecutionError::ConsentRejected { .. })
        ));
        assert!(executor.executions_for("alice").is_empty());
        assert!(executor.action().submissions_for("opp-1").is_empty());
    }

    struct ShareProfile {
        shared: AtomicUsize,
    }

    impl SensitiveAction for ShareProfile {
        fn action_type(&self) -> ActionType {
            ActionType::ShareData
        }

        fn owner_of(&self, resource_id: &str) -> Option<String> {
            resource_id.strip_prefix("profile:").map(str::to_string)
        }

        fn apply(&self, _user: &str, _resource: &str, target: &str) -> Result<Value, ExecutionError> {
            self.shared.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "sharedWith": target }))
        }
    }

    #[test]
    fn test_contract_reusable_for_other_actions() {
        let engine = Arc::new(ConsentEngine::new());
        let log = Arc::new(MemoryAuditLog::new(50));
        let executor = ActionExecutor::new(
            engine.clone(),
            ShareProfile {
                shared: AtomicUsize::new(0),
            },
        )
        .with_audit(log.clone());

        let token = grant(&engine, "carol", ActionType::ShareData, "recruiter-9");
        executor
            .perform("carol", "profile:carol", "recruiter-9", &token)
            .unwrap();
        assert!(executor
            .perform("carol", "profile:carol", "recruiter-9", &token)
            .is_err());

        assert_eq!(executor.action().shared.load(Ordering::SeqCst), 1);
        let events = log.by_action(AuditAction::ActionExecuted);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome, AuditOutcome::Success);
        assert_eq!(events[1].outcome, AuditOutcome::Blocked);
    }
}
