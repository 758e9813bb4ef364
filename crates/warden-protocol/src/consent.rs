//! Consent authorization: one-time permission for sensitive actions.
//!
//! A user approves a [`ConsentRequest`]; the engine mints a single-use token
//! bound by HMAC to (request, user, action, target). The token is consumed by
//! the first successful [`ConsentEngine::validate`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_core::audit::{self, AuditAction, AuditEvent, AuditOutcome, AuditSink};
use warden_core::config::{DEFAULT_REQUEST_TTL_SECS, DEFAULT_TOKEN_TTL_SECS};
use warden_core::{ConfigError, ConsentError, ConsentSettings};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_NONCE_BYTES: usize = 16;
const SIGNING_KEY_BYTES: usize = 32;

/// Sensitive action a consent request authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    SubmitDocument,
    ShareData,
    SendMessage,
    UpdateProfile,
    DeleteData,
}

impl ActionType {
    /// Wire name, also bound into the token MAC.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmitDocument => "SUBMIT_DOCUMENT",
            Self::ShareData => "SHARE_DATA",
            Self::SendMessage => "SEND_MESSAGE",
            Self::UpdateProfile => "UPDATE_PROFILE",
            Self::DeleteData => "DELETE_DATA",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl std::fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(label)
    }
}

/// A request for one-time permission to perform a sensitive action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "actionType")]
    pub action_type: ActionType,
    pub description: String,
    /// Names of the data fields that will be disclosed.
    #[serde(rename = "requiredFields")]
    pub required_fields: Vec<String>,
    #[serde(rename = "targetId")]
    pub target_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
    pub status: ConsentStatus,
    #[serde(rename = "decidedAt", skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl ConsentRequest {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Outcome of a user's decision on a pending request.
#[derive(Debug, Clone)]
pub enum ConsentDecision {
    Approved {
        request: ConsentRequest,
        token: String,
    },
    Denied {
        request: ConsentRequest,
    },
}

impl ConsentDecision {
    pub fn request(&self) -> &ConsentRequest {
        match self {
            Self::Approved { request, .. } | Self::Denied { request } => request,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Approved { token, .. } => Some(token),
            Self::Denied { .. } => None,
        }
    }
}

/// What a sweep reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    #[serde(rename = "expiredRequests")]
    pub expired_requests: usize,
    #[serde(rename = "reclaimedTokens")]
    pub reclaimed_tokens: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsentStats {
    pub pending: usize,
    pub approved: usize,
    pub denied: usize,
    pub expired: usize,
    #[serde(rename = "liveTokens")]
    pub live_tokens: usize,
}

struct TokenGrant {
    request_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct ConsentState {
    requests: HashMap<String, ConsentRequest>,
    tokens: HashMap<String, TokenGrant>,
    /// Request ids per user, in creation order.
    by_user: HashMap<String, Vec<String>>,
}

/// Owns consent requests and their single-use tokens.
///
/// Requests, tokens and the per-user index live behind one lock, so
/// validation and consumption of a token happen atomically.
pub struct ConsentEngine {
    state: RwLock<ConsentState>,
    signing_key: Vec<u8>,
    request_ttl: chrono::Duration,
    token_ttl: chrono::Duration,
    audit: Option<Arc<dyn AuditSink>>,
}

impl ConsentEngine {
    /// Create an engine with default TTLs and a fresh random signing key.
    pub fn new() -> Self {
        let mut key = vec![0u8; SIGNING_KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut key);
        Self {
            state: RwLock::new(ConsentState::default()),
            signing_key: key,
            request_ttl: chrono::Duration::seconds(DEFAULT_REQUEST_TTL_SECS as i64),
            token_ttl: chrono::Duration::seconds(DEFAULT_TOKEN_TTL_SECS as i64),
            audit: None,
        }
    }

    /// Build from configuration.
    pub fn from_settings(settings: &ConsentSettings) -> Result<Self, ConfigError> {
        let mut engine = Self::new()
            .with_request_ttl(settings.request_ttl())
            .with_token_ttl(settings.token_ttl());
        if let Some(key) = settings.secret_bytes()? {
            engine.signing_key = key;
        }
        Ok(engine)
    }

    pub fn with_request_ttl(mut self, ttl: Duration) -> Self {
        self.request_ttl = to_chrono(ttl);
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = to_chrono(ttl);
        self
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Open a new pending request.
    pub fn create_request(
        &self,
        user_id: &str,
        action_type: ActionType,
        target_id: &str,
        description: &str,
        required_fields: Vec<String>,
    ) -> Result<ConsentRequest, ConsentError> {
        if user_id.trim().is_empty() {
            return Err(ConsentError::Validation("user id is empty".into()));
        }
        if target_id.trim().is_empty() {
            return Err(ConsentError::Validation("target id is empty".into()));
        }

        let now = Utc::now();
        let request = ConsentRequest {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            action_type,
            description: description.to_string(),
            required_fields,
            target_id: target_id.to_string(),
            created_at: now,
            expires_at: add_ttl(now, self.request_ttl),
            status: ConsentStatus::Pending,
            decided_at: None,
        };

        {
            let mut state = self.state.write();
            state
                .by_user
                .entry(request.user_id.clone())
                .or_default()
                .push(request.id.clone());
            state.requests.insert(request.id.clone(), request.clone());
        }

        info!(
            request_id = %request.id,
            user = %request.user_id,
            action = %request.action_type,
            "Consent request created"
        );
        self.audit(
            &request.user_id,
            AuditAction::ConsentRequested,
            AuditOutcome::Success,
            serde_json::json!({
                "request_id": request.id,
                "action_type": request.action_type,
                "target_id": request.target_id,
                "field_count": request.required_fields.len(),
            }),
        );
        Ok(request)
    }

    /// Record the user's decision. Approval mints a single-use token.
    pub fn decide(
        &self,
        request_id: &str,
        approved: bool,
        deciding_user: &str,
    ) -> Result<ConsentDecision, ConsentError> {
        let outcome = self.decide_locked(request_id, approved, deciding_user);

        let (result, summary) = match &outcome {
            Ok(decision) => (
                AuditOutcome::Success,
                serde_json::json!({
                    "request_id": request_id,
                    "approved": approved,
                    "status": decision.request().status,
                }),
            ),
            Err(e) => (
                AuditOutcome::Failure,
                serde_json::json!({
                    "request_id": request_id,
                    "approved": approved,
                    "error": e.to_string(),
                }),
            ),
        };
        self.audit(deciding_user, AuditAction::ConsentDecided, result, summary);
        outcome
    }

    fn decide_locked(
        &self,
        request_id: &str,
        approved: bool,
        deciding_user: &str,
    ) -> Result<ConsentDecision, ConsentError> {
        let now = Utc::now();
        let mut state = self.state.write();
        let request = state
            .requests
            .get_mut(request_id)
            .ok_or_else(|| ConsentError::NotFound(request_id.to_string()))?;

        if request.user_id != deciding_user {
            warn!(
                request_id,
                owner = %request.user_id,
                caller = deciding_user,
                "Consent decision by non-owner rejected"
            );
            return Err(ConsentError::OwnershipMismatch {
                request_id: request_id.to_string(),
                caller: deciding_user.to_string(),
            });
        }

        if request.status == ConsentStatus::Expired || request.is_expired_at(now) {
            if request.status == ConsentStatus::Pending {
                request.status = ConsentStatus::Expired;
            }
            debug!(request_id, "Consent request expired before decision");
            return Err(ConsentError::Expired(request_id.to_string()));
        }

        if request.status != ConsentStatus::Pending {
            return Err(ConsentError::AlreadyDecided {
                request_id: request_id.to_string(),
                status: request.status.to_string(),
            });
        }

        if !approved {
            request.status = ConsentStatus::Denied;
            request.decided_at = Some(now);
            info!(request_id, "Consent denied");
            return Ok(ConsentDecision::Denied {
                request: request.clone(),
            });
        }

        // Mint before mutating so a signing failure leaves the request pending.
        let token = self.mint_token(request)?;
        request.status = ConsentStatus::Approved;
        request.decided_at = Some(now);
        let snapshot = request.clone();
        let token_expires = add_ttl(now, self.token_ttl).min(snapshot.expires_at);

        state.tokens.insert(
            token.clone(),
            TokenGrant {
                request_id: snapshot.id.clone(),
                expires_at: token_expires,
            },
        );
        info!(request_id, "Consent approved, token issued");
        Ok(ConsentDecision::Approved {
            request: snapshot,
            token,
        })
    }

    /// Validate and consume a token for exactly this (user, action, target).
    ///
    /// Returns `true` at most once per token.
    pub fn validate(
        &self,
        token: &str,
        user_id: &str,
        action_type: ActionType,
        target_id: &str,
    ) -> bool {
        self.check(token, user_id, action_type, target_id).is_ok()
    }

    /// Like [`ConsentEngine::validate`] but with the internal failure reason.
    ///
    /// Unknown and already consumed tokens both yield
    /// [`ConsentError::InvalidToken`].
    pub fn check(
        &self,
        token: &str,
        user_id: &str,
        action_type: ActionType,
        target_id: &str,
    ) -> Result<ConsentRequest, ConsentError> {
        let outcome = self.check_locked(token, user_id, action_type, target_id);

        let (result, summary) = match &outcome {
            Ok(request) => (
                AuditOutcome::Success,
                serde_json::json!({
                    "request_id": request.id,
                    "action_type": action_type,
                    "target_id": target_id,
                }),
            ),
            Err(e) => (
                AuditOutcome::Blocked,
                serde_json::json!({
                    "action_type": action_type,
                    "target_id": target_id,
                    "error": e.to_string(),
                }),
            ),
        };
        self.audit(user_id, AuditAction::ConsentValidated, result, summary);
        outcome
    }

    fn check_locked(
        &self,
        token: &str,
        user_id: &str,
        action_type: ActionType,
        target_id: &str,
    ) -> Result<ConsentRequest, ConsentError> {
        if token.is_empty() {
            return Err(ConsentError::InvalidToken("empty token".into()));
        }

        let now = Utc::now();
        let mut state = self.state.write();

        let (request_id, token_expires) = match state.tokens.get(token) {
            Some(grant) => (grant.request_id.clone(), grant.expires_at),
            None => {
                warn!(user = user_id, "Unknown or already consumed consent token");
                return Err(ConsentError::InvalidToken("unknown token".into()));
            }
        };

        let Some(request) = state.requests.get(&request_id).cloned() else {
            state.tokens.remove(token);
            warn!(request_id = %request_id, "Token refers to a missing request");
            return Err(ConsentError::InvalidToken("orphaned token".into()));
        };

        // Mismatches keep the token: the rightful owner can still use it.
        if request.user_id != user_id {
            warn!(request_id = %request.id, caller = user_id, "Token presented by wrong user");
            return Err(ConsentError::InvalidToken("user mismatch".into()));
        }
        if request.action_type != action_type {
            warn!(
                request_id = %request.id,
                expected = %request.action_type,
                presented = %action_type,
                "Token presented for wrong action"
            );
            return Err(ConsentError::InvalidToken("action mismatch".into()));
        }
        if request.target_id != target_id {
            warn!(request_id = %request.id, "Token presented for wrong target");
            return Err(ConsentError::InvalidToken("target mismatch".into()));
        }
        if !self.verify_binding(token, &request.id, user_id, action_type, target_id)? {
            warn!(request_id = %request.id, "Token binding verification failed");
            return Err(ConsentError::InvalidToken("binding mismatch".into()));
        }

        if request.status != ConsentStatus::Approved {
            state.tokens.remove(token);
            warn!(request_id = %request.id, status = %request.status, "Token for non-approved request");
            return Err(ConsentError::InvalidToken("request not approved".into()));
        }
        if request.is_expired_at(now) || now > token_expires {
            state.tokens.remove(token);
            warn!(request_id = %request.id, "Consent token expired");
            return Err(ConsentError::Expired(request.id));
        }

        state.tokens.remove(token);
        info!(request_id = %request.id, user = user_id, "Consent token consumed");
        Ok(request)
    }

    /// Fetch a request by id.
    pub fn get(&self, request_id: &str) -> Option<ConsentRequest> {
        let now = Utc::now();
        let mut state = self.state.write();
        let request = state.requests.get_mut(request_id)?;
        expire_if_due(request, now);
        Some(request.clone())
    }

    /// Requests of a user, newest first, optionally filtered by status.
    pub fn list_for_user(
        &self,
        user_id: &str,
        status: Option<ConsentStatus>,
    ) -> Vec<ConsentRequest> {
        let now = Utc::now();
        let mut guard = self.state.write();
        let state = &mut *guard;
        let Some(ids) = state.by_user.get(user_id) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for id in ids.iter().rev() {
            if let Some(request) = state.requests.get_mut(id) {
                expire_if_due(request, now);
                if status.map_or(true, |s| request.status == s) {
                    out.push(request.clone());
                }
            }
        }
        out
    }

    /// Expire overdue pending requests and drop dead tokens.
    pub fn sweep_expired(&self) -> SweepReport {
        let now = Utc::now();
        let mut guard = self.state.write();
        let state = &mut *guard;
        let mut report = SweepReport::default();

        for request in state.requests.values_mut() {
            if expire_if_due(request, now) {
                report.expired_requests += 1;
            }
        }

        let requests = &state.requests;
        let before = state.tokens.len();
        state.tokens.retain(|_, grant| {
            now <= grant.expires_at
                && requests
                    .get(&grant.request_id)
                    .is_some_and(|r| r.status == ConsentStatus::Approved && !r.is_expired_at(now))
        });
        report.reclaimed_tokens = before - state.tokens.len();

        if report.expired_requests > 0 || report.reclaimed_tokens > 0 {
            debug!(
                expired = report.expired_requests,
                reclaimed = report.reclaimed_tokens,
                "Consent sweep"
            );
        }
        report
    }

    /// Request counts by status, plus tokens not yet consumed.
    pub fn stats(&self) -> ConsentStats {
        let state = self.state.read();
        let mut stats = ConsentStats {
            live_tokens: state.tokens.len(),
            ..ConsentStats::default()
        };
        for request in state.requests.values() {
            match request.status {
                ConsentStatus::Pending => stats.pending += 1,
                ConsentStatus::Approved => stats.approved += 1,
                ConsentStatus::Denied => stats.denied += 1,
                ConsentStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }

    // Token = hex(random nonce) ‖ hex(HMAC(request, user, action, target)).
    fn mint_token(&self, request: &ConsentRequest) -> Result<String, ConsentError> {
        let mut nonce = [0u8; TOKEN_NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let mac = self.binding(
            &request.id,
            &request.user_id,
            request.action_type,
            &request.target_id,
        )?;
        Ok(format!(
            "{}{}",
            hex::encode(nonce),
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    fn verify_binding(
        &self,
        token: &str,
        request_id: &str,
        user_id: &str,
        action_type: ActionType,
        target_id: &str,
    ) -> Result<bool, ConsentError> {
        let Some(tag) = token
            .get(TOKEN_NONCE_BYTES * 2..)
            .and_then(|hex_tag| hex::decode(hex_tag).ok())
        else {
            return Ok(false);
        };
        let mac = self.binding(request_id, user_id, action_type, target_id)?;
        Ok(mac.verify_slice(&tag).is_ok())
    }

    fn binding(
        &self,
        request_id: &str,
        user_id: &str,
        action_type: ActionType,
        target_id: &str,
    ) -> Result<HmacSha256, ConsentError> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| ConsentError::Signing(e.to_string()))?;
        // Length-prefix each field so no two tuples share an encoding.
        for field in [request_id, user_id, action_type.as_str(), target_id] {
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field.as_bytes());
        }
        Ok(mac)
    }

    fn audit(
        &self,
        actor: &str,
        action: AuditAction,
        outcome: AuditOutcome,
        summary: serde_json::Value,
    ) {
        if let Some(sink) = &self.audit {
            audit::record(sink.as_ref(), AuditEvent::new(actor, action, outcome, summary));
        }
    }
}

impl Default for ConsentEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Transition an overdue pending request to EXPIRED. Returns whether it did.
fn expire_if_due(request: &mut ConsentRequest, now: DateTime<Utc>) -> bool {
    if request.status == ConsentStatus::Pending && request.is_expired_at(now) {
        request.status = ConsentStatus::Expired;
        true
    } else {
        false
    }
}

fn to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365))
}

fn add_ttl(now: DateTime<Utc>, ttl: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
