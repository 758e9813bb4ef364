//! Consent-gated actions and PII anonymization.
//!
//! - [`consent`]: one-time consent requests and single-use tokens
//! - [`executor`]: the contract every consent-gated mutation runs behind
//! - [`pii`]: recursive redaction of personal data before it leaves the process

pub mod consent;
pub mod executor;
pub mod pii;

pub use consent::{
    ActionType, ConsentDecision, ConsentEngine, ConsentRequest, ConsentStats, ConsentStatus,
    SweepReport,
};
pub use executor::{
    ActionExecutor, DocumentSubmission, ExecutionRecord, SensitiveAction, StoredDocument,
    Submission,
};
pub use pii::{AnonymizationResult, Anonymizer, PiiCategory, SanitizedPayload, FIELD_PLACEHOLDER};
