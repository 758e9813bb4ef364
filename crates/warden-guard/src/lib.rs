//! Prompt-injection guard.
//!
//! Every inbound user message goes through [`InjectionGuard::scan`] before it
//! reaches the orchestrator. On an unsafe verdict the caller answers with
//! [`REFUSAL_MESSAGE`] instead of processing the message.

pub mod injection;

pub use injection::{InjectionCategory, InjectionGuard, ScanVerdict, REFUSAL_MESSAGE};
