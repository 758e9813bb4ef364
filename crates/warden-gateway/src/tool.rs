//! The capability the gateway invokes.

use serde_json::Value;
use warden_core::BoxError;

/// A callable tool. Implementations live outside this crate.
pub trait Tool: Send + Sync {
    /// Unique name used for registration and lookup.
    fn name(&self) -> &str;

    /// One-line summary offered to the model alongside the name.
    fn description(&self) -> &str {
        ""
    }

    /// Run the tool on behalf of `user_id`.
    fn execute(&self, user_id: &str, params: &Value) -> Result<Value, BoxError>;
}
