//! Tool-invocation security gateway.
//!
//! Registers callable tools, caches their filtered results per
//! (tool, user, params), strips sensitive response fields and writes one
//! audit event per real invocation.

pub mod cache;
pub mod filter;
pub mod gateway;
pub mod tool;

pub use cache::ResultCache;
pub use filter::{filter_sensitive_fields, is_sensitive_field};
pub use gateway::{cache_key, CacheStats, ToolGateway};
pub use tool::Tool;
