//! Pattern catalogue and scanner.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use warden_core::audit::{self, AuditAction, AuditEvent, AuditOutcome, AuditSink, RequestContext};
use warden_core::{ConfigError, GuardSettings};

/// Generic reply substituted for a blocked message. Never names the pattern.
pub const REFUSAL_MESSAGE: &str =
    "I'm sorry, but I can't help with that request. Is there something else I can do for you?";

/// Family of manipulation a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionCategory {
    /// "ignore / disregard / forget ... instructions"
    InstructionOverride,
    /// "reveal / show / repeat ... your prompt"
    PromptExfiltration,
    SecurityBypass,
    /// "you are now ..."
    RoleOverride,
    /// "system:", "new instructions:", `<system>` tags, chat-template delimiters
    FabricatedSystem,
    /// "what are your instructions"
    MetaProbing,
    /// Operator-supplied pattern from configuration.
    Custom,
    /// Message exceeded the configured size and was not scanned.
    Oversized,
}

impl InjectionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstructionOverride => "instruction_override",
            Self::PromptExfiltration => "prompt_exfiltration",
            Self::SecurityBypass => "security_bypass",
            Self::RoleOverride => "role_override",
            Self::FabricatedSystem => "fabricated_system",
            Self::MetaProbing => "meta_probing",
            Self::Custom => "custom",
            Self::Oversized => "oversized",
        }
    }
}

impl std::fmt::Display for InjectionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanVerdict {
    Safe,
    Unsafe,
}

impl ScanVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe)
    }
}

/// Built-in catalogue, checked in order. Unanchored and case-insensitive.
const CATALOGUE: &[(InjectionCategory, &str)] = &[
    (
        InjectionCategory::InstructionOverride,
        r"\b(?:ignore|disregard|forget|override)\b[^.\n]{0,40}?\b(?:instructions|rules|prompts?|directives|guidelines)\b",
    ),
    (
        InjectionCategory::PromptExfiltration,
        r"\b(?:reveal|show|repeat|print|output|display|leak|dump)\b[^.\n]{0,40}?\b(?:system\s+(?:prompt|message)s?|prompts?|instructions)\b",
    ),
    (
        InjectionCategory::PromptExfiltration,
        r"\brepeat\s+(?:everything|all|the\s+text)\s+(?:above|before)\b",
    ),
    (
        InjectionCategory::SecurityBypass,
        r"\b(?:bypass|disable|circumvent|turn\s+off|switch\s+off)\b[^.\n]{0,30}?\b(?:safety|security|content\s+filters?|filters|restrictions|guardrails)\b",
    ),
    (
        InjectionCategory::SecurityBypass,
        r"\bpretend\b[^.\n]{0,30}?\bno\s+(?:restrictions|rules|limits|guidelines|filters)\b",
    ),
    (
        InjectionCategory::SecurityBypass,
        r"\b(?:developer|jailbreak|dan|unrestricted|god)\s+mode\b",
    ),
    (InjectionCategory::RoleOverride, r"\byou\s+are\s+now\b"),
    (
        InjectionCategory::RoleOverride,
        r"\bfrom\s+now\s+on,?\s+you\s+(?:are|will|must)\b",
    ),
    (
        InjectionCategory::RoleOverride,
        r"\b(?:act|behave)\s+as\s+(?:if\s+you\s+(?:are|were)\s+)?(?:an?\s+)?(?:unrestricted|unfiltered|uncensored)\b",
    ),
    (InjectionCategory::FabricatedSystem, r"\bnew\s+instructions\s*:"),
    (InjectionCategory::FabricatedSystem, r"\bsystem\s*:"),
    (InjectionCategory::FabricatedSystem, r"<\s*/?\s*system\s*>"),
    (
        InjectionCategory::FabricatedSystem,
        r"<\|im_start\|>|<\|im_end\|>|\[/?inst\]|<</?sys>>",
    ),
    (
        InjectionCategory::MetaProbing,
        r"\bwhat\s+(?:are|were)\s+your\s+(?:instructions|rules|guidelines|directives)\b",
    ),
    (
        InjectionCategory::MetaProbing,
        r"\bwhat\s+is\s+your\s+system\s+(?:prompt|message)\b",
    ),
];

struct CompiledPattern {
    category: InjectionCategory,
    source: String,
    regex: Regex,
}

/// Scans inbound messages for manipulation attempts.
///
/// Patterns are compiled once, when the guard is built.
pub struct InjectionGuard {
    patterns: Vec<CompiledPattern>,
    max_message_bytes: usize,
    audit: Arc<dyn AuditSink>,
}

impl InjectionGuard {
    pub fn new(settings: &GuardSettings, audit: Arc<dyn AuditSink>) -> Result<Self, ConfigError> {
        let builtin = CATALOGUE
            .iter()
            .map(|(category, source)| (*category, source.to_string()));
        let extra = settings
            .extra_patterns
            .iter()
            .map(|source| (InjectionCategory::Custom, source.clone()));

        let patterns = builtin
            .chain(extra)
            .map(|(category, source)| compile(category, source))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            patterns = patterns.len(),
            custom = settings.extra_patterns.len(),
            "Injection guard ready"
        );
        Ok(Self {
            patterns,
            max_message_bytes: settings.max_message_bytes,
            audit,
        })
    }

    /// Category of the first matching pattern, without auditing.
    pub fn inspect(&self, message: &str) -> Option<InjectionCategory> {
        if message.len() > self.max_message_bytes {
            return Some(InjectionCategory::Oversized);
        }
        self.first_match(message).map(|p| p.category)
    }

    /// Scan a message from `user_id`. An unsafe verdict writes one audit event.
    pub fn scan(&self, message: &str, user_id: &str, session_id: Option<&str>) -> ScanVerdict {
        let (category, pattern) = if message.len() > self.max_message_bytes {
            (InjectionCategory::Oversized, None)
        } else {
            match self.first_match(message) {
                Some(p) => (p.category, Some(p.source.as_str())),
                None => return ScanVerdict::Safe,
            }
        };

        warn!(
            user = user_id,
            session = session_id.unwrap_or("-"),
            %category,
            "Prompt injection attempt blocked"
        );

        let context = RequestContext {
            session_id: session_id.map(str::to_string),
            ..RequestContext::default()
        };
        let event = AuditEvent::new(
            user_id,
            AuditAction::InjectionAttempt,
            AuditOutcome::Blocked,
            json!({
                "category": category,
                "pattern": pattern,
                "message_bytes": message.len(),
            }),
        )
        .with_context(context);
        audit::record(self.audit.as_ref(), event);

        ScanVerdict::Unsafe
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    fn first_match(&self, message: &str) -> Option<&CompiledPattern> {
        self.patterns.iter().find(|p| p.regex.is_match(message))
    }
}

fn compile(category: InjectionCategory, source: String) -> Result<CompiledPattern, ConfigError> {
    let regex = RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: source.clone(),
            message: e.to_string(),
        })?;
    Ok(CompiledPattern {
        category,
        source,
        regex,
    })
}
