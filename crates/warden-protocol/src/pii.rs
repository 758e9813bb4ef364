//! PII anonymization over arbitrary JSON payloads.
//!
//! Text is run through a fixed sequence of redaction patterns; mappings are
//! additionally screened by key name against a static denylist.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Placeholder written in place of a PII-indicative field's value.
pub const FIELD_PLACEHOLDER: &str = "[REDACTED]";

/// Category of personal data found in a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiCategory {
    Email,
    CreditCard,
    Phone,
    Address,
    PostalCode,
    IpAddress,
    /// Only detected through field names.
    Name,
    Ssn,
    /// Only detected through field names.
    DateOfBirth,
}

impl PiiCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::CreditCard => "CREDIT_CARD",
            Self::Phone => "PHONE",
            Self::Address => "ADDRESS",
            Self::PostalCode => "POSTAL_CODE",
            Self::IpAddress => "IP_ADDRESS",
            Self::Name => "NAME",
            Self::Ssn => "SSN",
            Self::DateOfBirth => "DATE_OF_BIRTH",
        }
    }

    /// Text substituted for a match. Contains no digits, `@` or whitespace, so
    /// it can never be matched by any redaction pattern.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Email => "[EMAIL]",
            Self::CreditCard => "[CREDIT_CARD]",
            Self::Phone => "[PHONE]",
            Self::Address => "[ADDRESS]",
            Self::PostalCode => "[POSTAL_CODE]",
            Self::IpAddress => "[IP_ADDRESS]",
            Self::Name => "[NAME]",
            Self::Ssn => "[SSN]",
            Self::DateOfBirth => "[DATE_OF_BIRTH]",
        }
    }
}

impl std::fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// Application order matters: earlier patterns must consume their matches
// before the broader numeric ones run.
const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";
const CARD_PATTERN: &str = r"\b(?:\d[ -]?){12,18}\d\b";
const SSN_PATTERN: &str = r"\b\d{3}-\d{2}-\d{4}\b";
// International `+cc` groupings, North American 10-digit, then 7-digit local.
const PHONE_PATTERN: &str = r"\+\d{1,3}[-.\s]?\d{1,4}(?:[-.\s]?\d{2,4}){2,4}\b|(?:\+\d{1,3}[-.\s]?)?(?:\(\d{3}\)|\b\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b|\b\d{3}[-.]\d{4}\b";
const ADDRESS_PATTERN: &str = r"(?i)\b\d{1,5}(?:\s+[A-Za-z0-9.'-]+){1,5}?\s+(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|court|ct|way|place|pl|terrace|parkway|pkwy|circle|cir|highway|hwy)\b\.?";
const POSTAL_PATTERN: &str = r"\b\d{5}(?:-\d{4})?\b";
// IPv4, full IPv6, then `::`-compressed IPv6.
const IP_PATTERN: &str = r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b|\b(?:[0-9A-Fa-f]{1,4}:){7}[0-9A-Fa-f]{1,4}\b|\b(?:[0-9A-Fa-f]{1,4}:){1,7}:(?:[0-9A-Fa-f]{1,4}(?::[0-9A-Fa-f]{1,4}){0,6}\b)?";

const TEXT_PIPELINE: [(PiiCategory, &str); 7] = [
    (PiiCategory::Email, EMAIL_PATTERN),
    (PiiCategory::CreditCard, CARD_PATTERN),
    (PiiCategory::Ssn, SSN_PATTERN),
    (PiiCategory::Phone, PHONE_PATTERN),
    (PiiCategory::Address, ADDRESS_PATTERN),
    (PiiCategory::PostalCode, POSTAL_PATTERN),
    (PiiCategory::IpAddress, IP_PATTERN),
];

// Compiled once per process, shared by every engine instance.
static PIPELINE: Lazy<Vec<(PiiCategory, Regex)>> = Lazy::new(|| {
    TEXT_PIPELINE
        .iter()
        .map(|(category, pattern)| {
            (*category, Regex::new(pattern).expect("built-in PII pattern"))
        })
        .collect()
});
static PRESENCE_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(TEXT_PIPELINE.iter().map(|(_, pattern)| *pattern))
        .expect("built-in PII pattern set")
});

/// Key fragments that mark a field as PII, matched against the normalized
/// (lower-cased, `-`/space → `_`) key. First match wins, so more specific
/// fragments come first.
const PII_FIELD_FRAGMENTS: &[(&str, PiiCategory)] = &[
    ("email", PiiCategory::Email),
    ("e_mail", PiiCategory::Email),
    ("phone", PiiCategory::Phone),
    ("mobile", PiiCategory::Phone),
    ("full_name", PiiCategory::Name),
    ("fullname", PiiCategory::Name),
    ("first_name", PiiCategory::Name),
    ("firstname", PiiCategory::Name),
    ("last_name", PiiCategory::Name),
    ("lastname", PiiCategory::Name),
    ("ip_addr", PiiCategory::IpAddress),
    ("ipaddr", PiiCategory::IpAddress),
    ("address", PiiCategory::Address),
    ("street", PiiCategory::Address),
    ("postal", PiiCategory::PostalCode),
    ("zip", PiiCategory::PostalCode),
    ("ssn", PiiCategory::Ssn),
    ("social_security", PiiCategory::Ssn),
    ("card", PiiCategory::CreditCard),
    ("credit", PiiCategory::CreditCard),
    ("date_of_birth", PiiCategory::DateOfBirth),
    ("dateofbirth", PiiCategory::DateOfBirth),
    ("birth", PiiCategory::DateOfBirth),
];

/// Short keys that only count as a whole key segment; as fragments they would
/// hit ordinary keys such as `description`.
const PII_FIELD_SEGMENTS: &[(&str, PiiCategory)] = &[
    ("ip", PiiCategory::IpAddress),
    ("dob", PiiCategory::DateOfBirth),
];

/// Returns the category a key indicates, if it is PII-indicative.
pub fn pii_field_category(key: &str) -> Option<PiiCategory> {
    let segments = key_segments(key);
    if let Some((_, category)) = PII_FIELD_SEGMENTS
        .iter()
        .find(|(name, _)| segments.iter().any(|segment| segment == name))
    {
        return Some(*category);
    }

    let normalized = segments.join("_");
    PII_FIELD_FRAGMENTS
        .iter()
        .find(|(fragment, _)| normalized.contains(fragment))
        .map(|(_, category)| *category)
}

/// Lower-cased key segments, split on `_`, `-`, `.`, spaces and camelCase
/// humps: `clientIp` and `client-ip` both yield `["client", "ip"]`.
fn key_segments(key: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in key.chars() {
        if matches!(c, '_' | '-' | '.' | ' ') {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Result of anonymizing a payload.
#[derive(Debug, Clone, Serialize)]
pub struct AnonymizationResult {
    /// Same shape as the input, minus dropped PII fields.
    pub payload: Value,
    #[serde(rename = "piiFound")]
    pub pii_found: bool,
    #[serde(rename = "piiTypes")]
    pub pii_types: BTreeSet<PiiCategory>,
    #[serde(rename = "sizeBefore")]
    pub size_before: usize,
    #[serde(rename = "sizeAfter")]
    pub size_after: usize,
}

/// A prompt and optional context cleared for a model provider.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedPayload {
    pub prompt: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(rename = "piiRemoved")]
    pub pii_removed: bool,
    #[serde(rename = "piiTypes")]
    pub pii_types: BTreeSet<PiiCategory>,
}

/// PII anonymization engine. Stateless; safe to share across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymizer;

impl Anonymizer {
    /// Create an engine, forcing pattern compilation up front.
    pub fn new() -> Self {
        Lazy::force(&PIPELINE);
        Lazy::force(&PRESENCE_SET);
        Self
    }

    /// Anonymize an arbitrary JSON value.
    ///
    /// With `preserve_structure`, PII-indicative keys keep a fixed placeholder
    /// value; otherwise they are dropped.
    pub fn anonymize(&self, value: &Value, preserve_structure: bool) -> AnonymizationResult {
        let mut pii_types = BTreeSet::new();
        let mut field_hit = false;
        let payload = self.scrub(value, preserve_structure, &mut pii_types, &mut field_hit);

        let result = AnonymizationResult {
            size_before: json_size(value),
            size_after: json_size(&payload),
            pii_found: field_hit || !pii_types.is_empty(),
            pii_types,
            payload,
        };
        if result.pii_found {
            debug!(
                types = ?result.pii_types,
                size_before = result.size_before,
                size_after = result.size_after,
                "PII redacted from payload"
            );
        }
        result
    }

    /// Run the text pipeline, returning the redacted text and what was found.
    pub fn redact_text(&self, text: &str) -> (String, BTreeSet<PiiCategory>) {
        let mut found = BTreeSet::new();
        let redacted = self.redact_into(text, &mut found);
        (redacted, found)
    }

    /// Cheap presence check over the same pattern set. Agrees with
    /// [`Anonymizer::redact_text`]: the pipeline changes nothing exactly when
    /// no pattern matches the original text.
    pub fn is_pii_present(&self, text: &str) -> bool {
        PRESENCE_SET.is_match(text)
    }

    /// Mandatory boundary call before a payload goes to a model provider.
    ///
    /// PII fields are dropped from the prompt and masked in the context.
    pub fn sanitize_for_llm(&self, prompt: &Value, context: Option<&Value>) -> SanitizedPayload {
        let prompt_result = self.anonymize(prompt, false);
        let mut pii_removed = prompt_result.pii_found;
        let mut pii_types = prompt_result.pii_types;

        let context = context.map(|ctx| {
            let ctx_result = self.anonymize(ctx, true);
            pii_removed |= ctx_result.pii_found;
            pii_types.extend(ctx_result.pii_types);
            ctx_result.payload
        });

        SanitizedPayload {
            prompt: prompt_result.payload,
            context,
            pii_removed,
            pii_types,
        }
    }

    fn scrub(
        &self,
        value: &Value,
        preserve_structure: bool,
        found: &mut BTreeSet<PiiCategory>,
        field_hit: &mut bool,
    ) -> Value {
        match value {
            Value::String(text) => Value::String(self.redact_into(text, found)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.scrub(item, preserve_structure, found, field_hit))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, inner) in map {
                    if let Some(category) = pii_field_category(key) {
                        // A masked field is only a finding if it held something.
                        if !is_placeholder(inner) {
                            *field_hit = true;
                            found.insert(category);
                        }
                        if preserve_structure {
                            out.insert(key.clone(), Value::String(FIELD_PLACEHOLDER.into()));
                        }
                        continue;
                    }
                    out.insert(
                        key.clone(),
                        self.scrub(inner, preserve_structure, found, field_hit),
                    );
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    fn redact_into(&self, text: &str, found: &mut BTreeSet<PiiCategory>) -> String {
        if !PRESENCE_SET.is_match(text) {
            return text.to_string();
        }
        let mut current = text.to_string();
        for (category, regex) in PIPELINE.iter() {
            if regex.is_match(&current) {
                found.insert(*category);
                current = regex
                    .replace_all(&current, category.placeholder())
                    .into_owned();
            }
        }
        current
    }
}

fn is_placeholder(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == FIELD_PLACEHOLDER)
}

fn json_size(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> Anonymizer {
        Anonymizer::new()
    }

    #[test]
    fn test_each_category_removed_from_text() {
        let samples = [
            ("jane.doe@example.com", PiiCategory::Email),
            ("4111 1111 1111 1111", PiiCategory::CreditCard),
            ("4111111111111111", PiiCategory::CreditCard),
            ("(555) 123-4567", PiiCategory::Phone),
            ("+1 555-123-4567", PiiCategory::Phone),
            ("1600 Pennsylvania Avenue", PiiCategory::Address),
            ("742 Evergreen Terrace", PiiCategory::Address),
            ("90210", PiiCategory::PostalCode),
            ("94105-1234", PiiCategory::PostalCode),
            ("192.168.1.100", PiiCategory::IpAddress),
            ("2001:0db8:85a3:0000:0000:8a2e:0370:7334", PiiCategory::IpAddress),
            ("2001:db8::1", PiiCategory::IpAddress),
            ("fe80::1ff:fe23:4567:890a", PiiCategory::IpAddress),
            ("+44 20 7946 0958", PiiCategory::Phone),
            ("+33 1 23 45 67 89", PiiCategory::Phone),
            ("555-0132", PiiCategory::Phone),
            ("123-45-6789", PiiCategory::Ssn),
        ];
        for (pii, category) in samples {
            let text = format!("please note {} for later", pii);
            let (out, found) = engine().redact_text(&text);
            assert!(!out.contains(pii), "{} leaked in {}", pii, out);
            assert!(found.contains(&category), "{} not tagged {:?}", pii, category);
            assert!(out.starts_with("please note ") && out.ends_with(" for later"));
        }
    }

    #[test]
    fn test_card_not_split_into_phone() {
        let (out, found) = engine().redact_text("card 5500 0000 0000 0004 on file");
        assert_eq!(out, "card [CREDIT_CARD] on file");
        assert!(!found.contains(&PiiCategory::Phone));
    }

    #[test]
    fn test_email_wins_over_numeric_patterns() {
        let (out, found) = engine().redact_text("write to user5551234567@mail.com");
        assert_eq!(out, "write to [EMAIL]");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_ssn_not_taken_for_phone() {
        let (out, found) = engine().redact_text("ssn 123-45-6789, call 555-0132");
        assert_eq!(out, "ssn [SSN], call [PHONE]");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_code_paths_not_taken_for_ipv6() {
        let text = "Use Vec::new and std::fmt in the handler";
        assert_eq!(engine().redact_text(text).0, text);
        assert!(!engine().is_pii_present(text));
    }

    #[test]
    fn test_clean_text_untouched() {
        let text = "What opportunities match my Rust skills?";
        let (out, found) = engine().redact_text(text);
        assert_eq!(out, text);
        assert!(found.is_empty());
        assert!(!engine().is_pii_present(text));
    }

    #[test]
    fn test_text_idempotent() {
        let text = "Mail a@b.com, call 555-123-4567, visit 12 Baker Street 90210 from 10.0.0.1";
        let once = engine().redact_text(text).0;
        let twice = engine().redact_text(&once).0;
        assert_eq!(once, twice);
        assert!(!engine().is_pii_present(&once));
    }

    #[test]
    fn test_presence_check_agrees_with_pipeline() {
        let inputs = [
            "nothing here",
            "a@b.com",
            "call 555 123 4567",
            "zip 10001",
            "release 1.2.3",
            "4000-0000-0000-0002",
            "ref #1234",
            "from fe80::1",
            "born 1990-04-12",
        ];
        for text in inputs {
            let (_, found) = engine().redact_text(text);
            assert_eq!(engine().is_pii_present(text), !found.is_empty(), "{}", text);
        }
    }

    #[test]
    fn test_preserve_structure_masks_field() {
        let input = json!({"email": "a@b.com", "skills": ["x"]});
        let result = engine().anonymize(&input, true);
        assert_eq!(result.payload, json!({"email": "[REDACTED]", "skills": ["x"]}));
        assert!(result.pii_found);
        assert!(result.pii_types.contains(&PiiCategory::Email));
    }

    #[test]
    fn test_drop_structure_removes_field() {
        let input = json!({"fullName": "Jane Doe", "phone_number": "555", "bio": "Rustacean"});
        let result = engine().anonymize(&input, false);
        assert_eq!(result.payload, json!({"bio": "Rustacean"}));
        assert!(result.size_after < result.size_before);
    }

    #[test]
    fn test_nested_structures() {
        let input = json!({
            "profile": {
                "notes": ["reach me at jane@corp.io", 42, true, null],
                "contact": {"home_address": "12 Baker Street"}
            }
        });
        let result = engine().anonymize(&input, true);
        assert_eq!(
            result.payload,
            json!({
                "profile": {
                    "notes": ["reach me at [EMAIL]", 42, true, null],
                    "contact": {"home_address": "[REDACTED]"}
                }
            })
        );
    }

    #[test]
    fn test_structured_idempotent() {
        let input = json!({
            "email": "a@b.com",
            "items": [{"text": "call 555-123-4567"}, {"ip": "10.1.2.3"}],
        });
        for preserve in [true, false] {
            let once = engine().anonymize(&input, preserve).payload;
            let twice = engine().anonymize(&once, preserve);
            assert_eq!(once, twice.payload);
            assert!(!twice.pii_found);
        }
    }

    #[test]
    fn test_preserve_keeps_all_keys() {
        let input = json!({"email": "x@y.com", "ssn": "123-45-6789", "title": "Engineer"});
        let result = engine().anonymize(&input, true);
        let keys: Vec<_> = result.payload.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_field_matching() {
        assert_eq!(pii_field_category("Email"), Some(PiiCategory::Email));
        assert_eq!(pii_field_category("billing-address"), Some(PiiCategory::Address));
        assert_eq!(pii_field_category("ip_address"), Some(PiiCategory::IpAddress));
        assert_eq!(pii_field_category("IP"), Some(PiiCategory::IpAddress));
        assert_eq!(pii_field_category("creditCardNumber"), Some(PiiCategory::CreditCard));
        assert_eq!(pii_field_category("date of birth"), Some(PiiCategory::DateOfBirth));
        assert_eq!(pii_field_category("description"), None);
        assert_eq!(pii_field_category("skills"), None);
    }

    #[test]
    fn test_short_keys_match_as_segments() {
        for key in ["client_ip", "clientIp", "remote-ip", "ip_v6", "IP"] {
            assert_eq!(pii_field_category(key), Some(PiiCategory::IpAddress), "{}", key);
        }
        for key in ["user_dob", "userDob", "dob"] {
            assert_eq!(pii_field_category(key), Some(PiiCategory::DateOfBirth), "{}", key);
        }
        for key in ["recipient", "tip_amount", "shipping", "doberman"] {
            assert_eq!(pii_field_category(key), None, "{}", key);
        }
    }

    #[test]
    fn test_ip_and_dob_fields_do_not_leak() {
        let input = json!({
            "client_ip": "2001:db8::1",
            "user_dob": "1990-04-12",
            "note": "login from fe80::1ff:fe23:4567:890a today",
        });
        let result = engine().anonymize(&input, true);
        assert_eq!(
            result.payload,
            json!({
                "client_ip": "[REDACTED]",
                "user_dob": "[REDACTED]",
                "note": "login from [IP_ADDRESS] today",
            })
        );
        assert!(result.pii_types.contains(&PiiCategory::IpAddress));
        assert!(result.pii_types.contains(&PiiCategory::DateOfBirth));
    }

    #[test]
    fn test_sanitize_for_llm() {
        let prompt = json!({"question": "Jobs near 94105?", "email": "me@home.net"});
        let context = json!({"phone": "555-123-4567", "history": ["asked about Go"]});
        let out = engine().sanitize_for_llm(&prompt, Some(&context));

        assert_eq!(out.prompt, json!({"question": "Jobs near [POSTAL_CODE]?"}));
        assert_eq!(
            out.context,
            Some(json!({"phone": "[REDACTED]", "history": ["asked about Go"]}))
        );
        assert!(out.pii_removed);
        assert!(out.pii_types.contains(&PiiCategory::PostalCode));
        assert!(out.pii_types.contains(&PiiCategory::Phone));
    }

    #[test]
    fn test_sanitize_plain_string_prompt() {
        let out = engine().sanitize_for_llm(&json!("hello from 8.8.8.8"), None);
        assert_eq!(out.prompt, json!("hello from [IP_ADDRESS]"));
        assert!(out.context.is_none());
    }
}
