//! Line redaction applied before a log entry ever touches disk.
//!
//! Patterns run in a fixed order against `msg` only. Credit-card matches are
//! additionally Luhn-checked; a Luhn failure means no redaction at all for
//! that match (not a different token) — only real-looking numbers pay the
//! privacy tax of becoming unreadable.

use std::sync::OnceLock;

use regex::Regex;

use crate::metrics::Registry;

/// Name + compiled regex + replacement token for one built-in pattern.
struct Pattern {
    name: &'static str,
    regex: &'static Regex,
    token: &'static str,
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
    })
}

fn credit_card_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap())
}

fn jwt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bey[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\b").unwrap()
    })
}

fn bearer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bBearer\s+[A-Za-z0-9._~+/=-]+\b").unwrap())
}

fn ip_v4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d?\d)\b")
            .unwrap()
    })
}

fn ssn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap())
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b").unwrap()
    })
}

fn all_patterns() -> &'static [Pattern] {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Pattern { name: "email", regex: email_re(), token: "<EMAIL>" },
            Pattern { name: "credit_card", regex: credit_card_re(), token: "<CREDIT_CARD>" },
            Pattern { name: "jwt", regex: jwt_re(), token: "<JWT>" },
            Pattern { name: "bearer", regex: bearer_re(), token: "<BEARER>" },
            Pattern { name: "ip_v4", regex: ip_v4_re(), token: "<IP>" },
            Pattern { name: "ssn", regex: ssn_re(), token: "<SSN>" },
            Pattern { name: "phone", regex: phone_re(), token: "<PHONE>" },
        ]
    })
}

pub fn builtin_pattern_names() -> Vec<&'static str> {
    all_patterns().iter().map(|p| p.name).collect()
}

/// The active pattern set for one receiver instance, resolved once at startup
/// from `ReceiverConfig::redact_patterns` (a subset/superset of the built-ins).
pub struct Redactor {
    active: Vec<&'static str>,
}

impl Redactor {
    pub fn new(active_names: &[String]) -> Self {
        let known: Vec<&'static str> = all_patterns().iter().map(|p| p.name).collect();
        let active = active_names
            .iter()
            .filter_map(|n| known.iter().find(|k| **k == n.as_str()).copied())
            .collect();
        Self { active }
    }

    pub fn all_builtin() -> Self {
        Self::new(
            &builtin_pattern_names()
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>(),
        )
    }

    /// Apply every active pattern in order, recording each successful
    /// redaction in `registry`. Returns the (possibly unchanged) message.
    pub fn redact(&self, msg: &str, registry: &Registry) -> String {
        let mut out = msg.to_string();
        for pattern in all_patterns() {
            if !self.active.contains(&pattern.name) {
                continue;
            }
            out = apply_pattern(pattern, &out, registry);
        }
        out
    }
}

fn apply_pattern(pattern: &Pattern, msg: &str, registry: &Registry) -> String {
    if pattern.name == "credit_card" {
        return replace_with_luhn_gate(pattern, msg, registry);
    }

    let mut redacted_any = false;
    let out = pattern
        .regex
        .replace_all(msg, |_: &regex::Captures| {
            redacted_any = true;
            pattern.token
        })
        .into_owned();
    if redacted_any {
        registry.inc_redaction(pattern.name);
    }
    out
}

fn replace_with_luhn_gate(pattern: &Pattern, msg: &str, registry: &Registry) -> String {
    let mut redacted_any = false;
    let out = pattern
        .regex
        .replace_all(msg, |caps: &regex::Captures| {
            let candidate = &caps[0];
            if luhn_check(candidate) {
                redacted_any = true;
                pattern.token.to_string()
            } else {
                candidate.to_string()
            }
        })
        .into_owned();
    if redacted_any {
        registry.inc_redaction(pattern.name);
    }
    out
}

/// Luhn checksum over the digits of `s`, ignoring separators. Returns false
/// for anything with fewer than 13 digits (not a plausible card number).
pub fn luhn_check(s: &str) -> bool {
    let digits: Vec<u32> = s.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let mut sum = 0u32;
    let mut double = false;
    for &d in digits.iter().rev() {
        let mut v = d;
        if double {
            v *= 2;
            if v > 9 {
                v -= 9;
            }
        }
        sum += v;
        double = !double;
    }
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luhn_accepts_known_good_number() {
        assert!(luhn_check("4111111111111111"));
    }

    #[test]
    fn luhn_rejects_bad_checksum() {
        assert!(!luhn_check("4111111111111112"));
    }

    #[test]
    fn redacts_email_and_valid_card() {
        let registry = Registry::new();
        let redactor = Redactor::all_builtin();
        let out = redactor.redact("mail=a@b.com card=4111111111111111", &registry);
        assert!(out.contains("<EMAIL>"));
        assert!(out.contains("<CREDIT_CARD>"));
        assert_eq!(
            registry
                .render()
                .matches("pattern=\"email\"} 1")
                .count(),
            1
        );
    }

    #[test]
    fn bad_luhn_is_left_untouched_and_uncounted() {
        let registry = Registry::new();
        let redactor = Redactor::all_builtin();
        let out = redactor.redact("4111111111111112", &registry);
        assert_eq!(out, "4111111111111112");
        assert!(!registry.render().contains("credit_card"));
    }

    #[test]
    fn restricted_active_set_skips_other_patterns() {
        let registry = Registry::new();
        let redactor = Redactor::new(&["email".to_string()]);
        let out = redactor.redact("mail=a@b.com 192.168.1.1", &registry);
        assert!(out.contains("<EMAIL>"));
        assert!(out.contains("192.168.1.1"), "ip_v4 not in active set, should survive");
    }
}
