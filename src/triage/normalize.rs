//! Message normalization and error classification shared by every analysis
//! command that groups log lines into signatures.

use std::sync::OnceLock;

use regex::Regex;

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .unwrap()
    })
}

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?").unwrap()
    })
}

fn ip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d?\d)\b")
            .unwrap()
    })
}

fn hex_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"0x[0-9a-fA-F]+").unwrap())
}

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+(?:ms|us|µs|ns|s|m|h)\b").unwrap())
}

fn integer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4,}\b").unwrap())
}

/// Collapse volatile substrings (UUIDs, timestamps, IPs, hex, durations, long
/// integers) into fixed placeholders so that otherwise-identical log lines
/// group into the same signature. Three-digit codes like HTTP statuses are
/// left untouched by construction (the integer rule only fires at ≥4 digits).
///
/// Idempotent: none of the placeholder tokens contain digits or hex chars,
/// so re-running this on its own output is a no-op.
pub fn normalize_message(s: &str) -> String {
    let s = uuid_re().replace_all(s, "<UUID>");
    let s = timestamp_re().replace_all(&s, "<TS>");
    let s = ip_re().replace_all(&s, "<IP>");
    let s = hex_re().replace_all(&s, "<HEX>");
    let s = duration_re().replace_all(&s, "<DUR>");
    let s = integer_re().replace_all(&s, "<N>");
    s.into_owned()
}

const ERROR_MARKERS: &[&str] = &[
    "error",
    "panic",
    "fatal",
    "exception",
    "fail",
    "refused",
    "timeout",
    "oomkilled",
    "crashloopbackoff",
    "segfault",
    "x509",
    "deadline exceeded",
];

/// Case-insensitive substring match against a fixed marker list.
pub fn is_error(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let msg = "req 550e8400-e29b-41d4-a716-446655440000 took 1500ms from 10.0.0.1 at 2024-01-02T03:04:05Z, retry 123456";
        let once = normalize_message(msg);
        let twice = normalize_message(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_replaces_each_category() {
        let out = normalize_message(
            "id=550e8400-e29b-41d4-a716-446655440000 ts=2024-01-02T03:04:05Z ip=10.0.0.1 addr=0xFF12 dur=250ms count=123456",
        );
        assert!(out.contains("<UUID>"));
        assert!(out.contains("<TS>"));
        assert!(out.contains("<IP>"));
        assert!(out.contains("<HEX>"));
        assert!(out.contains("<DUR>"));
        assert!(out.contains("<N>"));
    }

    #[test]
    fn normalize_preserves_short_status_codes() {
        let out = normalize_message("GET /health 200 in 5ms");
        assert!(out.contains("200"), "3-digit codes must survive: {out}");
    }

    #[test]
    fn is_error_matches_known_markers() {
        assert!(is_error("connection refused"));
        assert!(is_error("PANIC: out of memory"));
        assert!(is_error("context deadline exceeded"));
        assert!(!is_error("request completed successfully"));
    }
}
