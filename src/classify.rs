use crossterm::style::Color;

/// Keyword-derived severity of a single log line. The variant order is the
/// badge precedence: the most urgent unseen severity wins a tab's badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    None,
    Debug,
    Success,
    Info,
    Warn,
    Error,
}

// Evaluated top to bottom; the first set with a hit wins. The match is a
// case-insensitive substring test, so "verbos" covers both spellings.
const KEYWORD_RULES: &[(Severity, &[&str])] = &[
    (
        Severity::Info,
        &["info", "notice", "starting", "started", "listening", "listened"],
    ),
    (
        Severity::Warn,
        &["warn", "retrying", "retry", "slow", "slowly"],
    ),
    (
        Severity::Error,
        &[
            "error",
            "fail",
            "fatal",
            "panic",
            "exception",
            "traceback",
            "can't",
            "denied",
            "unavailable",
            "unreachable",
            "not found",
            "no such",
        ],
    ),
    (
        Severity::Success,
        &["success", "ready", "connected", "completed", "done"],
    ),
    (
        Severity::Debug,
        &[
            "debug", "verbos", "trace", "http", "https", "get", "post", "put", "delete",
            "request", "response", "sql", "select", "insert", "update", "query", "inject",
        ],
    ),
];

pub fn classify(line: &str) -> Severity {
    let lowered = line.to_lowercase();
    for (severity, keywords) in KEYWORD_RULES {
        if keywords.iter().any(|keyword| lowered.contains(keyword)) {
            return *severity;
        }
    }
    Severity::None
}

impl Severity {
    pub fn color(self) -> Option<Color> {
        match self {
            Severity::Error => Some(Color::Red),
            Severity::Warn => Some(Color::Yellow),
            Severity::Info => Some(Color::AnsiValue(81)),
            Severity::Success => Some(Color::Green),
            Severity::Debug => Some(Color::AnsiValue(245)),
            Severity::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{classify, Severity};

    #[test]
    fn keyword_sets_classify_literal_lines() {
        assert_eq!(
            classify("2024-01-01 ERROR: connection denied"),
            Severity::Error
        );
        assert_eq!(
            classify("Starting worker, listening on :8080"),
            Severity::Info
        );
        assert_eq!(classify("SELECT * FROM users"), Severity::Debug);
        assert_eq!(classify("plain message"), Severity::None);
    }

    #[test]
    fn earlier_sets_win_over_later_ones() {
        // "info" is tested before "error", so a line carrying both is info.
        assert_eq!(classify("info: previous run had an error"), Severity::Info);
        // "warn" is tested before "fail".
        assert_eq!(classify("warning: request failed"), Severity::Warn);
    }

    #[test]
    fn match_is_case_insensitive() {
        assert_eq!(classify("FATAL: out of memory"), Severity::Error);
        assert_eq!(classify("Verbose output enabled"), Severity::Debug);
        assert_eq!(classify("Connected to upstream"), Severity::Success);
    }

    #[test]
    fn classification_is_reproducible() {
        let line = "retrying in 5s";
        assert_eq!(classify(line), classify(line));
        assert_eq!(classify(line), Severity::Warn);
    }

    #[test]
    fn badge_precedence_follows_variant_order() {
        assert!(Severity::Error > Severity::Warn);
        assert!(Severity::Warn > Severity::Info);
        assert!(Severity::Info > Severity::Success);
        assert!(Severity::Success > Severity::Debug);
        assert!(Severity::Debug > Severity::None);
    }

    #[test]
    fn only_error_warn_info_success_debug_are_colored() {
        assert!(Severity::Error.color().is_some());
        assert!(Severity::None.color().is_none());
    }
}
