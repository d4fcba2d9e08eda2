//! Outcome Classifier: maps a stress probe's observed result to one of a
//! fixed, closed set of outcomes using a fixed rule set.

use std::sync::OnceLock;

use regex::RegexSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    GracefulFail,
    CrashOrHang,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::GracefulFail => "graceful_fail",
            Self::CrashOrHang => "crash_or_hang",
        }
    }
}

const VALIDATION_PATTERNS: &[&str] = &[
    "invalid",
    "required",
    "missing",
    "type.*expected",
    "must be",
    "should be",
    "cannot be",
    "not allowed",
    "validation",
    "argument",
    "parameter",
    "property",
    "schema",
];

const CRASH_PATTERNS: &[&str] = &[
    "crash",
    "segfault",
    "exception",
    "internal.*error",
    "unexpected",
    "panic",
    "fatal",
    "killed",
];

fn validation_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(VALIDATION_PATTERNS.iter().map(|p| format!("(?i){p}")))
            .expect("validation vocabulary patterns are valid regexes")
    })
}

fn crash_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(CRASH_PATTERNS.iter().map(|p| format!("(?i){p}")))
            .expect("crash vocabulary patterns are valid regexes")
    })
}

/// Classifies a stress probe's observed result.
///
/// `error_message` is the stringified error payload, if the probe's
/// response carried one; `None` means the probe returned with no error.
pub fn classify(timed_out: bool, error_message: Option<&str>) -> Outcome {
    if timed_out {
        return Outcome::CrashOrHang;
    }
    let Some(message) = error_message else {
        return Outcome::Pass;
    };
    if validation_set().is_match(message) {
        return Outcome::GracefulFail;
    }
    if crash_set().is_match(message) {
        return Outcome::CrashOrHang;
    }
    Outcome::GracefulFail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_always_crashes_regardless_of_message() {
        assert_eq!(classify(true, None), Outcome::CrashOrHang);
        assert_eq!(classify(true, Some("invalid")), Outcome::CrashOrHang);
    }

    #[test]
    fn no_error_payload_is_pass() {
        assert_eq!(classify(false, None), Outcome::Pass);
    }

    #[test]
    fn validation_vocabulary_is_graceful_fail() {
        assert_eq!(
            classify(false, Some("Invalid argument: path must be a string")),
            Outcome::GracefulFail
        );
        assert_eq!(
            classify(false, Some("missing required parameter")),
            Outcome::GracefulFail
        );
    }

    #[test]
    fn crash_vocabulary_is_crash_or_hang() {
        assert_eq!(
            classify(false, Some("internal server error")),
            Outcome::CrashOrHang
        );
        assert_eq!(classify(false, Some("process panicked")), Outcome::CrashOrHang);
    }

    #[test]
    fn unrecognized_error_defaults_to_graceful_fail() {
        assert_eq!(classify(false, Some("file not found")), Outcome::GracefulFail);
    }
}
