// Rate limit detection in terminal output of agent processes

use super::{DetectedAt, RawRateLimitPayload};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Types of rate limits that can be detected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitType {
    /// HTTP 429 Too Many Requests
    Http429,
    /// Generic rate limit message
    RateLimit,
    /// Quota exceeded
    QuotaExceeded,
    /// Service overloaded
    Overloaded,
    /// Claude-specific rate limit (including the CLI's "limit reached" banner)
    ClaudeRateLimit,
    /// OpenAI-specific rate limit
    OpenAiRateLimit,
}

/// What the detector found in one chunk of output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDetection {
    pub limit_type: RateLimitType,
    pub retry_after_ms: Option<u64>,
    pub matched_pattern: String,
    /// Provider-reported reset time, verbatim (e.g. "3pm (Europe/Oslo)")
    pub reset_time: Option<String>,
}

struct CompiledPattern {
    regex: Regex,
    limit_type: RateLimitType,
}

static PATTERNS: OnceLock<Vec<CompiledPattern>> = OnceLock::new();

fn compile(pattern: &str, limit_type: RateLimitType) -> CompiledPattern {
    CompiledPattern {
        regex: Regex::new(pattern).expect("static rate limit pattern"),
        limit_type,
    }
}

fn get_patterns() -> &'static Vec<CompiledPattern> {
    PATTERNS.get_or_init(|| {
        use RateLimitType::*;

        // Order matters: provider-specific patterns before generic ones
        vec![
            compile(r"(?i)\blimit\s+reached\b.*\bresets?\b", ClaudeRateLimit),
            compile(r"(?i)anthropic[:\s].*rate\s*limit", ClaudeRateLimit),
            compile(r"(?i)claude[:\s].*rate\s*limit", ClaudeRateLimit),
            compile(r"(?i)openai[:\s].*rate\s*limit", OpenAiRateLimit),
            compile(r"(?i)tokens?\s+per\s+minute\s+(limit|exceeded)", OpenAiRateLimit),
            // Word boundaries keep IDs like "ses_429f18..." from matching
            compile(r"(?i)\b429\b\s*(?:too many requests|rate limit)?", Http429),
            compile(r"(?i)status[:\s]*429", Http429),
            compile(r"(?i)HTTP/\d+(?:\.\d+)?\s+429", Http429),
            compile(r"(?i)rate[_\-\s]?limit(ed|ing)?", RateLimit),
            compile(r"(?i)too\s+many\s+requests", RateLimit),
            compile(r"(?i)request\s+limit\s+exceeded", RateLimit),
            compile(r"(?i)quota\s*(exceeded|limit)", QuotaExceeded),
            compile(r"(?i)usage\s+limit\s+(exceeded|reached)", QuotaExceeded),
            compile(r"(?i)overloaded", Overloaded),
            compile(r"(?i)service\s+(unavailable|busy)", Overloaded),
            compile(r"(?i)capacity\s+(exceeded|limit)", Overloaded),
            compile(r"(?i)high\s+concurrency", Overloaded),
            compile(r"(?i)reduce\s+concurrency", Overloaded),
        ]
    })
}

static RETRY_AFTER_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_retry_after_regex() -> &'static Regex {
    RETRY_AFTER_REGEX.get_or_init(|| {
        Regex::new(r"(?i)retry[_\-\s]?after[:\s]*(\d+)").expect("static retry-after pattern")
    })
}

static RESET_TIME_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_reset_time_regex() -> &'static Regex {
    RESET_TIME_REGEX.get_or_init(|| {
        Regex::new(r"(?i)\bresets?\s+(?:at\s+)?([^\n·|]+)").expect("static reset-time pattern")
    })
}

/// Scans terminal output for provider throttling
#[derive(Debug, Default)]
pub struct RateLimitDetector;

impl RateLimitDetector {
    pub fn new() -> Self {
        Self
    }

    /// Returns None if no rate limit is present in `output`
    pub fn detect(&self, output: &str) -> Option<RateLimitDetection> {
        let pattern = get_patterns()
            .iter()
            .find(|pattern| pattern.regex.is_match(output))?;
        let matched_pattern = pattern
            .regex
            .find(output)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        Some(RateLimitDetection {
            limit_type: pattern.limit_type,
            retry_after_ms: extract_retry_after_secs(output)
                .and_then(|secs| secs.checked_mul(1000)),
            matched_pattern,
            reset_time: extract_reset_time(output),
        })
    }

    pub fn is_rate_limited(&self, output: &str) -> bool {
        self.detect(output).is_some()
    }

    /// Detect and package as a terminal-origin payload stamped with the current time.
    /// The caller supplies the identity; the detector never guesses it.
    pub fn detect_payload(
        &self,
        output: &str,
        source_id: &str,
        project_id: Option<&str>,
    ) -> Option<RawRateLimitPayload> {
        let detection = self.detect(output)?;
        log::debug!(
            "[RateLimit] Detected {:?} in output of {}: {:?}",
            detection.limit_type,
            source_id,
            detection.matched_pattern
        );

        Some(RawRateLimitPayload {
            project_id: project_id.map(str::to_string),
            source_id: source_id.to_string(),
            profile_id: None,
            limit_type: Some(detection.limit_type),
            reset_time: detection.reset_time,
            retry_after_ms: detection.retry_after_ms,
            matched_pattern: Some(detection.matched_pattern),
            detected_at: DetectedAt::Structured(Utc::now()),
        })
    }
}

fn extract_retry_after_secs(output: &str) -> Option<u64> {
    get_retry_after_regex()
        .captures(output)
        .and_then(|caps| caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()))
}

fn extract_reset_time(output: &str) -> Option<String> {
    get_reset_time_regex()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_http_429() {
        let detector = RateLimitDetector::new();
        let info = detector
            .detect("Error: 429 Too Many Requests - please slow down")
            .unwrap();
        assert_eq!(info.limit_type, RateLimitType::Http429);
    }

    #[test]
    fn test_detects_rate_limit_keyword() {
        let detector = RateLimitDetector::new();
        let info = detector
            .detect("API Error: rate-limit exceeded, please wait")
            .unwrap();
        assert_eq!(info.limit_type, RateLimitType::RateLimit);
    }

    #[test]
    fn test_detects_quota_exceeded() {
        let detector = RateLimitDetector::new();
        let info = detector.detect("Error: Quota exceeded for today").unwrap();
        assert_eq!(info.limit_type, RateLimitType::QuotaExceeded);
    }

    #[test]
    fn test_detects_claude_cli_limit_banner() {
        let detector = RateLimitDetector::new();
        let info = detector
            .detect("Claude usage limit reached · resets 3pm (Europe/Oslo)")
            .unwrap();
        assert_eq!(info.limit_type, RateLimitType::ClaudeRateLimit);
        assert_eq!(info.reset_time.as_deref(), Some("3pm (Europe/Oslo)"));
    }

    #[test]
    fn test_retry_after_is_converted_to_millis() {
        let detector = RateLimitDetector::new();

        let info = detector.detect("Rate limited. Retry-After: 30 seconds").unwrap();
        assert_eq!(info.retry_after_ms, Some(30_000));

        let info = detector.detect("Rate limited. Retry_After: 120").unwrap();
        assert_eq!(info.retry_after_ms, Some(120_000));

        let info = detector.detect("rate limit hit, retry after 45 seconds").unwrap();
        assert_eq!(info.retry_after_ms, Some(45_000));
    }

    #[test]
    fn test_oversized_retry_after_is_dropped() {
        let detector = RateLimitDetector::new();
        let info = detector
            .detect("rate limited, retry-after: 18446744073709551615")
            .unwrap();
        assert_eq!(info.limit_type, RateLimitType::RateLimit);
        assert_eq!(info.retry_after_ms, None);
    }

    #[test]
    fn test_returns_none_when_no_rate_limit_detected() {
        let detector = RateLimitDetector::new();
        assert!(detector.detect("Normal error: file not found").is_none());
        assert!(!detector.is_rate_limited("success"));
    }

    #[test]
    fn test_detects_overloaded() {
        let detector = RateLimitDetector::new();
        let info = detector
            .detect("High concurrency usage of this API, please reduce concurrency")
            .unwrap();
        assert_eq!(info.limit_type, RateLimitType::Overloaded);
    }

    #[test]
    fn test_case_insensitive_detection() {
        let detector = RateLimitDetector::new();
        assert!(detector.is_rate_limited("RATE LIMIT EXCEEDED"));
        assert!(detector.is_rate_limited("QUOTA EXCEEDED"));
        assert!(detector.is_rate_limited("HTTP/2 429"));
        assert!(detector.is_rate_limited("status: 429"));
    }

    #[test]
    fn test_no_false_positive_on_session_ids() {
        let detector = RateLimitDetector::new();
        assert!(!detector.is_rate_limited("ses_429f18024ffeVo6UO6EAo2tIHG"));
        assert!(!detector.is_rate_limited("agent-429abc-def"));
        assert!(!detector.is_rate_limited("task_id_429_hash"));
        assert!(detector.is_rate_limited("Response code: 429"));
    }

    #[test]
    fn test_detect_payload_carries_caller_identity() {
        let detector = RateLimitDetector::new();
        let payload = detector
            .detect_payload("429 Too Many Requests", "terminal-7", Some("p1"))
            .unwrap();

        assert_eq!(payload.source_id, "terminal-7");
        assert_eq!(payload.project_id.as_deref(), Some("p1"));
        assert_eq!(payload.limit_type, Some(RateLimitType::Http429));
        assert!(matches!(payload.detected_at, DetectedAt::Structured(_)));

        assert!(detector
            .detect_payload("all good", "terminal-7", Some("p1"))
            .is_none());
    }
}
