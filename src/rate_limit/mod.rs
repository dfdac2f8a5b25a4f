//! Rate-limit side channel
//!
//! Detections arrive from two independent sources (an interactive terminal or
//! the agent SDK), get their timestamp normalised to `DateTime<Utc>`, and are
//! forwarded to a notification sink. Nothing here touches job state.

pub mod detector;

pub use detector::{RateLimitDetection, RateLimitDetector, RateLimitType};

use crate::bridge::{EventBridge, ListenerSet};
use crate::events::{
    BridgeEvent, EventName, IdentityFilter, EVENT_RATE_LIMIT_SDK, EVENT_RATE_LIMIT_TERMINAL,
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Where a rate limit was observed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitOrigin {
    /// Output of an interactive terminal session
    Terminal,
    /// Reported by the agent SDK during a generation run
    Sdk,
}

impl RateLimitOrigin {
    pub fn event_name(self) -> &'static str {
        match self {
            RateLimitOrigin::Terminal => EVENT_RATE_LIMIT_TERMINAL,
            RateLimitOrigin::Sdk => EVENT_RATE_LIMIT_SDK,
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            EVENT_RATE_LIMIT_TERMINAL => Some(RateLimitOrigin::Terminal),
            EVENT_RATE_LIMIT_SDK => Some(RateLimitOrigin::Sdk),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Unrecognised detection timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Detection timestamp as supplied by the source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DetectedAt {
    /// Milliseconds since the Unix epoch
    EpochMillis(i64),
    /// RFC 3339, or `YYYY-MM-DD HH:MM:SS` taken as UTC
    Text(String),
    Structured(DateTime<Utc>),
}

impl DetectedAt {
    pub fn normalize(&self) -> Result<DateTime<Utc>, RateLimitError> {
        match self {
            DetectedAt::Structured(at) => Ok(*at),
            DetectedAt::EpochMillis(millis) => Utc
                .timestamp_millis_opt(*millis)
                .single()
                .ok_or_else(|| RateLimitError::InvalidTimestamp(millis.to_string())),
            DetectedAt::Text(text) => parse_timestamp_text(text.trim())
                .ok_or_else(|| RateLimitError::InvalidTimestamp(text.clone())),
        }
    }
}

fn parse_timestamp_text(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// A detection as it crosses the boundary, before normalisation.
///
/// Identity fields are whatever the source knew; the interceptor passes them
/// through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawRateLimitPayload {
    #[serde(default)]
    pub project_id: Option<String>,
    /// Terminal ID or job run the detection came from
    pub source_id: String,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub limit_type: Option<RateLimitType>,
    #[serde(default)]
    pub reset_time: Option<String>,
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
    #[serde(default)]
    pub matched_pattern: Option<String>,
    pub detected_at: DetectedAt,
}

/// Normalised, immutable rate-limit notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitEvent {
    pub origin: RateLimitOrigin,
    pub detected_at: DateTime<Utc>,
    pub project_id: Option<String>,
    pub source_id: String,
    pub profile_id: Option<String>,
    pub limit_type: Option<RateLimitType>,
    pub reset_time: Option<String>,
    pub retry_after_ms: Option<u64>,
    pub matched_pattern: Option<String>,
}

impl RateLimitEvent {
    /// Build a normalised event; fails only on an unparseable timestamp
    pub fn from_raw(
        origin: RateLimitOrigin,
        raw: RawRateLimitPayload,
    ) -> Result<Self, RateLimitError> {
        let detected_at = raw.detected_at.normalize()?;
        Ok(Self::with_timestamp(origin, raw, detected_at))
    }

    fn with_timestamp(
        origin: RateLimitOrigin,
        raw: RawRateLimitPayload,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            origin,
            detected_at,
            project_id: raw.project_id,
            source_id: raw.source_id,
            profile_id: raw.profile_id,
            limit_type: raw.limit_type,
            reset_time: raw.reset_time,
            retry_after_ms: raw.retry_after_ms,
            matched_pattern: raw.matched_pattern,
        }
    }
}

/// Receives normalised rate-limit notifications (the UI's modal, a log, a channel)
pub trait RateLimitSink: Send + Sync {
    fn notify(&self, event: RateLimitEvent);
}

impl RateLimitSink for mpsc::UnboundedSender<RateLimitEvent> {
    fn notify(&self, event: RateLimitEvent) {
        // Ignore send errors (no receiver)
        let _ = self.send(event);
    }
}

/// Normalises detections from both origins and forwards them to one sink
pub struct RateLimitInterceptor {
    sink: Arc<dyn RateLimitSink>,
}

impl RateLimitInterceptor {
    pub fn new(sink: Arc<dyn RateLimitSink>) -> Self {
        Self { sink }
    }

    /// Normalise and forward one detection.
    ///
    /// An unparseable timestamp falls back to the time of interception: the
    /// notification is still worth showing.
    pub fn intercept(&self, origin: RateLimitOrigin, raw: RawRateLimitPayload) -> RateLimitEvent {
        let detected_at = match raw.detected_at.normalize() {
            Ok(at) => at,
            Err(e) => {
                log::warn!("[RateLimit] {}; using interception time", e);
                Utc::now()
            }
        };
        let event = RateLimitEvent::with_timestamp(origin, raw, detected_at);

        log::info!(
            "[RateLimit] {:?} rate limit from {} (project: {}) at {}",
            event.origin,
            event.source_id,
            event.project_id.as_deref().unwrap_or("-"),
            event.detected_at.to_rfc3339()
        );
        self.sink.notify(event.clone());
        event
    }

    /// Listen for both rate-limit events on `bridge`; dropping the returned set detaches
    pub fn attach(self: &Arc<Self>, bridge: &EventBridge) -> ListenerSet {
        let mut listeners = ListenerSet::new();
        for origin in [RateLimitOrigin::Terminal, RateLimitOrigin::Sdk] {
            let interceptor = Arc::clone(self);
            listeners.push(bridge.register(
                EventName::RateLimit(origin),
                IdentityFilter::Any,
                move |event| {
                    if let BridgeEvent::RateLimit { origin, payload } = event {
                        interceptor.intercept(*origin, payload.clone());
                    }
                    Ok(())
                },
            ));
        }
        listeners
    }
}
