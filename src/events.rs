// Event names, payload structures and the typed event vocabulary.
// Events cross the process boundary as `ServerEvent` envelopes and are
// dispatched locally as `BridgeEvent`s.

use crate::models::{GenerationResult, GenerationStatus, JobIdentity, JobKind};
use crate::rate_limit::{RateLimitOrigin, RawRateLimitPayload};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// Event name constants
pub const EVENT_ROADMAP_PROGRESS: &str = "roadmap:progress";
pub const EVENT_ROADMAP_COMPLETE: &str = "roadmap:complete";
pub const EVENT_ROADMAP_ERROR: &str = "roadmap:error";
pub const EVENT_ROADMAP_STOPPED: &str = "roadmap:stopped";

pub const EVENT_IDEATION_PROGRESS: &str = "ideation:progress";
pub const EVENT_IDEATION_COMPLETE: &str = "ideation:complete";
pub const EVENT_IDEATION_ERROR: &str = "ideation:error";
pub const EVENT_IDEATION_STOPPED: &str = "ideation:stopped";

// Rate limit side channel
pub const EVENT_RATE_LIMIT_TERMINAL: &str = "rate_limit:terminal";
pub const EVENT_RATE_LIMIT_SDK: &str = "rate_limit:sdk";

/// Name of a bridge event; what listeners register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Progress(JobKind),
    Complete(JobKind),
    Error(JobKind),
    Stopped(JobKind),
    RateLimit(RateLimitOrigin),
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Progress(JobKind::Roadmap) => EVENT_ROADMAP_PROGRESS,
            EventName::Complete(JobKind::Roadmap) => EVENT_ROADMAP_COMPLETE,
            EventName::Error(JobKind::Roadmap) => EVENT_ROADMAP_ERROR,
            EventName::Stopped(JobKind::Roadmap) => EVENT_ROADMAP_STOPPED,
            EventName::Progress(JobKind::Ideation) => EVENT_IDEATION_PROGRESS,
            EventName::Complete(JobKind::Ideation) => EVENT_IDEATION_COMPLETE,
            EventName::Error(JobKind::Ideation) => EVENT_IDEATION_ERROR,
            EventName::Stopped(JobKind::Ideation) => EVENT_IDEATION_STOPPED,
            EventName::RateLimit(RateLimitOrigin::Terminal) => EVENT_RATE_LIMIT_TERMINAL,
            EventName::RateLimit(RateLimitOrigin::Sdk) => EVENT_RATE_LIMIT_SDK,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        if let Some(origin) = RateLimitOrigin::from_event_name(name) {
            return Some(EventName::RateLimit(origin));
        }

        let (namespace, suffix) = name.split_once(':')?;
        let kind = JobKind::from_namespace(namespace)?;
        match suffix {
            "progress" => Some(EventName::Progress(kind)),
            "complete" => Some(EventName::Complete(kind)),
            "error" => Some(EventName::Error(kind)),
            "stopped" => Some(EventName::Stopped(kind)),
            _ => None,
        }
    }

    /// The four job events of one kind, in lifecycle order
    pub fn job_events(kind: JobKind) -> [EventName; 4] {
        [
            EventName::Progress(kind),
            EventName::Complete(kind),
            EventName::Error(kind),
            EventName::Stopped(kind),
        ]
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One occurrence delivered by the event bridge.
///
/// Results are shared behind an `Arc` so every matching listener sees the
/// same payload without the producer keeping a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Progress {
        identity: JobIdentity,
        status: GenerationStatus,
    },
    Complete {
        identity: JobIdentity,
        result: Arc<GenerationResult>,
    },
    Error {
        identity: JobIdentity,
        error: String,
    },
    Stopped {
        identity: JobIdentity,
    },
    RateLimit {
        origin: RateLimitOrigin,
        payload: RawRateLimitPayload,
    },
}

impl BridgeEvent {
    pub fn name(&self) -> EventName {
        match self {
            BridgeEvent::Progress { identity, .. } => EventName::Progress(identity.kind),
            BridgeEvent::Complete { identity, .. } => EventName::Complete(identity.kind),
            BridgeEvent::Error { identity, .. } => EventName::Error(identity.kind),
            BridgeEvent::Stopped { identity } => EventName::Stopped(identity.kind),
            BridgeEvent::RateLimit { origin, .. } => EventName::RateLimit(*origin),
        }
    }

    /// Job identity for job events; rate-limit events have none
    pub fn identity(&self) -> Option<&JobIdentity> {
        match self {
            BridgeEvent::Progress { identity, .. }
            | BridgeEvent::Complete { identity, .. }
            | BridgeEvent::Error { identity, .. }
            | BridgeEvent::Stopped { identity } => Some(identity),
            BridgeEvent::RateLimit { .. } => None,
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        match self {
            BridgeEvent::RateLimit { payload, .. } => payload.project_id.as_deref(),
            other => other.identity().map(|identity| identity.project_id.as_str()),
        }
    }

    /// Encode into the envelope that crosses the process boundary
    pub fn to_server_event(&self) -> Result<ServerEvent, serde_json::Error> {
        let payload = match self {
            BridgeEvent::Progress { identity, status } => serde_json::to_value(ProgressPayload {
                project_id: identity.project_id.clone(),
                status: status.clone(),
            })?,
            BridgeEvent::Complete { identity, result } => serde_json::to_value(CompletePayload {
                project_id: identity.project_id.clone(),
                result: result.as_ref().clone(),
            })?,
            BridgeEvent::Error { identity, error } => serde_json::to_value(ErrorPayload {
                project_id: identity.project_id.clone(),
                error: error.clone(),
            })?,
            BridgeEvent::Stopped { identity } => serde_json::to_value(StoppedPayload {
                project_id: identity.project_id.clone(),
            })?,
            BridgeEvent::RateLimit { payload, .. } => serde_json::to_value(payload)?,
        };

        Ok(ServerEvent {
            event: self.name().as_str().to_string(),
            payload,
        })
    }

    /// Decode an envelope received from the other side of the boundary
    pub fn from_server_event(event: ServerEvent) -> Result<Self, EventDecodeError> {
        let name = EventName::parse(&event.event)
            .ok_or_else(|| EventDecodeError::UnknownEvent(event.event.clone()))?;

        let decoded = match name {
            EventName::Progress(kind) => {
                let payload: ProgressPayload = serde_json::from_value(event.payload)?;
                BridgeEvent::Progress {
                    identity: JobIdentity::new(payload.project_id, kind),
                    status: payload.status,
                }
            }
            EventName::Complete(kind) => {
                let payload: CompletePayload = serde_json::from_value(event.payload)?;
                BridgeEvent::Complete {
                    identity: JobIdentity::new(payload.project_id, kind),
                    result: Arc::new(payload.result),
                }
            }
            EventName::Error(kind) => {
                let payload: ErrorPayload = serde_json::from_value(event.payload)?;
                BridgeEvent::Error {
                    identity: JobIdentity::new(payload.project_id, kind),
                    error: payload.error,
                }
            }
            EventName::Stopped(kind) => {
                let payload: StoppedPayload = serde_json::from_value(event.payload)?;
                BridgeEvent::Stopped {
                    identity: JobIdentity::new(payload.project_id, kind),
                }
            }
            EventName::RateLimit(origin) => BridgeEvent::RateLimit {
                origin,
                payload: serde_json::from_value(event.payload)?,
            },
        };

        Ok(decoded)
    }
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Which occurrences a listener wants to see
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityFilter {
    #[default]
    Any,
    Project(String),
    Job(JobIdentity),
}

impl IdentityFilter {
    pub fn matches(&self, event: &BridgeEvent) -> bool {
        match self {
            IdentityFilter::Any => true,
            IdentityFilter::Project(project_id) => event.project_id() == Some(project_id.as_str()),
            IdentityFilter::Job(wanted) => match event.identity() {
                Some(identity) => identity == wanted,
                // Rate-limit payloads carry only a project
                None => event.project_id() == Some(wanted.project_id.as_str()),
            },
        }
    }
}

/// Envelope for an event crossing the process boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    /// Event type (e.g., "roadmap:progress", "rate_limit:sdk")
    pub event: String,
    /// Event payload as JSON value
    pub payload: serde_json::Value,
}

/// Payload for progress events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub project_id: String,
    pub status: GenerationStatus,
}

/// Payload for complete events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub project_id: String,
    pub result: GenerationResult,
}

/// Payload for error events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub project_id: String,
    pub error: String,
}

/// Payload for stopped events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedPayload {
    pub project_id: String,
}
