// Data models shared by the controller, the bridge and subscribers

pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which generation lifecycle (and event namespace) a job belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Roadmap,
    Ideation,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Roadmap, JobKind::Ideation];

    /// Prefix used for wire event names, e.g. `roadmap:progress`
    pub fn namespace(self) -> &'static str {
        match self {
            JobKind::Roadmap => "roadmap",
            JobKind::Ideation => "ideation",
        }
    }

    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            "roadmap" => Some(JobKind::Roadmap),
            "ideation" => Some(JobKind::Ideation),
            _ => None,
        }
    }

    /// Message carried by the synthetic status emitted when a run is handed to the executor
    pub fn started_message(self, is_refresh: bool) -> &'static str {
        match (self, is_refresh) {
            (JobKind::Roadmap, false) => "Analyzing project structure...",
            (JobKind::Roadmap, true) => "Refreshing roadmap...",
            (JobKind::Ideation, false) => "Analyzing project for ideation...",
            (JobKind::Ideation, true) => "Refreshing ideation...",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Key of one lifecycle instance: at most one live run per identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct JobIdentity {
    pub project_id: String,
    pub kind: JobKind,
}

impl JobIdentity {
    pub fn new(project_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            project_id: project_id.into(),
            kind,
        }
    }

    pub fn roadmap(project_id: impl Into<String>) -> Self {
        Self::new(project_id, JobKind::Roadmap)
    }

    pub fn ideation(project_id: impl Into<String>) -> Self {
        Self::new(project_id, JobKind::Ideation)
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.kind)
    }
}

/// Coarse lifecycle stage of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    #[default]
    Idle,
    Analyzing,
    Generating,
    Complete,
    Error,
}

/// Phase, progress and message of one job.
///
/// `error` is present if and only if `phase` is [`GenerationPhase::Error`];
/// the constructors below are the only way the crate builds a status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    pub phase: GenerationPhase,
    /// 0-100
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Non-terminal, non-error status. `Error` phases go through [`GenerationStatus::failed`].
    pub fn in_phase(phase: GenerationPhase, progress: u8, message: impl Into<String>) -> Self {
        debug_assert!(phase != GenerationPhase::Error);
        Self {
            phase,
            progress: progress.min(100),
            message: message.into(),
            error: None,
        }
    }

    pub fn complete() -> Self {
        Self::in_phase(GenerationPhase::Complete, 100, "Generation complete")
    }

    pub fn failed(progress: u8, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            phase: GenerationPhase::Error,
            progress: progress.min(100),
            message: error.clone(),
            error: Some(error),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == GenerationPhase::Idle
    }

    /// True when `error` matches `phase`
    pub fn is_consistent(&self) -> bool {
        (self.phase == GenerationPhase::Error) == self.error.is_some()
    }
}

/// Options for one generation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Roadmap only: run competitor analysis before generating
    #[serde(default)]
    pub competitor_analysis: bool,
    /// Ideation only: which idea categories to generate (empty means all)
    #[serde(default)]
    pub ideation_types: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Set by `refresh`, never by callers of `start`
    #[serde(default)]
    pub refresh: bool,
}

impl GenerationConfig {
    pub fn with_competitor_analysis(mut self, enabled: bool) -> Self {
        self.competitor_analysis = enabled;
        self
    }

    /// Feature flags that apply to `kind`, for logging
    pub fn enabled_features(&self, kind: JobKind) -> Vec<String> {
        match kind {
            JobKind::Roadmap if self.competitor_analysis => {
                vec!["competitor_analysis".to_string()]
            }
            JobKind::Roadmap => Vec::new(),
            JobKind::Ideation => self.ideation_types.clone(),
        }
    }
}

/// Payload produced when a run reaches `complete` (a roadmap document or an ideation set)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub kind: JobKind,
    pub document: serde_json::Value,
}

/// A project as returned by the project resolver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: String,
}
