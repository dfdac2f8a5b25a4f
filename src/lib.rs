// Clippy allows for reasonable defaults
// These suppress warnings where the suggested change doesn't improve readability
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::derivable_impls)] // Explicit Default impls can be clearer
#![allow(clippy::field_reassign_with_default)] // Builder pattern is clearer
#![allow(clippy::clone_on_copy)] // .clone() can be clearer than implicit copy
#![allow(clippy::collapsible_if)] // Separate ifs can be more readable

// Module declarations
pub mod bridge;
pub mod config;
pub mod controller;
pub mod events;
pub mod executor;
pub mod logging;
pub mod models;
pub mod projects;
pub mod rate_limit;
pub mod subscriber;
mod utils;

// Re-export models for use by callers
pub use models::*;

pub use bridge::boundary::{run_event_pump, BoundaryError, BoundarySender};
pub use bridge::{EventBridge, EventSink, HandlerError, HandlerResult, ListenerHandle, ListenerSet};
pub use controller::{ControllerError, JobController};
pub use events::{BridgeEvent, EventName, IdentityFilter, ServerEvent};
pub use executor::{BackgroundExecutor, ExecutorError, SimulatedExecutor, SimulationScript};
pub use projects::{InMemoryProjectResolver, ProjectResolver};
pub use rate_limit::{RateLimitEvent, RateLimitInterceptor, RateLimitOrigin, RateLimitSink};
pub use subscriber::{GenerationStore, GenerationViewState, SubscriberAggregator};
pub use utils::truncate_message;
