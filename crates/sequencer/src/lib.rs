//! Per-prospect outreach sequencing: an initial message followed by gated,
//! jittered follow-ups, driven by a durable state machine that survives
//! process restarts without double-sending.

pub mod clock;
pub mod engine;
pub mod executor;
pub mod gate;
pub mod jitter;
pub mod rate_limit;
pub mod state_machine;
pub mod store;
pub mod sweeper;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{DriveOutcome, EngineError, EnrollRequest, Orchestrator, OrchestratorBuilder};
pub use executor::{RetryPolicy, SendResult, StepExecutor};
pub use gate::{GateEvaluator, GateResult};
pub use jitter::JitterGenerator;
pub use rate_limit::{Acquire, AccountRateLimiter};
pub use store::StateStore;
pub use sweeper::Sweeper;
pub use types::{DefinitionError, GateSpec, SequenceDefinition, SequenceRegistry, Step};
