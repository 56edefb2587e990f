pub mod cli;
pub mod context;
pub mod error;
pub mod grouping;
pub mod messages;
pub mod orchestrator;
pub mod replay;
pub mod report;

pub use context::RunContext;
pub use error::RewriteError;
pub use messages::MessagePlanner;
pub use orchestrator::{RewriteOrchestrator, SCRATCH_REF_PREFIX, scratch_ref_for};
pub use report::{PushOutcome, RewritePlan, RewriteReport, StatusReport};
