//! Consultation orchestration
//!
//! Routing, per-consultation turn locks, the task board, checkpoints and
//! the [`Orchestrator`] that ties agents, tools, bus, store and audit
//! together.

pub mod builder;
pub mod checkpoint;
pub mod dispatch;
pub mod engine;
pub mod locks;
pub mod routing;
pub mod tasks;

pub use builder::OrchestratorBuilder;
pub use checkpoint::Checkpoint;
pub use dispatch::{AgentRunner, RunOutcome};
pub use engine::{Orchestrator, ResidentState};
pub use locks::TurnLocks;
pub use routing::{DispatchPlan, RoutingDecision, RoutingMode, RoutingPolicy};
pub use tasks::{TaskBoard, TaskStats};
