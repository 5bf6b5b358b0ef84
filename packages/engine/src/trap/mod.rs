// packages/engine/src/trap/mod.rs
//! Trap protocol between the host and a subsystem
//!
//! - **Signal**: the error value a redirected exit raises
//! - **Boundary**: turns an invocation result into an [`Outcome`]
//! - **Handlers**: natives under `sandbox.Trap` plus the rules that route to them
//! - **Sink**: where redirected console output goes
//!
//! ```text
//! core.System.exit(I)V ──rewrite──▶ sandbox.Trap.handleExit(I)V ──▶ TrapSignal
//!                                                                      │
//!                         frames and handlers pass it through ◀────────┘
//!                                                                      │
//!                                                   classify ──▶ Outcome
//! ```

pub mod boundary;
pub mod handlers;
pub mod signal;
pub mod sink;

pub use boundary::{classify, Outcome, SubsystemFailure};
pub use handlers::{TrapHandlers, TRAP_OWNER};
pub use signal::TrapSignal;
pub use sink::{LogSink, QueueSink, SinkStats, TracingSink};
