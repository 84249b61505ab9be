//! Supervision of the external engine process.
//!
//! One engine instance per application run: spawned with a generated config,
//! gated on a readiness marker in its stdout, and shut down with SIGINT plus
//! a three-way join (process exit, stdout EOF, stderr EOF) so the captured
//! logs are never truncated by a still-flushing pipe.

mod join;
mod port;
mod supervisor;

pub use join::ShutdownJoin;
pub use port::{pick_port, CANDIDATE_PORTS};
pub use supervisor::{CoreSupervisor, EngineState, HandoffPayload};
