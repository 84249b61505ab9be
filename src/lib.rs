//! Desktop companion core for the supervised engine.
//!
//! This crate launches the external engine binary, waits for it to come up,
//! authenticates against its API, and mirrors the engine's live session
//! state into an in-memory store the window layer renders from. The window
//! layer and the wire transport stay behind traits ([`runtime::UiRuntime`]
//! and [`api::EngineApi`]).

pub mod api;
pub mod config;
pub mod error;
pub mod process;
pub mod runtime;
pub mod settings;
pub mod state;
pub mod store;

pub use error::{CoredeckError, Result};
pub use state::AppState;

/// Initialize logging for the application.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coredeck=debug".parse().unwrap()),
        )
        .init();
}
