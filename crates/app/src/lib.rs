//! `docqa` web UI: per-session document upload, chunk viewing and question
//! answering over HTTP.

pub mod server;

pub use server::{app_router, run_server, spawn_session_sweeper, AppState, ServerConfig};
