//! Waymark Engine library.
//!
//! All server-side code for the Waymark experience runtime.
//!
//! ## Structure
//!
//! - `infrastructure/` - external dependency implementations (ports + adapters):
//!   configuration, event bus, auth, chat client, and the file-backed state store
//! - `use_cases/` - AOI building and command dispatch/handling
//! - `api/` - WebSocket session endpoint, connection registry, gateway tunnel
//! - `app` - application composition

pub mod api;
pub mod app;
pub mod infrastructure;
pub mod use_cases;

/// End-to-end scenarios over a fully wired App.
#[cfg(test)]
mod e2e_tests;

pub use app::App;
