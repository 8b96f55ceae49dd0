//! Docker-host mirror backend: consumes the engine event stream, reconciles
//! a persistent container mirror against live state on a schedule, and
//! coordinates image pulls and registry update checks.

pub mod cli;
pub mod config;
pub mod engine;
pub mod events;
pub mod image;
pub mod notify;
pub mod store;
pub mod sync;
