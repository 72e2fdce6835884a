//! `hunt_server`
//!
//! Server-side systems:
//! - Game rules: 3x3 grid, login table, hint/suggest rationing, scoring
//! - Round timer driven by the transport poll loop
//! - Blocking broadcast fan-out over the reliable transport

pub mod game;
pub mod server;

pub use server::HuntServer;
