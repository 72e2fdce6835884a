//! `hunt_client`
//!
//! Client-side systems:
//! - Reliable command sends to one configured server
//! - A background reader that keeps acking and printing server messages
//!   while the console waits for input

pub mod client;

pub use client::HuntClient;
