//! `hunt_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - One symmetric reliable transport; no client/server roles below the game.
//! - Deterministic where practical (seedable loss and treasure randomness).
//! - Clear separation of concerns (codec, loss, transport, config).
//! - No `unsafe`.

pub mod codec;
pub mod config;
pub mod loss;
pub mod transport;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::codec::*;
    pub use crate::config::*;
    pub use crate::loss::*;
    pub use crate::transport::*;
}
