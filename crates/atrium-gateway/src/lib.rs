//! Real-time side of Atrium: who is connected, how a connection is
//! authenticated, and how events reach every session of a user.

pub mod connection;
pub mod dispatcher;
pub mod handshake;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use registry::{ConnectionId, SessionGuard, SessionRegistry};
