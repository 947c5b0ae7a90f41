//! Real-time delivery: the session registry that fans engine events out to
//! sockets, and the per-socket command loop.

pub mod connection;
pub mod hub;

pub use connection::handle_connection;
pub use hub::BroadcastHub;
