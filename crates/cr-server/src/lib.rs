//! cr-server: clipboard relay server
//!
//! Devices hold one WebSocket each to the relay. A [`session::Session`] runs
//! the register/ready handshake for its link, and the [`router::Router`]
//! fans clipboard changes out to every other device of the same user.
//! REST endpoints on the same listener let scripts push and pull content.

pub mod http;
pub mod router;
pub mod session;
pub mod state;

pub use http::RelayServer;
pub use router::{RoutedMessage, Router, RouterHandle, SessionHandle, SessionKey};
pub use session::{Session, SessionError, SessionState};
pub use state::ServerState;
