//! Single-port HTTP and WebSocket gateway on io_uring.
//!
//! Raw TCP connections are classified from their request head and bridged
//! to an [`Application`] through one contract: a [`Scope`] plus a
//! [`Channel`] to receive inbound and send outbound events.

pub mod classify;
pub mod error;
pub mod event;
pub mod http;
pub mod server;
pub mod session;
pub mod transport;
pub mod websocket;

pub use error::{Error, Result};
pub use event::{Headers, InboundEvent, OutboundEvent, Payload, Scope, ScopeKind};
pub use server::{Application, handle_connection, serve, serve_listener};
pub use session::{Channel, HttpSession, WebSocketSession};
pub use transport::Transport;
