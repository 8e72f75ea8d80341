//! Per-connection sessions presenting HTTP and WebSocket through one
//! receive/send contract.
//!
//! Each half (receive, send) is serialized by its own lock; a second caller
//! on the same half waits for the first. Any failing call tears the
//! connection down, and later calls fail with [`Error::SessionClosed`].
//!
//! [`Error::SessionClosed`]: crate::Error::SessionClosed

mod http;
mod ws;

pub use http::HttpSession;
pub use ws::WebSocketSession;

use crate::error::Result;
use crate::event::{InboundEvent, OutboundEvent, Scope};

/// The application's view of one connection.
#[allow(async_fn_in_trait)]
pub trait Channel {
    fn scope(&self) -> &Scope;

    /// Next inbound event.
    async fn receive(&self) -> Result<InboundEvent>;

    /// Emit one outbound event; returns once its bytes (if any) are written.
    async fn send(&self, event: OutboundEvent) -> Result<()>;
}
