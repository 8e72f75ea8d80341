//! Connection acceptor: one tokio-uring task per accepted stream.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::rc::Rc;

use log::{debug, info, warn};
use tokio_uring::net::TcpListener;

use crate::classify::build_scope;
use crate::error::Result;
use crate::event::{Scope, ScopeKind};
use crate::http::RequestHead;
use crate::session::{Channel, HttpSession, WebSocketSession};
use crate::transport::{ReadBuffer, Transport};

/// Application invoked once per connection.
#[allow(async_fn_in_trait)]
pub trait Application {
    async fn call<C: Channel>(&self, scope: &Scope, channel: &C) -> Result<()>;
}

/// Bind `host:port` and serve connections. Returns only if resolving or
/// binding the address fails.
///
/// Must run inside a tokio-uring runtime, e.g. `tokio_uring::start`.
pub async fn serve<A: Application + 'static>(app: A, host: &str, port: u16) -> io::Result<()> {
    let addr = resolve(host, port)?;
    let listener = TcpListener::bind(addr)?;
    info!("listening on {}", listener.local_addr()?);
    serve_listener(app, listener).await
}

/// Serve connections from an already bound listener. Never returns.
///
/// Accept errors are logged and the loop retries immediately, so a
/// persistent failure such as `EMFILE` spins until it clears.
pub async fn serve_listener<A: Application + 'static>(
    app: A,
    listener: TcpListener,
) -> io::Result<()> {
    let app = Rc::new(app);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        debug!("accepted connection from {peer}");

        let app = Rc::clone(&app);
        tokio_uring::spawn(async move {
            match handle_connection(&*app, stream).await {
                Ok(()) => debug!("connection from {peer} finished"),
                Err(e) if e.is_malformed_input() => debug!("bad input from {peer}: {e}"),
                Err(e) => warn!("connection from {peer} failed: {e}"),
            }
        });
    }
}

/// Read the request head, classify it and run the application on the
/// matching session.
pub async fn handle_connection<A: Application, T: Transport>(app: &A, io: T) -> Result<()> {
    let mut buf = ReadBuffer::new();
    let head = match read_request_head(&mut buf, &io).await {
        Ok(head) => head,
        Err(e) => {
            let _ = io.shutdown();
            return Err(e);
        }
    };

    let content_length = match head.content_length() {
        Ok(len) => len,
        Err(e) => {
            let _ = io.shutdown();
            return Err(e);
        }
    };

    let scope = build_scope(head);
    debug!("{:?} {}", scope.kind, scope.path);
    match scope.kind {
        ScopeKind::Http => {
            let session = HttpSession::new(scope, content_length, io, buf);
            app.call(session.scope(), &session).await
        }
        ScopeKind::WebSocket => {
            let session = WebSocketSession::new(scope, io, buf);
            app.call(session.scope(), &session).await
        }
    }
}

async fn read_request_head<T: Transport>(buf: &mut ReadBuffer, io: &T) -> Result<RequestHead> {
    let raw = buf.read_head(io).await?;
    RequestHead::parse(&raw)
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{host}:{port} did not resolve"),
        )
    })
}
