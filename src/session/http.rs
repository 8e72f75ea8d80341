use std::cell::Cell;

use log::debug;
use tokio::sync::Mutex;

use super::Channel;
use crate::error::{Error, Result};
use crate::event::{InboundEvent, OutboundEvent, Scope};
use crate::http::encode_response_head;
use crate::transport::{ReadBuffer, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingApplication,
    ResponseStarted,
    ResponseComplete,
    Aborted,
}

/// One HTTP request/response exchange.
///
/// The response head is held back until the first body event. If the
/// application never sends a final (`more: false`) body, the connection
/// stays open for as long as the application keeps running.
pub struct HttpSession<T> {
    scope: Scope,
    io: T,
    content_length: usize,
    state: Cell<State>,
    reader: Mutex<Reader>,
    /// Encoded response head waiting for the first body event.
    pending_head: Mutex<Option<Vec<u8>>>,
}

struct Reader {
    buf: ReadBuffer,
    body_delivered: bool,
}

impl<T: Transport> HttpSession<T> {
    /// `buf` holds any bytes already read past the request head.
    pub fn new(scope: Scope, content_length: usize, io: T, buf: ReadBuffer) -> Self {
        Self {
            scope,
            io,
            content_length,
            state: Cell::new(State::AwaitingApplication),
            reader: Mutex::new(Reader {
                buf,
                body_delivered: false,
            }),
            pending_head: Mutex::new(None),
        }
    }

    fn is_closed(&self) -> bool {
        matches!(self.state.get(), State::ResponseComplete | State::Aborted)
    }

    fn abort(&self, err: &Error) {
        if self.is_closed() {
            return;
        }
        debug!("http {}: aborting: {err}", self.scope.path);
        self.state.set(State::Aborted);
        let _ = self.io.shutdown();
    }

    async fn write(&self, bytes: Vec<u8>) -> Result<()> {
        let (result, _) = self.io.write_all(bytes).await;
        result?;
        Ok(())
    }

    async fn receive_body(&self) -> Result<InboundEvent> {
        let mut reader = self.reader.lock().await;
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        if reader.body_delivered {
            return Err(Error::ProtocolViolation("request body already received"));
        }
        let body = reader.buf.read_body(&self.io, self.content_length).await?;
        reader.body_delivered = true;
        Ok(InboundEvent::HttpRequestBody { body, more: false })
    }

    async fn send_event(&self, event: OutboundEvent) -> Result<()> {
        let mut pending = self.pending_head.lock().await;
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        match event {
            OutboundEvent::HttpResponseStart { status, headers } => {
                if pending.is_some() || self.state.get() == State::ResponseStarted {
                    return Err(Error::ProtocolViolation("response already started"));
                }
                let head = encode_response_head(&self.scope.http_version, status, &headers)?;
                *pending = Some(head);
                Ok(())
            }
            OutboundEvent::HttpResponseBody { body, more } => {
                let bytes = match pending.take() {
                    Some(mut head) => {
                        head.extend_from_slice(&body);
                        head
                    }
                    None if self.state.get() == State::ResponseStarted => body,
                    None => {
                        return Err(Error::ProtocolViolation(
                            "response body sent before response start",
                        ));
                    }
                };
                self.state.set(State::ResponseStarted);
                if !bytes.is_empty() {
                    self.write(bytes).await?;
                }
                if !more {
                    debug!("http {}: response complete", self.scope.path);
                    self.state.set(State::ResponseComplete);
                    let _ = self.io.shutdown();
                }
                Ok(())
            }
            other => {
                debug!("http {}: rejected {}", self.scope.path, other.name());
                Err(Error::ProtocolViolation("websocket event on an http connection"))
            }
        }
    }
}

impl<T: Transport> Channel for HttpSession<T> {
    fn scope(&self) -> &Scope {
        &self.scope
    }

    async fn receive(&self) -> Result<InboundEvent> {
        let result = self.receive_body().await;
        if let Err(err) = &result {
            self.abort(err);
        }
        result
    }

    async fn send(&self, event: OutboundEvent) -> Result<()> {
        let result = self.send_event(event).await;
        if let Err(err) = &result {
            self.abort(err);
        }
        result
    }
}
