use std::cell::Cell;

use log::debug;
use tokio::sync::Mutex;

use super::Channel;
use crate::error::{Error, Result};
use crate::event::{InboundEvent, OutboundEvent, Payload, Scope};
use crate::transport::{ReadBuffer, Transport};
use crate::websocket::{self, Opcode};

/// Reported to the application when the peer drops the stream without a
/// close frame (RFC 6455 7.1.5).
const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connecting,
    AcceptPending,
    Open,
    Closing,
    Closed,
}

/// One WebSocket connection, from the pending handshake to close.
///
/// The `101` response is only written once the application accepts.
/// Fragmented messages, ping and pong are not supported.
pub struct WebSocketSession<T> {
    scope: Scope,
    io: T,
    state: Cell<State>,
    reader: Mutex<ReadBuffer>,
    writer: Mutex<()>,
}

impl<T: Transport> WebSocketSession<T> {
    /// `buf` holds any bytes already read past the upgrade request.
    pub fn new(scope: Scope, io: T, buf: ReadBuffer) -> Self {
        Self {
            scope,
            io,
            state: Cell::new(State::Connecting),
            reader: Mutex::new(buf),
            writer: Mutex::new(()),
        }
    }

    fn transition(&self, to: State) {
        let from = self.state.replace(to);
        if from != to {
            debug!("ws {}: {from:?} -> {to:?}", self.scope.path);
        }
    }

    fn close_transport(&self) {
        self.transition(State::Closed);
        let _ = self.io.shutdown();
    }

    fn abort(&self, err: &Error) {
        if self.state.get() != State::Closed {
            debug!("ws {}: aborting: {err}", self.scope.path);
            self.close_transport();
        }
    }

    async fn write(&self, bytes: Vec<u8>) -> Result<()> {
        let (result, _) = self.io.write_all(bytes).await;
        result?;
        Ok(())
    }

    async fn receive_event(&self) -> Result<InboundEvent> {
        let mut reader = self.reader.lock().await;

        match self.state.get() {
            State::Connecting => {
                self.transition(State::AcceptPending);
                return Ok(InboundEvent::WebsocketConnect);
            }
            State::AcceptPending => {
                return Err(Error::ProtocolViolation(
                    "receive before the connection was accepted",
                ));
            }
            State::Closing | State::Closed => return Err(Error::SessionClosed),
            State::Open => {}
        }

        let Some(frame) = reader.read_frame(&self.io).await? else {
            self.close_transport();
            return Ok(InboundEvent::WebsocketDisconnect {
                code: CLOSE_ABNORMAL,
            });
        };

        match frame.opcode {
            Opcode::Text => {
                let text = String::from_utf8(frame.payload)?;
                Ok(InboundEvent::WebsocketReceive {
                    payload: Payload::Text(text),
                })
            }
            Opcode::Binary => Ok(InboundEvent::WebsocketReceive {
                payload: Payload::Binary(frame.payload),
            }),
            Opcode::Close => {
                let code = websocket::close_code(&frame.payload);
                if self.state.get() == State::Open {
                    self.transition(State::Closing);
                }
                Ok(InboundEvent::WebsocketDisconnect { code })
            }
            op @ (Opcode::Continuation | Opcode::Ping | Opcode::Pong) => {
                Err(Error::UnsupportedOpcode(op as u8))
            }
        }
    }

    async fn send_event(&self, event: OutboundEvent) -> Result<()> {
        let _writer = self.writer.lock().await;

        match (self.state.get(), event) {
            (State::Closed, _) => Err(Error::SessionClosed),

            (
                State::Connecting | State::AcceptPending,
                OutboundEvent::WebsocketAccept { subprotocol },
            ) => {
                let response = websocket::handshake_response(
                    &self.scope.http_version,
                    self.scope.header("sec-websocket-key"),
                    subprotocol.as_deref(),
                )?;
                self.write(response).await?;
                self.transition(State::Open);
                Ok(())
            }
            (State::Connecting | State::AcceptPending, OutboundEvent::WebsocketClose { code }) => {
                debug!("ws {}: rejected by application ({code})", self.scope.path);
                self.close_transport();
                Ok(())
            }
            (State::Connecting | State::AcceptPending, _) => Err(Error::ProtocolViolation(
                "expected websocket.accept or websocket.close",
            )),

            (State::Open | State::Closing, OutboundEvent::WebsocketClose { code }) => {
                self.write(websocket::encode_close_frame(code)).await?;
                self.close_transport();
                Ok(())
            }
            (State::Closing, _) => Err(Error::SessionClosed),

            (State::Open, OutboundEvent::WebsocketSend { payload }) => {
                let frame = match payload {
                    Payload::Text(text) => websocket::encode_frame(Opcode::Text, text.as_bytes()),
                    Payload::Binary(data) => websocket::encode_frame(Opcode::Binary, &data),
                };
                self.write(frame).await
            }
            (State::Open, other) => {
                debug!("ws {}: rejected {}", self.scope.path, other.name());
                Err(Error::ProtocolViolation("event not valid on an open websocket"))
            }
        }
    }
}

impl<T: Transport> Channel for WebSocketSession<T> {
    fn scope(&self) -> &Scope {
        &self.scope
    }

    async fn receive(&self) -> Result<InboundEvent> {
        let result = self.receive_event().await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::build_scope;
    use crate::event::ScopeKind;
    use crate::http::RequestHead;
    use crate::transport::mock::MockTransport;
    use crate::websocket::encode_masked_frame;

    const UPGRADE: &str = "GET /socket HTTP/1.1\r\n\
        Host: localhost\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    const ACCEPTED: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
        \r\n";

    async fn session_from(request: &str, frames: Vec<Vec<u8>>) -> WebSocketSession<MockTransport> {
        let mut chunks = vec![request.as_bytes().to_vec()];
        chunks.extend(frames);
        let io = MockTransport::new(chunks);
        let mut buf = ReadBuffer::new();
        let head = RequestHead::parse(&buf.read_head(&io).await.unwrap()).unwrap();
        let scope = build_scope(head);
        assert_eq!(scope.kind, ScopeKind::WebSocket);
        WebSocketSession::new(scope, io, buf)
    }

    async fn open_session(frames: Vec<Vec<u8>>) -> WebSocketSession<MockTransport> {
        let s = session_from(UPGRADE, frames).await;
        assert_eq!(s.receive().await.unwrap(), InboundEvent::WebsocketConnect);
        s.send(OutboundEvent::WebsocketAccept { subprotocol: None })
            .await
            .unwrap();
        s
    }

    #[tokio::test]
    async fn accept_then_text_then_close() {
        let ping = encode_masked_frame(Opcode::Text, b"ping", [1, 2, 3, 4]);
        let s = open_session(vec![ping]).await;
        assert_eq!(s.io.written(), ACCEPTED);

        assert_eq!(
            s.receive().await.unwrap(),
            InboundEvent::WebsocketReceive {
                payload: Payload::Text("ping".into())
            }
        );

        s.send(OutboundEvent::WebsocketClose { code: 1000 })
            .await
            .unwrap();
        let written = s.io.written();
        assert_eq!(&written[ACCEPTED.len()..], &[0x88, 0x02, 0x03, 0xe8]);
        assert!(s.io.shut_down.get());

        assert!(matches!(s.receive().await, Err(Error::SessionClosed)));
        assert!(matches!(
            s.send(OutboundEvent::WebsocketClose { code: 1000 }).await,
            Err(Error::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn handshake_deferred_until_accept() {
        let s = session_from(UPGRADE, Vec::new()).await;
        assert_eq!(s.receive().await.unwrap(), InboundEvent::WebsocketConnect);
        assert!(s.io.written().is_empty());
    }

    #[tokio::test]
    async fn accept_with_subprotocol() {
        let request = UPGRADE.replace("\r\n\r\n", "\r\nSec-WebSocket-Protocol: chat, v2\r\n\r\n");
        let s = session_from(&request, Vec::new()).await;
        assert_eq!(s.scope().subprotocols, vec!["chat", "v2"]);
        s.send(OutboundEvent::WebsocketAccept {
            subprotocol: Some("v2".into()),
        })
        .await
        .unwrap();
        let written = String::from_utf8(s.io.written()).unwrap();
        assert!(written.contains("\r\nSec-WebSocket-Protocol: v2\r\n"));
    }

    #[tokio::test]
    async fn close_before_accept_writes_nothing() {
        let s = session_from(UPGRADE, Vec::new()).await;
        s.receive().await.unwrap();
        s.send(OutboundEvent::WebsocketClose { code: 1000 })
            .await
            .unwrap();
        assert!(s.io.written().is_empty());
        assert!(s.io.shut_down.get());
        assert!(matches!(s.receive().await, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn first_send_must_accept_or_close() {
        let s = session_from(UPGRADE, Vec::new()).await;
        s.receive().await.unwrap();
        let err = s
            .send(OutboundEvent::WebsocketSend {
                payload: Payload::Text("too soon".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert!(s.io.written().is_empty());
    }

    #[tokio::test]
    async fn receive_before_accept_is_a_violation() {
        let s = session_from(UPGRADE, Vec::new()).await;
        s.receive().await.unwrap();
        assert!(matches!(s.receive().await, Err(Error::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn missing_key_fails_accept() {
        let request = UPGRADE.replace("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "");
        let s = session_from(&request, Vec::new()).await;
        s.receive().await.unwrap();
        assert!(matches!(
            s.send(OutboundEvent::WebsocketAccept { subprotocol: None }).await,
            Err(Error::MissingHandshakeKey)
        ));
        assert!(s.io.written().is_empty());
    }

    #[tokio::test]
    async fn binary_and_peer_close() {
        let frames = vec![
            encode_masked_frame(Opcode::Binary, &[0, 159, 255], [9, 9, 9, 9]),
            encode_masked_frame(Opcode::Close, &4001u16.to_be_bytes(), [5, 6, 7, 8]),
        ];
        let s = open_session(frames).await;

        assert_eq!(
            s.receive().await.unwrap(),
            InboundEvent::WebsocketReceive {
                payload: Payload::Binary(vec![0, 159, 255])
            }
        );
        assert_eq!(
            s.receive().await.unwrap(),
            InboundEvent::WebsocketDisconnect { code: 4001 }
        );
        assert!(matches!(
            s.send(OutboundEvent::WebsocketSend {
                payload: Payload::Binary(vec![1])
            })
            .await,
            Err(Error::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn close_reply_after_peer_close() {
        let frames = vec![encode_masked_frame(Opcode::Close, &[], [5, 6, 7, 8])];
        let s = open_session(frames).await;
        assert_eq!(
            s.receive().await.unwrap(),
            InboundEvent::WebsocketDisconnect {
                code: websocket::CLOSE_NO_STATUS
            }
        );
        s.send(OutboundEvent::WebsocketClose { code: 1000 })
            .await
            .unwrap();
        assert!(s.io.written().ends_with(&[0x88, 0x02, 0x03, 0xe8]));
    }

    #[tokio::test]
    async fn server_frames_are_unmasked() {
        let s = open_session(Vec::new()).await;
        s.send(OutboundEvent::WebsocketSend {
            payload: Payload::Text("hello".into()),
        })
        .await
        .unwrap();
        s.send(OutboundEvent::WebsocketSend {
            payload: Payload::Binary(vec![7; 130]),
        })
        .await
        .unwrap();

        let written = s.io.written();
        let frames = &written[ACCEPTED.len()..];
        assert_eq!(&frames[..7], b"\x81\x05hello");
        assert_eq!(&frames[7..11], &[0x82, 126, 0, 130]);
        assert_eq!(frames.len(), 7 + 4 + 130);
    }

    #[tokio::test]
    async fn overlapping_receives_get_whole_frames_in_order() {
        let first = encode_masked_frame(Opcode::Text, b"first", [1, 2, 3, 4]);
        let (head, tail) = first.split_at(4);
        let frames = vec![
            head.to_vec(),
            tail.to_vec(),
            encode_masked_frame(Opcode::Text, b"second", [4, 3, 2, 1]),
        ];
        let s = open_session(frames).await;

        let (a, b) = tokio::join!(s.receive(), s.receive());
        assert_eq!(
            a.unwrap(),
            InboundEvent::WebsocketReceive {
                payload: Payload::Text("first".into())
            }
        );
        assert_eq!(
            b.unwrap(),
            InboundEvent::WebsocketReceive {
                payload: Payload::Text("second".into())
            }
        );
    }

    #[tokio::test]
    async fn overlapping_sends_write_whole_frames_in_order() {
        let s = open_session(Vec::new()).await;
        let text = |t: &str| OutboundEvent::WebsocketSend {
            payload: Payload::Text(t.into()),
        };

        let (a, b) = tokio::join!(s.send(text("x")), s.send(text("y")));
        a.unwrap();
        b.unwrap();
        assert_eq!(&s.io.written()[ACCEPTED.len()..], b"\x81\x01x\x81\x01y");
    }

    #[tokio::test]
    async fn invalid_utf8_aborts() {
        let frames = vec![encode_masked_frame(Opcode::Text, &[0xff, 0xfe], [1, 1, 1, 1])];
        let s = open_session(frames).await;
        assert!(matches!(s.receive().await, Err(Error::InvalidUtf8(_))));
        assert!(s.io.shut_down.get());
        assert!(matches!(s.receive().await, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn ping_is_unsupported() {
        let frames = vec![encode_masked_frame(Opcode::Ping, b"hb", [1, 2, 3, 4])];
        let s = open_session(frames).await;
        assert!(matches!(s.receive().await, Err(Error::UnsupportedOpcode(0x9))));
        assert!(s.io.shut_down.get());
    }

    #[tokio::test]
    async fn peer_vanishing_reports_abnormal_close() {
        let s = open_session(Vec::new()).await;
        assert_eq!(
            s.receive().await.unwrap(),
            InboundEvent::WebsocketDisconnect {
                code: CLOSE_ABNORMAL
            }
        );
        assert!(matches!(
            s.send(OutboundEvent::WebsocketClose { code: 1000 }).await,
            Err(Error::SessionClosed)
        ));
    }
}
