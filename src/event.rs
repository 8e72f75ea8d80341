//! Connection scope and the events exchanged with the application.

/// Header list: lowercase names, raw values, insertion order, duplicates kept.
pub type Headers = Vec<(Vec<u8>, Vec<u8>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Http,
    WebSocket,
}

/// Per-connection metadata handed to the application. Never mutated after
/// the classifier builds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub kind: ScopeKind,
    pub http_version: String,
    /// Request method; `None` for WebSocket scopes.
    pub method: Option<String>,
    pub scheme: String,
    pub path: String,
    pub query: Vec<u8>,
    pub headers: Headers,
    /// Requested subprotocols; empty for HTTP scopes.
    pub subprotocols: Vec<String>,
}

impl Scope {
    /// First value of the header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| v.as_slice())
    }

    /// Raw query string without the leading `?`.
    pub fn query_string(&self) -> &[u8] {
        &self.query
    }
}

/// WebSocket message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    HttpRequestBody { body: Vec<u8>, more: bool },
    WebsocketConnect,
    WebsocketReceive { payload: Payload },
    WebsocketDisconnect { code: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    HttpResponseStart { status: u16, headers: Headers },
    HttpResponseBody { body: Vec<u8>, more: bool },
    WebsocketAccept { subprotocol: Option<String> },
    WebsocketSend { payload: Payload },
    WebsocketClose { code: u16 },
}

impl OutboundEvent {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            OutboundEvent::HttpResponseStart { .. } => "http.response.start",
            OutboundEvent::HttpResponseBody { .. } => "http.response.body",
            OutboundEvent::WebsocketAccept { .. } => "websocket.accept",
            OutboundEvent::WebsocketSend { .. } => "websocket.send",
            OutboundEvent::WebsocketClose { .. } => "websocket.close",
        }
    }
}
