//! Decide whether a request stays plain HTTP or upgrades to WebSocket, and
//! build the connection scope.

use crate::event::{Scope, ScopeKind};
use crate::http::{RequestHead, latin1};

pub fn classify(head: &RequestHead) -> ScopeKind {
    let connection_upgrade = head
        .header_values("connection")
        .any(|v| contains_ignore_case(v, b"upgrade"));
    let upgrade_websocket = head
        .header("upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case(b"websocket"));

    if head.method == "GET" && connection_upgrade && upgrade_websocket {
        ScopeKind::WebSocket
    } else {
        ScopeKind::Http
    }
}

/// Split every `sec-websocket-protocol` header on commas into trimmed,
/// non-empty tokens, keeping the client's order.
pub fn parse_subprotocols(head: &RequestHead) -> Vec<String> {
    head.header_values("sec-websocket-protocol")
        .flat_map(|v| v.split(|&b| b == b','))
        .map(|token| latin1(token.trim_ascii()))
        .filter(|token| !token.is_empty())
        .collect()
}

pub fn build_scope(head: RequestHead) -> Scope {
    let kind = classify(&head);
    let (method, scheme, subprotocols) = match kind {
        ScopeKind::Http => (Some(head.method), "http", Vec::new()),
        ScopeKind::WebSocket => (None, "ws", parse_subprotocols(&head)),
    };

    Scope {
        kind,
        http_version: head.http_version,
        method,
        scheme: scheme.to_string(),
        path: head.path,
        query: head.query,
        headers: head.headers,
        subprotocols,
    }
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(raw: &str) -> RequestHead {
        RequestHead::parse(raw.as_bytes()).unwrap()
    }

    const UPGRADE: &str = "GET /chat?room=1 HTTP/1.1\r\n\
        Host: example.com\r\n\
        Upgrade: WebSocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Protocol: chat, superchat\r\n\
        Sec-WebSocket-Protocol: ,json \r\n\
        \r\n";

    #[test]
    fn upgrade_request_is_websocket() {
        let scope = build_scope(head(UPGRADE));
        assert_eq!(scope.kind, ScopeKind::WebSocket);
        assert_eq!(scope.scheme, "ws");
        assert_eq!(scope.method, None);
        assert_eq!(scope.path, "/chat");
        assert_eq!(scope.query, b"room=1");
        assert_eq!(scope.subprotocols, vec!["chat", "superchat", "json"]);
    }

    #[test]
    fn plain_requests_stay_http() {
        for raw in [
            "GET / HTTP/1.1\r\nHost: a\r\n\r\n",
            "POST / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
            "GET / HTTP/1.1\r\nUpgrade: h2c\r\nConnection: Upgrade\r\n\r\n",
            "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: close\r\n\r\n",
        ] {
            assert_eq!(classify(&head(raw)), ScopeKind::Http, "{raw:?}");
        }
    }

    #[test]
    fn subprotocols_decoded_as_latin1() {
        let raw = b"GET / HTTP/1.1\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Protocol: caf\xe9, v1\r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();
        assert_eq!(parse_subprotocols(&head), vec!["caf\u{e9}", "v1"]);
    }

    #[test]
    fn http_scope_keeps_method_and_headers() {
        let scope = build_scope(head("DELETE /x HTTP/1.1\r\nX-A: 1\r\nX-A: 2\r\n\r\n"));
        assert_eq!(scope.kind, ScopeKind::Http);
        assert_eq!(scope.scheme, "http");
        assert_eq!(scope.method.as_deref(), Some("DELETE"));
        assert_eq!(scope.headers.len(), 2);
        assert!(scope.subprotocols.is_empty());
    }
}
