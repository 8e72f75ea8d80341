//! HTTP/1.x request head decoding and response head encoding.
//!
//! Only the head is handled here. The body is read by the session on demand,
//! sized by `content-length`.

use crate::error::{Error, Result};
use crate::event::Headers;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Decoded request line and header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub query: Vec<u8>,
    /// Version without the `HTTP/` prefix, e.g. `1.1`.
    pub http_version: String,
    pub headers: Headers,
}

impl RequestHead {
    /// Parse a request head. `head` must contain the blank line ending the
    /// header block; anything after it is ignored.
    pub fn parse(head: &[u8]) -> Result<Self> {
        let mut lines = Lines { rest: head };

        let request_line = lines.next().ok_or(Error::IncompleteRequest)?;
        let (method, target, version) = parse_request_line(request_line)?;
        let (path, query) = match target.iter().position(|&b| b == b'?') {
            Some(i) => (&target[..i], target[i + 1..].to_vec()),
            None => (target, Vec::new()),
        };

        let mut headers = Vec::new();
        loop {
            let line = lines.next().ok_or(Error::IncompleteRequest)?;
            if line.is_empty() {
                break;
            }
            headers.push(parse_header_line(line)?);
        }

        Ok(Self {
            method: latin1(method),
            path: latin1(path),
            query,
            http_version: version,
            headers,
        })
    }

    /// All values of header `name` (already lowercase), in order.
    pub fn header_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a [u8]> {
        self.headers
            .iter()
            .filter(move |(n, _)| n.as_slice() == name.as_bytes())
            .map(|(_, v)| v.as_slice())
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.header_values(name).next()
    }

    /// Declared body length; a missing header means an empty body.
    pub fn content_length(&self) -> Result<usize> {
        match self.header("content-length") {
            None => Ok(0),
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| {
                    Error::MalformedHeaderLine(format!("content-length: {}", latin1(raw)))
                }),
        }
    }
}

/// Offset just past the blank line ending the head, if the buffer holds one.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|i| i + HEAD_TERMINATOR.len())
}

/// Encode `HTTP/<version> <status> <reason>` plus headers and the blank line.
pub fn encode_response_head(
    version: &str,
    status: u16,
    headers: &[(Vec<u8>, Vec<u8>)],
) -> Result<Vec<u8>> {
    let reason = reason_phrase(status).ok_or(Error::UnknownStatusCode(status))?;

    let mut out = format!("HTTP/{version} {status} {reason}\r\n").into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(name);
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    Ok(out)
}

pub fn reason_phrase(status: u16) -> Option<&'static str> {
    let reason = match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a teapot",
        422 => "Unprocessable Entity",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => return None,
    };
    Some(reason)
}

fn parse_request_line(line: &[u8]) -> Result<(&[u8], &[u8], String)> {
    let malformed = || Error::MalformedRequestLine(latin1(line));

    let parts: Vec<&[u8]> = line.split(|&b| b == b' ').collect();
    let &[method, target, protocol] = parts.as_slice() else {
        return Err(malformed());
    };
    if method.is_empty() || target.is_empty() {
        return Err(malformed());
    }
    let version = protocol.strip_prefix(b"HTTP/").ok_or_else(malformed)?;
    if version.is_empty() {
        return Err(malformed());
    }
    Ok((method, target, latin1(version)))
}

fn parse_header_line(line: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let sep = line
        .windows(2)
        .position(|w| w == b": ")
        .ok_or_else(|| Error::MalformedHeaderLine(latin1(line)))?;
    Ok((line[..sep].to_ascii_lowercase(), line[sep + 2..].to_vec()))
}

/// Request heads are Latin-1, so every byte maps to exactly one char.
pub(crate) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// CRLF-terminated lines; a trailing fragment without CRLF is not yielded.
struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let end = self.rest.windows(2).position(|w| w == b"\r\n")?;
        let line = &self.rest[..end];
        self.rest = &self.rest[end + 2..];
        Some(line)
    }
}
