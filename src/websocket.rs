//! WebSocket framing and opening handshake (RFC 6455)
//!
//! Pure transforms over byte buffers; the session owns all I/O.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::http;

/// WebSocket GUID used in handshake (RFC 6455)
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Close code reported when a close frame carries no status (RFC 6455 7.1.5)
pub const CLOSE_NO_STATUS: u16 = 1005;

/// WebSocket opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }
}

/// One decoded frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload_length: u64,
    pub masking_key: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Decode one frame from the front of `data`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the frame and
    /// the number of bytes it occupied. Continuation frames are not
    /// reassembled; a `fin=false` frame is returned as-is.
    pub fn parse(data: &[u8]) -> Result<Option<(Frame, usize)>> {
        if data.len() < 2 {
            return Ok(None);
        }

        let fin = data[0] & 0x80 != 0;
        let raw_opcode = data[0] & 0x0F;
        let opcode = Opcode::from_u8(raw_opcode).ok_or(Error::UnsupportedOpcode(raw_opcode))?;
        let masked = data[1] & 0x80 != 0;
        let length_byte = data[1] & 0x7F;

        // Extended lengths are network byte order.
        let (payload_length, mut header_len) = match length_byte {
            126 => {
                let Some(ext) = data.get(2..4) else {
                    return Ok(None);
                };
                (u64::from(u16::from_be_bytes([ext[0], ext[1]])), 4)
            }
            127 => {
                let Some(ext) = data.get(2..10) else {
                    return Ok(None);
                };
                let mut be = [0u8; 8];
                be.copy_from_slice(ext);
                (u64::from_be_bytes(be), 10)
            }
            n => (u64::from(n), 2),
        };

        let masking_key = if masked {
            let Some(key) = data.get(header_len..header_len + 4) else {
                return Ok(None);
            };
            header_len += 4;
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };

        let total_len = usize::try_from(payload_length)
            .ok()
            .and_then(|len| len.checked_add(header_len))
            .ok_or(Error::FrameTooLarge(payload_length))?;
        if data.len() < total_len {
            return Ok(None);
        }

        let mut payload = data[header_len..total_len].to_vec();
        if let Some(key) = masking_key {
            apply_mask(&mut payload, key);
        }

        let frame = Frame {
            fin,
            opcode,
            masked,
            payload_length,
            masking_key,
            payload,
        };
        Ok(Some((frame, total_len)))
    }
}

/// XOR `payload` in place with the 4-byte masking key.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Encode a server-to-client frame: FIN set, never masked.
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    encode(opcode, payload, None)
}

/// Encode a client-to-server frame masked with `key`.
pub fn encode_masked_frame(opcode: Opcode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    encode(opcode, payload, Some(key))
}

/// Encode a close frame carrying `code`.
pub fn encode_close_frame(code: u16) -> Vec<u8> {
    encode_frame(Opcode::Close, &code.to_be_bytes())
}

/// Status code from a close frame payload; a reason after the code is ignored.
pub fn close_code(payload: &[u8]) -> u16 {
    match payload {
        [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
        _ => CLOSE_NO_STATUS,
    }
}

fn encode(opcode: Opcode, payload: &[u8], mask_key: Option<[u8; 4]>) -> Vec<u8> {
    let payload_len = payload.len();

    let header_size = if payload_len < 126 {
        2
    } else if payload_len < 65536 {
        4
    } else {
        10
    };
    let mask_size = if mask_key.is_some() { 4 } else { 0 };

    let mut frame = Vec::with_capacity(header_size + mask_size + payload_len);

    // First byte: FIN + opcode
    frame.push(0x80 | (opcode as u8));

    // Second byte: MASK bit + payload length
    let mask_bit = if mask_key.is_some() { 0x80 } else { 0x00 };

    if payload_len < 126 {
        frame.push(mask_bit | (payload_len as u8));
    } else if payload_len < 65536 {
        frame.push(mask_bit | 126);
        frame.extend_from_slice(&(payload_len as u16).to_be_bytes());
    } else {
        frame.push(mask_bit | 127);
        frame.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }

    match mask_key {
        Some(key) => {
            frame.extend_from_slice(&key);
            let start = frame.len();
            frame.extend_from_slice(payload);
            apply_mask(&mut frame[start..], key);
        }
        None => frame.extend_from_slice(payload),
    }

    frame
}

/// Compute the Sec-WebSocket-Accept value for a client key (RFC 6455 Section 1.3)
pub fn compute_accept_key(sec_key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(sec_key);
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Build the `101 Switching Protocols` response for an upgrade request.
pub fn handshake_response(
    http_version: &str,
    sec_key: Option<&[u8]>,
    subprotocol: Option<&str>,
) -> Result<Vec<u8>> {
    let sec_key = sec_key.ok_or(Error::MissingHandshakeKey)?;
    let accept = compute_accept_key(sec_key);

    let mut headers = vec![
        (b"Upgrade".to_vec(), b"websocket".to_vec()),
        (b"Connection".to_vec(), b"Upgrade".to_vec()),
        (b"Sec-WebSocket-Accept".to_vec(), accept.into_bytes()),
    ];
    if let Some(protocol) = subprotocol {
        headers.push((b"Sec-WebSocket-Protocol".to_vec(), protocol.as_bytes().to_vec()));
    }
    http::encode_response_head(http_version, 101, &headers)
}
