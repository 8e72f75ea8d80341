//! Byte transport under a session, plus the read buffer that carries
//! leftover bytes from the request head into the session.

use std::io;
use std::net::Shutdown;

use tokio_uring::net::TcpStream;

use crate::error::{Error, Result};
use crate::http;
use crate::websocket::Frame;

const READ_CHUNK: usize = 4096;

/// Owned-buffer stream I/O in the style of tokio-uring: buffers are handed
/// to the transport and returned alongside the result.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn read(&self, buf: Vec<u8>) -> (io::Result<usize>, Vec<u8>);
    async fn write_all(&self, buf: Vec<u8>) -> (io::Result<()>, Vec<u8>);
    fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    async fn read(&self, buf: Vec<u8>) -> (io::Result<usize>, Vec<u8>) {
        TcpStream::read(self, buf).await
    }

    async fn write_all(&self, buf: Vec<u8>) -> (io::Result<()>, Vec<u8>) {
        TcpStream::write_all(self, buf).await
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    async fn read(&self, buf: Vec<u8>) -> (io::Result<usize>, Vec<u8>) {
        (**self).read(buf).await
    }

    async fn write_all(&self, buf: Vec<u8>) -> (io::Result<()>, Vec<u8>) {
        (**self).write_all(buf).await
    }

    fn shutdown(&self) -> io::Result<()> {
        (**self).shutdown()
    }
}

/// Bytes received but not yet consumed.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    buf: Vec<u8>,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Read one chunk from `io`; returns 0 on EOF.
    async fn fill<T: Transport>(&mut self, io: &T) -> io::Result<usize> {
        let chunk = vec![0u8; READ_CHUNK];
        let (result, chunk) = io.read(chunk).await;
        let n = result?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Read up to and including the blank line that ends a request head.
    pub async fn read_head<T: Transport>(&mut self, io: &T) -> Result<Vec<u8>> {
        loop {
            if let Some(end) = http::find_head_end(&self.buf) {
                return Ok(self.buf.drain(..end).collect());
            }
            if self.fill(io).await? == 0 {
                return Err(Error::IncompleteRequest);
            }
        }
    }

    /// Read exactly `len` body bytes.
    pub async fn read_body<T: Transport>(&mut self, io: &T, len: usize) -> Result<Vec<u8>> {
        while self.buf.len() < len {
            if self.fill(io).await? == 0 {
                return Err(Error::TruncatedBody {
                    expected: len,
                    received: self.buf.len(),
                });
            }
        }
        Ok(self.buf.drain(..len).collect())
    }

    /// Read the next frame. `Ok(None)` means the peer closed the stream on a
    /// frame boundary.
    pub async fn read_frame<T: Transport>(&mut self, io: &T) -> Result<Option<Frame>> {
        loop {
            if let Some((frame, used)) = Frame::parse(&self.buf)? {
                self.buf.drain(..used);
                return Ok(Some(frame));
            }
            if self.fill(io).await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(Error::TruncatedFrame)
                };
            }
        }
    }
}
