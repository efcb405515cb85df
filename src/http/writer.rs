use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes a response into wire buffers: one buffer for the status line
/// and headers, then each body segment as-is.
///
/// Content-Length is filled in when the handler left it out, and
/// `Connection: close` is announced because the server closes after every
/// response.
pub fn to_buffers(resp: &Response) -> Vec<Bytes> {
    let mut head = BytesMut::with_capacity(128);

    head.extend_from_slice(
        format!(
            "{} {} {}\r\n",
            HTTP_VERSION,
            resp.status.as_u16(),
            resp.status.reason_phrase()
        )
        .as_bytes(),
    );

    for header in &resp.headers {
        head.extend_from_slice(header.name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(header.value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    if resp.header("Content-Length").is_none() && !resp.status.forbids_body() {
        head.extend_from_slice(format!("Content-Length: {}\r\n", resp.body_len()).as_bytes());
    }
    if resp.header("Connection").is_none() {
        head.extend_from_slice(b"Connection: close\r\n");
    }

    // Header/body separator
    head.extend_from_slice(b"\r\n");

    let mut buffers = Vec::with_capacity(1 + resp.body.len());
    buffers.push(head.freeze());
    if !resp.status.forbids_body() {
        // Bytes clones are reference counted, the payload is not copied.
        buffers.extend(resp.body.iter().filter(|b| !b.is_empty()).cloned());
    }
    buffers
}

/// Writes a serialized response, tracking progress across partial writes.
pub struct ResponseWriter {
    buffers: VecDeque<Bytes>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            buffers: to_buffers(response).into(),
            written: 0,
        }
    }

    /// Total number of bytes still to be written.
    pub fn remaining(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub async fn write_to_stream<S>(&mut self, stream: &mut S) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        while let Some(front) = self.buffers.front_mut() {
            if front.is_empty() {
                self.buffers.pop_front();
                continue;
            }

            let n = stream.write(&front[..]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }

            front.advance(n);
            self.written += n;
        }

        stream.flush().await
    }
}
