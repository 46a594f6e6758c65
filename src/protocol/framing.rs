//! `Content-Length` framing for JSON payloads over byte streams.
//!
//! Format: `Content-Length: N\r\n\r\n{json}`. Other headers are accepted and
//! ignored. The same framing is used on peer stdio and on the query listener.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Largest frame body accepted from a stream (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound on header lines per frame.
const MAX_HEADER_LINES: usize = 32;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream desynchronized: nothing after this point can be trusted.
    #[error("bad frame header: {0}")]
    Header(String),

    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),

    /// The frame was well-formed but its body was not the expected JSON.
    /// The stream remains usable.
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

impl FramingError {
    /// Whether reading can continue with the next frame after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FramingError::Json(_))
    }
}

/// Reads framed messages from an async byte stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Read the next frame body.
    ///
    /// Returns `Ok(None)` on a clean EOF between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        let mut content_length: Option<usize> = None;
        let mut saw_header = false;

        for _ in 0..MAX_HEADER_LINES {
            let mut line = String::new();
            let read = self.inner.read_line(&mut line).await?;
            if read == 0 {
                if saw_header {
                    return Err(FramingError::Header("EOF inside header".to_string()));
                }
                return Ok(None);
            }

            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if !saw_header {
                    // Tolerate stray blank lines between frames.
                    continue;
                }
                let length = content_length
                    .ok_or_else(|| FramingError::Header("missing Content-Length".to_string()))?;
                return self.read_body(length).await.map(Some);
            }

            saw_header = true;
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FramingError::Header(format!("malformed header line: {:?}", line)))?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                let length = value.trim().parse::<usize>().map_err(|e| {
                    FramingError::Header(format!("invalid Content-Length {:?}: {}", value, e))
                })?;
                content_length = Some(length);
            }
        }

        Err(FramingError::Header("too many header lines".to_string()))
    }

    /// Read the next frame and decode it as `T`.
    ///
    /// A body that fails to decode yields [`FramingError::Json`] with the
    /// frame already consumed, so the caller may keep reading.
    pub async fn read_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FramingError> {
        match self.read_frame().await? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }

    async fn read_body(&mut self, length: usize) -> Result<Vec<u8>, FramingError> {
        if length > MAX_FRAME_SIZE {
            return Err(FramingError::TooLarge(length));
        }
        let mut body = vec![0u8; length];
        self.inner.read_exact(&mut body).await?;
        Ok(body)
    }
}

/// Writes framed messages to an async byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    /// Serialize `message` and write it as one flushed frame.
    pub async fn write_json<T: Serialize>(&mut self, message: &T) -> Result<(), FramingError> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.inner.write_all(header.as_bytes()).await?;
        self.inner.write_all(&body).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn writer_output_is_readable_by_reader() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer.write_json(&json!({"id": 1})).await.unwrap();
        writer.write_json(&json!({"id": 2})).await.unwrap();
        drop(writer);

        let first: Value = reader.read_json().await.unwrap().unwrap();
        let second: Value = reader.read_json().await.unwrap().unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(second["id"], 2);
        assert!(reader.read_frame().await.unwrap().is_none(), "clean EOF");
    }

    #[tokio::test]
    async fn extra_headers_are_ignored() {
        let raw = b"Content-Type: application/json\r\ncontent-length: 2\r\n\r\n{}";
        let mut reader = FrameReader::new(&raw[..]);
        let body = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(body, b"{}");
    }

    #[tokio::test]
    async fn missing_content_length_is_a_header_error() {
        let raw = b"Content-Type: application/json\r\n\r\n{}";
        let mut reader = FrameReader::new(&raw[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FramingError::Header(_)), "got {:?}", err);
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let raw = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_SIZE + 1);
        let mut reader = FrameReader::new(raw.as_bytes());
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FramingError::TooLarge(_)));
    }

    #[tokio::test]
    async fn bad_json_body_leaves_stream_usable() {
        let raw = b"Content-Length: 3\r\n\r\nnopContent-Length: 2\r\n\r\n{}";
        let mut reader = FrameReader::new(&raw[..]);

        let err = reader.read_json::<Value>().await.unwrap_err();
        assert!(err.is_recoverable());

        let next: Value = reader.read_json().await.unwrap().unwrap();
        assert_eq!(next, json!({}));
    }

    #[tokio::test]
    async fn frame_split_across_reads_is_reassembled() {
        let mock = tokio_test::io::Builder::new()
            .read(b"Content-Le")
            .read(b"ngth: 10\r\n\r\n{\"id\":")
            .read(b"\"x\"}")
            .build();
        let mut reader = FrameReader::new(mock);

        let value: Value = reader.read_json().await.unwrap().unwrap();
        assert_eq!(value, json!({"id": "x"}));
    }

    #[tokio::test]
    async fn eof_inside_header_is_an_error() {
        let raw = b"Content-Length: 10\r\n";
        let mut reader = FrameReader::new(&raw[..]);
        assert!(matches!(
            reader.read_frame().await.unwrap_err(),
            FramingError::Header(_)
        ));
    }
}
