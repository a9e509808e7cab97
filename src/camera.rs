use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

use crate::frame::Frame;

const HEADER_END: &[u8] = b"\r\n\r\n";
const DEFAULT_BOUNDARY: &str = "frame";

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("HTTP connection failed: {0}")]
    Connect(reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("HTTP stream error: {0}")]
    Stream(reqwest::Error),
    #[error("camera stream ended")]
    StreamEnded,
}

/// A source of sequential JPEG frames.
#[async_trait]
pub trait Camera: Send {
    /// Read the next frame. Errors are terminal: the device is not retried.
    async fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Parse state for an MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental extractor turning raw multipart chunks into JPEG payloads.
pub struct JpegExtractor {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl JpegExtractor {
    pub fn new(boundary_name: &str) -> Self {
        Self {
            boundary: format!("--{boundary_name}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Drive the parser over the buffered bytes; returns the next complete
    /// JPEG payload, or `None` once more input is needed.
    pub fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + self.boundary.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case the boundary spans chunks
                        if self.buffer.len() > self.boundary.len() {
                            let keep_from = self.buffer.len() - self.boundary.len();
                            let _ = self.buffer.split_to(keep_from);
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        // Discard the part headers
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        return None;
                    }
                }
                ParseState::CollectingJpeg => {
                    if let Some(pos) =
                        find_subsequence(&self.buffer[self.jpeg_start..], &self.boundary)
                    {
                        let jpeg_end = self.jpeg_start + pos;
                        // Strip trailing \r\n before the boundary
                        let end = if jpeg_end >= 2
                            && self.buffer[jpeg_end - 2] == b'\r'
                            && self.buffer[jpeg_end - 1] == b'\n'
                        {
                            jpeg_end - 2
                        } else {
                            jpeg_end
                        };

                        let jpeg_data = self.buffer[..end].to_vec();

                        // Advance past the boundary
                        let _ = self.buffer.split_to(jpeg_end + self.boundary.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::SeekingHeaderEnd;

                        if !jpeg_data.is_empty() {
                            return Some(jpeg_data);
                        }
                    } else {
                        // No boundary yet; avoid re-scanning old data next time
                        self.jpeg_start =
                            self.buffer.len().saturating_sub(self.boundary.len());
                        return None;
                    }
                }
            }
        }
    }
}

/// Extract the boundary name from a `multipart/x-mixed-replace; boundary=...`
/// content type header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let idx = content_type.to_lowercase().find("boundary=")?;
    let after = &content_type[idx + "boundary=".len()..];
    let name = after
        .trim_matches(|c: char| c.is_whitespace() || c == ';' || c == '"')
        .trim_start_matches("--");
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

struct MjpegConnection {
    byte_stream: BoxStream<'static, reqwest::Result<Bytes>>,
    extractor: JpegExtractor,
}

/// Camera source reading an MJPEG stream over HTTP.
///
/// The connection is opened lazily on the first read and dropped with the
/// value, so each capture loop or live-view request owns its own scoped
/// connection to the device.
pub struct MjpegCamera {
    url: String,
    connect_timeout: Duration,
    conn: Option<MjpegConnection>,
    seq: u64,
}

impl MjpegCamera {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            conn: None,
            seq: 0,
        }
    }

    async fn connect(&mut self) -> Result<(), CameraError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(CameraError::Connect)?;
        let response = client
            .get(&self.url)
            .send()
            .await
            .map_err(CameraError::Connect)?;

        if !response.status().is_success() {
            return Err(CameraError::Status(response.status().as_u16()));
        }

        let boundary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(boundary_from_content_type)
            .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());

        info!(url = self.url, boundary, "connected to MJPEG camera stream");

        self.conn = Some(MjpegConnection {
            byte_stream: response.bytes_stream().boxed(),
            extractor: JpegExtractor::new(&boundary),
        });
        Ok(())
    }
}

#[async_trait]
impl Camera for MjpegCamera {
    async fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.conn.is_none() {
            self.connect().await?;
        }
        let conn = self.conn.as_mut().expect("connection established above");

        loop {
            if let Some(jpeg) = conn.extractor.next_jpeg() {
                let seq = self.seq;
                self.seq += 1;
                debug!(seq, bytes = jpeg.len(), "frame read from camera");
                return Ok(Frame::new(jpeg, Utc::now().timestamp_millis(), seq));
            }

            match conn.byte_stream.next().await {
                Some(Ok(chunk)) => conn.extractor.push(&chunk),
                Some(Err(e)) => return Err(CameraError::Stream(e)),
                None => return Err(CameraError::StreamEnded),
            }
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
