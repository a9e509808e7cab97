use async_stream::stream;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::Stream;
use std::convert::Infallible;
use tracing::warn;

use crate::camera::Camera;

pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap one JPEG payload in its multipart delimiter.
fn encode_part(jpeg: &[u8]) -> Bytes {
    const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let mut bytes = Vec::with_capacity(PART_HEADER.len() + jpeg.len() + 4);
    bytes.extend_from_slice(PART_HEADER);
    bytes.extend_from_slice(jpeg);
    bytes.extend_from_slice(b"\r\n\r\n");
    Bytes::from(bytes)
}

/// Unbounded multipart JPEG stream from a camera. Ends on the first failed
/// frame read, which terminates the HTTP response.
fn mjpeg_stream<C: Camera + 'static>(
    mut camera: C,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    stream! {
        loop {
            match camera.read_frame().await {
                Ok(frame) => yield Ok(encode_part(&frame.jpeg)),
                Err(e) => {
                    warn!(error = %e, "live stream ended");
                    break;
                }
            }
        }
    }
}

/// Build the live-view HTTP response for a camera.
pub fn mjpeg_response<C: Camera + 'static>(camera: C) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .body(Body::from_stream(mjpeg_stream(camera)))
        .expect("static headers are valid")
}
