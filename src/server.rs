use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::camera::MjpegCamera;
use crate::capture::{run_capture_loop, CaptureSession};
use crate::config::Config;
use crate::motion::{CapturePolicy, MotionDetector};
use crate::stream::mjpeg_response;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub session: Arc<CaptureSession>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            session: Arc::new(CaptureSession::new()),
            config,
        }
    }

    fn camera(&self) -> MjpegCamera {
        MjpegCamera::new(
            &self.config.camera.url,
            Duration::from_secs(self.config.camera.connect_timeout_secs),
        )
    }

    fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.capture.output_dir)
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Debug, Serialize, PartialEq)]
struct ImageEntry {
    filename: String,
}

#[derive(Debug, Serialize)]
struct ImageListing {
    images: Vec<ImageEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

const INDEX_HTML: &str = r#"<html>
<head>
    <title>Camera Feed</title>
</head>
<body>
    <h1>Live Camera Feed with Motion Detection</h1>
    <img src="/video-feed" width="640" height="480" />
    <br><br>
    <button onclick="startCapture()">Start Motion Capture</button>
    <button onclick="stopCapture()">Stop Motion Capture</button>
    <script>
        async function startCapture() {
            await fetch('/start-capture');
            alert("Motion capture started.");
        }
        async function stopCapture() {
            await fetch('/stop-capture');
            alert("Motion capture stopped.");
        }
    </script>
</body>
</html>
"#;

/// GET / — static viewer page
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /video-feed — live MJPEG stream, one camera connection per viewer
async fn video_feed(State(state): State<Arc<AppState>>) -> Response {
    mjpeg_response(state.camera())
}

/// GET /start-capture — claim the session and schedule the capture loop
async fn start_capture(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    if !state.session.try_start() {
        return Json(StatusResponse {
            status: "Already capturing",
        });
    }

    let camera = state.camera();
    let detector = MotionDetector::new(state.config.motion.clone());
    let policy = CapturePolicy::new(&state.config.capture);
    tokio::spawn(run_capture_loop(
        camera,
        detector,
        policy,
        Arc::clone(&state.session),
        state.output_dir(),
    ));

    Json(StatusResponse {
        status: "Capture started",
    })
}

/// GET /stop-capture — clear the run flag; the loop observes it on its
/// next iteration. Idempotent.
async fn stop_capture(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    state.session.stop();
    Json(StatusResponse {
        status: "Capture stopped",
    })
}

/// GET /captured-images — list saved JPEG filenames
async fn list_captured_images(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let dir = state.output_dir();
    let result = tokio::task::spawn_blocking(move || {
        let mut images = Vec::new();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return images;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jpg") {
                if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                    images.push(ImageEntry {
                        filename: name.to_string(),
                    });
                }
            }
        }
        images.sort_by(|a, b| a.filename.cmp(&b.filename));
        images
    })
    .await;

    match result {
        Ok(images) => Json(ImageListing { images }).into_response(),
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /captured-images/:filename — raw JPEG bytes, or a soft JSON error
/// when the name is missing or unsafe
async fn get_captured_image(
    State(state): State<Arc<AppState>>,
    AxumPath(filename): AxumPath<String>,
) -> Response {
    // Names are flat `capture_<ts>.jpg` files; anything path-like is rejected
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return image_not_found();
    }

    match tokio::fs::read(state.output_dir().join(&filename)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Err(_) => image_not_found(),
    }
}

fn image_not_found() -> Response {
    Json(ErrorResponse {
        error: "Image not found",
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video-feed", get(video_feed))
        .route("/start-capture", get(start_capture))
        .route("/stop-capture", get(stop_capture))
        .route("/captured-images", get(list_captured_images))
        .route("/captured-images/:filename", get(get_captured_image))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
