use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::camera::Camera;
use crate::motion::{CapturePolicy, MotionDetector};

/// Run state for the capture loop, owned by the HTTP layer.
///
/// The flag is the only cross-task signal: `start-capture` sets it,
/// `stop-capture` clears it, and the loop polls it once per iteration.
/// Stopping is cooperative and takes effect at the top of the next
/// iteration.
#[derive(Default)]
pub struct CaptureSession {
    running: AtomicBool,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the session. Returns `false` if a loop is already running,
    /// so two concurrent capture loops can never be scheduled.
    pub fn try_start(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Called by the loop on every exit path so a dead loop never leaves
    /// the session claimed.
    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Pull frames while the session is running, classify them, and persist
/// confirmed motion captures to `output_dir`.
///
/// A camera read failure terminates the loop (fail fast, the device is a
/// local peripheral that will not recover without intervention). Disk
/// write failures are logged and skipped.
pub async fn run_capture_loop<C: Camera>(
    mut camera: C,
    mut detector: MotionDetector,
    mut policy: CapturePolicy,
    session: Arc<CaptureSession>,
    output_dir: PathBuf,
) {
    info!("starting motion capture loop");

    while session.is_running() {
        let frame = match camera.read_frame().await {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, "failed to read frame from camera, stopping capture");
                break;
            }
        };

        let motion = detector.observe(&frame.jpeg);

        if policy.on_frame(motion, Instant::now()) {
            let path = output_dir.join(frame.file_name());
            match tokio::fs::write(&path, &frame.jpeg).await {
                Ok(()) => {
                    info!(path = %path.display(), seq = frame.seq, "motion confirmed, image saved")
                }
                Err(e) => warn!(error = %e, path = %path.display(), "failed to save capture"),
            }
        }
    }

    session.mark_stopped();
    info!("motion capture loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraError;
    use crate::config::{CaptureConfig, MotionConfig};
    use crate::frame::Frame;
    use async_trait::async_trait;
    use image::codecs::jpeg::JpegEncoder;
    use image::GrayImage;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct ScriptedCamera {
        frames: VecDeque<Frame>,
    }

    #[async_trait]
    impl Camera for ScriptedCamera {
        async fn read_frame(&mut self) -> Result<Frame, CameraError> {
            self.frames.pop_front().ok_or(CameraError::StreamEnded)
        }
    }

    fn synthetic_jpeg(block: Option<(u32, u32, u32)>) -> Vec<u8> {
        let mut img = GrayImage::from_pixel(160, 120, image::Luma([30u8]));
        if let Some((bx, by, size)) = block {
            for y in by..(by + size).min(120) {
                for x in bx..(bx + size).min(160) {
                    img.put_pixel(x, y, image::Luma([255u8]));
                }
            }
        }
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&img)
            .unwrap();
        jpeg
    }

    fn test_output_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("camwatch-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn second_start_is_rejected_until_stopped() {
        let session = CaptureSession::new();
        assert!(session.try_start());
        assert!(!session.try_start());
        session.stop();
        assert!(session.try_start());
    }

    #[test]
    fn stop_is_idempotent() {
        let session = CaptureSession::new();
        session.try_start();
        session.stop();
        session.stop();
        session.stop();
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn loop_exits_immediately_when_not_running() {
        let session = Arc::new(CaptureSession::new());
        let camera = ScriptedCamera {
            frames: VecDeque::from(vec![Frame::new(synthetic_jpeg(None), 0, 0)]),
        };
        let dir = test_output_dir("not-running");

        run_capture_loop(
            camera,
            MotionDetector::new(MotionConfig::default()),
            CapturePolicy::new(&CaptureConfig::default()),
            Arc::clone(&session),
            dir.clone(),
        )
        .await;

        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    /// Ten static frames, then five frames with a large moving block, with
    /// confirmation count 3 and a 5s cooldown: exactly one file is saved,
    /// stamped with the third moving frame's timestamp.
    #[tokio::test]
    async fn sustained_motion_saves_exactly_one_file() {
        let base_ms: i64 = 1_700_000_000_000;
        let mut frames = VecDeque::new();
        for i in 0..10u64 {
            frames.push_back(Frame::new(
                synthetic_jpeg(None),
                base_ms + i as i64 * 1000,
                i,
            ));
        }
        for i in 10..15u64 {
            frames.push_back(Frame::new(
                synthetic_jpeg(Some((20, 10, 100))),
                base_ms + i as i64 * 1000,
                i,
            ));
        }

        let motion_config = MotionConfig {
            min_area: 2000,
            history: 500,
            var_threshold: 50.0,
            mask_threshold: 250,
            warmup_frames: 3,
            cluster_tolerance: 10.0,
        };
        let capture_config = CaptureConfig {
            output_dir: "unused".into(),
            cooldown_secs: 5,
            frames_to_confirm: 3,
        };

        let session = Arc::new(CaptureSession::new());
        assert!(session.try_start());
        let dir = test_output_dir("scenario");

        run_capture_loop(
            ScriptedCamera { frames },
            MotionDetector::new(motion_config),
            CapturePolicy::new(&capture_config),
            Arc::clone(&session),
            dir.clone(),
        )
        .await;

        // Camera exhaustion ended the loop and released the session
        assert!(!session.is_running());

        let saved: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        // Third moving frame is seq 12
        let expected = format!("capture_{}.jpg", (base_ms + 12 * 1000) / 1000);
        assert_eq!(saved, vec![expected]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
