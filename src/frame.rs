/// A single JPEG frame pulled from the camera.
///
/// Frames are ephemeral: each one is owned by the loop iteration that read
/// it and is either dropped or written out as a capture.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    /// Capture timestamp, Unix millis.
    pub captured_at_ms: i64,
    /// Per-source sequence number.
    pub seq: u64,
}

impl Frame {
    pub fn new(jpeg: Vec<u8>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            jpeg,
            captured_at_ms,
            seq,
        }
    }

    /// On-disk name for a saved capture: `capture_<unix-seconds>.jpg`.
    pub fn file_name(&self) -> String {
        format!("capture_{}.jpg", self.captured_at_ms / 1000)
    }
}
