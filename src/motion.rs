use image::imageops::FilterType;
use image::{imageops, GrayImage, ImageReader};
use linfa::dataset::Labels;
use linfa::prelude::Transformer;
use linfa::Dataset;
use linfa_clustering::AppxDbscan;
use ndarray::{Array, Array2, Ix1, OwnedRepr};
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{CaptureConfig, MotionConfig};

/// Detection works on frames capped to this size to bound CPU cost.
const MAX_WIDTH: u32 = 640;
const MAX_HEIGHT: u32 = 480;

/// Minimum neighbors within `cluster_tolerance` for a foreground pixel to
/// be a cluster core point. A solid blob easily exceeds this density.
const CLUSTER_CORE_POINTS: usize = 50;

/// With at least this many times `min_area` foreground pixels, motion is
/// declared without clustering.
const GLOBAL_FOREGROUND_FACTOR: usize = 4;

/// Running estimate of the static scene.
///
/// Maintains a per-pixel exponential moving average and emits a graded
/// foreground mask: 255 where the difference from the background exceeds
/// `var_threshold`, 127 where it exceeds half of it (weak, shadow-like
/// foreground), 0 elsewhere.
pub struct BackgroundSubtractor {
    background: Array2<f32>,
    alpha: f32,
    var_threshold: f32,
}

impl BackgroundSubtractor {
    /// Initialize with the first frame as the baseline scene.
    pub fn new(initial_frame: &GrayImage, history: u32, var_threshold: f32) -> Self {
        let (width, height) = initial_frame.dimensions();
        let bg_vec: Vec<f32> = initial_frame.as_raw().iter().map(|&p| p as f32).collect();
        let background = Array2::from_shape_vec((height as usize, width as usize), bg_vec)
            .expect("pixel buffer length matches dimensions");

        Self {
            background,
            alpha: 1.0 / history.max(1) as f32,
            var_threshold,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.background.ncols() as u32, self.background.nrows() as u32)
    }

    /// Update the background model and return the foreground mask.
    pub fn apply(&mut self, frame: &GrayImage) -> GrayImage {
        let (width, height) = frame.dimensions();
        let frame_vec: Vec<f32> = frame.as_raw().iter().map(|&p| p as f32).collect();
        let frame_array = Array2::from_shape_vec((height as usize, width as usize), frame_vec)
            .expect("pixel buffer length matches dimensions");

        let diff = (&frame_array - &self.background).mapv(f32::abs);

        self.background = &frame_array * self.alpha + &self.background * (1.0 - self.alpha);

        let strong = self.var_threshold;
        let weak = self.var_threshold / 2.0;
        let mask = diff.mapv(|v| {
            if v > strong {
                255u8
            } else if v > weak {
                127u8
            } else {
                0u8
            }
        });

        GrayImage::from_raw(width, height, mask.into_raw_vec())
            .expect("mask buffer length matches dimensions")
    }
}

/// Classifies frames as motion-positive via background subtraction and
/// foreground-region clustering.
pub struct MotionDetector {
    config: MotionConfig,
    subtractor: Option<BackgroundSubtractor>,
    frames_seen: u64,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            subtractor: None,
            frames_seen: 0,
        }
    }

    /// Feed one JPEG frame; returns `true` if it shows motion.
    ///
    /// The background model updates on every frame, but verdicts are
    /// suppressed until `warmup_frames` frames have been seen, since the
    /// initial background estimate flags the whole scene as foreground.
    pub fn observe(&mut self, jpeg: &[u8]) -> bool {
        let decoded = match ImageReader::new(Cursor::new(jpeg))
            .with_guessed_format()
            .ok()
            .and_then(|r| r.decode().ok())
        {
            Some(img) => img,
            None => {
                warn!("failed to decode JPEG frame, skipping");
                return false;
            }
        };

        let mut gray = decoded.to_luma8();
        let (width, height) = gray.dimensions();
        if width > MAX_WIDTH || height > MAX_HEIGHT {
            gray = imageops::resize(&gray, MAX_WIDTH, MAX_HEIGHT, FilterType::Nearest);
        }

        self.frames_seen += 1;

        let needs_init = match &self.subtractor {
            None => true,
            Some(s) => s.dimensions() != gray.dimensions(),
        };
        if needs_init {
            self.subtractor = Some(BackgroundSubtractor::new(
                &gray,
                self.config.history,
                self.config.var_threshold,
            ));
            return false;
        }

        let mask = self
            .subtractor
            .as_mut()
            .expect("subtractor initialized above")
            .apply(&gray);

        if self.frames_seen <= self.config.warmup_frames {
            debug!(frames_seen = self.frames_seen, "warmup, verdict suppressed");
            return false;
        }

        self.score_foreground(&mask)
    }

    /// Decide whether the binarized mask holds a foreground region of at
    /// least `min_area` pixels.
    fn score_foreground(&self, mask: &GrayImage) -> bool {
        let mut data_vec = Vec::new();
        let mut targets = Vec::new();
        for (x, y, pixel) in mask.enumerate_pixels() {
            if pixel[0] >= self.config.mask_threshold {
                data_vec.extend_from_slice(&[x as f64, y as f64]);
                targets.push(1.0);
            }
        }
        let total_points = targets.len();

        // No region can reach min_area with fewer foreground pixels than that.
        if total_points < self.config.min_area {
            return false;
        }

        // With this much foreground, clustering is a formality.
        if total_points >= GLOBAL_FOREGROUND_FACTOR * self.config.min_area {
            debug!(total_points, "motion detected via global foreground count");
            return true;
        }

        let x: ndarray::ArrayBase<OwnedRepr<f64>, ndarray::Ix2> =
            Array::from_shape_vec((total_points, 2), data_vec)
                .expect("point buffer length matches shape");
        let y: ndarray::ArrayBase<OwnedRepr<f64>, ndarray::Ix1> =
            Array::from_shape_vec(total_points, targets)
                .expect("target buffer length matches shape");
        let dataset: Dataset<f64, f64, Ix1> = Dataset::new(x, y);

        let cluster_memberships = match AppxDbscan::params(CLUSTER_CORE_POINTS)
            .tolerance(self.config.cluster_tolerance)
            .transform(dataset)
        {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "foreground clustering failed, skipping frame");
                return false;
            }
        };
        let label_count = cluster_memberships.label_count().remove(0);

        for (label, count) in label_count {
            if label.is_some() && count >= self.config.min_area {
                debug!(count, "motion detected via clustered foreground region");
                return true;
            }
        }
        false
    }
}

/// Confirmation/cooldown policy for accepting a motion capture.
///
/// Policy (the one documented behavior): motion must hold for
/// `frames_to_confirm` consecutive frames, and captures are at least
/// `cooldown` apart. The consecutive counter only resets on a still frame
/// or an accepted capture, so sustained motion fires again as soon as the
/// cooldown window expires.
pub struct CapturePolicy {
    frames_to_confirm: u32,
    cooldown: Duration,
    consecutive_motion: u32,
    last_capture: Option<Instant>,
}

impl CapturePolicy {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            frames_to_confirm: config.frames_to_confirm.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
            consecutive_motion: 0,
            last_capture: None,
        }
    }

    /// Record one frame verdict; returns `true` when a capture should fire.
    pub fn on_frame(&mut self, motion: bool, now: Instant) -> bool {
        if motion {
            self.consecutive_motion += 1;
        } else {
            self.consecutive_motion = 0;
        }

        if self.consecutive_motion < self.frames_to_confirm {
            return false;
        }

        let cooled_down = match self.last_capture {
            None => true,
            Some(at) => now.duration_since(at) > self.cooldown,
        };
        if !cooled_down {
            return false;
        }

        self.last_capture = Some(now);
        self.consecutive_motion = 0;
        true
    }
}
