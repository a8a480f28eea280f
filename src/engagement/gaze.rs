//! Head-pose estimation from the face crop.
//!
//! The crop is average-pooled into an `input_size × input_size` luma grid and
//! fed to a binned regression head: two linear layers produce `bin_count`
//! logits each for pitch and yaw, and the angle is the softmax expectation
//! over bin centres.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engagement::config::{GazeConfig, GazeModelConfig};
use crate::engagement::error::{FrameError, GazeModelError};
use crate::engagement::types::{BoundingBox, FaceRegion, Frame, GazeReading};

/// Luma swing (0-255 scale) that the built-in gradient model maps to a 90°
/// rotation. Synthetic renderers shade faces with the same amplitude.
pub const PRIOR_GRADIENT_AMPLITUDE: f64 = 100.0;

/// One regression head: `bin_count` rows of `input_size²` weights, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadWeights {
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
}

impl HeadWeights {
    fn logits(&self, inputs: &[f64], bin_count: usize) -> Vec<f64> {
        let n = inputs.len();
        (0..bin_count)
            .map(|i| {
                let row = &self.weights[i * n..(i + 1) * n];
                row.iter().zip(inputs).map(|(w, x)| w * x).sum::<f64>() + self.bias[i]
            })
            .collect()
    }

    fn check_shape(&self, name: &str, bin_count: usize, inputs: usize) -> Result<(), GazeModelError> {
        if self.weights.len() != bin_count * inputs {
            return Err(GazeModelError::Shape(format!(
                "{name} weights: expected {} values, found {}",
                bin_count * inputs,
                self.weights.len()
            )));
        }
        if self.bias.len() != bin_count {
            return Err(GazeModelError::Shape(format!(
                "{name} bias: expected {bin_count} values, found {}",
                self.bias.len()
            )));
        }
        if self.weights.iter().chain(&self.bias).any(|v| !v.is_finite()) {
            return Err(GazeModelError::Shape(format!("{name} contains non-finite values")));
        }
        Ok(())
    }
}

/// Serialized gaze model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GazeModelWeights {
    pub config: GazeModelConfig,
    pub input_size: usize,
    pub pitch: HeadWeights,
    pub yaw: HeadWeights,
}

impl GazeModelWeights {
    pub fn load(path: impl AsRef<Path>, expected: &GazeConfig) -> Result<Self, GazeModelError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let weights: Self = serde_json::from_str(&raw)?;
        weights.validate(expected)?;
        tracing::info!(
            path = %path.as_ref().display(),
            config = %weights.config,
            input_size = weights.input_size,
            "Gaze model loaded"
        );
        Ok(weights)
    }

    pub fn validate(&self, expected: &GazeConfig) -> Result<(), GazeModelError> {
        if self.config != expected.model {
            return Err(GazeModelError::ConfigMismatch {
                expected: expected.model.to_string(),
                found: self.config.to_string(),
            });
        }
        if self.input_size != expected.input_size {
            return Err(GazeModelError::ConfigMismatch {
                expected: format!("input {0}x{0}", expected.input_size),
                found: format!("input {0}x{0}", self.input_size),
            });
        }
        self.validate_shape()
    }

    /// Matrix shapes agree with the weights' own bin layout and input size.
    pub fn validate_shape(&self) -> Result<(), GazeModelError> {
        if self.input_size == 0 || self.config.bin_count == 0 {
            return Err(GazeModelError::Shape(format!(
                "empty model: input {0}x{0}, {1} bins",
                self.input_size, self.config.bin_count
            )));
        }
        let inputs = self.input_size * self.input_size;
        self.pitch.check_shape("pitch", self.config.bin_count, inputs)?;
        self.yaw.check_shape("yaw", self.config.bin_count, inputs)?;
        Ok(())
    }

    /// Closed-form model that reads rotation off the crop's luma gradient.
    ///
    /// Each head scores bin centre `a_i` with a Gaussian log-likelihood
    /// around `gain · g`, where `g` is the right-minus-left (yaw) or
    /// bottom-minus-top (pitch) difference of pooled cell means.
    pub fn gradient_prior(config: GazeModelConfig, input_size: usize, sigma_deg: f64) -> Self {
        let n = input_size.max(2);
        let half = n / 2;
        let cells = n * n;
        let per_half = (cells / 2) as f64;
        let gain = 90.0 * 255.0 / PRIOR_GRADIENT_AMPLITUDE;
        let var = sigma_deg * sigma_deg;

        // Direction vectors over the pooled grid.
        let mut horizontal = vec![0.0; cells];
        let mut vertical = vec![0.0; cells];
        for row in 0..n {
            for col in 0..n {
                let j = row * n + col;
                horizontal[j] = (if col >= half { 1.0 } else { -1.0 }) / per_half;
                vertical[j] = (if row >= half { 1.0 } else { -1.0 }) / per_half;
            }
        }

        let head = |direction: &[f64]| {
            let mut weights = Vec::with_capacity(config.bin_count * cells);
            let mut bias = Vec::with_capacity(config.bin_count);
            for i in 0..config.bin_count {
                let a = i as f64 * config.bin_width - config.angle_range;
                weights.extend(direction.iter().map(|c| a / var * gain * c));
                bias.push(-(a * a) / (2.0 * var));
            }
            HeadWeights { weights, bias }
        };

        Self {
            config,
            input_size: n,
            pitch: head(&vertical),
            yaw: head(&horizontal),
        }
    }
}

/// Softmax expectation over bin centres, clamped to [-90, 90].
pub fn decode_angle(logits: &[f64], config: &GazeModelConfig) -> f64 {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return 0.0;
    }
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    let expected_bin: f64 = exps
        .iter()
        .enumerate()
        .map(|(i, e)| e / total * i as f64)
        .sum();
    (expected_bin * config.bin_width - config.angle_range).clamp(-90.0, 90.0)
}

#[derive(Debug, Clone)]
pub struct GazeEstimator {
    weights: Arc<GazeModelWeights>,
}

impl GazeEstimator {
    pub fn new(weights: Arc<GazeModelWeights>) -> Result<Self, GazeModelError> {
        weights.validate_shape()?;
        Ok(Self { weights })
    }

    /// The built-in gradient model for `config`. Shaped by construction.
    pub fn with_gradient_prior(config: &GazeConfig) -> Self {
        Self {
            weights: Arc::new(GazeModelWeights::gradient_prior(
                config.model,
                config.input_size,
                config.prior_sigma_deg,
            )),
        }
    }

    pub fn weights(&self) -> &Arc<GazeModelWeights> {
        &self.weights
    }

    pub fn estimate(&self, frame: &Frame, face: &FaceRegion) -> Result<GazeReading, FrameError> {
        let pooled = pool_crop(frame, &face.bbox, self.weights.input_size)?;
        let cfg = &self.weights.config;
        let pitch = decode_angle(&self.weights.pitch.logits(&pooled, cfg.bin_count), cfg);
        let yaw = decode_angle(&self.weights.yaw.logits(&pooled, cfg.bin_count), cfg);
        Ok(GazeReading::new(pitch, yaw))
    }
}

/// Average-pool the face crop into `size × size` cells scaled to [0, 1].
pub fn pool_crop(frame: &Frame, bbox: &BoundingBox, size: usize) -> Result<Vec<f64>, FrameError> {
    let invalid = || FrameError::InvalidFaceCrop {
        x: bbox.x,
        y: bbox.y,
        width: bbox.width,
        height: bbox.height,
        frame_width: frame.width,
        frame_height: frame.height,
    };
    if !frame.is_well_formed() || !bbox.is_finite() || size == 0 {
        return Err(invalid());
    }
    // Rounding outward below would turn an empty box into a 1-pixel crop.
    if !(bbox.width > 0.0 && bbox.height > 0.0) {
        return Err(invalid());
    }

    let x0 = bbox.x.max(0.0).floor();
    let y0 = bbox.y.max(0.0).floor();
    let x1 = (bbox.x + bbox.width).min(frame.width as f64).ceil();
    let y1 = (bbox.y + bbox.height).min(frame.height as f64).ceil();
    if x1 <= x0 || y1 <= y0 {
        return Err(invalid());
    }
    let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize, y1 as usize);
    let (cw, ch) = (x1 - x0, y1 - y0);

    let mut cells = Vec::with_capacity(size * size);
    for row in 0..size {
        let ys = y0 + row * ch / size;
        let ye = (y0 + (row + 1) * ch / size).max(ys + 1);
        for col in 0..size {
            let xs = x0 + col * cw / size;
            let xe = (x0 + (col + 1) * cw / size).max(xs + 1);
            let mut sum = 0u64;
            for y in ys..ye {
                for x in xs..xe {
                    sum += u64::from(frame.luma(x as u32, y as u32));
                }
            }
            let count = ((ye - ys) * (xe - xs)) as f64;
            cells.push(sum as f64 / count / 255.0);
        }
    }
    Ok(cells)
}
