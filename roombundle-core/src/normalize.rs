//! Geometry Normalization - Clamp and Snap
//!
//! Purely geometric: positions of devices and decor are pulled inside the room
//! and optionally quantized to a grid. No colors, backgrounds or any other look
//! is ever filled in here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::room::{Dimensions, RoomDescription, Vec3};

/// Clamp mode determines how far inside the walls positions are pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClampMode {
    /// Positions are left where the author put them
    #[default]
    None,
    /// 0.15 margin from each wall and the ceiling
    Soft,
    /// 0.25 margin from each wall and the ceiling
    Hard,
}

impl ClampMode {
    pub fn margin(self) -> Option<f64> {
        match self {
            Self::None => None,
            Self::Soft => Some(0.15),
            Self::Hard => Some(0.25),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("grid step must be a finite number >= 0, got {0}")]
    InvalidGridStep(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizePolicy {
    pub clamp: ClampMode,
    /// 0 disables snapping.
    pub grid_step: f64,
}

impl NormalizePolicy {
    pub fn new(clamp: ClampMode, grid_step: f64) -> Result<Self, PolicyError> {
        if !grid_step.is_finite() || grid_step < 0.0 {
            return Err(PolicyError::InvalidGridStep(grid_step));
        }
        Ok(Self { clamp, grid_step })
    }

    pub fn is_identity(&self) -> bool {
        self.clamp == ClampMode::None && self.grid_step == 0.0
    }

    fn apply(&self, dims: &Dimensions, p: Vec3) -> Vec3 {
        let mut out = p;
        if let Some(m) = self.clamp.margin() {
            out[0] = clamp_axis(out[0], -dims.width / 2.0 + m, dims.width / 2.0 - m);
            out[1] = clamp_axis(out[1], 0.0, (dims.height - m).max(0.0));
            out[2] = clamp_axis(out[2], -dims.depth / 2.0 + m, dims.depth / 2.0 - m);
        }
        if self.grid_step > 0.0 {
            for v in out.iter_mut() {
                *v = snap(*v, self.grid_step);
            }
        }
        out
    }
}

/// An empty interval (room narrower than twice the margin) collapses to its midpoint.
fn clamp_axis(v: f64, lo: f64, hi: f64) -> f64 {
    if lo > hi {
        return (lo + hi) / 2.0;
    }
    v.clamp(lo, hi)
}

/// A step too fine for `v` (quotient overflows) leaves `v` unsnapped.
fn snap(v: f64, step: f64) -> f64 {
    let snapped = (v / step).round() * step;
    if !snapped.is_finite() {
        return v;
    }
    // + 0.0 folds -0.0 into 0.0 so output stays byte-stable
    snapped + 0.0
}

/// Return a normalized copy of `doc`; the input is never touched.
pub fn normalize(doc: &RoomDescription, policy: &NormalizePolicy) -> RoomDescription {
    let mut out = doc.clone();
    if policy.is_identity() {
        return out;
    }
    let dims = doc.structure.dimensions;

    for device in out.devices.iter_mut() {
        device.position = policy.apply(&dims, device.position);
    }
    for decor in out.structure.decor.iter_mut() {
        if let Some(p) = decor.position {
            decor.position = Some(policy.apply(&dims, p));
        }
    }
    out
}
