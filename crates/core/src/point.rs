use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Ring value stored in point-cloud columns for points without a ring.
pub const RING_NONE: u8 = u8::MAX;

/// Canonical point produced by the assembler.
///
/// Optional channels are explicit: a missing intensity is `None`, never `0.0`,
/// because zero is a legitimate return strength.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: Option<f32>,
    pub ring: Option<u8>,
}

impl PointRecord {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            intensity: None,
            ring: None,
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = Some(intensity);
        self
    }

    pub fn with_ring(mut self, ring: u8) -> Self {
        self.ring = Some(ring);
        self
    }

    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Checks the coordinate and channel invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [("x", self.x), ("y", self.y), ("z", self.z)] {
            if !value.is_finite() {
                return Err(ValidationError::NonFinite { field, value });
            }
        }
        if let Some(i) = self.intensity {
            if !i.is_finite() {
                return Err(ValidationError::NonFinite {
                    field: "intensity",
                    value: i as f64,
                });
            }
        }
        if self.ring == Some(RING_NONE) {
            return Err(ValidationError::OutOfRange {
                field: "ring",
                value: RING_NONE as f64,
                min: 0.0,
                max: (RING_NONE - 1) as f64,
            });
        }
        Ok(())
    }
}
