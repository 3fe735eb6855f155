/// Axis-aligned bounds of a set of points with finite coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Aabb {
    /// Bounds over columnar coordinates, skipping points with any non-finite
    /// coordinate. `None` when no point is left.
    pub fn from_xyz(x: &[f64], y: &[f64], z: &[f64]) -> Option<Self> {
        x.iter()
            .zip(y)
            .zip(z)
            .map(|((x, y), z)| [*x, *y, *z])
            .filter(|p| p.iter().all(|v| v.is_finite()))
            .fold(None, |acc: Option<Aabb>, p| {
                Some(match acc {
                    None => Aabb { min: p, max: p },
                    Some(b) => Aabb {
                        min: [0, 1, 2].map(|a| b.min[a].min(p[a])),
                        max: [0, 1, 2].map(|a| b.max[a].max(p[a])),
                    },
                })
            })
    }

    pub fn extent(&self) -> [f64; 3] {
        [0, 1, 2].map(|a| self.max[a] - self.min[a])
    }

    pub fn range(&self, axis: usize) -> (f64, f64) {
        (self.min[axis], self.max[axis])
    }
}
