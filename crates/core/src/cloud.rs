use crate::point::RING_NONE;
use crate::{Aabb, PointRecord};

/// Accumulated point set, all points in one reference frame.
///
/// Stored column-wise. Missing intensity is `NaN` in the intensity column and
/// missing ring is [`RING_NONE`]; [`PointCloud::record`] turns both back into
/// `None`. There are no mutating accessors: a cloud is frozen once built.
#[derive(Debug, Clone)]
pub struct PointCloud {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
    intensity: Vec<f32>,
    ring: Vec<u8>,
    frame_count: usize,
}

/// Summary statistics of a cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudStats {
    pub points: usize,
    pub frame_count: usize,
    pub x_range: Option<(f64, f64)>,
    pub y_range: Option<(f64, f64)>,
    pub z_range: Option<(f64, f64)>,
    pub intensity_range: Option<(f32, f32)>,
    /// Points per square unit of the XY bound, `None` for a zero-area bound.
    pub planar_density: Option<f64>,
}

impl PointCloud {
    pub fn new() -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
            intensity: Vec::new(),
            ring: Vec::new(),
            frame_count: 0,
        }
    }

    pub fn from_xyz(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Self {
        assert_eq!(x.len(), y.len(), "x and y must have same length");
        assert_eq!(x.len(), z.len(), "x and z must have same length");

        let n = x.len();
        Self {
            x,
            y,
            z,
            intensity: vec![f32::NAN; n],
            ring: vec![RING_NONE; n],
            frame_count: 0,
        }
    }

    pub fn from_columns(
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<f64>,
        intensity: Vec<f32>,
        ring: Vec<u8>,
        frame_count: usize,
    ) -> Self {
        assert_eq!(x.len(), y.len(), "x and y must have same length");
        assert_eq!(x.len(), z.len(), "x and z must have same length");
        assert_eq!(x.len(), intensity.len(), "intensity column length mismatch");
        assert_eq!(x.len(), ring.len(), "ring column length mismatch");

        Self {
            x,
            y,
            z,
            intensity,
            ring,
            frame_count,
        }
    }

    pub fn from_records(records: &[PointRecord], frame_count: usize) -> Self {
        let mut builder = CloudBuilder::with_capacity(records.len());
        builder.extend(records.iter().copied());
        builder.frame_count = frame_count;
        builder.finish()
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.x.len(), self.y.len());
        debug_assert_eq!(self.x.len(), self.z.len());
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Number of frames merged into this cloud.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn z(&self) -> &[f64] {
        &self.z
    }

    /// Raw intensity column; `NaN` marks points without intensity.
    pub fn intensity(&self) -> &[f32] {
        &self.intensity
    }

    /// Raw ring column; [`RING_NONE`] marks points without ring.
    pub fn ring(&self) -> &[u8] {
        &self.ring
    }

    pub fn has_intensity(&self) -> bool {
        self.intensity.iter().any(|i| !i.is_nan())
    }

    /// Bounds of the finite points; `None` for a cloud without any.
    pub fn aabb(&self) -> Option<Aabb> {
        Aabb::from_xyz(&self.x, &self.y, &self.z)
    }

    pub fn point(&self, i: usize) -> [f64; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    pub fn record(&self, i: usize) -> PointRecord {
        let intensity = self.intensity[i];
        let ring = self.ring[i];
        PointRecord {
            x: self.x[i],
            y: self.y[i],
            z: self.z[i],
            intensity: (!intensity.is_nan()).then_some(intensity),
            ring: (ring != RING_NONE).then_some(ring),
        }
    }

    pub fn iter_points(&self) -> impl Iterator<Item = [f64; 3]> + '_ {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.z)
            .map(|((x, y), z)| [*x, *y, *z])
    }

    pub fn iter_records(&self) -> impl Iterator<Item = PointRecord> + '_ {
        (0..self.len()).map(|i| self.record(i))
    }

    pub fn select(&self, indices: &[usize]) -> Self {
        let mut builder = CloudBuilder::with_capacity(indices.len());
        for &idx in indices {
            assert!(idx < self.len(), "index out of bounds in select");
            builder.push(self.record(idx));
        }
        builder.frame_count = self.frame_count;
        builder.finish()
    }

    pub fn stats(&self) -> CloudStats {
        let aabb = self.aabb();
        let range = |axis: usize| aabb.map(|b| b.range(axis));

        let intensity_range = self
            .intensity
            .iter()
            .filter(|i| !i.is_nan())
            .fold(None, |acc: Option<(f32, f32)>, &i| match acc {
                None => Some((i, i)),
                Some((lo, hi)) => Some((lo.min(i), hi.max(i))),
            });

        let area = aabb.map_or(0.0, |b| b.extent()[0] * b.extent()[1]);
        let planar_density = (area > 0.0).then(|| self.len() as f64 / area);

        CloudStats {
            points: self.len(),
            frame_count: self.frame_count,
            x_range: range(0),
            y_range: range(1),
            z_range: range(2),
            intensity_range,
            planar_density,
        }
    }
}

impl PartialEq for PointCloud {
    // NaN intensity sentinels compare equal to each other.
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x
            && self.y == other.y
            && self.z == other.z
            && self.ring == other.ring
            && self.frame_count == other.frame_count
            && self.intensity.len() == other.intensity.len()
            && self
                .intensity
                .iter()
                .zip(&other.intensity)
                .all(|(a, b)| a == b || (a.is_nan() && b.is_nan()))
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only staging area for a [`PointCloud`].
#[derive(Debug, Clone, Default)]
pub struct CloudBuilder {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
    intensity: Vec<f32>,
    ring: Vec<u8>,
    pub frame_count: usize,
}

impl CloudBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            z: Vec::with_capacity(n),
            intensity: Vec::with_capacity(n),
            ring: Vec::with_capacity(n),
            frame_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn push(&mut self, p: PointRecord) {
        self.x.push(p.x);
        self.y.push(p.y);
        self.z.push(p.z);
        self.intensity.push(p.intensity.unwrap_or(f32::NAN));
        self.ring.push(p.ring.unwrap_or(RING_NONE));
    }

    pub fn extend(&mut self, points: impl IntoIterator<Item = PointRecord>) {
        for p in points {
            self.push(p);
        }
    }

    pub fn finish(self) -> PointCloud {
        PointCloud::from_columns(
            self.x,
            self.y,
            self.z,
            self.intensity,
            self.ring,
            self.frame_count,
        )
    }
}
