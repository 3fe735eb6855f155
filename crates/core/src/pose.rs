use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Homogeneous 4x4 transform placing a frame's points in a common reference.
///
/// A `Pose` is not guaranteed to be rigid: it is whatever the capture carried.
/// Use [`Pose::rigidity_error`] or [`Pose::is_rigid`] before trusting it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Row-major matrix, `matrix[row][col]`.
    pub matrix: [[f64; 4]; 4],
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    pub fn from_rotation_translation(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        let mut matrix = Self::identity().matrix;
        for r in 0..3 {
            matrix[r][..3].copy_from_slice(&rotation[r]);
            matrix[r][3] = translation[r];
        }
        Self { matrix }
    }

    pub fn from_translation(translation: [f64; 3]) -> Self {
        Self::from_rotation_translation(Self::identity().rotation(), translation)
    }

    /// Rotation of `yaw` radians about +Z followed by `translation`.
    pub fn from_yaw(yaw: f64, translation: [f64; 3]) -> Self {
        let (s, c) = yaw.sin_cos();
        Self::from_rotation_translation([[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]], translation)
    }

    /// Builds a pose from 16 row-major values, the layout used on the wire.
    pub fn from_row_major(values: &[f64]) -> Result<Self, ValidationError> {
        if values.len() != 16 {
            return Err(ValidationError::PoseLength(values.len()));
        }
        let mut matrix = [[0.0; 4]; 4];
        for (i, v) in values.iter().enumerate() {
            matrix[i / 4][i % 4] = *v;
        }
        Ok(Self { matrix })
    }

    pub fn to_row_major(&self) -> [f64; 16] {
        let mut out = [0.0; 16];
        for (i, v) in out.iter_mut().enumerate() {
            *v = self.matrix[i / 4][i % 4];
        }
        out
    }

    pub fn rotation(&self) -> [[f64; 3]; 3] {
        let m = &self.matrix;
        [
            [m[0][0], m[0][1], m[0][2]],
            [m[1][0], m[1][1], m[1][2]],
            [m[2][0], m[2][1], m[2][2]],
        ]
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.matrix[0][3], self.matrix[1][3], self.matrix[2][3]]
    }

    pub fn is_identity(&self, eps: f64) -> bool {
        self.approx_eq(&Self::identity(), eps)
    }

    pub fn approx_eq(&self, other: &Pose, eps: f64) -> bool {
        self.matrix
            .iter()
            .flatten()
            .zip(other.matrix.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= eps)
    }

    /// Largest deviation of this matrix from a proper rigid transform.
    ///
    /// Combines `|RᵀR - I|∞`, `|det R - 1|` and the bottom row's distance from
    /// `[0, 0, 0, 1]`. Returns `f64::INFINITY` if any element is non-finite.
    pub fn rigidity_error(&self) -> f64 {
        if !self.matrix.iter().flatten().all(|v| v.is_finite()) {
            return f64::INFINITY;
        }
        let r = mat3(&self.rotation());
        let gram = r.transpose() * r - Matrix3::identity();
        let ortho = gram.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let det = (r.determinant() - 1.0).abs();
        let bottom = self.matrix[3];
        let projective = bottom[0]
            .abs()
            .max(bottom[1].abs())
            .max(bottom[2].abs())
            .max((bottom[3] - 1.0).abs());
        ortho.max(det).max(projective)
    }

    pub fn is_rigid(&self, tolerance: f64) -> bool {
        self.rigidity_error() <= tolerance
    }

    /// Apply the transform to a single point: R * p + t
    pub fn apply_to_point(&self, p: &[f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        [
            m[0][0] * p[0] + m[0][1] * p[1] + m[0][2] * p[2] + m[0][3],
            m[1][0] * p[0] + m[1][1] * p[1] + m[1][2] * p[2] + m[1][3],
            m[2][0] * p[0] + m[2][1] * p[1] + m[2][2] * p[2] + m[2][3],
        ]
    }

    /// Compose two transforms: apply `self` first, then `other`.
    pub fn compose(&self, other: &Pose) -> Pose {
        from_mat4(&(mat4(&other.matrix) * mat4(&self.matrix)))
    }

    /// Inverse of a rigid transform: `[Rᵀ | -Rᵀt]`.
    ///
    /// Only meaningful when [`Pose::is_rigid`] holds.
    pub fn rigid_inverse(&self) -> Pose {
        let rt = mat3(&self.rotation()).transpose();
        let t = Vector3::from(self.translation());
        let t_inv = -(rt * t);
        let mut rotation = [[0.0; 3]; 3];
        for (r, row) in rotation.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = rt[(r, c)];
            }
        }
        Pose::from_rotation_translation(rotation, [t_inv[0], t_inv[1], t_inv[2]])
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

fn mat3(a: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::new(
        a[0][0], a[0][1], a[0][2], a[1][0], a[1][1], a[1][2], a[2][0], a[2][1], a[2][2],
    )
}

fn mat4(a: &[[f64; 4]; 4]) -> Matrix4<f64> {
    Matrix4::from_fn(|r, c| a[r][c])
}

fn from_mat4(m: &Matrix4<f64>) -> Pose {
    let mut matrix = [[0.0; 4]; 4];
    for (r, row) in matrix.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = m[(r, c)];
        }
    }
    Pose { matrix }
}
