//! The "CODEC" Engine - Affine Matrix Decomposition
//!
//! Converts the 16-element pose matrices exchanged with the host and the AR
//! runtime into scale / translation / rotation components a scene graph can
//! consume, and back again.
//!
//! Pipeline:
//! 1. Scale from the length of each basis vector
//! 2. Translation straight from elements 12..14
//! 3. Rotation block normalised by the scale, then converted to a quaternion
//!    with trace-based branch selection
//! 4. Fixed engine axis correction (see [`AxisConvention`])

use nalgebra::{Matrix3, Matrix4, Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

// ============================================================================
// POSE MATRIX (Wire Layout)
// ============================================================================

/// A 4×4 affine transform as 16 numbers.
///
/// Element `i * 4 + j` is component `j` of row `i`. Rows 0..2 are the scaled
/// X, Y and Z basis vectors and row 3 carries the translation, so the layout
/// is byte-for-byte the column-major storage of the equivalent
/// column-vector matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseMatrix(pub [f64; 16]);

impl PoseMatrix {
    pub const IDENTITY: PoseMatrix = PoseMatrix([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Uniform scale matrix, as built from the host's `scaleFactor`.
    pub fn uniform_scale(factor: f64) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0] = factor;
        m.0[5] = factor;
        m.0[10] = factor;
        m
    }

    /// Pure translation.
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        let mut m = Self::IDENTITY;
        m.0[12] = x;
        m.0[13] = y;
        m.0[14] = z;
        m
    }

    /// Builds a matrix from a host-supplied list; needs at least 16 values.
    pub fn from_slice(values: &[f64]) -> Result<Self, DecompositionError> {
        if values.len() < 16 {
            return Err(DecompositionError::WrongLength(values.len()));
        }
        let mut elements = [0.0; 16];
        elements.copy_from_slice(&values[..16]);
        Ok(Self(elements))
    }

    #[inline]
    pub fn elements(&self) -> &[f64; 16] {
        &self.0
    }

    /// Basis vector for `axis` (0 = X, 1 = Y, 2 = Z), still carrying scale.
    #[inline]
    pub fn basis(&self, axis: usize) -> Vector3<f64> {
        let o = axis * 4;
        Vector3::new(self.0[o], self.0[o + 1], self.0[o + 2])
    }

    #[inline]
    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.0[12], self.0[13], self.0[14])
    }

    /// Column-vector nalgebra matrix with the same meaning.
    pub fn to_matrix4(&self) -> Matrix4<f64> {
        Matrix4::from_column_slice(&self.0)
    }

    pub fn from_matrix4(m: &Matrix4<f64>) -> Self {
        let mut elements = [0.0; 16];
        elements.copy_from_slice(m.as_slice());
        Self(elements)
    }

    /// Largest absolute element-wise difference to `other`.
    pub fn max_abs_diff(&self, other: &PoseMatrix) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl Default for PoseMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ============================================================================
// DECOMPOSED TRANSFORM (Output)
// ============================================================================

/// Scale, translation and orientation of a node.
///
/// Only [`TransformCodec`] produces these from raw matrices; manipulation
/// goes through [`translated`](Self::translated) and
/// [`rotated`](Self::rotated), which return new values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecomposedTransform {
    scale: Vector3<f64>,
    translation: Vector3<f64>,
    rotation: UnitQuaternion<f64>,
}

impl DecomposedTransform {
    pub(crate) fn from_parts(
        scale: Vector3<f64>,
        translation: Vector3<f64>,
        rotation: UnitQuaternion<f64>,
    ) -> Self {
        Self {
            scale,
            translation,
            rotation,
        }
    }

    /// Each component is strictly positive.
    #[inline]
    pub fn scale(&self) -> Vector3<f64> {
        self.scale
    }

    #[inline]
    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// Unit-length orientation, already in the scene's axis convention.
    #[inline]
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.rotation
    }

    /// Same transform moved by `delta` in parent space.
    pub fn translated(&self, delta: &Vector3<f64>) -> Self {
        Self {
            translation: self.translation + delta,
            ..*self
        }
    }

    /// Same transform with `delta` applied in local space (`rotation * delta`).
    pub fn rotated(&self, delta: &UnitQuaternion<f64>) -> Self {
        Self {
            rotation: self.rotation * delta,
            ..*self
        }
    }
}

// ============================================================================
// AXIS CONVENTION (Configuration)
// ============================================================================

/// Fixed corrective rotation appended to every decoded orientation.
///
/// The correction belongs to the rendering engine's handedness, not to the
/// decomposition: `decoded * correction`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AxisConvention {
    /// 180° about Y composed with 180° about Z (net: 180° about X).
    #[default]
    Sceneform,

    /// No correction.
    Identity,

    /// Arbitrary correction quaternion; normalised on use.
    Custom { w: f64, x: f64, y: f64, z: f64 },
}

impl AxisConvention {
    pub fn correction(&self) -> UnitQuaternion<f64> {
        match *self {
            AxisConvention::Sceneform => {
                let y = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI);
                let z = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), PI);
                y * z
            }
            AxisConvention::Identity => UnitQuaternion::identity(),
            AxisConvention::Custom { w, x, y, z } => {
                UnitQuaternion::new_normalize(Quaternion::new(w, x, y, z))
            }
        }
    }
}

// ============================================================================
// TRANSFORM CODEC (The Engine)
// ============================================================================

/// Stateless matrix ⇄ components converter for one axis convention.
#[derive(Debug, Clone)]
pub struct TransformCodec {
    convention: AxisConvention,
    correction: UnitQuaternion<f64>,
}

impl TransformCodec {
    pub fn new(convention: AxisConvention) -> Self {
        Self {
            convention,
            correction: convention.correction(),
        }
    }

    pub fn convention(&self) -> AxisConvention {
        self.convention
    }

    /// The constant rotation applied after decoding.
    pub fn correction(&self) -> UnitQuaternion<f64> {
        self.correction
    }

    /// Decompose an affine matrix into scale, translation and rotation.
    ///
    /// Skewed rotation blocks are only scale-corrected, not
    /// polar-decomposed; the result for such input is a best effort.
    ///
    /// # Errors
    /// * `NonFinite` - any element is NaN or infinite
    /// * `DegenerateScale` - a basis vector has zero length
    /// * `ScaleOutOfRange` - a basis vector is too long to represent
    /// * `InvalidRotation` - the normalised block does not yield a quaternion
    pub fn decompose(&self, m: &PoseMatrix) -> Result<DecomposedTransform, DecompositionError> {
        if m.0.iter().any(|v| !v.is_finite()) {
            return Err(DecompositionError::NonFinite);
        }

        // Stage 1: scale
        let basis = [m.basis(0), m.basis(1), m.basis(2)];
        let scale = Vector3::new(
            basis_length(&basis[0]),
            basis_length(&basis[1]),
            basis_length(&basis[2]),
        );
        for axis in 0..3 {
            if scale[axis] <= 0.0 {
                return Err(DecompositionError::DegenerateScale {
                    axis: AXIS_NAMES[axis],
                });
            }
            if !scale[axis].is_finite() {
                return Err(DecompositionError::ScaleOutOfRange {
                    axis: AXIS_NAMES[axis],
                });
            }
        }

        // Stage 2: translation
        let translation = m.translation();

        // Stage 3: rotation
        let rotation_block = Matrix3::from_columns(&[
            basis[0] / scale.x,
            basis[1] / scale.y,
            basis[2] / scale.z,
        ]);
        let decoded = rotation_from_matrix(&rotation_block)?;

        // Stage 4: engine convention
        let rotation = decoded * self.correction;

        Ok(DecomposedTransform::from_parts(scale, translation, rotation))
    }

    /// Exact inverse of [`decompose`](Self::decompose): strips the
    /// correction and composes `T * R * S`.
    pub fn encode(&self, transform: &DecomposedTransform) -> PoseMatrix {
        let decoded = transform.rotation * self.correction.inverse();
        let m = Matrix4::new_translation(&transform.translation)
            * decoded.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&transform.scale);
        PoseMatrix::from_matrix4(&m)
    }
}

impl Default for TransformCodec {
    fn default() -> Self {
        Self::new(AxisConvention::default())
    }
}

const AXIS_NAMES: [char; 3] = ['x', 'y', 'z'];

/// Euclidean length without squaring raw components, so neither huge nor
/// tiny (subnormal-range) bases over- or underflow.
fn basis_length(v: &Vector3<f64>) -> f64 {
    let largest = v.amax();
    if largest == 0.0 {
        return 0.0;
    }
    largest * (v / largest).norm()
}

/// Orthonormal 3×3 → unit quaternion.
///
/// Trace branch when the trace is positive, otherwise the branch of the
/// largest diagonal element. Ties go to the lower axis index (X before Y
/// before Z), so identical input always takes the same branch.
fn rotation_from_matrix(r: &Matrix3<f64>) -> Result<UnitQuaternion<f64>, DecompositionError> {
    let (r00, r11, r22) = (r[(0, 0)], r[(1, 1)], r[(2, 2)]);
    let trace = r00 + r11 + r22;

    // (w, x, y, z); the pivot component is always the positive 0.25 * s
    let (w, x, y, z) = if trace > 0.0 {
        let s = (trace + 1.0).sqrt() * 2.0;
        (
            0.25 * s,
            (r[(2, 1)] - r[(1, 2)]) / s,
            (r[(0, 2)] - r[(2, 0)]) / s,
            (r[(1, 0)] - r[(0, 1)]) / s,
        )
    } else if r00 >= r11 && r00 >= r22 {
        let s = (1.0 + r00 - r11 - r22).sqrt() * 2.0;
        (
            (r[(2, 1)] - r[(1, 2)]) / s,
            0.25 * s,
            (r[(0, 1)] + r[(1, 0)]) / s,
            (r[(0, 2)] + r[(2, 0)]) / s,
        )
    } else if r11 >= r22 {
        let s = (1.0 + r11 - r00 - r22).sqrt() * 2.0;
        (
            (r[(0, 2)] - r[(2, 0)]) / s,
            (r[(0, 1)] + r[(1, 0)]) / s,
            0.25 * s,
            (r[(1, 2)] + r[(2, 1)]) / s,
        )
    } else {
        let s = (1.0 + r22 - r00 - r11).sqrt() * 2.0;
        (
            (r[(1, 0)] - r[(0, 1)]) / s,
            (r[(0, 2)] + r[(2, 0)]) / s,
            (r[(1, 2)] + r[(2, 1)]) / s,
            0.25 * s,
        )
    };

    let q = Quaternion::new(w, x, y, z);
    let norm = q.norm();
    if !norm.is_finite() || norm == 0.0 {
        return Err(DecompositionError::InvalidRotation);
    }
    Ok(UnitQuaternion::new_normalize(q))
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur while decomposing a pose matrix.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecompositionError {
    #[error("Transformation matrix must have at least 16 elements, but has {0}")]
    WrongLength(usize),

    #[error("Matrix contains non-finite elements")]
    NonFinite,

    #[error("Degenerate scale: {axis} basis vector has zero length")]
    DegenerateScale { axis: char },

    #[error("Scale out of range: {axis} basis vector length overflows")]
    ScaleOutOfRange { axis: char },

    #[error("Rotation block does not describe a rotation")]
    InvalidRotation,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn compose(scale: Vector3<f64>, translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> PoseMatrix {
        let m = Matrix4::new_translation(&translation)
            * rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&scale);
        PoseMatrix::from_matrix4(&m)
    }

    #[test]
    fn test_identity_shows_correction() {
        let codec = TransformCodec::new(AxisConvention::Sceneform);
        let t = codec.decompose(&PoseMatrix::IDENTITY).unwrap();

        assert_relative_eq!(t.scale(), Vector3::new(1.0, 1.0, 1.0), epsilon = 1e-12);
        assert_relative_eq!(t.translation(), Vector3::zeros(), epsilon = 1e-12);

        // Not identity: a half turn about X
        assert_relative_eq!(t.rotation().angle(), PI, epsilon = 1e-9);
        assert_relative_eq!(t.rotation().i.abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(t.rotation().angle_to(&codec.correction()), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_identity_convention_is_plain_decomposition() {
        let codec = TransformCodec::new(AxisConvention::Identity);
        let t = codec.decompose(&PoseMatrix::IDENTITY).unwrap();
        assert_relative_eq!(t.rotation().angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_uniform_scale_factor() {
        let codec = TransformCodec::default();
        let t = codec.decompose(&PoseMatrix::uniform_scale(0.25)).unwrap();
        assert_relative_eq!(t.scale(), Vector3::new(0.25, 0.25, 0.25), epsilon = 1e-12);
    }

    #[test]
    fn test_translation_read_from_last_row() {
        let codec = TransformCodec::default();
        let t = codec
            .decompose(&PoseMatrix::from_translation(1.5, -2.0, 3.25))
            .unwrap();
        assert_relative_eq!(t.translation(), Vector3::new(1.5, -2.0, 3.25));
    }

    #[test]
    fn test_zero_basis_vector_is_degenerate() {
        let codec = TransformCodec::default();
        for axis in 0..3 {
            let mut m = PoseMatrix::IDENTITY;
            m.0[axis * 5] = 0.0;
            let err = codec.decompose(&m).unwrap_err();
            assert_eq!(
                err,
                DecompositionError::DegenerateScale {
                    axis: AXIS_NAMES[axis]
                }
            );
        }
    }

    #[test]
    fn test_huge_basis_keeps_finite_scale() {
        let codec = TransformCodec::new(AxisConvention::Identity);
        let mut m = PoseMatrix::IDENTITY;
        m.0[0] = 1e200;

        let t = codec.decompose(&m).unwrap();
        assert_relative_eq!(t.scale().x, 1e200, max_relative = 1e-12);
        assert_relative_eq!(t.rotation().angle(), 0.0, epsilon = 1e-12);
        assert!(codec.encode(&t).elements().iter().all(|v| v.is_finite()));
        assert_relative_eq!(codec.encode(&t).elements()[0], 1e200, max_relative = 1e-12);
    }

    #[test]
    fn test_tiny_basis_is_not_degenerate() {
        let codec = TransformCodec::new(AxisConvention::Identity);
        let mut m = PoseMatrix::IDENTITY;
        m.0[0] = 1e-170;

        let t = codec.decompose(&m).unwrap();
        assert_relative_eq!(t.scale().x, 1e-170, max_relative = 1e-12);
        assert_relative_eq!(t.rotation().angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_overflowing_length_rejected() {
        let codec = TransformCodec::default();
        let mut m = PoseMatrix::IDENTITY;
        m.0[4] = f64::MAX;
        m.0[5] = f64::MAX;
        assert_eq!(
            codec.decompose(&m),
            Err(DecompositionError::ScaleOutOfRange { axis: 'y' })
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        let codec = TransformCodec::default();
        let mut m = PoseMatrix::IDENTITY;
        m.0[13] = f64::NAN;
        assert_eq!(codec.decompose(&m), Err(DecompositionError::NonFinite));
    }

    #[test]
    fn test_from_slice_requires_sixteen() {
        assert_eq!(
            PoseMatrix::from_slice(&[1.0; 9]),
            Err(DecompositionError::WrongLength(9))
        );
        let m = PoseMatrix::from_slice(&PoseMatrix::IDENTITY.0).unwrap();
        assert_eq!(m, PoseMatrix::IDENTITY);
    }

    #[test]
    fn test_every_branch_matches_reference_rotation() {
        let codec = TransformCodec::new(AxisConvention::Identity);
        // Small angle hits the trace branch, near-half-turns hit X, Y and Z
        let cases = [
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.3),
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 3.0),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 3.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 3.0),
            UnitQuaternion::from_euler_angles(2.9, -0.4, 1.7),
        ];

        for expected in cases {
            let m = compose(Vector3::new(2.0, 0.5, 3.0), Vector3::new(1.0, 2.0, 3.0), expected);
            let t = codec.decompose(&m).unwrap();
            assert_relative_eq!(t.rotation().angle_to(&expected), 0.0, epsilon = 1e-9);
            assert_relative_eq!(t.rotation().norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_diagonal_tie_is_deterministic() {
        // Half turn about (1,1,0)/√2 gives diag (0, 0, -1): X and Y tie
        let axis = nalgebra::Unit::new_normalize(Vector3::new(1.0, 1.0, 0.0));
        let expected = UnitQuaternion::from_axis_angle(&axis, PI);
        let m = compose(Vector3::new(1.0, 1.0, 1.0), Vector3::zeros(), expected);

        let codec = TransformCodec::new(AxisConvention::Identity);
        let a = codec.decompose(&m).unwrap();
        let b = codec.decompose(&m).unwrap();

        assert_eq!(a, b);
        assert_relative_eq!(a.rotation().angle_to(&expected), 0.0, epsilon = 1e-9);
        // X branch keeps x positive
        assert!(a.rotation().i > 0.0);
    }

    #[test]
    fn test_encode_inverts_decompose() {
        let codec = TransformCodec::new(AxisConvention::Sceneform);
        let original = compose(
            Vector3::new(0.1, 0.2, 0.3),
            Vector3::new(-4.0, 0.5, 9.0),
            UnitQuaternion::from_euler_angles(0.2, 1.1, -2.4),
        );

        let t = codec.decompose(&original).unwrap();
        let rebuilt = codec.encode(&t);
        assert!(original.max_abs_diff(&rebuilt) < 1e-9);
    }

    #[test]
    fn test_translated_and_rotated_return_new_values() {
        let codec = TransformCodec::default();
        let t = codec.decompose(&PoseMatrix::IDENTITY).unwrap();

        let moved = t.translated(&Vector3::new(0.1, 0.0, -0.2));
        assert_relative_eq!(moved.translation(), Vector3::new(0.1, 0.0, -0.2));
        assert_eq!(t.translation(), Vector3::zeros());

        let turn = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.5);
        let spun = t.rotated(&turn);
        assert_relative_eq!(spun.rotation().angle_to(&(t.rotation() * turn)), 0.0, epsilon = 1e-9);
        assert_eq!(spun.scale(), t.scale());
    }

    #[test]
    fn test_custom_convention_normalised() {
        let c = AxisConvention::Custom { w: 2.0, x: 0.0, y: 0.0, z: 0.0 };
        assert_relative_eq!(c.correction().angle(), 0.0, epsilon = 1e-12);
    }
}
