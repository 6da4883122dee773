//! Property tests for the transform codec.

use anchorview_core::{AxisConvention, DecompositionError, PoseMatrix, TransformCodec};
use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use proptest::prelude::*;

fn compose(scale: Vector3<f64>, translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> PoseMatrix {
    let m = Matrix4::new_translation(&translation)
        * rotation.to_homogeneous()
        * Matrix4::new_nonuniform_scaling(&scale);
    PoseMatrix::from_matrix4(&m)
}

fn scale_strategy() -> impl Strategy<Value = Vector3<f64>> {
    (0.1f64..10.0, 0.1f64..10.0, 0.1f64..10.0).prop_map(|(x, y, z)| Vector3::new(x, y, z))
}

fn translation_strategy() -> impl Strategy<Value = Vector3<f64>> {
    (-100.0f64..100.0, -100.0f64..100.0, -100.0f64..100.0).prop_map(|(x, y, z)| Vector3::new(x, y, z))
}

fn rotation_strategy() -> impl Strategy<Value = UnitQuaternion<f64>> {
    let angle = -std::f64::consts::PI..std::f64::consts::PI;
    (angle.clone(), angle.clone(), angle).prop_map(|(r, p, y)| UnitQuaternion::from_euler_angles(r, p, y))
}

fn convention_strategy() -> impl Strategy<Value = AxisConvention> {
    prop_oneof![Just(AxisConvention::Sceneform), Just(AxisConvention::Identity)]
}

proptest! {
    #[test]
    fn decompose_then_encode_reconstructs(
        scale in scale_strategy(),
        translation in translation_strategy(),
        rotation in rotation_strategy(),
        convention in convention_strategy(),
    ) {
        let codec = TransformCodec::new(convention);
        let m = compose(scale, translation, rotation);

        let decomposed = codec.decompose(&m).unwrap();
        let rebuilt = codec.encode(&decomposed);

        prop_assert!(m.max_abs_diff(&rebuilt) < 1e-9, "diff {}", m.max_abs_diff(&rebuilt));
        prop_assert!((decomposed.scale() - scale).amax() < 1e-9);
        prop_assert!((decomposed.translation() - translation).amax() < 1e-12);
    }

    #[test]
    fn rotation_is_unit_and_scale_positive(
        scale in scale_strategy(),
        translation in translation_strategy(),
        rotation in rotation_strategy(),
    ) {
        let decomposed = TransformCodec::default()
            .decompose(&compose(scale, translation, rotation))
            .unwrap();

        prop_assert!((decomposed.rotation().quaternion().norm() - 1.0).abs() < 1e-12);
        prop_assert!(decomposed.scale().iter().all(|s| *s > 0.0));
    }

    #[test]
    fn zero_basis_vector_is_degenerate(
        scale in scale_strategy(),
        translation in translation_strategy(),
        rotation in rotation_strategy(),
        axis in 0usize..3,
    ) {
        let mut m = compose(scale, translation, rotation);
        for j in 0..3 {
            m.0[axis * 4 + j] = 0.0;
        }

        let err = TransformCodec::default().decompose(&m).unwrap_err();
        prop_assert_eq!(err, DecompositionError::DegenerateScale { axis: ['x', 'y', 'z'][axis] });
    }

    #[test]
    fn identical_input_gives_identical_output(
        scale in scale_strategy(),
        rotation in rotation_strategy(),
    ) {
        let codec = TransformCodec::default();
        let m = compose(scale, Vector3::zeros(), rotation);
        prop_assert_eq!(codec.decompose(&m).unwrap(), codec.decompose(&m).unwrap());
    }
}
