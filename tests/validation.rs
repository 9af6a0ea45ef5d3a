use qcnn::quant::mac::{check_accumulator, required_bits};
use qcnn::{Code, CodeScheme, Layer, Model, QcnnError, Shape, ThresholdBank, WeightKernel};

fn scheme() -> CodeScheme { CodeScheme::power_of_two(3).unwrap() }

#[test]
fn conv_channel_mismatch() {
    let layers = vec![
        Layer::conv(WeightKernel::constant(2, 3, 3, Code::positive(1)), ThresholdBank::new(1, vec![vec![0]; 2]).unwrap()),
        Layer::Dense { classes: 1, weights: vec![Code::ZERO; 4 * 4 * 2] },
    ];
    let err = Model::new(scheme(), Shape::new(6, 6, 1), layers).unwrap_err();
    assert!(matches!(err, QcnnError::ShapeMismatch { .. }), "{}", err);
}

#[test]
fn ladder_length_mismatch_names_the_channel() {
    let err = ThresholdBank::new(3, vec![vec![0, 1, 2], vec![0, 1]]).unwrap_err();
    assert!(matches!(err, QcnnError::LadderLength { channel: 1, expected: 3, actual: 2 }));
}

#[test]
fn non_monotonic_ladder() {
    let err = ThresholdBank::new(3, vec![vec![0, 5, 5]]).unwrap_err();
    assert!(matches!(err, QcnnError::NonMonotonicLadder { channel: 0, index: 2 }));
    let err = ThresholdBank::new(2, vec![vec![1, 2], vec![4, -4]]).unwrap_err();
    assert!(matches!(err, QcnnError::NonMonotonicLadder { channel: 1, index: 1 }));
}

#[test]
fn even_kernel_and_oversized_kernel() {
    let even = vec![
        Layer::conv(WeightKernel::constant(1, 2, 1, Code::ZERO), ThresholdBank::new(1, vec![vec![0]]).unwrap()),
        Layer::Dense { classes: 1, weights: vec![Code::ZERO; 9] },
    ];
    assert!(matches!(Model::new(scheme(), Shape::new(4, 4, 1), even), Err(QcnnError::InvalidGeometry(_))));
    let big = vec![
        Layer::conv(WeightKernel::constant(1, 5, 1, Code::ZERO), ThresholdBank::new(1, vec![vec![0]]).unwrap()),
        Layer::Dense { classes: 1, weights: vec![Code::ZERO; 1] },
    ];
    assert!(matches!(Model::new(scheme(), Shape::new(4, 4, 1), big), Err(QcnnError::InvalidGeometry(_))));
}

#[test]
fn pooling_a_single_row_is_rejected() {
    let layers = vec![Layer::MaxPool, Layer::Dense { classes: 1, weights: vec![] }];
    assert!(matches!(Model::new(scheme(), Shape::new(1, 8, 1), layers), Err(QcnnError::InvalidGeometry(_))));
}

#[test]
fn accumulator_width_is_checked_statically() {
    let wide = CodeScheme::linear(7).unwrap();
    // 127^2 * 200_000 needs 33 bits
    assert_eq!(required_bits(200_000, wide.max_product()), 33);
    assert!(matches!(check_accumulator("dense", 200_000, &wide), Err(QcnnError::AccumulatorTooNarrow { required: 33, available: 32, .. })));
    assert!(check_accumulator("dense", 4 * 4 * 16, &wide).is_ok());
}

#[test]
fn errors_render_readably() {
    let err = QcnnError::ImageSize { expected: 784, actual: 783 };
    assert_eq!(err.to_string(), "image has 783 codes, expected 784");
    assert_eq!(QcnnError::Cancelled.to_string(), "classification cancelled");
}
