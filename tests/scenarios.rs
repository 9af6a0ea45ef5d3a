use pretty_assertions::assert_eq;
use qcnn::quant::Acc;
use qcnn::reference;
use qcnn::stage::{argmax, ConvParams, ConvStage, Stage, WindowGeometry, Windower};
use qcnn::{Code, CodeScheme, Layer, Model, Pipeline, PipelineConfig, QuantizedTensor, Shape, ThresholdBank, WeightKernel};
use std::sync::Arc;

fn ramp_4x4() -> QuantizedTensor {
    let mags: Vec<u8> = (1..=16).collect();
    QuantizedTensor::from_magnitudes(Shape::new(4, 4, 1), &mags).unwrap()
}

#[test]
fn all_zero_input_yields_ladder_code_of_zero() {
    let scheme = CodeScheme::power_of_two(3).unwrap();
    let weights = WeightKernel::constant(3, 3, 1, Code::ZERO);
    // ch0: 0 is below every cut, ch1: 0 meets the first cut, ch2: 0 meets two
    let thresholds = ThresholdBank::new(3, vec![vec![1, 2, 3], vec![0, 5, 9], vec![-4, 0, 7]]).unwrap();
    let layers = vec![
        Layer::conv(weights, thresholds),
        Layer::Dense { classes: 2, weights: vec![Code::ZERO; 2 * 4 * 4 * 3] },
    ];
    let model = Arc::new(Model::new(scheme, Shape::new(6, 6, 1), layers).unwrap());
    let mut p = Pipeline::new(model.clone(), PipelineConfig::default()).unwrap();
    let img = QuantizedTensor::zeros(Shape::new(6, 6, 1));
    let feats = p.run_features(&img).unwrap();
    assert_eq!(feats.shape(), Shape::new(4, 4, 3));
    for px in feats.pixels() {
        assert_eq!(px, &[Code::ZERO, Code::positive(1), Code::positive(2)]);
    }
    assert_eq!(p.scores(&img).unwrap().scores(), &[0, 0]);
    assert_eq!(p.classify(&img).unwrap(), 0);
}

#[test]
fn ramp_image_with_ones_kernel() {
    let scheme = Arc::new(CodeScheme::linear(5).unwrap());
    let geom = WindowGeometry::valid(Shape::new(4, 4, 1), 3);
    let weights = WeightKernel::constant(1, 3, 1, Code::positive(1));
    let thresholds = ThresholdBank::new(3, vec![vec![60, 80, 100]]).unwrap();
    let params = Arc::new(ConvParams::new(geom, weights, thresholds, &scheme).unwrap());
    let img = ramp_4x4();

    assert_eq!(reference::conv_accumulators(&scheme, &params, &img).unwrap(), vec![54, 63, 90, 99]);

    let mut stage = ConvStage::new(params.clone(), scheme.clone()).unwrap();
    let mut windower = Windower::new(geom).unwrap();
    let mut accs: Vec<Acc> = Vec::new();
    let mut buf = Vec::new();
    for px in img.pixels() {
        windower.push(px).unwrap();
        while let Some(w) = windower.pop() {
            stage.accumulate(&w, &mut buf);
            accs.extend_from_slice(&buf);
        }
    }
    assert_eq!(accs, vec![54, 63, 90, 99]);

    let out = stage.forward(&img).unwrap();
    assert_eq!(out.shape(), Shape::new(2, 2, 1));
    assert_eq!(out.data(), &[Code::ZERO, Code::positive(1), Code::positive(2), Code::positive(2)]);
}

#[test]
fn windower_waits_for_k_minus_one_rows() {
    let geom = WindowGeometry::valid(Shape::new(4, 4, 1), 3);
    let mut w = Windower::new(geom).unwrap();
    for i in 0..8 {
        w.push(&[Code::positive((i % 8) as u8)]).unwrap();
        assert_eq!(w.emitted(), 0, "no window before row 2 (pixel {})", i);
    }
    w.push(&[Code::ZERO]).unwrap();
    w.push(&[Code::ZERO]).unwrap();
    assert_eq!(w.emitted(), 0);
    w.push(&[Code::ZERO]).unwrap();
    assert_eq!(w.emitted(), 1);
    let win = w.pop().unwrap();
    assert_eq!((win.row, win.col), (0, 0));
    assert_eq!(w.pending(), 0);
}

#[test]
fn argmax_prefers_earliest_on_ties() {
    assert_eq!(argmax(&[10, 7]), Some(0));
    assert_eq!(argmax(&[7, 7]), Some(0));
    assert_eq!(argmax(&[7, 10]), Some(1));
}

#[test]
fn mismatched_image_is_rejected_before_streaming() {
    let scheme = CodeScheme::power_of_two(2).unwrap();
    let layers = vec![Layer::MaxPool, Layer::Dense { classes: 2, weights: vec![Code::ZERO; 2 * 2 * 2] }];
    let model = Arc::new(Model::new(scheme, Shape::new(4, 4, 1), layers).unwrap());
    let mut p = Pipeline::new(model, PipelineConfig::default()).unwrap();
    let small = QuantizedTensor::zeros(Shape::new(3, 4, 1));
    assert!(matches!(p.classify(&small), Err(qcnn::QcnnError::ImageSize { expected: 16, actual: 12 })));
    let transposed = QuantizedTensor::zeros(Shape::new(2, 8, 1));
    assert!(matches!(p.classify(&transposed), Err(qcnn::QcnnError::ShapeMismatch { .. })));
    // still usable afterwards
    assert_eq!(p.classify(&QuantizedTensor::zeros(Shape::new(4, 4, 1))).unwrap(), 0);
}
