use qcnn::quant::mac::{dot_codes, tree_depth, tree_reduce, MacReducer};
use qcnn::quant::Acc;
use qcnn::reference;
use qcnn::stage::{DenseParams, DenseStage, MaxPoolStage, Stage, WindowGeometry, Windower};
use qcnn::tensor::ClassWeights;
use qcnn::{Code, CodeScheme, QuantizedTensor, Shape, ThresholdLadder};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn random_codes(rng: &mut SmallRng, n: usize, max: u8, signed: bool) -> Vec<Code> {
    (0..n).map(|_| Code::new(signed && rng.gen_bool(0.5), rng.gen_range(0..=max))).collect()
}

#[test]
fn window_count_matches_output_extent() {
    let mut rng = SmallRng::seed_from_u64(11);
    for _ in 0..200 {
        let k = [1usize, 3, 5][rng.gen_range(0..3)];
        let h = rng.gen_range(1..12);
        let w = rng.gen_range(1..12);
        let padding = rng.gen_range(0..3);
        let stride = rng.gen_range(1..4);
        let geom = WindowGeometry { input: Shape::new(h, w, 2), kernel: k, stride, padding };
        if geom.validate().is_err() {
            assert!(h + 2 * padding < k || w + 2 * padding < k);
            continue;
        }
        let oh = (h + 2 * padding - k) / stride + 1;
        let ow = (w + 2 * padding - k) / stride + 1;
        let img = QuantizedTensor::zeros(geom.input);
        let wins: Vec<_> = Windower::new(geom).unwrap().windows(img.pixels()).map(|w| w.unwrap()).collect();
        assert_eq!(wins.len(), oh * ow, "h={} w={} k={} s={} p={}", h, w, k, stride, padding);
        for (i, win) in wins.iter().enumerate() {
            assert_eq!((win.row, win.col), (i / ow, i % ow));
            assert_eq!(win.values().len(), k * k * 2);
        }
    }
}

#[test]
fn windows_hold_padded_neighborhood() {
    let mut rng = SmallRng::seed_from_u64(12);
    let geom = WindowGeometry { input: Shape::new(5, 6, 2), kernel: 3, stride: 2, padding: 1 };
    let img = QuantizedTensor::from_codes(geom.input, random_codes(&mut rng, geom.input.len(), 7, true)).unwrap();
    for win in Windower::new(geom).unwrap().windows(img.pixels()) {
        let win = win.unwrap();
        for ky in 0..3 {
            for kx in 0..3 {
                let iy = (win.row * 2 + ky) as isize - 1;
                let ix = (win.col * 2 + kx) as isize - 1;
                for c in 0..2 {
                    let want = if iy < 0 || ix < 0 || iy >= 5 || ix >= 6 { Code::ZERO } else { img.get(iy as usize, ix as usize, c) };
                    assert_eq!(win.get(ky, kx, c), want);
                }
            }
        }
    }
}

#[test]
fn quantizer_is_monotonic_and_counts_cuts() {
    let mut rng = SmallRng::seed_from_u64(13);
    for _ in 0..100 {
        let m = rng.gen_range(0..16);
        let mut cuts: Vec<Acc> = Vec::with_capacity(m);
        let mut t = rng.gen_range(-100..100);
        for _ in 0..m {
            cuts.push(t);
            t += rng.gen_range(1..20);
        }
        let ladder = ThresholdLadder::new(cuts.clone()).unwrap();
        let mut prev = 0u8;
        for acc in -150..500 {
            let q = ladder.quantize(acc);
            assert!(q >= prev);
            assert_eq!(q as usize, cuts.iter().filter(|&&c| acc >= c).count());
            assert!(q as usize <= m);
            prev = q;
        }
    }
}

#[test]
fn tree_sum_equals_sequential_sum() {
    let mut rng = SmallRng::seed_from_u64(14);
    let s = CodeScheme::power_of_two(4).unwrap();
    let mut mac = MacReducer::default();
    for n in 0..70 {
        let xs = random_codes(&mut rng, n, s.max_magnitude(), true);
        let ws = random_codes(&mut rng, n, s.max_magnitude(), true);
        assert_eq!(mac.mac(&s, &xs, &ws), dot_codes(&s, &xs, &ws), "n={}", n);
        let mut v: Vec<Acc> = (0..n as Acc).collect();
        assert_eq!(tree_reduce(&mut v), (0..n as Acc).sum::<Acc>());
        if n > 0 {
            assert!(1usize << tree_depth(n) >= n);
        }
    }
}

#[test]
fn maxpool_takes_max_of_each_quad() {
    let mut rng = SmallRng::seed_from_u64(15);
    for (h, w) in [(2, 2), (4, 6), (5, 7), (9, 4)] {
        let shape = Shape::new(h, w, 3);
        let img = QuantizedTensor::from_codes(shape, random_codes(&mut rng, shape.len(), 7, true)).unwrap();
        let mut st = MaxPoolStage::new(shape).unwrap();
        let out = st.forward(&img).unwrap();
        assert_eq!(out.shape(), Shape::new(h / 2, w / 2, 3));
        assert_eq!(out, reference::pool_forward(&img));
        for y in 0..h / 2 {
            for x in 0..w / 2 {
                for c in 0..3 {
                    let quad = [
                        img.get(2 * y, 2 * x, c),
                        img.get(2 * y, 2 * x + 1, c),
                        img.get(2 * y + 1, 2 * x, c),
                        img.get(2 * y + 1, 2 * x + 1, c),
                    ];
                    let m = out.get(y, x, c);
                    assert!(quad.contains(&m));
                    assert!(quad.iter().all(|&q| q <= m));
                }
            }
        }
    }
}

#[test]
fn dense_scores_ignore_arrival_order() {
    let mut rng = SmallRng::seed_from_u64(16);
    let scheme = Arc::new(CodeScheme::power_of_two(3).unwrap());
    let input = Shape::new(4, 4, 5);
    let weights = ClassWeights::new(10, input, random_codes(&mut rng, 10 * input.len(), 7, true)).unwrap();
    let params = Arc::new(DenseParams::new(input, weights, &scheme).unwrap());
    let feats = QuantizedTensor::from_codes(input, random_codes(&mut rng, input.len(), 7, false)).unwrap();

    let mut ordered = DenseStage::new(params.clone(), scheme.clone());
    for px in feats.pixels() { ordered.accept(px).unwrap(); }
    let want = ordered.finish().unwrap();
    assert_eq!(want, reference::dense_scores(&scheme, &params, &feats).unwrap());

    let mut shuffled = DenseStage::new(params, scheme);
    for _ in 0..5 {
        let mut order: Vec<usize> = (0..input.pixels()).collect();
        order.shuffle(&mut rng);
        for pos in order {
            shuffled.accept_at(pos, feats.pixel(pos / input.width, pos % input.width)).unwrap();
        }
        assert_eq!(shuffled.finish().unwrap(), want);
    }
}
