use anyhow::Result;
use clap::Parser;
use qcnn::model::random::{random_model, RandomSpec};
use qcnn::{reference, Code, Model, Pipeline, PipelineConfig, QuantizedTensor};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "qcnn-bench", version, about = "Throughput of the streaming pipeline against the direct evaluator")]
struct Args {
    /// Model file; a seeded random LeNet-like model is used when absent
    #[arg(long)]
    model: Option<String>,

    /// Number of synthetic images
    #[arg(long, default_value_t = 256)]
    images: usize,

    /// Inter-stage channel capacity
    #[arg(long, default_value_t = 64)]
    capacity: usize,

    /// Batch worker threads (0 = all cores)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Image RNG seed
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

fn synthetic_images(model: &Model, n: usize, seed: u64) -> Result<Vec<QuantizedTensor>> {
    let shape = model.input_shape();
    let max = model.scheme().max_magnitude();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let codes = (0..shape.len()).map(|_| Code::positive(rng.gen_range(0..=max))).collect();
        out.push(QuantizedTensor::from_codes(shape, codes)?);
    }
    Ok(out)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let model = match args.model.as_deref() {
        Some(p) => Model::load(p)?,
        None => random_model(&RandomSpec::default())?,
    };
    let model = Arc::new(model);
    let images = synthetic_images(&model, args.images, args.seed)?;
    let config = PipelineConfig { channel_capacity: args.capacity, batch_threads: args.threads };

    let mut single = Pipeline::new(model.clone(), config)?;
    let t0 = Instant::now();
    let mut agree = 0usize;
    for img in &images {
        if single.classify(img)? == reference::classify(&model, img)? { agree += 1; }
    }
    let dt_single = t0.elapsed().as_secs_f64();

    let batch = Pipeline::new(model.clone(), config)?;
    let t0 = Instant::now();
    let results = batch.classify_batch(&images)?;
    let dt_batch = t0.elapsed().as_secs_f64();
    let failed = results.iter().filter(|r| r.is_err()).count();

    let t0 = Instant::now();
    for img in &images { reference::classify(&model, img)?; }
    let dt_ref = t0.elapsed().as_secs_f64();

    let rate = |dt: f64| if dt > 0.0 { images.len() as f64 / dt } else { 0.0 };
    println!("images={} agree={} failed={}", images.len(), agree, failed);
    println!("streaming_single elapsed={:.3}s rate={:.1}/s", dt_single, rate(dt_single));
    println!("streaming_batch  elapsed={:.3}s rate={:.1}/s", dt_batch, rate(dt_batch));
    println!("reference        elapsed={:.3}s rate={:.1}/s", dt_ref, rate(dt_ref));
    Ok(())
}
