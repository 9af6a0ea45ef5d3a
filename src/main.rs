use anyhow::{bail, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use qcnn::mnist::{count_correct, read_labels, GrayQuantizer, IdxImages};
use qcnn::{reference, Model, Pipeline, PipelineConfig};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify IDX digit images with a quantized CNN model", long_about = None)]
struct Args {
    /// Model file (QCNNMOD1)
    #[arg(long)]
    model: PathBuf,

    /// IDX3 image file
    #[arg(long)]
    images: Option<PathBuf>,

    /// IDX1 label file; enables accuracy reporting
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Classify at most this many images
    #[arg(long)]
    limit: Option<usize>,

    /// Pipeline config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override inter-stage channel capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// Batch worker threads (0 = all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Use the direct whole-tensor evaluator instead of the streaming pipeline
    #[arg(long, default_value_t = false)]
    reference: bool,

    /// Print the model summary as JSON and exit
    #[arg(long, default_value_t = false)]
    summary: bool,

    /// Emit a JSON report instead of text
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Print every prediction
    #[arg(long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Report {
    images: usize,
    failed: usize,
    correct: Option<usize>,
    accuracy: Option<f64>,
    elapsed_s: f64,
    images_per_s: f64,
    predictions: Vec<Option<usize>>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let model = Model::load(&args.model)?;
    if args.summary {
        println!("{}", serde_json::to_string_pretty(&model.summary())?);
        return Ok(());
    }
    let Some(images_path) = args.images.as_ref() else { bail!("--images is required unless --summary is given") };

    let mut config = match &args.config {
        Some(p) => PipelineConfig::from_json_file(p)?,
        None => PipelineConfig::default(),
    };
    if let Some(c) = args.capacity { config.channel_capacity = c; }
    if let Some(t) = args.threads { config.batch_threads = t; }

    let idx = IdxImages::read(images_path)?;
    let input = model.input_shape();
    if (idx.rows, idx.cols, 1) != (input.height, input.width, input.channels) {
        bail!("images are {}x{}x1 but the model expects {}", idx.rows, idx.cols, input);
    }
    let quantizer = GrayQuantizer::uniform(model.scheme())?;
    let mut tensors = idx.to_tensors(&quantizer)?;
    if let Some(n) = args.limit { tensors.truncate(n); }
    let labels = match &args.labels {
        Some(p) => {
            let mut l = read_labels(p)?;
            if l.len() != idx.count {
                bail!("{} labels for {} images", l.len(), idx.count);
            }
            l.truncate(tensors.len());
            Some(l)
        }
        None => None,
    };

    let model = Arc::new(model);
    let pb = ProgressBar::new(tensors.len() as u64);
    pb.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} [{elapsed_precise}] {per_sec}")?);
    if args.json { pb.set_draw_target(indicatif::ProgressDrawTarget::hidden()); }

    let t0 = Instant::now();
    let results = if args.reference {
        tensors.par_iter().map(|t| { let r = reference::classify(&model, t); pb.inc(1); r }).collect::<Vec<_>>()
    } else {
        let pipeline = Pipeline::new(model.clone(), config)?;
        pipeline.classify_batch_with(&tensors, |_| pb.inc(1))?
    };
    let elapsed = t0.elapsed().as_secs_f64();
    pb.finish_and_clear();

    let mut predictions = Vec::with_capacity(results.len());
    let mut failed = 0usize;
    for (i, r) in results.into_iter().enumerate() {
        match r {
            Ok(c) => predictions.push(Some(c)),
            Err(e) => {
                eprintln!("image {}: {}", i, e);
                failed += 1;
                predictions.push(None);
            }
        }
    }
    let correct = match &labels {
        Some(l) => Some(count_correct(&predictions, l)?),
        None => None,
    };
    let n = predictions.len();
    let report = Report {
        images: n,
        failed,
        correct,
        accuracy: correct.map(|c| if n > 0 { c as f64 / n as f64 } else { 0.0 }),
        elapsed_s: elapsed,
        images_per_s: if elapsed > 0.0 { n as f64 / elapsed } else { 0.0 },
        predictions,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if args.verbose {
        for (i, p) in report.predictions.iter().enumerate() {
            match p {
                Some(c) => println!("{} {}", i, c),
                None => println!("{} error", i),
            }
        }
    }
    println!("images={} failed={} elapsed={:.3}s rate={:.1}/s", report.images, report.failed, report.elapsed_s, report.images_per_s);
    if let (Some(c), Some(a)) = (report.correct, report.accuracy) {
        println!("correct={} accuracy={:.2}%", c, a * 100.0);
    }
    Ok(())
}
