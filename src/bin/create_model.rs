use anyhow::{bail, Context, Result};
use clap::Parser;
use qcnn::model::random::{random_model, RandomSpec};
use qcnn::Shape;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qcnn-create-model", version, about = "Write a seeded random QCNNMOD1 model")]
struct Args {
    /// Output model file
    #[arg(long, default_value = "weights/random.qcnn")]
    out: PathBuf,

    /// RNG seed
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,

    /// Magnitude bits of the power-of-two code scheme (1..=4)
    #[arg(long, default_value_t = 3)]
    bits: u8,

    /// Threshold steps per conv output channel
    #[arg(long, default_value_t = 3)]
    steps: usize,

    /// Number of output classes
    #[arg(long, default_value_t = 10)]
    classes: usize,

    /// Input edge length (square, single channel)
    #[arg(long, default_value_t = 28)]
    input: usize,

    /// Conv blocks as FILTERSxKERNEL, comma separated; each is followed by a 2x2 pool
    #[arg(long, default_value = "6x5,16x5")]
    convs: String,

    /// Std-dev of the sampled weight magnitudes
    #[arg(long, default_value_t = 1.2)]
    sigma: f64,
}

fn parse_convs(s: &str) -> Result<Vec<(usize, usize)>> {
    s.split(',')
        .filter(|p| !p.trim().is_empty())
        .map(|p| {
            let Some((f, k)) = p.trim().split_once('x') else { bail!("conv block '{}' is not FILTERSxKERNEL", p) };
            let f: usize = f.parse().with_context(|| format!("filters in '{}'", p))?;
            let k: usize = k.parse().with_context(|| format!("kernel in '{}'", p))?;
            Ok((f, k))
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let spec = RandomSpec {
        magnitude_bits: args.bits,
        input: Shape::new(args.input, args.input, 1),
        convs: parse_convs(&args.convs)?,
        ladder_steps: args.steps,
        classes: args.classes,
        weight_sigma: args.sigma,
        seed: args.seed,
    };
    let model = random_model(&spec).context("build random model")?;
    if let Some(dir) = args.out.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
    }
    model.save(&args.out)?;
    println!("{}", serde_json::to_string_pretty(&model.summary())?);
    println!("Model saved to: {}", args.out.display());
    Ok(())
}
