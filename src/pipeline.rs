//! Stage composition over bounded channels.
//!
//! Each feature stage runs on its own thread and talks to its neighbours
//! through `sync_channel`s of [`PipelineConfig::channel_capacity`] pixel
//! vectors, so a full channel blocks the producer and memory stays bounded.
//! The dense head drains the last channel on the calling thread.

use anyhow::Context;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::error::{QcnnError, Result};
use crate::model::Model;
use crate::stage::{ClassScores, DenseStage, Pixel, Stage};
use crate::tensor::QuantizedTensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Depth of every inter-stage FIFO, in pixel vectors.
    pub channel_capacity: usize,
    /// Rayon pool size for batch classification; 0 keeps the global pool.
    pub batch_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self { Self { channel_capacity: 64, batch_threads: 0 } }
}

impl PipelineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(&path).with_context(|| format!("read config: {}", path.as_ref().display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse config: {}", path.as_ref().display()))
    }
}

pub struct Pipeline {
    model: Arc<Model>,
    config: PipelineConfig,
    stages: Vec<Box<dyn Stage>>,
    head: DenseStage,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(model: Arc<Model>, config: PipelineConfig) -> Result<Self> {
        Self::with_cancel(model, config, Arc::new(AtomicBool::new(false)))
    }

    /// Pipeline observing an externally owned cancel flag.
    pub fn with_cancel(model: Arc<Model>, config: PipelineConfig, cancel: Arc<AtomicBool>) -> Result<Self> {
        let (stages, head) = model.build_stages()?;
        Ok(Self { model, config, stages, head, cancel })
    }

    #[inline]
    pub fn model(&self) -> &Arc<Model> { &self.model }

    #[inline]
    pub fn config(&self) -> &PipelineConfig { &self.config }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> { self.cancel.clone() }

    /// Stop before the next image starts. The image in flight completes.
    pub fn cancel(&self) { self.cancel.store(true, Ordering::Relaxed); }

    pub fn is_cancelled(&self) -> bool { self.cancel.load(Ordering::Relaxed) }

    pub fn classify(&mut self, image: &QuantizedTensor) -> Result<usize> {
        Ok(self.scores(image)?.argmax())
    }

    /// Class scores for one image.
    pub fn scores(&mut self, image: &QuantizedTensor) -> Result<ClassScores> {
        let t0 = Instant::now();
        let head = &mut self.head;
        head.reset();
        let scores = Self::stream(&mut self.stages, &self.model, &self.config, &self.cancel, image, |rx| {
            for px in rx.iter() { head.accept(&px)?; }
            head.finish()
        })?;
        debug!("classified image in {:?}: class {} scores {:?}", t0.elapsed(), scores.argmax(), scores.scores());
        Ok(scores)
    }

    /// Tensor produced by the last feature stage, before the dense head.
    pub fn run_features(&mut self, image: &QuantizedTensor) -> Result<QuantizedTensor> {
        let shape = self.model.feature_shape();
        Self::stream(&mut self.stages, &self.model, &self.config, &self.cancel, image, |rx| {
            let mut flat = Vec::with_capacity(shape.len());
            for px in rx.iter() { flat.extend_from_slice(&px); }
            QuantizedTensor::from_codes(shape, flat)
        })
    }

    /// Classify many images in parallel, one stage chain per rayon worker.
    /// Output order follows input order; images not started before
    /// cancellation report [`QcnnError::Cancelled`].
    pub fn classify_batch(&self, images: &[QuantizedTensor]) -> Result<Vec<Result<usize>>> {
        self.classify_batch_with(images, |_| {})
    }

    /// Like [`Pipeline::classify_batch`], calling `on_done(index)` after each image.
    pub fn classify_batch_with<F>(&self, images: &[QuantizedTensor], on_done: F) -> Result<Vec<Result<usize>>>
    where
        F: Fn(usize) + Sync,
    {
        let t0 = Instant::now();
        let model = self.model.clone();
        let config = self.config;
        let cancel = self.cancel.clone();
        let run = || -> Vec<Result<usize>> {
            images
                .par_iter()
                .enumerate()
                .map_init(
                    || Pipeline::with_cancel(model.clone(), config, cancel.clone()),
                    |p, (i, img)| {
                        let r = match p {
                            Ok(p) => p.classify(img),
                            Err(e) => Err(QcnnError::stage("batch", e.to_string())),
                        };
                        on_done(i);
                        r
                    },
                )
                .collect()
        };
        let out = if config.batch_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.batch_threads)
                .build()
                .map_err(|e| QcnnError::stage("batch", e.to_string()))?;
            pool.install(run)
        } else {
            run()
        };
        let cancelled = out.iter().filter(|r| matches!(r, Err(QcnnError::Cancelled))).count();
        if cancelled > 0 {
            warn!("batch cancelled: {} of {} images skipped", cancelled, images.len());
        }
        info!("classified {} images in {:.3}s", images.len() - cancelled, t0.elapsed().as_secs_f64());
        Ok(out)
    }

    /// Push `image` through the feature stages, one thread per stage, and hand
    /// the last channel to `sink` on the calling thread.
    fn stream<T, F>(
        stages: &mut [Box<dyn Stage>],
        model: &Model,
        config: &PipelineConfig,
        cancel: &AtomicBool,
        image: &QuantizedTensor,
        sink: F,
    ) -> Result<T>
    where
        F: FnOnce(Receiver<Pixel>) -> Result<T>,
    {
        if cancel.load(Ordering::Relaxed) {
            return Err(QcnnError::Cancelled);
        }
        // Reject malformed input before any stage sees it
        model.check_image(image)?;
        for st in stages.iter_mut() { st.reset(); }

        let cap = config.channel_capacity.max(1);
        thread::scope(|s| {
            let (src_tx, mut rx) = sync_channel::<Pixel>(cap);
            s.spawn(move || {
                for px in image.pixels() {
                    if src_tx.send(px.to_vec()).is_err() { break; }
                }
            });

            let mut workers = Vec::with_capacity(stages.len());
            for stage in stages.iter_mut() {
                let (tx, next_rx) = sync_channel::<Pixel>(cap);
                let input = rx;
                let name = stage.name();
                let handle = s.spawn(move || -> Result<()> {
                    let mut closed = false;
                    for px in input.iter() {
                        let r = stage.push(&px, &mut |out| {
                            tx.send(out).map_err(|_| {
                                closed = true;
                                QcnnError::stage(name, "downstream closed")
                            })
                        });
                        match r {
                            Ok(()) => {}
                            // The consumer already failed and owns the error
                            Err(_) if closed => return Ok(()),
                            Err(e) => return Err(e),
                        }
                    }
                    Ok(())
                });
                workers.push((name, handle));
                rx = next_rx;
            }

            let sunk = sink(rx);
            let mut failure = None;
            for (name, h) in workers {
                let r = h.join().unwrap_or_else(|_| Err(QcnnError::stage(name, "worker panicked")));
                if let Err(e) = r {
                    failure.get_or_insert(e);
                }
            }
            match failure {
                Some(e) => Err(e),
                None => sunk,
            }
        })
    }
}
