// Streaming low-bit CNN inference: windower -> MAC -> threshold -> pool -> dense -> argmax
pub mod error;
pub mod quant;
pub mod tensor;
pub mod stage;
pub mod model;
pub mod pipeline;
pub mod reference;
pub mod mnist;

pub use error::{QcnnError, Result};
pub use model::{Layer, Model};
pub use pipeline::{Pipeline, PipelineConfig};
pub use quant::{Code, CodeScheme, ThresholdBank, ThresholdLadder};
pub use tensor::{QuantizedTensor, Shape, WeightKernel};
