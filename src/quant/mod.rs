//! Fixed-point arithmetic shared by every stage.
pub mod code;
pub mod mac;
pub mod threshold;

pub use code::{Code, CodeScheme};
pub use mac::{Acc, MacReducer};
pub use threshold::{ThresholdBank, ThresholdLadder};
