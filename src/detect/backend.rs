use anyhow::Result;

use super::decoder::DetectionTensor;
use super::result::CLASS_COUNT;

/// Inference engine seam.
///
/// A backend takes a prepared `S x S x 3` float input (values in `[0, 1]`,
/// laid out as the backend was configured for) and returns the raw
/// detection tensor. It is treated as a black box; calls may block for as
/// long as the model takes and have no internal timeout.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Square input edge `S` the model expects.
    fn input_size(&self) -> u32;

    /// Number of class rows in the output tensor.
    fn class_count(&self) -> usize {
        CLASS_COUNT
    }

    /// Run the model on one prepared input.
    fn infer(&mut self, input: &[f32]) -> Result<DetectionTensor>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Expected input length for an `S x S x 3` model.
pub fn input_len(input_size: u32) -> usize {
    let edge = input_size as usize;
    edge * edge * 3
}
