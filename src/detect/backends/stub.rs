use anyhow::{anyhow, Result};

use crate::detect::backend::{input_len, InferenceBackend};
use crate::detect::decoder::DetectionTensor;
use crate::detect::result::CLASS_COUNT;

/// Replays a fixed output tensor. Used by tests and stream-only demos.
pub struct StubBackend {
    input_size: u32,
    output: DetectionTensor,
    calls: u64,
}

impl StubBackend {
    pub fn new(input_size: u32, output: DetectionTensor) -> Self {
        Self {
            input_size,
            output,
            calls: 0,
        }
    }

    /// A backend whose output never clears any threshold above zero.
    pub fn silent(input_size: u32, anchors: usize) -> Result<Self> {
        let data = vec![0.0; (5 + CLASS_COUNT) * anchors];
        Ok(Self::new(
            input_size,
            DetectionTensor::new(data, CLASS_COUNT, anchors)?,
        ))
    }

    /// Number of successful `infer` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn class_count(&self) -> usize {
        self.output.class_count()
    }

    fn infer(&mut self, input: &[f32]) -> Result<DetectionTensor> {
        let expected = input_len(self.input_size);
        if input.len() != expected {
            return Err(anyhow!(
                "expected {} input values, received {}",
                expected,
                input.len()
            ));
        }
        self.calls += 1;
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_validates_input_length() {
        let mut backend = StubBackend::silent(4, 3).unwrap();
        assert!(backend.infer(&[0.0; 10]).is_err());
        assert_eq!(backend.calls(), 0);

        let out = backend.infer(&[0.5; 48]).unwrap();
        assert_eq!(out.anchors(), 3);
        assert_eq!(backend.calls(), 1);
    }
}
