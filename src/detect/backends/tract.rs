#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::config::TensorLayout;
use crate::detect::backend::{input_len, InferenceBackend};
use crate::detect::decoder::DetectionTensor;
use crate::detect::result::CLASS_COUNT;

/// Tract-based backend for ONNX obstacle detectors.
///
/// Loads a local model file once; inference is pure CPU with no network or
/// disk access.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    layout: TensorLayout,
    class_count: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, layout: TensorLayout) -> Result<Self> {
        let model_path = model_path.as_ref();
        let edge = input_size as usize;
        let shape = match layout {
            TensorLayout::Nhwc => tvec!(1, edge, edge, 3),
            TensorLayout::Nchw => tvec!(1, 3, edge, edge),
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "loaded ONNX model {} ({}x{}, {:?})",
            model_path.display(),
            input_size,
            input_size,
            layout
        );

        Ok(Self {
            model,
            input_size,
            layout,
            class_count: CLASS_COUNT,
        })
    }

    fn build_input(&self, input: &[f32]) -> Result<Tensor> {
        let expected = input_len(self.input_size);
        if input.len() != expected {
            return Err(anyhow!(
                "expected {} input values, received {}",
                expected,
                input.len()
            ));
        }

        let edge = self.input_size as usize;
        let array = match self.layout {
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_vec((1, edge, edge, 3), input.to_vec())
                    .context("shape NHWC input")?
            }
            // Input arrives interleaved; regroup it into channel planes.
            TensorLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, edge, edge), |(_, c, y, x)| {
                    input[(y * edge + x) * 3 + c]
                })
            }
        };
        Ok(array.into_tensor())
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn class_count(&self) -> usize {
        self.class_count
    }

    fn infer(&mut self, input: &[f32]) -> Result<DetectionTensor> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();
        DetectionTensor::from_shape(&data, &shape, self.class_count)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = vec![0.0f32; input_len(self.input_size)];
        self.infer(&blank).map(|_| ())
    }
}
