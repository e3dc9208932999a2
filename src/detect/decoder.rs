//! Detection tensor decoding.
//!
//! The model emits one column per anchor and `5 + C` rows:
//! `cx, cy, w, h` (normalized to the square input), objectness, then one
//! score per class. Decoding thresholds each anchor, picks the best class and
//! turns the box into clamped input-pixel coordinates.
//!
//! No suppression is applied across anchors. Neighbouring anchors that fire
//! on the same object all come out; picking one is the guidance selector's
//! job.

use anyhow::{anyhow, Result};

use super::result::{class_label, BoundingBox, Detection};

const BOX_ROWS: usize = 4;
const OBJECTNESS_ROW: usize = 4;
const FIRST_CLASS_ROW: usize = 5;

/// Validated `[5 + C][A]` float tensor, stored row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionTensor {
    data: Vec<f32>,
    class_count: usize,
    anchors: usize,
}

impl DetectionTensor {
    /// Wrap a row-major `[5 + class_count][anchors]` buffer.
    pub fn new(data: Vec<f32>, class_count: usize, anchors: usize) -> Result<Self> {
        if class_count == 0 {
            return Err(anyhow!("detection tensor needs at least one class row"));
        }
        let rows = FIRST_CLASS_ROW + class_count;
        let expected = rows
            .checked_mul(anchors)
            .ok_or_else(|| anyhow!("detection tensor dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "detection tensor length mismatch: expected {}x{}={}, got {}",
                rows,
                anchors,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            class_count,
            anchors,
        })
    }

    /// Build from an anchor-major `[anchors][5 + class_count]` buffer.
    pub fn from_transposed(data: &[f32], class_count: usize, anchors: usize) -> Result<Self> {
        let rows = FIRST_CLASS_ROW + class_count;
        if data.len() != rows.saturating_mul(anchors) {
            return Err(anyhow!(
                "transposed detection tensor length mismatch: expected {}x{}, got {}",
                anchors,
                rows,
                data.len()
            ));
        }
        let mut out = vec![0.0f32; data.len()];
        for anchor in 0..anchors {
            for row in 0..rows {
                out[row * anchors + anchor] = data[anchor * rows + row];
            }
        }
        Self::new(out, class_count, anchors)
    }

    /// Build from a model output of shape `[1?, 5 + C, A]` or `[1?, A, 5 + C]`.
    ///
    /// When both axes equal `5 + C` the row-major reading wins.
    pub fn from_shape(data: &[f32], shape: &[usize], class_count: usize) -> Result<Self> {
        let dims: Vec<usize> = match shape {
            [1, a, b] => vec![*a, *b],
            [a, b] => vec![*a, *b],
            other => return Err(anyhow!("unsupported detection output shape {:?}", other)),
        };
        let rows = FIRST_CLASS_ROW + class_count;
        match (dims[0], dims[1]) {
            (r, anchors) if r == rows => Self::new(data.to_vec(), class_count, anchors),
            (anchors, r) if r == rows => Self::from_transposed(data, class_count, anchors),
            _ => Err(anyhow!(
                "detection output shape {:?} has no axis of {} (5 + {} classes)",
                shape,
                rows,
                class_count
            )),
        }
    }

    pub fn class_count(&self) -> usize {
        self.class_count
    }

    pub fn anchors(&self) -> usize {
        self.anchors
    }

    pub fn rows(&self) -> usize {
        FIRST_CLASS_ROW + self.class_count
    }

    pub(crate) fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.anchors..(row + 1) * self.anchors]
    }

    pub(crate) fn value(&self, row: usize, anchor: usize) -> f32 {
        self.data[row * self.anchors + anchor]
    }
}

/// Decode every anchor whose confidence reaches `threshold`.
///
/// `input_size` is the model's square input edge, used to denormalize boxes.
/// Results keep anchor order.
pub fn decode(tensor: &DetectionTensor, threshold: f32, input_size: u32) -> Vec<Detection> {
    let edge = input_size as f32;
    let objectness = tensor.row(OBJECTNESS_ROW);
    let mut detections = Vec::new();

    for (anchor, &object_score) in objectness.iter().enumerate() {
        // Cheap rejection before the class scan.
        if !object_score.is_finite() || object_score < threshold {
            continue;
        }

        let Some((class_id, class_score)) = best_class(tensor, anchor) else {
            log::debug!("anchor {} has a non-finite class score, skipping", anchor);
            continue;
        };
        let confidence = object_score * class_score;
        if !confidence.is_finite() || confidence < threshold {
            continue;
        }

        let mut geometry = [0.0f32; BOX_ROWS];
        for (row, value) in geometry.iter_mut().enumerate() {
            *value = tensor.value(row, anchor);
        }
        if geometry.iter().any(|v| !v.is_finite()) {
            log::debug!("anchor {} has a non-finite box, skipping", anchor);
            continue;
        }
        let [cx, cy, w, h] = geometry;

        detections.push(Detection {
            class_id,
            class_name: class_label(class_id),
            confidence,
            bbox: BoundingBox::from_normalized_center(cx, cy, w, h, edge),
        });
    }

    detections
}

/// Stable argmax over the class rows: ties keep the lowest index.
///
/// `None` when any class score is NaN or infinite.
fn best_class(tensor: &DetectionTensor, anchor: usize) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for class_id in 0..tensor.class_count() {
        let score = tensor.value(FIRST_CLASS_ROW + class_id, anchor);
        if !score.is_finite() {
            return None;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((class_id, score)),
        }
    }
    best
}
