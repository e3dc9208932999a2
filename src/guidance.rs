//! Guidance selection.
//!
//! Picks the single detection worth announcing and describes it as a class,
//! a coarse distance and a direction. "Largest box on screen" stands in for
//! "nearest object": it is a cheap depth proxy, not a calibrated distance.

use serde::Serialize;
use std::fmt;

use crate::detect::Detection;

/// Coarse distance derived from the share of the frame a box covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DistanceBucket {
    #[serde(rename = "very close")]
    VeryClose,
    #[serde(rename = "close")]
    Close,
    #[serde(rename = "medium distance")]
    Medium,
    #[serde(rename = "far")]
    Far,
}

impl DistanceBucket {
    /// Bucket an area ratio. Every boundary is strict: a ratio equal to a
    /// cut-off falls into the farther bucket.
    pub fn from_ratio(ratio: f32) -> Self {
        if ratio > 0.30 {
            DistanceBucket::VeryClose
        } else if ratio > 0.15 {
            DistanceBucket::Close
        } else if ratio > 0.05 {
            DistanceBucket::Medium
        } else {
            DistanceBucket::Far
        }
    }

    pub fn from_area(box_area: f32, frame_area: f32) -> Self {
        Self::from_ratio(box_area / frame_area)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DistanceBucket::VeryClose => "very close",
            DistanceBucket::Close => "close",
            DistanceBucket::Medium => "medium distance",
            DistanceBucket::Far => "far",
        }
    }
}

/// Horizontal position of a box relative to the frame thirds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Direction {
    #[serde(rename = "left side")]
    Left,
    #[serde(rename = "ahead")]
    Ahead,
    #[serde(rename = "right side")]
    Right,
}

impl Direction {
    pub fn from_center(center_x: f32, frame_width: u32) -> Self {
        let left_third = frame_width as f32 / 3.0;
        let right_third = (frame_width as f32 * 2.0) / 3.0;
        if center_x < left_third {
            Direction::Left
        } else if center_x > right_third {
            Direction::Right
        } else {
            Direction::Ahead
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Left => "left side",
            Direction::Ahead => "ahead",
            Direction::Right => "right side",
        }
    }
}

impl fmt::Display for DistanceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one obstacle report produced per guidance request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GuidanceResult {
    #[serde(rename = "class")]
    pub class_name: &'static str,
    pub distance: DistanceBucket,
    pub direction: Direction,
    pub confidence: f32,
}

impl GuidanceResult {
    /// Describe `detection` against an `input_size`-pixel square frame.
    pub fn from_detection(detection: &Detection, input_size: u32) -> Self {
        let edge = input_size as f32;
        Self {
            class_name: detection.class_name,
            distance: DistanceBucket::from_area(detection.bbox.area(), edge * edge),
            direction: Direction::from_center(detection.bbox.center_x(), input_size),
            confidence: detection.confidence,
        }
    }

    /// Short phrase suitable for speech output.
    pub fn phrase(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GuidanceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.class_name, self.distance, self.direction)
    }
}

/// Choose the detection with the strictly largest box area (first wins on
/// ties) and describe it. Returns `None` for an empty slice.
pub fn select(detections: &[Detection], input_size: u32) -> Option<GuidanceResult> {
    let (first, rest) = detections.split_first()?;
    let mut best = first;
    let mut best_area = first.bbox.area();
    for detection in rest {
        let area = detection.bbox.area();
        if area > best_area {
            best = detection;
            best_area = area;
        }
    }
    Some(GuidanceResult::from_detection(best, input_size))
}
