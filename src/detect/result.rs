use serde::Serialize;

/// Number of classes the obstacle model scores per anchor.
pub const CLASS_COUNT: usize = 18;

/// Label used for a class index outside the class table.
pub const FALLBACK_LABEL: &str = "obstacle";

/// Obstacle classes, in model output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObstacleClass {
    Person,
    Bird,
    Car,
    Cat,
    Chair,
    Dog,
    Table,
    Pothole,
    Ceiling,
    Wall,
    Window,
    Bollard,
    Crosswalk,
    Downstairs,
    Upstairs,
    Door,
    Stair,
    Pole,
}

impl ObstacleClass {
    pub const ALL: [ObstacleClass; CLASS_COUNT] = [
        ObstacleClass::Person,
        ObstacleClass::Bird,
        ObstacleClass::Car,
        ObstacleClass::Cat,
        ObstacleClass::Chair,
        ObstacleClass::Dog,
        ObstacleClass::Table,
        ObstacleClass::Pothole,
        ObstacleClass::Ceiling,
        ObstacleClass::Wall,
        ObstacleClass::Window,
        ObstacleClass::Bollard,
        ObstacleClass::Crosswalk,
        ObstacleClass::Downstairs,
        ObstacleClass::Upstairs,
        ObstacleClass::Door,
        ObstacleClass::Stair,
        ObstacleClass::Pole,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ObstacleClass::Person => "person",
            ObstacleClass::Bird => "bird",
            ObstacleClass::Car => "car",
            ObstacleClass::Cat => "cat",
            ObstacleClass::Chair => "chair",
            ObstacleClass::Dog => "dog",
            ObstacleClass::Table => "table",
            ObstacleClass::Pothole => "pothole",
            ObstacleClass::Ceiling => "ceiling",
            ObstacleClass::Wall => "wall",
            ObstacleClass::Window => "window",
            ObstacleClass::Bollard => "bollard",
            ObstacleClass::Crosswalk => "crosswalk",
            ObstacleClass::Downstairs => "downstairs",
            ObstacleClass::Upstairs => "upstairs",
            ObstacleClass::Door => "door",
            ObstacleClass::Stair => "stair",
            ObstacleClass::Pole => "pole",
        }
    }
}

/// Label for a raw class index; unknown indices map to [`FALLBACK_LABEL`].
pub fn class_label(index: usize) -> &'static str {
    ObstacleClass::from_index(index).map_or(FALLBACK_LABEL, ObstacleClass::name)
}

/// Axis-aligned box in model-input pixels. Always `x1 <= x2` and `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Denormalize a center/size box against an `edge`-pixel square input and
    /// clamp every coordinate to `[0, edge - 1]`.
    pub fn from_normalized_center(cx: f32, cy: f32, w: f32, h: f32, edge: f32) -> Self {
        let max = (edge - 1.0).max(0.0);
        let x1 = ((cx - w / 2.0) * edge).clamp(0.0, max);
        let y1 = ((cy - h / 2.0) * edge).clamp(0.0, max);
        let x2 = ((cx + w / 2.0) * edge).clamp(0.0, max);
        let y2 = ((cy + h / 2.0) * edge).clamp(0.0, max);
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center_x(&self) -> f32 {
        (self.x1 + self.x2) / 2.0
    }
}

/// One thresholded detection from the model output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: &'static str,
    pub confidence: f32,
    pub bbox: BoundingBox,
}
