mod backend;
mod backends;
mod decoder;
mod preprocess;
mod result;

pub use backend::{input_len, InferenceBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::StubBackend;
pub use decoder::{decode, DetectionTensor};
pub use preprocess::prepare_input;
pub use result::{
    class_label, BoundingBox, Detection, ObstacleClass, CLASS_COUNT, FALLBACK_LABEL,
};
