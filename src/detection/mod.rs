//! 检测系统 (Detection System)
//!
//! - backend: 检测器后端接口与ONNX实现
//! - fusion:  多检测器融合去重
//! - types:   数据结构

pub mod backend;
pub mod fusion;
pub mod types;

pub use backend::{load_backends, FaceBackend, OnnxFaceDetector, INF_SIZE};
pub use fusion::{fuse_candidates, FusionEngine};
pub use types::{DetectionMethod, DetectorKind, FaceBox, FusedFace, RawDetection};
