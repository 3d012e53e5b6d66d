//! 检测融合 (Detector fusion)
//!
//! 职责: 逐帧运行激活的检测器后端, 合并重叠检测, 输出去重候选
//!
//! 合并算法:
//! 1. 按种类赋置信度 (正脸0.9 / 侧脸0.8 / 神经网络用模型分数且必须>0.5)
//! 2. 镜像侧脸框还原: x' = frame_width - x - w
//! 3. 置信度降序排序, 贪心抑制: 与已接受框的交叠面积超过
//!    较小框面积的一半即视为重复丢弃
//!
//! 注意: 交叠判据是 min(area_a, area_b) 的比例而非 IoU。

use image::RgbImage;

use super::backend::FaceBackend;
use super::types::{DetectionMethod, DetectorKind, FusedFace, RawDetection};

/// 神经网络检测最低置信度
pub const NEURAL_CONFIDENCE: f32 = 0.5;

/// 重复判定: 交叠面积 > 0.5 * 较小框面积
const OVERLAP_RATIO: f32 = 0.5;

pub struct FusionEngine {
    backends: Vec<Box<dyn FaceBackend>>,
}

impl FusionEngine {
    pub fn new(backends: Vec<Box<dyn FaceBackend>>) -> Self {
        Self { backends }
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// 对一帧执行检测+融合。单个后端失败只丢弃其结果, 不影响整帧。
    /// 零检测返回空序列, 不是错误。
    pub fn fuse(&mut self, frame: &RgbImage, method: DetectionMethod) -> Vec<FusedFace> {
        let frame_width = frame.width() as f32;
        let mut raw: Vec<RawDetection> = Vec::new();

        for backend in &mut self.backends {
            let kind = backend.kind();
            let active = match kind.is_cascade() {
                true => method.uses_cascade(),
                false => method.uses_neural(),
            };
            if !active {
                continue;
            }
            match backend.detect(frame) {
                Ok(detections) => raw.extend(detections),
                Err(e) => eprintln!("⚠️ 检测器 {} 本帧失败: {:#}", kind.label(), e),
            }
        }

        fuse_candidates(raw, frame_width)
    }
}

/// 纯融合逻辑 (与后端解耦, 便于测试)
pub fn fuse_candidates(raw: Vec<RawDetection>, frame_width: f32) -> Vec<FusedFace> {
    let mut candidates: Vec<FusedFace> = Vec::with_capacity(raw.len());

    for det in raw {
        let confidence = match det.kind.fixed_confidence() {
            Some(fixed) => fixed,
            None => {
                // 神经网络: 只接受高于阈值的检测
                if det.score <= NEURAL_CONFIDENCE {
                    continue;
                }
                det.score
            }
        };
        let bbox = if det.kind == DetectorKind::CascadeProfileMirrored {
            det.bbox.reflect(frame_width)
        } else {
            det.bbox
        };
        candidates.push(FusedFace { bbox, confidence });
    }

    // 置信度降序, 贪心抑制
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut accepted: Vec<FusedFace> = Vec::new();
    for cand in candidates {
        let duplicate = accepted.iter().any(|kept| {
            let overlap = cand.bbox.intersection_area(&kept.bbox);
            overlap > OVERLAP_RATIO * cand.bbox.area().min(kept.bbox.area())
        });
        if !duplicate {
            accepted.push(cand);
        }
    }
    accepted
}
