//! 人脸检测数据结构 (Face detection data structures)

/// 检测器种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    /// 正脸级联检测器
    CascadeFrontal,
    /// 侧脸级联检测器
    CascadeProfile,
    /// 镜像侧脸 (翻转画面后检测另一侧)
    CascadeProfileMirrored,
    /// 神经网络检测器
    NeuralNet,
}

impl DetectorKind {
    /// 级联检测器不输出分数,按种类给固定置信度;
    /// 神经网络使用模型自身分数
    pub fn fixed_confidence(&self) -> Option<f32> {
        match self {
            DetectorKind::CascadeFrontal => Some(0.9),
            DetectorKind::CascadeProfile | DetectorKind::CascadeProfileMirrored => Some(0.8),
            DetectorKind::NeuralNet => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DetectorKind::CascadeFrontal => "cascade-frontal",
            DetectorKind::CascadeProfile => "cascade-profile",
            DetectorKind::CascadeProfileMirrored => "cascade-profile-mirrored",
            DetectorKind::NeuralNet => "neural-net",
        }
    }

    pub fn is_cascade(&self) -> bool {
        !matches!(self, DetectorKind::NeuralNet)
    }
}

/// 检测方法选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DetectionMethod {
    /// 仅级联检测器 (快)
    Cascade,
    /// 仅神经网络 (对侧脸/倾斜更鲁棒)
    Neural,
    /// 两者融合 (默认, 最鲁棒)
    #[default]
    Both,
}

impl DetectionMethod {
    pub fn uses_cascade(&self) -> bool {
        matches!(self, DetectionMethod::Cascade | DetectionMethod::Both)
    }

    pub fn uses_neural(&self) -> bool {
        matches!(self, DetectionMethod::Neural | DetectionMethod::Both)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DetectionMethod::Cascade => "cascade",
            DetectionMethod::Neural => "neural-net",
            DetectionMethod::Both => "both",
        }
    }
}

/// 人脸框 (像素坐标, x/y为左上角)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// 宽高比, 分母保护避免除零
    pub fn aspect_ratio(&self) -> f32 {
        self.w / self.h.max(1.0)
    }

    pub fn intersection_area(&self, other: &FaceBox) -> f32 {
        let l = self.x.max(other.x);
        let r = (self.x + self.w).min(other.x + other.w);
        let t = self.y.max(other.y);
        let b = (self.y + self.h).min(other.y + other.h);
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    /// 镜像翻转坐标还原: x' = frame_width - x - w
    pub fn reflect(&self, frame_width: f32) -> FaceBox {
        FaceBox {
            x: frame_width - self.x - self.w,
            ..*self
        }
    }
}

/// 单个检测器的原始输出, 逐帧生成, 融合后即丢弃
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: FaceBox,
    /// 模型分数 (级联检测器为占位值, 融合时被固定置信度覆盖)
    pub score: f32,
    pub kind: DetectorKind,
}

/// 去重后的人脸候选
#[derive(Debug, Clone, Copy)]
pub struct FusedFace {
    pub bbox: FaceBox,
    /// 胜出贡献者的置信度
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_confidence() {
        assert_eq!(DetectorKind::CascadeFrontal.fixed_confidence(), Some(0.9));
        assert_eq!(DetectorKind::CascadeProfile.fixed_confidence(), Some(0.8));
        assert_eq!(
            DetectorKind::CascadeProfileMirrored.fixed_confidence(),
            Some(0.8)
        );
        assert_eq!(DetectorKind::NeuralNet.fixed_confidence(), None);
    }

    #[test]
    fn test_intersection_area() {
        let a = FaceBox::new(0.0, 0.0, 100.0, 100.0);
        let b = FaceBox::new(10.0, 10.0, 100.0, 100.0);
        assert_eq!(a.intersection_area(&b), 8100.0);

        let c = FaceBox::new(200.0, 200.0, 50.0, 50.0);
        assert_eq!(a.intersection_area(&c), 0.0);
    }

    #[test]
    fn test_reflect_roundtrip() {
        let b = FaceBox::new(30.0, 40.0, 60.0, 80.0);
        let r = b.reflect(640.0);
        assert_eq!(r.x, 640.0 - 30.0 - 60.0);
        assert_eq!(r.reflect(640.0).x, b.x);
        assert_eq!(r.y, b.y);
        assert_eq!(r.w, b.w);
    }

    #[test]
    fn test_aspect_ratio_zero_height() {
        let b = FaceBox::new(0.0, 0.0, 50.0, 0.0);
        assert_eq!(b.aspect_ratio(), 50.0);
    }
}
