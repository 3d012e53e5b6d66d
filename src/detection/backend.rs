//! 检测器后端 (Detector backends)
//!
//! `FaceBackend` 是检测器的统一接口, 融合层只依赖该接口。
//! 内置实现基于 ONNX Runtime: 四种检测器 (正脸/侧脸/镜像侧脸/神经网络)
//! 共用同一套推理封装, 仅模型文件与种类标签不同。

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fast_image_resize as fr;
use image::RgbImage;
use ndarray::{Array, IxDyn};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};

use super::types::{DetectionMethod, DetectorKind, FaceBox, RawDetection};

/// 推理输入尺寸
pub const INF_SIZE: u32 = 320;

/// 原始输出分数下限 (语义过滤在融合层做, 这里只限制输出规模)
const RAW_SCORE_FLOOR: f32 = 0.1;

/// 最小有效人脸尺寸 (像素)
const MIN_FACE_SIZE: f32 = 20.0;

/// 检测器统一接口
pub trait FaceBackend: Send {
    fn kind(&self) -> DetectorKind;

    /// 对一帧执行检测, 返回原始候选框。
    /// 镜像后端返回翻转坐标系下的框, 由融合层负责还原。
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawDetection>>;
}

/// ONNX 人脸检测器
///
/// 模型约定: 输入 [1, 3, 320, 320] 归一化RGB (CHW),
/// 输出 [1, N, 5] 每行为 (score, x1, y1, x2, y2), 坐标归一化到 0~1。
pub struct OnnxFaceDetector {
    kind: DetectorKind,
    session: Session,
}

impl OnnxFaceDetector {
    pub fn new(kind: DetectorKind, model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort::Error::<()>::from)?
            .commit_from_file(model_path)
            .with_context(|| format!("加载检测模型失败: {}", model_path.display()))?;
        Ok(Self { kind, session })
    }

    /// 预处理: Nearest缩放到320x320 + 归一化CHW张量
    /// (Nearest比Bilinear快5-10倍, 牺牲少量质量换速度)
    fn preprocess(frame: &RgbImage) -> Result<Array<f32, IxDyn>> {
        let src = fr::images::Image::from_vec_u8(
            frame.width(),
            frame.height(),
            frame.as_raw().clone(),
            fr::PixelType::U8x3,
        )?;
        let mut dst = fr::images::Image::new(INF_SIZE, INF_SIZE, fr::PixelType::U8x3);

        let mut resizer = fr::Resizer::new();
        resizer.resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Nearest),
        )?;

        let size = INF_SIZE as usize;
        let mut input = Array::zeros((1, 3, size, size));
        for (i, px) in dst.buffer().chunks_exact(3).enumerate() {
            let y = i / size;
            let x = i % size;
            input[[0, 0, y, x]] = px[0] as f32 / 255.0;
            input[[0, 1, y, x]] = px[1] as f32 / 255.0;
            input[[0, 2, y, x]] = px[2] as f32 / 255.0;
        }
        Ok(input.into_dyn())
    }

    /// 对一帧执行扫描, 返回像素坐标候选
    fn scan(&mut self, frame: &RgbImage) -> Result<Vec<(FaceBox, f32)>> {
        let input = Self::preprocess(frame)?;

        let tensor = TensorRef::from_array_view(&input)?;
        let outputs = self.session.run(ort::inputs![tensor])?;
        let output = outputs[0].try_extract_array::<f32>()?.into_owned();
        drop(outputs);

        let shape = output.shape().to_vec();
        if shape.len() != 3 || shape[2] != 5 {
            return Err(anyhow!("检测模型输出形状异常: {:?}", shape));
        }

        let (fw, fh) = (frame.width() as f32, frame.height() as f32);
        let mut found = Vec::new();
        for i in 0..shape[1] {
            let score = output[[0, i, 0]];
            if score < RAW_SCORE_FLOOR {
                continue;
            }
            let x1 = (output[[0, i, 1]] * fw).clamp(0.0, fw);
            let y1 = (output[[0, i, 2]] * fh).clamp(0.0, fh);
            let x2 = (output[[0, i, 3]] * fw).clamp(0.0, fw);
            let y2 = (output[[0, i, 4]] * fh).clamp(0.0, fh);
            let (w, h) = (x2 - x1, y2 - y1);
            if w > MIN_FACE_SIZE && h > MIN_FACE_SIZE {
                found.push((FaceBox::new(x1, y1, w, h), score));
            }
        }
        Ok(found)
    }
}

impl FaceBackend for OnnxFaceDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawDetection>> {
        let kind = self.kind;
        Ok(self
            .scan(frame)?
            .into_iter()
            .map(|(bbox, score)| RawDetection { bbox, score, kind })
            .collect())
    }
}

/// 镜像侧脸检测器: 水平翻转画面后用侧脸模型扫描,
/// 检出翻转坐标系下朝向另一侧的人脸
pub struct MirroredProfileDetector {
    inner: OnnxFaceDetector,
}

impl MirroredProfileDetector {
    pub fn new(model_path: &Path) -> Result<Self> {
        Ok(Self {
            inner: OnnxFaceDetector::new(DetectorKind::CascadeProfileMirrored, model_path)?,
        })
    }
}

impl FaceBackend for MirroredProfileDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::CascadeProfileMirrored
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawDetection>> {
        let flipped = image::imageops::flip_horizontal(frame);
        Ok(self
            .inner
            .scan(&flipped)?
            .into_iter()
            .map(|(bbox, score)| RawDetection {
                bbox,
                score,
                kind: DetectorKind::CascadeProfileMirrored,
            })
            .collect())
    }
}

/// 按检测方法加载后端集合。
///
/// 能力缺失时降级而非报错: 神经网络模型缺失 → 退回级联;
/// 级联模型缺失 → 退回神经网络。降级只在启动时记录一次。
pub fn load_backends(
    method: DetectionMethod,
    model_dir: &Path,
) -> (Vec<Box<dyn FaceBackend>>, DetectionMethod) {
    let frontal: PathBuf = model_dir.join("face_frontal.onnx");
    let profile: PathBuf = model_dir.join("face_profile.onnx");
    let neural: PathBuf = model_dir.join("face_detector.onnx");

    let mut backends: Vec<Box<dyn FaceBackend>> = Vec::new();
    let mut cascade_ok = false;
    let mut neural_ok = false;

    if method.uses_cascade() {
        match OnnxFaceDetector::new(DetectorKind::CascadeFrontal, &frontal) {
            Ok(b) => {
                backends.push(Box::new(b));
                cascade_ok = true;
            }
            Err(e) => eprintln!("⚠️ 正脸检测器不可用: {:#}", e),
        }
        match OnnxFaceDetector::new(DetectorKind::CascadeProfile, &profile) {
            Ok(b) => {
                backends.push(Box::new(b));
                match MirroredProfileDetector::new(&profile) {
                    Ok(m) => backends.push(Box::new(m)),
                    Err(e) => eprintln!("⚠️ 镜像侧脸检测器不可用: {:#}", e),
                }
            }
            Err(e) => eprintln!("⚠️ 侧脸检测器不可用: {:#}", e),
        }
    }

    if method.uses_neural() {
        match OnnxFaceDetector::new(DetectorKind::NeuralNet, &neural) {
            Ok(b) => {
                backends.push(Box::new(b));
                neural_ok = true;
            }
            Err(e) => eprintln!("⚠️ 神经网络检测器不可用: {:#}", e),
        }
    }

    let effective = match (method, cascade_ok, neural_ok) {
        (DetectionMethod::Both, true, false) => {
            println!("⚠️ 神经网络模型缺失, 检测方法降级为级联");
            DetectionMethod::Cascade
        }
        (DetectionMethod::Both, false, true) => {
            println!("⚠️ 级联模型缺失, 检测方法降级为神经网络");
            DetectionMethod::Neural
        }
        (DetectionMethod::Neural, _, false) => {
            println!("⚠️ 神经网络模型缺失, 将不产生检测结果");
            method
        }
        _ => method,
    };

    (backends, effective)
}
