//! 命令行参数与运行配置

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::detection::DetectionMethod;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "人脸跟踪无人机控制器")]
pub struct Cli {
    /// 使用模拟器。真机驱动尚未接入: 不加此参数时同样回落到模拟器, 仅多一条告警
    #[arg(long)]
    pub sim: bool,

    /// 低电量时仍允许起飞
    #[arg(long)]
    pub force: bool,

    /// 直连模式下无人机的 IP 地址 (真机驱动接入后生效)
    #[arg(long)]
    pub direct_ip: Option<String>,

    /// 输出每帧调试信息
    #[arg(long)]
    pub debug: bool,

    /// 跟随平滑因子 (0.5-2.0, 越大越平缓)
    #[arg(long, default_value_t = 1.0)]
    pub smooth: f32,

    /// 目标丢失超时 (秒)
    #[arg(long, default_value_t = 5.0)]
    pub timeout: f32,

    /// 移动指令冷却 (秒)
    #[arg(long, default_value_t = 0.3)]
    pub cooldown: f32,

    /// 检测方法
    #[arg(long, value_enum, default_value = "both")]
    pub detection: DetectionMethod,

    /// 事件 webhook 地址
    #[arg(long, default_value = "http://localhost:3004/webhook")]
    pub webhook: String,

    /// 完全停用事件外发
    #[arg(long)]
    pub no_webhook: bool,

    /// ONNX 模型目录
    #[arg(long, default_value = "models")]
    pub model_dir: PathBuf,
}

/// 解析校验后的运行配置
#[derive(Debug, Clone)]
pub struct Config {
    pub simulate: bool,
    pub force_takeoff: bool,
    pub direct_ip: Option<String>,
    pub debug: bool,
    pub smoothness: f32,
    pub lost_timeout: Duration,
    pub command_cooldown: Duration,
    pub detection: DetectionMethod,
    /// None = 事件外发停用
    pub webhook_url: Option<String>,
    pub model_dir: PathBuf,
}

impl Cli {
    pub fn into_config(self) -> Config {
        Config {
            simulate: self.sim,
            force_takeoff: self.force,
            direct_ip: self.direct_ip,
            debug: self.debug,
            smoothness: self.smooth.clamp(0.5, 2.0),
            lost_timeout: secs_to_duration(self.timeout.max(0.1)),
            command_cooldown: secs_to_duration(self.cooldown.max(0.0)),
            detection: self.detection,
            webhook_url: if self.no_webhook {
                None
            } else {
                Some(self.webhook)
            },
            model_dir: self.model_dir,
        }
    }
}

/// 秒数参数按毫秒取整构造 Duration, 避免 f32 秒值的精度毛刺
/// (0.3s 经 from_secs_f32 会变成 300.000012ms)
fn secs_to_duration(secs: f32) -> Duration {
    Duration::from_millis((secs * 1000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Cli::parse_from(["facefollow"]).into_config();
        assert!(!config.simulate);
        assert!(!config.force_takeoff);
        assert_eq!(config.smoothness, 1.0);
        assert_eq!(config.lost_timeout, Duration::from_secs(5));
        assert_eq!(config.command_cooldown, Duration::from_millis(300));
        assert_eq!(config.detection, DetectionMethod::Both);
        assert_eq!(
            config.webhook_url.as_deref(),
            Some("http://localhost:3004/webhook")
        );
        assert_eq!(config.model_dir, PathBuf::from("models"));
    }

    #[test]
    fn test_fractional_seconds_convert_to_exact_millis() {
        // 0.3 之类的 f32 秒值不能带出微秒级毛刺
        let config =
            Cli::parse_from(["facefollow", "--cooldown", "0.25", "--timeout", "7.5"]).into_config();
        assert_eq!(config.command_cooldown, Duration::from_millis(250));
        assert_eq!(config.lost_timeout, Duration::from_millis(7500));
        assert_eq!(secs_to_duration(0.3), Duration::from_millis(300));
    }

    #[test]
    fn test_no_webhook_disables_events() {
        let config = Cli::parse_from(["facefollow", "--no-webhook"]).into_config();
        assert!(config.webhook_url.is_none());
    }

    #[test]
    fn test_smoothness_clamped() {
        let config = Cli::parse_from(["facefollow", "--smooth", "9.0"]).into_config();
        assert_eq!(config.smoothness, 2.0);
        let config = Cli::parse_from(["facefollow", "--smooth", "0.01"]).into_config();
        assert_eq!(config.smoothness, 0.5);
    }

    #[test]
    fn test_detection_method_parsing() {
        let config = Cli::parse_from(["facefollow", "--detection", "neural"]).into_config();
        assert_eq!(config.detection, DetectionMethod::Neural);
    }
}
