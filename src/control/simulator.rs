//! 模拟无人机 (Drone Simulator)
//!
//! 不接真机时的全功能替身: 维护电量/高度/温度等内部状态,
//! 后台漂移线程让遥测像真的在飞, 视频帧是合成的棋盘格加一个
//! 缓慢摆动的亮块。主循环对模拟器和真机一视同仁。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use rand::Rng;

use super::drone::{Drone, Telemetry};

const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;

/// 漂移线程更新间隔
const DRIFT_INTERVAL: Duration = Duration::from_secs(1);

/// 起飞后的悬停高度 (厘米)
const HOVER_HEIGHT: i32 = 120;
const MIN_HEIGHT: i32 = 50;
const MAX_HEIGHT: i32 = 200;

/// 每次遥测查询的电量消耗 (飞行中)
const BATTERY_DRAIN_PER_QUERY: f32 = 0.01;

struct SimState {
    connected: bool,
    flying: bool,
    streaming: bool,
    battery: f32,
    height_cm: i32,
    temperature_c: f32,
    barometer_cm: f32,
    takeoff_at: Option<Instant>,
}

pub struct DroneSimulator {
    state: Arc<Mutex<SimState>>,
    stop: Arc<AtomicBool>,
    drift: Option<JoinHandle<()>>,
    frame_counter: u64,
}

impl DroneSimulator {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(SimState {
            connected: false,
            flying: false,
            streaming: false,
            battery: 90.0,
            height_cm: 0,
            temperature_c: 32.0,
            barometer_cm: 150.5,
            takeoff_at: None,
        }));
        let stop = Arc::new(AtomicBool::new(false));
        let drift = Some(spawn_drift(Arc::clone(&state), Arc::clone(&stop)));
        Self {
            state,
            stop,
            drift,
            frame_counter: 0,
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply_move(&mut self, cm: i32, dh: i32) -> Result<()> {
        let mut s = self.locked();
        if !s.flying {
            bail!("未在飞行中, 指令被拒绝");
        }
        if cm <= 0 {
            bail!("移动量必须为正: {}", cm);
        }
        if dh != 0 {
            s.height_cm = (s.height_cm + dh).clamp(MIN_HEIGHT, MAX_HEIGHT);
        }
        Ok(())
    }
}

impl Default for DroneSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drone for DroneSimulator {
    fn connect(&mut self) -> Result<()> {
        let mut s = self.locked();
        s.connected = true;
        println!("✅ 模拟器已连接");
        Ok(())
    }

    fn takeoff(&mut self) -> Result<()> {
        let mut s = self.locked();
        if !s.connected {
            bail!("未连接");
        }
        if s.flying {
            bail!("已在飞行中");
        }
        s.flying = true;
        s.height_cm = HOVER_HEIGHT;
        s.takeoff_at = Some(Instant::now());
        println!("🚀 模拟起飞, 悬停 {}cm", HOVER_HEIGHT);
        Ok(())
    }

    fn land(&mut self) -> Result<()> {
        let mut s = self.locked();
        if !s.flying {
            bail!("未在飞行中");
        }
        s.flying = false;
        s.height_cm = 0;
        s.takeoff_at = None;
        println!("🛬 模拟降落");
        Ok(())
    }

    fn emergency_stop(&mut self) -> Result<()> {
        let mut s = self.locked();
        s.flying = false;
        s.height_cm = 0;
        s.takeoff_at = None;
        println!("🛑 模拟急停");
        Ok(())
    }

    fn telemetry(&mut self) -> Result<Telemetry> {
        let mut s = self.locked();
        if !s.connected {
            bail!("未连接");
        }
        if s.flying {
            s.battery = (s.battery - BATTERY_DRAIN_PER_QUERY).max(0.0);
        }
        let flight_time_secs = s
            .takeoff_at
            .map(|t| t.elapsed().as_secs() as u32)
            .unwrap_or(0);
        Ok(Telemetry {
            battery: s.battery,
            height_cm: s.height_cm,
            temperature_c: s.temperature_c,
            barometer_cm: s.barometer_cm,
            flight_time_secs,
        })
    }

    fn move_up(&mut self, cm: i32) -> Result<()> {
        self.apply_move(cm, cm)
    }
    fn move_down(&mut self, cm: i32) -> Result<()> {
        self.apply_move(cm, -cm)
    }
    fn move_forward(&mut self, cm: i32) -> Result<()> {
        self.apply_move(cm, 0)
    }
    fn move_back(&mut self, cm: i32) -> Result<()> {
        self.apply_move(cm, 0)
    }
    fn move_left(&mut self, cm: i32) -> Result<()> {
        self.apply_move(cm, 0)
    }
    fn move_right(&mut self, cm: i32) -> Result<()> {
        self.apply_move(cm, 0)
    }
    fn rotate_cw(&mut self, deg: i32) -> Result<()> {
        self.apply_move(deg, 0)
    }
    fn rotate_ccw(&mut self, deg: i32) -> Result<()> {
        self.apply_move(deg, 0)
    }

    fn stream_on(&mut self) -> Result<()> {
        let mut s = self.locked();
        if !s.connected {
            bail!("未连接");
        }
        s.streaming = true;
        println!("📹 模拟视频流开启");
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.locked().streaming = false;
        Ok(())
    }

    fn frame(&mut self) -> Result<RgbImage> {
        if !self.locked().streaming {
            bail!("视频流未开启");
        }
        self.frame_counter += 1;
        Ok(synthetic_frame(self.frame_counter))
    }
}

impl Drop for DroneSimulator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.drift.take() {
            let _ = handle.join();
        }
    }
}

/// 后台漂移: 飞行中高度/温度/气压缓慢随机波动
fn spawn_drift(state: Arc<Mutex<SimState>>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut rng = rand::thread_rng();
        while !stop.load(Ordering::Relaxed) {
            thread::sleep(DRIFT_INTERVAL);
            let mut s = match state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if s.flying {
                let dh: i32 = rng.gen_range(-3..=3);
                s.height_cm = (s.height_cm + dh).clamp(MIN_HEIGHT, MAX_HEIGHT);
                s.temperature_c = 30.0 + rng.gen::<f32>() * 5.0;
                s.barometer_cm = 150.0 + rng.gen::<f32>() * 10.0;
            }
        }
    })
}

/// 棋盘格背景 + 随帧号缓慢摆动的亮块
fn synthetic_frame(counter: u64) -> RgbImage {
    let sway = (counter as f32 * 0.05).sin();
    let cx = (FRAME_WIDTH as f32 / 2.0 + sway * 60.0) as i64;
    let cy = (FRAME_HEIGHT as f32 / 2.0) as i64;
    let half = 60i64;

    RgbImage::from_fn(FRAME_WIDTH, FRAME_HEIGHT, |x, y| {
        let xi = x as i64;
        let yi = y as i64;
        if (xi - cx).abs() < half && (yi - cy).abs() < half {
            Rgb([210, 180, 160])
        } else if x % 40 == 0 || y % 40 == 0 {
            Rgb([60, 60, 60])
        } else {
            Rgb([25, 25, 30])
        }
    })
}
