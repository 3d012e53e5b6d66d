//! 事件总线 (Event Bus)
//!
//! 控制回路产生的事件在这里异步外发, 绝不阻塞控制路径:
//! - emit 只做一次非阻塞入队, 队满直接丢弃并返回 false
//! - 限频表按事件类型记录上次发送时刻, 窗口内的重复事件被吞掉
//! - 后台投递线程串行出队; 接收端断连时按固定间隔探测重连,
//!   断连期间出队的事件直接丢弃 (不回灌, 不补发)
//!
//! 总线可整体停用 (shared = None), 所有操作退化为空操作。

pub mod webhook;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use crossbeam_skiplist::SkipMap;
use serde::Serialize;
use serde_json::Value;

pub use webhook::WebhookSink;

/// 断连后的探测间隔
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// 事件队列容量
const QUEUE_CAPACITY: usize = 256;

/// 投递线程出队超时 (顺便给探测让出节拍)
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// 限频表哨兵: 该类型从未发送过
const NEVER_SENT: u64 = u64::MAX;

/// 一条外发事件
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub source: String,
    pub local_timestamp: String,
}

impl Event {
    pub fn new(event_type: &str, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            data,
            source: "facefollow".to_string(),
            local_timestamp: Local::now().to_rfc3339(),
        }
    }
}

/// 事件接收端抽象, 由投递线程独占调用
pub trait EventSink: Send + Sync {
    /// 轻量连通性探测
    fn probe(&self) -> bool;
    fn deliver(&self, event: &Event) -> Result<()>;
}

/// 重连节流: 断连后最多每 interval 探测一次
#[derive(Debug)]
pub struct ReconnectPolicy {
    last_attempt: Option<Instant>,
    interval: Duration,
}

impl ReconnectPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_attempt: None,
            interval,
        }
    }

    /// 到探测窗口了吗。返回 true 时同时记下本次尝试。
    pub fn should_probe(&mut self, now: Instant) -> bool {
        let due = match self.last_attempt {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if due {
            self.last_attempt = Some(now);
        }
        due
    }

    /// 投递失败视同一次失败的探测, 推迟下个窗口
    pub fn record_failure(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }
}

struct BusShared {
    tx: Sender<Event>,
    /// 事件类型 → 上次发送时刻 (相对 epoch 的毫秒数)
    throttle: SkipMap<String, AtomicU64>,
    epoch: Instant,
    connected: AtomicBool,
}

/// 可克隆的总线句柄。克隆共享同一队列与限频表。
#[derive(Clone)]
pub struct EventBus {
    shared: Option<Arc<BusShared>>,
}

impl EventBus {
    /// 停用的总线: 所有 emit 返回 false, flush 立即返回
    pub fn disabled() -> Self {
        Self { shared: None }
    }

    pub fn start(sink: impl EventSink + 'static) -> Self {
        Self::with_intervals(sink, PROBE_INTERVAL, RECV_TIMEOUT)
    }

    /// 自定义节拍的构造 (探测间隔/出队超时)
    pub fn with_intervals(
        sink: impl EventSink + 'static,
        probe_interval: Duration,
        recv_timeout: Duration,
    ) -> Self {
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let shared = Arc::new(BusShared {
            tx,
            throttle: SkipMap::new(),
            epoch: Instant::now(),
            connected: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        thread::spawn(move || {
            run_worker(worker_shared, rx, Box::new(sink), probe_interval, recv_timeout);
        });
        Self {
            shared: Some(shared),
        }
    }

    pub fn enabled(&self) -> bool {
        self.shared.is_some()
    }

    pub fn connected(&self) -> bool {
        self.shared
            .as_ref()
            .map(|s| s.connected.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 入队一条事件。false = 停用/队满。
    pub fn emit(&self, event_type: &str, data: Value) -> bool {
        self.enqueue(Event::new(event_type, data))
    }

    /// 同类型事件限频入队。false = 停用/窗口内/队满。
    pub fn emit_throttled(&self, event_type: &str, data: Value, min_interval: Duration) -> bool {
        let Some(shared) = &self.shared else {
            return false;
        };
        let now_ms = shared.epoch.elapsed().as_millis() as u64;
        let entry = shared
            .throttle
            .get_or_insert_with(event_type.to_string(), || AtomicU64::new(NEVER_SENT));
        let last = entry.value().load(Ordering::Relaxed);
        if last != NEVER_SENT && now_ms.saturating_sub(last) < min_interval.as_millis() as u64 {
            return false;
        }
        if self.enqueue(Event::new(event_type, data)) {
            entry.value().store(now_ms, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn enqueue(&self, event: Event) -> bool {
        let Some(shared) = &self.shared else {
            return false;
        };
        match shared.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(ev)) => {
                eprintln!("⚠️ 事件队列已满, 丢弃 {}", ev.event_type);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// 退出前等队列排空, 最多等 max_wait
    pub fn flush(&self, max_wait: Duration) {
        let Some(shared) = &self.shared else {
            return;
        };
        let deadline = Instant::now() + max_wait;
        while !shared.tx.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }
}

fn run_worker(
    shared: Arc<BusShared>,
    rx: Receiver<Event>,
    sink: Box<dyn EventSink>,
    probe_interval: Duration,
    recv_timeout: Duration,
) {
    let mut policy = ReconnectPolicy::new(probe_interval);
    loop {
        if !shared.connected.load(Ordering::Relaxed) && policy.should_probe(Instant::now()) {
            if sink.probe() {
                shared.connected.store(true, Ordering::Relaxed);
                println!("✅ 事件接收端已连通");
            }
        }

        match rx.recv_timeout(recv_timeout) {
            Ok(event) => {
                if !shared.connected.load(Ordering::Relaxed) {
                    // 断连期间丢弃, 不补发
                    continue;
                }
                if let Err(e) = sink.deliver(&event) {
                    eprintln!("⚠️ 事件投递失败 ({}): {:#}", event.event_type, e);
                    shared.connected.store(false, Ordering::Relaxed);
                    policy.record_failure(Instant::now());
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
