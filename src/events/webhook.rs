//! Webhook 接收端 (Webhook Sink)
//!
//! 把事件 POST 成 JSON 发给外部 webhook 服务。
//! 探测走服务根路径的 GET, 超时比投递更短。

use std::time::Duration;

use anyhow::Result;

use super::{Event, EventSink};

/// 单次投递超时
const DELIVER_TIMEOUT: Duration = Duration::from_secs(2);
/// 连通性探测超时
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct WebhookSink {
    agent: ureq::Agent,
    url: String,
    probe_url: String,
}

impl WebhookSink {
    pub fn new(url: &str) -> Self {
        // 探测打服务根路径, 不打 webhook 路径本身
        let probe_url = url.replace("/webhook", "/");
        Self {
            agent: ureq::agent(),
            url: url.to_string(),
            probe_url,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn probe_url(&self) -> &str {
        &self.probe_url
    }
}

impl EventSink for WebhookSink {
    fn probe(&self) -> bool {
        self.agent
            .get(&self.probe_url)
            .timeout(PROBE_TIMEOUT)
            .call()
            .map(|resp| resp.status() == 200)
            .unwrap_or(false)
    }

    fn deliver(&self, event: &Event) -> Result<()> {
        self.agent
            .post(&self.url)
            .timeout(DELIVER_TIMEOUT)
            .send_json(event)?;
        Ok(())
    }
}
