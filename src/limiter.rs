//! 扫描全局的QPS限速

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// 令牌桶限速器，约束所有worker的每秒解析总量
///
/// 速率与突发量都等于max_qps，桶初始装满。仅在max_qps > 0时创建，
/// 一次扫描的两个阶段共用同一个实例。
#[derive(Debug)]
pub struct QpsLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl QpsLimiter {
    /// 创建速率为max_qps的限速器
    pub fn new(max_qps: u32) -> Self {
        let qps = max_qps as f64;
        QpsLimiter {
            rate: qps,
            burst: qps,
            bucket: Mutex::new(Bucket {
                tokens: qps,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 取走一个令牌，桶空时等待补充
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };
            sleep(wait).await;
        }
    }
}
