//! 自适应并发监视
//!
//! 每隔两秒用窗口内的重试率估计上游解析器的饱和程度：
//! 重试率低时小步加worker，重试率高时大步减worker，
//! 减的步长大于加的步长以便更快地从拥塞中退出。

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

use crate::scheduler::{ScanCore, MAX_CONCURRENCY};

/// 采样与调整的周期
const ADJUST_INTERVAL: Duration = Duration::from_secs(2);

/// 依据重试率增减worker数量的监视器
pub(crate) struct Monitor {
    core: Arc<ScanCore>,
    stop_tx: mpsc::Sender<()>,
}

impl Monitor {
    pub fn new(core: Arc<ScanCore>, stop_tx: mpsc::Sender<()>) -> Self {
        Monitor { core, stop_tx }
    }

    /// 周期采样并调整，quit_rx关闭或来消息时立即返回
    pub async fn run(self, mut quit_rx: mpsc::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + ADJUST_INTERVAL, ADJUST_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.adjust_once().await,
                _ = quit_rx.recv() => {
                    debug!("[自适应] 扫描结束，监视器退出");
                    return;
                }
            }
        }
    }

    /// 完成一轮采样与调整
    async fn adjust_once(&self) {
        let state = &self.core.state;
        let total = state.total_resolutions.swap(0, Ordering::Relaxed);
        let retried = state.retried_resolutions.swap(0, Ordering::Relaxed);
        if total == 0 {
            debug!("[自适应] 窗口内没有完成的解析，并发保持不变");
            return;
        }

        let retry_rate = retried as f64 / total as f64;
        let current = state.active_workers.load(Ordering::Relaxed);
        info!(
            "[自适应] 重试率: {:.2}% | 当前并发: {}",
            retry_rate * 100.0,
            current
        );

        let delta = plan_adjustment(retry_rate, current, state.min_workers);
        if delta != 0 {
            self.adjust_workers(delta).await;
        }
    }

    /// 应用增减：正值生成新worker，负值投放停止令牌
    async fn adjust_workers(&self, delta: i64) {
        let state = &self.core.state;
        if delta > 0 {
            let grow = delta as usize;
            let new_count = state.active_workers.fetch_add(grow, Ordering::Relaxed) + grow;
            info!("[自适应] worker增加到 {}", new_count);
            for _ in 0..grow {
                self.core.spawn_worker();
            }
        } else {
            let mut to_stop = (-delta) as usize;
            let current = state.active_workers.load(Ordering::Relaxed);
            // 收缩不越过下限
            if current.saturating_sub(to_stop) < state.min_workers {
                to_stop = current.saturating_sub(state.min_workers);
            }
            if to_stop == 0 {
                return;
            }
            let new_count = state.active_workers.fetch_sub(to_stop, Ordering::Relaxed) - to_stop;
            info!("[自适应] worker减少到 {}", new_count);
            for _ in 0..to_stop {
                let _ = self.stop_tx.send(()).await;
            }
        }
    }
}

/// 重试率规则表，返回worker数量的增减量
///
/// 增长在接近上限时截短，避免越过5000。
pub(crate) fn plan_adjustment(retry_rate: f64, current: usize, min_workers: usize) -> i64 {
    if retry_rate < 0.20 {
        // 健康区
        if current < MAX_CONCURRENCY {
            (MAX_CONCURRENCY - current).min(40) as i64
        } else {
            0
        }
    } else if retry_rate < 0.50 {
        // 压力区
        if current < MAX_CONCURRENCY {
            (MAX_CONCURRENCY - current).min(20) as i64
        } else {
            0
        }
    } else if retry_rate < 0.70 {
        // 警告区
        if current > min_workers {
            -60
        } else {
            0
        }
    } else if current > min_workers {
        // 危险区
        -120
    } else {
        0
    }
}
