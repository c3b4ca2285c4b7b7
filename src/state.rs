//! 扫描过程的共享状态
//!
//! worker、调度器与监视器通过这里的原子计数并发读写进度，
//! 失败域名列表由互斥锁保护，在阶段切换时被调度器取走。

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::model::{Phase, ScanStatus};

/// 扫描引擎的共享计数与失败缓冲
#[derive(Debug)]
pub(crate) struct ScanState {
    /// 当前阶段已处理的候选数，阶段切换时清零
    pub scanned: AtomicUsize,
    /// 当前阶段以Failed收场的候选数，阶段切换时清零
    pub failed: AtomicUsize,
    /// 全程累计的DNS交换次数
    pub total_requests: AtomicUsize,
    /// 全程累计的重试交换次数
    pub total_retries: AtomicUsize,
    /// 监视器采样窗口内完成的解析数，每次采样后清零
    pub total_resolutions: AtomicUsize,
    /// 监视器采样窗口内经历过重试的解析数，每次采样后清零
    pub retried_resolutions: AtomicUsize,
    /// 尚未被要求停止的worker数量
    pub active_workers: AtomicUsize,
    /// worker数量下限，初始化后不再变化
    pub min_workers: usize,
    /// 当前阶段的任务总数
    pub total_tasks: AtomicUsize,
    /// 当前阶段，由调度器在阶段边界更新
    phase: AtomicU8,
    /// 等待重试的失败域名
    pub failed_domains: Mutex<Vec<String>>,
}

impl ScanState {
    pub fn new(initial_workers: usize, min_workers: usize, total_tasks: usize) -> Self {
        ScanState {
            scanned: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            total_requests: AtomicUsize::new(0),
            total_retries: AtomicUsize::new(0),
            total_resolutions: AtomicUsize::new(0),
            retried_resolutions: AtomicUsize::new(0),
            active_workers: AtomicUsize::new(initial_workers),
            min_workers,
            total_tasks: AtomicUsize::new(total_tasks),
            phase: AtomicU8::new(Phase::MainScan as u8),
            failed_domains: Mutex::new(Vec::new()),
        }
    }

    /// 当前阶段
    pub fn phase(&self) -> Phase {
        match self.phase.load(Ordering::Relaxed) {
            0 => Phase::MainScan,
            1 => Phase::RetryScan,
            _ => Phase::Done,
        }
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    /// 以独立的原子读取拼出一份进度快照
    pub fn snapshot(&self, total_retrying: usize) -> ScanStatus {
        ScanStatus {
            scanned: self.scanned.load(Ordering::Relaxed),
            total: self.total_tasks.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            concurrency: self.active_workers.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            phase: self.phase(),
            total_retrying,
        }
    }
}
