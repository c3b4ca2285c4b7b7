//! 两阶段扫描调度
//!
//! 阶段一把字典流拼成候选域名灌进任务通道，阶段二把失败候选再跑一遍。
//! worker池通过共享接收端消费任务，监视器可以在阶段进行中增减worker，
//! 所有worker与监视器汇合之后run返回，两个sink随drop关闭。

use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use log::info;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::limiter::QpsLimiter;
use crate::model::{Phase, ScanResult, ScanStatus};
use crate::monitor::Monitor;
use crate::pool;
use crate::resolver::{DomainResolver, ResolveOutcome};
use crate::state::ScanState;

/// 自适应模式下保证的最低并发
pub(crate) const GUARANTEED_MIN_CONCURRENCY: usize = 150;
/// worker数量与任务通道容量的硬上限
pub(crate) const MAX_CONCURRENCY: usize = 5000;

/// worker每处理这么多候选就发一次进度快照
const STATUS_CADENCE: usize = 1000;

/// 多个worker共享的消息接收端
pub(crate) type SharedReceiver<T> = Arc<AsyncMutex<mpsc::Receiver<T>>>;

/// worker与监视器共享的运行资源
pub(crate) struct ScanCore {
    pub state: ScanState,
    pub resolver: Arc<dyn DomainResolver>,
    pub limiter: Option<QpsLimiter>,
    pub results_tx: mpsc::Sender<ScanResult>,
    pub status_tx: mpsc::Sender<ScanStatus>,
    /// 所有worker共用的停止令牌接收端，一个令牌停掉一个worker
    pub stop_rx: SharedReceiver<()>,
    /// 当前阶段的任务接收端，阶段切换时由调度器替换
    pub tasks: Mutex<SharedReceiver<String>>,
    /// worker汇合点，监视器中途补充的worker也计入
    pub workers: TaskTracker,
}

impl ScanCore {
    /// 在当前任务通道上启动一个新worker
    pub fn spawn_worker(self: &Arc<Self>) {
        let tasks = self.tasks.lock().unwrap().clone();
        let core = Arc::clone(self);
        self.workers.spawn(worker_loop(core, tasks));
    }

    /// 发送一份进度快照，下游迟缓时在此阻塞
    pub async fn emit_status(&self, total_retrying: usize) {
        let _ = self
            .status_tx
            .send(self.state.snapshot(total_retrying))
            .await;
    }
}

/// 根据并发参数与自适应开关计算(下限, 初始worker数)
pub(crate) fn worker_bounds(concurrency: usize, adaptive: bool) -> (usize, usize) {
    let mut min_workers = GUARANTEED_MIN_CONCURRENCY;
    if !adaptive && concurrency > 0 {
        min_workers = concurrency;
    } else if adaptive && concurrency > 0 && concurrency < GUARANTEED_MIN_CONCURRENCY {
        // 用户显式给出的更低并发优先于保底值
        min_workers = concurrency;
    }
    let min_workers = min_workers.min(MAX_CONCURRENCY);
    (min_workers, min_workers)
}

/// 两阶段扫描调度器
pub(crate) struct Scheduler {
    core: Arc<ScanCore>,
    domain: String,
    wordlist_rx: mpsc::Receiver<String>,
    adaptive: bool,
    stop_tx: mpsc::Sender<()>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: Arc<dyn DomainResolver>,
        domain: &str,
        wordlist_rx: mpsc::Receiver<String>,
        total_tasks: usize,
        results_tx: mpsc::Sender<ScanResult>,
        status_tx: mpsc::Sender<ScanStatus>,
        concurrency: usize,
        adaptive: bool,
        max_qps: u32,
    ) -> Self {
        let (min_workers, initial_workers) = worker_bounds(concurrency, adaptive);
        let limiter = if max_qps > 0 {
            Some(QpsLimiter::new(max_qps))
        } else {
            None
        };
        let (stop_tx, stop_rx) = mpsc::channel(MAX_CONCURRENCY);

        // 真正的任务通道按阶段创建，这里放一个已关闭的占位
        let (placeholder_tx, placeholder_rx) = mpsc::channel(1);
        drop(placeholder_tx);

        let core = Arc::new(ScanCore {
            state: ScanState::new(initial_workers, min_workers, total_tasks),
            resolver,
            limiter,
            results_tx,
            status_tx,
            stop_rx: Arc::new(AsyncMutex::new(stop_rx)),
            tasks: Mutex::new(Arc::new(AsyncMutex::new(placeholder_rx))),
            workers: TaskTracker::new(),
        });

        Scheduler {
            core,
            domain: domain.to_string(),
            wordlist_rx,
            adaptive,
            stop_tx,
        }
    }

    /// 运行完整扫描，结束时已汇合所有worker与监视器
    pub async fn run(mut self, enable_retry: bool) {
        // --- 阶段一：主扫描 ---
        let tasks_tx = self.open_task_channel();
        let initial = self.core.state.active_workers.load(Ordering::Relaxed);
        for _ in 0..initial {
            self.core.spawn_worker();
        }

        let monitor = if self.adaptive {
            let (quit_tx, quit_rx) = mpsc::channel(1);
            let monitor = Monitor::new(Arc::clone(&self.core), self.stop_tx.clone());
            Some((quit_tx, tokio::spawn(monitor.run(quit_rx))))
        } else {
            None
        };

        info!("开始主扫描阶段");
        self.core.emit_status(0).await;

        while let Some(word) = self.wordlist_rx.recv().await {
            let candidate = format!("{}.{}", word, self.domain);
            if tasks_tx.send(candidate).await.is_err() {
                break;
            }
        }
        drop(tasks_tx);
        self.core.workers.close();
        self.core.workers.wait().await;
        info!("主扫描阶段结束");

        // --- 决策点 ---
        let retry_tasks = match self.core.state.failed_domains.lock() {
            Ok(mut failed) => std::mem::take(&mut *failed),
            Err(_) => Vec::new(),
        };
        if !enable_retry || retry_tasks.is_empty() {
            info!("无需重试，扫描结束");
            self.finish(monitor).await;
            return;
        }

        // --- 阶段二：失败重试 ---
        info!("开始重试阶段，共 {} 个失败域名", retry_tasks.len());
        let state = &self.core.state;
        state.total_tasks.store(retry_tasks.len(), Ordering::Relaxed);
        state.scanned.store(0, Ordering::Relaxed);
        state.failed.store(0, Ordering::Relaxed);
        state.set_phase(Phase::RetryScan);
        self.core.emit_status(retry_tasks.len()).await;

        let tasks_tx = self.open_task_channel();
        self.core.workers.reopen();
        let carried = self.core.state.active_workers.load(Ordering::Relaxed);
        for _ in 0..carried {
            self.core.spawn_worker();
        }

        // 重试列表由独立任务灌入，发送端随其结束而关闭
        let feeder = tokio::spawn(async move {
            for domain in retry_tasks {
                if tasks_tx.send(domain).await.is_err() {
                    break;
                }
            }
        });

        self.core.workers.close();
        self.core.workers.wait().await;
        feeder.abort();
        let _ = feeder.await;
        info!("重试阶段结束");

        self.finish(monitor).await;
    }

    /// 创建新的任务通道并放进共享槽位，返回发送端
    fn open_task_channel(&self) -> mpsc::Sender<String> {
        let (tasks_tx, tasks_rx) = mpsc::channel(MAX_CONCURRENCY);
        *self.core.tasks.lock().unwrap() = Arc::new(AsyncMutex::new(tasks_rx));
        tasks_tx
    }

    /// 通知监视器退出并发出最终快照
    async fn finish(self, monitor: Option<(mpsc::Sender<()>, JoinHandle<()>)>) {
        if let Some((quit_tx, handle)) = monitor {
            drop(quit_tx);
            let _ = handle.await;
        }
        self.core.state.set_phase(Phase::Done);
        self.core.emit_status(0).await;
    }
}

/// 单个worker的取件循环
///
/// 停止令牌与任务耗尽都会让worker退出，剩余任务留给其他worker。
async fn worker_loop(core: Arc<ScanCore>, tasks: SharedReceiver<String>) {
    loop {
        let task = tokio::select! {
            task = recv_shared(&tasks) => match task {
                Some(task) => task,
                None => return,
            },
            _ = recv_shared(&core.stop_rx) => return,
        };
        handle_task(&core, task).await;
    }
}

/// 锁定共享接收端取出下一条消息
async fn recv_shared<T>(receiver: &SharedReceiver<T>) -> Option<T> {
    receiver.lock().await.recv().await
}

/// 解析单个候选域名并更新计数
async fn handle_task(core: &Arc<ScanCore>, domain: String) {
    if let Some(limiter) = &core.limiter {
        limiter.acquire().await;
    }

    let resolution = core.resolver.resolve(&domain).await;
    let state = &core.state;

    let scanned = state.scanned.fetch_add(1, Ordering::Relaxed) + 1;
    state
        .total_requests
        .fetch_add(resolution.attempts, Ordering::Relaxed);
    if resolution.attempts > 1 {
        state
            .total_retries
            .fetch_add(resolution.attempts - 1, Ordering::Relaxed);
        state.retried_resolutions.fetch_add(1, Ordering::Relaxed);
    }
    state.total_resolutions.fetch_add(1, Ordering::Relaxed);

    match resolution.outcome {
        ResolveOutcome::Success(ip) => {
            let mut result = pool::get_scan_result();
            result.subdomain.push_str(&domain);
            let _ = write!(result.ip, "{}", ip);
            let _ = core.results_tx.send(result).await;
        }
        ResolveOutcome::NotFound => {}
        ResolveOutcome::Failed => {
            state.failed.fetch_add(1, Ordering::Relaxed);
            if let Ok(mut failed_domains) = state.failed_domains.lock() {
                failed_domains.push(domain);
            }
        }
    }

    if scanned % STATUS_CADENCE == 0 || scanned == state.total_tasks.load(Ordering::Relaxed) {
        core.emit_status(0).await;
    }
}
