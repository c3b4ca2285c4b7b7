//! 引擎整体行为测试
//!
//! 用内存剧本解析器驱动完整的扫描流程，覆盖两阶段重试、
//! 限速、并发边界与进度快照等行为。

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use simplelog::{Config, LevelFilter, SimpleLogger};
use tokio::sync::mpsc;
use tokio::time::Instant;

use rsubscan::{
    put_scan_result, DomainResolver, Phase, Resolution, ResolveOutcome, ScanResult, ScanStatus,
    Scanner,
};

static INIT_LOGGER: Once = Once::new();

fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = SimpleLogger::init(LevelFilter::Info, Config::default());
    });
}

/// 剧本里单次调用的结果
#[derive(Debug, Clone, Copy)]
enum MockStep {
    Answer(Ipv4Addr),
    NotFound,
    Fail,
}

/// 按域名剧本回放结果的内存解析器
///
/// 每个域名按调用次序消费剧本步骤，最后一步会一直重复；
/// 未写进剧本的域名一律NotFound。
struct MockResolver {
    plan: HashMap<String, Vec<MockStep>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Duration,
}

impl MockResolver {
    fn new() -> Self {
        MockResolver {
            plan: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn script(mut self, domain: &str, steps: &[MockStep]) -> Self {
        self.plan.insert(domain.to_string(), steps.to_vec());
        self
    }
}

#[async_trait]
impl DomainResolver for MockResolver {
    async fn resolve(&self, domain: &str) -> Resolution {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            let counter = calls.entry(domain.to_string()).or_insert(0);
            let current = *counter;
            *counter += 1;
            current
        };
        let step = self
            .plan
            .get(domain)
            .and_then(|steps| steps.get(call_index).or_else(|| steps.last()))
            .copied()
            .unwrap_or(MockStep::NotFound);
        match step {
            MockStep::Answer(ip) => Resolution {
                outcome: ResolveOutcome::Success(ip),
                attempts: 1,
                error: None,
            },
            MockStep::NotFound => Resolution {
                outcome: ResolveOutcome::NotFound,
                attempts: 1,
                error: None,
            },
            MockStep::Fail => Resolution {
                outcome: ResolveOutcome::Failed,
                attempts: 6,
                error: None,
            },
        }
    }
}

/// 一次完整扫描收集到的输出
struct ScanRun {
    results: Vec<ScanResult>,
    statuses: Vec<ScanStatus>,
}

impl ScanRun {
    /// 结果按(子域名, IP)排序后返回，便于与期望值比较
    fn sorted_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .results
            .iter()
            .map(|r| (r.subdomain.clone(), r.ip.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    fn done_status(&self) -> &ScanStatus {
        let status = self.statuses.last().expect("至少应有done快照");
        assert_eq!(status.phase, Phase::Done);
        status
    }
}

/// 驱动一次完整扫描并收集两个sink的全部输出
async fn run_scan(
    resolver: MockResolver,
    words: Vec<String>,
    concurrency: usize,
    adaptive: bool,
    max_qps: u32,
    enable_retry: bool,
) -> ScanRun {
    let scanner = Scanner::with_resolver(Arc::new(resolver));
    let (word_tx, word_rx) = mpsc::channel(1024);
    let (result_tx, mut result_rx) = mpsc::channel::<ScanResult>(4096);
    let (status_tx, mut status_rx) = mpsc::channel(4096);

    let total = words.len();
    let feeder = tokio::spawn(async move {
        for word in words {
            if word_tx.send(word).await.is_err() {
                break;
            }
        }
    });

    let results_task = tokio::spawn(async move {
        let mut results = Vec::new();
        while let Some(result) = result_rx.recv().await {
            results.push(result.clone());
            put_scan_result(result);
        }
        results
    });
    let status_task = tokio::spawn(async move {
        let mut statuses = Vec::new();
        while let Some(status) = status_rx.recv().await {
            statuses.push(status);
        }
        statuses
    });

    scanner
        .start(
            "x.test",
            word_rx,
            total,
            result_tx,
            status_tx,
            concurrency,
            adaptive,
            max_qps,
            enable_retry,
        )
        .await;

    feeder.await.unwrap();
    // start返回后两个sink已关闭，收集任务随之结束
    let results = results_task.await.unwrap();
    let statuses = status_task.await.unwrap();
    ScanRun { results, statuses }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

#[tokio::test]
async fn test_happy_path() {
    let resolver = MockResolver::new()
        .script("a.x.test", &[MockStep::Answer(Ipv4Addr::new(1, 1, 1, 1))])
        .script("b.x.test", &[MockStep::NotFound])
        .script("c.x.test", &[MockStep::Answer(Ipv4Addr::new(2, 2, 2, 2))]);

    let run = run_scan(resolver, words(&["a", "b", "c"]), 4, false, 0, true).await;

    assert_eq!(
        run.sorted_pairs(),
        vec![
            ("a.x.test".to_string(), "1.1.1.1".to_string()),
            ("c.x.test".to_string(), "2.2.2.2".to_string()),
        ]
    );
    // 没有失败就没有重试阶段
    assert!(run.statuses.iter().all(|s| s.phase != Phase::RetryScan));

    let done = run.done_status();
    assert_eq!(done.scanned, 3);
    assert_eq!(done.failed, 0);
    assert_eq!(done.total_requests, 3);
    assert_eq!(done.total_retries, done.total_requests - done.scanned);
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let resolver = MockResolver::new()
        .script("a.x.test", &[MockStep::Answer(Ipv4Addr::new(1, 1, 1, 1))])
        .script(
            "b.x.test",
            &[MockStep::Fail, MockStep::Answer(Ipv4Addr::new(3, 3, 3, 3))],
        );

    let run = run_scan(resolver, words(&["a", "b"]), 2, false, 0, true).await;

    assert_eq!(
        run.sorted_pairs(),
        vec![
            ("a.x.test".to_string(), "1.1.1.1".to_string()),
            ("b.x.test".to_string(), "3.3.3.3".to_string()),
        ]
    );

    // 首轮末尾的worker快照应记录到一次失败
    assert!(run
        .statuses
        .iter()
        .any(|s| s.phase == Phase::MainScan && s.failed == 1));
    // 阶段切换快照携带重试数量
    assert!(run
        .statuses
        .iter()
        .any(|s| s.phase == Phase::RetryScan && s.total_retrying == 1));

    let done = run.done_status();
    assert_eq!(done.failed, 0);
    // 首轮a一次、b六次，重试阶段b一次
    assert_eq!(done.total_requests, 8);
    assert_eq!(done.total_retries, 5);
}

#[tokio::test]
async fn test_permanent_failure_survives_both_phases() {
    let resolver = MockResolver::new().script("z.x.test", &[MockStep::Fail]);

    let run = run_scan(resolver, words(&["z"]), 2, false, 0, true).await;

    assert!(run.results.is_empty());
    assert!(run
        .statuses
        .iter()
        .any(|s| s.phase == Phase::RetryScan && s.total_retrying == 1));

    let done = run.done_status();
    assert_eq!(done.failed, 1);
    assert_eq!(done.scanned, 1);
    assert_eq!(done.total_requests, 12);
    assert_eq!(done.total_retries, 10);
}

#[tokio::test]
async fn test_retry_disabled_discards_failures() {
    let resolver = MockResolver::new().script("z.x.test", &[MockStep::Fail]);

    let run = run_scan(resolver, words(&["z"]), 2, false, 0, false).await;

    assert!(run.results.is_empty());
    assert!(run.statuses.iter().all(|s| s.phase != Phase::RetryScan));

    let done = run.done_status();
    assert_eq!(done.failed, 1);
    assert_eq!(done.total_requests, 6);
}

#[tokio::test]
async fn test_empty_wordlist_finishes_immediately() {
    let run = run_scan(MockResolver::new(), Vec::new(), 4, false, 0, true).await;

    assert!(run.results.is_empty());
    // 只有主扫描边界快照和done快照
    assert_eq!(run.statuses.len(), 2);
    assert_eq!(run.statuses[0].phase, Phase::MainScan);
    assert_eq!(run.statuses[0].scanned, 0);
    assert_eq!(run.done_status().scanned, 0);
}

#[tokio::test]
async fn test_fixed_concurrency_stays_at_one() {
    let mut resolver = MockResolver::new();
    let mut list = Vec::new();
    for i in 0..20 {
        let word = format!("w{}", i);
        let ip = Ipv4Addr::new(10, 0, 0, i as u8 + 1);
        resolver = resolver.script(&format!("{}.x.test", word), &[MockStep::Answer(ip)]);
        list.push(word);
    }

    let run = run_scan(resolver, list, 1, false, 0, true).await;

    assert_eq!(run.results.len(), 20);
    assert!(run.statuses.iter().all(|s| s.concurrency == 1));
}

#[tokio::test]
async fn test_adaptive_low_concurrency_override() {
    let run = run_scan(
        MockResolver::new(),
        (0..10).map(|i| format!("w{}", i)).collect(),
        2,
        true,
        0,
        true,
    )
    .await;

    // 扫描在首个监视周期前结束，worker数应始终是用户给的2
    assert!(run.statuses.iter().all(|s| s.concurrency == 2));
}

#[tokio::test]
async fn test_same_wordlist_yields_same_multiset() {
    let script = |resolver: MockResolver| {
        resolver
            .script("a.x.test", &[MockStep::Answer(Ipv4Addr::new(1, 1, 1, 1))])
            .script("b.x.test", &[MockStep::NotFound])
            .script("c.x.test", &[MockStep::Answer(Ipv4Addr::new(2, 2, 2, 2))])
            .script("d.x.test", &[MockStep::Answer(Ipv4Addr::new(3, 3, 3, 3))])
    };
    let list = words(&["a", "b", "c", "d"]);

    let first = run_scan(script(MockResolver::new()), list.clone(), 4, false, 0, true).await;
    let second = run_scan(script(MockResolver::new()), list, 2, false, 0, true).await;

    assert_eq!(first.sorted_pairs(), second.sorted_pairs());
}

#[tokio::test]
async fn test_qps_ceiling_slows_instant_resolver() {
    let list: Vec<String> = (0..30).map(|i| format!("w{}", i)).collect();
    let start = Instant::now();
    let run = run_scan(MockResolver::new(), list, 10, false, 20, true).await;
    let elapsed = start.elapsed();

    // 突发额度20个即时放行，剩余10个按每秒20个补充
    assert!(elapsed >= Duration::from_millis(350), "elapsed = {:?}", elapsed);
    assert_eq!(run.done_status().scanned, 30);
}

#[tokio::test]
async fn test_adaptive_growth_under_low_retry_rate() {
    init_test_logger();

    let list: Vec<String> = (0..12_000).map(|i| format!("w{}", i)).collect();
    let resolver = MockResolver::new().with_delay(Duration::from_millis(40));

    let run = run_scan(resolver, list, 0, true, 0, false).await;

    let max_concurrency = run
        .statuses
        .iter()
        .map(|s| s.concurrency)
        .max()
        .unwrap_or(0);
    // 至少经历了一次健康区的+40
    assert!(
        max_concurrency > 150,
        "并发未增长: max = {}",
        max_concurrency
    );
    assert!(run.statuses.iter().all(|s| s.concurrency <= 5000));
    assert!(run.statuses.iter().all(|s| s.concurrency >= 150));
    assert_eq!(run.done_status().scanned, 12_000);
}
