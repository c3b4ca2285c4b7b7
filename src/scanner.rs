//! 扫描引擎的对外入口

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::model::{ScanResult, ScanStatus};
use crate::resolver::{DomainResolver, Resolver};
use crate::scheduler::Scheduler;

/// 子域名扫描引擎
///
/// 持有解析后端并负责发起完整的扫描流程，
/// 字典流与结果、进度两个sink都由调用方提供。
pub struct Scanner {
    resolver: Arc<dyn DomainResolver>,
    debug_network: bool,
}

impl Scanner {
    /// 创建使用默认分层DNS服务器的扫描器
    ///
    /// debug_network开启后，解析过程中的网络错误会以debug级别记录。
    pub fn new(debug_network: bool) -> Self {
        Scanner {
            resolver: Arc::new(Resolver::new(debug_network)),
            debug_network,
        }
    }

    /// 使用自定义解析后端创建扫描器
    pub fn with_resolver(resolver: Arc<dyn DomainResolver>) -> Self {
        Scanner {
            resolver,
            debug_network: false,
        }
    }

    /// 设置自定义DNS服务器，裸主机自动补上":53"端口
    ///
    /// 非空列表会换上一个以该列表为一级、二级为空的内置解析器；
    /// 空列表不产生任何变化。
    pub fn set_dns_servers(&mut self, servers: &[String]) {
        if servers.is_empty() {
            return;
        }
        let mut resolver = Resolver::new(self.debug_network);
        resolver.set_dns_servers(servers);
        self.resolver = Arc::new(resolver);
    }

    /// 运行完整扫描流程，返回时两个sink均已关闭
    ///
    /// 逐词消费word_stream，把`<词>.<域名>`灌给worker池解析；
    /// total_tasks只用于进度展示。enable_retry开启时，
    /// 首轮以Failed收场的候选会进入第二阶段重试。
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        &self,
        domain: &str,
        wordlist_rx: mpsc::Receiver<String>,
        total_tasks: usize,
        results_tx: mpsc::Sender<ScanResult>,
        status_tx: mpsc::Sender<ScanStatus>,
        concurrency: usize,
        adaptive: bool,
        max_qps: u32,
        enable_retry: bool,
    ) {
        let scheduler = Scheduler::new(
            Arc::clone(&self.resolver),
            domain,
            wordlist_rx,
            total_tasks,
            results_tx,
            status_tx,
            concurrency,
            adaptive,
            max_qps,
        );
        scheduler.run(enable_retry).await;
    }
}
