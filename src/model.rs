//! 扫描结果与进度快照的数据结构

use serde::Serialize;
use std::fmt;

/// 扫描阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
    /// 对完整字典的首轮扫描
    MainScan = 0,
    /// 对首轮失败候选的重试扫描
    RetryScan = 1,
    /// 扫描已结束
    Done = 2,
}

impl Phase {
    /// 阶段在状态快照中的文本名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::MainScan => "main_scan",
            Phase::RetryScan => "retry_scan",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个发现的子域名及其IP地址
///
/// 对象可放回结果池复用，放回时两个字段会被清空。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// 完整子域名
    #[serde(rename = "Subdomain")]
    pub subdomain: String,
    /// 第一条A记录的IPv4地址文本
    #[serde(rename = "IPAddress")]
    pub ip: String,
}

/// 扫描进度快照
///
/// 各字段来自相互独立的原子读取，彼此之间不保证一致，
/// 消费方应将其视为近似值。
#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    /// 当前阶段已处理的候选数
    pub scanned: usize,
    /// 当前阶段的候选总数
    pub total: usize,
    /// 当前阶段以失败收场的候选数
    pub failed: usize,
    /// 当前worker数量
    pub concurrency: usize,
    /// 全程累计发出的DNS交换次数
    pub total_requests: usize,
    /// 全程累计的重试交换次数
    pub total_retries: usize,
    /// 快照产生时的扫描阶段
    pub phase: Phase,
    /// 进入重试阶段的域名数量，仅在阶段切换快照中携带
    pub total_retrying: usize,
}
