//! 可复用的结果对象池
//!
//! 命中高的扫描里Success路径很热，发现对象在"取出-发送-消费-放回"
//! 之间循环，避免每次发现都重新分配。

use crossbeam_queue::ArrayQueue;
use lazy_static::lazy_static;

use crate::model::ScanResult;

/// 池容量上限，放不下的对象交还分配器
const POOL_CAPACITY: usize = 4096;

lazy_static! {
    /// 进程级的ScanResult空闲链，发现高命中时减少分配
    static ref SCAN_RESULT_POOL: ArrayQueue<ScanResult> = ArrayQueue::new(POOL_CAPACITY);
}

/// 从池中取出一个ScanResult，池空时新建
///
/// 取出的对象保证两个字段为空字符串。
pub fn get_scan_result() -> ScanResult {
    SCAN_RESULT_POOL.pop().unwrap_or_default()
}

/// 清空字段后将ScanResult放回池中复用
pub fn put_scan_result(mut result: ScanResult) {
    result.subdomain.clear();
    result.ip.clear();
    let _ = SCAN_RESULT_POOL.push(result);
}
