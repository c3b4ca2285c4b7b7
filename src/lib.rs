//! # rsubscan
//!
//! 高吞吐量的子域名枚举引擎库。
//!
//! ## 特性
//!
//! - 🚀 **高并发**: 基于tokio的大规模worker池，支持上千并发DNS查询
//! - 🧠 **自适应调度**: 按窗口重试率自动伸缩worker数量，失败候选两阶段重试
//! - 🎯 **分层解析**: 两级DNS服务器池加层内随机挑选，分散单点压力
//! - 📊 **流式反馈**: 发现与进度通过调用方提供的通道实时推送
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use rsubscan::Scanner;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (word_tx, word_rx) = mpsc::channel(1024);
//!     let (result_tx, mut result_rx) = mpsc::channel(1024);
//!     let (status_tx, mut status_rx) = mpsc::channel::<rsubscan::model::ScanStatus>(64);
//!
//!     tokio::spawn(async move {
//!         for word in ["www", "mail", "dev"] {
//!             let _ = word_tx.send(word.to_string()).await;
//!         }
//!     });
//!     tokio::spawn(async move {
//!         while let Some(status) = status_rx.recv().await {
//!             println!("进度: {}/{} 阶段: {}", status.scanned, status.total, status.phase);
//!         }
//!     });
//!
//!     let scanner = Scanner::new(false);
//!     let engine = tokio::spawn(async move {
//!         scanner
//!             .start("example.com", word_rx, 3, result_tx, status_tx, 0, true, 0, true)
//!             .await;
//!     });
//!
//!     while let Some(result) = result_rx.recv().await {
//!         println!("{} -> {}", result.subdomain, result.ip);
//!         rsubscan::pool::put_scan_result(result);
//!     }
//!     let _ = engine.await;
//! }
//! ```

#![warn(missing_docs)]

pub mod limiter;
pub mod model;
pub mod pool;
pub mod resolver;
pub mod scanner;

mod monitor;
mod scheduler;
mod state;

pub use limiter::QpsLimiter;
pub use model::{Phase, ScanResult, ScanStatus};
pub use pool::{get_scan_result, put_scan_result};
pub use resolver::{DomainResolver, Resolution, ResolveError, ResolveOutcome, Resolver};
pub use scanner::Scanner;
