//! 分层重试的DNS解析
//!
//! 每个候选域名最多进行6次交换：前3次在一级服务器池内随机挑选，
//! 后3次落到二级池。传输层错误按间隔重试，协议上的否定答复立即定性，
//! 两类结局由上层分别处理。

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};
use trust_dns_resolver::proto::error::ProtoError;
use trust_dns_resolver::proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use trust_dns_resolver::proto::rr::{Name, RData, RecordType};

/// 最多尝试次数（1次初始 + 5次重试）
const MAX_ATTEMPTS: usize = 6;
/// 传输失败后的重试间隔
const RETRY_DELAY: Duration = Duration::from_millis(500);
/// 单次DNS交换的超时时间
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// 一级DNS服务器，第1~3次尝试使用
const DEFAULT_TIER1: &[&str] = &[
    "8.8.8.8:53",
    "8.8.4.4:53",
    "1.1.1.1:53",
    "1.0.0.1:53",
    "114.114.114.114:53",
    "114.114.115.115:53",
    "223.5.5.5:53",
];

/// 二级DNS服务器，第4~6次尝试使用
const DEFAULT_TIER2: &[&str] = &[
    "119.29.29.29:53",
    "119.28.28.28:53",
    "223.6.6.6:53",
    "9.9.9.9:53",
    "149.112.112.112:53",
];

/// 单次域名解析的结局分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// 应答中至少有一条A记录
    Success(Ipv4Addr),
    /// 服务器给出确定的否定答复（非成功rcode，或成功rcode但没有A记录）
    NotFound,
    /// 所有尝试都以网络层错误收场，候选可进入重试阶段
    Failed,
}

/// 一次resolve调用的完整结果
#[derive(Debug)]
pub struct Resolution {
    /// 结局分类
    pub outcome: ResolveOutcome,
    /// 消耗的尝试轮数，范围[1, 6]
    pub attempts: usize,
    /// 最后一次错误（如果有）
    pub error: Option<ResolveError>,
}

/// 解析过程中的错误
#[derive(Debug)]
pub enum ResolveError {
    /// 等待指定服务器的应答超时
    Timeout(String),
    /// 套接字读写错误
    Network(io::Error),
    /// 查询构造或应答解码失败
    Protocol(ProtoError),
    /// 应答ID与查询不一致
    IdMismatch,
    /// 服务器返回非成功rcode
    BadRcode(ResponseCode),
    /// 全部尝试耗尽
    Exhausted {
        /// 消耗的尝试次数
        attempts: usize,
        /// 最后一次传输层错误
        last: Option<Box<ResolveError>>,
    },
}

impl ResolveError {
    /// 是否属于可按间隔重试的传输层错误
    pub fn is_transport(&self) -> bool {
        matches!(self, ResolveError::Timeout(_) | ResolveError::Network(_))
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Timeout(server) => write!(f, "等待 {} 的应答超时", server),
            ResolveError::Network(e) => write!(f, "网络错误: {}", e),
            ResolveError::Protocol(e) => write!(f, "协议错误: {}", e),
            ResolveError::IdMismatch => write!(f, "应答ID与查询不一致"),
            ResolveError::BadRcode(code) => write!(f, "非成功rcode: {}", code),
            ResolveError::Exhausted { attempts, last } => match last {
                Some(e) => write!(f, "全部 {} 次尝试均失败，最后的网络错误: {}", attempts, e),
                None => write!(f, "全部 {} 次尝试均未能完成交换", attempts),
            },
        }
    }
}

impl std::error::Error for ResolveError {}

/// 域名解析后端
///
/// 引擎只通过该接口发起单个候选域名的查询，
/// 测试可以用内存实现替换真实的网络解析。
#[async_trait]
pub trait DomainResolver: Send + Sync {
    /// 对单个完整域名执行A记录解析
    async fn resolve(&self, domain: &str) -> Resolution;
}

/// 基于UDP的分层重试解析器
#[derive(Debug, Clone)]
pub struct Resolver {
    tier1_servers: Vec<String>,
    tier2_servers: Vec<String>,
    per_attempt_timeout: Duration,
    retry_delay: Duration,
    debug_network: bool,
}

impl Resolver {
    /// 创建使用默认两级DNS服务器的解析器
    pub fn new(debug_network: bool) -> Self {
        Resolver {
            tier1_servers: DEFAULT_TIER1.iter().map(|s| s.to_string()).collect(),
            tier2_servers: DEFAULT_TIER2.iter().map(|s| s.to_string()).collect(),
            per_attempt_timeout: EXCHANGE_TIMEOUT,
            retry_delay: RETRY_DELAY,
            debug_network,
        }
    }

    /// 设置自定义DNS服务器，裸主机自动补上":53"端口
    ///
    /// 非空列表会整体替换一级服务器并清空二级服务器。
    pub fn set_dns_servers(&mut self, servers: &[String]) {
        let mut valid_servers = Vec::new();
        for server in servers {
            if server.contains(':') {
                valid_servers.push(server.clone());
            } else {
                valid_servers.push(format!("{}:53", server));
            }
        }
        if !valid_servers.is_empty() {
            self.tier1_servers = valid_servers;
            self.tier2_servers = Vec::new();
        }
    }

    /// 对单个服务器完成一次带超时的DNS交换
    async fn exchange(&self, wire: &[u8], id: u16, server: &str) -> Result<Message, ResolveError> {
        match timeout(self.per_attempt_timeout, exchange_once(wire, id, server)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(server.to_string())),
        }
    }
}

#[async_trait]
impl DomainResolver for Resolver {
    async fn resolve(&self, domain: &str) -> Resolution {
        let (id, wire) = match build_query(domain) {
            Ok(query) => query,
            Err(e) => {
                return Resolution {
                    outcome: ResolveOutcome::Failed,
                    attempts: 1,
                    error: Some(ResolveError::Protocol(e)),
                }
            }
        };

        let mut used: HashSet<String> = HashSet::new();
        let mut last_err: Option<ResolveError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let pool = if attempt <= 3 {
                &self.tier1_servers
            } else {
                &self.tier2_servers
            };
            let server = match select_server(pool, &used) {
                Some(server) => server,
                // 本层未用过的服务器已耗尽，该次尝试空耗
                None => continue,
            };
            used.insert(server.clone());

            match self.exchange(&wire, id, &server).await {
                Ok(reply) => {
                    if reply.response_code() != ResponseCode::NoError {
                        return Resolution {
                            outcome: ResolveOutcome::NotFound,
                            attempts: attempt,
                            error: Some(ResolveError::BadRcode(reply.response_code())),
                        };
                    }
                    for record in reply.answers() {
                        if let Some(RData::A(addr)) = record.data() {
                            return Resolution {
                                outcome: ResolveOutcome::Success(addr.0),
                                attempts: attempt,
                                error: None,
                            };
                        }
                    }
                    return Resolution {
                        outcome: ResolveOutcome::NotFound,
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(err) if err.is_transport() => {
                    if self.debug_network {
                        debug!(
                            "{} 经由 {} 第 {}/{} 次尝试遇到网络错误: {}，稍后重试",
                            domain, server, attempt, MAX_ATTEMPTS, err
                        );
                    }
                    last_err = Some(err);
                    sleep(self.retry_delay).await;
                }
                Err(err) => {
                    return Resolution {
                        outcome: ResolveOutcome::Failed,
                        attempts: attempt,
                        error: Some(err),
                    };
                }
            }
        }

        Resolution {
            outcome: ResolveOutcome::Failed,
            attempts: MAX_ATTEMPTS,
            error: Some(ResolveError::Exhausted {
                attempts: MAX_ATTEMPTS,
                last: last_err.map(Box::new),
            }),
        }
    }
}

/// 构造一条期望递归的A记录查询，返回消息ID与线上字节
fn build_query(domain: &str) -> Result<(u16, Vec<u8>), ProtoError> {
    let mut name = Name::from_utf8(domain)?;
    if !name.is_fqdn() {
        name.set_fqdn(true);
    }

    let id: u16 = rand::thread_rng().gen();
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, RecordType::A));

    let wire = message.to_vec()?;
    Ok((id, wire))
}

/// 在尚未用过的服务器里均匀随机挑一个
fn select_server(servers: &[String], used: &HashSet<String>) -> Option<String> {
    let available: Vec<&String> = servers
        .iter()
        .filter(|server| !used.contains(server.as_str()))
        .collect();
    if available.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..available.len());
    Some(available[index].clone())
}

/// 绑定临时UDP套接字完成一次发送与接收
async fn exchange_once(wire: &[u8], id: u16, server: &str) -> Result<Message, ResolveError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(ResolveError::Network)?;
    socket.connect(server).await.map_err(ResolveError::Network)?;
    socket.send(wire).await.map_err(ResolveError::Network)?;

    let mut buf = [0u8; 4096];
    let len = socket.recv(&mut buf).await.map_err(ResolveError::Network)?;
    let reply = Message::from_vec(&buf[..len]).map_err(ResolveError::Protocol)?;
    if reply.id() != id {
        return Err(ResolveError::IdMismatch);
    }
    Ok(reply)
}
