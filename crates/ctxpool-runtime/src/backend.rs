//! In-memory execution backend.
//!
//! Serves all four remote services from concurrent maps. Stands in for
//! the execution engine in the daemon and in tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use ctxpool_core::{
    Address, BackendService, Block, Reply, Request, RpcStatus, StatusCode, WorkPackage, H256,
};
use dashmap::DashMap;
use tracing::trace;

pub const DEFAULT_PROTOCOL_VERSION: u64 = 66;
pub const DEFAULT_NET_VERSION: u64 = 1;

/// Node metadata reported by the backend service.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub etherbase: Option<Address>,
    pub protocol_version: u64,
    pub net_version: u64,
    pub client_version: String,
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            etherbase: None,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            net_version: DEFAULT_NET_VERSION,
            client_version: concat!("ctxpool/v", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

pub struct MemoryBackend {
    info: NodeInfo,
    /// (table, key) -> value
    kv: DashMap<(String, Vec<u8>), Vec<u8>>,
    blocks: DashMap<H256, Block>,
    /// tx hash -> encoded transaction
    transactions: DashMap<H256, Vec<u8>>,
    work: Mutex<Option<WorkPackage>>,
    /// pow hash -> (nonce, digest) of accepted solutions
    solutions: DashMap<H256, (u64, H256)>,
    /// miner id -> reported hash rate
    hash_rates: DashMap<H256, u64>,
    mining: AtomicBool,
    calls: AtomicU64,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("kv", &self.kv.len())
            .field("blocks", &self.blocks.len())
            .field("transactions", &self.transactions.len())
            .field("calls", &self.calls())
            .finish()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(NodeInfo::default())
    }
}

impl MemoryBackend {
    pub fn new(info: NodeInfo) -> Self {
        Self {
            info,
            kv: DashMap::new(),
            blocks: DashMap::new(),
            transactions: DashMap::new(),
            work: Mutex::new(None),
            solutions: DashMap::new(),
            hash_rates: DashMap::new(),
            mining: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    pub fn put(&self, table: &str, key: &[u8], value: Vec<u8>) {
        self.kv.insert((table.to_string(), key.to_vec()), value);
    }

    pub fn put_block(&self, block: Block) {
        self.blocks.insert(block.hash, block);
    }

    /// Publish new mining work and mark the node as mining.
    pub fn set_work(&self, work: WorkPackage) {
        *self.work.lock().unwrap_or_else(PoisonError::into_inner) = Some(work);
        self.mining.store(true, Ordering::Relaxed);
    }

    pub fn set_mining(&self, mining: bool) {
        self.mining.store(mining, Ordering::Relaxed);
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn total_hash_rate(&self) -> u64 {
        self.hash_rates.iter().map(|entry| *entry.value()).sum()
    }

    pub fn solution(&self, pow_hash: &H256) -> Option<(u64, H256)> {
        self.solutions.get(pow_hash).map(|entry| *entry.value())
    }

    /// Requests handled so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn current_work(&self) -> Option<WorkPackage> {
        *self.work.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BackendService for MemoryBackend {
    fn handle(&self, request: Request) -> Result<Reply, RpcStatus> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        trace!(method = request.method(), "handle");

        match request {
            Request::KvGet { table, key } => {
                Ok(Reply::Value(self.kv.get(&(table, key)).map(|v| v.clone())))
            }
            Request::BlockByHash { hash } => {
                Ok(Reply::Block(self.blocks.get(&hash).map(|b| b.clone())))
            }

            Request::Etherbase => self
                .info
                .etherbase
                .map(Reply::Address)
                .ok_or_else(|| RpcStatus::unavailable("etherbase must be explicitly specified")),
            Request::ProtocolVersion => Ok(Reply::Version(self.info.protocol_version)),
            Request::NetVersion => Ok(Reply::Version(self.info.net_version)),
            Request::ClientVersion => Ok(Reply::Text(self.info.client_version.clone())),

            Request::AddTransaction { hash, rlp } => {
                if rlp.is_empty() {
                    return Err(RpcStatus::new(
                        StatusCode::InvalidArgument,
                        "empty transaction payload",
                    ));
                }
                let fresh = !self.transactions.contains_key(&hash);
                if fresh {
                    self.transactions.insert(hash, rlp);
                }
                Ok(Reply::Bool(fresh))
            }
            Request::GetTransaction { hash } => Ok(Reply::Value(
                self.transactions.get(&hash).map(|tx| tx.clone()),
            )),

            Request::GetWork => self
                .current_work()
                .map(Reply::Work)
                .ok_or_else(|| RpcStatus::unavailable("no mining work available")),
            Request::SubmitWork {
                nonce,
                pow_hash,
                digest,
            } => {
                let accepted = self
                    .current_work()
                    .is_some_and(|work| work.header_hash == pow_hash);
                if accepted {
                    self.solutions.insert(pow_hash, (nonce, digest));
                }
                Ok(Reply::Bool(accepted))
            }
            Request::SubmitHashRate { rate, id } => {
                self.hash_rates.insert(id, rate);
                Ok(Reply::Bool(true))
            }
            Request::GetMining => Ok(Reply::Bool(self.mining.load(Ordering::Relaxed))),
        }
    }
}
