//! Unary calls issued by the remote service proxies.
//!
//! One closed enumeration per direction. A `Channel` carries a `Request`
//! to the backend and finishes the call with the matching `Reply`.

use crate::error::{RpcStatus, StatusCode};
use crate::types::{Address, Block, H256, WorkPackage};

/// Remote service a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Key-value database reads.
    Kv,
    /// Node/backend status.
    EthBackend,
    /// Transaction submission.
    TxPool,
    /// Mining control.
    Mining,
}

/// A unary request to the execution backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    // Kv
    KvGet { table: String, key: Vec<u8> },
    BlockByHash { hash: H256 },

    // EthBackend
    Etherbase,
    ProtocolVersion,
    NetVersion,
    ClientVersion,

    // TxPool
    AddTransaction { hash: H256, rlp: Vec<u8> },
    GetTransaction { hash: H256 },

    // Mining
    GetWork,
    SubmitWork { nonce: u64, pow_hash: H256, digest: H256 },
    SubmitHashRate { rate: u64, id: H256 },
    GetMining,
}

impl Request {
    /// The service that serves this request.
    pub fn service(&self) -> Service {
        match self {
            Request::KvGet { .. } | Request::BlockByHash { .. } => Service::Kv,
            Request::Etherbase
            | Request::ProtocolVersion
            | Request::NetVersion
            | Request::ClientVersion => Service::EthBackend,
            Request::AddTransaction { .. } | Request::GetTransaction { .. } => Service::TxPool,
            Request::GetWork
            | Request::SubmitWork { .. }
            | Request::SubmitHashRate { .. }
            | Request::GetMining => Service::Mining,
        }
    }

    /// Method name, used in logs and error messages.
    pub fn method(&self) -> &'static str {
        match self {
            Request::KvGet { .. } => "Kv/Get",
            Request::BlockByHash { .. } => "Kv/BlockByHash",
            Request::Etherbase => "EthBackend/Etherbase",
            Request::ProtocolVersion => "EthBackend/ProtocolVersion",
            Request::NetVersion => "EthBackend/NetVersion",
            Request::ClientVersion => "EthBackend/ClientVersion",
            Request::AddTransaction { .. } => "TxPool/Add",
            Request::GetTransaction { .. } => "TxPool/Transactions",
            Request::GetWork => "Mining/GetWork",
            Request::SubmitWork { .. } => "Mining/SubmitWork",
            Request::SubmitHashRate { .. } => "Mining/SubmitHashRate",
            Request::GetMining => "Mining/Mining",
        }
    }
}

/// A successful reply from the execution backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Value(Option<Vec<u8>>),
    Block(Option<Block>),
    Address(Address),
    Version(u64),
    Text(String),
    Bool(bool),
    Work(WorkPackage),
}

impl Reply {
    fn kind(&self) -> &'static str {
        match self {
            Reply::Value(_) => "value",
            Reply::Block(_) => "block",
            Reply::Address(_) => "address",
            Reply::Version(_) => "version",
            Reply::Text(_) => "text",
            Reply::Bool(_) => "bool",
            Reply::Work(_) => "work",
        }
    }

    fn unexpected(self, wanted: &str) -> RpcStatus {
        RpcStatus::new(
            StatusCode::Internal,
            format!("unexpected {} reply, wanted {}", self.kind(), wanted),
        )
    }

    pub fn into_value(self) -> Result<Option<Vec<u8>>, RpcStatus> {
        match self {
            Reply::Value(v) => Ok(v),
            other => Err(other.unexpected("value")),
        }
    }

    pub fn into_block(self) -> Result<Option<Block>, RpcStatus> {
        match self {
            Reply::Block(b) => Ok(b),
            other => Err(other.unexpected("block")),
        }
    }

    pub fn into_address(self) -> Result<Address, RpcStatus> {
        match self {
            Reply::Address(a) => Ok(a),
            other => Err(other.unexpected("address")),
        }
    }

    pub fn into_version(self) -> Result<u64, RpcStatus> {
        match self {
            Reply::Version(v) => Ok(v),
            other => Err(other.unexpected("version")),
        }
    }

    pub fn into_text(self) -> Result<String, RpcStatus> {
        match self {
            Reply::Text(t) => Ok(t),
            other => Err(other.unexpected("text")),
        }
    }

    pub fn into_bool(self) -> Result<bool, RpcStatus> {
        match self {
            Reply::Bool(b) => Ok(b),
            other => Err(other.unexpected("bool")),
        }
    }

    pub fn into_work(self) -> Result<WorkPackage, RpcStatus> {
        match self {
            Reply::Work(w) => Ok(w),
            other => Err(other.unexpected("work")),
        }
    }
}
