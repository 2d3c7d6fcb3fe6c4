//! Transaction pool proxy.

use std::sync::Arc;

use ctxpool_core::{Channel, Reply, Request, RpcStatus, H256};

use super::UnaryClient;
use crate::completion::CompletionQueue;
use crate::reactor::Reactor;

pub struct TransactionPool {
    client: UnaryClient,
}

impl TransactionPool {
    pub fn new(reactor: &Reactor, channel: Arc<dyn Channel>, queue: Arc<CompletionQueue>) -> Self {
        Self {
            client: UnaryClient::new(reactor, channel, queue),
        }
    }

    /// Submit an encoded transaction. `Ok(false)` if the pool already has it.
    pub fn add_transaction<F>(&self, hash: H256, rlp: Vec<u8>, callback: F)
    where
        F: FnOnce(Result<bool, RpcStatus>) + Send + 'static,
    {
        self.client
            .call(Request::AddTransaction { hash, rlp }, Reply::into_bool, callback);
    }

    pub fn get_transaction<F>(&self, hash: H256, callback: F)
    where
        F: FnOnce(Result<Option<Vec<u8>>, RpcStatus>) + Send + 'static,
    {
        self.client
            .call(Request::GetTransaction { hash }, Reply::into_value, callback);
    }
}
