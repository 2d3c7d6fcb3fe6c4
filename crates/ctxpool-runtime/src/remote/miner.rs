//! Mining proxy.

use std::sync::Arc;

use ctxpool_core::{Channel, Reply, Request, RpcStatus, WorkPackage, H256};

use super::UnaryClient;
use crate::completion::CompletionQueue;
use crate::reactor::Reactor;

pub struct Miner {
    client: UnaryClient,
}

impl Miner {
    pub fn new(reactor: &Reactor, channel: Arc<dyn Channel>, queue: Arc<CompletionQueue>) -> Self {
        Self {
            client: UnaryClient::new(reactor, channel, queue),
        }
    }

    pub fn get_work<F>(&self, callback: F)
    where
        F: FnOnce(Result<WorkPackage, RpcStatus>) + Send + 'static,
    {
        self.client.call(Request::GetWork, Reply::into_work, callback);
    }

    /// `Ok(true)` if the solution matches the current work.
    pub fn submit_work<F>(&self, nonce: u64, pow_hash: H256, digest: H256, callback: F)
    where
        F: FnOnce(Result<bool, RpcStatus>) + Send + 'static,
    {
        let request = Request::SubmitWork {
            nonce,
            pow_hash,
            digest,
        };
        self.client.call(request, Reply::into_bool, callback);
    }

    pub fn submit_hash_rate<F>(&self, rate: u64, id: H256, callback: F)
    where
        F: FnOnce(Result<bool, RpcStatus>) + Send + 'static,
    {
        self.client
            .call(Request::SubmitHashRate { rate, id }, Reply::into_bool, callback);
    }

    pub fn get_mining<F>(&self, callback: F)
    where
        F: FnOnce(Result<bool, RpcStatus>) + Send + 'static,
    {
        self.client.call(Request::GetMining, Reply::into_bool, callback);
    }
}
