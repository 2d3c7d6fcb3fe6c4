//! Node metadata proxy.

use std::sync::Arc;

use ctxpool_core::{Address, Channel, Reply, Request, RpcStatus};

use super::UnaryClient;
use crate::completion::CompletionQueue;
use crate::reactor::Reactor;

pub struct RemoteBackEnd {
    client: UnaryClient,
}

impl RemoteBackEnd {
    pub fn new(reactor: &Reactor, channel: Arc<dyn Channel>, queue: Arc<CompletionQueue>) -> Self {
        Self {
            client: UnaryClient::new(reactor, channel, queue),
        }
    }

    pub fn etherbase<F>(&self, callback: F)
    where
        F: FnOnce(Result<Address, RpcStatus>) + Send + 'static,
    {
        self.client.call(Request::Etherbase, Reply::into_address, callback);
    }

    pub fn protocol_version<F>(&self, callback: F)
    where
        F: FnOnce(Result<u64, RpcStatus>) + Send + 'static,
    {
        self.client
            .call(Request::ProtocolVersion, Reply::into_version, callback);
    }

    pub fn net_version<F>(&self, callback: F)
    where
        F: FnOnce(Result<u64, RpcStatus>) + Send + 'static,
    {
        self.client.call(Request::NetVersion, Reply::into_version, callback);
    }

    pub fn client_version<F>(&self, callback: F)
    where
        F: FnOnce(Result<String, RpcStatus>) + Send + 'static,
    {
        self.client.call(Request::ClientVersion, Reply::into_text, callback);
    }
}
