//! Key-value database proxy.

use std::sync::Arc;

use ctxpool_core::{Block, Channel, Reply, Request, RpcStatus, H256};

use super::UnaryClient;
use crate::completion::CompletionQueue;
use crate::reactor::Reactor;

/// Read access to the backend's tables and blocks.
pub struct RemoteDatabase {
    client: UnaryClient,
}

impl RemoteDatabase {
    pub fn new(reactor: &Reactor, channel: Arc<dyn Channel>, queue: Arc<CompletionQueue>) -> Self {
        Self {
            client: UnaryClient::new(reactor, channel, queue),
        }
    }

    /// Value stored under `key` in `table`, `None` if absent.
    pub fn get<F>(&self, table: &str, key: &[u8], callback: F)
    where
        F: FnOnce(Result<Option<Vec<u8>>, RpcStatus>) + Send + 'static,
    {
        let request = Request::KvGet {
            table: table.to_string(),
            key: key.to_vec(),
        };
        self.client.call(request, Reply::into_value, callback);
    }

    pub fn block_by_hash<F>(&self, hash: H256, callback: F)
    where
        F: FnOnce(Result<Option<Block>, RpcStatus>) + Send + 'static,
    {
        self.client
            .call(Request::BlockByHash { hash }, Reply::into_block, callback);
    }

    pub fn target(&self) -> &str {
        self.client.target()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::remote::testing::{capture, Harness};

    #[test]
    fn test_get_and_block_by_hash() {
        let backend = MemoryBackend::default();
        backend.put("CanonicalHeader", &[0, 0, 0, 9], vec![0xab; 32]);
        backend.put_block(Block {
            number: 9,
            hash: H256::repeat_byte(0xab),
            body: vec![1, 2, 3],
        });
        let h = Harness::new(backend);
        let db = RemoteDatabase::new(&h.reactor, h.channel.clone(), h.queue.clone());

        let (value, cb) = capture();
        db.get("CanonicalHeader", &[0, 0, 0, 9], cb);
        let (missing, cb) = capture();
        db.get("CanonicalHeader", &[0, 0, 0, 10], cb);
        let (block, cb) = capture();
        db.block_by_hash(H256::repeat_byte(0xab), cb);
        h.pump();

        assert_eq!(value.lock().unwrap().take(), Some(Ok(Some(vec![0xab; 32]))));
        assert_eq!(missing.lock().unwrap().take(), Some(Ok(None)));
        let block = block.lock().unwrap().take().unwrap().unwrap().unwrap();
        assert_eq!(block.number, 9);
        assert_eq!(block.body, vec![1, 2, 3]);
    }
}
