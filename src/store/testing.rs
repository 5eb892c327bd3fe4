//! Test doubles wrapping [`InMemoryStore`] with failure injection and gating

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::watch;

use super::{DocumentStore, DocumentStream, InMemoryStore, Query};
use crate::types::{ChronasError, Result};

struct PutFault {
    collection: String,
    id: String,
    nth: usize,
    seen: usize,
}

/// In-memory store that can fail a chosen put, cut streams short,
/// or hold streams until released.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    put_fault: Arc<Mutex<Option<PutFault>>>,
    stream_items_before_abort: Arc<Mutex<Option<usize>>>,
    gate: Option<watch::Receiver<bool>>,
    streams_opened: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    /// Fail the `nth` (1-based) put to `collection/id`
    pub fn fail_nth_put(&self, collection: &str, id: &str, nth: usize) {
        *self.put_fault.lock().unwrap() = Some(PutFault {
            collection: collection.to_string(),
            id: id.to_string(),
            nth,
            seen: 0,
        });
    }

    /// Streams yield `items` documents and then an error
    pub fn abort_streams_after(&self, items: usize) {
        *self.stream_items_before_abort.lock().unwrap() = Some(items);
    }

    /// Streams stay closed until `true` is sent on the returned handle
    pub fn gated(inner: InMemoryStore) -> (Self, watch::Sender<bool>) {
        let (open_tx, open_rx) = watch::channel(false);
        let store = Self {
            inner,
            gate: Some(open_rx),
            ..Default::default()
        };
        (store, open_tx)
    }

    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.inner.get(collection, id).await
    }

    async fn put(&self, collection: &str, id: &str, body: Value) -> Result<()> {
        {
            let mut guard = self.put_fault.lock().unwrap();
            if let Some(fault) = guard.as_mut() {
                if fault.collection == collection && fault.id == id {
                    fault.seen += 1;
                    if fault.seen == fault.nth {
                        return Err(ChronasError::Database(format!(
                            "injected put failure on {}/{}",
                            collection, id
                        )));
                    }
                }
            }
        }
        self.inner.put(collection, id, body).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.inner.delete(collection, id).await
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>> {
        self.inner.find(collection, query).await
    }

    async fn stream_ascending_by(&self, collection: &str, field: &str) -> Result<DocumentStream> {
        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            gate.wait_for(|open| *open)
                .await
                .map_err(|_| ChronasError::Internal("stream gate dropped".into()))?;
        }
        self.streams_opened.fetch_add(1, Ordering::SeqCst);

        let stream = self.inner.stream_ascending_by(collection, field).await?;
        let limit = *self.stream_items_before_abort.lock().unwrap();
        match limit {
            None => Ok(stream),
            Some(n) => {
                let failure = futures::stream::once(async {
                    Err(ChronasError::Database("cursor closed by server".into()))
                });
                Ok(Box::pin(stream.take(n).chain(failure)))
            }
        }
    }
}
