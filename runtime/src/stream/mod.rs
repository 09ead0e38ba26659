//! Stream (read-only) and BiStream (bidirectional) registries.
//!
//! Each handle carries its own cancellation scope (`spec.md` §3), built as a
//! child of whatever scope was active when the handle was created — usually
//! the Runtime's root scope (`crate::cancel::Scope`).

pub mod backing;
pub mod chunk;

pub use chunk::{ChunkPart, MessageChunk};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::cancel::Scope;
use backing::{BiStreamBacking, StreamSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

/// Unidirectional stream: `recv` and `close`.
pub struct Stream {
    id: StreamId,
    scope: Scope,
    source: Arc<dyn StreamSource>,
    closed: AtomicBool,
}

impl Stream {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Resolves `(chunk, nil)` normally; end-of-stream is `(nil, nil)`
    /// (`spec.md` §3).
    pub async fn recv(&self) -> Option<MessageChunk> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.source.recv().await
    }

    /// Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.scope.cancel();
            self.source.close();
        }
    }
}

/// Bidirectional stream: `recv`, `send`, `close`, `close_send`.
pub struct BiStream {
    id: StreamId,
    scope: Scope,
    backing: Arc<dyn BiStreamBacking>,
    closed: AtomicBool,
    send_closed: AtomicBool,
}

impl BiStream {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub async fn recv(&self) -> Option<MessageChunk> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.backing.recv().await
    }

    /// Sends on a closed BiStream resolve with `"stream closed"`.
    pub async fn send(&self, chunk: MessageChunk) -> Result<(), String> {
        if self.closed.load(Ordering::Acquire) || self.send_closed.load(Ordering::Acquire) {
            return Err("stream closed".to_string());
        }
        self.backing.send(chunk).await
    }

    pub fn close_send(&self) {
        if !self.send_closed.swap(true, Ordering::AcqRel) {
            self.backing.close_send();
        }
    }

    pub fn close(&self) {
        self.close_send();
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.scope.cancel();
            self.backing.close();
        }
    }
}

/// Owns every live Stream/BiStream for one Runtime.
pub struct StreamRegistry {
    next_id: AtomicU64,
    streams: DashMap<StreamId, Arc<Stream>>,
    bistreams: DashMap<StreamId, Arc<BiStream>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            streams: DashMap::new(),
            bistreams: DashMap::new(),
        }
    }

    fn alloc_id(&self) -> StreamId {
        StreamId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn new_stream(&self, parent: &Scope, source: Arc<dyn StreamSource>) -> Arc<Stream> {
        let id = self.alloc_id();
        let stream = Arc::new(Stream { id, scope: parent.child(), source, closed: AtomicBool::new(false) });
        self.streams.insert(id, stream.clone());
        stream
    }

    pub fn new_bistream(&self, parent: &Scope, backing: Arc<dyn BiStreamBacking>) -> Arc<BiStream> {
        let id = self.alloc_id();
        let bistream = Arc::new(BiStream {
            id,
            scope: parent.child(),
            backing,
            closed: AtomicBool::new(false),
            send_closed: AtomicBool::new(false),
        });
        self.bistreams.insert(id, bistream.clone());
        bistream
    }

    /// Called from the script-visible `close` handle once the underlying
    /// source/backing has been torn down, so the registry doesn't hold the
    /// Runtime's last `Arc` for the rest of its lifetime.
    pub fn remove_stream(&self, id: StreamId) {
        self.streams.remove(&id);
    }

    pub fn remove_bistream(&self, id: StreamId) {
        self.bistreams.remove(&id);
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backing::PipeBiStream;
    use tokio::sync::mpsc;

    struct ChannelSource(tokio::sync::Mutex<mpsc::Receiver<MessageChunk>>);
    impl StreamSource for ChannelSource {
        fn recv(&self) -> futures::future::BoxFuture<'_, Option<MessageChunk>> {
            Box::pin(async move { self.0.lock().await.recv().await })
        }
        fn close(&self) {}
    }

    #[tokio::test]
    async fn stream_recv_reports_eos_as_none() {
        let (tx, rx) = mpsc::channel(4);
        drop(tx);
        let source = Arc::new(ChannelSource(tokio::sync::Mutex::new(rx)));
        let registry = StreamRegistry::new();
        let root = Scope::root();
        let stream = registry.new_stream(&root, source);
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn closing_bistream_cancels_its_scope_and_blocks_send() {
        let bistream_backing = Arc::new(PipeBiStream::spawn(|mut rx, _tx| async move {
            while rx.recv().await.is_some() {}
        }));
        let registry = StreamRegistry::new();
        let root = Scope::root();
        let bi = registry.new_bistream(&root, bistream_backing);
        bi.close();
        assert!(bi.scope().is_cancelled());
        let err = bi.send(MessageChunk::text("x")).await.unwrap_err();
        assert_eq!(err, "stream closed");
    }

    #[tokio::test]
    async fn remove_stream_and_remove_bistream_drop_the_registry_entry() {
        let (tx, rx) = mpsc::channel(4);
        drop(tx);
        let source = Arc::new(ChannelSource(tokio::sync::Mutex::new(rx)));
        let registry = StreamRegistry::new();
        let root = Scope::root();
        let stream = registry.new_stream(&root, source);
        assert_eq!(registry.streams.len(), 1);
        registry.remove_stream(stream.id());
        assert_eq!(registry.streams.len(), 0);

        let bistream_backing = Arc::new(PipeBiStream::spawn(|mut rx, _tx| async move {
            while rx.recv().await.is_some() {}
        }));
        let bi = registry.new_bistream(&root, bistream_backing);
        assert_eq!(registry.bistreams.len(), 1);
        registry.remove_bistream(bi.id());
        assert_eq!(registry.bistreams.len(), 0);
    }

    #[tokio::test]
    async fn closing_twice_is_a_safe_no_op() {
        let bistream_backing = Arc::new(PipeBiStream::spawn(|mut rx, _tx| async move {
            while rx.recv().await.is_some() {}
        }));
        let registry = StreamRegistry::new();
        let root = Scope::root();
        let bi = registry.new_bistream(&root, bistream_backing);
        bi.close();
        bi.close();
    }
}
