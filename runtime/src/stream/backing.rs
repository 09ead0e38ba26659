//! The two concrete BiStream shapes named in `spec.md` §4.4: `Pipe` (a
//! buffered producer draining an input channel into an output channel) and
//! `Callback` (four function references). Both implement the same
//! `BiStreamBacking` seam so [`super::BiStream`] doesn't need to know which
//! one it's holding.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use super::chunk::MessageChunk;

/// Fixed buffer size for Pipe input/output channels (`spec.md` §5).
pub const PIPE_BUFFER: usize = 16;

pub trait StreamSource: Send + Sync {
    fn recv(&self) -> BoxFuture<'_, Option<MessageChunk>>;
    fn close(&self);
}

pub trait BiStreamBacking: Send + Sync {
    fn recv(&self) -> BoxFuture<'_, Option<MessageChunk>>;
    fn send(&self, chunk: MessageChunk) -> BoxFuture<'_, Result<(), String>>;
    fn close_send(&self);
    fn close(&self);
}

/// Read-only Pipe source: wraps the receiving end of a bounded channel fed
/// by a producer task.
pub struct PipeSource {
    rx: AsyncMutex<mpsc::Receiver<MessageChunk>>,
}

impl PipeSource {
    pub fn new(rx: mpsc::Receiver<MessageChunk>) -> Self {
        Self { rx: AsyncMutex::new(rx) }
    }
}

impl StreamSource for PipeSource {
    fn recv(&self) -> BoxFuture<'_, Option<MessageChunk>> {
        Box::pin(async move { self.rx.lock().await.recv().await })
    }

    fn close(&self) {
        // Draining is left to the producer observing the cancellation
        // scope; closing here just stops accepting new reads, which the
        // owning Stream already enforces via its `closed` flag.
    }
}

/// Bidirectional Pipe: an input channel the script's `send` writes into and
/// an output channel a caller-supplied processor task writes into, both
/// capped at [`PIPE_BUFFER`] (`spec.md` §4.4, §5).
pub struct PipeBiStream {
    out_rx: AsyncMutex<mpsc::Receiver<MessageChunk>>,
    in_tx: Mutex<Option<mpsc::Sender<MessageChunk>>>,
}

impl PipeBiStream {
    /// Construct a Pipe BiStream and spawn `processor` to drain `in_rx` and
    /// write results into `out_tx`. `processor` is the caller-supplied
    /// transformer function named in `spec.md` §4.4.
    pub fn spawn<F, Fut>(processor: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<MessageChunk>, mpsc::Sender<MessageChunk>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (in_tx, in_rx) = mpsc::channel(PIPE_BUFFER);
        let (out_tx, out_rx) = mpsc::channel(PIPE_BUFFER);
        tokio::spawn(processor(in_rx, out_tx));
        Self {
            out_rx: AsyncMutex::new(out_rx),
            in_tx: Mutex::new(Some(in_tx)),
        }
    }
}

impl BiStreamBacking for PipeBiStream {
    fn recv(&self) -> BoxFuture<'_, Option<MessageChunk>> {
        Box::pin(async move { self.out_rx.lock().await.recv().await })
    }

    fn send(&self, chunk: MessageChunk) -> BoxFuture<'_, Result<(), String>> {
        // Clone the sender out under the sync lock, then await without
        // holding it — the lock never crosses an await point.
        let tx = self.in_tx.lock().clone();
        Box::pin(async move {
            match tx {
                Some(tx) => tx.send(chunk).await.map_err(|_| "stream closed".to_string()),
                None => Err("stream closed".to_string()),
            }
        })
    }

    fn close_send(&self) {
        *self.in_tx.lock() = None;
    }

    fn close(&self) {
        self.close_send();
    }
}

pub type SendFn = Box<dyn Fn(MessageChunk) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;
pub type CloseSendFn = Box<dyn Fn() + Send + Sync>;
pub type RecvFn = Box<dyn Fn() -> BoxFuture<'static, Option<MessageChunk>> + Send + Sync>;
pub type CloseFn = Box<dyn Fn() + Send + Sync>;

/// Callback BiStream: four function references supplied by the host
/// collaborator (`spec.md` §4.4). `send` on a closed callback stream returns
/// the sentinel error without invoking the callback.
pub struct CallbackBiStream {
    send_fn: SendFn,
    close_send_fn: CloseSendFn,
    recv_fn: RecvFn,
    close_fn: CloseFn,
    send_closed: std::sync::atomic::AtomicBool,
}

impl CallbackBiStream {
    pub fn new(send_fn: SendFn, close_send_fn: CloseSendFn, recv_fn: RecvFn, close_fn: CloseFn) -> Self {
        Self {
            send_fn,
            close_send_fn,
            recv_fn,
            close_fn,
            send_closed: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl BiStreamBacking for CallbackBiStream {
    fn recv(&self) -> BoxFuture<'_, Option<MessageChunk>> {
        (self.recv_fn)()
    }

    fn send(&self, chunk: MessageChunk) -> BoxFuture<'_, Result<(), String>> {
        if self.send_closed.load(std::sync::atomic::Ordering::Acquire) {
            return Box::pin(async { Err("stream closed".to_string()) });
        }
        (self.send_fn)(chunk)
    }

    fn close_send(&self) {
        if !self.send_closed.swap(true, std::sync::atomic::Ordering::AcqRel) {
            (self.close_send_fn)();
        }
    }

    fn close(&self) {
        self.close_send();
        (self.close_fn)();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::super::chunk::ChunkPart;
    use super::*;

    fn never_invoked_callback_bistream(invoked: Arc<AtomicBool>) -> CallbackBiStream {
        let send_invoked = invoked.clone();
        let send_fn: SendFn = Box::new(move |_chunk| {
            send_invoked.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });
        let close_send_fn: CloseSendFn = Box::new(|| {});
        let recv_fn: RecvFn = Box::new(|| Box::pin(async { None }));
        let close_fn: CloseFn = Box::new(|| {});
        CallbackBiStream::new(send_fn, close_send_fn, recv_fn, close_fn)
    }

    #[tokio::test]
    async fn callback_bistream_send_after_close_send_returns_sentinel_without_invoking_send_fn() {
        let invoked = Arc::new(AtomicBool::new(false));
        let backing = never_invoked_callback_bistream(invoked.clone());

        backing.close_send();
        let err = backing.send(MessageChunk::text("x")).await.unwrap_err();

        assert_eq!(err, "stream closed");
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn callback_bistream_close_is_idempotent_and_calls_close_send_once() {
        let close_send_calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls = close_send_calls.clone();
        let send_fn: SendFn = Box::new(|_chunk| Box::pin(async { Ok(()) }));
        let close_send_fn: CloseSendFn = Box::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        let recv_fn: RecvFn = Box::new(|| Box::pin(async { None }));
        let close_fn: CloseFn = Box::new(|| {});
        let backing = CallbackBiStream::new(send_fn, close_send_fn, recv_fn, close_fn);

        backing.close();
        backing.close();

        assert_eq!(close_send_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callback_bistream_round_trips_through_the_supplied_functions() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<MessageChunk>();
        let send_fn: SendFn = Box::new(move |chunk| {
            let tx = tx.clone();
            Box::pin(async move { tx.send(chunk).map_err(|_| "stream closed".to_string()) })
        });
        let close_send_fn: CloseSendFn = Box::new(|| {});
        let recv_fn: RecvFn = Box::new(move || {
            Box::pin(async { Some(MessageChunk::text("from-callback")) })
        });
        let close_fn: CloseFn = Box::new(|| {});
        let backing = CallbackBiStream::new(send_fn, close_send_fn, recv_fn, close_fn);

        backing.send(MessageChunk::text("to-callback")).await.unwrap();
        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.part, ChunkPart::Text("to-callback".to_string()));

        let received = backing.recv().await.unwrap();
        assert_eq!(received.part, ChunkPart::Text("from-callback".to_string()));
    }
}
