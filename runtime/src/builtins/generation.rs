//! `generate(prompt)` and `transformer()`: the stream-layer entry points
//! named in `spec.md` §6's `__builtin` table. The actual model/backend is a
//! host collaborator out of scope for this crate (`spec.md` §1); this module
//! supplies the trait seams plus a deterministic default implementation of
//! each so the stream layer is exercisable end to end without one.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::cancel::Scope;
use crate::stream::backing::{CallbackBiStream, CloseFn, CloseSendFn, PipeBiStream, PipeSource, RecvFn, SendFn, PIPE_BUFFER};
use crate::stream::chunk::MessageChunk;
use crate::stream::{BiStream, Stream, StreamRegistry};
use crate::vm::marshal::Value;

/// The Callback BiStream shape named alongside Pipe in `spec.md` §4.4: a
/// host collaborator supplies the four primitive operations directly
/// (rather than a [`Transformer`] driving a buffered Pipe), e.g. to bridge a
/// stream onto a connection it doesn't own a buffering task for.
pub trait CallbackHost: Send + Sync {
    fn send(&self, chunk: MessageChunk) -> BoxFuture<'static, Result<(), String>>;
    fn close_send(&self);
    fn recv(&self) -> BoxFuture<'static, Option<MessageChunk>>;
    fn close(&self);
}

/// Builds a BiStream backed directly by `host`'s callbacks instead of a
/// Pipe's buffering task.
pub fn callback_transformer(streams: &StreamRegistry, scope: &Scope, host: Arc<dyn CallbackHost>) -> Arc<BiStream> {
    let send_host = host.clone();
    let send_fn: SendFn = Box::new(move |chunk| send_host.send(chunk));
    let close_send_host = host.clone();
    let close_send_fn: CloseSendFn = Box::new(move || close_send_host.close_send());
    let recv_host = host.clone();
    let recv_fn: RecvFn = Box::new(move || recv_host.recv());
    let close_host = host;
    let close_fn: CloseFn = Box::new(move || close_host.close());

    let backing = Arc::new(CallbackBiStream::new(send_fn, close_send_fn, recv_fn, close_fn));
    streams.new_bistream(scope, backing)
}

/// Drives a unidirectional `Stream`: produces chunks from a prompt.
pub trait Generator: Send + Sync {
    fn produce(&self, prompt: Value, tx: mpsc::Sender<MessageChunk>) -> BoxFuture<'static, ()>;
}

/// Drives a `BiStream`: consumes input chunks, produces output chunks.
pub trait Transformer: Send + Sync {
    fn process(&self, rx: mpsc::Receiver<MessageChunk>, tx: mpsc::Sender<MessageChunk>) -> BoxFuture<'static, ()>;
}

pub fn generate(streams: &StreamRegistry, scope: &Scope, generator: Arc<dyn Generator>, prompt: Value) -> Arc<Stream> {
    let (tx, rx) = mpsc::channel(PIPE_BUFFER);
    let source = Arc::new(PipeSource::new(rx));
    let stream = streams.new_stream(scope, source);
    tokio::spawn(async move { generator.produce(prompt, tx).await });
    stream
}

pub fn transformer(streams: &StreamRegistry, scope: &Scope, transformer: Arc<dyn Transformer>) -> Arc<BiStream> {
    let backing = Arc::new(PipeBiStream::spawn(move |rx, tx| async move {
        transformer.process(rx, tx).await;
    }));
    streams.new_bistream(scope, backing)
}

/// Emits the prompt back as a single body chunk bracketed by `is_bos`/
/// `is_eos` markers — enough structure to exercise framing in tests without
/// a real model backend.
pub struct EchoGenerator;

impl Generator for EchoGenerator {
    fn produce(&self, prompt: Value, tx: mpsc::Sender<MessageChunk>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let text = prompt.as_str().map(str::to_string).unwrap_or_default();
            let _ = tx.send(MessageChunk { is_bos: true, ..MessageChunk::text("") }).await;
            let _ = tx.send(MessageChunk::text(text)).await;
            let _ = tx.send(MessageChunk { is_eos: true, ..MessageChunk::text("") }).await;
        })
    }
}

/// Forwards every input chunk to the output side unchanged.
pub struct IdentityTransformer;

impl Transformer for IdentityTransformer {
    fn process(&self, mut rx: mpsc::Receiver<MessageChunk>, tx: mpsc::Sender<MessageChunk>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            while let Some(chunk) = rx.recv().await {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_generator_brackets_the_prompt_with_bos_and_eos() {
        let streams = StreamRegistry::new();
        let root = Scope::root();
        let stream = generate(&streams, &root, Arc::new(EchoGenerator), Value::Str("hi".to_string()));

        let first = stream.recv().await.unwrap();
        assert!(first.is_bos);
        let body = stream.recv().await.unwrap();
        assert_eq!(body.part, crate::stream::chunk::ChunkPart::Text("hi".to_string()));
        let last = stream.recv().await.unwrap();
        assert!(last.is_eos);
        assert!(stream.recv().await.is_none());
    }

    struct EchoCallbackHost;

    impl CallbackHost for EchoCallbackHost {
        fn send(&self, _chunk: MessageChunk) -> BoxFuture<'static, Result<(), String>> {
            Box::pin(async { Ok(()) })
        }
        fn close_send(&self) {}
        fn recv(&self) -> BoxFuture<'static, Option<MessageChunk>> {
            Box::pin(async { Some(MessageChunk::text("from-host")) })
        }
        fn close(&self) {}
    }

    #[tokio::test]
    async fn callback_transformer_is_reachable_and_backed_by_the_callback_shape() {
        let streams = StreamRegistry::new();
        let root = Scope::root();
        let bi = callback_transformer(&streams, &root, Arc::new(EchoCallbackHost));

        bi.send(MessageChunk::text("hi")).await.unwrap();
        let received = bi.recv().await.unwrap();
        assert_eq!(received.part, crate::stream::chunk::ChunkPart::Text("from-host".to_string()));

        bi.close();
        let err = bi.send(MessageChunk::text("after-close")).await.unwrap_err();
        assert_eq!(err, "stream closed");
    }

    #[tokio::test]
    async fn identity_transformer_forwards_every_chunk() {
        let streams = StreamRegistry::new();
        let root = Scope::root();
        let bi = transformer(&streams, &root, Arc::new(IdentityTransformer));

        bi.send(MessageChunk::text("a")).await.unwrap();
        bi.send(MessageChunk::text("b")).await.unwrap();
        bi.close_send();

        assert_eq!(bi.recv().await.unwrap().part, crate::stream::chunk::ChunkPart::Text("a".to_string()));
        assert_eq!(bi.recv().await.unwrap().part, crate::stream::chunk::ChunkPart::Text("b".to_string()));
        assert!(bi.recv().await.is_none());
    }
}
