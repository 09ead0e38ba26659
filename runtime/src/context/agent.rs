//! Agent context: two bounded channels, default capacities 1 in / 16 out
//! (`spec.md` §4.6).

use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::stream::MessageChunk;

pub const DEFAULT_IN_CAPACITY: usize = 1;
pub const DEFAULT_OUT_CAPACITY: usize = 16;

/// Script-facing side: `rt:recv()` / `rt:emit(chunk)`.
pub struct AgentContext {
    in_rx: AsyncMutex<mpsc::Receiver<MessageChunk>>,
    out_tx: Mutex<Option<mpsc::Sender<MessageChunk>>>,
}

impl AgentContext {
    /// Script side: `rt:recv()`. Blocks the script thread logically (the
    /// caller awaits this as an async primitive); `None` once the host has
    /// closed the input side.
    pub async fn recv(&self) -> Option<MessageChunk> {
        self.in_rx.lock().await.recv().await
    }

    /// Script side: `rt:emit(chunk)`. Fails with "agent closed" once the
    /// host has stopped iterating the output channel.
    pub async fn emit(&self, chunk: MessageChunk) -> Result<(), String> {
        let sender = self.out_tx.lock().clone();
        match sender {
            Some(tx) => tx.send(chunk).await.map_err(|_| "agent closed".to_string()),
            None => Err("agent closed".to_string()),
        }
    }

    /// Idempotent: the script side closing its own output.
    pub fn close_output(&self) {
        *self.out_tx.lock() = None;
    }
}

/// Host-facing side: send on the input channel, iterate the output channel.
pub struct AgentHandle {
    in_tx: Mutex<Option<mpsc::Sender<MessageChunk>>>,
    out_rx: AsyncMutex<mpsc::Receiver<MessageChunk>>,
}

impl AgentHandle {
    /// Host side: send on the input channel. Fails with "agent closed" once
    /// the host itself has closed the input side, or the script has dropped
    /// its receiving end.
    pub async fn send(&self, chunk: MessageChunk) -> Result<(), String> {
        let sender = self.in_tx.lock().clone();
        match sender {
            Some(tx) => tx.send(chunk).await.map_err(|_| "agent closed".to_string()),
            None => Err("agent closed".to_string()),
        }
    }

    /// Idempotent: the host side closing its own input.
    pub fn close_input(&self) {
        *self.in_tx.lock() = None;
    }

    /// Host side: iterate the output channel. `None` once the script has
    /// closed its output side and every buffered chunk has been drained.
    pub async fn recv_output(&self) -> Option<MessageChunk> {
        self.out_rx.lock().await.recv().await
    }
}

/// Build a linked `(AgentContext, AgentHandle)` pair sharing a pair of
/// bounded channels of the given capacities.
pub fn new_agent(in_capacity: usize, out_capacity: usize) -> (AgentContext, AgentHandle) {
    let (in_tx, in_rx) = mpsc::channel(in_capacity.max(1));
    let (out_tx, out_rx) = mpsc::channel(out_capacity.max(1));
    let context = AgentContext { in_rx: AsyncMutex::new(in_rx), out_tx: Mutex::new(Some(out_tx)) };
    let handle = AgentHandle { in_tx: Mutex::new(Some(in_tx)), out_rx: AsyncMutex::new(out_rx) };
    (context, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn host_send_is_observed_by_script_recv() {
        let (ctx, handle) = new_agent(DEFAULT_IN_CAPACITY, DEFAULT_OUT_CAPACITY);
        handle.send(MessageChunk::text("hi")).await.unwrap();
        let chunk = ctx.recv().await.unwrap();
        assert_eq!(chunk, MessageChunk::text("hi"));
    }

    #[tokio::test]
    async fn script_emit_is_observed_by_host_recv_output() {
        let (ctx, handle) = new_agent(DEFAULT_IN_CAPACITY, DEFAULT_OUT_CAPACITY);
        ctx.emit(MessageChunk::text("out")).await.unwrap();
        let chunk = handle.recv_output().await.unwrap();
        assert_eq!(chunk, MessageChunk::text("out"));
    }

    #[tokio::test]
    async fn closing_input_makes_recv_return_none() {
        let (ctx, handle) = new_agent(DEFAULT_IN_CAPACITY, DEFAULT_OUT_CAPACITY);
        handle.close_input();
        assert!(ctx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closing_input_twice_is_idempotent() {
        let (_ctx, handle) = new_agent(DEFAULT_IN_CAPACITY, DEFAULT_OUT_CAPACITY);
        handle.close_input();
        handle.close_input();
    }

    #[tokio::test]
    async fn emit_after_host_stops_iterating_fails_with_agent_closed() {
        let (ctx, handle) = new_agent(DEFAULT_IN_CAPACITY, DEFAULT_OUT_CAPACITY);
        drop(handle);
        let err = ctx.emit(MessageChunk::text("x")).await.unwrap_err();
        assert_eq!(err, "agent closed");
    }

    #[tokio::test]
    async fn emit_after_close_output_fails_with_agent_closed() {
        let (ctx, _handle) = new_agent(DEFAULT_IN_CAPACITY, DEFAULT_OUT_CAPACITY);
        ctx.close_output();
        let err = ctx.emit(MessageChunk::text("x")).await.unwrap_err();
        assert_eq!(err, "agent closed");
    }
}
