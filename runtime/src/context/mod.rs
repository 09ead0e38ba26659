//! Context plug-ins: exactly one is active per Runtime (`spec.md` §4.6).
//!
//! `Tool` is one-shot input/output around a single `Run`. `Agent` is two
//! bounded channels carrying `MessageChunk`s for the lifetime of the script.

pub mod agent;
pub mod tool;

pub use agent::{AgentContext, AgentHandle};
pub use tool::{ToolContext, ToolOutput};

use std::sync::Arc;

/// The context a Runtime was constructed with.
pub enum Context {
    Tool(Arc<ToolContext>),
    Agent(Arc<AgentContext>),
}

impl Context {
    pub fn tool() -> (Context, Arc<ToolContext>) {
        let ctx = Arc::new(ToolContext::new());
        (Context::Tool(ctx.clone()), ctx)
    }

    pub fn agent(in_capacity: usize, out_capacity: usize) -> (Context, AgentHandle) {
        let (ctx, handle) = agent::new_agent(in_capacity, out_capacity);
        (Context::Agent(Arc::new(ctx)), handle)
    }

    pub fn as_tool(&self) -> Option<&Arc<ToolContext>> {
        match self {
            Context::Tool(t) => Some(t),
            Context::Agent(_) => None,
        }
    }

    pub fn as_agent(&self) -> Option<&Arc<AgentContext>> {
        match self {
            Context::Agent(a) => Some(a),
            Context::Tool(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MessageChunk;

    #[test]
    fn tool_context_is_reachable_through_the_enum() {
        let (ctx, handle) = Context::tool();
        handle.set_input(crate::vm::marshal::Value::Int(1));
        assert!(ctx.as_tool().is_some());
        assert!(ctx.as_agent().is_none());
    }

    #[tokio::test]
    async fn agent_context_is_reachable_through_the_enum() {
        let (ctx, handle) = Context::agent(agent::DEFAULT_IN_CAPACITY, agent::DEFAULT_OUT_CAPACITY);
        handle.send(MessageChunk::text("hi")).await.unwrap();
        let agent_ctx = ctx.as_agent().unwrap();
        assert_eq!(agent_ctx.recv().await.unwrap(), MessageChunk::text("hi"));
        assert!(ctx.as_tool().is_none());
    }
}
