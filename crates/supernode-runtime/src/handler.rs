//! `Handler3`: the `{pre_action, worker_action, post_action}` triple a
//! route resolves to, plus the boxed-callable plumbing that lets handlers
//! be ordinary `async fn`s.
//!
//! A handler is deliberately left at the abstraction level of "a callable
//! `(Vars, Input, Context) -> (Status, Output)`" — payment business logic
//! is out of scope. This module only supplies the calling convention.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use supernode_types::{Input, Output, Status, Vars};

use crate::context::TaskContext;

pub type PhaseOutcome = (Status, Output);
pub type PhaseFuture = Pin<Box<dyn Future<Output = PhaseOutcome> + Send>>;

/// A single phase callable. Implemented for any `Fn(Vars, Input,
/// Arc<TaskContext>, Output) -> impl Future<Output = PhaseOutcome>`, so
/// ordinary async closures and free functions both satisfy it.
pub trait Phase: Send + Sync {
    fn call(&self, vars: Vars, input: Input, ctx: Arc<TaskContext>, output: Output) -> PhaseFuture;
}

impl<F, Fut> Phase for F
where
    F: Fn(Vars, Input, Arc<TaskContext>, Output) -> Fut + Send + Sync,
    Fut: Future<Output = PhaseOutcome> + Send + 'static,
{
    fn call(&self, vars: Vars, input: Input, ctx: Arc<TaskContext>, output: Output) -> PhaseFuture {
        Box::pin((self)(vars, input, ctx, output))
    }
}

pub type BoxedPhase = Arc<dyn Phase>;

/// The matched route target: up to three optional phase callables plus a
/// name used for logging.
#[derive(Clone)]
pub struct Handler3 {
    pub name: String,
    pub pre_action: Option<BoxedPhase>,
    pub worker_action: Option<BoxedPhase>,
    pub post_action: Option<BoxedPhase>,
}

impl Handler3 {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), pre_action: None, worker_action: None, post_action: None }
    }

    pub fn with_pre(mut self, phase: impl Phase + 'static) -> Self {
        self.pre_action = Some(Arc::new(phase));
        self
    }

    pub fn with_worker(mut self, phase: impl Phase + 'static) -> Self {
        self.worker_action = Some(Arc::new(phase));
        self
    }

    pub fn with_post(mut self, phase: impl Phase + 'static) -> Self {
        self.post_action = Some(Arc::new(phase));
        self
    }
}

impl std::fmt::Debug for Handler3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler3")
            .field("name", &self.name)
            .field("pre_action", &self.pre_action.is_some())
            .field("worker_action", &self.worker_action.is_some())
            .field("post_action", &self.post_action.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GlobalContext;

    async fn echo_pre(_vars: Vars, input: Input, _ctx: Arc<TaskContext>, mut output: Output) -> PhaseOutcome {
        output.body = input.body.clone();
        (Status::Ok, output)
    }

    #[tokio::test]
    async fn handler_wraps_async_fn() {
        let h = Handler3::new("echo").with_pre(echo_pre);
        let ctx = Arc::new(TaskContext::new(Arc::new(GlobalContext::new())));
        let input = Input { body: b"hi".to_vec(), ..Default::default() };
        let (status, output) = h.pre_action.unwrap().call(Vars::new(), input, ctx, Output::default()).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(output.body, b"hi");
    }
}
