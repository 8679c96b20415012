use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::Error;
use crate::Result;
use crate::Runnable;
use crate::RunnableContext;

/// Entry point backed by a closure
pub struct FnRunnable {
    f: Box<dyn Fn(RunnableContext) -> BoxFuture<'static, Result<()>> + Send + Sync>,
}

#[async_trait]
impl Runnable for FnRunnable {
    async fn run(
        &self,
        ctx: RunnableContext,
    ) -> Result<()> {
        (self.f)(ctx).await
    }
}

pub fn runnable_fn<F, Fut>(f: F) -> Arc<dyn Runnable>
where
    F: Fn(RunnableContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnRunnable {
        f: Box::new(move |ctx| f(ctx).boxed()),
    })
}

/// Runs until asked to stop
pub fn until_shutdown() -> Arc<dyn Runnable> {
    runnable_fn(|ctx| async move {
        ctx.shutdown_requested().await;
        Ok(())
    })
}

/// Fails right away
pub fn failing(reason: &'static str) -> Arc<dyn Runnable> {
    runnable_fn(move |_| async move { Err(Error::Fatal(reason.to_string())) })
}

/// Ignores stop requests
pub fn stubborn() -> Arc<dyn Runnable> {
    runnable_fn(|_| futures::future::pending::<Result<()>>())
}
