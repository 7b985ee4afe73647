//! Request-scoped context for handler code.
//!
//! While a notification or RPC handler runs, the request context it was
//! invoked with is reachable through [`current`] without being passed down
//! explicitly. The value is scoped to the handler's task and cleared when
//! the handler returns, on success or failure.

use std::future::Future;

use courier_types::RequestContext;

tokio::task_local! {
    static LOCAL_CONTEXT: RequestContext;
}

/// Run `fut` with `ctxt` as the local context.
pub async fn scope<F: Future>(ctxt: RequestContext, fut: F) -> F::Output {
    LOCAL_CONTEXT.scope(ctxt, fut).await
}

/// The local context of the running handler, if any.
pub fn current() -> Option<RequestContext> {
    LOCAL_CONTEXT.try_with(Clone::clone).ok()
}
