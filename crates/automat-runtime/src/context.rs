//! Process-wide slot holding the active persistence context.
//!
//! Behaviours occasionally need to reach back into the runtime during an
//! apply cycle (nested reads, out-of-band publication). The worker installs
//! a [`Handle`] in a task-local slot around each apply, so setup and
//! teardown are guaranteed on every exit path; outside an apply the slot is
//! empty and [`current`] reports a configuration error.

use std::future::Future;

use crate::{Handle, RuntimeError};

tokio::task_local! {
    static CURRENT: Handle;
}

/// Run `fut` with `handle` installed as the active persistence context.
pub(crate) async fn scope<F: Future>(handle: Handle, fut: F) -> F::Output {
    CURRENT.scope(handle, fut).await
}

/// The persistence context of the apply cycle running on this task.
///
/// Only available to code invoked from inside an apply cycle; anywhere else
/// this is [`RuntimeError::Configuration`].
pub fn current() -> Result<Handle, RuntimeError> {
    CURRENT.try_with(Handle::clone).map_err(|_| {
        RuntimeError::Configuration("no apply cycle is active on this task".to_string())
    })
}
