//! Deferral onto a later scheduling turn

/// Spawn `task` on the ambient Tokio runtime.
///
/// On a current-thread runtime the task cannot run before the caller yields.
/// Returns `false`, without running `task`, when no runtime is entered.
pub(crate) fn defer<F>(task: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            drop(handle.spawn(async move { task() }));
            true
        }
        Err(_) => false,
    }
}
