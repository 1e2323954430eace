//! Admission middleware pipeline
//!
//! Middleware run once per connection attempt, strictly in registration order.
//! Each one receives the fresh server socket and a [`Next`] continuation that
//! it must consume exactly once: [`Next::proceed`] hands control to the next
//! middleware, [`Next::reject`] aborts admission. A middleware that drops its
//! `Next` without calling it stalls that connection attempt forever; nothing
//! here detects or times that out.

use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::MiddlewareError;
use crate::socket::ServerSocket;

/// Outcome handed to a pipeline's completion callback
pub type Admission = Result<(), MiddlewareError>;

type Chain = Arc<[Arc<dyn Middleware>]>;
type Done = Box<dyn FnOnce(Admission) + Send>;

/// An admission step
pub trait Middleware: Send + Sync + 'static {
    /// Inspect or mutate `socket`, then consume `next`
    fn handle(&self, socket: &ServerSocket, next: Next);
}

impl<F> Middleware for F
where
    F: Fn(&ServerSocket, Next) + Send + Sync + 'static,
{
    fn handle(&self, socket: &ServerSocket, next: Next) {
        self(socket, next)
    }
}

/// One-shot continuation handed to each middleware.
///
/// Consuming `self` makes a second invocation impossible. `Next` is `Send`,
/// so it can be moved into a spawned task and resolved later.
pub struct Next {
    chain: Chain,
    index: usize,
    socket: ServerSocket,
    done: Done,
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("socket", &self.socket.id())
            .field("index", &self.index)
            .field("remaining", &(self.chain.len() - self.index))
            .finish()
    }
}

impl Next {
    /// Continue with the next middleware, or complete successfully
    pub fn proceed(self) {
        self.call(Ok(()));
    }

    /// Abort admission; remaining middleware are skipped
    pub fn reject(self, error: impl Into<MiddlewareError>) {
        self.call(Err(error.into()));
    }

    /// Continue on `Ok`, abort on `Err`
    pub fn call(self, result: Admission) {
        let Next {
            chain,
            index,
            socket,
            done,
        } = self;
        match result {
            Ok(()) => step(chain, index, socket, done),
            Err(error) => {
                debug!(
                    "Middleware #{} rejected socket {}: {}",
                    index,
                    socket.id(),
                    error
                );
                done(Err(error));
            }
        }
    }
}

fn step(chain: Chain, index: usize, socket: ServerSocket, done: Done) {
    let Some(middleware) = chain.get(index).cloned() else {
        debug!("Pipeline completed for socket {}", socket.id());
        done(Ok(()));
        return;
    };

    let next = Next {
        chain,
        index: index + 1,
        socket: socket.clone(),
        done,
    };
    middleware.handle(&socket, next);
}

/// Ordered list of admission middleware
#[derive(Default)]
pub struct Pipeline {
    stack: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("len", &self.len())
            .finish()
    }
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware
    pub fn push<M: Middleware>(&self, middleware: M) {
        self.stack.write().push(Arc::new(middleware));
    }

    /// Insert a middleware ahead of everything registered so far
    pub(crate) fn push_front<M: Middleware>(&self, middleware: M) {
        self.stack.write().insert(0, Arc::new(middleware));
    }

    /// Number of registered middleware
    pub fn len(&self) -> usize {
        self.stack.read().len()
    }

    /// Check if no middleware is registered
    pub fn is_empty(&self) -> bool {
        self.stack.read().is_empty()
    }

    /// Run every middleware against `socket`, then call `done` exactly once
    /// unless some middleware stalls.
    ///
    /// The chain is snapshotted here; middleware registered while this run is
    /// in flight only apply to later runs. `done` runs synchronously when
    /// every middleware resolves synchronously.
    pub fn run<F>(&self, socket: &ServerSocket, done: F)
    where
        F: FnOnce(Admission) + Send + 'static,
    {
        let chain: Chain = self.stack.read().iter().cloned().collect();
        debug!(
            "Running {} middleware for socket {}",
            chain.len(),
            socket.id()
        );
        step(chain, 0, socket.clone(), Box::new(done));
    }
}

/// Middleware that observes or mutates the socket and always continues.
///
/// This is the pipeline without an abort path.
pub struct Inspect<F> {
    f: F,
}

/// Wrap `f` so it runs as a middleware that can never reject
pub fn inspect<F>(f: F) -> Inspect<F>
where
    F: Fn(&ServerSocket) + Send + Sync + 'static,
{
    Inspect { f }
}

impl<F> Middleware for Inspect<F>
where
    F: Fn(&ServerSocket) + Send + Sync + 'static,
{
    fn handle(&self, socket: &ServerSocket, next: Next) {
        (self.f)(socket);
        next.proceed();
    }
}

/// Middleware driven by a future, resolved on the current Tokio runtime
pub struct AsyncMiddleware<F> {
    f: F,
}

/// Adapt an async check into a middleware.
///
/// The future is spawned on the current Tokio runtime and its output resolves
/// the continuation. Outside a runtime the attempt is rejected.
pub fn from_async<F, Fut>(f: F) -> AsyncMiddleware<F>
where
    F: Fn(ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Admission> + Send + 'static,
{
    AsyncMiddleware { f }
}

impl<F, Fut> Middleware for AsyncMiddleware<F>
where
    F: Fn(ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Admission> + Send + 'static,
{
    fn handle(&self, socket: &ServerSocket, next: Next) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let check = (self.f)(socket.clone());
                drop(handle.spawn(async move {
                    next.call(check.await);
                }));
            }
            Err(_) => {
                warn!(
                    "No Tokio runtime for async middleware, rejecting socket {}",
                    socket.id()
                );
                next.reject("async middleware requires a Tokio runtime");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn tag(label: &'static str) -> impl Fn(&ServerSocket, Next) + Send + Sync + 'static {
        move |socket: &ServerSocket, next: Next| {
            socket.update_metadata(|metadata| {
                let tags = metadata
                    .entry("tags".to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = tags {
                    items.push(json!(label));
                }
            });
            next.proceed();
        }
    }

    fn outcomes() -> (
        Arc<Mutex<Vec<Admission>>>,
        impl FnOnce(Admission) + Send + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |result: Admission| sink.lock().push(result))
    }

    #[test]
    fn test_empty_pipeline_completes_immediately() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);
        let pipeline = Pipeline::new();
        let (seen, done) = outcomes();

        pipeline.run(&socket, done);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_ok());
    }

    #[test]
    fn test_middleware_run_in_order() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);
        let pipeline = Pipeline::new();
        pipeline.push(tag("foo"));
        pipeline.push(tag("bar"));
        let (seen, done) = outcomes();

        pipeline.run(&socket, done);

        assert_eq!(socket.metadata("tags"), Some(json!(["foo", "bar"])));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_ok());
    }

    #[test]
    fn test_rejection_skips_remaining_middleware() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);
        let pipeline = Pipeline::new();
        pipeline.push(|_: &ServerSocket, next: Next| next.reject("Simulated failure."));
        pipeline.push(tag("foo"));
        pipeline.push(tag("bar"));
        let (seen, done) = outcomes();

        pipeline.run(&socket, done);

        assert!(socket.metadata("tags").is_none());
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let err = seen[0].as_ref().unwrap_err();
        assert_eq!(err.message(), "Simulated failure.");
    }

    #[test]
    fn test_rejection_after_partial_run() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);
        let pipeline = Pipeline::new();
        pipeline.push(tag("foo"));
        pipeline.push(|_: &ServerSocket, next: Next| next.call(Err(MiddlewareError::new("nope"))));
        pipeline.push(tag("bar"));
        let (seen, done) = outcomes();

        pipeline.run(&socket, done);

        assert_eq!(socket.metadata("tags"), Some(json!(["foo"])));
        assert!(seen.lock()[0].is_err());
    }

    #[test]
    fn test_dropped_next_stalls() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);
        let pipeline = Pipeline::new();
        pipeline.push(|_: &ServerSocket, next: Next| drop(next));
        pipeline.push(tag("foo"));
        let (seen, done) = outcomes();

        pipeline.run(&socket, done);

        assert!(seen.lock().is_empty());
        assert!(socket.metadata("tags").is_none());
    }

    #[test]
    fn test_inspect_always_continues() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);
        let pipeline = Pipeline::new();
        pipeline.push(inspect(|socket: &ServerSocket| {
            socket.set_metadata("seen", json!(true));
        }));
        pipeline.push(tag("after"));
        let (seen, done) = outcomes();

        pipeline.run(&socket, done);

        assert_eq!(socket.metadata("seen"), Some(json!(true)));
        assert_eq!(socket.metadata("tags"), Some(json!(["after"])));
        assert!(seen.lock()[0].is_ok());
    }

    #[test]
    fn test_chain_is_snapshotted_per_run() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);
        let pipeline = Arc::new(Pipeline::new());

        let handle = Arc::clone(&pipeline);
        pipeline.push(move |_: &ServerSocket, next: Next| {
            handle.push(tag("late"));
            next.proceed();
        });
        let (seen, done) = outcomes();

        pipeline.run(&socket, done);

        assert!(socket.metadata("tags").is_none());
        assert!(seen.lock()[0].is_ok());
        assert_eq!(pipeline.len(), 2);
    }

    #[tokio::test]
    async fn test_deferred_next_resumes_later() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);
        let pipeline = Pipeline::new();
        pipeline.push(|_: &ServerSocket, next: Next| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                next.proceed();
            });
        });
        pipeline.push(tag("foo"));
        let (tx, mut rx) = mpsc::unbounded_channel();

        pipeline.run(&socket, move |result| {
            let _ = tx.send(result);
        });

        assert!(socket.metadata("tags").is_none());
        let result = rx.recv().await.unwrap();
        assert!(result.is_ok());
        assert_eq!(socket.metadata("tags"), Some(json!(["foo"])));
    }

    #[tokio::test]
    async fn test_async_middleware() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);
        let pipeline = Pipeline::new();
        pipeline.push(from_async(|socket: ServerSocket| async move {
            tokio::task::yield_now().await;
            match socket.metadata("token") {
                Some(_) => Ok(()),
                None => Err(MiddlewareError::new("missing token")),
            }
        }));
        let (tx, mut rx) = mpsc::unbounded_channel();

        pipeline.run(&socket, move |result| {
            let _ = tx.send(result);
        });

        let result = rx.recv().await.unwrap();
        assert_eq!(result.unwrap_err().message(), "missing token");
    }

    #[test]
    fn test_async_middleware_without_runtime_rejects() {
        let namespace = Namespace::new("/");
        let socket = ServerSocket::new(&namespace);
        let pipeline = Pipeline::new();
        pipeline.push(from_async(|_: ServerSocket| async { Ok(()) }));
        let (seen, done) = outcomes();

        pipeline.run(&socket, done);

        assert!(seen.lock()[0].is_err());
    }
}
