//! Admission middleware
//!
//! The entry point wrapping a downstream handler. Derives the request
//! fingerprint, asks the pool whether this request drives or rides, and
//! either invokes the handler (once per logical request) or awaits the
//! driver's completion. Key-derivation failures fail open: the request
//! is handled without deduplication rather than stalled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::DedupConfig;
use crate::http::{Request, SinkHandle};
use crate::key::KeyPolicy;
use crate::pool::{Admission, Broadcaster, RelayError, RequestPool};

/// Boxed future returned by a [`Handler`]
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Downstream handler capability
///
/// Invoked exactly once per logical (deduplicated) request. Implemented
/// automatically for async closures taking `(SinkHandle, Request)`.
pub trait Handler: Send + Sync + 'static {
    /// Produce the response for a request by writing to the sink
    fn call(&self, sink: SinkHandle, req: Request) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(SinkHandle, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, sink: SinkHandle, req: Request) -> HandlerFuture {
        Box::pin(self(sink, req))
    }
}

/// Request-deduplicating wrapper around a [`Handler`]
pub struct DedupMiddleware<H> {
    handler: Arc<H>,
    pool: Option<Arc<RequestPool>>,
    policy: Arc<KeyPolicy>,
}

impl<H: Handler> DedupMiddleware<H> {
    /// Wrap a handler with the default configuration
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, DedupConfig::default())
    }

    /// Wrap a handler with a custom configuration
    pub fn with_config(handler: H, config: DedupConfig) -> Self {
        let pool = config.enabled.then(RequestPool::new);
        Self {
            handler: Arc::new(handler),
            pool,
            policy: Arc::new(config.key_policy()),
        }
    }

    /// Wrap a handler with a custom key policy
    pub fn with_policy(handler: H, policy: KeyPolicy) -> Self {
        Self {
            handler: Arc::new(handler),
            pool: Some(RequestPool::new()),
            policy: Arc::new(policy),
        }
    }

    /// The registration pool, if deduplication is enabled
    pub fn pool(&self) -> Option<&Arc<RequestPool>> {
        self.pool.as_ref()
    }

    /// Handle one inbound request
    pub async fn handle(&self, sink: SinkHandle, mut req: Request) {
        let Some(pool) = self.pool.as_ref() else {
            // Deduplication disabled: straight pass-through
            self.handler.call(sink, req).await;
            return;
        };

        let key = match self.policy.derive(&mut req) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(error = %err, "Key derivation failed, handling without dedup");
                self.handler.call(sink, req).await;
                return;
            }
        };

        match pool.get_or_register(&key, sink) {
            Admission::Drive(broadcaster) => {
                self.drive(broadcaster, req).await;
            }
            Admission::Ride(done) => {
                tracing::debug!(key = %key, "Duplicate request, awaiting driver");
                match done.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        // The rider's connection already received a
                        // best-effort copy of the bytes; diagnostic only
                        tracing::warn!(key = %key, error = %err, "Relay completed with error");
                    }
                    Err(_) => {
                        tracing::warn!(key = %key, "Driver dropped without completing");
                    }
                }
            }
            Admission::Bypass(sink) => {
                tracing::debug!(key = %key, "Attach window closed, handling independently");
                self.handler.call(sink, req).await;
            }
        }
    }

    /// Run the handler as the driver for a broadcaster
    ///
    /// The handler runs on its own task so a panic is contained there
    /// and translated into a resolved-with-error completion for every
    /// rider. Completion itself is driven by a detached supervisor
    /// task: the caller's connection task may be aborted mid-flight,
    /// and the broadcaster must still be finished (riders resolved,
    /// pool key released) when that happens.
    async fn drive(&self, broadcaster: Arc<Broadcaster>, req: Request) {
        let sink: SinkHandle = broadcaster.clone();
        let handler = tokio::spawn(self.handler.call(sink, req));

        let supervisor = tokio::spawn(async move {
            let outcome = match handler.await {
                Ok(()) => Ok(()),
                Err(err) => {
                    tracing::error!(key = %broadcaster.key(), error = %err, "Driver handler aborted");
                    Err(RelayError::Driver(err.to_string()))
                }
            };
            broadcaster.finish(outcome);
        });
        let _ = supervisor.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::http::{Body, BufferSink, RequestUrl, ResponseSink};
    use crate::key::KeyError;

    fn request(body: &'static [u8]) -> Request {
        Request::new("POST", RequestUrl::new("http", "example.com", "/op"))
            .with_body(Body::buffered(body))
    }

    fn counting_handler(
        count: Arc<AtomicUsize>,
    ) -> impl Fn(SinkHandle, Request) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync
    {
        move |sink: SinkHandle, _req: Request| {
            let count = Arc::clone(&count);
            let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                sink.write_status(200);
                let _ = sink.write(b"ok");
            });
            fut
        }
    }

    #[tokio::test]
    async fn test_single_request_drives() {
        let count = Arc::new(AtomicUsize::new(0));
        let middleware = DedupMiddleware::new(counting_handler(Arc::clone(&count)));

        let sink = Arc::new(BufferSink::new());
        middleware.handle(sink.clone(), request(b"body")).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sink.final_status(), Some(200));
        assert_eq!(&sink.body()[..], b"ok");
        // Pool entry torn down once output began
        assert!(middleware.pool().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_middleware_passes_through() {
        let count = Arc::new(AtomicUsize::new(0));
        let middleware = DedupMiddleware::with_config(
            counting_handler(Arc::clone(&count)),
            DedupConfig::default().disabled(),
        );
        assert!(middleware.pool().is_none());

        let sink = Arc::new(BufferSink::new());
        middleware.handle(sink.clone(), request(b"body")).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(&sink.body()[..], b"ok");
    }

    #[tokio::test]
    async fn test_deriver_failure_fails_open() {
        let count = Arc::new(AtomicUsize::new(0));
        let policy = KeyPolicy::none().body(|_: &mut dyn std::io::Read| {
            Err(KeyError::Deriver("unavailable".into()))
        });
        let middleware =
            DedupMiddleware::with_policy(counting_handler(Arc::clone(&count)), policy);

        let sink = Arc::new(BufferSink::new());
        middleware.handle(sink.clone(), request(b"body")).await;

        // Handler still ran, request completed
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(&sink.body()[..], b"ok");
        assert!(middleware.pool().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sequential_identical_requests_both_run() {
        // No overlap in flight, so no collapsing happens
        let count = Arc::new(AtomicUsize::new(0));
        let middleware = DedupMiddleware::new(counting_handler(Arc::clone(&count)));

        middleware
            .handle(Arc::new(BufferSink::new()), request(b"same"))
            .await;
        middleware
            .handle(Arc::new(BufferSink::new()), request(b"same"))
            .await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_panic_resolves_riders() {
        let release = Arc::new(tokio::sync::Notify::new());
        let middleware = Arc::new(DedupMiddleware::new({
            let release = Arc::clone(&release);
            move |_sink: SinkHandle, _req: Request| {
                let release = Arc::clone(&release);
                async move {
                    release.notified().await;
                    panic!("handler blew up");
                }
            }
        }));

        // Attach a rider directly so the completion can be observed
        let policy = KeyPolicy::exact();
        let key = policy.derive(&mut request(b"body")).unwrap();
        let pool = Arc::clone(middleware.pool().unwrap());

        let driver_sink = Arc::new(BufferSink::new());
        let driver = {
            let middleware = Arc::clone(&middleware);
            tokio::spawn(async move { middleware.handle(driver_sink, request(b"body")).await })
        };

        // Wait for the driver to register, then ride
        let broadcaster = loop {
            if let Some(b) = pool.get(&key) {
                break b;
            }
            tokio::task::yield_now().await;
        };
        let done = match broadcaster.register_rider(Arc::new(BufferSink::new())) {
            Ok(done) => done,
            Err(_) => panic!("rider should attach before any write"),
        };

        release.notify_one();
        driver.await.unwrap();
        let outcome = done.await.unwrap();
        assert!(matches!(outcome, Err(RelayError::Driver(_))));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_aborted_connection_task_still_resolves_riders() {
        let release = Arc::new(tokio::sync::Notify::new());
        let middleware = Arc::new(DedupMiddleware::new({
            let release = Arc::clone(&release);
            move |_sink: SinkHandle, _req: Request| {
                let release = Arc::clone(&release);
                // Completes without writing a body, so teardown only
                // happens at finish
                async move {
                    release.notified().await;
                }
            }
        }));

        let policy = KeyPolicy::exact();
        let key = policy.derive(&mut request(b"body")).unwrap();
        let pool = Arc::clone(middleware.pool().unwrap());

        let driver = {
            let middleware = Arc::clone(&middleware);
            tokio::spawn(async move {
                middleware
                    .handle(Arc::new(BufferSink::new()), request(b"body"))
                    .await
            })
        };

        let broadcaster = loop {
            if let Some(b) = pool.get(&key) {
                break b;
            }
            tokio::task::yield_now().await;
        };
        let done = match broadcaster.register_rider(Arc::new(BufferSink::new())) {
            Ok(done) => done,
            Err(_) => panic!("rider should attach before any write"),
        };

        // Kill the connection task while the handler is still parked;
        // the detached handler and supervisor must carry on without it
        driver.abort();
        assert!(driver.await.unwrap_err().is_cancelled());

        release.notify_one();
        let outcome = done.await.unwrap();
        assert!(outcome.is_ok());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_bypassed_request_runs_with_own_sink() {
        let release = Arc::new(tokio::sync::Notify::new());
        let count = Arc::new(AtomicUsize::new(0));
        let middleware = Arc::new(DedupMiddleware::new({
            let release = Arc::clone(&release);
            let count = Arc::clone(&count);
            move |sink: SinkHandle, _req: Request| {
                let release = Arc::clone(&release);
                let count = Arc::clone(&count);
                async move {
                    release.notified().await;
                    count.fetch_add(1, Ordering::SeqCst);
                    sink.write_status(200);
                    let _ = sink.write(b"ok");
                }
            }
        }));

        let policy = KeyPolicy::exact();
        let key = policy.derive(&mut request(b"body")).unwrap();
        let pool = Arc::clone(middleware.pool().unwrap());

        let driver_sink = Arc::new(BufferSink::new());
        let driver = {
            let middleware = Arc::clone(&middleware);
            let driver_sink = driver_sink.clone();
            tokio::spawn(async move { middleware.handle(driver_sink, request(b"body")).await })
        };

        let broadcaster = loop {
            if let Some(b) = pool.get(&key) {
                break b;
            }
            tokio::task::yield_now().await;
        };
        release.notify_one();
        driver.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Reconstruct the window between the driver's state flip and
        // its pool removal: the entry is present but mid-write
        pool.entries_mut().insert(key.clone(), broadcaster);

        let bypass_sink = Arc::new(BufferSink::new());
        release.notify_one();
        middleware
            .handle(bypass_sink.clone(), request(b"body"))
            .await;

        // The bypassing caller ran the handler itself, on its own sink
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(bypass_sink.final_status(), Some(200));
        assert_eq!(&bypass_sink.body()[..], b"ok");
        assert_eq!(&driver_sink.body()[..], b"ok");
    }
}
