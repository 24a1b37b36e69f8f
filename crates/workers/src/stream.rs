//! Streaming task bridge
//!
//! Turns the push-style callbacks a module drives from its worker thread into
//! a pull-style [`TaskStream`] on the async side.
//!
//! ```text
//! worker thread                          async consumer
//! ┌───────────────────┐   Signal (mpsc)  ┌──────────────────────────┐
//! │ StreamCallbacks   │ ───────────────► │ TaskStream (Stream)      │
//! │  on_item          │   Item ... Item  │  .next().await           │
//! │  on_complete ─┐   │   Complete|Error │  .subscribe(observer)    │
//! │  on_error ────┴─► latch             │  .cancel()               │
//! └───────────────────┘                  └──────────────────────────┘
//! ```
//!
//! Termination is exactly-once on both ends: the callbacks latch on the first
//! terminal event and the stream stops reading after it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::module::{ModuleError, Payload};

enum Signal {
    Item(Payload),
    Complete,
    Error(ModuleError),
}

struct Shared {
    tx: mpsc::UnboundedSender<Signal>,
    terminated: AtomicBool,
    cancel: CancellationToken,
    label: String,
}

/// Create a connected callback/stream pair
pub fn bridge(label: impl Into<String>) -> (StreamCallbacks, TaskStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let label = label.into();

    let callbacks = StreamCallbacks {
        shared: Arc::new(Shared {
            tx,
            terminated: AtomicBool::new(false),
            cancel: cancel.clone(),
            label: label.clone(),
        }),
    };
    let stream = TaskStream {
        rx,
        cancelled: Box::pin(cancel.clone().cancelled_owned()),
        cancel,
        finished: false,
        label,
    };
    (callbacks, stream)
}

/// Producer side of a stream, handed to the module
#[derive(Clone)]
pub struct StreamCallbacks {
    shared: Arc<Shared>,
}

impl StreamCallbacks {
    /// Forward one item
    ///
    /// Returns `false` when the consumer is gone or cancelled, or when the
    /// stream has already terminated. Modules should stop producing then.
    pub fn on_item(&self, item: impl Into<Payload>) -> bool {
        if self.shared.terminated.load(Ordering::Acquire) {
            warn!(stream = %self.shared.label, "Discarding item after stream terminated");
            return false;
        }
        if self.is_cancelled() {
            return false;
        }
        self.shared.tx.send(Signal::Item(item.into())).is_ok()
    }

    /// Signal successful completion
    pub fn on_complete(&self) {
        if !self.latch() {
            warn!(stream = %self.shared.label, "Discarding duplicate completion");
            return;
        }
        let _ = self.shared.tx.send(Signal::Complete);
    }

    /// Signal failure
    pub fn on_error(&self, error: ModuleError) {
        if !self.latch() {
            warn!(
                stream = %self.shared.label,
                error = %error,
                "Discarding error after stream terminated"
            );
            return;
        }
        let _ = self.shared.tx.send(Signal::Error(error));
    }

    /// Whether the consumer asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Whether a terminal event has been signalled
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }

    /// Complete the stream unless the module already terminated it
    pub(crate) fn complete_if_open(&self) {
        if self.latch() {
            let _ = self.shared.tx.send(Signal::Complete);
        }
    }

    /// Fail the stream unless the module already terminated it
    pub(crate) fn fail_if_open(&self, error: ModuleError) {
        self.on_error(error);
    }

    /// Returns true for the first caller only
    fn latch(&self) -> bool {
        !self.shared.terminated.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("label", &self.shared.label)
            .field("terminated", &self.is_terminated())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Consumer side of a stream
///
/// Yields items in production order. Ends with `None` on completion or
/// cancellation, or with a single `Err` when the module fails or the worker
/// goes away. Dropping the stream cancels it.
pub struct TaskStream {
    rx: mpsc::UnboundedReceiver<Signal>,
    cancel: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    finished: bool,
    label: String,
}

impl TaskStream {
    /// Stop forwarding items
    ///
    /// Idempotent. The module observes it through
    /// [`StreamCallbacks::is_cancelled`] and may keep running until it checks.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drain the stream into a vector, stopping at the first error
    pub async fn collect_items(self) -> Result<Vec<Payload>, StreamError> {
        self.try_collect().await
    }

    /// Drive the stream on a background task, delivering to `observer`
    ///
    /// The observer receives exactly one of `on_error`/`on_complete`.
    /// Cancelling the subscription before termination delivers `on_complete`.
    pub fn subscribe<O>(mut self, mut observer: O) -> Subscription
    where
        O: StreamObserver + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let label = self.label.clone();
        let task = tokio::spawn(async move {
            while let Some(next) = self.next().await {
                match next {
                    Ok(item) => observer.on_next(item),
                    Err(err) => {
                        debug!(stream = %self.label, error = %err, "Subscription failed");
                        observer.on_error(err);
                        return;
                    }
                }
            }
            observer.on_complete();
        });
        Subscription {
            cancel,
            task: Some(task),
            label,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.rx.close();
    }
}

impl Stream for TaskStream {
    type Item = Result<Payload, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        // Cancellation wins over anything still buffered
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.finish();
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Signal::Item(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Signal::Complete)) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Signal::Error(err))) => {
                this.finish();
                Poll::Ready(Some(Err(StreamError::ModuleThrew(err))))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(Some(Err(StreamError::WorkerLost)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TaskStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TaskStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStream")
            .field("label", &self.label)
            .field("finished", &self.finished)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Callback-style consumer of a [`TaskStream`]
pub trait StreamObserver {
    fn on_next(&mut self, item: Payload);
    fn on_error(&mut self, error: StreamError);
    fn on_complete(&mut self);
}

/// A running [`TaskStream::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    label: String,
}

impl Subscription {
    /// Stop delivering items; idempotent
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the observer has received its terminal callback
    pub fn is_closed(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Wait until the observer has received its terminal callback
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(stream = %self.label, error = %e, "Stream observer panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Next(Payload),
        Error(StreamError),
        Complete,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<Seen>>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().clone()
        }

        fn terminal_count(&self) -> usize {
            self.seen()
                .iter()
                .filter(|s| matches!(s, Seen::Error(_) | Seen::Complete))
                .count()
        }
    }

    impl StreamObserver for Recorder {
        fn on_next(&mut self, item: Payload) {
            self.seen.lock().push(Seen::Next(item));
        }

        fn on_error(&mut self, error: StreamError) {
            self.seen.lock().push(Seen::Error(error));
        }

        fn on_complete(&mut self) {
            self.seen.lock().push(Seen::Complete);
        }
    }

    #[tokio::test]
    async fn test_items_in_order_then_single_completion() {
        let (callbacks, stream) = bridge("test");
        let recorder = Recorder::default();
        let subscription = stream.subscribe(recorder.clone());

        for i in 0..100 {
            assert!(callbacks.on_item(i.to_string()));
        }
        callbacks.on_complete();
        subscription.join().await;

        let seen = recorder.seen();
        assert_eq!(seen.len(), 101);
        for (i, event) in seen.iter().take(100).enumerate() {
            assert_eq!(event, &Seen::Next(Payload::text(i.to_string())));
        }
        assert_eq!(seen[100], Seen::Complete);
    }

    #[tokio::test]
    async fn test_duplicate_terminal_events_are_discarded() {
        let (callbacks, stream) = bridge("test");
        let recorder = Recorder::default();
        let subscription = stream.subscribe(recorder.clone());

        callbacks.on_item("a");
        callbacks.on_complete();
        callbacks.on_error(ModuleError::new("late"));
        assert!(!callbacks.on_item("b"));
        callbacks.on_complete();
        subscription.join().await;

        assert_eq!(
            recorder.seen(),
            vec![Seen::Next(Payload::text("a")), Seen::Complete]
        );
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let (callbacks, stream) = bridge("test");
        let recorder = Recorder::default();
        let subscription = stream.subscribe(recorder.clone());

        callbacks.on_item("a");
        callbacks.on_error(ModuleError::new("bad record"));
        callbacks.on_complete();
        subscription.join().await;

        assert_eq!(recorder.terminal_count(), 1);
        assert!(matches!(
            recorder.seen().last(),
            Some(Seen::Error(StreamError::ModuleThrew(_)))
        ));
    }

    #[tokio::test]
    async fn test_dropped_producer_reports_worker_lost() {
        let (callbacks, mut stream) = bridge("test");
        callbacks.on_item("a");
        drop(callbacks);

        assert_eq!(stream.next().await, Some(Ok(Payload::text("a"))));
        assert_eq!(stream.next().await, Some(Err(StreamError::WorkerLost)));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_cancel_stops_forwarding() {
        let (callbacks, mut stream) = bridge("test");
        callbacks.on_item("a");
        callbacks.on_item("b");

        assert_eq!(stream.next().await, Some(Ok(Payload::text("a"))));
        stream.cancel();
        stream.cancel();

        assert!(callbacks.is_cancelled());
        assert!(!callbacks.on_item("c"));
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_completes_once() {
        let (callbacks, stream) = bridge("test");
        let recorder = Recorder::default();
        let subscription = stream.subscribe(recorder.clone());

        callbacks.on_item("first");
        tokio::time::timeout(Duration::from_secs(5), async {
            while recorder.seen().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        subscription.cancel();
        subscription.cancel();
        assert!(!callbacks.on_item("second"));
        callbacks.on_complete();
        subscription.join().await;

        assert_eq!(
            recorder.seen(),
            vec![Seen::Next(Payload::text("first")), Seen::Complete]
        );
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_producer() {
        let (callbacks, stream) = bridge("test");
        assert!(!callbacks.is_cancelled());
        drop(stream);
        assert!(callbacks.is_cancelled());
        assert!(!callbacks.on_item("ignored"));
    }

    #[tokio::test]
    async fn test_collect_items() {
        let (callbacks, stream) = bridge("test");
        callbacks.on_item("x");
        callbacks.on_item(vec![1u8, 2]);
        callbacks.on_complete();

        let items = stream.collect_items().await.unwrap();
        assert_eq!(items, vec![Payload::text("x"), Payload::Binary(vec![1, 2])]);
    }
}
