//! Asynchronous Operations
//!
//! Long-running native work must not hold an [`Env`]. Instead it runs on its
//! own thread and reports back through a [`Promise`]:
//!
//! ```text
//! module function ──start()──► (handle, Promise)
//!       │ returns handle               │ moved to a worker thread
//!       ▼                              ▼
//! host keeps the handle        promise.resolve(result)
//!                                      │ result channel (unbounded)
//!                                      ▼
//!                              forwarder thread, one per tracker
//!                                      │
//!                                      ▼
//!                     completion queue (bounded) ──► notify channel
//!                                      │
//! host is woken, calls flush() ◄───────┘
//! ```
//!
//! Each promise is written at most once, and each completion is delivered by
//! exactly one `flush`. The forwarder exits once every tracker clone is
//! dropped and no promise is outstanding, or as soon as a completion can no
//! longer be queued.

use std::fmt;
use std::io::Write;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, warn};

use crate::codec::Encode;
use crate::error::{ConversionError, Error, LispError, Result};
use crate::handle::{Handle, HandleRegistry};
use crate::host::{Env, Value};
use crate::translate::ErrorTranslator;
use crate::types::Datum;

/// Handle of an asynchronous operation, as seen by the host.
pub type AsyncHandle = Handle;

/// The error half of an asynchronous result.
///
/// Unlike [`Error`] this can cross threads: it never holds host values.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncError {
    /// A signal with its own symbol and data.
    Lisp(LispError),
    Conversion(ConversionError),
    /// Anything else, reported as the module's async error condition.
    Other(String),
}

impl AsyncError {
    pub fn other(message: impl fmt::Display) -> Self {
        AsyncError::Other(message.to_string())
    }
}

impl fmt::Display for AsyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncError::Lisp(x) => write!(f, "{}", x),
            AsyncError::Conversion(e) => write!(f, "{}", e),
            AsyncError::Other(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for AsyncError {}

/// Host signals and throws cannot leave the calling thread and are reduced
/// to their description.
impl From<Error> for AsyncError {
    fn from(err: Error) -> Self {
        match err {
            Error::Lisp(x) => AsyncError::Lisp(x),
            Error::Conversion(e) => AsyncError::Conversion(e),
            other => AsyncError::Other(other.to_string()),
        }
    }
}

impl From<LispError> for AsyncError {
    fn from(err: LispError) -> Self {
        AsyncError::Lisp(err)
    }
}

/// Result of an asynchronous operation.
pub type AsyncResult = std::result::Result<Datum, AsyncError>;

/// A completed operation, returned by [`Async::flush`].
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncData {
    pub handle: AsyncHandle,
    /// Errors are already reduced to a signal.
    pub result: std::result::Result<Datum, LispError>,
}

impl AsyncData {
    pub fn value(&self) -> Option<&Datum> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&LispError> {
        self.result.as_ref().err()
    }
}

/// Encodes as `(HANDLE VALUE ERROR)`. On success ERROR is nil; on failure
/// VALUE is nil and ERROR is `(SYMBOL . DATA)`.
impl Encode for AsyncData {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        let handle = self.handle.encode(env)?;
        let (value, error) = match &self.result {
            Ok(datum) => (datum.encode(env)?, env.nil()?),
            Err(err) => {
                let symbol = err.symbol.name().encode(env)?;
                let mut data = Vec::with_capacity(err.data.len());
                for d in &err.data {
                    data.push(d.encode(env)?);
                }
                let data = env.list(&data)?;
                (env.nil()?, env.cons(symbol, data)?)
            }
        };
        env.list(&[handle, value, error])
    }
}

type Completion = (AsyncHandle, AsyncResult);

/// The single-write slot of an asynchronous operation.
///
/// Resolving consumes the promise. A promise dropped without a result
/// completes its operation with an error.
#[derive(Debug)]
pub struct Promise {
    handle: AsyncHandle,
    slot: Option<Sender<Completion>>,
}

impl Promise {
    pub fn handle(&self) -> AsyncHandle {
        self.handle
    }

    /// Complete the operation.
    pub fn resolve(mut self, result: AsyncResult) {
        self.complete(result);
    }

    pub fn succeed(self, value: impl Into<Datum>) {
        self.resolve(Ok(value.into()))
    }

    pub fn fail(self, err: impl Into<AsyncError>) {
        self.resolve(Err(err.into()))
    }

    fn complete(&mut self, result: AsyncResult) {
        if let Some(slot) = self.slot.take() {
            // Fails only once the tracker and its forwarder are gone.
            if slot.send((self.handle, result)).is_err() {
                debug!("async operation {} completed after its tracker", self.handle);
            }
        }
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        self.complete(Err(AsyncError::other("promise dropped without a result")));
    }
}

struct Shared {
    handles: HandleRegistry<()>,
    results: Sender<Completion>,
    completed_rx: Receiver<AsyncData>,
}

/// Moves results from promises into the bounded completion queue.
struct Forwarder {
    results: Receiver<Completion>,
    completed_tx: Sender<AsyncData>,
    notify: Sender<()>,
    translator: ErrorTranslator,
}

impl Forwarder {
    fn run(self) {
        for (handle, result) in self.results.iter() {
            let data = AsyncData {
                handle,
                result: result.map_err(|err| self.reduce(err)),
            };
            // Blocks while the queue is full; flush makes room. Fails once
            // every tracker clone has been dropped.
            if self.completed_tx.send(data).is_err() {
                break;
            }
            debug!("async operation {} completed", handle);
            if self.notify.send(()).is_err() {
                warn!("async notification for operation {} was not delivered", handle);
            }
        }
        debug!("async forwarder stopped");
    }

    fn reduce(&self, err: AsyncError) -> LispError {
        match err {
            AsyncError::Lisp(x) => x,
            AsyncError::Conversion(e) => match self.translator.lisp_error(e.into()) {
                Ok(x) => x,
                Err(other) => self.other(other.to_string()),
            },
            AsyncError::Other(message) => self.other(message),
        }
    }

    fn other(&self, message: String) -> LispError {
        LispError {
            symbol: self.translator.async_error().clone(),
            data: vec![Datum::Str(message)],
        }
    }
}

/// Tracker of in-flight asynchronous operations.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct Async {
    shared: Arc<Shared>,
}

impl Async {
    /// `notify` receives one message per completed operation. `capacity`
    /// bounds the completions buffered between flushes.
    ///
    /// Starts the tracker's forwarder thread.
    pub fn new(notify: Sender<()>, capacity: usize, translator: ErrorTranslator) -> Result<Self> {
        let (results, results_rx) = unbounded();
        let (completed_tx, completed_rx) = bounded(capacity.max(1));
        let forwarder = Forwarder {
            results: results_rx,
            completed_tx,
            notify,
            translator,
        };
        thread::Builder::new()
            .name("async-forwarder".to_string())
            .spawn(move || forwarder.run())
            .map_err(Error::other)?;
        Ok(Self {
            shared: Arc::new(Shared {
                handles: HandleRegistry::new(),
                results,
                completed_rx,
            }),
        })
    }

    /// Start an operation. Return the handle to the host and move the
    /// promise to the code producing the result.
    pub fn start(&self) -> Result<(AsyncHandle, Promise)> {
        let handle = self.shared.handles.allocate(())?;
        let slot = Some(self.shared.results.clone());
        Ok((handle, Promise { handle, slot }))
    }

    /// Remove and return every completed operation, oldest first. Never
    /// blocks.
    pub fn flush(&self) -> Vec<AsyncData> {
        let done: Vec<AsyncData> = self.shared.completed_rx.try_iter().collect();
        for data in &done {
            self.shared.handles.release(data.handle);
        }
        done
    }

    /// Number of operations started but not yet flushed.
    pub fn pending(&self) -> usize {
        self.shared.handles.len()
    }
}

impl fmt::Debug for Async {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Async")
            .field("pending", &self.pending())
            .field("completed", &self.shared.completed_rx.len())
            .finish()
    }
}

/// A notification channel that writes one byte to `w` per message.
///
/// `w` is typically a pipe from [`Env::open_pipe`] or a socket. Write
/// failures are logged and do not stop the writer.
pub fn notify_writer<W>(w: W) -> Sender<()>
where
    W: Write + Send + 'static,
{
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("async-notify".to_string())
        .spawn(move || poke(w, rx));
    if let Err(err) = spawned {
        warn!("can't start notifier: {}", err);
    }
    tx
}

/// A notification channel for the first client of `listener`.
///
/// Waits in the background for exactly one connection, closes the listener
/// and then behaves like [`notify_writer`]. Messages sent before the client
/// connects are delivered once it does.
pub fn notify_listener(listener: TcpListener) -> Sender<()> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("async-notify".to_string())
        .spawn(move || {
            let conn = accept_one(listener);
            poke(conn, rx);
        });
    if let Err(err) = spawned {
        warn!("can't start notifier: {}", err);
    }
    tx
}

fn accept_one(listener: TcpListener) -> std::net::TcpStream {
    loop {
        match listener.accept() {
            Ok((conn, peer)) => {
                debug!("notifier client connected from {}", peer);
                return conn;
            }
            Err(err) => warn!("error accepting notifier connection: {}", err),
        }
    }
}

fn poke<W: Write>(mut w: W, rx: Receiver<()>) {
    for () in rx.iter() {
        if let Err(err) = w.write_all(b".").and_then(|()| w.flush()) {
            warn!("can't write to notifier: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decode;
    use crate::error::ErrorSymbol;
    use crate::host::sandbox::Sandbox;
    use crossbeam_channel::RecvTimeoutError;
    use std::io::Read;
    use std::time::Duration;

    fn tracker(capacity: usize) -> (Async, Receiver<()>) {
        let (tx, rx) = unbounded();
        (Async::new(tx, capacity, ErrorTranslator::new("demo")).unwrap(), rx)
    }

    fn wait(notify: &Receiver<()>) {
        notify
            .recv_timeout(Duration::from_secs(5))
            .expect("no completion notification");
    }

    #[test]
    fn test_flush_delivers_each_handle_once() {
        let (tracker, notify) = tracker(4);
        let (first, p1) = tracker.start().unwrap();
        let (second, p2) = tracker.start().unwrap();
        assert_ne!(first, second);
        assert_eq!(tracker.pending(), 2);

        p1.succeed(1i64);
        wait(&notify);
        let done = tracker.flush();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].handle, first);
        assert_eq!(done[0].value(), Some(&Datum::Int(1)));
        assert!(tracker.flush().is_empty());

        p2.succeed("two");
        wait(&notify);
        let done = tracker.flush();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].handle, second);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_errors_are_reduced_to_signals() {
        let (tracker, notify) = tracker(4);
        let custom = ErrorSymbol::new("my-error", "My error");

        let (_, p) = tracker.start().unwrap();
        p.fail(custom.error(vec![Datum::Int(7)]));
        wait(&notify);
        let (_, p) = tracker.start().unwrap();
        p.fail(AsyncError::other("disk on fire"));
        wait(&notify);
        let (_, p) = tracker.start().unwrap();
        p.fail(Error::overflow(300));
        wait(&notify);

        let done = tracker.flush();
        let errors: Vec<_> = done.iter().map(|d| d.error().unwrap().clone()).collect();
        assert_eq!(errors[0].symbol, custom);
        assert_eq!(errors[0].data, vec![Datum::Int(7)]);
        assert_eq!(errors[1].symbol.name().as_str(), "demo-async-error");
        assert_eq!(errors[1].data, vec![Datum::Str("disk on fire".into())]);
        assert_eq!(errors[2].symbol.name().as_str(), "overflow-error");
    }

    #[test]
    fn test_dropped_promise_completes_with_error() {
        let (tracker, notify) = tracker(1);
        let (handle, promise) = tracker.start().unwrap();
        drop(promise);
        wait(&notify);
        let done = tracker.flush();
        assert_eq!(done[0].handle, handle);
        assert_eq!(
            done[0].error().unwrap().data,
            vec![Datum::Str("promise dropped without a result".into())]
        );
    }

    fn wait_for_forwarder_exit(notify: &Receiver<()>) {
        loop {
            match notify.recv_timeout(Duration::from_secs(5)) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => panic!("forwarder is still running"),
            }
        }
    }

    #[test]
    fn test_forwarder_exits_when_tracker_dropped_with_full_queue() {
        let (tracker, notify) = tracker(1);
        let promises: Vec<Promise> = (0..3).map(|_| tracker.start().unwrap().1).collect();
        for (i, p) in promises.into_iter().enumerate() {
            p.succeed(i as i64);
        }
        // One completion fills the queue; the forwarder blocks on the next.
        wait(&notify);
        assert_eq!(tracker.pending(), 3);
        drop(tracker);
        wait_for_forwarder_exit(&notify);
    }

    #[test]
    fn test_promise_outliving_its_tracker() {
        let (tracker, notify) = tracker(2);
        let (_, promise) = tracker.start().unwrap();
        drop(tracker);
        promise.succeed(1i64);
        wait_for_forwarder_exit(&notify);
    }

    #[test]
    fn test_idle_forwarder_exits_with_its_tracker() {
        let (tracker, notify) = tracker(2);
        let clone = tracker.clone();
        drop(tracker);
        assert!(notify.try_recv().is_err());
        drop(clone);
        wait_for_forwarder_exit(&notify);
    }

    #[test]
    fn test_promise_resolved_from_worker_thread() {
        let (tracker, notify) = tracker(2);
        let (handle, promise) = tracker.start().unwrap();
        thread::spawn(move || promise.succeed(Datum::List(vec![Datum::Bool(true)])))
            .join()
            .unwrap();
        wait(&notify);
        let done = tracker.flush();
        assert_eq!(done[0].handle, handle);
        assert_eq!(done[0].value(), Some(&Datum::List(vec![Datum::Bool(true)])));
    }

    #[test]
    fn test_encode_triples() {
        let ok = AsyncData {
            handle: 3,
            result: Ok(Datum::Str("x".into())),
        };
        let failed = AsyncData {
            handle: 4,
            result: Err(LispError {
                symbol: ErrorSymbol::new("my-error", "My error"),
                data: vec![Datum::Int(1), Datum::Int(2)],
            }),
        };
        let mut sandbox = Sandbox::new();
        let shown = sandbox.with_env(|env| {
            let ok = ok.encode(env)?;
            let failed = failed.encode(env)?;
            let ok = Datum::decode(env, ok)?;
            let failed = Datum::decode(env, failed)?;
            Ok::<_, Error>((ok.to_string(), failed.to_string()))
        });
        let (ok, failed) = shown.unwrap();
        assert_eq!(ok, "(3 \"x\" nil)");
        assert_eq!(failed, "(4 nil (my-error 1 2))");
    }

    #[test]
    fn test_notify_writer_writes_one_byte_per_message() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = notify_listener(listener);
        notify.send(()).unwrap();
        notify.send(()).unwrap();

        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"..");
    }
}
