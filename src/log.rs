//! Per-request lifecycle log.
//!
//! A [`RequestLog`] records what happened to one request and lets decorators
//! observe it without sitting on the request's data path. Fields are grouped
//! by [`Milestone`]; once a milestone is reached its fields are frozen and
//! every listener registered for it is queued, in registration order.
//!
//! # Where listeners run
//!
//! Each log owns a small serial executor: a tokio task, spawned when the log
//! is created, draining an unbounded queue. Listeners therefore never run on
//! the stack of the code that registered them or reached the milestone, and
//! the handler may well return before they do. Because the queue is FIFO,
//! listeners of an earlier milestone always run before listeners of a later
//! one.
//!
//! ```text
//!  add_listener(RequestEnd, f) ──► slot[RequestEnd].pending = [f]
//!  end_request()               ──► slot reached, f queued ──► executor: f(&log)
//!  add_listener(RequestEnd, g) ──► already reached, g queued ──► executor: g(&log)
//! ```
//!
//! A listener that fails or panics is reported to the log's [`ErrorReporter`]
//! and otherwise ignored: other listeners and the request are unaffected.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use http::{HeaderMap, Method, StatusCode, Uri, Version};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, Span, debug, trace, warn};

use crate::content::Content;
use crate::error::{BoxError, HandlerError, ListenerError};

/// A point in a request's lifecycle after which some fields are frozen.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Milestone {
    /// The request was fully sent or received: headers, content, trailers.
    RequestEnd,
    /// The response status and headers are known. Optional.
    ResponseStart,
    /// The exchange finished, successfully or not. Always reached, exactly once.
    Complete,
}

impl Milestone {
    const ALL: [Milestone; 3] = [Self::RequestEnd, Self::ResponseStart, Self::Complete];

    fn index(self) -> usize {
        match self {
            Self::RequestEnd => 0,
            Self::ResponseStart => 1,
            Self::Complete => 2,
        }
    }
}

// ── Error reporting ───────────────────────────────────────────────────────────

/// Diagnostic sink for listener failures.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, milestone: Milestone, error: &ListenerError);
}

/// Default reporter: one `warn!` event per failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, milestone: Milestone, error: &ListenerError) {
        warn!(?milestone, %error, "lifecycle listener failed");
    }
}

// ── RequestLog ────────────────────────────────────────────────────────────────

type Listener = Box<dyn FnOnce(&Arc<RequestLog>) -> Result<(), BoxError> + Send>;

struct Job {
    log: Arc<RequestLog>,
    milestone: Milestone,
    listener: Listener,
}

/// Immutable facts known when the request starts.
#[derive(Clone, Debug)]
pub(crate) struct RequestHead {
    pub(crate) id: u64,
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) serialization_format: Option<String>,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) local_addr: Option<SocketAddr>,
}

#[derive(Default)]
struct Fields {
    request_headers: Option<HeaderMap>,
    request_content: Option<Content>,
    request_trailers: Option<HeaderMap>,
    request_end: Option<Instant>,
    status: Option<StatusCode>,
    response_headers: Option<HeaderMap>,
    response_start: Option<Instant>,
    response_content: Option<Content>,
    response_trailers: Option<HeaderMap>,
    cause: Option<HandlerError>,
    complete: Option<Instant>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum SlotState {
    #[default]
    Pending,
    Reached,
    /// A later milestone was reached first; this one never fires.
    Skipped,
}

#[derive(Default)]
struct Slot {
    state: SlotState,
    pending: Vec<Listener>,
}

#[derive(Default)]
struct State {
    fields: Fields,
    slots: [Slot; 3],
}

/// The lifecycle record of one request.
///
/// Shared through an `Arc`: the request context owns one reference, queued
/// listeners hold others until they have run.
pub struct RequestLog {
    head: RequestHead,
    started_at: Instant,
    state: Mutex<State>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl RequestLog {
    /// Creates the log and spawns its listener executor on `runtime`. The
    /// executor runs inside the span that is current here.
    pub(crate) fn new(head: RequestHead, reporter: Arc<dyn ErrorReporter>, runtime: &Handle) -> Arc<Self> {
        let (jobs, queue) = mpsc::unbounded_channel();
        runtime.spawn(run_listeners(queue, reporter).instrument(Span::current()));

        Arc::new(Self {
            head,
            started_at: Instant::now(),
            state: Mutex::new(State::default()),
            jobs,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Listeners ─────────────────────────────────────────────────────────────

    /// Runs `listener` once `milestone` is reached.
    ///
    /// Never blocks. If the milestone was already reached the listener is
    /// queued right away; if it was skipped the listener is dropped. The
    /// listener gets the shared log, so it may register further listeners.
    pub fn add_listener<F>(self: &Arc<Self>, milestone: Milestone, listener: F)
    where
        F: FnOnce(&Arc<RequestLog>) -> Result<(), BoxError> + Send + 'static,
    {
        let mut state = self.lock();
        let slot = &mut state.slots[milestone.index()];
        match slot.state {
            SlotState::Pending => slot.pending.push(Box::new(listener)),
            SlotState::Reached => self.enqueue(milestone, Box::new(listener)),
            SlotState::Skipped => {
                trace!(id = self.head.id, ?milestone, "milestone skipped; dropping listener");
            }
        }
    }

    /// Infallible shorthand for [`add_listener`](Self::add_listener).
    pub fn on<F>(self: &Arc<Self>, milestone: Milestone, listener: F)
    where
        F: FnOnce(&Arc<RequestLog>) + Send + 'static,
    {
        self.add_listener(milestone, move |log| {
            listener(log);
            Ok(())
        });
    }

    /// Resolves once `milestone`'s listeners have been queued and this one
    /// has run. Resolves to `false` if the milestone was skipped.
    pub async fn reached(self: &Arc<Self>, milestone: Milestone) -> bool {
        let (tx, rx) = oneshot::channel();
        self.on(milestone, move |_| {
            let _ = tx.send(());
        });
        rx.await.is_ok()
    }

    /// Listeners waiting for `milestone`.
    pub fn pending_listeners(&self, milestone: Milestone) -> usize {
        self.lock().slots[milestone.index()].pending.len()
    }

    pub fn is_reached(&self, milestone: Milestone) -> bool {
        self.lock().slots[milestone.index()].state == SlotState::Reached
    }

    fn enqueue(self: &Arc<Self>, milestone: Milestone, listener: Listener) {
        let job = Job { log: Arc::clone(self), milestone, listener };
        if self.jobs.send(job).is_err() {
            warn!(id = self.head.id, ?milestone, "listener executor is gone; dropping listener");
        }
    }

    /// Marks `milestone` reached and queues its listeners. Earlier milestones
    /// still pending are skipped, or reached first when `implied` says so.
    fn reach(self: &Arc<Self>, state: &mut State, milestone: Milestone, implied: &[Milestone]) -> bool {
        if state.slots[milestone.index()].state != SlotState::Pending {
            return false;
        }

        for earlier in Milestone::ALL.into_iter().take(milestone.index()) {
            let slot = &mut state.slots[earlier.index()];
            if slot.state != SlotState::Pending {
                continue;
            }
            if implied.contains(&earlier) {
                self.fire(slot, earlier);
            } else {
                slot.state = SlotState::Skipped;
                let dropped = std::mem::take(&mut slot.pending).len();
                trace!(id = self.head.id, milestone = ?earlier, dropped, "milestone skipped");
            }
        }

        let slot = &mut state.slots[milestone.index()];
        self.fire(slot, milestone);
        true
    }

    fn fire(self: &Arc<Self>, slot: &mut Slot, milestone: Milestone) {
        slot.state = SlotState::Reached;
        let pending = std::mem::take(&mut slot.pending);
        debug!(id = self.head.id, ?milestone, listeners = pending.len(), "milestone reached");
        for listener in pending {
            self.enqueue(milestone, listener);
        }
    }

    // ── Milestones ────────────────────────────────────────────────────────────

    /// Reaches [`Milestone::RequestEnd`]. Returns `false` if it already was.
    pub fn end_request(self: &Arc<Self>) -> bool {
        let mut state = self.lock();
        if state.slots[Milestone::RequestEnd.index()].state == SlotState::Pending {
            state.fields.request_end = Some(Instant::now());
        }
        self.reach(&mut state, Milestone::RequestEnd, &[])
    }

    /// Records the response status and headers and reaches
    /// [`Milestone::ResponseStart`]. Ends the request first if needed.
    pub fn start_response(self: &Arc<Self>, status: StatusCode, headers: HeaderMap) -> bool {
        let mut state = self.lock();
        if state.slots[Milestone::ResponseStart.index()].state != SlotState::Pending {
            return false;
        }
        let now = Instant::now();
        state.fields.request_end.get_or_insert(now);
        state.fields.status = Some(status);
        state.fields.response_headers = Some(headers);
        state.fields.response_start = Some(now);
        self.reach(&mut state, Milestone::ResponseStart, &[Milestone::RequestEnd])
    }

    /// Reaches [`Milestone::Complete`], exactly once per request.
    ///
    /// On success an unfinished request is ended first. With a `cause`, any
    /// milestone not reached yet is skipped and its listeners never run.
    pub fn end_response(self: &Arc<Self>, cause: Option<HandlerError>) -> bool {
        let mut state = self.lock();
        if state.slots[Milestone::Complete.index()].state != SlotState::Pending {
            return false;
        }
        state.fields.complete = Some(Instant::now());
        let implied: &[Milestone] = match cause {
            None => &[Milestone::RequestEnd],
            Some(cause) => {
                debug!(id = self.head.id, %cause, "request failed");
                state.fields.cause = Some(cause);
                &[]
            }
        };
        if implied.contains(&Milestone::RequestEnd) {
            let completed = state.fields.complete;
            state.fields.request_end = state.fields.request_end.or(completed);
        }
        self.reach(&mut state, Milestone::Complete, implied)
    }

    // ── Writers ───────────────────────────────────────────────────────────────

    /// Writes a field once, unless its milestone is already reached.
    fn record<T>(
        &self,
        milestone: Milestone,
        name: &'static str,
        value: T,
        field: fn(&mut Fields) -> &mut Option<T>,
    ) -> bool {
        let mut state = self.lock();
        if state.slots[milestone.index()].state != SlotState::Pending {
            trace!(id = self.head.id, field = name, ?milestone, "field is frozen; ignoring write");
            return false;
        }
        let slot = field(&mut state.fields);
        if slot.is_some() {
            trace!(id = self.head.id, field = name, "field already recorded; ignoring write");
            return false;
        }
        *slot = Some(value);
        true
    }

    pub fn set_request_headers(&self, headers: HeaderMap) -> bool {
        self.record(Milestone::RequestEnd, "request_headers", headers, |f| &mut f.request_headers)
    }

    pub fn set_request_content(&self, content: Content) -> bool {
        self.record(Milestone::RequestEnd, "request_content", content, |f| &mut f.request_content)
    }

    pub fn set_request_trailers(&self, trailers: HeaderMap) -> bool {
        self.record(Milestone::RequestEnd, "request_trailers", trailers, |f| &mut f.request_trailers)
    }

    pub fn set_response_content(&self, content: Content) -> bool {
        self.record(Milestone::Complete, "response_content", content, |f| &mut f.response_content)
    }

    pub fn set_response_trailers(&self, trailers: HeaderMap) -> bool {
        self.record(Milestone::Complete, "response_trailers", trailers, |f| &mut f.response_trailers)
    }

    // ── Readers ───────────────────────────────────────────────────────────────

    /// Reads a field, but only once its milestone has been reached.
    fn read<T: Clone>(&self, milestone: Milestone, field: fn(&Fields) -> &Option<T>) -> Option<T> {
        let state = self.lock();
        if state.slots[milestone.index()].state != SlotState::Reached {
            return None;
        }
        field(&state.fields).clone()
    }

    pub fn id(&self) -> u64 { self.head.id }
    pub fn method(&self) -> &Method { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn version(&self) -> Version { self.head.version }
    pub fn serialization_format(&self) -> Option<&str> { self.head.serialization_format.as_deref() }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.head.remote_addr }
    pub fn local_addr(&self) -> Option<SocketAddr> { self.head.local_addr }

    pub fn request_headers(&self) -> Option<HeaderMap> {
        self.read(Milestone::RequestEnd, |f| &f.request_headers)
    }

    pub fn request_content(&self) -> Option<Content> {
        self.read(Milestone::RequestEnd, |f| &f.request_content)
    }

    pub fn request_trailers(&self) -> Option<HeaderMap> {
        self.read(Milestone::RequestEnd, |f| &f.request_trailers)
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.read(Milestone::ResponseStart, |f| &f.status)
    }

    pub fn response_headers(&self) -> Option<HeaderMap> {
        self.read(Milestone::ResponseStart, |f| &f.response_headers)
    }

    pub fn response_content(&self) -> Option<Content> {
        self.read(Milestone::Complete, |f| &f.response_content)
    }

    pub fn response_trailers(&self) -> Option<HeaderMap> {
        self.read(Milestone::Complete, |f| &f.response_trailers)
    }

    pub fn cause(&self) -> Option<HandlerError> {
        self.read(Milestone::Complete, |f| &f.cause)
    }

    /// Time from the start of the request until the request ended.
    pub fn request_duration(&self) -> Option<Duration> {
        let end = self.read(Milestone::RequestEnd, |f| &f.request_end)?;
        Some(end.saturating_duration_since(self.started_at))
    }

    /// Time from the start of the request until it completed.
    pub fn total_duration(&self) -> Option<Duration> {
        let end = self.read(Milestone::Complete, |f| &f.complete)?;
        Some(end.saturating_duration_since(self.started_at))
    }
}

impl fmt::Debug for RequestLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reached: Vec<_> = Milestone::ALL.into_iter().filter(|m| self.is_reached(*m)).collect();
        f.debug_struct("RequestLog")
            .field("head", &self.head)
            .field("reached", &reached)
            .finish_non_exhaustive()
    }
}

// ── Executor ──────────────────────────────────────────────────────────────────

async fn run_listeners(mut queue: mpsc::UnboundedReceiver<Job>, reporter: Arc<dyn ErrorReporter>) {
    while let Some(Job { log, milestone, listener }) = queue.recv().await {
        let error = match panic::catch_unwind(AssertUnwindSafe(|| listener(&log))) {
            Ok(Ok(())) => continue,
            Ok(Err(source)) => ListenerError::Failed(source),
            Err(payload) => ListenerError::Panicked(panic_message(&*payload)),
        };
        if panic::catch_unwind(AssertUnwindSafe(|| reporter.report(milestone, &error))).is_err() {
            warn!(id = log.id(), ?milestone, %error, "error reporter panicked");
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
