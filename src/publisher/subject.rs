use std::{
    backtrace::Backtrace,
    collections::VecDeque,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

use futures::{Sink, Stream};

use super::{
    fanout::{Fanout, ListenerId},
    ErrorEvent, IllegalState, Publisher, SubjectError,
};

/// Event delivered to listeners. Completion is the end of the stream.
pub type Event<T, E> = Result<T, ErrorEvent<E>>;

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Which publish path currently owns the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Phase {
    Idle,
    Ingesting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookKind {
    Listen,
    Cancel,
}

pub(super) struct Core<T, E> {
    latest: Option<T>,
    pub(super) phase: Phase,
    fanout: Fanout<Event<T, E>>,
    done_wakers: Vec<Waker>,
    pending_hooks: VecDeque<HookKind>,
    dispatching_hooks: bool,
}

impl<T, E> Core<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Rejects direct publishing unless the subject is idle.
    pub(super) fn check_idle(&self, op: &'static str) -> Result<(), SubjectError> {
        let reason = match self.phase {
            Phase::Idle => return Ok(()),
            Phase::Ingesting => IllegalState::IngestionInProgress,
            Phase::Closed => IllegalState::Closed,
        };

        log::warn!("{} rejected: {}", op, reason);

        Err(reason.into())
    }

    pub(super) fn publish_value(&mut self, value: T) {
        log::trace!(
            "publish value to {} listener(s)",
            self.fanout.listener_count()
        );

        self.latest = Some(value.clone());
        self.fanout.broadcast(Ok(value));
    }

    pub(super) fn publish_error(&mut self, error: ErrorEvent<E>) {
        log::trace!(
            "publish error to {} listener(s)",
            self.fanout.listener_count()
        );

        self.fanout.broadcast(Err(error));
    }

    fn terminate(&mut self) {
        self.latest = None;
        self.phase = Phase::Closed;
        self.fanout.close();

        for waker in self.done_wakers.drain(..) {
            waker.wake();
        }
    }
}

struct Shared<T, E> {
    core: Mutex<Core<T, E>>,
    on_listen: Option<Hook>,
    on_cancel: Option<Hook>,
}

impl<T, E> Shared<T, E> {
    fn lock(&self) -> MutexGuard<'_, Core<T, E>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes a listener and fires `on_cancel` once the lock is released.
    fn detach(&self, id: ListenerId) {
        {
            let mut core = self.lock();

            if core.fanout.detach(id) && self.on_cancel.is_some() {
                core.pending_hooks.push_back(HookKind::Cancel);
            }
        }

        log::debug!("listener {} detached", id);

        self.dispatch_hooks();
    }

    /// Runs queued hooks outside the lock, in the order the listener count
    /// changed.
    ///
    /// One caller drains the queue at a time; a caller that finds a drain in
    /// progress leaves its entries to it. Hooks may therefore run on another
    /// thread than the one that attached or detached, but `on_listen` and
    /// `on_cancel` always alternate.
    fn dispatch_hooks(&self) {
        let mut core = self.lock();

        if core.dispatching_hooks {
            return;
        }

        core.dispatching_hooks = true;

        while let Some(kind) = core.pending_hooks.pop_front() {
            drop(core);

            let hook = match kind {
                HookKind::Listen => &self.on_listen,
                HookKind::Cancel => &self.on_cancel,
            };

            if let Some(hook) = hook {
                hook();
            }

            core = self.lock();
        }

        core.dispatching_hooks = false;
    }
}

/// Replaying multicast subject.
///
/// Keeps the latest published value and delivers it to every new listener
/// before any live event. Clones share the same subject.
pub struct BehaviorSubject<T, E> {
    inner: Arc<Shared<T, E>>,
}

impl<T, E> Clone for BehaviorSubject<T, E> {
    fn clone(&self) -> Self {
        BehaviorSubject {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> BehaviorSubject<T, E> {
    pub(super) fn lock(&self) -> MutexGuard<'_, Core<T, E>> {
        self.inner.lock()
    }
}

impl<T, E> Default for BehaviorSubject<T, E>
where
    T: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> BehaviorSubject<T, E>
where
    T: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn seeded(seed: T) -> Self {
        Self::builder().seed(seed).build()
    }

    pub fn builder() -> SubjectBuilder<T, E> {
        SubjectBuilder::default()
    }

    /// Caches `value` and broadcasts it to every attached listener.
    pub fn emit_value(&self, value: T) -> Result<(), SubjectError> {
        let mut core = self.lock();

        core.check_idle("emit_value")?;
        core.publish_value(value);

        Ok(())
    }

    /// Broadcasts `error` without touching the cached value.
    pub fn emit_error(&self, error: E) -> Result<(), SubjectError> {
        self.emit_error_event(ErrorEvent::new(error))
    }

    pub fn emit_error_with_trace(&self, error: E, trace: Backtrace) -> Result<(), SubjectError> {
        self.emit_error_event(ErrorEvent::with_trace(error, trace))
    }

    fn emit_error_event(&self, event: ErrorEvent<E>) -> Result<(), SubjectError> {
        let mut core = self.lock();

        core.check_idle("emit_error")?;
        core.publish_error(event);

        Ok(())
    }

    /// Clears the cache and completes every listener.
    ///
    /// Closing an already closed subject is a no-op. Fails while an ingestion
    /// is running.
    pub fn close(&self) -> Result<Done<T, E>, SubjectError> {
        {
            let mut core = self.lock();

            match core.phase {
                Phase::Idle => {
                    core.terminate();
                    log::debug!("subject closed");
                }
                Phase::Closed => {}
                Phase::Ingesting => {
                    log::warn!("close rejected: {}", IllegalState::IngestionInProgress);
                    return Err(IllegalState::IngestionInProgress.into());
                }
            }
        }

        Ok(self.done())
    }

    /// Attach a new listener.
    ///
    /// The cached value, if any, is the first item of the returned stream.
    /// Subscribing to a closed subject yields a stream that ends immediately.
    pub fn subscribe(&self) -> SubjectStream<T, E> {
        let id = {
            let mut core = self.lock();

            if core.fanout.is_closed() {
                return SubjectStream {
                    inner: self.inner.clone(),
                    id: None,
                };
            }

            let replay = core.latest.clone().map(Ok);
            let (id, first) = core.fanout.attach(replay);

            if first && self.inner.on_listen.is_some() {
                core.pending_hooks.push_back(HookKind::Listen);
            }

            id
        };

        log::debug!("listener {} attached", id);

        self.inner.dispatch_hooks();

        SubjectStream {
            inner: self.inner.clone(),
            id: Some(id),
        }
    }

    /// The cached value, if present.
    pub fn value(&self) -> Option<T> {
        self.lock().latest.clone()
    }

    pub fn has_value(&self) -> bool {
        self.lock().latest.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().phase == Phase::Closed
    }

    pub fn is_ingesting(&self) -> bool {
        self.lock().phase == Phase::Ingesting
    }

    pub fn has_any_listener(&self) -> bool {
        self.listener_count() > 0
    }

    pub fn listener_count(&self) -> usize {
        self.lock().fanout.listener_count()
    }

    /// Future resolving once the subject is closed.
    pub fn done(&self) -> Done<T, E> {
        Done {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Publisher for BehaviorSubject<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = T;

    type Failure = E;

    type Stream = SubjectStream<T, E>;

    fn subscribe(&self) -> Self::Stream {
        BehaviorSubject::subscribe(self)
    }
}

impl<T, E> Sink<T> for BehaviorSubject<T, E>
where
    T: Clone,
    E: Clone,
{
    type Error = SubjectError;

    fn start_send(self: Pin<&mut Self>, item: T) -> Result<(), Self::Error> {
        self.emit_value(item)
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(BehaviorSubject::close(&self).map(|_| ()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Configures a [`BehaviorSubject`] before it is built.
pub struct SubjectBuilder<T, E> {
    seed: Option<T>,
    on_listen: Option<Hook>,
    on_cancel: Option<Hook>,
    _failure: PhantomData<fn() -> E>,
}

impl<T, E> Default for SubjectBuilder<T, E> {
    fn default() -> Self {
        SubjectBuilder {
            seed: None,
            on_listen: None,
            on_cancel: None,
            _failure: PhantomData,
        }
    }
}

impl<T, E> SubjectBuilder<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Initial cached value.
    pub fn seed(mut self, seed: T) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Called when the listener count goes from zero to one.
    ///
    /// Listen and cancel hooks always alternate, even when listeners come
    /// and go on different threads.
    pub fn on_listen<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_listen = Some(Arc::new(f));
        self
    }

    /// Called when the listener count drops back to zero.
    pub fn on_cancel<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_cancel = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> BehaviorSubject<T, E> {
        BehaviorSubject {
            inner: Arc::new(Shared {
                core: Mutex::new(Core {
                    latest: self.seed,
                    phase: Phase::Idle,
                    fanout: Fanout::new(),
                    done_wakers: vec![],
                    pending_hooks: VecDeque::new(),
                    dispatching_hooks: false,
                }),
                on_listen: self.on_listen,
                on_cancel: self.on_cancel,
            }),
        }
    }
}

/// Listener side of a [`BehaviorSubject`].
///
/// Dropping the stream detaches the listener.
pub struct SubjectStream<T, E> {
    inner: Arc<Shared<T, E>>,
    id: Option<ListenerId>,
}

impl<T, E> SubjectStream<T, E> {
    /// Flow control is not supported; always fails.
    pub fn pause(&mut self) -> Result<(), SubjectError> {
        log::warn!("pause rejected on listener {:?}", self.id);
        Err(SubjectError::Unsupported("pause"))
    }

    /// Flow control is not supported; always fails.
    pub fn resume(&mut self) -> Result<(), SubjectError> {
        log::warn!("resume rejected on listener {:?}", self.id);
        Err(SubjectError::Unsupported("resume"))
    }

    pub fn is_attached(&self) -> bool {
        self.id.is_some()
    }
}

impl<T, E> Stream for SubjectStream<T, E>
where
    T: Clone,
    E: Clone,
{
    type Item = Event<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let id = match this.id {
            Some(id) => id,
            None => return Poll::Ready(None),
        };

        let polled = this.inner.lock().fanout.poll_listener(id, cx.waker());

        if let Poll::Ready(None) = polled {
            this.id = None;
            this.inner.detach(id);
        }

        polled
    }
}

impl<T, E> Drop for SubjectStream<T, E> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.inner.detach(id);
        }
    }
}

/// Resolves once the subject has been closed.
pub struct Done<T, E> {
    inner: Arc<Shared<T, E>>,
}

impl<T, E> Future for Done<T, E> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut core = self.inner.lock();

        if core.phase == Phase::Closed {
            return Poll::Ready(());
        }

        let waker = cx.waker();

        if !core.done_wakers.iter().any(|w| w.will_wake(waker)) {
            core.done_wakers.push(waker.clone());
        }

        Poll::Pending
    }
}
