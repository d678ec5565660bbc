//! Polling With Timeout
//!
//! The one loop every verification in the harness goes through:
//!
//! ```text
//! start = now
//! while elapsed < timeout:
//!     sleep(interval)
//!     if condition.check()?: return true
//! return false
//! ```
//!
//! Two things get polled, both behind [`PollCondition`]:
//!
//! - [`EventMatch`]: drains a callback subscription and looks for an event whose
//!   payload field equals an expected string. Only the first match in a batch
//!   counts; the rest of the batch is dropped.
//! - [`StateMatch`]: calls an async getter and compares it with a target value.
//!
//! [`wait_for_event`] reports a timeout as `Ok(false)`: callers probing for a
//! state that may never come decide for themselves whether that is fatal.
//! [`wait_for_state`] treats a timeout as `HilError::Timeout`. Errors from the
//! device are returned immediately and never retried.
//!
//! # Subscription ownership
//!
//! [`with_subscription`] registers a callback under a fresh UUID key, runs a body
//! with the handle and unregisters it afterwards whether the body matched, timed
//! out, failed or panicked. A cancelled wait releases it in the background. A
//! subscription passed in by a caller is never released here. Events that were
//! buffered on a reused subscription before the wait began are matched like
//! fresh ones; call [`discard_pending_events`] first when that would give a
//! false positive.

use crate::error::HilError;
use crate::hardware::{CallbackSource, SubscriptionHandle};
use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default time budget for a single wait
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Sleep between drains of a callback subscription
pub const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep between reads of a polled state
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Time budget for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Give up once this much time has passed
    pub timeout: Duration,
    /// Sleep before every check
    pub interval: Duration,
}

impl PollSettings {
    /// Create settings with explicit timeout and interval
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// 3 s budget checked every 100 ms
    pub const fn events() -> Self {
        Self::new(DEFAULT_TIMEOUT, EVENT_POLL_INTERVAL)
    }

    /// 3 s budget checked every 500 ms
    pub const fn states() -> Self {
        Self::new(DEFAULT_TIMEOUT, STATE_POLL_INTERVAL)
    }

    /// Same interval, different timeout
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self::new(timeout, self.interval)
    }

    /// Check the interval is positive and shorter than the timeout
    pub fn validate(&self) -> Result<(), String> {
        if self.interval.is_zero() {
            return Err("poll interval must be positive".to_string());
        }
        if self.interval >= self.timeout {
            return Err(format!(
                "poll interval {:?} must be shorter than timeout {:?}",
                self.interval, self.timeout
            ));
        }
        Ok(())
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::events()
    }
}

/// Something that can be checked repeatedly until it holds.
#[async_trait]
pub trait PollCondition: Send {
    /// One check. `Ok(true)` stops the wait.
    async fn check(&mut self) -> Result<bool>;

    /// Human-readable description for logs and timeout errors
    fn describe(&self) -> String;
}

/// Run `condition` until it holds or `settings.timeout` elapses.
///
/// Returns `Ok(false)` on timeout, no earlier than `timeout` and no later than
/// `timeout + interval` after the call.
pub async fn poll_until<C>(condition: &mut C, settings: PollSettings) -> Result<bool>
where
    C: PollCondition + ?Sized,
{
    let start = Instant::now();
    while start.elapsed() < settings.timeout {
        sleep(settings.interval).await;
        if condition.check().await? {
            debug!(
                condition = %condition.describe(),
                elapsed_s = start.elapsed().as_secs_f64(),
                "Condition met"
            );
            return Ok(true);
        }
    }
    debug!(
        condition = %condition.describe(),
        timeout = ?settings.timeout,
        "Condition not met before timeout"
    );
    Ok(false)
}

// =============================================================================
// EventMatch - buffered callback events
// =============================================================================

/// Matches the first drained event whose `field` equals `expected`.
pub struct EventMatch<'a, S: CallbackSource + ?Sized> {
    source: &'a S,
    handle: &'a SubscriptionHandle,
    field: &'a str,
    expected: &'a str,
}

impl<'a, S: CallbackSource + ?Sized> EventMatch<'a, S> {
    /// Match `field == expected` on events of `handle`'s channel
    pub fn new(
        source: &'a S,
        handle: &'a SubscriptionHandle,
        field: &'a str,
        expected: &'a str,
    ) -> Self {
        Self {
            source,
            handle,
            field,
            expected,
        }
    }
}

#[async_trait]
impl<S: CallbackSource + ?Sized> PollCondition for EventMatch<'_, S> {
    async fn check(&mut self) -> Result<bool> {
        let events = self
            .source
            .drain_events(self.handle, &self.handle.channel)
            .await?;
        for event in events {
            let received = event.field(self.field);
            debug!(key = %self.handle.key, ?received, "Received event");
            if received == Some(self.expected) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn describe(&self) -> String {
        format!(
            "{} event with {}={}",
            self.handle.channel, self.field, self.expected
        )
    }
}

/// Wait for an event on a subscription the caller already owns.
///
/// The subscription is left registered.
pub async fn wait_for_event<S>(
    source: &S,
    handle: &SubscriptionHandle,
    field: &str,
    expected: &str,
    settings: PollSettings,
) -> Result<bool>
where
    S: CallbackSource + ?Sized,
{
    let mut condition = EventMatch::new(source, handle, field, expected);
    poll_until(&mut condition, settings).await
}

/// Drop everything buffered on `handle` so a following wait only sees new events.
///
/// Returns how many events were discarded.
pub async fn discard_pending_events<S>(source: &S, handle: &SubscriptionHandle) -> Result<usize>
where
    S: CallbackSource + ?Sized,
{
    let stale = source.drain_events(handle, &handle.channel).await?;
    if !stale.is_empty() {
        debug!(key = %handle.key, count = stale.len(), "Discarded stale events");
    }
    Ok(stale.len())
}

// =============================================================================
// StateMatch - synchronous getters
// =============================================================================

/// Matches when an async getter returns `target`.
pub struct StateMatch<G, T> {
    what: String,
    getter: G,
    target: T,
    last: Option<T>,
}

impl<G, Fut, T> StateMatch<G, T>
where
    G: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
    T: PartialEq + Debug + Send + Sync,
{
    /// Match when `getter()` returns `target`
    pub fn new(what: impl Into<String>, getter: G, target: T) -> Self {
        Self {
            what: what.into(),
            getter,
            target,
            last: None,
        }
    }

    /// Last value the getter returned
    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }
}

#[async_trait]
impl<G, Fut, T> PollCondition for StateMatch<G, T>
where
    G: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
    T: PartialEq + Debug + Send + Sync,
{
    async fn check(&mut self) -> Result<bool> {
        let value = (self.getter)().await?;
        let matched = value == self.target;
        self.last = Some(value);
        Ok(matched)
    }

    fn describe(&self) -> String {
        format!("{} (target {:?}, last {:?})", self.what, self.target, self.last)
    }
}

/// Poll `getter` until it returns `target`; a timeout is an error.
///
/// # Errors
/// - `HilError::Timeout` (inside the `anyhow::Error`) if the value never converged
/// - Any error returned by the getter, unchanged
pub async fn wait_for_state<G, Fut, T>(
    what: &str,
    getter: G,
    target: T,
    settings: PollSettings,
) -> Result<()>
where
    G: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
    T: PartialEq + Debug + Send + Sync,
{
    let start = Instant::now();
    let mut condition = StateMatch::new(what, getter, target);
    if poll_until(&mut condition, settings).await? {
        return Ok(());
    }
    Err(HilError::Timeout {
        what: condition.describe(),
        elapsed: start.elapsed(),
    }
    .into())
}

// =============================================================================
// Scoped subscriptions
// =============================================================================

/// Fresh registration key for `channel`
pub fn unique_key(channel: &str) -> String {
    format!("{channel}-{}", Uuid::new_v4().simple())
}

/// Keeps a scoped subscription alive until it is released
///
/// Dropped while still armed (the wait was cancelled before it could release),
/// it hands the handle to [`CallbackSource::release_detached`].
struct ReleaseGuard<'a, S: CallbackSource + ?Sized> {
    source: &'a S,
    handle: Option<SubscriptionHandle>,
}

impl<'a, S: CallbackSource + ?Sized> ReleaseGuard<'a, S> {
    fn new(source: &'a S, handle: SubscriptionHandle) -> Self {
        Self {
            source,
            handle: Some(handle),
        }
    }

    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl<S: CallbackSource + ?Sized> Drop for ReleaseGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(key = %handle.key, "Wait abandoned, releasing subscription in the background");
            self.source.release_detached(handle);
        }
    }
}

/// Register a callback on `channel`, run `body` with it, then unregister it.
///
/// The unregister call runs exactly once on every exit path. A panic in `body`
/// is re-raised after the release. If both `body` and the release fail, the
/// body's error is returned and the release error is logged. If the returned
/// future is dropped before it completes, the release is scheduled on the
/// runtime instead.
pub async fn with_subscription<S, F, Fut, T>(source: &S, channel: &str, body: F) -> Result<T>
where
    S: CallbackSource + ?Sized,
    F: FnOnce(SubscriptionHandle) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let key = unique_key(channel);
    let handle = source.register_callback(channel, &key).await?;
    debug!(%key, callback_id = %handle.callback_id, "Subscription created");
    let mut guard = ReleaseGuard::new(source, handle.clone());

    let owned = handle.clone();
    let outcome = AssertUnwindSafe(async move { body(owned).await })
        .catch_unwind()
        .await;
    let released = source.unregister_callback(&handle).await;
    guard.disarm();
    debug!(%key, released = released.is_ok(), "Subscription released");

    match (outcome, released) {
        (Err(panic), _) => std::panic::resume_unwind(panic),
        (Ok(Err(err)), Err(release_err)) => {
            warn!(%key, error = %release_err, "Failed to release subscription");
            Err(err)
        }
        (Ok(Ok(_)), Err(release_err)) => Err(release_err),
        (Ok(result), Ok(())) => result,
    }
}
