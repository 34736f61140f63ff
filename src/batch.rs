//! Sequential batch updates with rate-limit backoff.
//!
//! `BatchUpdater` applies the same update to an ordered list of resource
//! IDs, one at a time. When the manager answers with a rate-limit failure
//! the same item is retried after an exponential delay of
//! `2^(retry + 3)` milliseconds (16ms, 32ms, 64ms, ...). The retry counter is
//! per item and resets after every success.
//!
//! Any other failure, or an item that is still rate limited after
//! [`MAX_RETRIES`] retries, aborts the whole batch. Updates that already
//! went through are not rolled back; the error carries the IDs that were
//! updated before the abort.
//!
//! # Example
//!
//! ```ignore
//! let updater = BatchUpdater::new(ResourceUpdater::new(client, ResourceKind::Computers));
//! match updater.run(&[101, 102, 103], &ComputerPatch::with_policy(7)).await {
//!     Ok(done) => println!("updated {:?}", done),
//!     Err(e) => println!("stopped after {:?}: {}", e.completed(), e),
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Maximum number of retries for a single rate-limited item.
pub const MAX_RETRIES: u32 = 10;

/// Exponent offset of the backoff formula: the first retry waits 2^4 ms.
const BASE_EXPONENT: u32 = 3;

/// How a failed update should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The manager refused the call because of its API rate limit.
    RateLimited {
        /// Delay suggested by the manager, if it sent one.
        retry_after: Option<Duration>,
    },
    /// Anything else. Never retried.
    Other,
}

/// Classifies an error for the retry loop.
pub trait Classify {
    /// Returns the failure kind of this error.
    fn kind(&self) -> FailureKind;
}

/// A remote operation that applies one update to one resource.
///
/// Implementations perform exactly one call per invocation and must not
/// retry on their own; `BatchUpdater` owns the retry policy.
pub trait UpdateTarget<Id: ?Sized, P: ?Sized> {
    /// Error returned by a failed call.
    type Error: Classify;

    /// Applies `payload` to the resource identified by `id`.
    fn apply_update(
        &self,
        id: &Id,
        payload: &P,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Backoff schedule for rate-limited items.
///
/// The default follows `2^(retry + 3)` ms with [`MAX_RETRIES`] retries,
/// no upper bound on a single delay, and ignores `Retry-After` hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    max_retries: u32,
    max_delay: Option<Duration>,
    honor_retry_after: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            max_delay: None,
            honor_retry_after: false,
        }
    }
}

impl Backoff {
    /// Creates the default schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retries allowed per item.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Caps every individual delay at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// When enabled, waits at least as long as the manager's `Retry-After`.
    pub fn honor_retry_after(mut self, honor: bool) -> Self {
        self.honor_retry_after = honor;
        self
    }

    /// Number of retries allowed per item.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = retry.saturating_add(BASE_EXPONENT).min(63);
        let mut delay = Duration::from_millis(1u64 << exponent);

        if self.honor_retry_after {
            if let Some(hint) = retry_after {
                delay = delay.max(hint);
            }
        }
        if let Some(cap) = self.max_delay {
            delay = delay.min(cap);
        }
        delay
    }
}

/// Why a batch stopped before the last item.
///
/// Both variants keep the IDs that were successfully updated, in order.
#[derive(Debug, Error)]
pub enum BatchError<Id, E>
where
    Id: fmt::Debug + fmt::Display,
    E: std::error::Error + 'static,
{
    /// An update failed and was not (or no longer) retryable.
    #[error("batch aborted at {failed_id} after {} successful update(s): {source}", .completed.len())]
    Aborted {
        /// The item whose update failed.
        failed_id: Id,
        /// Items updated before the failure.
        completed: Vec<Id>,
        /// Calls made for the failed item, including the last one.
        attempts: u32,
        /// The final error from the remote call.
        #[source]
        source: E,
    },

    /// The cancellation token fired while waiting to retry.
    #[error("batch cancelled at {failed_id} after {} successful update(s)", .completed.len())]
    Cancelled {
        /// The item that was waiting for a retry.
        failed_id: Id,
        /// Items updated before cancellation.
        completed: Vec<Id>,
    },
}

impl<Id, E> BatchError<Id, E>
where
    Id: fmt::Debug + fmt::Display,
    E: std::error::Error + 'static,
{
    /// IDs updated before the batch stopped.
    pub fn completed(&self) -> &[Id] {
        match self {
            BatchError::Aborted { completed, .. } | BatchError::Cancelled { completed, .. } => {
                completed
            }
        }
    }

    /// The item the batch stopped at.
    pub fn failed_id(&self) -> &Id {
        match self {
            BatchError::Aborted { failed_id, .. } | BatchError::Cancelled { failed_id, .. } => {
                failed_id
            }
        }
    }

    /// Consumes the error and returns the completed prefix.
    pub fn into_completed(self) -> Vec<Id> {
        match self {
            BatchError::Aborted { completed, .. } | BatchError::Cancelled { completed, .. } => {
                completed
            }
        }
    }
}

/// Applies one update to many resources, strictly in order.
pub struct BatchUpdater<T> {
    target: T,
    backoff: Backoff,
    cancel: Option<CancellationToken>,
}

impl<T> BatchUpdater<T> {
    /// Creates an updater with the default backoff and no cancellation.
    pub fn new(target: T) -> Self {
        Self {
            target,
            backoff: Backoff::default(),
            cancel: None,
        }
    }

    /// Replaces the backoff schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Aborts the batch if `token` is cancelled during a backoff delay.
    ///
    /// An in-flight call is never interrupted.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The wrapped update target.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Updates every item in `ids` with `payload`.
    ///
    /// Returns the updated IDs (equal to `ids` on success). An empty slice
    /// makes no remote calls.
    pub async fn run<Id, P>(
        &self,
        ids: &[Id],
        payload: &P,
    ) -> Result<Vec<Id>, BatchError<Id, T::Error>>
    where
        T: UpdateTarget<Id, P>,
        T::Error: std::error::Error + 'static,
        Id: Clone + fmt::Debug + fmt::Display,
        P: ?Sized,
    {
        tracing::info!(items = ids.len(), "Starting batch update");

        let mut completed = Vec::with_capacity(ids.len());

        for id in ids {
            let mut retries = 0u32;

            loop {
                let error = match self.target.apply_update(id, payload).await {
                    Ok(()) => {
                        tracing::debug!(id = %id, retries, "Update applied");
                        completed.push(id.clone());
                        break;
                    }
                    Err(e) => e,
                };

                match error.kind() {
                    FailureKind::RateLimited { retry_after }
                        if retries < self.backoff.max_retries() =>
                    {
                        retries += 1;
                        let delay = self.backoff.delay_for(retries, retry_after);

                        tracing::warn!(
                            id = %id,
                            retry = retries,
                            max_retries = self.backoff.max_retries(),
                            delay_ms = delay.as_millis() as u64,
                            "API rate limit exceeded, backing off"
                        );

                        if !self.pause(delay).await {
                            tracing::info!(id = %id, completed = completed.len(), "Batch cancelled");
                            return Err(BatchError::Cancelled {
                                failed_id: id.clone(),
                                completed,
                            });
                        }
                    }
                    _ => {
                        tracing::warn!(
                            id = %id,
                            attempts = retries + 1,
                            completed = completed.len(),
                            error = %error,
                            "Batch aborted"
                        );
                        return Err(BatchError::Aborted {
                            failed_id: id.clone(),
                            completed,
                            attempts: retries + 1,
                            source: error,
                        });
                    }
                }
            }
        }

        tracing::info!(items = completed.len(), "Batch update finished");
        Ok(completed)
    }

    /// Sleeps for `delay`. Returns false if cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Error)]
    enum FakeError {
        #[error("too many API requests")]
        TooMany,
        #[error("invalid policy")]
        Invalid,
    }

    impl Classify for FakeError {
        fn kind(&self) -> FailureKind {
            match self {
                FakeError::TooMany => FailureKind::RateLimited { retry_after: None },
                FakeError::Invalid => FailureKind::Other,
            }
        }
    }

    /// Returns scripted failures per id, then succeeds. Records every call.
    #[derive(Default)]
    struct ScriptedTarget {
        script: Mutex<HashMap<u64, VecDeque<FakeError>>>,
        calls: Mutex<Vec<(u64, Instant)>>,
    }

    impl ScriptedTarget {
        fn fail(self, id: u64, errors: impl IntoIterator<Item = FakeError>) -> Self {
            self.script
                .lock()
                .unwrap()
                .entry(id)
                .or_default()
                .extend(errors);
            self
        }

        fn calls_for(&self, id: u64) -> Vec<Instant> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(called, _)| *called == id)
                .map(|(_, at)| *at)
                .collect()
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl UpdateTarget<u64, str> for ScriptedTarget {
        type Error = FakeError;

        fn apply_update(
            &self,
            id: &u64,
            _payload: &str,
        ) -> impl Future<Output = Result<(), FakeError>> + Send {
            self.calls.lock().unwrap().push((*id, Instant::now()));
            let next = self
                .script
                .lock()
                .unwrap()
                .get_mut(id)
                .and_then(VecDeque::pop_front);
            async move { next.map_or(Ok(()), Err) }
        }
    }

    fn gaps(calls: &[Instant]) -> Vec<Duration> {
        calls.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_millis).collect()
    }

    #[test]
    fn test_default_backoff_formula() {
        let backoff = Backoff::default();
        assert_eq!(backoff.max_retries(), 10);
        assert_eq!(backoff.delay_for(1, None), Duration::from_millis(16));
        assert_eq!(backoff.delay_for(2, None), Duration::from_millis(32));
        assert_eq!(backoff.delay_for(10, None), Duration::from_millis(8192));
    }

    #[test]
    fn test_default_backoff_ignores_retry_after() {
        let backoff = Backoff::default();
        assert_eq!(
            backoff.delay_for(1, Some(Duration::from_secs(5))),
            Duration::from_millis(16)
        );
    }

    #[test]
    fn test_backoff_honors_retry_after_when_enabled() {
        let backoff = Backoff::new().honor_retry_after(true);
        assert_eq!(
            backoff.delay_for(1, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        // The formula still wins when it is longer than the hint.
        assert_eq!(
            backoff.delay_for(6, Some(Duration::from_millis(10))),
            Duration::from_millis(512)
        );
    }

    #[test]
    fn test_backoff_max_delay_caps_everything() {
        let backoff = Backoff::new()
            .honor_retry_after(true)
            .with_max_delay(Duration::from_millis(100));
        assert_eq!(backoff.delay_for(8, None), Duration::from_millis(100));
        assert_eq!(
            backoff.delay_for(1, Some(Duration::from_secs(5))),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_backoff_huge_retry_does_not_overflow() {
        let backoff = Backoff::new().with_max_retries(u32::MAX);
        assert_eq!(
            backoff.delay_for(u32::MAX, None),
            Duration::from_millis(1u64 << 63)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_success_returns_input_in_order() {
        let updater = BatchUpdater::new(ScriptedTarget::default());
        let ids = [5u64, 3, 9, 1];

        let result = updater.run(&ids, "policy").await.unwrap();

        assert_eq!(result, ids.to_vec());
        assert_eq!(updater.target().call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input_makes_no_calls() {
        let updater = BatchUpdater::new(ScriptedTarget::default());
        let ids: [u64; 0] = [];

        let result = updater.run(&ids, "policy").await.unwrap();

        assert!(result.is_empty());
        assert_eq!(updater.target().call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_item_is_retried_with_exponential_delays() {
        let target = ScriptedTarget::default().fail(2, [FakeError::TooMany, FakeError::TooMany]);
        let updater = BatchUpdater::new(target);

        let result = updater.run(&[1, 2, 3], "policy").await.unwrap();

        assert_eq!(result, vec![1, 2, 3]);
        let item_two = updater.target().calls_for(2);
        assert_eq!(item_two.len(), 3);
        assert_eq!(gaps(&item_two), ms(&[16, 32]));
        assert_eq!(updater.target().calls_for(3).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_counter_resets_per_item() {
        let target = ScriptedTarget::default()
            .fail(1, [FakeError::TooMany, FakeError::TooMany, FakeError::TooMany])
            .fail(2, [FakeError::TooMany]);
        let updater = BatchUpdater::new(target);

        let result = updater.run(&[1, 2], "policy").await.unwrap();

        assert_eq!(result, vec![1, 2]);
        assert_eq!(gaps(&updater.target().calls_for(1)), ms(&[16, 32, 64]));
        // Item 2 starts over at the first delay.
        assert_eq!(gaps(&updater.target().calls_for(2)), ms(&[16]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nine_rate_limits_then_success() {
        let target = ScriptedTarget::default().fail(7, (0..9).map(|_| FakeError::TooMany));
        let updater = BatchUpdater::new(target);

        let result = updater.run(&[7], "policy").await.unwrap();

        assert_eq!(result, vec![7]);
        let expected: Vec<u64> = (1..=9).map(|k| 1u64 << (k + 3)).collect();
        assert_eq!(gaps(&updater.target().calls_for(7)), ms(&expected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_rate_limits_still_succeed() {
        let target = ScriptedTarget::default().fail(7, (0..10).map(|_| FakeError::TooMany));
        let updater = BatchUpdater::new(target);

        let result = updater.run(&[7, 8], "policy").await.unwrap();

        assert_eq!(result, vec![7, 8]);
        assert_eq!(updater.target().calls_for(7).len(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_rate_limit_aborts_after_max_retries_plus_one() {
        let target = ScriptedTarget::default().fail(3, (0..20).map(|_| FakeError::TooMany));
        let updater = BatchUpdater::new(target);

        let err = updater.run(&[1, 2, 3, 4], "policy").await.unwrap_err();

        assert_eq!(err.completed(), &[1, 2]);
        assert_eq!(*err.failed_id(), 3);
        match &err {
            BatchError::Aborted {
                attempts, source, ..
            } => {
                assert_eq!(*attempts, MAX_RETRIES + 1);
                assert!(matches!(source, FakeError::TooMany));
            }
            other => panic!("expected Aborted, got {other:?}"),
        }
        assert_eq!(updater.target().calls_for(3).len(), 11);
        assert!(updater.target().calls_for(4).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failure_aborts_without_retry() {
        let target = ScriptedTarget::default().fail(2, [FakeError::Invalid]);
        let updater = BatchUpdater::new(target);
        let started = Instant::now();

        let err = updater.run(&[1, 2, 3], "policy").await.unwrap_err();

        assert_eq!(err.completed(), &[1]);
        assert!(matches!(
            err,
            BatchError::Aborted {
                attempts: 1,
                source: FakeError::Invalid,
                ..
            }
        ));
        assert_eq!(updater.target().call_count(), 2);
        assert_eq!(Instant::now(), started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failure_after_rate_limits_is_fatal() {
        let target =
            ScriptedTarget::default().fail(1, [FakeError::TooMany, FakeError::Invalid]);
        let updater = BatchUpdater::new(target);

        let err = updater.run(&[1, 2], "policy").await.unwrap_err();

        assert!(err.completed().is_empty());
        assert!(matches!(err, BatchError::Aborted { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_max_retries() {
        let target = ScriptedTarget::default().fail(1, (0..5).map(|_| FakeError::TooMany));
        let updater = BatchUpdater::new(target).with_backoff(Backoff::new().with_max_retries(2));

        let err = updater.run(&[1], "policy").await.unwrap_err();

        assert!(matches!(err, BatchError::Aborted { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let token = CancellationToken::new();
        let target = ScriptedTarget::default().fail(2, (0..20).map(|_| FakeError::TooMany));
        let updater = BatchUpdater::new(target).with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = updater.run(&[1, 2, 3], "policy").await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, BatchError::Cancelled { failed_id: 2, .. }));
        assert_eq!(err.into_completed(), vec![1]);
        // First call, then one retry after 16ms; cancelled during the 32ms wait.
        assert_eq!(updater.target().calls_for(2).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_untriggered_token_does_not_change_outcome() {
        let target = ScriptedTarget::default().fail(1, [FakeError::TooMany]);
        let updater = BatchUpdater::new(target).with_cancellation(CancellationToken::new());

        let result = updater.run(&[1, 2], "policy").await.unwrap();

        assert_eq!(result, vec![1, 2]);
    }

    #[test]
    fn test_batch_error_display_mentions_progress() {
        let err: BatchError<u64, FakeError> = BatchError::Aborted {
            failed_id: 3,
            completed: vec![1, 2],
            attempts: 1,
            source: FakeError::Invalid,
        };
        let msg = err.to_string();
        assert!(msg.contains("at 3"));
        assert!(msg.contains("2 successful"));
        assert!(msg.contains("invalid policy"));
    }
}
