//! Sticky-subscription renewal timers.
//!
//! One cancellable timer per active subscription, keyed by callback
//! identifier. The map holds capability handles, not subscription state —
//! the store stays the single source of truth, and a timer that fires after
//! an invalidation simply finds no active row and does nothing.

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use tokio_util::sync::CancellationToken;
use websub_core::store::SubscriptionStore;

use crate::initiate::Initiator;

struct TimerEntry {
  cancel:     CancellationToken,
  /// Distinguishes this timer from any successor scheduled under the same
  /// callback, so a finished task only cleans up its own entry.
  generation: u64,
}

struct Inner<S> {
  initiator:       Arc<Initiator<S>>,
  timers:          Mutex<HashMap<String, TimerEntry>>,
  next_generation: AtomicU64,
}

/// Owns the process-wide callback → cancel-handle map.
///
/// Cloning is cheap — all state is behind one `Arc`. The mutex is held only
/// to insert, remove, or swap entries, never while a timer body runs.
pub struct RenewalScheduler<S> {
  inner: Arc<Inner<S>>,
}

impl<S> Clone for RenewalScheduler<S> {
  fn clone(&self) -> Self {
    Self { inner: Arc::clone(&self.inner) }
  }
}

impl<S: SubscriptionStore + 'static> RenewalScheduler<S> {
  pub fn new(initiator: Arc<Initiator<S>>) -> Self {
    Self {
      inner: Arc::new(Inner {
        initiator,
        timers: Mutex::new(HashMap::new()),
        next_generation: AtomicU64::new(0),
      }),
    }
  }

  /// Arm a renewal timer for `callback`, replacing and cancelling any
  /// existing one.
  ///
  /// The timer fires after a third of the lease, leaving the remaining two
  /// thirds as margin for hub latency and clock skew. The renewal itself is
  /// bounded by the full lease duration; if it stalls past that, it is
  /// abandoned and the subscription expires naturally in the store's view.
  pub fn schedule(&self, callback: String, lease: Duration) {
    let cancel = CancellationToken::new();
    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

    let previous = self.inner.timers.lock().unwrap().insert(
      callback.clone(),
      TimerEntry { cancel: cancel.clone(), generation },
    );
    if let Some(prev) = previous {
      prev.cancel.cancel();
    }

    let scheduler = self.clone();
    tokio::spawn(async move {
      tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(lease / 3) => {}
      }

      let renew = scheduler.inner.initiator.renew(&cancel, &callback);
      match tokio::time::timeout(lease, renew).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
          // Renewal failures are never surfaced to users; the lease just
          // runs out and the row drops from the active view.
          tracing::warn!(%callback, error = %e, "renewal failed");
        }
        Err(_) => {
          tracing::warn!(%callback, "renewal outlived its lease, abandoned");
        }
      }

      scheduler.remove_if_current(&callback, generation);
    });
  }

  /// Cancel and drop the timer for `callback`, if any.
  pub fn cancel(&self, callback: &str) {
    if let Some(entry) = self.inner.timers.lock().unwrap().remove(callback) {
      entry.cancel.cancel();
    }
  }

  /// Cancel every timer. Called once at shutdown.
  pub fn cancel_all(&self) {
    let mut timers = self.inner.timers.lock().unwrap();
    for (_, entry) in timers.drain() {
      entry.cancel.cancel();
    }
  }

  /// Whether a timer is currently armed for `callback`.
  pub fn contains(&self, callback: &str) -> bool {
    self.inner.timers.lock().unwrap().contains_key(callback)
  }

  fn remove_if_current(&self, callback: &str, generation: u64) {
    let mut timers = self.inner.timers.lock().unwrap();
    if timers
      .get(callback)
      .is_some_and(|entry| entry.generation == generation)
    {
      timers.remove(callback);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use chrono::{DateTime, Utc};
  use websub_core::{
    Result, StoreError,
    subscription::{Subscription, SubscriptionPage},
  };

  use super::*;

  /// A store with no rows: every renewal resolves to a quiet no-op.
  struct EmptyStore;

  impl SubscriptionStore for EmptyStore {
    async fn index_offer(&self, _offers: HashMap<String, String>) -> Result<()> {
      Ok(())
    }
    async fn new_callback(
      &self,
      _token: CancellationToken,
      _topic: &str,
      _hub: &str,
      _callback: &str,
    ) -> Result<()> {
      Ok(())
    }
    async fn extend_lease(
      &self,
      _token: CancellationToken,
      _callback: &str,
      _new_expiration: DateTime<Utc>,
    ) -> Result<()> {
      Ok(())
    }
    async fn invalidate(
      &self,
      _token: CancellationToken,
      _callback: &str,
      _reason: &str,
    ) -> Result<()> {
      Ok(())
    }
    async fn get_active_callback(&self, _topic: &str, _hub: &str) -> Result<String> {
      Err(StoreError::NoRows)
    }
    async fn get_subscription(&self, _callback: &str) -> Result<Subscription> {
      Err(StoreError::NoRows)
    }
    async fn get_active(
      &self,
      _page_size: u32,
      _last_topic: &str,
      _last_hub: &str,
    ) -> Result<SubscriptionPage> {
      Ok(SubscriptionPage { subscriptions: vec![], last_page: true })
    }
    async fn get_inactive(
      &self,
      _page_size: u32,
      _last_topic: &str,
      _last_hub: &str,
    ) -> Result<SubscriptionPage> {
      Ok(SubscriptionPage { subscriptions: vec![], last_page: true })
    }
    async fn close(&self) -> Result<()> {
      Ok(())
    }
  }

  fn scheduler() -> RenewalScheduler<EmptyStore> {
    let client = reqwest::Client::builder()
      .redirect(reqwest::redirect::Policy::none())
      .build()
      .unwrap();
    let initiator = Arc::new(Initiator::new(client, Arc::new(EmptyStore)));
    RenewalScheduler::new(initiator)
  }

  #[tokio::test]
  async fn schedule_and_cancel() {
    let s = scheduler();
    s.schedule("cafebabe".into(), Duration::from_secs(60));
    assert!(s.contains("cafebabe"));

    s.cancel("cafebabe");
    assert!(!s.contains("cafebabe"));
  }

  #[tokio::test]
  async fn rescheduling_replaces_the_old_timer() {
    let s = scheduler();
    s.schedule("cafebabe".into(), Duration::from_secs(60));
    s.schedule("cafebabe".into(), Duration::from_secs(60));
    assert!(s.contains("cafebabe"));

    s.cancel_all();
    assert!(!s.contains("cafebabe"));
  }

  #[tokio::test]
  async fn fired_timer_cleans_up_its_entry() {
    let s = scheduler();
    // Fires after ~50ms; the no-rows store makes the renewal a no-op.
    s.schedule("cafebabe".into(), Duration::from_millis(150));
    assert!(s.contains("cafebabe"));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!s.contains("cafebabe"));
  }
}
