//! The `SubscriptionStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `websub-store-sqlite`).
//! Higher layers (the callback endpoint, the initiator, the renewal
//! scheduler) depend on this abstraction, not on any concrete backend.
//!
//! The store is the only authoritative subscription state in the process.
//! All cross-component ordering rides on its transactional guards: a
//! successful `extend_lease` happens-before any renewal timer observing the
//! active row, and an `invalidate` happens-before any later
//! `get_subscription` returning `NoRows`.

use std::{collections::HashMap, future::Future};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
  error::{Result, StoreError},
  subscription::{Subscription, SubscriptionPage},
};

/// Abstraction over a subscription store backend.
///
/// Mutations take a [`CancellationToken`]; a fired token aborts the
/// transaction and surfaces as [`StoreError::Cancelled`]. The store never
/// retries — it either commits or rolls back.
///
/// All methods return `Send` futures so the trait can be used from generic
/// axum handlers on a multi-threaded tokio runtime.
pub trait SubscriptionStore: Send + Sync {
  // ── Commands ──────────────────────────────────────────────────────────

  /// Index every (topic, hub) pair observed during discovery. Idempotent;
  /// offers are never deleted.
  fn index_offer(
    &self,
    offers: HashMap<String, String>,
  ) -> impl Future<Output = Result<()>> + Send + '_;

  /// Record that a subscription with `hub` has been initiated for `topic`
  /// under the given callback identifier. A prior row for the same
  /// (topic, hub) pair is replaced outright — the old callback is erased.
  ///
  /// Fails with [`StoreError::MissingOffer`] if the pair was never indexed,
  /// and [`StoreError::DuplicateCallback`] if the identifier is taken.
  fn new_callback<'a>(
    &'a self,
    token: CancellationToken,
    topic: &'a str,
    hub: &'a str,
    callback: &'a str,
  ) -> impl Future<Output = Result<()>> + Send + 'a;

  /// Grant or renew a lease on the given callback. Implicitly, this means
  /// the subscription is active.
  ///
  /// `lease_initiated` is stamped on the first extension of a lease chain
  /// and preserved by every later one. The update is guarded so an already
  /// expired row cannot be revived; a guard miss surfaces as
  /// [`StoreError::UpdateFailed`].
  fn extend_lease<'a>(
    &'a self,
    token: CancellationToken,
    callback: &'a str,
    new_expiration: DateTime<Utc>,
  ) -> impl Future<Output = Result<()>> + Send + 'a;

  /// Expire a subscription, recording why. Called on hub denials,
  /// unsubscribe confirmations, and user cancels — never for leases that
  /// merely run out.
  ///
  /// Idempotent-safe: invalidating an already-dead row returns
  /// [`StoreError::UpdateFailed`] with a count of 0, which callers may
  /// ignore.
  fn invalidate<'a>(
    &'a self,
    token: CancellationToken,
    callback: &'a str,
    reason: &'a str,
  ) -> impl Future<Output = Result<()>> + Send + 'a;

  // ── Queries ───────────────────────────────────────────────────────────

  /// The callback of the active subscription for (topic, hub), if any.
  fn get_active_callback<'a>(
    &'a self,
    topic: &'a str,
    hub: &'a str,
  ) -> impl Future<Output = Result<String>> + Send + 'a;

  /// The full row for `callback`, only while it is active; `NoRows`
  /// otherwise.
  fn get_subscription<'a>(
    &'a self,
    callback: &'a str,
  ) -> impl Future<Output = Result<Subscription>> + Send + 'a;

  /// Up to `page_size` active subscriptions with (topic, hub) strictly
  /// greater than the cursor, in (topic, hub) order.
  fn get_active<'a>(
    &'a self,
    page_size: u32,
    last_topic: &'a str,
    last_hub: &'a str,
  ) -> impl Future<Output = Result<SubscriptionPage>> + Send + 'a;

  /// Like [`get_active`](Self::get_active), but over the inactive view:
  /// offers joined with their expired or never-made subscriptions. Rows for
  /// offers never subscribed carry an empty callback.
  fn get_inactive<'a>(
    &'a self,
    page_size: u32,
    last_topic: &'a str,
    last_hub: &'a str,
  ) -> impl Future<Output = Result<SubscriptionPage>> + Send + 'a;

  // ── Lifecycle ─────────────────────────────────────────────────────────

  /// Flush and close the backend. Called last during facade shutdown, after
  /// all in-flight handlers have drained.
  fn close(&self) -> impl Future<Output = Result<()>> + Send + '_;
}

/// Guard against obviously malformed offer input before it reaches a
/// backend. Shared by implementations.
pub fn validate_offer(topic: &str, hub: &str) -> Result<(), StoreError> {
  if topic.is_empty() {
    return Err(StoreError::MalformedTopic);
  }
  if hub.is_empty() {
    return Err(StoreError::MalformedHub);
  }
  Ok(())
}
