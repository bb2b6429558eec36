//! Error types for `websub-core`.
//!
//! [`StoreError`] is the full failure taxonomy of the subscription store.
//! It is a concrete enum rather than an associated type so that callers on
//! the other side of the [`SubscriptionStore`](crate::store::SubscriptionStore)
//! trait can match on kinds: the callback endpoint turns every failure into
//! a 404, the initiator retries only on `DuplicateCallback`, and renewal
//! treats `NoRows` as "subscription no longer exists" rather than an error.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
  /// Caller supplied an empty topic URL.
  #[error("topic provided is invalid; nothing was written")]
  MalformedTopic,

  /// Caller supplied an empty hub URL.
  #[error("hub provided is invalid; nothing was written")]
  MalformedHub,

  /// A subscription was invalidated without a reason.
  #[error("inactive reason provided is invalid; subscription was not killed")]
  MalformedInactiveReason,

  /// Attempted to extend a lease to a timestamp that has already passed.
  #[error("new lease expiration {0} is in the past")]
  NewLeaseInPast(DateTime<Utc>),

  /// A guarded UPDATE touched a number of rows other than exactly one.
  ///
  /// `UpdateFailed(0)` from [`invalidate`](crate::store::SubscriptionStore::invalidate)
  /// is benign: the row was already inactive.
  #[error("update touched {0} rows instead of 1")]
  UpdateFailed(usize),

  /// A query matched no rows. Expected for expired or invalidated lookups.
  #[error("no matching subscription")]
  NoRows,

  /// `new_callback` referenced a (topic, hub) pair with no indexed offer.
  #[error("no offer exists for the referenced (topic, hub) pair")]
  MissingOffer,

  /// The callback identifier collided with an existing row.
  #[error("callback identifier is already in use")]
  DuplicateCallback,

  /// A stored timestamp could not be parsed back out of the database.
  #[error("stored time value {0:?} could not be parsed")]
  MalformedTime(String),

  /// The operation's cancellation token fired before the transaction
  /// committed. Never retried, never compensated.
  #[error("operation cancelled")]
  Cancelled,

  /// Any other failure from the storage backend.
  #[error("storage backend error: {0}")]
  Backend(String),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
