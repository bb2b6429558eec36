//! Encoding and decoding helpers between Rust domain types and the
//! plain-text representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 UTC strings with millisecond
//! precision and a `Z` suffix — a form SQLite's `datetime()` parses, so
//! stored values compare correctly against `datetime('now')` inside the
//! views and update guards.

use chrono::{DateTime, SecondsFormat, Utc};
use websub_core::{Result, StoreError, subscription::Subscription};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|_| StoreError::MalformedTime(s.to_owned()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `subscriptions` row or a view over it.
///
/// Lease columns stay optional even when reading the active view: the
/// inactive view joins offers that were never subscribed, and reusing one
/// row shape keeps the two query paths symmetric.
pub struct RawSubscription {
  pub topic_url:        String,
  pub hub_url:          String,
  pub callback_url:     Option<String>,
  pub lease_initiated:  Option<String>,
  pub lease_expiration: Option<String>,
  pub inactive_reason:  Option<String>,
}

impl RawSubscription {
  pub fn into_subscription(self) -> Result<Subscription> {
    Ok(Subscription {
      topic_url:        self.topic_url,
      hub_url:          self.hub_url,
      callback:         self.callback_url.unwrap_or_default(),
      lease_initiated:  self
        .lease_initiated
        .as_deref()
        .map(decode_dt)
        .transpose()?,
      lease_expiration: self
        .lease_expiration
        .as_deref()
        .map(decode_dt)
        .transpose()?,
      inactive_reason:  self.inactive_reason,
    })
  }
}
