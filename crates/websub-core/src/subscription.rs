//! Subscription — one attempt, past or present, to subscribe to a topic.
//!
//! A subscription is keyed by its callback identifier: a random 32-hex-char
//! string generated per subscribe attempt. At most one subscription exists
//! per (topic, hub) pair; a newer attempt replaces the older row outright.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the subscriptions table, or of a derived view over it.
///
/// Lease fields are `None` while the subscription is merely initiated
/// (awaiting hub verification) and after invalidation. `inactive_reason` is
/// set only on rows killed by an unsubscribe confirmation, a hub denial, or
/// a user cancel — never on natural expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
  pub topic_url:        String,
  pub hub_url:          String,
  pub callback:         String,
  pub lease_initiated:  Option<DateTime<Utc>>,
  pub lease_expiration: Option<DateTime<Utc>>,
  pub inactive_reason:  Option<String>,
}

/// One page of a keyset-paginated subscription query.
///
/// Rows are ordered by (topic, hub); the caller resumes by passing the last
/// row's pair back as the cursor. `last_page` is true when the page came
/// back short, i.e. there is nothing after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPage {
  pub subscriptions: Vec<Subscription>,
  pub last_page:     bool,
}
