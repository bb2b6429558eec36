//! [`SqliteStore`] — the SQLite implementation of
//! [`SubscriptionStore`](websub_core::store::SubscriptionStore).

use std::{collections::HashMap, path::Path};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use websub_core::{
  Result, StoreError,
  store::{SubscriptionStore, validate_offer},
  subscription::{Subscription, SubscriptionPage},
};

use crate::{
  encode::{RawSubscription, encode_dt},
  schema::SCHEMA,
};

// ─── Error mapping ───────────────────────────────────────────────────────────

/// Map a backend failure onto the store taxonomy. Constraint violations are
/// distinguished by SQLite extended result code: the foreign key on
/// (topic_url, hub_url) means the offer was never indexed, and the primary
/// key on callback_url means the random identifier collided.
fn db_err(e: tokio_rusqlite::Error) -> StoreError {
  match e {
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::QueryReturnedNoRows) => {
      StoreError::NoRows
    }
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(f, msg)) => {
      match f.extended_code {
        rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => StoreError::MissingOffer,
        rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => StoreError::DuplicateCallback,
        _ => StoreError::Backend(
          msg.unwrap_or_else(|| f.to_string()),
        ),
      }
    }
    other => StoreError::Backend(other.to_string()),
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A subscription store backed by a single SQLite database.
///
/// Cloning is cheap — the inner connection is a handle onto one dedicated
/// database thread, which also serialises every transaction.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path)
      .await
      .map_err(db_err)?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory()
      .await
      .map_err(db_err)?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await
      .map_err(db_err)
  }

  /// Run a guarded UPDATE under `token`, rolling back if the token fires
  /// before commit. Returns the number of rows touched, or `None` when the
  /// transaction was abandoned.
  async fn guarded_update(
    &self,
    token: CancellationToken,
    sql: &'static str,
    params: Vec<String>,
  ) -> Result<usize> {
    let cancel = token.clone();
    let touched = tokio::select! {
      biased;
      _ = token.cancelled() => return Err(StoreError::Cancelled),
      res = self.conn.call(move |conn| {
        let tx = conn.transaction()?;
        let n = tx.execute(sql, rusqlite::params_from_iter(params.iter()))?;
        if cancel.is_cancelled() {
          // Dropping the transaction rolls it back.
          return Ok(None);
        }
        tx.commit()?;
        Ok(Some(n))
      }) => res.map_err(db_err)?,
    };
    touched.ok_or(StoreError::Cancelled)
  }

  async fn get_page(
    &self,
    sql: &'static str,
    with_lease: bool,
    page_size: u32,
    last_topic: &str,
    last_hub: &str,
  ) -> Result<SubscriptionPage> {
    let last_topic = last_topic.to_owned();
    let last_hub = last_hub.to_owned();

    let raws: Vec<RawSubscription> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![last_topic, last_hub, page_size],
            |row| {
              // Column 3 is lease_initiated for the active view and
              // inactive_reason for the inactive one.
              let (lease_initiated, inactive_reason) = if with_lease {
                (row.get(3)?, None)
              } else {
                (None, row.get(3)?)
              };
              Ok(RawSubscription {
                topic_url: row.get(0)?,
                hub_url: row.get(1)?,
                callback_url: row.get(2)?,
                lease_initiated,
                lease_expiration: None,
                inactive_reason,
              })
            },
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(db_err)?;

    let last_page = raws.len() < page_size as usize;
    let subscriptions = raws
      .into_iter()
      .map(RawSubscription::into_subscription)
      .collect::<Result<_>>()?;

    Ok(SubscriptionPage { subscriptions, last_page })
  }
}

// ─── SubscriptionStore impl ──────────────────────────────────────────────────

impl SubscriptionStore for SqliteStore {
  async fn index_offer(&self, offers: HashMap<String, String>) -> Result<()> {
    for (topic, hub) in &offers {
      validate_offer(topic, hub)?;
    }

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO offered_subscriptions (topic_url, hub_url)
             VALUES (?1, ?2)",
          )?;
          for (topic, hub) in &offers {
            stmt.execute(rusqlite::params![topic, hub])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await
      .map_err(db_err)
  }

  async fn new_callback(
    &self,
    token: CancellationToken,
    topic: &str,
    hub: &str,
    callback: &str,
  ) -> Result<()> {
    validate_offer(topic, hub)?;

    // INSERT rather than UPSERT: the UNIQUE (topic_url, hub_url) ON
    // CONFLICT REPLACE constraint erases any previous row for the pair,
    // so the new subscription always starts with a clean lease.
    let n = self
      .guarded_update(
        token,
        "INSERT INTO subscriptions (topic_url, hub_url, callback_url)
         VALUES (?1, ?2, ?3)",
        vec![topic.to_owned(), hub.to_owned(), callback.to_owned()],
      )
      .await?;

    debug_assert_eq!(n, 1);
    Ok(())
  }

  async fn extend_lease(
    &self,
    token: CancellationToken,
    callback: &str,
    new_expiration: DateTime<Utc>,
  ) -> Result<()> {
    let now = Utc::now();
    if new_expiration <= now {
      return Err(StoreError::NewLeaseInPast(new_expiration));
    }

    // lease_initiated marks when the lease *chain* began: stamped on the
    // first extension, preserved by renewals. The guard refuses to revive
    // a row whose lease has already run out.
    let n = self
      .guarded_update(
        token,
        "UPDATE subscriptions
         SET lease_expiration = ?1,
             lease_initiated = (
               CASE
                 WHEN lease_initiated IS NULL
                 THEN ?2
                 ELSE lease_initiated
               END)
         WHERE
           callback_url = ?3
           AND (
             lease_expiration IS NULL
             OR datetime('now') < datetime(lease_expiration))",
        vec![
          encode_dt(new_expiration),
          encode_dt(now),
          callback.to_owned(),
        ],
      )
      .await?;

    if n != 1 {
      return Err(StoreError::UpdateFailed(n));
    }
    Ok(())
  }

  async fn invalidate(
    &self,
    token: CancellationToken,
    callback: &str,
    reason: &str,
  ) -> Result<()> {
    if reason.is_empty() {
      return Err(StoreError::MalformedInactiveReason);
    }

    // Only kills rows not already dead; a second invalidation misses the
    // guard and comes back as the benign UpdateFailed(0).
    let n = self
      .guarded_update(
        token,
        "UPDATE subscriptions
         SET lease_initiated = NULL, lease_expiration = ?1, inactive_reason = ?2
         WHERE
           callback_url = ?3
           AND (
             lease_expiration IS NULL
             OR datetime(lease_expiration) > datetime('now'))",
        vec![
          encode_dt(Utc::now()),
          reason.to_owned(),
          callback.to_owned(),
        ],
      )
      .await?;

    if n != 1 {
      return Err(StoreError::UpdateFailed(n));
    }
    Ok(())
  }

  async fn get_active_callback(&self, topic: &str, hub: &str) -> Result<String> {
    let topic = topic.to_owned();
    let hub = hub.to_owned();

    self
      .conn
      .call(move |conn| {
        let callback = conn.query_row(
          "SELECT callback_url
           FROM active_subscriptions
           WHERE topic_url = ?1 AND hub_url = ?2",
          rusqlite::params![topic, hub],
          |row| row.get(0),
        )?;
        Ok(callback)
      })
      .await
      .map_err(db_err)
  }

  async fn get_subscription(&self, callback: &str) -> Result<Subscription> {
    let callback = callback.to_owned();

    let raw: RawSubscription = self
      .conn
      .call(move |conn| {
        let raw = conn.query_row(
          "SELECT topic_url, hub_url, callback_url,
                  lease_initiated, lease_expiration, inactive_reason
           FROM active_subscriptions
           WHERE callback_url = ?1",
          rusqlite::params![callback],
          |row| {
            Ok(RawSubscription {
              topic_url:        row.get(0)?,
              hub_url:          row.get(1)?,
              callback_url:     row.get(2)?,
              lease_initiated:  row.get(3)?,
              lease_expiration: row.get(4)?,
              inactive_reason:  row.get(5)?,
            })
          },
        )?;
        Ok(raw)
      })
      .await
      .map_err(db_err)?;

    raw.into_subscription()
  }

  async fn get_active(
    &self,
    page_size: u32,
    last_topic: &str,
    last_hub: &str,
  ) -> Result<SubscriptionPage> {
    self
      .get_page(
        "SELECT topic_url, hub_url, callback_url, lease_initiated
         FROM active_subscriptions
         WHERE (topic_url, hub_url) > (?1, ?2)
         ORDER BY topic_url, hub_url
         LIMIT ?3",
        true,
        page_size,
        last_topic,
        last_hub,
      )
      .await
  }

  async fn get_inactive(
    &self,
    page_size: u32,
    last_topic: &str,
    last_hub: &str,
  ) -> Result<SubscriptionPage> {
    self
      .get_page(
        "SELECT topic_url, hub_url, callback_url, inactive_reason
         FROM inactive_subscriptions
         WHERE (topic_url, hub_url) > (?1, ?2)
         ORDER BY topic_url, hub_url
         LIMIT ?3",
        false,
        page_size,
        last_topic,
        last_hub,
      )
      .await
  }

  async fn close(&self) -> Result<()> {
    self.conn.clone().close().await.map_err(db_err)
  }
}
