//! Outbound subscription requests to hubs.
//!
//! The initiator owns the shared HTTP client. Redirects are never followed
//! automatically: a 307/308 from a hub re-indexes the topic against the new
//! location and retries there, so the store always knows which hub a
//! subscription actually landed on.

use std::{collections::HashMap, sync::Arc};

use rand::{RngCore, rngs::OsRng};
use reqwest::header::LOCATION;
use tokio_util::sync::CancellationToken;
use websub_core::{StoreError, store::SubscriptionStore};

use crate::error::{Error, Result};

/// Hops allowed before a redirect chain is declared a loop.
const MAX_REDIRECT_HOPS: usize = 5;

/// Generate a fresh callback identifier: 16 random bytes, hex-encoded.
///
/// 128 bits of entropy makes the identifier unguessable and collision-free
/// for any realistic process lifetime; it is the only secret tying a hub's
/// verification requests to pending state.
pub fn generate_callback() -> String {
  let mut raw = [0u8; 16];
  OsRng.fill_bytes(&mut raw);
  hex::encode(raw)
}

#[derive(Clone, Copy)]
enum Mode {
  Subscribe,
  Unsubscribe,
}

impl Mode {
  fn as_str(self) -> &'static str {
    match self {
      Mode::Subscribe => "subscribe",
      Mode::Unsubscribe => "unsubscribe",
    }
  }
}

/// Issues subscribe/unsubscribe/renew POSTs to hubs and records pending
/// callbacks. All errors surface to the caller; retrying a failed
/// initiation is the caller's decision.
pub struct Initiator<S> {
  client: reqwest::Client,
  store:  Arc<S>,
}

impl<S: SubscriptionStore> Initiator<S> {
  /// `client` must have automatic redirect following disabled.
  pub fn new(client: reqwest::Client, store: Arc<S>) -> Self {
    Self { client, store }
  }

  /// Start a new subscription for `topic` at `hub`.
  ///
  /// A fresh callback identifier is generated per attempt. On 202 the
  /// pending callback is recorded and the hub's verification is awaited
  /// out-of-band; on 307/308 the redirect target is indexed and tried
  /// instead. Anything else is surfaced without touching the store.
  pub async fn initiate(
    &self,
    token: &CancellationToken,
    topic: &str,
    hub: &str,
  ) -> Result<()> {
    if token.is_cancelled() {
      return Err(Error::Cancelled);
    }

    let mut hub = hub.to_owned();
    let mut hops = 0;
    let mut retried_collision = false;

    loop {
      let callback = generate_callback();
      let resp = self
        .send_request(token, topic, &hub, &callback, Mode::Subscribe)
        .await?;

      match resp.status().as_u16() {
        202 => {
          match self
            .store
            .new_callback(token.clone(), topic, &hub, &callback)
            .await
          {
            Ok(()) => return Ok(()),
            Err(StoreError::DuplicateCallback) if !retried_collision => {
              // Astronomically rare. One more attempt with a fresh
              // identifier; a second collision surfaces.
              tracing::warn!(%callback, "callback identifier collided, retrying");
              retried_collision = true;
            }
            Err(e) => return Err(e.into()),
          }
        }
        code @ (307 | 308) => {
          hops += 1;
          if hops > MAX_REDIRECT_HOPS {
            return Err(Error::TooManyRedirects(MAX_REDIRECT_HOPS));
          }
          hub = self.follow_redirect(topic, &resp, code == 308).await?;
        }
        _ => return Err(unexpected_status(resp).await),
      }
    }
  }

  /// Renew the lease behind `callback` by re-POSTing to the same hub with
  /// the same identifier.
  ///
  /// If the subscription is no longer active this is a quiet no-op — the
  /// timer raced an invalidation or an expiry, and the store already won.
  /// A 2xx only means the hub accepted the request; the actual lease
  /// extension arrives through the callback endpoint when the hub
  /// re-verifies.
  pub async fn renew(
    &self,
    token: &CancellationToken,
    callback: &str,
  ) -> Result<()> {
    let sub = match self.store.get_subscription(callback).await {
      Ok(sub) => sub,
      Err(StoreError::NoRows) => {
        tracing::debug!(%callback, "skipping renewal, subscription no longer active");
        return Ok(());
      }
      Err(e) => return Err(e.into()),
    };

    let topic = sub.topic_url;
    let mut hub = sub.hub_url;
    let mut hops = 0;

    loop {
      let resp = self
        .send_request(token, &topic, &hub, callback, Mode::Subscribe)
        .await?;

      let status = resp.status();
      if status.is_success() {
        return Ok(());
      }
      match status.as_u16() {
        code @ (307 | 308) => {
          hops += 1;
          if hops > MAX_REDIRECT_HOPS {
            return Err(Error::TooManyRedirects(MAX_REDIRECT_HOPS));
          }
          hub = self.follow_redirect(&topic, &resp, code == 308).await?;
        }
        _ => return Err(unexpected_status(resp).await),
      }
    }
  }

  /// Ask the hub to drop the subscription behind `callback`.
  ///
  /// The store is not touched here: the hub confirms through the callback
  /// endpoint, which performs the invalidation.
  pub async fn unsubscribe(
    &self,
    token: &CancellationToken,
    callback: &str,
  ) -> Result<()> {
    let sub = self.store.get_subscription(callback).await?;

    let topic = sub.topic_url;
    let mut hub = sub.hub_url;
    let mut hops = 0;

    loop {
      let resp = self
        .send_request(token, &topic, &hub, callback, Mode::Unsubscribe)
        .await?;

      match resp.status().as_u16() {
        202 => return Ok(()),
        code @ (307 | 308) => {
          hops += 1;
          if hops > MAX_REDIRECT_HOPS {
            return Err(Error::TooManyRedirects(MAX_REDIRECT_HOPS));
          }
          hub = self.follow_redirect(&topic, &resp, code == 308).await?;
        }
        _ => return Err(unexpected_status(resp).await),
      }
    }
  }

  async fn send_request(
    &self,
    token: &CancellationToken,
    topic: &str,
    hub: &str,
    callback: &str,
    mode: Mode,
  ) -> Result<reqwest::Response> {
    let request = self.client.post(hub).form(&[
      ("hub.callback", callback),
      ("hub.mode", mode.as_str()),
      ("hub.topic", topic),
    ]);

    tokio::select! {
      biased;
      _ = token.cancelled() => Err(Error::Cancelled),
      resp = request.send() => Ok(resp?),
    }
  }

  /// Index the redirect target as a new offer for `topic` and return it.
  /// Temporary and permanent redirects act the same here; a permanent one
  /// is expected to supersede the old hub as future subscribes land on it.
  async fn follow_redirect(
    &self,
    topic: &str,
    resp: &reqwest::Response,
    permanent: bool,
  ) -> Result<String> {
    let location = resp
      .headers()
      .get(LOCATION)
      .and_then(|v| v.to_str().ok())
      .ok_or(Error::MissingLocation)?
      .to_owned();

    if permanent {
      tracing::info!(%location, "permanent redirect from hub");
    } else {
      tracing::info!(%location, "temporary redirect from hub");
    }

    self
      .store
      .index_offer(HashMap::from([(topic.to_owned(), location.clone())]))
      .await?;

    Ok(location)
  }
}

async fn unexpected_status(resp: reqwest::Response) -> Error {
  let status = resp.status().as_u16();
  let body = resp.text().await.unwrap_or_default();
  Error::UnexpectedStatus { status, body }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn callback_identifiers_are_32_hex_chars() {
    let cb = generate_callback();
    assert_eq!(cb.len(), 32);
    assert!(cb.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn callback_identifiers_do_not_repeat() {
    let a = generate_callback();
    let b = generate_callback();
    assert_ne!(a, b);
  }
}
