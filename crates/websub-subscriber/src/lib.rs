//! WebSub subscriber protocol layer.
//!
//! Implements the subscriber half of the W3C WebSub protocol
//! (<https://www.w3.org/TR/websub/>): discovering offers, negotiating
//! subscriptions with hubs over HTTP, answering hub-driven verification
//! challenges, and renewing leases before they expire. Backed by any
//! [`SubscriptionStore`].

pub mod callback;
pub mod discovery;
pub mod error;
pub mod initiate;
pub mod renewal;

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use axum::{Router, routing::post};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use websub_core::store::SubscriptionStore;

use discovery::TopicDiscovery;
pub use error::{Error, Result};
use initiate::Initiator;
use renewal::RenewalScheduler;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `config.toml` and `WEBSUB_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through the callback endpoint.
pub struct AppState<S> {
  pub store:     Arc<S>,
  pub scheduler: RenewalScheduler<S>,
  /// Root token; handler-issued store calls carry children of it.
  pub shutdown:  CancellationToken,
}

// Manual impl: `S` itself need not be `Clone` behind the `Arc`s.
impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:     Arc::clone(&self.store),
      scheduler: self.scheduler.clone(),
      shutdown:  self.shutdown.clone(),
    }
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the callback router. The trailing path component is the opaque
/// callback identifier a hub was given at subscribe time.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: SubscriptionStore + 'static,
{
  Router::new()
    .route("/callback/{callback}", post(callback::handler::<S>))
    .with_state(state)
}

// ─── Facade ──────────────────────────────────────────────────────────────────

/// The runnable subscriber service: HTTP callback server, outbound hub
/// client, renewal scheduler, and store, wired together.
pub struct Subscriber<S> {
  config:    SubscriberConfig,
  store:     Arc<S>,
  initiator: Arc<Initiator<S>>,
  scheduler: RenewalScheduler<S>,
  shutdown:  CancellationToken,
}

impl<S: SubscriptionStore + 'static> Subscriber<S> {
  pub fn new(config: SubscriberConfig, store: Arc<S>) -> Result<Self> {
    // Redirects are handled explicitly by the initiator so that hub moves
    // are recorded in the offer index rather than silently followed.
    let client = reqwest::Client::builder()
      .redirect(reqwest::redirect::Policy::none())
      .timeout(Duration::from_secs(30))
      .build()?;

    let initiator = Arc::new(Initiator::new(client, Arc::clone(&store)));
    let scheduler = RenewalScheduler::new(Arc::clone(&initiator));

    Ok(Self {
      config,
      store,
      initiator,
      scheduler,
      shutdown: CancellationToken::new(),
    })
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  pub fn scheduler(&self) -> &RenewalScheduler<S> {
    &self.scheduler
  }

  /// The state handed to the callback router.
  pub fn state(&self) -> AppState<S> {
    AppState {
      store:     Arc::clone(&self.store),
      scheduler: self.scheduler.clone(),
      shutdown:  self.shutdown.clone(),
    }
  }

  /// Run discovery for `topic` and index every advertised hub as an offer.
  ///
  /// Offers are indexed one pair at a time so a topic served by several
  /// hubs keeps them all.
  pub async fn discover_topic<D: TopicDiscovery>(
    &self,
    discoverer: &D,
    topic: &str,
  ) -> Result<()> {
    let discovered = discoverer
      .discover(topic)
      .await
      .map_err(|e| Error::Discovery(e.to_string()))?;

    for hub in discovered.hubs {
      self
        .store
        .index_offer(HashMap::from([(discovered.self_url.clone(), hub)]))
        .await?;
    }
    Ok(())
  }

  /// Subscribe to `topic` at `hub`. The subscription is pending until the
  /// hub verifies through the callback endpoint.
  pub async fn subscribe(
    &self,
    token: &CancellationToken,
    topic: &str,
    hub: &str,
  ) -> Result<()> {
    self.initiator.initiate(token, topic, hub).await
  }

  /// Request unsubscription for `callback`. The subscription stays active
  /// until the hub confirms through the callback endpoint.
  pub async fn unsubscribe(
    &self,
    token: &CancellationToken,
    callback: &str,
  ) -> Result<()> {
    self.initiator.unsubscribe(token, callback).await
  }

  /// Serve the callback endpoint until [`shutdown`](Self::shutdown) is
  /// called, then drain in-flight handlers and close the store.
  pub async fn run(&self) -> Result<()> {
    let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
      .await?;
    tracing::info!("callback server listening on http://{}", listener.local_addr()?);

    let app = router(self.state());
    let shutdown = self.shutdown.clone();
    axum::serve(listener, app)
      .with_graceful_shutdown(async move { shutdown.cancelled().await })
      .await?;

    // Intake has stopped and every in-flight handler has drained; nothing
    // can reach the store past this point.
    self.store.close().await?;
    Ok(())
  }

  /// Begin graceful shutdown: stop accepting callbacks and cancel every
  /// renewal timer. [`run`](Self::run) finishes the sequence by draining
  /// handlers and closing the store.
  pub fn shutdown(&self) {
    self.shutdown.cancel();
    self.scheduler.cancel_all();
  }
}

#[cfg(test)]
mod tests;
