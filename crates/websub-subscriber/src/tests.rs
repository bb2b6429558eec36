//! End-to-end tests: a real subscriber wired to mock hubs.
//!
//! Mock hubs are ordinary axum servers on ephemeral ports that record every
//! form they receive and answer from a scripted queue (202 when the queue
//! runs dry). Hub-side verification requests are driven straight into the
//! callback router with `oneshot`, so no subscriber port is needed.

use std::{
  collections::{HashMap, VecDeque},
  sync::{Arc, Mutex},
  time::Duration,
};

use axum::{
  Form, Router,
  body::Body,
  extract::State,
  http::{Request, StatusCode, header},
  response::{IntoResponse, Response},
  routing::post,
};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as _;
use websub_core::{StoreError, store::SubscriptionStore};
use websub_store_sqlite::SqliteStore;

use crate::{AppState, Error, Subscriber, SubscriberConfig, router};

const TOPIC: &str = "http://example.com/topic";

// ─── Mock hub ────────────────────────────────────────────────────────────────

enum HubResponse {
  TempRedirect(String),
  PermRedirect(String),
}

type ObservedForm = HashMap<String, String>;

#[derive(Clone)]
struct HubState {
  responses: Arc<Mutex<VecDeque<HubResponse>>>,
  tx:        mpsc::UnboundedSender<ObservedForm>,
}

async fn hub_handler(
  State(hub): State<HubState>,
  Form(form): Form<ObservedForm>,
) -> Response {
  let _ = hub.tx.send(form);
  match hub.responses.lock().unwrap().pop_front() {
    Some(HubResponse::TempRedirect(loc)) => {
      (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, loc)])
        .into_response()
    }
    Some(HubResponse::PermRedirect(loc)) => {
      (StatusCode::PERMANENT_REDIRECT, [(header::LOCATION, loc)])
        .into_response()
    }
    None => StatusCode::ACCEPTED.into_response(),
  }
}

/// Spawn a hub that replies from `responses` in order, then 202s forever.
/// Returns its URL and the stream of observed request forms.
async fn spawn_hub(
  responses: Vec<HubResponse>,
) -> (String, mpsc::UnboundedReceiver<ObservedForm>) {
  let (tx, rx) = mpsc::unbounded_channel();
  let state = HubState {
    responses: Arc::new(Mutex::new(responses.into())),
    tx,
  };
  let app = Router::new().route("/", post(hub_handler)).with_state(state);

  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let url = format!("http://{}/", listener.local_addr().unwrap());
  tokio::spawn(async move {
    axum::serve(listener, app).await.unwrap();
  });

  (url, rx)
}

async fn observed(
  rx: &mut mpsc::UnboundedReceiver<ObservedForm>,
  within: Duration,
) -> ObservedForm {
  tokio::time::timeout(within, rx.recv())
    .await
    .expect("hub saw no request within the deadline")
    .expect("hub channel closed")
}

// ─── Subscriber harness ──────────────────────────────────────────────────────

async fn subscriber() -> Subscriber<SqliteStore> {
  let store = SqliteStore::open_in_memory().await.unwrap();
  Subscriber::new(
    SubscriberConfig {
      host:       "127.0.0.1".to_string(),
      port:       0,
      store_path: ":memory:".into(),
    },
    Arc::new(store),
  )
  .unwrap()
}

fn tok() -> CancellationToken {
  CancellationToken::new()
}

/// Drive one hub-side verification request into the callback router.
async fn post_callback(
  state: &AppState<SqliteStore>,
  callback: &str,
  fields: &[(&str, &str)],
) -> (StatusCode, String) {
  let body = fields
    .iter()
    .map(|(k, v)| format!("{k}={v}"))
    .collect::<Vec<_>>()
    .join("&");

  let req = Request::builder()
    .method("POST")
    .uri(format!("/callback/{callback}"))
    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
    .body(Body::from(body))
    .unwrap();

  let resp = router(state.clone()).oneshot(req).await.unwrap();
  let status = resp.status();
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
    .await
    .unwrap();
  (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Subscribe against `hub_url` and return the callback identifier the hub
/// observed.
async fn subscribe_and_observe(
  sub: &Subscriber<SqliteStore>,
  hub_url: &str,
  rx: &mut mpsc::UnboundedReceiver<ObservedForm>,
) -> String {
  sub
    .store()
    .index_offer(HashMap::from([(TOPIC.to_owned(), hub_url.to_owned())]))
    .await
    .unwrap();
  sub.subscribe(&tok(), TOPIC, hub_url).await.unwrap();

  let form = observed(rx, Duration::from_secs(2)).await;
  assert_eq!(form.get("hub.mode").map(String::as_str), Some("subscribe"));
  assert_eq!(form.get("hub.topic").map(String::as_str), Some(TOPIC));
  form.get("hub.callback").expect("hub.callback sent").clone()
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_subscribe_verify_and_expire() {
  let (hub_url, mut rx) = spawn_hub(vec![]).await;
  let sub = subscriber().await;
  let state = sub.state();

  let callback = subscribe_and_observe(&sub, &hub_url, &mut rx).await;
  assert_eq!(callback.len(), 32);

  // Recorded but unverified: not yet active.
  let err = sub
    .store()
    .get_active_callback(TOPIC, &hub_url)
    .await
    .unwrap_err();
  assert!(matches!(err, StoreError::NoRows));

  let (status, body) = post_callback(
    &state,
    &callback,
    &[
      ("hub.mode", "subscribe"),
      ("hub.topic", TOPIC),
      ("hub.challenge", "kitties"),
      ("hub.lease_seconds", "2"),
    ],
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, "kitties");

  assert_eq!(
    sub.store().get_active_callback(TOPIC, &hub_url).await.unwrap(),
    callback
  );
  assert!(sub.scheduler().contains(&callback));

  let row = sub.store().get_subscription(&callback).await.unwrap();
  assert!(row.lease_expiration.is_some());

  // No re-verification arrives, so the lease lapses on its own.
  tokio::time::sleep(Duration::from_secs(3)).await;
  let err = sub
    .store()
    .get_active_callback(TOPIC, &hub_url)
    .await
    .unwrap_err();
  assert!(matches!(err, StoreError::NoRows));
}

#[tokio::test]
async fn immediate_denial_invalidates() {
  let (hub_url, mut rx) = spawn_hub(vec![]).await;
  let sub = subscriber().await;
  let state = sub.state();

  let callback = subscribe_and_observe(&sub, &hub_url, &mut rx).await;

  let (status, _body) = post_callback(
    &state,
    &callback,
    &[
      ("hub.mode", "denied"),
      ("hub.topic", TOPIC),
      ("hub.challenge", "kitties"),
      ("hub.reason", "because"),
    ],
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let err = sub.store().get_subscription(&callback).await.unwrap_err();
  assert!(matches!(err, StoreError::NoRows));

  let page = sub.store().get_inactive(10, "", "").await.unwrap();
  assert_eq!(page.subscriptions.len(), 1);
  let reason = page.subscriptions[0]
    .inactive_reason
    .as_deref()
    .expect("denial recorded a reason");
  assert!(reason.starts_with("denied:"), "reason: {reason}");
}

#[tokio::test]
async fn redirect_chain_lands_on_the_new_hub() {
  let (hub2_url, mut rx2) = spawn_hub(vec![]).await;
  let (hub1_url, mut rx1) =
    spawn_hub(vec![HubResponse::TempRedirect(hub2_url.clone())]).await;
  let sub = subscriber().await;

  sub
    .store()
    .index_offer(HashMap::from([(TOPIC.to_owned(), hub1_url.clone())]))
    .await
    .unwrap();
  sub.subscribe(&tok(), TOPIC, &hub1_url).await.unwrap();

  let first = observed(&mut rx1, Duration::from_secs(2)).await;
  let second = observed(&mut rx2, Duration::from_secs(2)).await;
  assert_eq!(first.get("hub.topic"), second.get("hub.topic"));

  // The recorded row references the hub that finally accepted.
  let landed = second.get("hub.callback").unwrap();
  let page = sub.store().get_inactive(10, "", "").await.unwrap();
  let row = page
    .subscriptions
    .iter()
    .find(|s| &s.callback == landed)
    .expect("subscription recorded");
  assert_eq!(row.hub_url, hub2_url);
}

#[tokio::test]
async fn renewal_reuses_the_callback_and_preserves_the_lease_stamp() {
  let (hub_url, mut rx) = spawn_hub(vec![]).await;
  let sub = subscriber().await;
  let state = sub.state();

  let callback = subscribe_and_observe(&sub, &hub_url, &mut rx).await;

  let (status, _) = post_callback(
    &state,
    &callback,
    &[
      ("hub.mode", "subscribe"),
      ("hub.topic", TOPIC),
      ("hub.challenge", "kitties"),
      ("hub.lease_seconds", "9"),
    ],
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let before = sub.store().get_subscription(&callback).await.unwrap();

  // The renewal timer fires at a third of the lease (~3s) and re-POSTs
  // with the same identifier.
  let renewal = observed(&mut rx, Duration::from_secs(6)).await;
  assert_eq!(
    renewal.get("hub.callback").map(String::as_str),
    Some(callback.as_str())
  );
  assert_eq!(
    renewal.get("hub.mode").map(String::as_str),
    Some("subscribe")
  );

  // The hub re-verifies with a fresh challenge; the lease advances but the
  // chain's initiation stamp does not move.
  let (status, body) = post_callback(
    &state,
    &callback,
    &[
      ("hub.mode", "subscribe"),
      ("hub.topic", TOPIC),
      ("hub.challenge", "doggies"),
      ("hub.lease_seconds", "9"),
    ],
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, "doggies");

  let after = sub.store().get_subscription(&callback).await.unwrap();
  assert_eq!(after.lease_initiated, before.lease_initiated);
  assert!(after.lease_expiration > before.lease_expiration);
}

#[tokio::test]
async fn cancelled_initiate_leaves_no_subscription() {
  let (hub_url, mut rx) = spawn_hub(vec![]).await;
  let sub = subscriber().await;

  sub
    .store()
    .index_offer(HashMap::from([(TOPIC.to_owned(), hub_url.clone())]))
    .await
    .unwrap();

  let cancelled = CancellationToken::new();
  cancelled.cancel();

  let err = sub.subscribe(&cancelled, TOPIC, &hub_url).await.unwrap_err();
  assert!(matches!(err, Error::Cancelled));

  // The hub never heard from us and no subscription row exists — only the
  // bare offer remains.
  assert!(
    tokio::time::timeout(Duration::from_millis(300), rx.recv())
      .await
      .is_err()
  );
  let page = sub.store().get_inactive(10, "", "").await.unwrap();
  assert_eq!(page.subscriptions.len(), 1);
  assert_eq!(page.subscriptions[0].callback, "");
}

#[tokio::test]
async fn unsubscribe_confirms_through_the_callback() {
  let (hub_url, mut rx) = spawn_hub(vec![]).await;
  let sub = subscriber().await;
  let state = sub.state();

  let callback = subscribe_and_observe(&sub, &hub_url, &mut rx).await;

  let (status, _) = post_callback(
    &state,
    &callback,
    &[
      ("hub.mode", "subscribe"),
      ("hub.topic", TOPIC),
      ("hub.challenge", "kitties"),
      ("hub.lease_seconds", "60"),
    ],
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert!(sub.scheduler().contains(&callback));

  sub.unsubscribe(&tok(), &callback).await.unwrap();
  let request = observed(&mut rx, Duration::from_secs(2)).await;
  assert_eq!(
    request.get("hub.mode").map(String::as_str),
    Some("unsubscribe")
  );
  assert_eq!(
    request.get("hub.callback").map(String::as_str),
    Some(callback.as_str())
  );

  // Still active until the hub confirms.
  assert!(sub.store().get_subscription(&callback).await.is_ok());

  let (status, body) = post_callback(
    &state,
    &callback,
    &[
      ("hub.mode", "unsubscribe"),
      ("hub.topic", TOPIC),
      ("hub.challenge", "byebye"),
    ],
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, "byebye");

  let err = sub.store().get_subscription(&callback).await.unwrap_err();
  assert!(matches!(err, StoreError::NoRows));
  assert!(!sub.scheduler().contains(&callback));
  let err = sub
    .store()
    .get_active_callback(TOPIC, &hub_url)
    .await
    .unwrap_err();
  assert!(matches!(err, StoreError::NoRows));
}

// ─── Decision table ──────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_callback_gets_404() {
  let sub = subscriber().await;
  let state = sub.state();

  let (status, _) = post_callback(
    &state,
    "00000000000000000000000000000000",
    &[
      ("hub.mode", "subscribe"),
      ("hub.topic", TOPIC),
      ("hub.challenge", "kitties"),
      ("hub.lease_seconds", "5"),
    ],
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_mode_gets_404() {
  let sub = subscriber().await;
  let state = sub.state();

  let (status, body) = post_callback(
    &state,
    "00000000000000000000000000000000",
    &[("hub.mode", "dance"), ("hub.challenge", "kitties")],
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(body.contains("hub.mode"), "body: {body}");
}

#[tokio::test]
async fn missing_mode_gets_404() {
  let sub = subscriber().await;
  let state = sub.state();

  let (status, _) = post_callback(
    &state,
    "00000000000000000000000000000000",
    &[("hub.challenge", "kitties")],
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn subscribe_verification_without_lease_gets_404() {
  let (hub_url, mut rx) = spawn_hub(vec![]).await;
  let sub = subscriber().await;
  let state = sub.state();

  let callback = subscribe_and_observe(&sub, &hub_url, &mut rx).await;

  let (status, _) = post_callback(
    &state,
    &callback,
    &[
      ("hub.mode", "subscribe"),
      ("hub.topic", TOPIC),
      ("hub.challenge", "kitties"),
    ],
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  // The row is untouched and still pending.
  let err = sub
    .store()
    .get_active_callback(TOPIC, &hub_url)
    .await
    .unwrap_err();
  assert!(matches!(err, StoreError::NoRows));
}

#[tokio::test]
async fn denial_while_active_fails_closed() {
  let (hub_url, mut rx) = spawn_hub(vec![]).await;
  let sub = subscriber().await;
  let state = sub.state();

  let callback = subscribe_and_observe(&sub, &hub_url, &mut rx).await;
  post_callback(
    &state,
    &callback,
    &[
      ("hub.mode", "subscribe"),
      ("hub.topic", TOPIC),
      ("hub.challenge", "kitties"),
      ("hub.lease_seconds", "60"),
    ],
  )
  .await;
  assert!(sub.store().get_subscription(&callback).await.is_ok());

  // A late denial kills even an established subscription.
  let (status, _) = post_callback(
    &state,
    &callback,
    &[("hub.mode", "denied"), ("hub.reason", "policy")],
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let err = sub.store().get_subscription(&callback).await.unwrap_err();
  assert!(matches!(err, StoreError::NoRows));
  assert!(!sub.scheduler().contains(&callback));
}
