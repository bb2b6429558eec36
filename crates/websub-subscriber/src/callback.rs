//! The hub-facing callback endpoint.
//!
//! One handler behind `POST /callback/{id}` receives verification, denial,
//! and unsubscribe-confirmation requests. Hubs give subscribers only a few
//! seconds to answer a verification, so the handler does no outbound I/O:
//! it translates the form into a store command, pokes the renewal
//! scheduler, and answers.
//!
//! A 404 here is protocol, not failure: it tells the hub "I do not
//! recognise this callback; stop sending". Every store error — including
//! the zero-rows miss for an unknown or already-dead callback — maps to it.

use axum::{
  Form,
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use websub_core::store::SubscriptionStore;

use crate::{
  AppState,
  error::{Error, Result},
};

/// The `hub.*` form fields of a verification request. Everything is
/// optional at the decode layer; the decision logic decides what is
/// required for which mode.
#[derive(Debug, Deserialize)]
pub struct VerificationForm {
  #[serde(rename = "hub.mode")]
  pub mode:          Option<String>,
  #[serde(rename = "hub.topic")]
  pub topic:         Option<String>,
  #[serde(rename = "hub.challenge")]
  pub challenge:     Option<String>,
  #[serde(rename = "hub.lease_seconds")]
  pub lease_seconds: Option<String>,
  #[serde(rename = "hub.reason")]
  pub reason:        Option<String>,
}

pub async fn handler<S>(
  State(state): State<AppState<S>>,
  Path(callback): Path<String>,
  Form(form): Form<VerificationForm>,
) -> Response
where
  S: SubscriptionStore + 'static,
{
  match update_subscription(&state, &callback, &form).await {
    Ok(()) => {
      // Echo the challenge to prove we received this exact request.
      (StatusCode::OK, form.challenge.unwrap_or_default()).into_response()
    }
    Err(e) => {
      tracing::warn!(%callback, error = %e, "refusing hub callback");
      (StatusCode::NOT_FOUND, e.to_string()).into_response()
    }
  }
}

async fn update_subscription<S>(
  state: &AppState<S>,
  callback: &str,
  form: &VerificationForm,
) -> Result<()>
where
  S: SubscriptionStore + 'static,
{
  match form.mode.as_deref() {
    Some("subscribe") => {
      let lease = parse_lease_seconds(form.lease_seconds.as_deref())?;

      let lease_span = Duration::from_std(lease).map_err(|_| {
        Error::Verification("hub.lease_seconds is out of range".into())
      })?;
      let expiration = Utc::now() + lease_span;
      state
        .store
        .extend_lease(state.shutdown.child_token(), callback, expiration)
        .await?;

      state.scheduler.schedule(callback.to_owned(), lease);
      Ok(())
    }
    Some(mode @ ("unsubscribe" | "denied")) => {
      let reason =
        format!("{mode}: {}", form.reason.as_deref().unwrap_or_default());
      state
        .store
        .invalidate(state.shutdown.child_token(), callback, &reason)
        .await?;

      state.scheduler.cancel(callback);
      Ok(())
    }
    other => Err(Error::Verification(format!(
      "request lacked an appropriate hub.mode parameter (got {other:?})"
    ))),
  }
}

fn parse_lease_seconds(raw: Option<&str>) -> Result<std::time::Duration> {
  let raw = raw.ok_or_else(|| {
    Error::Verification("subscribe verification without hub.lease_seconds".into())
  })?;
  let seconds: i64 = raw.parse().map_err(|_| {
    Error::Verification(format!("hub.lease_seconds {raw:?} is not an integer"))
  })?;
  if seconds <= 0 {
    return Err(Error::Verification(format!(
      "hub.lease_seconds must be positive, got {seconds}"
    )));
  }
  Ok(std::time::Duration::from_secs(seconds as u64))
}
