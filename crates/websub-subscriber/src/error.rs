//! Error type for `websub-subscriber`.

use thiserror::Error;
use websub_core::StoreError;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("http transport error: {0}")]
  Http(#[from] reqwest::Error),

  /// The hub answered a subscribe/unsubscribe request with a status outside
  /// {202, 307, 308}. Nothing was recorded; the caller may retry.
  #[error("hub returned unexpected status {status}: {body}")]
  UnexpectedStatus { status: u16, body: String },

  #[error("redirect response carried no usable Location header")]
  MissingLocation,

  #[error("redirect chain exceeded {0} hops")]
  TooManyRedirects(usize),

  /// A hub verification request that the callback endpoint refuses —
  /// unknown mode, unparsable lease. Rendered as the 404 body.
  #[error("{0}")]
  Verification(String),

  #[error("topic discovery failed: {0}")]
  Discovery(String),

  #[error("operation cancelled")]
  Cancelled,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
