//! The topic-discovery interface this crate consumes.
//!
//! Parsing hub/self links out of HTML bodies and HTTP Link headers is a
//! separate concern; the facade only needs something that answers "which
//! hubs serve this topic, and what is its canonical URL". Results are fed
//! straight into the store's offer index.

use std::{collections::HashSet, future::Future};

/// What discovery learned about one topic.
#[derive(Debug, Clone)]
pub struct DiscoveredTopic {
  /// The topic's canonical (`rel=self`) URL.
  pub self_url: String,
  /// Every hub advertised for the topic.
  pub hubs:     HashSet<String>,
}

/// A source of topic → hub offers.
pub trait TopicDiscovery: Send + Sync {
  fn discover<'a>(
    &'a self,
    topic: &'a str,
  ) -> impl Future<
    Output = Result<DiscoveredTopic, Box<dyn std::error::Error + Send + Sync>>,
  > + Send
  + 'a;
}
