//! Destination resolution for the two delivery lanes.
//!
//! Each lane delivers to exactly one sink. A caller-supplied post function
//! always wins over a configured URL for the same lane. Resolution happens
//! once, when the queue is built, and never per delivery.

use std::sync::Arc;

use beacon_core::JobKind;
use serde::{Deserialize, Serialize};

use crate::{
    client::{ClientConfig, HttpTransport, PostFn, PostTransport, Transport},
    error::Result,
};

/// Collector URLs per lane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackUrls {
    /// URL receiving tracking events.
    #[serde(default)]
    pub event: Option<String>,
    /// URL receiving visit records.
    #[serde(default)]
    pub visit: Option<String>,
}

/// Caller-supplied post functions per lane.
#[derive(Clone, Default)]
pub struct TrackPosts {
    /// Function receiving tracking events.
    pub event: Option<PostFn>,
    /// Function receiving visit records.
    pub visit: Option<PostFn>,
}

impl TrackPosts {
    /// Sets the function receiving tracking events.
    #[must_use]
    pub fn event(mut self, post: PostFn) -> Self {
        self.event = Some(post);
        self
    }

    /// Sets the function receiving visit records.
    #[must_use]
    pub fn visit(mut self, post: PostFn) -> Self {
        self.visit = Some(post);
        self
    }
}

impl std::fmt::Debug for TrackPosts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackPosts")
            .field("event", &self.event.is_some())
            .field("visit", &self.visit.is_some())
            .finish()
    }
}

/// How one lane reaches the collector.
#[derive(Debug, Clone)]
pub enum Route {
    /// Caller-supplied post function.
    Post(PostTransport),
    /// HTTP POST to a collector URL.
    Http(HttpTransport),
    /// Any other transport, typically a test double.
    Custom(Arc<dyn Transport>),
}

impl Route {
    /// Transport performing the delivery.
    pub fn transport(&self) -> &dyn Transport {
        match self {
            Self::Post(post) => post,
            Self::Http(http) => http,
            Self::Custom(custom) => custom.as_ref(),
        }
    }
}

/// Resolved destinations of both lanes.
#[derive(Debug, Clone, Default)]
pub struct Sink {
    event: Option<Route>,
    visit: Option<Route>,
}

impl Sink {
    /// Resolves routes from post functions and URLs.
    ///
    /// A lane with neither is left without a route; deliveries on it report
    /// a missing sink instead of failing here.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if a URL that would be
    /// used is invalid or the HTTP client cannot be built.
    pub fn resolve(posts: &TrackPosts, urls: &TrackUrls, client: &ClientConfig) -> Result<Self> {
        let mut http_client: Option<reqwest::Client> = None;
        let mut route = |post: &Option<PostFn>, url: &Option<String>| -> Result<Option<Route>> {
            if let Some(post) = post {
                return Ok(Some(Route::Post(PostTransport::new(post.clone()))));
            }
            let Some(url) = url else {
                return Ok(None);
            };
            let transport = match http_client.clone() {
                Some(shared) => HttpTransport::with_client(shared, url, client.clone())?,
                None => {
                    let transport = HttpTransport::new(url, client.clone())?;
                    http_client = Some(transport.client().clone());
                    transport
                },
            };
            Ok(Some(Route::Http(transport)))
        };

        let event = route(&posts.event, &urls.event)?;
        let visit = route(&posts.visit, &urls.visit)?;
        Ok(Self { event, visit })
    }

    /// Builds a sink from explicit transports.
    pub fn from_transports(
        event: Option<Arc<dyn Transport>>,
        visit: Option<Arc<dyn Transport>>,
    ) -> Self {
        Self { event: event.map(Route::Custom), visit: visit.map(Route::Custom) }
    }

    /// Route of the given lane, if any.
    pub fn route(&self, kind: JobKind) -> Option<&Route> {
        match kind {
            JobKind::Tracking => self.event.as_ref(),
            JobKind::Visitor => self.visit.as_ref(),
        }
    }

    /// Transport of the given lane, if any.
    pub fn transport_for(&self, kind: JobKind) -> Option<&dyn Transport> {
        self.route(kind).map(Route::transport)
    }
}
