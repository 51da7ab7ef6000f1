use std::future::ready;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use once_cell::sync::Lazy;
use tower_http::trace::TraceLayer;

use crate::auth::{self, KeyRegistry};
use crate::dedup::DedupCache;
use crate::endpoints;
use crate::limiter::SlidingWindowLimiter;
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::service::{EventService, ServiceSettings};
use crate::store::EventStore;
use crate::time::TimeSource;

#[derive(Clone)]
pub struct State {
    pub service: Arc<EventService>,
    pub keys: Arc<dyn KeyRegistry + Send + Sync>,
    pub limiter: Arc<SlidingWindowLimiter>,
}

async fn index() -> &'static str {
    "inbox"
}

pub fn router<
    TZ: TimeSource + Send + Sync + 'static,
    S: EventStore + Send + Sync + 'static,
    K: KeyRegistry + Send + Sync + 'static,
>(
    timesource: TZ,
    store: Arc<S>,
    keys: Arc<K>,
    dedup: Arc<DedupCache>,
    limiter: Arc<SlidingWindowLimiter>,
    settings: ServiceSettings,
    metrics: bool,
) -> Router {
    Lazy::force(&endpoints::APP_START);

    let max_request_bytes = settings.max_request_bytes;
    let service = Arc::new(EventService::new(
        store,
        dedup,
        Arc::new(timesource),
        settings,
    ));
    let state = State {
        service,
        keys,
        limiter,
    };

    let authenticated = Router::new()
        .route("/events", post(endpoints::create_event))
        .route("/events/inbox", get(endpoints::get_inbox))
        .route(
            "/events/:event_id",
            get(endpoints::get_event).delete(endpoints::ack_event),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ))
        .layer(DefaultBodyLimit::max(max_request_bytes));

    let router = Router::new()
        .route("/", get(index))
        .route("/status", get(endpoints::status))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to. Installing a global recorder
    // when the crate is used as a library (during tests etc) does not work
    // well.
    if metrics {
        let recorder_handle = setup_metrics_recorder();
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
