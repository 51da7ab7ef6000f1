use std::future::Future;
use std::sync::Arc;

use time::Duration;
use tokio::net::TcpListener;

use crate::auth::MemoryKeyRegistry;
use crate::config::Config;
use crate::dedup::DedupCache;
use crate::limiter::SlidingWindowLimiter;
use crate::router;
use crate::service::ServiceSettings;
use crate::store::MemoryStore;
use crate::time::SystemTime;

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = Arc::new(MemoryStore::new());
    let keys = Arc::new(
        MemoryKeyRegistry::from_config(
            config.api_keys.clone(),
            config.default_rate_limit_per_minute,
        )
        .expect("failed to parse api key seed"),
    );
    let dedup = Arc::new(DedupCache::new(Duration::seconds(
        config.dedup_window_seconds as i64,
    )));
    let limiter = Arc::new(SlidingWindowLimiter::new());

    {
        // Hygiene only: correctness comes from the lazy expiry checks on
        // access, this just keeps idle entries from piling up.
        let dedup = dedup.clone();
        let limiter = limiter.clone();
        let every = std::time::Duration::from_secs(config.sweep_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = dedup.sweep(None);
                limiter.sweep(None);
                tracing::debug!(removed, "swept expired dedup entries");
            }
        });
    }

    let settings = ServiceSettings {
        max_payload_bytes: config.max_payload_bytes,
        max_request_bytes: config.max_request_size_bytes,
        default_inbox_limit: config.default_inbox_limit,
        max_inbox_limit: config.max_inbox_limit,
        retention: Duration::days(config.retention_days),
    };

    let app = router::router(
        SystemTime {},
        store,
        keys,
        dedup,
        limiter,
        settings,
        config.export_prometheus,
    );

    tracing::info!("listening on {:?}", listener.local_addr().unwrap());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap()
}
