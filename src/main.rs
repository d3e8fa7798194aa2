use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rpde_proxy::config::{ClearCacheFlag, ProxyConfig};
use rpde_proxy::fetch::HttpFetcher;
use rpde_proxy::lifecycle::{runtime, LifecycleContext};
use rpde_proxy::queue::InMemoryDelayQueue;
use rpde_proxy::server::{build_router, AppState};
use rpde_proxy::store::InMemoryStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rpde_proxy=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ProxyConfig::from_env();

    // In-memory collaborators back local runs; a deployment binds these
    // traits to the real queue transport and relational store instead.
    let ctx = Arc::new(LifecycleContext {
        queue: Arc::new(InMemoryDelayQueue::new()),
        store: Arc::new(InMemoryStore::new()),
        fetcher: Arc::new(HttpFetcher::default()),
        config,
        clear_cache: ClearCacheFlag::Env,
    });

    let cancel = CancellationToken::new();
    let workers = runtime::spawn(ctx.clone(), cancel.clone());

    let app = build_router(AppState::new(ctx));
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .unwrap();

    cancel.cancel();
    for worker in workers {
        let _ = worker.await;
    }
}
