use crate::config::{Config, StoreBackend};
use crate::error::Result;
use crate::handlers::{
    create_todo, delete_todo, get_todo, health_check, list_todos, readiness_check, update_todo,
    AppState,
};
use crate::health::HealthChecker;
use crate::middleware::{logging_middleware, rate_limit_middleware};
use crate::notification::LogNotifier;
use crate::rate_limiter::RateLimiter;
use crate::store::{CounterStore, MemoryCounterStore, RedisCounterStore};
use crate::todo::InMemoryTodoRepository;
use axum::http::{header, Method};
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Assemble the router.
///
/// Layer order, outermost first: tracing, request logging, admission
/// control, CORS. Every route, preflight included, is counted.
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let api = Router::new()
        .route("/todos", get(list_todos).post(create_todo))
        .route(
            "/todos/:id",
            get(get_todo).put(update_todo).delete(delete_todo),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    logging_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    rate_limit_middleware,
                ))
                .layer(cors),
        )
        .with_state(state)
}

/// Open the configured counter store. An unreachable Redis aborts startup.
pub async fn connect_store(config: &Config) -> Result<Arc<dyn CounterStore>> {
    let store: Arc<dyn CounterStore> = match config.rate_limit.backend {
        StoreBackend::Redis => Arc::new(RedisCounterStore::connect(&config.redis).await?),
        StoreBackend::Memory => {
            tracing::warn!("Using in-process counters; limits are not shared between instances");
            Arc::new(MemoryCounterStore::new())
        }
    };
    Ok(store)
}

pub fn build_state(config: &Config, store: Arc<dyn CounterStore>) -> AppState {
    AppState {
        limiter: Arc::new(RateLimiter::new(store.clone(), &config.rate_limit)),
        todos: Arc::new(InMemoryTodoRepository::new()),
        notifier: Arc::new(LogNotifier),
        health: HealthChecker::new(store),
        trust_proxy_headers: config.server.trust_proxy_headers,
    }
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self> {
        let store = connect_store(&config).await?;
        let app = create_app(build_state(&config, store));

        Ok(Self {
            app,
            bind_addr: config.server.bind_addr,
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Turnstile server listening on {}", listener.local_addr()?);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        // Peer addresses feed client identity.
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
