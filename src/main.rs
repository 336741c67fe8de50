use {
    axum::{
        Router,
        extract::DefaultBodyLimit,
        routing::{get, post},
    },
    keyshop::{
        AppState,
        adapters::{gateway::GatewayRegistry, panel::HostRegistry},
        config::AppConfig,
        infra::postgres::host_repo,
        services::{
            notify::{BotApiNotifier, LogNotifier, Notifier},
            sweeper,
        },
    },
    sqlx::postgres::PgPoolOptions,
    std::{env, sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
    tower::ServiceBuilder,
    tower_http::timeout::TimeoutLayer,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let config = Arc::new(AppConfig::from_env());

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&database_url)
        .await
        .expect("failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let host_rows = host_repo::all(&pool).await.expect("failed to load hosts");
    let hosts = Arc::new(HostRegistry::from_rows(&host_rows).expect("bad host configuration"));
    tracing::info!(count = host_rows.len(), "host registry loaded");

    let notifier: Arc<dyn Notifier> = match &config.notify_url {
        Some(url) => Arc::new(BotApiNotifier::new(
            reqwest::Client::new(),
            url.clone(),
        )),
        None => Arc::new(LogNotifier),
    };

    let state = AppState {
        pool,
        gateways: Arc::new(GatewayRegistry::new(&config.gateways)),
        hosts,
        notifier,
        config: config.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_handle = tokio::spawn(sweeper::run_sweeper(state.clone(), shutdown_rx));

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/webhooks/{provider}",
            post(keyshop::adapters::webhook::provider_webhook_handler),
        )
        .route(
            "/orders",
            post(keyshop::adapters::storefront::create_order_handler),
        )
        .route(
            "/orders/{order_id}/refund",
            post(keyshop::adapters::storefront::refund_order_handler),
        )
        .route(
            "/referrals/{buyer_id}/balance",
            get(keyshop::adapters::storefront::referral_balance_handler),
        )
        .layer(
            ServiceBuilder::new()
                // Providers time their webhooks out aggressively; anything
                // slower than this should have been queued, not awaited.
                .layer(TimeoutLayer::new(Duration::from_secs(10)))
                .layer(DefaultBodyLimit::max(64 * 1024)),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("failed to bind listen address");
    tracing::info!(addr = %config.listen_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
