use std::sync::Arc;

use tower_http::cors::CorsLayer;

use burner_sms::auth::{StaticTokenVerifier, TokenVerifier};
use burner_sms::config::ServiceConfig;
use burner_sms::error::PoolError;
use burner_sms::hub::NotificationHub;
use burner_sms::hub::ws::ws_routes;
use burner_sms::ingest::WebhookIngestor;
use burner_sms::ingest::routes::webhook_routes;
use burner_sms::messages::routes::message_routes;
use burner_sms::pool::NumberPool;
use burner_sms::pool::routes::pool_routes;
use burner_sms::providers::SmsProvider;
use burner_sms::reaper::{spawn_expiry_reaper, spawn_retention_sweep};
use burner_sms::store::{LibSqlStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env()?;

    eprintln!("📡 Burner SMS v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Port: {}", config.port);
    eprintln!("   Database: {}", config.db_path);
    eprintln!(
        "   Reap interval: {}s, retention: {}h",
        config.reap_interval.as_secs(),
        config.message_max_age.as_secs() / 3600
    );

    // ── Store ───────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_local(db_path).await.map_err(|e| {
        eprintln!("Error: failed to open database at {}: {e}", config.db_path);
        e
    })?);

    // Seed the built-in providers; idempotent across restarts.
    for (name, priority) in [("twilio", 1), ("nexmo", 2)] {
        let mut provider = SmsProvider::new(name, priority);
        provider.webhook_url_template = Some("/api/webhooks/sms?provider={provider}".into());
        store.seed_provider(&provider).await?;
    }

    // ── Core components ─────────────────────────────────────────────────
    let hub = NotificationHub::new();
    let pool = NumberPool::new(Arc::clone(&store), Arc::clone(&hub));
    let ingestor = WebhookIngestor::new(Arc::clone(&store), Arc::clone(&hub));

    // Seed pool numbers from configuration.
    let mut seeded = 0;
    for seed in &config.number_seeds {
        match pool
            .provision(&seed.phone_number, &seed.country_code, None)
            .await
        {
            Ok(_) => seeded += 1,
            Err(PoolError::DuplicateNumber(_)) => {}
            Err(e) => {
                eprintln!("   Warning: could not seed {}: {e}", seed.phone_number);
            }
        }
    }
    if seeded > 0 {
        eprintln!("   Seeded {seeded} pool numbers");
    }

    // ── Auth ────────────────────────────────────────────────────────────
    if config.token_seeds.is_empty() {
        eprintln!("   Warning: BURNER_SMS_TOKENS is empty — no client can authenticate");
    }
    let verifier: Arc<dyn TokenVerifier> =
        Arc::new(StaticTokenVerifier::from_seeds(&config.token_seeds));

    // ── Housekeeping tasks ──────────────────────────────────────────────
    let _reaper_handle = spawn_expiry_reaper(Arc::clone(&pool), config.reap_interval);
    let _retention_handle = spawn_retention_sweep(
        Arc::clone(&store),
        config.retention_interval,
        config.message_max_age,
    );

    // ── HTTP/WS server ──────────────────────────────────────────────────
    let app = ws_routes(Arc::clone(&hub), Arc::clone(&verifier))
        .merge(pool_routes(Arc::clone(&pool), Arc::clone(&verifier)))
        .merge(message_routes(Arc::clone(&store), Arc::clone(&verifier)))
        .merge(webhook_routes(
            Arc::clone(&ingestor),
            Arc::clone(&store),
            config.dev_routes,
        ))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    eprintln!("   WS: ws://0.0.0.0:{}/ws?token=...", config.port);
    eprintln!(
        "   Webhooks: http://0.0.0.0:{}/api/webhooks/sms?provider=...\n",
        config.port
    );
    tracing::info!(port = config.port, "Server started");
    axum::serve(listener, app).await?;

    Ok(())
}
