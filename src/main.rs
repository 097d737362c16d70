//! Print storefront commerce service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use printshop_commerce::api::{router, AppState};
use printshop_commerce::catalog::{CatalogRepository, InMemoryCatalog, PgCatalog};
use printshop_commerce::config::AppConfig;
use printshop_commerce::gateway::{CardGatewayAdapter, CodAdapter, HttpProviderClient, WalletGatewayAdapter};
use printshop_commerce::notify::{LogNotifier, NatsNotifier, Notifier};
use printshop_commerce::service::OrderService;
use printshop_commerce::store::{InMemoryOrderStore, OrderSequence, OrderStore, PgOrderStore};
use printshop_commerce::{PaymentMethod, PricingEngine};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = AppConfig::from_env()?;

    let (catalog, store, sequence): (Arc<dyn CatalogRepository>, Arc<dyn OrderStore>, Arc<dyn OrderSequence>) = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            let store = Arc::new(PgOrderStore::new(db.clone()));
            (Arc::new(PgCatalog::new(db)), store.clone(), store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store and fixture catalog");
            let store = Arc::new(InMemoryOrderStore::new());
            (Arc::new(InMemoryCatalog::with_fixtures()), store.clone(), store)
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsNotifier::new(client, "orders.status")),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, logging notifications instead");
                Arc::new(LogNotifier)
            }
        },
        None => Arc::new(LogNotifier),
    };

    let card = &config.card;
    let wallet = &config.wallet;
    let service = OrderService::new(catalog, store, sequence, notifier, PricingEngine::new(config.lamination_fee), config.policy.clone())
        .with_provider(PaymentMethod::Card, Arc::new(HttpProviderClient::new(PaymentMethod::Card, &card.api_url, &card.key_id, &card.key_secret)))
        .with_provider(PaymentMethod::Wallet, Arc::new(HttpProviderClient::new(PaymentMethod::Wallet, &wallet.api_url, &wallet.key_id, &wallet.key_secret)));

    let state = AppState {
        service: Arc::new(service),
        card: Arc::new(CardGatewayAdapter::new(&card.webhook_secret)),
        wallet: Arc::new(WalletGatewayAdapter::new(&wallet.webhook_secret)),
        cod: Arc::new(CodAdapter::new(&config.cod_webhook_secret)),
    };

    tracing::info!("Print commerce listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, router(state)).await?;
    Ok(())
}
