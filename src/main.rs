use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use apexpips_backend::{
    config::settings::Settings,
    db::redis::RedisPool,
    middleware::metrics::{install_recorder, Metrics},
    routes,
    services::market_data::{self, HttpQuoteSource, PriceCache, QuoteSource},
    services::notifier::Mailer,
};

fn init_logging() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    log::info!("Starting Apex Pips backend…");

    let settings = Settings::new()
        .map_err(|e| anyhow::anyhow!("failed to load settings: {e}"))?;
    let port = settings.server_port;

    let pg_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await
        .context("postgres")?;

    // redis only backs the price snapshot, so run without it if unreachable
    let redis_pool = match RedisPool::new(&settings.redis_url).await {
        Ok(r) => Some(r),
        Err(e) => {
            log::warn!("redis unavailable, price snapshots disabled: {e}");
            None
        }
    };

    let prometheus = install_recorder();
    if !settings.email_enabled() {
        log::warn!("RESEND_API_KEY not set; emails will be skipped");
    }
    let mailer = Mailer::from_settings(&settings).context("mailer")?;

    // --- price board poller ------------------------------------------------
    let cache = Arc::new(PriceCache::default());
    if let Some(redis) = &redis_pool {
        market_data::warm_start(&cache, redis).await;
    }
    let source: Arc<dyn QuoteSource> =
        Arc::new(HttpQuoteSource::new(&settings.twelvedata_api_key).context("quote source")?);
    // restarts the poll loop if it panics, so the board never silently freezes
    let _supervisor = market_data::supervise_price_poller(
        cache.clone(),
        source,
        redis_pool.clone(),
        Duration::from_secs(settings.price_poll_secs),
    );

    let settings_data = web::Data::new(settings);
    let pg_data = web::Data::new(pg_pool);
    let cache_data = web::Data::from(cache);
    let mailer_data = web::Data::new(mailer);
    let prometheus_data = prometheus.map(web::Data::new);

    HttpServer::new(move || {
        let mut app = App::new()
            .wrap(Metrics)
            .wrap(Logger::default())
            .app_data(settings_data.clone())
            .app_data(pg_data.clone())
            .app_data(cache_data.clone())
            .app_data(mailer_data.clone());
        if let Some(p) = &prometheus_data {
            app = app.app_data(p.clone());
        }
        app.configure(routes::configure)
    })
        .bind(("0.0.0.0", port))?
        .run()
        .await?;

    Ok(())
}
