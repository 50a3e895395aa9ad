pub mod config {
    pub mod settings;
}
pub mod db {
    pub mod models;
    pub mod queries;
    pub mod redis;
}
pub mod middleware {
    pub mod auth;
    pub mod metrics;
}
pub mod routes {
    pub mod account;
    pub mod admin;
    pub mod health;
    pub mod markets;
    pub mod notify;
    pub mod trading;

    use actix_web::web;

    use crate::middleware::auth::Auth;
    use crate::utils::errors::AppError;

    /// Full route table. Expects `Settings`, `PgPool`, `PriceCache` and
    /// `Mailer` as app data.
    pub fn configure(cfg: &mut web::ServiceConfig) {
        cfg.app_data(
            web::JsonConfig::default()
                .error_handler(|err, _req| AppError::validation(err.to_string()).into()),
        )
        .configure(health::configure)
        .configure(admin::configure)
        .service(
            web::scope("/api")
                .service(markets::markets_scope())
                .service(notify::notify_scope())
                .service(trading::quote)
                // everything below needs a user
                .service(
                    web::scope("")
                        .wrap(Auth)
                        .configure(account::configure)
                        .service(trading::trading_scope()),
                ),
        );
    }
}
pub mod services {
    pub mod account;
    pub mod admin;
    pub mod chat;
    pub mod ledger;
    pub mod market_data;
    pub mod notifier;
    pub mod trading_engine;
}

pub mod utils {
    pub mod errors;
    pub mod signature;
    pub mod types;
}
