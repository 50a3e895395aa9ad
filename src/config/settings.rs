use dotenv::dotenv;
use std::env;

const DEFAULT_EMAIL_FROM: &str = "Apex Pips <onboarding@resend.dev>";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub admin_name: String,
    pub admin_password: String,
    pub jwt_secret: String,
    pub hmac_secret: Option<String>,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub twelvedata_api_key: String,
    pub price_poll_secs: u64,
    pub demo_starting_balance: f64,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv().ok(); // loads `.env` file automatically

        let server_port = env::var("SERVER_PORT")
            .map_err(|_| "SERVER_PORT missing from env")?
            .parse::<u16>()
            .map_err(|_| "SERVER_PORT must be a valid u16")?;

        let database_url = env::var("DATABASE_URL").map_err(|_| "DATABASE_URL missing")?;
        let redis_url = env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".into());

        let admin_name = env::var("ADMIN_NAME").map_err(|_| "ADMIN_NAME missing")?;
        let admin_password = env::var("ADMIN_PASSWORD").map_err(|_| "ADMIN_PASSWORD missing")?;
        if admin_name.is_empty() || admin_password.is_empty() {
            return Err("ADMIN_NAME / ADMIN_PASSWORD must not be empty".into());
        }

        let jwt_secret = env::var("JWT_SECRET").map_err(|_| "JWT_SECRET missing")?;
        let hmac_secret = env::var("AP_HMAC_SECRET").ok().filter(|s| !s.is_empty());
        let resend_api_key = env::var("RESEND_API_KEY").ok().filter(|s| !s.is_empty());
        let email_from = env::var("EMAIL_FROM").unwrap_or_else(|_| DEFAULT_EMAIL_FROM.into());
        let twelvedata_api_key =
            env::var("TWELVEDATA_API_KEY").unwrap_or_else(|_| "demo".into());

        let price_poll_secs = match env::var("PRICE_POLL_SECS") {
            Ok(v) => v
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or("PRICE_POLL_SECS must be a positive integer")?,
            Err(_) => 30,
        };

        let demo_starting_balance = match env::var("DEMO_STARTING_BALANCE") {
            Ok(v) => v
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite() && *n >= 0.0)
                .ok_or("DEMO_STARTING_BALANCE must be a non-negative number")?,
            Err(_) => 10_000.0,
        };

        Ok(Self {
            server_port,
            database_url,
            redis_url,
            admin_name,
            admin_password,
            jwt_secret,
            hmac_secret,
            resend_api_key,
            email_from,
            twelvedata_api_key,
            price_poll_secs,
            demo_starting_balance,
        })
    }

    /// Email delivery is skipped (and logged) when no Resend key is configured.
    pub fn email_enabled(&self) -> bool {
        self.resend_api_key.is_some()
    }

    /// Settings for tests and tooling that never touch the environment.
    pub fn for_tests() -> Self {
        Self {
            server_port: 0,
            database_url: "postgres://localhost/apexpips_test".into(),
            redis_url: "redis://127.0.0.1:6379".into(),
            admin_name: "admin".into(),
            admin_password: "hunter2".into(),
            jwt_secret: "test-jwt-secret".into(),
            hmac_secret: None,
            resend_api_key: None,
            email_from: DEFAULT_EMAIL_FROM.into(),
            twelvedata_api_key: "demo".into(),
            price_poll_secs: 30,
            demo_starting_balance: 10_000.0,
        }
    }
}
