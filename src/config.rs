use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub currency: String,
    pub payment: PaymentConfig,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// When set, processor failures degrade to a simulated transaction
    /// instead of surfacing an error. Must stay off in production.
    pub allow_mock: bool,
    pub poll_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let currency = env::var("APP_CURRENCY").unwrap_or_else(|_| "SAR".to_string());

        let payment = PaymentConfig {
            base_url: env::var("PAYMENT_BASE_URL").ok().filter(|s| !s.is_empty()),
            api_key: env::var("PAYMENT_API_KEY").ok().filter(|s| !s.is_empty()),
            api_secret: env::var("PAYMENT_API_SECRET").ok().filter(|s| !s.is_empty()),
            allow_mock: env::var("PAYMENT_ALLOW_MOCK")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            poll_interval_secs: env::var("PAYMENT_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(3),
        };

        Ok(Self {
            port,
            database_url,
            host,
            currency,
            payment,
        })
    }
}
