//! Price board fed by public REST price APIs.
//! -----------------------------------------------------------------
//! ‣ CoinGecko `simple/price` for crypto (headline list + extended list).
//! ‣ Twelve Data `price` for forex, indices and commodities.
//! ‣ Anything a provider does not deliver falls back to a constant so the
//!   board always has a full set of assets.
//! ‣ `PriceCache` holds the latest snapshot and fans updates out over a
//!   `tokio::broadcast` channel, which backs the SSE price stream; the
//!   poller mirrors it into Redis and is restarted if it panics.
//! -----------------------------------------------------------------

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{self, Sender};

use crate::db::redis::RedisPool;
use crate::utils::errors::ApiError;

const CAPACITY: usize = 16;
const SNAPSHOT_TTL_SECS: u64 = 300;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub const COINGECKO_URL: &str = "https://api.coingecko.com/api/v3";
pub const TWELVEDATA_URL: &str = "https://api.twelvedata.com";

// ─── Asset catalogue ─────────────────────────────────────────────────────

/// (coingecko id, ticker, display name)
pub const SUPPORTED_CRYPTOS: &[(&str, &str, &str)] = &[
    ("bitcoin", "BTC", "Bitcoin"),
    ("ethereum", "ETH", "Ethereum"),
    ("solana", "SOL", "Solana"),
    ("ripple", "XRP", "Ripple"),
    ("binancecoin", "BNB", "BNB"),
    ("cardano", "ADA", "Cardano"),
    ("dogecoin", "DOGE", "Dogecoin"),
    ("polkadot", "DOT", "Polkadot"),
    ("avalanche-2", "AVAX", "Avalanche"),
    ("chainlink", "LINK", "Chainlink"),
    ("litecoin", "LTC", "Litecoin"),
    ("uniswap", "UNI", "Uniswap"),
    ("polygon", "MATIC", "Polygon"),
    ("tron", "TRX", "TRON"),
    ("shiba-inu", "SHIB", "Shiba Inu"),
    ("stellar", "XLM", "Stellar"),
    ("cosmos", "ATOM", "Cosmos"),
    ("near", "NEAR", "NEAR Protocol"),
    ("aptos", "APT", "Aptos"),
    ("sui", "SUI", "Sui"),
];

/// Headline crypto shown on the market overview.
const HEADLINE_CRYPTO: &[&str] = &["BTC", "ETH", "SOL", "XRP"];

/// Provider symbol, ticker, display name, fallback price.
struct Listed {
    provider_symbol: &'static str,
    symbol: &'static str,
    name: &'static str,
    fallback: f64,
}

const fn listed(provider_symbol: &'static str, symbol: &'static str, name: &'static str, fallback: f64) -> Listed {
    Listed { provider_symbol, symbol, name, fallback }
}

const FOREX: &[Listed] = &[
    listed("EUR/USD", "EUR", "EUR/USD", 1.0489),
    listed("GBP/USD", "GBP", "GBP/USD", 1.2654),
    listed("USD/JPY", "JPY", "USD/JPY", 153.82),
];

const INDICES: &[Listed] = &[
    listed("NDX", "NDX", "NASDAQ 100", 21854.50),
    listed("SPX", "SPX", "S&P 500", 6051.12),
    listed("DJI", "DJI", "Dow Jones", 43828.78),
];

const COMMODITIES: &[Listed] = &[
    listed("XAU/USD", "XAU", "Gold", 2652.80),
    listed("XAG/USD", "XAG", "Silver", 30.85),
    listed("WTI/USD", "WTI", "Crude Oil", 70.71),
];

/// Last-known crypto quotes (price, 24h change %) used when CoinGecko is down.
static CRYPTO_FALLBACK: Lazy<HashMap<&'static str, (f64, f64)>> = Lazy::new(|| {
    HashMap::from([
        ("BTC", (86077.0, -3.95)),
        ("ETH", (2923.0, -6.25)),
        ("SOL", (126.43, -4.11)),
        ("XRP", (2.05, -2.40)),
        ("USDT", (1.0, 0.0)),
    ])
});

// ─── Board ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    /// 24h change in percent; 0 when the provider does not report it.
    pub change: f64,
    pub is_up: bool,
}

impl Asset {
    fn new(symbol: &str, name: &str, price: f64, change: f64) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            price,
            change,
            is_up: change >= 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBoard {
    pub crypto: Vec<Asset>,
    pub forex: Vec<Asset>,
    pub indices: Vec<Asset>,
    pub commodities: Vec<Asset>,
    /// Every supported crypto with a live price.
    pub extended: Vec<Asset>,
    pub usdt: f64,
    pub updated_at: DateTime<Utc>,
    /// True when at least one section came from fallback constants.
    pub fallback: bool,
}

impl PriceBoard {
    /// A board built entirely from fallback constants.
    pub fn fallback() -> Self {
        build_board(None, &[None, None, None])
    }

    fn all(&self) -> impl Iterator<Item = &Asset> {
        self.crypto
            .iter()
            .chain(self.extended.iter())
            .chain(self.forex.iter())
            .chain(self.indices.iter())
            .chain(self.commodities.iter())
    }

    /// Looks an asset up by ticker (`BTC`, `BTC/USD`, `btcusdt`, `XAUUSD`) or display
    /// name (`EUR/USD`, `Gold`). Only assets with a positive price match.
    pub fn quote(&self, symbol: &str) -> Option<&Asset> {
        let wanted = symbol.trim().to_ascii_uppercase();
        let ticker = normalise_ticker(&wanted);
        self.all().filter(|a| a.price > 0.0).find(|a| {
            a.name.eq_ignore_ascii_case(&wanted) || a.symbol.eq_ignore_ascii_case(ticker)
        })
    }

    pub fn price_of(&self, symbol: &str) -> Option<f64> {
        if normalise_ticker(&symbol.trim().to_ascii_uppercase()) == "USDT" {
            return Some(self.usdt);
        }
        self.quote(symbol).map(|a| a.price)
    }

    /// USD amount → units of `symbol`; 0 when the price is unknown.
    pub fn usd_to_crypto(&self, usd: f64, symbol: &str) -> f64 {
        match self.price_of(symbol) {
            Some(p) if p > 0.0 => usd / p,
            _ => 0.0,
        }
    }

    /// Units of `symbol` → USD; 0 when the price is unknown.
    pub fn crypto_to_usd(&self, amount: f64, symbol: &str) -> f64 {
        self.price_of(symbol).map(|p| amount * p).unwrap_or(0.0)
    }
}

fn normalise_ticker(upper: &str) -> &str {
    for suffix in ["/USDT", "/USD", "USDT", "USD"] {
        if let Some(base) = upper.strip_suffix(suffix) {
            if !base.is_empty() {
                return base;
            }
        }
    }
    upper
}

/// CoinGecko quote: (price, 24h change %) keyed by coingecko id.
pub type CryptoQuotes = HashMap<String, (f64, f64)>;
/// Twelve Data quote: price keyed by provider symbol.
pub type ListedQuotes = HashMap<String, f64>;

/// Assembles a board from whatever the providers returned. `listed` holds
/// the forex, indices and commodities responses in that order.
pub fn build_board(crypto: Option<&CryptoQuotes>, listed: &[Option<ListedQuotes>; 3]) -> PriceBoard {
    let mut fallback = crypto.is_none();

    let crypto_asset = |id: &str, symbol: &str, name: &str| -> Asset {
        match crypto.and_then(|q| q.get(id)) {
            Some(&(price, change)) => Asset::new(symbol, name, price, change),
            None if crypto.is_none() => {
                let (price, change) = CRYPTO_FALLBACK.get(symbol).copied().unwrap_or((0.0, 0.0));
                Asset::new(symbol, name, price, change)
            }
            None => Asset::new(symbol, name, 0.0, 0.0),
        }
    };

    let catalogue = |sym: &str| SUPPORTED_CRYPTOS.iter().find(|(_, s, _)| *s == sym);
    let headline: Vec<Asset> = HEADLINE_CRYPTO
        .iter()
        .filter_map(|sym| catalogue(sym))
        .map(|(id, sym, name)| crypto_asset(id, sym, name))
        .collect();

    let extended: Vec<Asset> = SUPPORTED_CRYPTOS
        .iter()
        .map(|(id, sym, name)| crypto_asset(id, sym, name))
        .filter(|a| a.price > 0.0)
        .collect();

    let usdt = crypto
        .and_then(|q| q.get("tether"))
        .map(|&(p, _)| p)
        .filter(|p| *p > 0.0)
        .unwrap_or(1.0);

    let mut section = |list: &[Listed], quotes: &Option<ListedQuotes>| -> Vec<Asset> {
        list.iter()
            .map(|l| {
                let live = quotes
                    .as_ref()
                    .and_then(|q| q.get(l.provider_symbol))
                    .copied()
                    .filter(|p| p.is_finite() && *p > 0.0);
                if live.is_none() {
                    fallback = true;
                }
                Asset::new(l.symbol, l.name, live.unwrap_or(l.fallback), 0.0)
            })
            .collect()
    };

    let forex = section(FOREX, &listed[0]);
    let indices = section(INDICES, &listed[1]);
    let commodities = section(COMMODITIES, &listed[2]);

    PriceBoard {
        crypto: headline,
        forex,
        indices,
        commodities,
        extended,
        usdt,
        updated_at: Utc::now(),
        fallback,
    }
}

// ─── Provider adapters ───────────────────────────────────────────────────

#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn crypto(&self, ids: &[&str]) -> Result<CryptoQuotes, ApiError>;
    async fn listed(&self, symbols: &[&str]) -> Result<ListedQuotes, ApiError>;
}

/// Parses a CoinGecko `simple/price` body:
/// `{"bitcoin":{"usd":86000,"usd_24h_change":-1.2}, …}`
pub fn parse_coingecko(body: &Value) -> CryptoQuotes {
    let Some(obj) = body.as_object() else {
        return CryptoQuotes::new();
    };
    obj.iter()
        .filter_map(|(id, v)| {
            let price = v.get("usd")?.as_f64()?;
            let change = v.get("usd_24h_change").and_then(Value::as_f64).unwrap_or(0.0);
            Some((id.clone(), (price, change)))
        })
        .collect()
}

/// Parses a Twelve Data `price` body. Multi-symbol requests answer
/// `{"EUR/USD":{"price":"1.08"}, …}`, single-symbol ones `{"price":"1.08"}`;
/// error bodies (`{"status":"error",…}`) yield nothing.
pub fn parse_twelvedata(body: &Value, requested: &[&str]) -> ListedQuotes {
    fn price_field(v: &Value) -> Option<f64> {
        match v.get("price")? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    if body.get("status").and_then(Value::as_str) == Some("error") {
        return ListedQuotes::new();
    }
    if let (Some(p), [only]) = (price_field(body), requested) {
        return ListedQuotes::from([(only.to_string(), p)]);
    }
    requested
        .iter()
        .filter_map(|sym| Some((sym.to_string(), price_field(body.get(*sym)?)?)))
        .collect()
}

/// Live HTTP adapter for CoinGecko + Twelve Data.
#[derive(Clone)]
pub struct HttpQuoteSource {
    client: Client,
    coingecko_url: String,
    twelvedata_url: String,
    twelvedata_key: String,
}

impl HttpQuoteSource {
    pub fn new(twelvedata_key: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("apexpips-backend/0.1")
            .build()?;
        Ok(Self {
            client,
            coingecko_url: COINGECKO_URL.into(),
            twelvedata_url: TWELVEDATA_URL.into(),
            twelvedata_key: twelvedata_key.into(),
        })
    }

    async fn get_json(&self, provider: &'static str, url: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let resp = self.client.get(url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status { provider, code: status.as_u16(), body });
        }
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    fn name(&self) -> &'static str {
        "coingecko+twelvedata"
    }

    async fn crypto(&self, ids: &[&str]) -> Result<CryptoQuotes, ApiError> {
        let ids = ids.join(",");
        let url = format!("{}/simple/price", self.coingecko_url);
        let body = self
            .get_json(
                "coingecko",
                &url,
                &[
                    ("ids", ids.as_str()),
                    ("vs_currencies", "usd"),
                    ("include_24hr_change", "true"),
                ],
            )
            .await?;
        Ok(parse_coingecko(&body))
    }

    async fn listed(&self, symbols: &[&str]) -> Result<ListedQuotes, ApiError> {
        let joined = symbols.join(",");
        let url = format!("{}/price", self.twelvedata_url);
        let body = self
            .get_json(
                "twelvedata",
                &url,
                &[("symbol", joined.as_str()), ("apikey", self.twelvedata_key.as_str())],
            )
            .await?;
        Ok(parse_twelvedata(&body, symbols))
    }
}

/// Queries every provider once and assembles a board. Provider failures are
/// logged and covered by fallback constants.
pub async fn fetch_board(source: &dyn QuoteSource) -> PriceBoard {
    let mut ids: Vec<&str> = SUPPORTED_CRYPTOS.iter().map(|(id, _, _)| *id).collect();
    ids.push("tether");

    let crypto = match source.crypto(&ids).await {
        Ok(q) if !q.is_empty() => Some(q),
        Ok(_) => {
            log::warn!("{}: empty crypto response", source.name());
            None
        }
        Err(e) => {
            log::warn!("{}: crypto prices unavailable: {e}", source.name());
            None
        }
    };

    let sections: Vec<Vec<&str>> = [FOREX, INDICES, COMMODITIES]
        .iter()
        .map(|list| list.iter().map(|l| l.provider_symbol).collect())
        .collect();
    let results = join_all(sections.iter().map(|syms| source.listed(syms))).await;

    let mut listed: [Option<ListedQuotes>; 3] = [None, None, None];
    for (slot, res) in listed.iter_mut().zip(results) {
        match res {
            Ok(q) => *slot = Some(q),
            Err(e) => log::warn!("{}: listed prices unavailable: {e}", source.name()),
        }
    }

    build_board(crypto.as_ref(), &listed)
}

// ─── Shared cache + poller ───────────────────────────────────────────────

pub struct PriceCache {
    board: RwLock<Arc<PriceBoard>>,
    updates: Sender<Arc<PriceBoard>>,
}

impl PriceCache {
    pub fn new(initial: PriceBoard) -> Self {
        let (updates, _) = broadcast::channel(CAPACITY);
        Self {
            board: RwLock::new(Arc::new(initial)),
            updates,
        }
    }

    pub fn snapshot(&self) -> Arc<PriceBoard> {
        match self.board.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn publish(&self, board: PriceBoard) {
        let board = Arc::new(board);
        match self.board.write() {
            Ok(mut guard) => *guard = Arc::clone(&board),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&board),
        }
        // no subscribers is fine
        let _ = self.updates.send(board);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PriceBoard>> {
        self.updates.subscribe()
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(PriceBoard::fallback())
    }
}

/// One server-sent event carrying a whole board.
pub fn sse_frame(board: &PriceBoard) -> Option<String> {
    match serde_json::to_string(board) {
        Ok(data) => Some(format!("event: prices\ndata: {data}\n\n")),
        Err(e) => {
            log::warn!("price board not serialisable: {e}");
            None
        }
    }
}

pub fn snapshot_key(redis: &RedisPool) -> String {
    redis.key(&["prices", "board"])
}

/// Seeds the cache from the last snapshot another instance left in Redis.
pub async fn warm_start(cache: &PriceCache, redis: &RedisPool) {
    match redis.get_json::<PriceBoard>(&snapshot_key(redis)).await {
        Ok(Some(board)) => {
            log::info!("price board warm-started from redis ({})", board.updated_at);
            cache.publish(board);
        }
        Ok(None) => {}
        Err(e) => log::warn!("price snapshot read failed: {e}"),
    }
}

pub fn spawn_price_poller(
    cache: Arc<PriceCache>,
    source: Arc<dyn QuoteSource>,
    redis: Option<RedisPool>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut iv = tokio::time::interval(every);
        iv.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            iv.tick().await;
            let board = fetch_board(source.as_ref()).await;
            if board.fallback {
                log::debug!("price board refreshed with fallback values");
            }
            if let Some(redis) = &redis {
                if let Err(e) = redis.set_json(&snapshot_key(redis), &board, SNAPSHOT_TTL_SECS).await {
                    log::warn!("price snapshot write failed: {e}");
                }
            }
            cache.publish(board);
        }
    })
}

/// Runs the poller and restarts it one interval after a panic, so the board
/// never freezes silently at its last snapshot.
pub fn supervise_price_poller(
    cache: Arc<PriceCache>,
    source: Arc<dyn QuoteSource>,
    redis: Option<RedisPool>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let poller = spawn_price_poller(cache.clone(), source.clone(), redis.clone(), every);
            match poller.await {
                Ok(()) => log::warn!("price poller exited; restarting"),
                Err(e) if e.is_panic() => log::error!("price poller panicked; restarting: {e}"),
                Err(e) => {
                    log::warn!("price poller cancelled: {e}");
                    return;
                }
            }
            tokio::time::sleep(every).await;
        }
    })
}

// ──────────────────────────────────────────────────────────────
// UNIT-TESTS
// ──────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Canned {
        crypto: Result<CryptoQuotes, ()>,
        listed: Result<ListedQuotes, ()>,
    }

    #[async_trait]
    impl QuoteSource for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }
        async fn crypto(&self, _ids: &[&str]) -> Result<CryptoQuotes, ApiError> {
            self.crypto.clone().map_err(|_| ApiError::Other("down".into()))
        }
        async fn listed(&self, symbols: &[&str]) -> Result<ListedQuotes, ApiError> {
            let all = self.listed.clone().map_err(|_| ApiError::Other("down".into()))?;
            Ok(all.into_iter().filter(|(k, _)| symbols.contains(&k.as_str())).collect())
        }
    }

    #[test]
    fn coingecko_body_parses_price_and_change() {
        let body = json!({
            "bitcoin": {"usd": 90000.5, "usd_24h_change": -1.5},
            "tether": {"usd": 1.0},
            "broken": {"eur": 3}
        });
        let q = parse_coingecko(&body);
        assert_eq!(q.get("bitcoin"), Some(&(90000.5, -1.5)));
        assert_eq!(q.get("tether"), Some(&(1.0, 0.0)));
        assert!(!q.contains_key("broken"));
    }

    #[test]
    fn twelvedata_multi_single_and_error_bodies() {
        let multi = json!({"EUR/USD": {"price": "1.0900"}, "GBP/USD": {"price": "oops"}});
        let q = parse_twelvedata(&multi, &["EUR/USD", "GBP/USD", "USD/JPY"]);
        assert_eq!(q.get("EUR/USD"), Some(&1.09));
        assert_eq!(q.len(), 1);

        let single = json!({"price": "2650.10"});
        let q = parse_twelvedata(&single, &["XAU/USD"]);
        assert_eq!(q.get("XAU/USD"), Some(&2650.10));

        let err = json!({"code": 429, "message": "limit", "status": "error"});
        assert!(parse_twelvedata(&err, &["NDX"]).is_empty());
    }

    #[test]
    fn total_outage_yields_full_fallback_board() {
        let b = PriceBoard::fallback();
        assert!(b.fallback);
        assert_eq!(b.crypto.len(), HEADLINE_CRYPTO.len());
        assert_eq!(b.forex.len(), 3);
        assert_eq!(b.indices.len(), 3);
        assert_eq!(b.commodities.len(), 3);
        assert_eq!(b.price_of("BTC"), Some(86077.0));
        assert_eq!(b.price_of("Gold"), Some(2652.80));
        assert!(!b.crypto[0].is_up);
    }

    #[test]
    fn missing_listed_symbols_fall_back_individually() {
        let crypto = CryptoQuotes::from([("bitcoin".to_string(), (95000.0, 2.0))]);
        let forex = ListedQuotes::from([("EUR/USD".to_string(), 1.1)]);
        let b = build_board(Some(&crypto), &[Some(forex), None, None]);

        assert!(b.fallback);
        assert_eq!(b.price_of("EUR/USD"), Some(1.1));
        assert_eq!(b.price_of("GBP"), Some(1.2654));
        assert_eq!(b.price_of("BTC"), Some(95000.0));
        assert!(b.crypto[0].is_up);
        // live crypto response without ETH: no price rather than a stale one
        assert_eq!(b.price_of("ETH"), None);
        assert_eq!(b.extended.len(), 1);
    }

    #[test]
    fn quote_lookup_accepts_common_spellings() {
        let b = PriceBoard::fallback();
        for s in ["BTC", "btc", "BTC/USD", "BTCUSDT", "Bitcoin"] {
            assert_eq!(b.quote(s).map(|a| a.symbol.as_str()), Some("BTC"), "{s}");
        }
        assert_eq!(b.quote("ethusd").map(|a| a.symbol.as_str()), Some("ETH"));
        assert_eq!(b.quote("XAUUSD").map(|a| a.symbol.as_str()), Some("XAU"));
        assert_eq!(b.price_of("ETHUSD"), Some(2923.0));
        assert_eq!(b.quote("USD/JPY").map(|a| a.symbol.as_str()), Some("JPY"));
        assert!(b.quote("NOPE").is_none());
    }

    #[test]
    fn conversions_use_board_prices() {
        let b = PriceBoard::fallback();
        assert!((b.usd_to_crypto(86077.0, "BTC") - 1.0).abs() < 1e-12);
        assert_eq!(b.crypto_to_usd(2.0, "ETH"), 5846.0);
        assert_eq!(b.usd_to_crypto(50.0, "USDT"), 50.0);
        assert_eq!(b.usd_to_crypto(50.0, "UNKNOWN"), 0.0);
        assert_eq!(b.crypto_to_usd(3.0, "UNKNOWN"), 0.0);
    }

    #[tokio::test]
    async fn fetch_board_survives_provider_failures() {
        let down = Canned { crypto: Err(()), listed: Err(()) };
        let b = fetch_board(&down).await;
        assert!(b.fallback);
        assert_eq!(b.price_of("SOL"), Some(126.43));

        let up = Canned {
            crypto: Ok(CryptoQuotes::from([
                ("bitcoin".to_string(), (100.0, 1.0)),
                ("tether".to_string(), (0.999, 0.0)),
            ])),
            listed: Ok(FOREX
                .iter()
                .chain(INDICES)
                .chain(COMMODITIES)
                .map(|l| (l.provider_symbol.to_string(), l.fallback * 2.0))
                .collect()),
        };
        let b = fetch_board(&up).await;
        assert!(!b.fallback);
        assert_eq!(b.price_of("BTC"), Some(100.0));
        assert_eq!(b.price_of("NDX"), Some(21854.50 * 2.0));
        assert_eq!(b.usdt, 0.999);
    }

    #[test]
    fn cache_publishes_to_subscribers() {
        let cache = PriceCache::default();
        let mut rx = cache.subscribe();
        let mut board = PriceBoard::fallback();
        board.usdt = 0.5;
        cache.publish(board);
        assert_eq!(cache.snapshot().usdt, 0.5);
        assert_eq!(rx.try_recv().unwrap().usdt, 0.5);
    }

    #[test]
    fn sse_frame_wraps_board_json() {
        let frame = sse_frame(&PriceBoard::fallback()).unwrap();
        assert!(frame.starts_with("event: prices\ndata: {"));
        assert!(frame.ends_with("}\n\n"));
        let data = frame.trim_end().strip_prefix("event: prices\ndata: ").unwrap();
        let back: PriceBoard = serde_json::from_str(data).unwrap();
        assert_eq!(back.price_of("BTC"), Some(86077.0));
    }

    /// Panics on the first crypto call, then answers with BTC at 1.
    struct Flaky {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl QuoteSource for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }
        async fn crypto(&self, _ids: &[&str]) -> Result<CryptoQuotes, ApiError> {
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                panic!("provider blew up");
            }
            Ok(CryptoQuotes::from([("bitcoin".to_string(), (1.0, 0.0))]))
        }
        async fn listed(&self, _symbols: &[&str]) -> Result<ListedQuotes, ApiError> {
            Ok(ListedQuotes::new())
        }
    }

    #[tokio::test]
    async fn supervisor_restarts_a_panicked_poller() {
        let cache = Arc::new(PriceCache::default());
        let mut rx = cache.subscribe();
        let source: Arc<dyn QuoteSource> = Arc::new(Flaky { calls: 0.into() });
        let handle = supervise_price_poller(cache.clone(), source, None, Duration::from_millis(10));

        let board = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("poller restarted")
            .unwrap();
        assert_eq!(board.price_of("BTC"), Some(1.0));
        assert_eq!(cache.snapshot().price_of("BTC"), Some(1.0));
        handle.abort();
    }
}
