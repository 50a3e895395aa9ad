use std::convert::Infallible;

use actix_web::{get, http::header, web, HttpResponse, Scope};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;

use crate::services::market_data::{sse_frame, Asset, PriceCache};
use crate::utils::errors::{AppError, AppResult};
use crate::utils::types::ApiResponse;

#[get("")]
async fn price_board(cache: web::Data<PriceCache>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::ok(&*cache.snapshot()))
}

#[get("/crypto")]
async fn crypto(cache: web::Data<PriceCache>) -> HttpResponse {
    let board = cache.snapshot();
    let listed: Vec<&Asset> = board.extended.iter().filter(|a| a.price > 0.0).collect();
    HttpResponse::Ok().json(ApiResponse::ok(listed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    UsdToCrypto,
    CryptoToUsd,
}

#[derive(Debug, Deserialize)]
pub struct ConvertQuery {
    pub amount: f64,
    pub symbol: String,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Serialize)]
pub struct Conversion {
    pub symbol: String,
    pub amount: f64,
    pub direction: Direction,
    pub result: f64,
}

#[get("/convert")]
async fn convert(
    q: web::Query<ConvertQuery>,
    cache: web::Data<PriceCache>,
) -> AppResult<HttpResponse> {
    if !q.amount.is_finite() || q.amount < 0.0 {
        return Err(AppError::validation("Amount must be a non-negative number"));
    }
    let board = cache.snapshot();
    let result = match q.direction {
        Direction::UsdToCrypto => board.usd_to_crypto(q.amount, &q.symbol),
        Direction::CryptoToUsd => board.crypto_to_usd(q.amount, &q.symbol),
    };
    Ok(HttpResponse::Ok().json(ApiResponse::ok(Conversion {
        symbol: q.symbol.trim().to_ascii_uppercase(),
        amount: q.amount,
        direction: q.direction,
        result,
    })))
}

/// Server-sent events: the current board on connect, then every new snapshot.
#[get("/stream")]
async fn price_stream(cache: web::Data<PriceCache>) -> HttpResponse {
    let first = sse_frame(&cache.snapshot());
    let updates = BroadcastStream::new(cache.subscribe()).filter_map(|msg| match msg {
        Ok(board) => sse_frame(&board),
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            log::debug!("price stream subscriber skipped {n} boards");
            None
        }
    });
    let frames = tokio_stream::iter(first)
        .chain(updates)
        .map(|frame| Ok::<_, Infallible>(web::Bytes::from(frame)));

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(frames)
}

pub fn markets_scope() -> Scope {
    web::scope("/markets")
        .service(price_board)
        .service(crypto)
        .service(convert)
        .service(price_stream)
}
