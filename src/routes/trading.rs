// src/routes/trading.rs

use actix_web::{get, post, web, HttpResponse, Scope};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::Trade;
use crate::db::queries;
use crate::middleware::auth::UserId;
use crate::services::market_data::PriceCache;
use crate::services::trading_engine::{self, effective_pnl, OpenTradeRequest, Quote};
use crate::utils::errors::{AppError, AppResult};
use crate::utils::types::ApiResponse;

/// Trade row plus the P/L the user actually sees.
#[derive(Debug, Serialize)]
pub struct TradeView {
    #[serde(flatten)]
    pub trade: Trade,
    pub effective_profit_loss: f64,
}

impl From<Trade> for TradeView {
    fn from(trade: Trade) -> Self {
        let effective_profit_loss = effective_pnl(&trade);
        Self { trade, effective_profit_loss }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub demo: bool,
}

#[get("")]
async fn list_trades(
    user: web::ReqData<UserId>,
    params: web::Query<ListParams>,
    pg: web::Data<PgPool>,
) -> AppResult<HttpResponse> {
    let rows: Vec<TradeView> = queries::list_trades(&pg, user.0, params.demo)
        .await?
        .into_iter()
        .map(TradeView::from)
        .collect();
    Ok(HttpResponse::Ok().json(ApiResponse::ok(rows)))
}

#[post("")]
async fn open_trade(
    user: web::ReqData<UserId>,
    body: web::Json<OpenTradeRequest>,
    pg: web::Data<PgPool>,
    cache: web::Data<PriceCache>,
) -> AppResult<HttpResponse> {
    let board = cache.snapshot();
    let trade = trading_engine::open_trade(&pg, &board, user.0, &body).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok_with(
        "Trade opened",
        TradeView::from(trade),
    )))
}

#[derive(Debug, Default, Deserialize)]
pub struct CloseParams {
    /// Used only when the board has no price for the symbol.
    pub exit_price: Option<f64>,
}

#[post("/{id}/close")]
async fn close_trade(
    user: web::ReqData<UserId>,
    path: web::Path<Uuid>,
    body: Option<web::Json<CloseParams>>,
    pg: web::Data<PgPool>,
    cache: web::Data<PriceCache>,
) -> AppResult<HttpResponse> {
    let fallback = body.and_then(|b| b.exit_price);
    let board = cache.snapshot();
    let trade = trading_engine::close_trade(&pg, &board, user.0, path.into_inner(), fallback).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok_with(
        "Trade closed",
        TradeView::from(trade),
    )))
}

#[derive(Debug, Deserialize)]
pub struct QuoteParams {
    pub symbol: Option<String>,
    pub quantity: f64,
    #[serde(default = "one")]
    pub leverage: i32,
    pub price: Option<f64>,
}

fn one() -> i32 {
    1
}

/// Order-ticket preview. Needs no account: priced from `price` or, failing
/// that, the board price of `symbol`.
#[post("/trades/quote")]
pub async fn quote(
    body: web::Json<QuoteParams>,
    cache: web::Data<PriceCache>,
) -> AppResult<HttpResponse> {
    let price = match (body.price, body.symbol.as_deref()) {
        (Some(p), _) => p,
        (None, Some(symbol)) => cache
            .snapshot()
            .price_of(symbol)
            .ok_or_else(|| AppError::validation(format!("No price available for {symbol}")))?,
        (None, None) => return Err(AppError::validation("Either price or symbol is required")),
    };
    let ticket: Quote = trading_engine::quote(body.quantity, price, body.leverage)?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(ticket)))
}

pub fn trading_scope() -> Scope {
    web::scope("/trades")
        .service(list_trades)
        .service(open_trade)
        .service(close_trade)
}
