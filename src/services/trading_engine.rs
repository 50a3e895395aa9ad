// src/services/trading_engine.rs
//
// Order-ticket maths and the open/close lifecycle of a trade row. Prices come
// from the shared price board; nothing is routed to an exchange.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{OrderType, Trade, TradeSide, TradeStatus};
use crate::db::queries::{self, NewTrade};
use crate::services::{account, ledger};
use crate::services::market_data::PriceBoard;
use crate::utils::errors::{AppError, AppResult};

/// Taker fee charged on notional value (0.1 %).
pub const FEE_RATE: f64 = 0.001;
pub const MAX_LEVERAGE: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quote {
    pub notional: f64,
    pub fee: f64,
    pub total: f64,
    pub required_margin: f64,
}

/// Prices an order ticket: notional = qty × price, fee on notional,
/// margin = notional / leverage.
pub fn quote(quantity: f64, price: f64, leverage: i32) -> AppResult<Quote> {
    validate_quantity(quantity)?;
    validate_leverage(leverage)?;
    if !price.is_finite() || price <= 0.0 {
        return Err(AppError::validation("Price must be positive"));
    }
    let notional = quantity * price;
    let fee = notional * FEE_RATE;
    Ok(Quote {
        notional,
        fee,
        total: notional + fee,
        required_margin: notional / f64::from(leverage),
    })
}

pub fn validate_quantity(quantity: f64) -> AppResult<()> {
    if quantity.is_finite() && quantity > 0.0 {
        Ok(())
    } else {
        Err(AppError::validation("Please enter a valid amount"))
    }
}

pub fn validate_leverage(leverage: i32) -> AppResult<()> {
    if (1..=MAX_LEVERAGE).contains(&leverage) {
        Ok(())
    } else {
        Err(AppError::validation(format!("Leverage must be between 1 and {MAX_LEVERAGE}")))
    }
}

/// Margin tied up by open positions: Σ entry × qty / leverage.
pub fn margin_used(open: &[Trade]) -> f64 {
    open.iter()
        .filter(|t| t.status() == Ok(TradeStatus::Open))
        .map(|t| t.entry_price * t.quantity / f64::from(t.leverage.max(1)))
        .sum()
}

pub fn check_margin(required: f64, available: f64) -> AppResult<()> {
    if required > available {
        Err(AppError::InsufficientMargin)
    } else {
        Ok(())
    }
}

pub fn compute_pnl(side: TradeSide, entry: f64, exit: f64, quantity: f64, leverage: i32) -> f64 {
    let diff = match side {
        TradeSide::Buy => exit - entry,
        TradeSide::Sell => entry - exit,
    };
    diff * quantity * f64::from(leverage)
}

/// P/L as shown to the user: the admin override wins when present.
pub fn effective_pnl(trade: &Trade) -> f64 {
    trade.admin_profit_override.unwrap_or(trade.profit_loss)
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenTradeRequest {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    #[serde(default = "one")]
    pub leverage: i32,
    #[serde(default)]
    pub order_type: Option<OrderType>,
    /// Limit price; ignored for market orders.
    pub price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub is_demo: bool,
}

fn one() -> i32 {
    1
}

/// Entry price for a new order: the board price for market orders, the
/// requested price for limit orders.
pub fn entry_price(req: &OpenTradeRequest, board: &PriceBoard) -> AppResult<f64> {
    match req.order_type.unwrap_or(OrderType::Market) {
        OrderType::Market => board
            .price_of(&req.symbol)
            .ok_or_else(|| AppError::validation(format!("No price available for {}", req.symbol))),
        OrderType::Limit => req
            .price
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| AppError::validation("Limit orders need a positive price")),
    }
}

pub async fn open_trade(
    pool: &PgPool,
    board: &PriceBoard,
    user_id: Uuid,
    req: &OpenTradeRequest,
) -> AppResult<Trade> {
    let symbol = req.symbol.trim();
    if symbol.is_empty() {
        return Err(AppError::validation("Symbol is required"));
    }
    let price = entry_price(req, board)?;
    let ticket = quote(req.quantity, price, req.leverage)?;
    account::ensure_active(pool, user_id).await?;

    // margin check and insert under the balance lock so concurrent opens queue
    let mut tx = pool.begin().await?;
    let balance = ledger::lock_balance(&mut tx, user_id).await?;
    let open = queries::list_open_trades(&mut *tx, user_id, req.is_demo).await?;
    let funds = if req.is_demo { balance.demo_balance } else { balance.balance };
    check_margin(ticket.required_margin, funds - margin_used(&open))?;

    let trade = queries::insert_trade(
        &mut *tx,
        &NewTrade {
            user_id,
            symbol: symbol.to_ascii_uppercase(),
            side: req.side,
            quantity: req.quantity,
            entry_price: price,
            leverage: req.leverage,
            stop_loss: req.stop_loss,
            take_profit: req.take_profit,
            order_type: req.order_type.unwrap_or(OrderType::Market),
            is_demo: req.is_demo,
        },
    )
    .await?;
    tx.commit().await?;

    log::info!(
        "trade {} opened: {} {} {} @ {} x{}{}",
        trade.id,
        trade.side,
        trade.quantity,
        trade.symbol,
        trade.entry_price,
        trade.leverage,
        if trade.is_demo { " (demo)" } else { "" }
    );
    Ok(trade)
}

/// Closes an open trade at the current board price (or `fallback_exit`
/// when the board has no quote for the symbol).
pub async fn close_trade(
    pool: &PgPool,
    board: &PriceBoard,
    user_id: Uuid,
    trade_id: Uuid,
    fallback_exit: Option<f64>,
) -> AppResult<Trade> {
    let trade = queries::get_trade(pool, trade_id)
        .await?
        .filter(|t| t.user_id == user_id)
        .ok_or(AppError::NotFound("trade"))?;
    if trade.status() != Ok(TradeStatus::Open) {
        return Err(AppError::conflict("Trade is already closed"));
    }

    let exit = board
        .price_of(&trade.symbol)
        .or(fallback_exit.filter(|p| p.is_finite() && *p > 0.0))
        .ok_or_else(|| AppError::validation(format!("No price available for {}", trade.symbol)))?;
    let side = trade.side().map_err(AppError::Validation)?;
    let pnl = compute_pnl(side, trade.entry_price, exit, trade.quantity, trade.leverage);

    let closed = queries::close_trade(pool, trade_id, user_id, exit, pnl)
        .await?
        .ok_or_else(|| AppError::conflict("Trade is already closed"))?;
    log::info!("trade {trade_id} closed @ {exit}: pnl {pnl:.2}");
    Ok(closed)
}

pub async fn override_profit(pool: &PgPool, trade_id: Uuid, profit: Option<f64>) -> AppResult<Trade> {
    if profit.is_some_and(|p| !p.is_finite()) {
        return Err(AppError::validation("Profit must be a number"));
    }
    queries::set_profit_override(pool, trade_id, profit)
        .await?
        .ok_or(AppError::NotFound("trade"))
}

// ======================================================================
// UNIT TESTS
// ======================================================================
