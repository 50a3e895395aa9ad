use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool, Result};
use uuid::Uuid;

use crate::db::models::*;

// ─── Inputs ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdate {
    pub full_name: String,
    pub phone: String,
    pub country: String,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub user_id: Uuid,
    pub amount: f64,
    pub method: String,
    pub wallet_address: Option<String>,
    pub tx_hash: Option<String>,
    pub screenshot_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub user_id: Uuid,
    pub amount: f64,
    pub method: String,
    pub wallet_address: Option<String>,
    pub bank_details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct NewTrade {
    pub user_id: Uuid,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub leverage: i32,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub order_type: OrderType,
    pub is_demo: bool,
}

// ─── Admin listing rows (request joined with owner identity) ─────────────

#[derive(Debug, Serialize, FromRow)]
pub struct DepositWithOwner {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub deposit: Deposit,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct WithdrawalWithOwner {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub withdrawal: Withdrawal,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct TradeWithOwner {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub trade: Trade,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
}

// PROFILES
pub async fn get_profile(pool: &PgPool, user_id: Uuid) -> Result<Option<Profile>> {
    sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Creates the profile and balance rows for a freshly signed-up user.
/// Existing rows are left untouched.
pub async fn ensure_account(
    pool: &PgPool,
    user_id: Uuid,
    email: Option<&str>,
    demo_balance: f64,
) -> Result<(Profile, Balance)> {
    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO profiles (id, email) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
        .bind(user_id)
        .bind(email)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO balances (user_id, demo_balance) VALUES ($1, $2) \
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(demo_balance)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "INSERT INTO user_roles (user_id, role) VALUES ($1, 'user') \
         ON CONFLICT (user_id, role) DO NOTHING",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
    let balance = sqlx::query_as::<_, Balance>("SELECT * FROM balances WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok((profile, balance))
}

pub async fn complete_profile(
    pool: &PgPool,
    user_id: Uuid,
    update: &ProfileUpdate,
) -> Result<Option<Profile>> {
    sqlx::query_as::<_, Profile>(
        r#"UPDATE profiles
              SET full_name = $2, phone = $3, country = $4, date_of_birth = $5,
                  address = $6, city = $7, state = $8, postal_code = $9,
                  profile_completed = TRUE, updated_at = now()
            WHERE id = $1
        RETURNING *"#,
    )
    .bind(user_id)
    .bind(&update.full_name)
    .bind(&update.phone)
    .bind(&update.country)
    .bind(update.date_of_birth)
    .bind(&update.address)
    .bind(&update.city)
    .bind(&update.state)
    .bind(&update.postal_code)
    .fetch_optional(pool)
    .await
}

pub async fn set_kyc(
    pool: &PgPool,
    user_id: Uuid,
    status: KycStatus,
    government_id: Option<(&str, &str)>,
) -> Result<Option<Profile>> {
    let (id_type, id_url) = government_id.unzip();
    sqlx::query_as::<_, Profile>(
        r#"UPDATE profiles
              SET kyc_status = $2,
                  government_id_type = COALESCE($3, government_id_type),
                  government_id_url  = COALESCE($4, government_id_url),
                  updated_at = now()
            WHERE id = $1
        RETURNING *"#,
    )
    .bind(user_id)
    .bind(status.as_str())
    .bind(id_type)
    .bind(id_url)
    .fetch_optional(pool)
    .await
}

pub async fn set_active(pool: &PgPool, user_id: Uuid, is_active: bool) -> Result<u64> {
    let res = sqlx::query("UPDATE profiles SET is_active = $2, updated_at = now() WHERE id = $1")
        .bind(user_id)
        .bind(is_active)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Every profile with its balance row (if any), newest first.
pub async fn list_users_with_balances(pool: &PgPool) -> Result<Vec<UserWithBalance>> {
    let profiles =
        sqlx::query_as::<_, Profile>("SELECT * FROM profiles ORDER BY created_at DESC")
            .fetch_all(pool)
            .await?;
    let mut balances: HashMap<Uuid, Balance> =
        sqlx::query_as::<_, Balance>("SELECT * FROM balances")
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|b| (b.user_id, b))
            .collect();

    Ok(profiles
        .into_iter()
        .map(|p| {
            let balance_data = balances.remove(&p.id);
            UserWithBalance { profile: p, balance_data }
        })
        .collect())
}

// BALANCES
pub async fn get_balance(pool: &PgPool, user_id: Uuid) -> Result<Option<Balance>> {
    sqlx::query_as::<_, Balance>("SELECT * FROM balances WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

// DEPOSITS
pub async fn list_deposits(pool: &PgPool, user_id: Uuid) -> Result<Vec<Deposit>> {
    sqlx::query_as::<_, Deposit>(
        "SELECT * FROM deposits WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn insert_deposit(pool: &PgPool, d: &NewDeposit) -> Result<Deposit> {
    // currency mirrors the payment method (USDT, BTC, ETH …)
    sqlx::query_as::<_, Deposit>(
        r#"INSERT INTO deposits
                  (user_id, amount, method, currency, wallet_address, tx_hash, screenshot_url, status)
           VALUES ($1, $2, $3, $3, $4, $5, $6, 'pending')
        RETURNING *"#,
    )
    .bind(d.user_id)
    .bind(d.amount)
    .bind(&d.method)
    .bind(&d.wallet_address)
    .bind(&d.tx_hash)
    .bind(&d.screenshot_url)
    .fetch_one(pool)
    .await
}

pub async fn list_all_deposits(pool: &PgPool) -> Result<Vec<DepositWithOwner>> {
    sqlx::query_as::<_, DepositWithOwner>(
        r#"SELECT d.*, p.email AS user_email, p.full_name AS user_name
             FROM deposits d
        LEFT JOIN profiles p ON p.id = d.user_id
         ORDER BY d.created_at DESC"#,
    )
    .fetch_all(pool)
    .await
}

// WITHDRAWALS
pub async fn list_withdrawals(pool: &PgPool, user_id: Uuid) -> Result<Vec<Withdrawal>> {
    sqlx::query_as::<_, Withdrawal>(
        "SELECT * FROM withdrawals WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn insert_withdrawal(pool: &PgPool, w: &NewWithdrawal) -> Result<Withdrawal> {
    sqlx::query_as::<_, Withdrawal>(
        r#"INSERT INTO withdrawals
                  (user_id, amount, method, currency, wallet_address, bank_details, status)
           VALUES ($1, $2, $3, 'USDT', $4, $5, 'pending')
        RETURNING *"#,
    )
    .bind(w.user_id)
    .bind(w.amount)
    .bind(&w.method)
    .bind(&w.wallet_address)
    .bind(&w.bank_details)
    .fetch_one(pool)
    .await
}

pub async fn list_all_withdrawals(pool: &PgPool) -> Result<Vec<WithdrawalWithOwner>> {
    sqlx::query_as::<_, WithdrawalWithOwner>(
        r#"SELECT w.*, p.email AS user_email, p.full_name AS user_name
             FROM withdrawals w
        LEFT JOIN profiles p ON p.id = w.user_id
         ORDER BY w.created_at DESC"#,
    )
    .fetch_all(pool)
    .await
}

// TRADES
pub async fn list_trades(pool: &PgPool, user_id: Uuid, is_demo: bool) -> Result<Vec<Trade>> {
    sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades WHERE user_id = $1 AND is_demo = $2 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .bind(is_demo)
    .fetch_all(pool)
    .await
}

pub async fn list_open_trades<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
    is_demo: bool,
) -> Result<Vec<Trade>> {
    sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades WHERE user_id = $1 AND is_demo = $2 AND status = 'open'",
    )
    .bind(user_id)
    .bind(is_demo)
    .fetch_all(db)
    .await
}

pub async fn get_trade(pool: &PgPool, trade_id: Uuid) -> Result<Option<Trade>> {
    sqlx::query_as::<_, Trade>("SELECT * FROM trades WHERE id = $1")
        .bind(trade_id)
        .fetch_optional(pool)
        .await
}

pub async fn insert_trade<'e>(db: impl PgExecutor<'e>, t: &NewTrade) -> Result<Trade> {
    sqlx::query_as::<_, Trade>(
        r#"INSERT INTO trades
                  (user_id, symbol, side, quantity, entry_price, leverage,
                   stop_loss, take_profit, order_type, is_demo, status)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'open')
        RETURNING *"#,
    )
    .bind(t.user_id)
    .bind(&t.symbol)
    .bind(t.side.as_str())
    .bind(t.quantity)
    .bind(t.entry_price)
    .bind(t.leverage)
    .bind(t.stop_loss)
    .bind(t.take_profit)
    .bind(t.order_type.as_str())
    .bind(t.is_demo)
    .fetch_one(db)
    .await
}

/// Marks an open trade closed. Returns `None` when the trade is missing,
/// belongs to someone else, or was already closed.
pub async fn close_trade(
    pool: &PgPool,
    trade_id: Uuid,
    user_id: Uuid,
    exit_price: f64,
    profit_loss: f64,
) -> Result<Option<Trade>> {
    sqlx::query_as::<_, Trade>(
        r#"UPDATE trades
              SET status = 'closed', exit_price = $3, profit_loss = $4, closed_at = now()
            WHERE id = $1 AND user_id = $2 AND status = 'open'
        RETURNING *"#,
    )
    .bind(trade_id)
    .bind(user_id)
    .bind(exit_price)
    .bind(profit_loss)
    .fetch_optional(pool)
    .await
}

pub async fn set_profit_override(
    pool: &PgPool,
    trade_id: Uuid,
    profit: Option<f64>,
) -> Result<Option<Trade>> {
    sqlx::query_as::<_, Trade>(
        "UPDATE trades SET admin_profit_override = $2 WHERE id = $1 RETURNING *",
    )
    .bind(trade_id)
    .bind(profit)
    .fetch_optional(pool)
    .await
}

pub async fn list_all_trades(pool: &PgPool) -> Result<Vec<TradeWithOwner>> {
    sqlx::query_as::<_, TradeWithOwner>(
        r#"SELECT t.*, p.email AS user_email, p.full_name AS user_name
             FROM trades t
        LEFT JOIN profiles p ON p.id = t.user_id
         ORDER BY t.created_at DESC"#,
    )
    .fetch_all(pool)
    .await
}

// CHAT
pub async fn list_chat(pool: &PgPool, user_id: Uuid) -> Result<Vec<ChatMessage>> {
    sqlx::query_as::<_, ChatMessage>(
        "SELECT * FROM chat_messages WHERE user_id = $1 ORDER BY created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn list_all_chat(pool: &PgPool) -> Result<Vec<ChatMessage>> {
    sqlx::query_as::<_, ChatMessage>("SELECT * FROM chat_messages ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
}

pub async fn insert_chat(
    pool: &PgPool,
    user_id: Uuid,
    message: &str,
    sender: Sender,
) -> Result<ChatMessage> {
    // admin replies are born read; user messages wait for the admin inbox
    let is_read = sender == Sender::Admin;
    sqlx::query_as::<_, ChatMessage>(
        r#"INSERT INTO chat_messages (user_id, message, sender, is_read)
           VALUES ($1, $2, $3, $4)
        RETURNING *"#,
    )
    .bind(user_id)
    .bind(message)
    .bind(sender.as_str())
    .bind(is_read)
    .fetch_one(pool)
    .await
}

/// Flags every message `from` sent in the user's thread as read.
pub async fn mark_chat_read(pool: &PgPool, user_id: Uuid, from: Sender) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE chat_messages SET is_read = TRUE WHERE user_id = $1 AND sender = $2 AND NOT is_read",
    )
    .bind(user_id)
    .bind(from.as_str())
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

pub async fn profile_identities(
    pool: &PgPool,
    user_ids: &[Uuid],
) -> Result<HashMap<Uuid, (Option<String>, Option<String>)>> {
    let rows: Vec<(Uuid, Option<String>, Option<String>)> =
        sqlx::query_as("SELECT id, email, full_name FROM profiles WHERE id = ANY($1)")
            .bind(user_ids)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id, e, n)| (id, (e, n))).collect())
}
