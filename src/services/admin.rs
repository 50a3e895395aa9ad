//! Admin console: credential check, typed actions and their dispatch.

use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::settings::Settings;
use crate::db::models::{KycStatus, Sender};
use crate::db::queries;
use crate::services::{chat, ledger, trading_engine};
use crate::services::ledger::{BalanceEdit, Claim};
use crate::utils::errors::{AppError, AppResult};

/// Request body of the admin endpoint.
#[derive(Debug, Default)]
pub struct AdminEnvelope {
    pub admin_name: String,
    pub admin_password: String,
    pub action: String,
    pub payload: Value,
}

impl AdminEnvelope {
    /// Fields of the wrong type read as empty, so a malformed envelope still
    /// reaches the credential check.
    pub fn lenient(body: &Value) -> Self {
        let text = |key: &str| body.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        Self {
            admin_name: text("adminName"),
            admin_password: text("adminPassword"),
            action: text("action"),
            payload: body.get("payload").cloned().unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "action",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum AdminAction {
    GetUsers,
    GetDeposits,
    GetWithdrawals,
    GetTrades,
    GetChatUsers,
    GetChatMessages { user_id: Uuid },
    SendAdminMessage { user_id: Uuid, message: String },
    MarkMessagesAsRead { user_id: Uuid },
    UpdateBalance {
        user_id: Uuid,
        balance: f64,
        today_pl: f64,
        signal_strength: i32,
        reason: Option<String>,
    },
    UpdateUserStatus { user_id: Uuid, is_active: bool },
    UpdateKycStatus { user_id: Uuid, status: KycStatus },
    ApproveDeposit { deposit_id: Uuid, user_id: Option<Uuid>, amount: Option<f64> },
    RejectDeposit { deposit_id: Uuid, reason: Option<String> },
    ApproveWithdrawal { withdrawal_id: Uuid, user_id: Option<Uuid>, amount: Option<f64> },
    RejectWithdrawal { withdrawal_id: Uuid, reason: Option<String> },
    DeleteUser { user_id: Uuid },
    OverrideTradeProfit { trade_id: Uuid, profit: Option<f64> },
}

pub const ACTIONS: &[&str] = &[
    "getUsers",
    "getDeposits",
    "getWithdrawals",
    "getTrades",
    "getChatUsers",
    "getChatMessages",
    "sendAdminMessage",
    "markMessagesAsRead",
    "updateBalance",
    "updateUserStatus",
    "updateKycStatus",
    "approveDeposit",
    "rejectDeposit",
    "approveWithdrawal",
    "rejectWithdrawal",
    "deleteUser",
    "overrideTradeProfit",
];

/// Actions whose payload is ignored.
const NO_PAYLOAD: &[&str] = &["getUsers", "getDeposits", "getWithdrawals", "getTrades", "getChatUsers"];

#[derive(Debug, PartialEq)]
pub enum ParseError {
    UnknownAction,
    BadPayload(String),
}

impl AdminAction {
    pub fn parse(action: &str, payload: Value) -> Result<Self, ParseError> {
        if !ACTIONS.contains(&action) {
            return Err(ParseError::UnknownAction);
        }
        let mut tagged = json!({ "action": action });
        if !payload.is_null() && !NO_PAYLOAD.contains(&action) {
            tagged["payload"] = payload;
        }
        serde_json::from_value(tagged).map_err(|e| ParseError::BadPayload(e.to_string()))
    }

    /// Whether the action writes anything.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            AdminAction::GetUsers
                | AdminAction::GetDeposits
                | AdminAction::GetWithdrawals
                | AdminAction::GetTrades
                | AdminAction::GetChatUsers
                | AdminAction::GetChatMessages { .. }
        )
    }
}

/// Constant-time comparison of both fields; both are always compared.
pub fn credentials_match(settings: &Settings, name: &str, password: &str) -> bool {
    let name_ok = name.as_bytes().ct_eq(settings.admin_name.as_bytes());
    let pass_ok = password.as_bytes().ct_eq(settings.admin_password.as_bytes());
    (name_ok & pass_ok).into()
}

fn done() -> Value {
    json!({ "success": true })
}

pub async fn execute(pool: &PgPool, action: AdminAction) -> AppResult<Value> {
    use AdminAction::*;

    let value = match action {
        GetUsers => json!(queries::list_users_with_balances(pool).await?),
        GetDeposits => json!(queries::list_all_deposits(pool).await?),
        GetWithdrawals => json!(queries::list_all_withdrawals(pool).await?),
        GetTrades => json!(queries::list_all_trades(pool).await?),
        GetChatUsers => json!(chat::inbox(pool).await?),
        GetChatMessages { user_id } => json!(queries::list_chat(pool, user_id).await?),
        SendAdminMessage { user_id, message } => {
            json!(chat::send(pool, user_id, &message, Sender::Admin).await?)
        }
        MarkMessagesAsRead { user_id } => {
            queries::mark_chat_read(pool, user_id, Sender::User).await?;
            done()
        }
        UpdateBalance { user_id, balance, today_pl, signal_strength, reason } => {
            let edit = BalanceEdit { balance, today_pl, signal_strength, reason };
            let (balance, adjustment) = ledger::admin_set_balance(pool, user_id, &edit).await?;
            json!({ "success": true, "balance": balance, "adjustment": adjustment })
        }
        UpdateUserStatus { user_id, is_active } => {
            if queries::set_active(pool, user_id, is_active).await? == 0 {
                return Err(AppError::NotFound("user"));
            }
            done()
        }
        UpdateKycStatus { user_id, status } => {
            queries::set_kyc(pool, user_id, status, None)
                .await?
                .ok_or(AppError::NotFound("user"))?;
            done()
        }
        ApproveDeposit { deposit_id, user_id, amount } => {
            ledger::approve_deposit(pool, deposit_id, Claim { user_id, amount }).await?;
            done()
        }
        RejectDeposit { deposit_id, reason } => {
            ledger::reject_deposit(pool, deposit_id, reason.as_deref()).await?;
            done()
        }
        ApproveWithdrawal { withdrawal_id, user_id, amount } => {
            ledger::approve_withdrawal(pool, withdrawal_id, Claim { user_id, amount }).await?;
            done()
        }
        RejectWithdrawal { withdrawal_id, reason } => {
            ledger::reject_withdrawal(pool, withdrawal_id, reason.as_deref()).await?;
            done()
        }
        DeleteUser { user_id } => {
            delete_user(pool, user_id).await?;
            done()
        }
        OverrideTradeProfit { trade_id, profit } => {
            json!(trading_engine::override_profit(pool, trade_id, profit).await?)
        }
    };
    Ok(value)
}

/// Child tables first, profile last; all or nothing.
const DELETE_ORDER: &[(&str, &str)] = &[
    ("admin_balance_adjustments", "user_id"),
    ("trades", "user_id"),
    ("withdrawals", "user_id"),
    ("deposits", "user_id"),
    ("chat_messages", "user_id"),
    ("balances", "user_id"),
    ("user_roles", "user_id"),
    ("profiles", "id"),
];

async fn delete_user(pool: &PgPool, user_id: Uuid) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    let mut profile_rows = 0;
    for (table, column) in DELETE_ORDER {
        let res = sqlx::query(&format!("DELETE FROM {table} WHERE {column} = $1"))
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if *table == "profiles" {
            profile_rows = res.rows_affected();
        }
    }
    if profile_rows == 0 {
        return Err(AppError::NotFound("user"));
    }
    tx.commit().await?;
    log::warn!("user {user_id} deleted by admin");
    Ok(())
}
