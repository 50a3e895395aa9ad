//! ──────────────────────────────────────────────────────────────────────────
//! Balance bookkeeping for deposits, withdrawals and admin edits
//! ──────────────────────────────────────────────────────────────────────────
//! * Settlement maths is pure (`credit_deposit`, `debit_withdrawal`).
//! * Every approval runs in one transaction: the request row and the
//!   balance row are locked (`FOR UPDATE`, request first, then balance),
//!   the request must still be `pending`, and the balance check for a
//!   withdrawal happens under the same lock as the write.
//! * Admin overwrites go through `admin_set_balance`, which also appends an
//!   `admin_balance_adjustments` row.
//! ──────────────────────────────────────────────────────────────────────────

use serde::Deserialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::models::{Balance, BalanceAdjustment, Deposit, RequestStatus, Withdrawal};
use crate::utils::errors::{AppError, AppResult};

pub const SIGNAL_STRENGTH_RANGE: std::ops::RangeInclusive<i32> = 1..=10;

/// The three balance-row fields a deposit or withdrawal touches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Totals {
    pub balance: f64,
    pub total_deposited: f64,
    pub total_withdrawn: f64,
}

impl From<&Balance> for Totals {
    fn from(b: &Balance) -> Self {
        Self {
            balance: b.balance,
            total_deposited: b.total_deposited,
            total_withdrawn: b.total_withdrawn,
        }
    }
}

/// What the admin console believes it is approving. Both fields are
/// optional; when present they must agree with the stored request.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub user_id: Option<Uuid>,
    pub amount: Option<f64>,
}

/// Admin overwrite of the user-visible balance fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEdit {
    pub balance: f64,
    pub today_pl: f64,
    pub signal_strength: i32,
    pub reason: Option<String>,
}

// ─── Pure settlement ─────────────────────────────────────────────────────

pub fn validate_amount(amount: f64) -> AppResult<()> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(AppError::validation("Amount must be a positive number"))
    }
}

pub fn credit_deposit(t: Totals, amount: f64) -> AppResult<Totals> {
    validate_amount(amount)?;
    Ok(Totals {
        balance: t.balance + amount,
        total_deposited: t.total_deposited + amount,
        ..t
    })
}

pub fn debit_withdrawal(t: Totals, amount: f64) -> AppResult<Totals> {
    validate_amount(amount)?;
    if t.balance < amount {
        return Err(AppError::InsufficientFunds);
    }
    Ok(Totals {
        balance: t.balance - amount,
        total_withdrawn: t.total_withdrawn + amount,
        ..t
    })
}

pub fn ensure_pending(kind: &'static str, status: &str) -> AppResult<()> {
    match status.parse::<RequestStatus>() {
        Ok(RequestStatus::Pending) => Ok(()),
        Ok(done) => Err(AppError::conflict(format!("{kind} already {done}"))),
        Err(e) => Err(AppError::conflict(format!("{kind} has unexpected status: {e}"))),
    }
}

pub fn ensure_matches(
    kind: &'static str,
    owner: Uuid,
    amount: f64,
    claim: &Claim,
) -> AppResult<()> {
    if claim.user_id.is_some_and(|u| u != owner) {
        return Err(AppError::validation(format!("{kind} belongs to a different user")));
    }
    if claim.amount.is_some_and(|a| (a - amount).abs() > 1e-9) {
        return Err(AppError::validation(format!(
            "{kind} amount is {amount}, not {}",
            claim.amount.unwrap_or_default()
        )));
    }
    Ok(())
}

pub fn validate_edit(edit: &BalanceEdit) -> AppResult<()> {
    if !edit.balance.is_finite() || edit.balance < 0.0 {
        return Err(AppError::validation("Balance must be a non-negative number"));
    }
    if !edit.today_pl.is_finite() {
        return Err(AppError::validation("Today's P/L must be a number"));
    }
    if !SIGNAL_STRENGTH_RANGE.contains(&edit.signal_strength) {
        return Err(AppError::validation("Signal strength must be between 1 and 10"));
    }
    Ok(())
}

// ─── Postgres operations ─────────────────────────────────────────────────

/// Row lock on the user's balance; every check-then-write on funds holds it.
pub(crate) async fn lock_balance(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> AppResult<Balance> {
    sqlx::query_as::<_, Balance>("SELECT * FROM balances WHERE user_id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::NotFound("balance"))
}

async fn write_totals(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    t: Totals,
) -> AppResult<Balance> {
    Ok(sqlx::query_as::<_, Balance>(
        r#"UPDATE balances
              SET balance = $2, total_deposited = $3, total_withdrawn = $4, updated_at = now()
            WHERE user_id = $1
        RETURNING *"#,
    )
    .bind(user_id)
    .bind(t.balance)
    .bind(t.total_deposited)
    .bind(t.total_withdrawn)
    .fetch_one(&mut **tx)
    .await?)
}

pub async fn approve_deposit(pool: &PgPool, deposit_id: Uuid, claim: Claim) -> AppResult<Balance> {
    let mut tx = pool.begin().await?;

    let deposit = sqlx::query_as::<_, Deposit>("SELECT * FROM deposits WHERE id = $1 FOR UPDATE")
        .bind(deposit_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("deposit"))?;
    ensure_pending("deposit", &deposit.status)?;
    ensure_matches("deposit", deposit.user_id, deposit.amount, &claim)?;

    let current = lock_balance(&mut tx, deposit.user_id).await?;
    let next = credit_deposit(Totals::from(&current), deposit.amount)?;

    sqlx::query("UPDATE deposits SET status = 'approved', confirmed_at = now() WHERE id = $1")
        .bind(deposit_id)
        .execute(&mut *tx)
        .await?;
    let updated = write_totals(&mut tx, deposit.user_id, next).await?;
    tx.commit().await?;

    log::info!(
        "deposit {deposit_id} approved: user {} +{} → {}",
        deposit.user_id, deposit.amount, updated.balance
    );
    Ok(updated)
}

pub async fn approve_withdrawal(
    pool: &PgPool,
    withdrawal_id: Uuid,
    claim: Claim,
) -> AppResult<Balance> {
    let mut tx = pool.begin().await?;

    let withdrawal =
        sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1 FOR UPDATE")
            .bind(withdrawal_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("withdrawal"))?;
    ensure_pending("withdrawal", &withdrawal.status)?;
    ensure_matches("withdrawal", withdrawal.user_id, withdrawal.amount, &claim)?;

    let current = lock_balance(&mut tx, withdrawal.user_id).await?;
    let next = match debit_withdrawal(Totals::from(&current), withdrawal.amount) {
        Ok(t) => t,
        Err(e) => {
            log::warn!(
                "withdrawal {withdrawal_id} refused: balance {} < {}",
                current.balance, withdrawal.amount
            );
            return Err(e);
        }
    };

    sqlx::query("UPDATE withdrawals SET status = 'approved', processed_at = now() WHERE id = $1")
        .bind(withdrawal_id)
        .execute(&mut *tx)
        .await?;
    let updated = write_totals(&mut tx, withdrawal.user_id, next).await?;
    tx.commit().await?;

    log::info!(
        "withdrawal {withdrawal_id} approved: user {} -{} → {}",
        withdrawal.user_id, withdrawal.amount, updated.balance
    );
    Ok(updated)
}

/// Rejects a pending request in `table` (`deposits` or `withdrawals`).
async fn reject_request(
    pool: &PgPool,
    table: &'static str,
    kind: &'static str,
    id: Uuid,
    reason: Option<&str>,
) -> AppResult<()> {
    let sql = format!(
        "UPDATE {table} SET status = 'rejected', admin_note = $2 WHERE id = $1 AND status = 'pending'"
    );
    let res = sqlx::query(&sql).bind(id).bind(reason).execute(pool).await?;
    if res.rows_affected() == 1 {
        log::info!("{kind} {id} rejected");
        return Ok(());
    }

    let status: Option<String> = sqlx::query_scalar(&format!("SELECT status FROM {table} WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match status {
        None => Err(AppError::NotFound(kind)),
        Some(s) => ensure_pending(kind, &s).and(Err(AppError::conflict(format!(
            "{kind} changed while rejecting"
        )))),
    }
}

pub async fn reject_deposit(pool: &PgPool, deposit_id: Uuid, reason: Option<&str>) -> AppResult<()> {
    reject_request(pool, "deposits", "deposit", deposit_id, reason).await
}

pub async fn reject_withdrawal(
    pool: &PgPool,
    withdrawal_id: Uuid,
    reason: Option<&str>,
) -> AppResult<()> {
    reject_request(pool, "withdrawals", "withdrawal", withdrawal_id, reason).await
}

pub async fn admin_set_balance(
    pool: &PgPool,
    user_id: Uuid,
    edit: &BalanceEdit,
) -> AppResult<(Balance, BalanceAdjustment)> {
    validate_edit(edit)?;
    let mut tx = pool.begin().await?;

    let previous = lock_balance(&mut tx, user_id).await?;
    let updated = sqlx::query_as::<_, Balance>(
        r#"UPDATE balances
              SET balance = $2, today_profit_loss = $3, signal_strength = $4, updated_at = now()
            WHERE user_id = $1
        RETURNING *"#,
    )
    .bind(user_id)
    .bind(edit.balance)
    .bind(edit.today_pl)
    .bind(edit.signal_strength)
    .fetch_one(&mut *tx)
    .await?;

    let adjustment = sqlx::query_as::<_, BalanceAdjustment>(
        r#"INSERT INTO admin_balance_adjustments
                  (user_id, amount, previous_balance, adjustment_type, reason)
           VALUES ($1, $2, $3, 'manual_adjustment', $4)
        RETURNING *"#,
    )
    .bind(user_id)
    .bind(edit.balance)
    .bind(previous.balance)
    .bind(edit.reason.as_deref().unwrap_or("Admin manual edit"))
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    log::info!("balance of {user_id} set {} → {}", previous.balance, updated.balance);
    Ok((updated, adjustment))
}

// ======================================================================
// UNIT TESTS
// ======================================================================
