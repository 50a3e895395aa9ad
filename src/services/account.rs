//! User-facing account operations: bootstrap, onboarding, KYC and the
//! creation of pending deposit/withdrawal requests.

use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{Balance, Deposit, KycStatus, Profile, Withdrawal};
use crate::db::queries::{self, NewDeposit, NewWithdrawal, ProfileUpdate};
use crate::services::ledger::validate_amount;
use crate::services::notifier::{EmailKind, Mailer, WelcomeRequest};
use crate::utils::errors::{AppError, AppResult};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Bootstrap {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KycSubmission {
    pub government_id_type: Option<String>,
    pub government_id_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    pub amount: f64,
    pub method: String,
    pub wallet_address: Option<String>,
    pub tx_hash: Option<String>,
    pub screenshot_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalRequest {
    pub amount: f64,
    #[serde(default = "usdt")]
    pub method: String,
    pub wallet_address: Option<String>,
    pub bank_details: Option<serde_json::Value>,
}

fn usdt() -> String {
    "USDT".into()
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required(field: &str, value: &str) -> AppResult<String> {
    let v = value.trim();
    if v.is_empty() {
        Err(AppError::validation(format!("{field} is required")))
    } else {
        Ok(v.to_string())
    }
}

/// Trims the onboarding form; name, phone and country are mandatory.
pub fn normalise_profile(update: &ProfileUpdate) -> AppResult<ProfileUpdate> {
    let opt = |v: &Option<String>| non_blank(v).map(str::to_string);
    Ok(ProfileUpdate {
        full_name: required("Full name", &update.full_name)?,
        phone: required("Phone", &update.phone)?,
        country: required("Country", &update.country)?,
        date_of_birth: update.date_of_birth,
        address: opt(&update.address),
        city: opt(&update.city),
        state: opt(&update.state),
        postal_code: opt(&update.postal_code),
    })
}

/// An attached government id sends the profile straight to review.
pub fn kyc_outcome(sub: &KycSubmission) -> (KycStatus, Option<(&str, &str)>) {
    match (non_blank(&sub.government_id_type), non_blank(&sub.government_id_url)) {
        (Some(kind), Some(url)) => (KycStatus::PendingReview, Some((kind, url))),
        _ => (KycStatus::Submitted, None),
    }
}

pub fn validate_deposit(req: &DepositRequest) -> AppResult<()> {
    validate_amount(req.amount)?;
    required("Payment method", &req.method)?;
    Ok(())
}

/// Funds are not reserved here; the check is repeated under lock on approval.
pub fn validate_withdrawal(req: &WithdrawalRequest, available: f64) -> AppResult<()> {
    validate_amount(req.amount)?;
    if non_blank(&req.wallet_address).is_none() {
        return Err(AppError::validation("Wallet address is required"));
    }
    if req.amount > available {
        return Err(AppError::InsufficientFunds);
    }
    Ok(())
}

pub async fn bootstrap(
    pool: &PgPool,
    user_id: Uuid,
    req: &Bootstrap,
    demo_balance: f64,
) -> AppResult<(Profile, Balance)> {
    let email = non_blank(&req.email);
    let (profile, balance) = queries::ensure_account(pool, user_id, email, demo_balance).await?;
    Ok((profile, balance))
}

pub async fn profile(pool: &PgPool, user_id: Uuid) -> AppResult<Profile> {
    queries::get_profile(pool, user_id)
        .await?
        .ok_or(AppError::NotFound("profile"))
}

/// Saves the onboarding form and sends the profile-complete email. A mail
/// failure is logged and does not undo the update.
pub async fn complete_profile(
    pool: &PgPool,
    mailer: &Mailer,
    user_id: Uuid,
    update: &ProfileUpdate,
) -> AppResult<Profile> {
    let update = normalise_profile(update)?;
    let profile = queries::complete_profile(pool, user_id, &update)
        .await?
        .ok_or(AppError::NotFound("profile"))?;

    if let Some(email) = profile.email.clone() {
        let req = WelcomeRequest {
            email,
            kind: EmailKind::ProfileComplete,
            name: profile.full_name.clone(),
        };
        if let Err(e) = mailer.send_welcome(&req).await {
            log::warn!("profile-complete email for {user_id} failed: {e}");
        }
    }
    Ok(profile)
}

/// Disabled accounts keep read access but cannot move money or trade.
pub async fn ensure_active(pool: &PgPool, user_id: Uuid) -> AppResult<()> {
    if profile(pool, user_id).await?.is_active {
        Ok(())
    } else {
        Err(AppError::Forbidden("Account is disabled".into()))
    }
}

pub async fn submit_kyc(pool: &PgPool, user_id: Uuid, sub: &KycSubmission) -> AppResult<Profile> {
    let (status, government_id) = kyc_outcome(sub);
    let profile = queries::set_kyc(pool, user_id, status, government_id)
        .await?
        .ok_or(AppError::NotFound("profile"))?;
    log::info!("kyc for {user_id} is now {status}");
    Ok(profile)
}

pub async fn balance(pool: &PgPool, user_id: Uuid) -> AppResult<Balance> {
    queries::get_balance(pool, user_id)
        .await?
        .ok_or(AppError::NotFound("balance"))
}

pub async fn request_deposit(pool: &PgPool, user_id: Uuid, req: &DepositRequest) -> AppResult<Deposit> {
    validate_deposit(req)?;
    ensure_active(pool, user_id).await?;
    let deposit = queries::insert_deposit(
        pool,
        &NewDeposit {
            user_id,
            amount: req.amount,
            method: req.method.trim().to_ascii_uppercase(),
            wallet_address: non_blank(&req.wallet_address).map(str::to_string),
            tx_hash: non_blank(&req.tx_hash).map(str::to_string),
            screenshot_url: non_blank(&req.screenshot_url).map(str::to_string),
        },
    )
    .await?;
    log::info!("deposit {} requested: {} {}", deposit.id, deposit.amount, deposit.method);
    Ok(deposit)
}

pub async fn request_withdrawal(
    pool: &PgPool,
    user_id: Uuid,
    req: &WithdrawalRequest,
) -> AppResult<Withdrawal> {
    ensure_active(pool, user_id).await?;
    let current = balance(pool, user_id).await?;
    validate_withdrawal(req, current.balance)?;
    let withdrawal = queries::insert_withdrawal(
        pool,
        &NewWithdrawal {
            user_id,
            amount: req.amount,
            method: req.method.trim().to_string(),
            wallet_address: non_blank(&req.wallet_address).map(str::to_string),
            bank_details: req.bank_details.clone(),
        },
    )
    .await?;
    log::info!("withdrawal {} requested: {}", withdrawal.id, withdrawal.amount);
    Ok(withdrawal)
}
