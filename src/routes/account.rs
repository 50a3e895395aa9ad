use actix_web::{get, patch, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;

use crate::config::settings::Settings;
use crate::db::models::Sender;
use crate::db::queries::{self, ProfileUpdate};
use crate::middleware::auth::UserId;
use crate::services::account::{self, Bootstrap, DepositRequest, KycSubmission, WithdrawalRequest};
use crate::services::chat;
use crate::services::notifier::Mailer;
use crate::utils::errors::AppResult;
use crate::utils::types::ApiResponse;

#[post("/account")]
async fn open_account(
    user: web::ReqData<UserId>,
    body: Option<web::Json<Bootstrap>>,
    pg: web::Data<PgPool>,
    settings: web::Data<Settings>,
) -> AppResult<HttpResponse> {
    let req = body.map(web::Json::into_inner).unwrap_or_default();
    let (profile, balance) =
        account::bootstrap(&pg, user.0, &req, settings.demo_starting_balance).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "profile": profile,
        "balance": balance,
    }))))
}

#[get("/profile")]
async fn get_profile(user: web::ReqData<UserId>, pg: web::Data<PgPool>) -> AppResult<HttpResponse> {
    let profile = account::profile(&pg, user.0).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(profile)))
}

#[patch("/profile")]
async fn update_profile(
    user: web::ReqData<UserId>,
    body: web::Json<ProfileUpdate>,
    pg: web::Data<PgPool>,
    mailer: web::Data<Mailer>,
) -> AppResult<HttpResponse> {
    let profile = account::complete_profile(&pg, &mailer, user.0, &body).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok_with("Profile completed", profile)))
}

#[post("/profile/kyc")]
async fn submit_kyc(
    user: web::ReqData<UserId>,
    body: web::Json<KycSubmission>,
    pg: web::Data<PgPool>,
) -> AppResult<HttpResponse> {
    let profile = account::submit_kyc(&pg, user.0, &body).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok_with("KYC submitted", profile)))
}

#[get("/balance")]
async fn get_balance(user: web::ReqData<UserId>, pg: web::Data<PgPool>) -> AppResult<HttpResponse> {
    let balance = account::balance(&pg, user.0).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(balance)))
}

#[get("/deposits")]
async fn list_deposits(user: web::ReqData<UserId>, pg: web::Data<PgPool>) -> AppResult<HttpResponse> {
    let rows = queries::list_deposits(&pg, user.0).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(rows)))
}

#[post("/deposits")]
async fn create_deposit(
    user: web::ReqData<UserId>,
    body: web::Json<DepositRequest>,
    pg: web::Data<PgPool>,
) -> AppResult<HttpResponse> {
    let deposit = account::request_deposit(&pg, user.0, &body).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok_with("Deposit submitted for review", deposit)))
}

#[get("/withdrawals")]
async fn list_withdrawals(user: web::ReqData<UserId>, pg: web::Data<PgPool>) -> AppResult<HttpResponse> {
    let rows = queries::list_withdrawals(&pg, user.0).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(rows)))
}

#[post("/withdrawals")]
async fn create_withdrawal(
    user: web::ReqData<UserId>,
    body: web::Json<WithdrawalRequest>,
    pg: web::Data<PgPool>,
) -> AppResult<HttpResponse> {
    let withdrawal = account::request_withdrawal(&pg, user.0, &body).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok_with(
        "Withdrawal submitted for review",
        withdrawal,
    )))
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
}

#[get("/chat")]
async fn list_chat(user: web::ReqData<UserId>, pg: web::Data<PgPool>) -> AppResult<HttpResponse> {
    let messages = queries::list_chat(&pg, user.0).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(messages)))
}

#[post("/chat")]
async fn send_chat(
    user: web::ReqData<UserId>,
    body: web::Json<ChatBody>,
    pg: web::Data<PgPool>,
) -> AppResult<HttpResponse> {
    let msg = chat::send(&pg, user.0, &body.message, Sender::User).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(msg)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(open_account)
        .service(get_profile)
        .service(update_profile)
        .service(submit_kyc)
        .service(get_balance)
        .service(list_deposits)
        .service(create_deposit)
        .service(list_withdrawals)
        .service(create_withdrawal)
        .service(list_chat)
        .service(send_chat);
}
