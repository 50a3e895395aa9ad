//! `/admin-data`: single POST endpoint for the admin console. Responses
//! are `{"data": ...}` on success and `{"error": "..."}` otherwise.

use actix_web::{http::StatusCode, post, web, HttpResponse, ResponseError};
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::config::settings::Settings;
use crate::services::admin::{self, AdminAction, AdminEnvelope, ParseError};

fn error(status: StatusCode, msg: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::build(status).json(json!({ "error": msg.to_string() }))
}

#[post("/admin-data")]
async fn admin_data(
    body: web::Bytes,
    settings: web::Data<Settings>,
    pg: web::Data<PgPool>,
) -> HttpResponse {
    let envelope = match serde_json::from_slice::<Value>(&body) {
        Ok(v) => AdminEnvelope::lenient(&v),
        Err(e) => {
            log::debug!("admin body rejected: {e}");
            return error(StatusCode::BAD_REQUEST, "Invalid request body");
        }
    };

    if !admin::credentials_match(&settings, &envelope.admin_name, &envelope.admin_password) {
        log::warn!("admin auth failed for action {:?}", envelope.action);
        return error(StatusCode::UNAUTHORIZED, "Invalid admin credentials");
    }

    let action = match AdminAction::parse(&envelope.action, envelope.payload) {
        Ok(a) => a,
        Err(ParseError::UnknownAction) => return error(StatusCode::BAD_REQUEST, "Unknown action"),
        Err(ParseError::BadPayload(e)) => {
            return error(StatusCode::BAD_REQUEST, format!("Invalid payload: {e}"))
        }
    };

    if action.is_mutation() {
        log::info!("admin action {}", envelope.action);
    }

    match admin::execute(&pg, action).await {
        Ok(data) => HttpResponse::Ok().json(json!({ "data": data })),
        Err(e) => {
            log::warn!("admin action {} failed: {e}", envelope.action);
            error(e.status_code(), e)
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(admin_data);
}
