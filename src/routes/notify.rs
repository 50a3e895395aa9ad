use actix_web::{post, web, HttpResponse, Scope};

use crate::services::notifier::{Mailer, WelcomeRequest};
use crate::utils::errors::AppResult;

/// Welcome mail after signup or onboarding. The body is the bare outcome,
/// which carries the confirmation code for signups.
#[post("/welcome")]
async fn welcome(
    body: web::Json<WelcomeRequest>,
    mailer: web::Data<Mailer>,
) -> AppResult<HttpResponse> {
    let outcome = mailer.send_welcome(&body).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

pub fn notify_scope() -> Scope {
    web::scope("/notify").service(welcome)
}
