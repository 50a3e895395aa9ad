use actix_web::{
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use futures_util::FutureExt;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::settings::Settings;
use crate::utils::errors::AppError;
use crate::utils::signature::verify_hmac;

/// Header naming the acting user on HMAC-signed service calls.
pub const USER_HEADER: &str = "X-AP-USER";

/// Authenticated user, inserted into request extensions. Handlers take it
/// as `web::ReqData<UserId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

#[derive(Debug, Deserialize)]
struct StdClaims {
    sub: String,
}

/// Resolves the `sub` claim of an HS256 token to a user id.
pub fn user_from_jwt(token: &str, secret: &str) -> Option<Uuid> {
    let data = decode::<StdClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| log::debug!("jwt rejected: {e}"))
    .ok()?;
    Uuid::parse_str(&data.claims.sub).ok()
}

pub struct Auth;

impl<S> Transform<S, ServiceRequest> for Auth
where
    S: Service<ServiceRequest, Response = ServiceResponse, Error = Error> + 'static,
{
    type Response  = ServiceResponse;
    type Error     = Error;
    type InitError = ();
    type Transform = AuthMw<S>;
    type Future    = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, srv: S) -> Self::Future {
        ok(AuthMw { inner: std::rc::Rc::new(srv) })
    }
}

pub struct AuthMw<S> {
    inner: std::rc::Rc<S>,
}

impl<S> Service<ServiceRequest> for AuthMw<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse, Error = Error> + 'static,
{
    type Response = ServiceResponse;
    type Error    = Error;
    type Future   = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(ctx)
    }

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let inner = self.inner.clone();
        let is_get = req.method() == actix_web::http::Method::GET;

        async move {
            let Some(settings) = req.app_data::<web::Data<Settings>>().cloned() else {
                log::error!("auth middleware mounted without Settings app data");
                return Ok(req.error_response(AppError::Unauthorized("auth failed".into())));
            };

            // --- 1. Buffer body if non-GET, then hand it back to the handler
            if !is_get {
                use actix_web::web::BytesMut;
                use futures_util::StreamExt;

                let mut payload = req.take_payload();
                let mut body = BytesMut::new();
                while let Some(chunk) = payload.next().await {
                    body.extend_from_slice(&chunk?);
                }
                let body = body.freeze();
                req.extensions_mut().insert(body.to_vec());
                req.set_payload(Payload::from(body));
            }

            // --- 2. Bearer JWT
            let jwt_user = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .and_then(|tok| user_from_jwt(tok.trim(), &settings.jwt_secret));

            // --- 3. HMAC-signed service call naming the user
            let hmac_user = || {
                let secret = settings.hmac_secret.as_deref()?;
                if !verify_hmac(&req, secret, chrono::Utc::now().timestamp()) {
                    return None;
                }
                req.headers()
                    .get(USER_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| Uuid::parse_str(s.trim()).ok())
            };

            // --- 4. Inject user and forward
            match jwt_user.or_else(hmac_user) {
                Some(uid) => {
                    req.extensions_mut().insert(UserId(uid));
                    inner.call(req).await
                }
                None => Ok(req.error_response(AppError::Unauthorized("auth failed".into()))),
            }
        }
        .boxed_local()
    }
}
