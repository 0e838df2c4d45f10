use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use futures_util::future::LocalBoxFuture;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::User;
use crate::repo::RepoError;
use crate::routes::AppState;

/// Caller identity. The bearer token is the caller's user id, looked up in
/// the user directory; credentials are verified upstream of this service.
#[derive(Debug, Clone)]
pub struct Auth(pub User);

impl Auth {
    /// Caller-scoped routes name the caller by alias; anyone else is refused.
    pub fn ensure_alias(&self, alias: &str) -> Result<(), ApiError> {
        if self.0.alias == alias { Ok(()) } else { Err(ApiError::Forbidden) }
    }
}

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header.
        let token = BearerAuth::from_request(req, pl).into_inner().map(|b| b.token().to_string());
        let users = req.app_data::<web::Data<AppState>>().map(|s| s.users.clone());
        Box::pin(async move {
            let id: Uuid = token.ok().and_then(|t| t.parse().ok()).ok_or(ApiError::Unauthorized)?;
            let users = users.ok_or_else(|| {
                log::error!("AppState missing from app data");
                ApiError::Internal
            })?;
            match users.get_user(id).await {
                Ok(user) => Ok(Auth(user)),
                Err(RepoError::NotFound) => Err(ApiError::Unauthorized),
                Err(e) => Err(e.into()),
            }
        })
    }
}
