use std::sync::Arc;

use axum::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::session::{Identity, SessionResolver};

/// Authenticated tenant, resolved through the `SessionResolver` installed as a
/// request extension.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

impl From<Identity> for AuthUser {
    fn from(identity: Identity) -> Self {
        Self {
            user_id: identity.user_id,
            email: identity.email,
            name: identity.name,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let resolver = parts
            .extensions
            .get::<Arc<dyn SessionResolver>>()
            .cloned()
            .ok_or_else(|| AppError::Message("session resolver not configured".into()))?;
        let identity = resolver
            .resolve_session(&parts.headers)
            .await?
            .ok_or(AppError::Unauthorized)?;
        Ok(identity.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionError;
    use axum::http::{HeaderMap, Request};

    struct HeaderSession;

    #[async_trait]
    impl SessionResolver for HeaderSession {
        async fn resolve_session(
            &self,
            headers: &HeaderMap,
        ) -> Result<Option<Identity>, SessionError> {
            Ok(headers
                .get("x-user")
                .and_then(|value| value.to_str().ok())
                .map(|user| Identity {
                    user_id: user.to_string(),
                    email: format!("{user}@example.com"),
                    name: user.to_string(),
                }))
        }
    }

    fn parts(user: Option<&str>) -> Parts {
        let mut builder = Request::builder();
        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }
        let mut parts = builder.body(()).unwrap().into_parts().0;
        parts
            .extensions
            .insert::<Arc<dyn SessionResolver>>(Arc::new(HeaderSession));
        parts
    }

    #[tokio::test]
    async fn identity_resolved_from_session() {
        let mut parts = parts(Some("u-1"));
        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.user_id, "u-1");
        assert_eq!(user.email, "u-1@example.com");
    }

    #[tokio::test]
    async fn missing_session_is_unauthorized() {
        let mut parts = parts(None);
        let res = AuthUser::from_request_parts(&mut parts, &()).await;
        assert!(matches!(res, Err(AppError::Unauthorized)));
    }
}
