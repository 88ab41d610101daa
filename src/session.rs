use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::STANDARD as Base64Engine;
use base64::Engine;
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::debug;

/// The signed-in tenant behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store error: {0}")]
    Store(#[from] sqlx::Error),
}

// key: session-resolver -> request headers to identity
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve_session(&self, headers: &HeaderMap) -> Result<Option<Identity>, SessionError>;
}

/// Resolves better-auth style sessions: a signed `token.signature` cookie or a
/// raw bearer token, looked up in the `sessions` table.
pub struct DatabaseSessionResolver {
    pool: PgPool,
    cookie_name: String,
    secret: String,
}

impl DatabaseSessionResolver {
    pub fn new(pool: PgPool, cookie_name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            pool,
            cookie_name: cookie_name.into(),
            secret: secret.into(),
        }
    }

    fn session_token(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(value) = cookie_value(headers, &self.cookie_name) {
            let decoded = urlencoding::decode(&value).ok()?;
            return verify_signed_token(&decoded, &self.secret);
        }
        bearer_token(headers)
    }
}

#[async_trait]
impl SessionResolver for DatabaseSessionResolver {
    async fn resolve_session(&self, headers: &HeaderMap) -> Result<Option<Identity>, SessionError> {
        let Some(token) = self.session_token(headers) else {
            return Ok(None);
        };
        let identity = sqlx::query_as::<_, Identity>(
            r#"
            SELECT u.id AS user_id, u.email, u.name
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = $1 AND s.expires_at > NOW()
            "#,
        )
        .bind(&token)
        .fetch_optional(&self.pool)
        .await?;
        if identity.is_none() {
            debug!("session token did not match an active session");
        }
        Ok(identity)
    }
}

#[derive(Deserialize)]
struct Claims {
    sub: String,
    email: String,
    #[serde(default)]
    name: String,
    #[allow(dead_code)]
    exp: usize,
}

/// HS256 bearer tokens for service callers.
pub struct JwtSessionResolver {
    key: DecodingKey,
    validation: Validation,
}

impl JwtSessionResolver {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

#[async_trait]
impl SessionResolver for JwtSessionResolver {
    async fn resolve_session(&self, headers: &HeaderMap) -> Result<Option<Identity>, SessionError> {
        let Some(token) = bearer_token(headers) else {
            return Ok(None);
        };
        match decode::<Claims>(&token, &self.key, &self.validation) {
            Ok(decoded) => Ok(Some(Identity {
                user_id: decoded.claims.sub,
                email: decoded.claims.email,
                name: decoded.claims.name,
            })),
            Err(error) => {
                debug!(%error, "rejected bearer token");
                Ok(None)
            }
        }
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|cookie| {
            let (key, value) = cookie.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Splits `token.signature` and checks the HMAC-SHA256 signature.
fn verify_signed_token(value: &str, secret: &str) -> Option<String> {
    let (token, signature) = value.rsplit_once('.')?;
    let signature = Base64Engine.decode(signature).ok()?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(token.as_bytes());
    mac.verify_slice(&signature).ok()?;
    Some(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn sign(token: &str, secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(token.as_bytes());
        format!("{token}.{}", Base64Engine.encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn signed_cookie_is_verified() {
        let signed = sign("abc123", "secret");
        assert_eq!(verify_signed_token(&signed, "secret").as_deref(), Some("abc123"));
        assert_eq!(verify_signed_token(&signed, "other"), None);
        assert_eq!(verify_signed_token("abc123", "secret"), None);
    }

    #[test]
    fn cookie_value_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; better-auth.session_token=tok%2Esig; other=1"
                .parse()
                .unwrap(),
        );
        let value = cookie_value(&headers, "better-auth.session_token").unwrap();
        assert_eq!(value, "tok%2Esig");
    }

    #[tokio::test]
    async fn encoded_signed_cookie_yields_session_token() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let resolver = DatabaseSessionResolver::new(pool, "better-auth.session_token", "secret");
        let signed = sign("abc123", "secret");
        let encoded = urlencoding::encode(&signed);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("better-auth.session_token={encoded}").parse().unwrap(),
        );
        assert_eq!(resolver.session_token(&headers).as_deref(), Some("abc123"));

        headers.insert(
            header::COOKIE,
            "better-auth.session_token=abc123.%ZZ".parse().unwrap(),
        );
        assert_eq!(resolver.session_token(&headers), None);
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn jwt_resolver_reads_claims() {
        let claims = serde_json::json!({
            "sub": "user-7",
            "email": "seven@example.com",
            "name": "Seven",
            "exp": 9999999999u64
        });
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );

        let resolver = JwtSessionResolver::new("secret");
        let identity = resolver.resolve_session(&headers).await.unwrap().unwrap();
        assert_eq!(identity.user_id, "user-7");
        assert_eq!(identity.email, "seven@example.com");

        let other = JwtSessionResolver::new("different");
        assert!(other.resolve_session(&headers).await.unwrap().is_none());
    }
}
