use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

/// Claims minted by the hosted identity provider.
#[derive(Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    org_id: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[allow(dead_code)]
    exp: usize,
}

/// Authenticated caller plus the organization they are acting in.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub org_id: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    if let Some(cookie_header) = parts.headers.get(axum::http::header::COOKIE) {
        let cookies = cookie_header.to_str().unwrap_or("");
        let from_cookie = cookies.split(';').find_map(|c| {
            let c = c.trim();
            c.strip_prefix("auth_token=").map(|s| s.to_string())
        });
        if from_cookie.is_some() {
            return from_cookie;
        }
    }
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|authz| authz.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").map(|s| s.to_string()))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or((StatusCode::UNAUTHORIZED, "Missing token".into()))?;
        let secret = crate::config::JWT_SECRET.as_str();
        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".into()))?;
        let claims = decoded.claims;
        let org_id = claims
            .org_id
            .filter(|org| !org.trim().is_empty())
            .ok_or((StatusCode::UNAUTHORIZED, "No active organization".into()))?;
        if claims.sub.trim().is_empty() {
            return Err((StatusCode::UNAUTHORIZED, "Invalid token".into()));
        }
        Ok(AuthUser {
            user_id: claims.sub,
            org_id,
            role: claims.role.unwrap_or_else(|| "member".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap()
    }

    async fn extract(header: (&str, String)) -> Result<AuthUser, (StatusCode, String)> {
        std::env::set_var("JWT_SECRET", "secret");
        let request = Request::builder()
            .header(header.0, header.1)
            .body(axum::body::Body::empty())
            .unwrap();
        let mut parts = request.into_parts().0;
        AuthUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn token_parsed_from_header() {
        let token = token(serde_json::json!({
            "sub": "user_7",
            "org_id": "org_acme",
            "role": "admin",
            "exp": 9999999999u64
        }));
        let user = extract(("Authorization", format!("Bearer {}", token)))
            .await
            .unwrap();
        assert_eq!(user.user_id, "user_7");
        assert_eq!(user.org_id, "org_acme");
        assert!(user.is_admin());
    }

    #[tokio::test]
    async fn token_parsed_from_cookie_with_default_role() {
        let token = token(serde_json::json!({
            "sub": "user_9",
            "org_id": "org_beta",
            "exp": 9999999999u64
        }));
        let user = extract(("Cookie", format!("theme=dark; auth_token={token}")))
            .await
            .unwrap();
        assert_eq!(user.role, "member");
        assert!(!user.is_admin());
    }

    #[tokio::test]
    async fn missing_organization_rejected() {
        let token = token(serde_json::json!({"sub": "user_7", "exp": 9999999999u64}));
        let (status, _) = extract(("Authorization", format!("Bearer {}", token)))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_token_rejected() {
        let res = extract(("Authorization", "Bearer invalid".to_string())).await;
        assert!(res.is_err());
    }
}
