use argon2::{Argon2, PasswordHash, PasswordVerifier};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::error::AppError;
use crate::models::user::{AuthUser, Login, Role, User};
use crate::store::UserStore;

const LEEWAY_SECONDS: u64 = 30;
const DEFAULT_TTL_SECONDS: i64 = 3600;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    name: String,
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aud: Option<String>,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone)]
pub struct TokenBundle {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Clone)]
pub struct AuthService {
    users: UserStore,
    jwt: JwtConfig,
}

impl AuthService {
    pub fn new(users: UserStore, jwt: JwtConfig) -> Self {
        Self { users, jwt }
    }

    /// A missing user and a bad password are indistinguishable to the caller.
    pub async fn issue_token(&self, login: &Login) -> Result<TokenBundle, AppError> {
        let (user, password_hash) = match self.users.get_auth_by_name(&login.name).await {
            Ok(found) => found,
            Err(AppError::UserNotFound) => return Err(AppError::InvalidCredentials),
            Err(err) => return Err(err),
        };

        verify_password(&password_hash, &login.password)?;

        let now = Utc::now();
        let (token, expires_at) = self.sign_token(&user, now)?;

        Ok(TokenBundle {
            token,
            expires_at,
            user,
        })
    }

    fn sign_token(&self, user: &User, now: DateTime<Utc>) -> Result<(String, DateTime<Utc>), AppError> {
        let ttl = if self.jwt.ttl_seconds <= 0 {
            DEFAULT_TTL_SECONDS
        } else {
            self.jwt.ttl_seconds
        };
        let expires_at = now + Duration::seconds(ttl);

        let claims = Claims {
            sub: user.id.to_string(),
            name: user.name.clone(),
            role: user.role.as_str().to_string(),
            iss: self.jwt.issuer.clone(),
            aud: self.jwt.audience.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt.secret.as_bytes()),
        )
        .map_err(|err| AppError::Infrastructure(format!("token signing failed: {err}")))?;

        Ok((token, expires_at))
    }

    /// Validates an HS256 bearer token and extracts the caller identity.
    /// Returns the rejection reason for the WWW-Authenticate header.
    pub fn verify_token(&self, token: &str) -> Result<AuthUser, &'static str> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECONDS;
        validation.set_required_spec_claims(&["exp"]);

        if let Some(issuer) = &self.jwt.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.jwt.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt.secret.as_bytes()),
            &validation,
        )
        .map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => "expired token",
            ErrorKind::ImmatureSignature => "token not yet valid",
            ErrorKind::InvalidIssuer => "invalid token issuer",
            ErrorKind::InvalidAudience => "invalid token audience",
            ErrorKind::MissingRequiredClaim(claim) if claim.as_str() == "exp" => "missing exp",
            ErrorKind::MissingRequiredClaim(_) => "missing required claims",
            _ => "invalid token",
        })?;

        let claims = data.claims;
        if claims.sub.is_empty() || claims.name.is_empty() || claims.role.is_empty() {
            return Err("missing required claims");
        }

        let id: i64 = claims.sub.parse().map_err(|_| "invalid token")?;
        let role = Role::parse(&claims.role).ok_or("invalid role")?;

        Ok(AuthUser {
            id,
            name: claims.name,
            role,
        })
    }
}

fn verify_password(password_hash: &str, password: &str) -> Result<(), AppError> {
    let parsed = PasswordHash::new(password_hash).map_err(|_| AppError::InvalidCredentials)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AppError::InvalidCredentials)
}
