//! Authentication: argon2 password hashing, HS256 access/refresh tokens,
//! and a revocation denylist for logged-out tokens.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use saas_core::config::AuthConfig;
use saas_core::types::CustomerRole;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::customers::{Customer, CustomerDirectory};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Insufficient privileges")]
    InsufficientRole,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Which API a token was issued for. Admin tokens never work on the
/// portal and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Admin,
    Portal,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Admin => "admin",
            Audience::Portal => "portal",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: CustomerRole,
    pub kind: TokenKind,
    pub aud: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub struct AuthManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    hasher: Argon2<'static>,
    access_ttl: Duration,
    remember_me_ttl: Duration,
    refresh_ttl: Duration,
    /// Revoked token id -> its expiry (unix seconds).
    revoked: DashMap<String, i64>,
}

impl AuthManager {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let params = Params::new(
            config.password_hash_memory_kib,
            config.password_hash_iterations,
            1,
            None,
        )
        .map_err(|e| AuthError::Hashing(e.to_string()))?;

        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            hasher: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            access_ttl: Duration::seconds(config.access_ttl_secs),
            remember_me_ttl: Duration::seconds(config.remember_me_ttl_secs),
            refresh_ttl: Duration::seconds(config.refresh_ttl_secs),
            revoked: DashMap::new(),
        })
    }

    pub fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }

    /// Parameters are read from the stored PHC string, so hashes made with
    /// older settings still verify.
    pub fn verify_password(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .hasher
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Check credentials and account status.
    pub fn authenticate(
        &self,
        customers: &CustomerDirectory,
        email: &str,
        password: &str,
    ) -> Result<Customer, AuthError> {
        let customer = customers
            .find_by_email(email)
            .ok_or(AuthError::InvalidCredentials)?;
        if !self.verify_password(password, &customer.password_hash) {
            debug!(customer_id = %customer.id, "Password mismatch");
            return Err(AuthError::InvalidCredentials);
        }
        if !customer.is_active {
            return Err(AuthError::AccountDisabled);
        }
        Ok(customer)
    }

    fn issue(
        &self,
        customer: &Customer,
        audience: Audience,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: customer.id,
            email: customer.email.clone(),
            role: customer.role,
            kind,
            aud: audience.as_str().to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    pub fn issue_access(
        &self,
        customer: &Customer,
        audience: Audience,
        remember_me: bool,
    ) -> Result<AccessToken, AuthError> {
        let ttl = if remember_me {
            self.remember_me_ttl
        } else {
            self.access_ttl
        };
        Ok(AccessToken {
            access_token: self.issue(customer, audience, TokenKind::Access, ttl)?,
            token_type: "Bearer".to_string(),
            expires_in: ttl.num_seconds(),
        })
    }

    pub fn issue_pair(
        &self,
        customer: &Customer,
        audience: Audience,
        remember_me: bool,
    ) -> Result<TokenPair, AuthError> {
        let access = self.issue_access(customer, audience, remember_me)?;
        let refresh_token = self.issue(customer, audience, TokenKind::Refresh, self.refresh_ttl)?;
        info!(customer_id = %customer.id, audience = audience.as_str(), "Issued token pair");
        Ok(TokenPair {
            access_token: access.access_token,
            refresh_token,
            token_type: access.token_type,
            expires_in: access.expires_in,
        })
    }

    /// Decode and validate signature, expiry, audience, kind, and revocation.
    pub fn verify(&self, token: &str, audience: Audience, kind: TokenKind) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(&[audience.as_str()]);

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?
            .claims;

        if claims.kind != kind {
            return Err(AuthError::InvalidToken("wrong token type".to_string()));
        }
        if self.revoked.contains_key(&claims.jti) {
            return Err(AuthError::TokenRevoked);
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new access token. The account must
    /// still exist and be active.
    pub fn refresh(
        &self,
        customers: &CustomerDirectory,
        refresh_token: &str,
        audience: Audience,
    ) -> Result<(Customer, AccessToken), AuthError> {
        let claims = self.verify(refresh_token, audience, TokenKind::Refresh)?;
        let customer = customers
            .get(claims.sub)
            .ok_or_else(|| AuthError::InvalidToken("unknown subject".to_string()))?;
        if !customer.is_active {
            return Err(AuthError::AccountDisabled);
        }
        if audience == Audience::Admin && !customer.is_admin() {
            return Err(AuthError::InsufficientRole);
        }
        let access = self.issue_access(&customer, audience, false)?;
        Ok((customer, access))
    }

    /// Deny a token until it would have expired anyway.
    pub fn revoke(&self, claims: &Claims) {
        self.revoked.insert(claims.jti.clone(), claims.exp);
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.contains_key(jti)
    }

    /// Drop denylist entries for tokens that have expired.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now().timestamp();
        let before = self.revoked.len();
        self.revoked.retain(|_, exp| *exp > now);
        before - self.revoked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers::NewCustomer;

    pub(crate) fn fast_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".into(),
            password_hash_memory_kib: 256,
            password_hash_iterations: 1,
            ..AuthConfig::default()
        }
    }

    fn setup(role: CustomerRole) -> (AuthManager, CustomerDirectory, Customer) {
        let auth = AuthManager::new(&fast_config()).unwrap();
        let customers = CustomerDirectory::new();
        let mut new = NewCustomer::new("user@example.com", auth.hash_password("Sup3r!Secret").unwrap());
        new.role = role;
        let customer = customers.create(new).unwrap();
        (auth, customers, customer)
    }

    #[test]
    fn test_password_hash_round_trip() {
        let auth = AuthManager::new(&fast_config()).unwrap();
        let hash = auth.hash_password("Sup3r!Secret").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(auth.verify_password("Sup3r!Secret", &hash));
        assert!(!auth.verify_password("wrong", &hash));
        assert!(!auth.verify_password("Sup3r!Secret", "not-a-phc-string"));
    }

    #[test]
    fn test_authenticate() {
        let (auth, customers, customer) = setup(CustomerRole::Owner);
        assert!(auth.authenticate(&customers, "USER@example.com", "Sup3r!Secret").is_ok());
        assert!(matches!(
            auth.authenticate(&customers, "user@example.com", "nope"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.authenticate(&customers, "ghost@example.com", "Sup3r!Secret"),
            Err(AuthError::InvalidCredentials)
        ));

        customers
            .update(
                customer.id,
                crate::customers::CustomerUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert!(matches!(
            auth.authenticate(&customers, "user@example.com", "Sup3r!Secret"),
            Err(AuthError::AccountDisabled)
        ));
    }

    #[test]
    fn test_token_audience_and_kind_enforced() {
        let (auth, _, customer) = setup(CustomerRole::Owner);
        let pair = auth.issue_pair(&customer, Audience::Portal, false).unwrap();
        assert_eq!(pair.expires_in, 3600);

        let claims = auth
            .verify(&pair.access_token, Audience::Portal, TokenKind::Access)
            .unwrap();
        assert_eq!(claims.sub, customer.id);
        assert_eq!(claims.role, CustomerRole::Owner);

        assert!(auth.verify(&pair.access_token, Audience::Admin, TokenKind::Access).is_err());
        assert!(auth.verify(&pair.refresh_token, Audience::Portal, TokenKind::Access).is_err());
        assert!(auth.verify("garbage", Audience::Portal, TokenKind::Access).is_err());
    }

    #[test]
    fn test_remember_me_extends_access_ttl() {
        let (auth, _, customer) = setup(CustomerRole::Owner);
        let token = auth.issue_access(&customer, Audience::Portal, true).unwrap();
        assert_eq!(token.expires_in, 86_400);
    }

    #[test]
    fn test_refresh_and_revocation() {
        let (auth, customers, customer) = setup(CustomerRole::Owner);
        let pair = auth.issue_pair(&customer, Audience::Portal, false).unwrap();

        let (_, access) = auth.refresh(&customers, &pair.refresh_token, Audience::Portal).unwrap();
        let claims = auth
            .verify(&access.access_token, Audience::Portal, TokenKind::Access)
            .unwrap();

        auth.revoke(&claims);
        assert!(auth.is_revoked(&claims.jti));
        assert!(matches!(
            auth.verify(&access.access_token, Audience::Portal, TokenKind::Access),
            Err(AuthError::TokenRevoked)
        ));
        assert_eq!(auth.purge_expired(), 0);
    }

    #[test]
    fn test_admin_refresh_requires_admin_role() {
        let (auth, customers, customer) = setup(CustomerRole::Owner);
        let pair = auth.issue_pair(&customer, Audience::Admin, false).unwrap();
        assert!(matches!(
            auth.refresh(&customers, &pair.refresh_token, Audience::Admin),
            Err(AuthError::InsufficientRole)
        ));
    }

    #[test]
    fn test_expired_token_rejected_and_purged() {
        let config = AuthConfig {
            access_ttl_secs: -10,
            ..fast_config()
        };
        let auth = AuthManager::new(&config).unwrap();
        let customers = CustomerDirectory::new();
        let customer = customers.create(NewCustomer::new("x@example.com", "h")).unwrap();

        let token = auth.issue_access(&customer, Audience::Portal, false).unwrap();
        assert!(auth
            .verify(&token.access_token, Audience::Portal, TokenKind::Access)
            .is_err());

        auth.revoke(&Claims {
            sub: customer.id,
            email: customer.email.clone(),
            role: customer.role,
            kind: TokenKind::Access,
            aud: "portal".into(),
            jti: "old".into(),
            iat: 0,
            exp: 1,
        });
        assert_eq!(auth.purge_expired(), 1);
    }
}
