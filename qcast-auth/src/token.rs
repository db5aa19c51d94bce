// Credential token codec.

use std::time::Duration;

use chrono::{DateTime, Utc};
use qcast_core::{TenantDescriptor, TenantId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::seal::SecretSealer;
use crate::TokenError;

/// Default lifetime of an issued token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Claims {
    pub rid: String,
    pub rname: String,
    pub host: String,
    pub port: u16,
    pub db: String,
    pub user: String,
    /// Sealed login secret, never the plaintext.
    pub sec: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub descriptor: TenantDescriptor,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies HS256 credential tokens carrying a full
/// [`TenantDescriptor`].
pub struct TokenCodec {
    secret: Vec<u8>,
    sealer: SecretSealer,
    ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        let secret = secret.as_ref().to_vec();
        Self {
            sealer: SecretSealer::new(&secret),
            secret,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Compact lifetime label for clients, e.g. `24h`, `90m`, `45s`.
    pub fn ttl_label(&self) -> String {
        let secs = self.ttl.as_secs();
        if secs > 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs > 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }

    pub fn issue(&self, descriptor: &TenantDescriptor) -> Result<IssuedToken, TokenError> {
        self.issue_at(descriptor, Utc::now())
    }

    pub fn issue_at(&self, descriptor: &TenantDescriptor, now: DateTime<Utc>) -> Result<IssuedToken, TokenError> {
        let ttl = i64::try_from(self.ttl.as_secs())
            .map_err(|_| TokenError::Issue("token lifetime out of range".to_string()))?;
        let iat = now.timestamp();
        let exp = iat
            .checked_add(ttl)
            .ok_or_else(|| TokenError::Issue("token lifetime out of range".to_string()))?;

        let claims = Claims {
            rid: descriptor.tenant_id.to_string(),
            rname: descriptor.display_name.clone(),
            host: descriptor.host.clone(),
            port: descriptor.port,
            db: descriptor.database.clone(),
            user: descriptor.login_user.clone(),
            sec: self.sealer.seal(&descriptor.login_secret, descriptor.tenant_id.as_str())?,
            iat,
            exp,
        };

        let token = self.sign(&claims)?;
        debug!(tenant = %descriptor.tenant_id, exp, "issued credential token");
        Ok(IssuedToken {
            token,
            issued_at: timestamp(iat)?,
            expires_at: timestamp(exp)?,
        })
    }

    /// Signature first, then expiry: a tampered token is `Invalid` even if it
    /// has also expired.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let claims = self.decode(token.trim())?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        let login_secret = self.sealer.open(&claims.sec, &claims.rid)?;
        Ok(VerifiedToken {
            issued_at: timestamp(claims.iat).map_err(|_| TokenError::Invalid("bad iat".to_string()))?,
            expires_at: timestamp(claims.exp).map_err(|_| TokenError::Invalid("bad exp".to_string()))?,
            descriptor: TenantDescriptor {
                tenant_id: TenantId::new(claims.rid),
                display_name: claims.rname,
                host: claims.host,
                port: claims.port,
                database: claims.db,
                login_user: claims.user,
                login_secret,
            },
        })
    }

    #[cfg(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto"))]
    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| TokenError::Issue(e.to_string()))
    }

    #[cfg(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto"))]
    fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        use jsonwebtoken::errors::ErrorKind;
        use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);

        decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }

    #[cfg(not(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto")))]
    fn sign(&self, _claims: &Claims) -> Result<String, TokenError> {
        let _ = &self.secret;
        Err(TokenError::Issue(
            "JWT support is disabled (enable one of: jwt-aws-lc-rs, jwt-rust-crypto)".to_string(),
        ))
    }

    #[cfg(not(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto")))]
    fn decode(&self, _token: &str) -> Result<Claims, TokenError> {
        Err(TokenError::Invalid(
            "JWT support is disabled (enable one of: jwt-aws-lc-rs, jwt-rust-crypto)".to_string(),
        ))
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TokenError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| TokenError::Issue(format!("timestamp {secs} out of range")))
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"[PROTECTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}
