//! Authentication gate: password verifiers and bearer tokens.
//!
//! Passwords are stored as argon2id PHC strings. Tokens are HS256 JWTs carrying the user id
//! and username; a token that validates is turned into a [`filehub_core::Identity`] and that
//! identity is all the file service ever sees.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use filehub_core::Identity;
use filehub_types::NonEmptyText;
use filehub_uuid::UuidService;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    Expired,
    #[error("password must be at least 8 characters long")]
    WeakPassword,
    #[error("auth configuration error: {0}")]
    Config(String),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Hash a password using Argon2id, returning the PHC string (salt and parameters included).
pub fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Verify a password against a stored PHC string.
///
/// A wrong password is `Ok(false)`; only an unparsable verifier is an error.
pub fn verify_password(password: &str, hash: &str) -> AuthResult<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Hashing(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Verifier checked when a login names an unknown user, so that both login failures cost one
/// argon2 verification.
static UNKNOWN_USER_VERIFIER: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("filehub-unknown-user-placeholder").ok());

/// Checks a login password against the stored verifier of the named user, if there is one.
///
/// An unknown user (`stored_hash == None`) is `Ok(false)` after running the same verification
/// against a placeholder verifier.
pub fn check_credentials(password: &str, stored_hash: Option<&str>) -> AuthResult<bool> {
    check_credentials_with(password, stored_hash, verify_password)
}

fn check_credentials_with<V>(password: &str, stored_hash: Option<&str>, verify: V) -> AuthResult<bool>
where
    V: Fn(&str, &str) -> AuthResult<bool>,
{
    match stored_hash {
        Some(hash) => verify(password, hash),
        None => {
            if let Some(placeholder) = UNKNOWN_USER_VERIFIER.as_deref() {
                let _ = verify(password, placeholder);
            }
            Ok(false)
        }
    }
}

/// Registration policy for new passwords.
pub fn check_password_policy(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}

/// Extracts the token from an `Authorization` header value of the form `Bearer <token>`.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// JWT payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id in canonical UUID form
    pub sub: String,
    pub username: String,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    /// Converts validated claims into the identity passed to the file service.
    pub fn identity(&self) -> AuthResult<Identity> {
        let user_id = UuidService::parse(&self.sub)
            .map_err(|e| AuthError::InvalidToken(format!("subject: {}", e)))?;
        let username = NonEmptyText::new(&self.username)
            .map_err(|e| AuthError::InvalidToken(format!("username: {}", e)))?;
        Ok(Identity::new(user_id, username))
    }
}

/// Issues and validates bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    secret: String,
    expiry: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the secret is shorter than [`MIN_SECRET_BYTES`] or the
    /// expiry is zero.
    pub fn new(secret: impl Into<String>, expiry: Duration) -> AuthResult<Self> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_BYTES {
            return Err(AuthError::Config(format!(
                "JWT secret must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }
        if expiry.is_zero() {
            return Err(AuthError::Config("token expiry must be non-zero".into()));
        }
        Ok(Self { secret, expiry })
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn issue(&self, user_id: &UuidService, username: &NonEmptyText) -> AuthResult<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthError::Config(format!("system time error: {}", e)))?
            .as_secs();

        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            iat: now,
            exp: now.saturating_add(self.expiry.as_secs()),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::InvalidToken(format!("failed to sign token: {}", e)))
    }

    /// Checks signature, algorithm and expiry.
    pub fn validate(&self, token: &str) -> AuthResult<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(err.to_string()),
            }
        })
    }

    /// Validates `token` and returns the identity it carries.
    pub fn authenticate(&self, token: &str) -> AuthResult<Identity> {
        self.validate(token)?.identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

    fn service() -> TokenService {
        TokenService::new(SECRET, Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct-horse-battery").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct-horse-battery", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(matches!(
            verify_password("password", "not-a-phc-string"),
            Err(AuthError::Hashing(_))
        ));
    }

    #[test]
    fn test_check_credentials() {
        let hash = hash_password("correct-horse-battery").unwrap();

        assert!(check_credentials("correct-horse-battery", Some(&hash)).unwrap());
        assert!(!check_credentials("wrong-password", Some(&hash)).unwrap());
        assert!(!check_credentials("correct-horse-battery", None).unwrap());
    }

    #[test]
    fn test_unknown_user_still_runs_the_verifier() {
        let calls = std::cell::Cell::new(0);
        let counting = |password: &str, hash: &str| {
            calls.set(calls.get() + 1);
            verify_password(password, hash)
        };

        let verified = check_credentials_with("any-password", None, counting).unwrap();

        assert!(!verified);
        assert_eq!(calls.get(), 1);
        assert!(UNKNOWN_USER_VERIFIER
            .as_deref()
            .is_some_and(|phc| phc.starts_with("$argon2id$")));
    }

    #[test]
    fn test_password_policy() {
        assert!(check_password_policy("12345678").is_ok());
        assert!(matches!(
            check_password_policy("1234567"),
            Err(AuthError::WeakPassword)
        ));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer   abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn test_short_secret_is_rejected() {
        assert!(matches!(
            TokenService::new("short", Duration::from_secs(60)),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn test_issue_then_authenticate() {
        let service = service();
        let user_id = UuidService::new();
        let username = NonEmptyText::new("alice").unwrap();

        let token = service.issue(&user_id, &username).unwrap();
        let identity = service.authenticate(&token).unwrap();

        assert_eq!(identity, Identity::new(user_id, username));
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() {
        let other = TokenService::new("another-secret-that-is-also-32-bytes!!", Duration::from_secs(60))
            .unwrap();
        let token = other
            .issue(&UuidService::new(), &NonEmptyText::new("mallory").unwrap())
            .unwrap();

        assert!(matches!(
            service().validate(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let claims = Claims {
            sub: UuidService::new().to_string(),
            username: "alice".into(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(service().validate(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        assert!(service().authenticate("not.a.token").is_err());
    }
}
