//! User Accounts & Authentication
//!
//! Registration and login with Argon2id password hashing, JWT access
//! tokens (HS256) for the gateway. Users are persisted in SQLite.
//!
//! The orchestration core never sees credentials; it only receives the
//! opaque user id carried in the token claims.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// JWT access token expiry
const ACCESS_TOKEN_EXPIRY_HOURS: i64 = 12;

/// Minimum password length at registration
const MIN_PASSWORD_CHARS: usize = 12;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token")]
    InvalidToken,

    #[error("username already exists")]
    UsernameTaken,

    #[error("password must be at least {MIN_PASSWORD_CHARS} characters")]
    WeakPassword,

    #[error("user not found")]
    UserNotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for AuthError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

/// User record
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: i64,
    pub last_login: Option<i64>,
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub username: String,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
    /// JWT ID
    pub jti: String,
}

/// SQLite-backed user store with token issuance
pub struct AuthService {
    conn: Mutex<Connection>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthService {
    /// Open or create the user database
    pub fn open(path: &Path, jwt_secret: &str) -> Result<Self, AuthError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuthError::Internal(e.to_string()))?;
        }

        let conn = Connection::open(path)?;
        let service = Self {
            conn: Mutex::new(conn),
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
        };
        service.init_schema()?;

        info!("User store opened: {}", path.display());
        Ok(service)
    }

    fn init_schema(&self) -> Result<(), AuthError> {
        let conn = self.conn.lock().map_err(|e| AuthError::Internal(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );
            "#,
        )?;
        Ok(())
    }

    /// Hash a password using Argon2id
    pub fn hash_password(password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("password hashing failed: {}", e)))
    }

    /// Verify a password against a stored hash
    pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AuthError::Internal(format!("invalid password hash: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// Create a new account
    pub fn register(&self, username: &str, password: &str) -> Result<User, AuthError> {
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AuthError::WeakPassword);
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: Self::hash_password(password)?,
            created_at: Utc::now().timestamp(),
            last_login: None,
        };

        let conn = self.conn.lock().map_err(|e| AuthError::Internal(e.to_string()))?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (id, username, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.username, user.password_hash, user.created_at],
        )?;

        if inserted == 0 {
            return Err(AuthError::UsernameTaken);
        }

        info!("Registered user: {}", username);
        Ok(user)
    }

    /// Authenticate and issue an access token
    pub fn login(&self, username: &str, password: &str) -> Result<(User, String), AuthError> {
        let mut user = self
            .find_by_username(username)?
            .ok_or(AuthError::InvalidCredentials)?;

        if !Self::verify_password(password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now().timestamp();
        {
            let conn = self.conn.lock().map_err(|e| AuthError::Internal(e.to_string()))?;
            conn.execute(
                "UPDATE users SET last_login = ?1 WHERE id = ?2",
                params![now, user.id],
            )?;
        }
        user.last_login = Some(now);

        let token = self.issue_token(&user)?;
        Ok((user, token))
    }

    /// Validate an access token
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default()).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            },
        )?;
        Ok(data.claims)
    }

    /// Get a user by id
    pub fn get_user(&self, user_id: &str) -> Result<User, AuthError> {
        let conn = self.conn.lock().map_err(|e| AuthError::Internal(e.to_string()))?;
        conn.query_row(
            "SELECT id, username, password_hash, created_at, last_login
             FROM users WHERE id = ?1",
            params![user_id],
            row_to_user,
        )
        .optional()?
        .ok_or(AuthError::UserNotFound)
    }

    fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        let conn = self.conn.lock().map_err(|e| AuthError::Internal(e.to_string()))?;
        Ok(conn
            .query_row(
                "SELECT id, username, password_hash, created_at, last_login
                 FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .optional()?)
    }

    fn issue_token(&self, user: &User) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(ACCESS_TOKEN_EXPIRY_HOURS)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("failed to encode token: {}", e)))
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
        last_login: row.get(4)?,
    })
}
