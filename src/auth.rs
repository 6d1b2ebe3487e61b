// 🔐 Authentication
// bcrypt password hashes and expiring session tokens backed by the store

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{self, Session, User};

/// bcrypt work factor for newly stored passwords
#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token is missing")]
    MissingToken,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("User already exists")]
    UserExists,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Hash(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

// ============================================================================
// PASSWORDS
// ============================================================================

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    Ok(bcrypt::hash(password, HASH_COST)?)
}

/// False for a wrong password and for anything that is not a bcrypt hash
pub fn verify_password(password: &str, encoded: &str) -> bool {
    bcrypt::verify(password, encoded).unwrap_or(false)
}

// ============================================================================
// USERS & TOKENS
// ============================================================================

/// Validated username with its password hash, ready to store
///
/// Building one runs bcrypt, so the server does it before taking the
/// store lock.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
}

impl NewUser {
    pub fn new(username: &str, password: &str) -> Result<Self, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput(
                "username and password are required".to_string(),
            ));
        }

        Ok(NewUser {
            username: username.to_string(),
            password_hash: hash_password(password)?,
        })
    }
}

pub fn save_user(conn: &Connection, user: &NewUser) -> Result<(), AuthError> {
    if db::create_user(conn, &user.username, &user.password_hash)? {
        info!(username = %user.username, "user registered");
        Ok(())
    } else {
        warn!(username = %user.username, "registration rejected, user exists");
        Err(AuthError::UserExists)
    }
}

pub fn register(conn: &Connection, username: &str, password: &str) -> Result<(), AuthError> {
    save_user(conn, &NewUser::new(username, password)?)
}

/// Accept `user` only if it exists and `password` matches its hash
pub fn verify_login(username: &str, user: Option<User>, password: &str) -> Result<User, AuthError> {
    match user.filter(|u| verify_password(password, &u.password_hash)) {
        Some(user) => Ok(user),
        None => {
            warn!(%username, "login failed");
            Err(AuthError::InvalidCredentials)
        }
    }
}

/// Store a new session for `username` valid for `ttl` and return its token
pub fn issue_session(
    conn: &Connection,
    username: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<String, AuthError> {
    db::delete_expired_sessions(conn, now)?;

    let session = Session {
        token: uuid::Uuid::new_v4().to_string(),
        username: username.to_string(),
        expires_at: now + ttl,
    };
    db::insert_session(conn, &session)?;

    debug!(username = %session.username, expires_at = %session.expires_at, "session issued");
    Ok(session.token)
}

/// Check credentials and issue a session token valid for `ttl`
pub fn login(
    conn: &Connection,
    username: &str,
    password: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<String, AuthError> {
    let user = db::find_user(conn, username.trim())?;
    let user = verify_login(username, user, password)?;
    issue_session(conn, &user.username, ttl, now)
}

/// Resolve a token to its username
pub fn authenticate(
    conn: &Connection,
    token: &str,
    now: DateTime<Utc>,
) -> Result<String, AuthError> {
    match db::find_session(conn, token)? {
        None => Err(AuthError::InvalidToken),
        Some(session) if session.expires_at <= now => Err(AuthError::TokenExpired),
        Some(session) => Ok(session.username),
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty());
    let Some(header) = header else {
        return Err(AuthError::MissingToken);
    };

    match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(AuthError::InvalidToken),
    }
}
