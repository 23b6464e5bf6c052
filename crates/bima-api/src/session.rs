//! Session-based authentication
//!
//! Opaque 32-byte tokens delivered as an HttpOnly cookie; only the SHA-256
//! hash is stored. Sessions rotate on every login, carry a CSRF token for
//! mutating requests, and expire server-side. Failed logins are rate
//! limited per (source, identifier) and lock the account after repeated
//! failures.

use std::sync::Arc;

use chrono::{Duration, Utc};
use governor::{
    clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use bima_core::{
    BimaError, Result, Session, SessionId, SessionRepository, User, UserRepository, UserStatus,
};
use bima_db::repositories::{PgSessionRepository, PgUserRepository};

use crate::password;

/// Failed attempts before the account locks.
const MAX_FAILED_LOGINS: i32 = 5;
/// Lock duration after the threshold is hit.
const LOCKOUT_MINUTES: i64 = 15;
/// Login attempts allowed per (source, identifier) per minute.
const LOGIN_ATTEMPTS_PER_MINUTE: u32 = 10;

type LoginLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

pub struct AuthService {
    users: Arc<PgUserRepository>,
    sessions: Arc<PgSessionRepository>,
    limiter: LoginLimiter,
    session_ttl: Duration,
}

/// Outcome of a successful login; `token` is the raw cookie value and never
/// touches storage.
pub struct LoginOutcome {
    pub user: User,
    pub session: Session,
    pub token: String,
}

impl AuthService {
    pub fn new(
        users: Arc<PgUserRepository>,
        sessions: Arc<PgSessionRepository>,
        session_ttl_hours: i64,
    ) -> Self {
        let quota = Quota::per_minute(
            std::num::NonZeroU32::new(LOGIN_ATTEMPTS_PER_MINUTE).expect("nonzero"),
        );
        Self {
            users,
            sessions,
            limiter: RateLimiter::keyed(quota),
            session_ttl: Duration::hours(session_ttl_hours),
        }
    }

    #[instrument(skip(self, password_input))]
    pub async fn login(
        &self,
        email: &str,
        password_input: &str,
        source_ip: &str,
    ) -> Result<LoginOutcome> {
        let identifier = email.trim().to_lowercase();
        let rate_key = format!("{source_ip}:{identifier}");
        if self.limiter.check_key(&rate_key).is_err() {
            warn!(source = source_ip, "Login rate limit hit");
            return Err(BimaError::auth("too many login attempts; try again shortly"));
        }

        let now = Utc::now();
        let Some(user) = self.users.find_by_email(&identifier).await? else {
            // Same work as a real check so unknown emails are not
            // distinguishable by timing
            password::verify_against_dummy(password_input);
            return Err(BimaError::auth("invalid email or password"));
        };

        if user.is_locked(now) {
            let until = user.locked_until.expect("locked user has lock expiry");
            return Err(BimaError::Locked {
                until: until.to_rfc3339(),
            });
        }
        if user.status != UserStatus::Active {
            password::verify_against_dummy(password_input);
            return Err(BimaError::auth("account is disabled"));
        }

        if !password::verify_password(password_input, &user.password_hash) {
            let failed = user.failed_login_count + 1;
            let locked_until = if failed >= MAX_FAILED_LOGINS {
                warn!(email = %identifier, "Account locked after repeated failures");
                Some(now + Duration::minutes(LOCKOUT_MINUTES))
            } else {
                None
            };
            self.users
                .record_login_attempt(user.id, failed, locked_until, None)
                .await?;
            return Err(BimaError::auth("invalid email or password"));
        }

        // Success: clear the failure counter and rotate every session
        self.users
            .record_login_attempt(user.id, 0, None, Some(now))
            .await?;
        self.sessions.delete_for_user(user.id).await?;

        let token = random_token();
        let session = Session {
            id: SessionId::new(),
            user_id: user.id,
            token_hash: hash_token(&token),
            csrf_token: random_token(),
            created_at: now,
            expires_at: now + self.session_ttl,
        };
        let session = self.sessions.create(&session).await?;

        info!(email = %identifier, "Login succeeded");
        Ok(LoginOutcome {
            user,
            session,
            token,
        })
    }

    /// Resolve a presented cookie token to its user and session.
    #[instrument(skip(self, token))]
    pub async fn resolve(&self, token: &str) -> Result<(User, Session)> {
        let Some(session) = self.sessions.find_by_token_hash(&hash_token(token)).await? else {
            return Err(BimaError::auth("invalid session"));
        };
        let now = Utc::now();
        if session.is_expired(now) {
            self.sessions.delete(session.id).await?;
            return Err(BimaError::auth("session expired"));
        }
        let user = self.users.get_by_id(session.user_id).await?;
        if user.status != UserStatus::Active {
            self.sessions.delete(session.id).await?;
            return Err(BimaError::auth("account is disabled"));
        }
        Ok((user, session))
    }

    #[instrument(skip(self, token))]
    pub async fn logout(&self, token: &str) -> Result<()> {
        if let Some(session) = self.sessions.find_by_token_hash(&hash_token(token)).await? {
            self.sessions.delete(session.id).await?;
        }
        Ok(())
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_opaque() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_token_hash_is_stable_and_one_way() {
        let token = random_token();
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }
}
