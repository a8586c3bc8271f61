//! Shared-password administrator access.
//!
//! Logging in with the configured password issues an opaque bearer token.
//! Every privileged request presents it in the `Authorization` header and is
//! checked on its own; logging out revokes the token. Tokens expire after
//! [`SESSION_TTL`] and expired ones are swept on every login.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

const MAX_AUTH_HEADER_BYTES: usize = 512;
const TOKEN_BYTES: usize = 32;
pub const SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Authorization failure for administrator operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("wrong administrator password")]
    WrongPassword,
    #[error("administrator access required")]
    AdminOnly,
    #[error("session store unavailable")]
    Unavailable,
}

impl AuthError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::WrongPassword => "wrong_password",
            Self::AdminOnly => "admin_only",
            Self::Unavailable => "storage_error",
        }
    }
}

/// Proof that a request carried a live administrator token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    token: String,
}

impl AdminSession {
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Issues, checks and revokes administrator tokens.
pub struct AdminGuard {
    password: String,
    ttl: Duration,
    /// Live tokens keyed to their issue time.
    sessions: Mutex<HashMap<String, Instant>>,
}

impl AdminGuard {
    pub fn new(password: impl Into<String>) -> Self {
        Self::with_ttl(password, SESSION_TTL)
    }

    pub fn with_ttl(password: impl Into<String>, ttl: Duration) -> Self {
        Self {
            password: password.into(),
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Compares `password` (trimmed) with the shared secret and opens a session on match.
    pub fn login(&self, password: &str) -> Result<AdminSession, AuthError> {
        let matches: bool = password
            .trim()
            .as_bytes()
            .ct_eq(self.password.as_bytes())
            .into();
        if !matches {
            warn!("administrator login rejected");
            return Err(AuthError::WrongPassword);
        }

        let token = generate_token();
        let mut sessions = self.sessions()?;
        let before = sessions.len();
        sessions.retain(|_, issued| issued.elapsed() < self.ttl);
        let expired = before - sessions.len();
        sessions.insert(token.clone(), Instant::now());
        info!(expired, "administrator logged in");
        Ok(AdminSession { token })
    }

    /// Validates the raw `Authorization` header value.
    pub fn authorize(&self, authorization: Option<&str>) -> Result<AdminSession, AuthError> {
        let token = parse_bearer_token(authorization)?;
        let mut sessions = self.sessions()?;
        let issued = sessions.get(token).copied();
        match issued {
            Some(issued) if issued.elapsed() < self.ttl => Ok(AdminSession {
                token: token.to_string(),
            }),
            Some(_) => {
                sessions.remove(token);
                info!("administrator session expired");
                Err(AuthError::AdminOnly)
            }
            None => Err(AuthError::AdminOnly),
        }
    }

    pub fn logout(&self, session: &AdminSession) -> Result<(), AuthError> {
        self.sessions()?.remove(session.token());
        info!("administrator logged out");
        Ok(())
    }

    fn sessions(&self) -> Result<MutexGuard<'_, HashMap<String, Instant>>, AuthError> {
        self.sessions.lock().map_err(|_| AuthError::Unavailable)
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn parse_bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::AdminOnly)?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(AuthError::AdminOnly);
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::AdminOnly);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bearer(session: &AdminSession) -> String {
        format!("Bearer {}", session.token())
    }

    #[test]
    fn login_issues_distinct_tokens() {
        let guard = AdminGuard::new("letmein");
        let first = guard.login("letmein").expect("login");
        let second = guard.login(" letmein\n").expect("login with padding");

        assert_ne!(first.token(), second.token());
        assert!(guard.authorize(Some(&bearer(&first))).is_ok());
        assert!(guard.authorize(Some(&bearer(&second))).is_ok());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let guard = AdminGuard::new("letmein");
        assert!(matches!(
            guard.login("letmein2"),
            Err(AuthError::WrongPassword)
        ));
        assert!(matches!(guard.login(""), Err(AuthError::WrongPassword)));
    }

    #[test]
    fn authorize_requires_a_known_bearer_token() {
        let guard = AdminGuard::new("letmein");
        let session = guard.login("letmein").expect("login");

        assert!(matches!(guard.authorize(None), Err(AuthError::AdminOnly)));
        assert!(matches!(
            guard.authorize(Some("Bearer not-a-token")),
            Err(AuthError::AdminOnly)
        ));
        assert!(matches!(
            guard.authorize(Some(&format!("Basic {}", session.token()))),
            Err(AuthError::AdminOnly)
        ));
        assert!(guard
            .authorize(Some(&format!("bearer   {}", session.token())))
            .is_ok());
    }

    #[test]
    fn logout_revokes_only_that_token() {
        let guard = AdminGuard::new("letmein");
        let first = guard.login("letmein").expect("login");
        let second = guard.login("letmein").expect("login");

        guard.logout(&first).expect("logout");

        assert!(matches!(
            guard.authorize(Some(&bearer(&first))),
            Err(AuthError::AdminOnly)
        ));
        assert!(guard.authorize(Some(&bearer(&second))).is_ok());
    }

    #[test]
    fn expired_token_is_rejected_and_forgotten() {
        let guard = AdminGuard::with_ttl("letmein", Duration::ZERO);
        let session = guard.login("letmein").expect("login");

        assert!(matches!(
            guard.authorize(Some(&bearer(&session))),
            Err(AuthError::AdminOnly)
        ));
        assert!(guard.sessions.lock().expect("sessions").is_empty());
    }

    #[test]
    fn login_sweeps_expired_sessions() {
        let guard = AdminGuard::with_ttl("letmein", Duration::ZERO);
        for _ in 0..5 {
            guard.login("letmein").expect("login");
        }

        let sessions = guard.sessions.lock().expect("sessions");
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn default_ttl_keeps_fresh_sessions() {
        let guard = AdminGuard::new("letmein");
        let first = guard.login("letmein").expect("login");
        guard.login("letmein").expect("login");

        assert_eq!(guard.sessions.lock().expect("sessions").len(), 2);
        assert!(guard.authorize(Some(&bearer(&first))).is_ok());
    }
}
