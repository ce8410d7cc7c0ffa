//! Authentication and authorization.

use crate::db::{Database, RecoveryToken, Role, Session, User, now_timestamp};
use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::{OsRng, RngCore},
    },
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a secure random token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Ownership gate: admins pass, otherwise the actor must own the resource.
pub fn check_permission(actor: &User, owner_id: &str) -> Result<()> {
    if actor.role == Role::Admin || actor.id == owner_id {
        Ok(())
    } else {
        Err(AppError::Unauthorized(
            "You are not allowed to modify this resource".to_string(),
        ))
    }
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    session_duration_days: u32,
    recovery_minutes: u32,
    registration_enabled: bool,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(
        db: Database,
        session_duration_days: u32,
        recovery_minutes: u32,
        registration_enabled: bool,
    ) -> Self {
        Self {
            db,
            session_duration_days,
            recovery_minutes,
            registration_enabled,
        }
    }

    /// Register a new account. The very first account becomes admin.
    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<User> {
        if !self.registration_enabled {
            return Err(AppError::BadRequest("Registration is disabled".to_string()));
        }

        let mut user = self.build_user(username, email, password, Role::User)?;
        self.db.register_user(&mut user)?;
        Ok(user)
    }

    /// Create a user with an explicit role (CLI function, skips the
    /// first-admin rule).
    pub fn create_user(&self, username: &str, email: &str, password: &str, role: Role) -> Result<User> {
        let user = self.build_user(username, email, password, role)?;
        self.db.create_user(&user)?;
        Ok(user)
    }

    fn build_user(&self, username: &str, email: &str, password: &str, role: Role) -> Result<User> {
        // Validate username
        if username.len() < 3 || username.len() > 50 {
            return Err(AppError::BadRequest(
                "Username must be 3-50 characters".to_string(),
            ));
        }

        if !username
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AppError::BadRequest(
                "Username can only contain letters, numbers, _ and -".to_string(),
            ));
        }

        // Validate email
        if !is_valid_email(email) {
            return Err(AppError::BadRequest("Invalid email address".to_string()));
        }

        // Validate password
        if password.len() < 6 {
            return Err(AppError::BadRequest(
                "Password must be at least 6 characters".to_string(),
            ));
        }

        let password_hash = hash_password(password)?;

        Ok(User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            role,
            description: None,
            avatar_path: None,
            twitter: None,
            facebook: None,
            created_at: now_timestamp(),
        })
    }

    /// Login by email and create a session.
    pub fn login(&self, email: &str, password: &str) -> Result<(User, String)> {
        let user = self
            .db
            .get_user_by_email(email)?
            .ok_or_else(|| AppError::Unauthenticated("Invalid email or password".to_string()))?;

        if !verify_password(password, &user.password_hash)? {
            return Err(AppError::Unauthenticated(
                "Invalid email or password".to_string(),
            ));
        }

        let token = self.create_session(&user)?;
        Ok((user, token))
    }

    /// Create a session for an already-authenticated user (register
    /// auto-login, password reset).
    pub fn create_session(&self, user: &User) -> Result<String> {
        let token = generate_token();
        let expires_at = now_timestamp() + (self.session_duration_days as i64 * 24 * 60 * 60);

        let session = Session {
            token: token.clone(),
            user_id: user.id.clone(),
            expires_at,
        };

        self.db.create_session(&session)?;
        Ok(token)
    }

    /// Validate a session token and return the user.
    pub fn validate_token(&self, token: &str) -> Result<Option<User>> {
        let session = match self.db.get_session(token)? {
            Some(s) => s,
            None => return Ok(None),
        };

        // Check expiration
        if session.expires_at < now_timestamp() {
            self.db.delete_session(token)?;
            return Ok(None);
        }

        self.db.get_user_by_id(&session.user_id)
    }

    /// Logout (delete session).
    pub fn logout(&self, token: &str) -> Result<()> {
        self.db.delete_session(token)
    }

    /// Change a user's password.
    pub fn change_password(&self, user_id: &str, new_password: &str) -> Result<bool> {
        if new_password.len() < 6 {
            return Err(AppError::BadRequest(
                "Password must be at least 6 characters".to_string(),
            ));
        }

        let password_hash = hash_password(new_password)?;
        self.db.update_user_password(user_id, &password_hash)
    }

    /// Start password recovery. Returns the record to put in the mail link.
    ///
    /// A second request before the first link is used replaces it; only the
    /// latest link works.
    pub fn request_recovery(&self, email: &str) -> Result<(User, RecoveryToken)> {
        let user = self
            .db
            .get_user_by_email(email)?
            .ok_or_else(|| AppError::NotFound("No account with this email".to_string()))?;

        let recovery = RecoveryToken {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            token: generate_token(),
            expires_at: now_timestamp() + (self.recovery_minutes as i64 * 60),
            created_at: now_timestamp(),
        };

        self.db.replace_recovery(&recovery)?;
        Ok((user, recovery))
    }

    /// Complete password recovery: verify the link, set the new password,
    /// consume the record.
    pub fn reset_password(&self, recovery_id: &str, token: &str, new_password: &str) -> Result<User> {
        let recovery = self
            .db
            .get_recovery(recovery_id)?
            .ok_or_else(|| AppError::BadRequest("Invalid or expired recovery link".to_string()))?;

        if recovery.token != token || recovery.expires_at < now_timestamp() {
            self.db.delete_recovery(recovery_id)?;
            return Err(AppError::BadRequest(
                "Invalid or expired recovery link".to_string(),
            ));
        }

        self.change_password(&recovery.user_id, new_password)?;
        self.db.delete_recovery(recovery_id)?;

        self.db
            .get_user_by_id(&recovery.user_id)?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}

/// Minimal shape check: local part, one @, dotted domain.
pub(crate) fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let password = "test_password_123";
        let hash = hash_password(password).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_generate_token() {
        let token1 = generate_token();
        let token2 = generate_token();

        assert_eq!(token1.len(), 43); // Base64 of 32 bytes
        assert_ne!(token1, token2);
    }

    #[test]
    fn test_email_shape() {
        assert!(is_valid_email("anna@example.com"));
        assert!(!is_valid_email("anna@example"));
        assert!(!is_valid_email("anna example.com"));
        assert!(!is_valid_email("@example.com"));
    }

    #[test]
    fn test_check_permission() {
        let owner = User {
            id: "u1".into(),
            username: "anna".into(),
            email: "anna@example.com".into(),
            password_hash: String::new(),
            role: Role::User,
            description: None,
            avatar_path: None,
            twitter: None,
            facebook: None,
            created_at: 0,
        };
        let mut other = owner.clone();
        other.id = "u2".into();

        assert!(check_permission(&owner, "u1").is_ok());
        assert!(check_permission(&other, "u1").is_err());

        other.role = Role::Admin;
        assert!(check_permission(&other, "u1").is_ok());

        assert!(check_permission(&owner, "u2").is_err());
    }
}
