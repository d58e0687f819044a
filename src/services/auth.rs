//! Authentication service: registration, login and token issuing

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    config::{AuthConfig, BootstrapAdmin},
    error::{AppError, AppResult},
    models::member::{Member, MemberClaims, RegisterMember, Role},
    repository::{members::NewMember, Repository},
};

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored Argon2 hash
pub fn verify_password(hash: &str, password: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[derive(Clone)]
pub struct AuthService {
    repository: Repository,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(repository: Repository, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    /// Authenticate by username and password, returning a JWT token
    pub async fn authenticate(&self, username: &str, password: &str) -> AppResult<(String, Member)> {
        let member = self
            .repository
            .members
            .get_by_username(username.trim())
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid username or password".to_string()))?;

        if !verify_password(&member.password_hash, password)? {
            tracing::warn!("Failed login for {}", member.username);
            return Err(AppError::Authentication("Invalid username or password".to_string()));
        }

        if !member.is_active {
            return Err(AppError::Authentication("Account is disabled".to_string()));
        }

        let token = self.create_token(&member)?;
        tracing::info!("Member {} logged in", member.username);
        Ok((token, member))
    }

    /// Create JWT token for a member
    pub fn create_token(&self, member: &Member) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let exp = now + (self.config.jwt_expiration_hours as i64 * 3600);

        let claims = MemberClaims {
            sub: member.username.clone(),
            member_id: member.id,
            role: member.role,
            exp,
            iat: now,
        };

        claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    /// Public self-registration; always creates a regular member
    pub async fn register(&self, request: RegisterMember) -> AppResult<Member> {
        request.validate()?;

        if request.password != request.confirm_password {
            return Err(AppError::Validation("Passwords do not match".to_string()));
        }

        if self.repository.members.username_exists(&request.username, None).await? {
            return Err(AppError::Conflict("Username already exists".to_string()));
        }
        if self.repository.members.email_exists(&request.email, None).await? {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }

        let member = self
            .repository
            .members
            .create(NewMember {
                username: &request.username,
                email: &request.email,
                full_name: &request.full_name,
                phone: None,
                address: None,
                password_hash: hash_password(&request.password)?,
                role: Role::Member,
            })
            .await?;

        tracing::info!("Registered member {} (id={})", member.username, member.id);
        Ok(member)
    }

    /// Create the configured administrator when the database has none.
    /// Returns whether an account was created.
    pub async fn ensure_bootstrap_admin(&self) -> AppResult<bool> {
        let Some(BootstrapAdmin { username, email, password }) = &self.config.bootstrap_admin else {
            return Ok(false);
        };

        if self.repository.members.admin_exists().await? {
            return Ok(false);
        }

        self.repository
            .members
            .create(NewMember {
                username,
                email,
                full_name: "Administrator",
                phone: None,
                address: None,
                password_hash: hash_password(password)?,
                role: Role::Admin,
            })
            .await?;

        tracing::warn!("Created bootstrap administrator '{}'; change its password", username);
        Ok(true)
    }

    /// Get the authenticated member
    pub async fn me(&self, claims: &MemberClaims) -> AppResult<Member> {
        self.repository.members.get_by_id(claims.member_id).await
    }
}
