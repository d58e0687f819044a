//! Member (patron and login account) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::error::AppError;

/// Account role. Staff (admin, librarian) manage the catalog and lending desk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Librarian,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Librarian => "librarian",
            Role::Member => "member",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Librarian)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "librarian" => Ok(Role::Librarian),
            "member" => Ok(Role::Member),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Internal row structure for database queries (role stored as text)
#[derive(Debug, Clone, FromRow)]
pub struct MemberRow {
    id: i64,
    username: String,
    email: String,
    full_name: String,
    phone: Option<String>,
    address: Option<String>,
    password_hash: String,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Self {
        Member {
            id: row.id,
            username: row.username,
            email: row.email,
            full_name: row.full_name,
            phone: row.phone,
            address: row.address,
            password_hash: row.password_hash,
            role: row.role.parse().unwrap_or(Role::Member),
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

/// Full member model
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Member {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Hashed password (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Member with open-borrow counts
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MemberDetails {
    #[serde(flatten)]
    pub member: Member,
    pub nb_borrows: i64,
    pub nb_overdue: i64,
}

/// Row for member listings, with open-borrow counts
#[derive(Debug, Clone, FromRow)]
pub struct MemberShortRow {
    id: i64,
    username: String,
    full_name: String,
    email: String,
    role: String,
    is_active: bool,
    nb_borrows: i64,
    nb_overdue: i64,
}

impl From<MemberShortRow> for MemberShort {
    fn from(row: MemberShortRow) -> Self {
        MemberShort {
            id: row.id,
            username: row.username,
            full_name: row.full_name,
            email: row.email,
            role: row.role.parse().unwrap_or(Role::Member),
            is_active: row.is_active,
            nb_borrows: row.nb_borrows,
            nb_overdue: row.nb_overdue,
        }
    }
}

/// Short member representation for lists
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MemberShort {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    /// Open borrows
    pub nb_borrows: i64,
    /// Open borrows past their due date
    pub nb_overdue: i64,
}

/// Member query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct MemberQuery {
    /// Substring of username, full name or email
    pub search: Option<String>,
    pub active_only: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Create member request (staff)
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateMember {
    #[validate(length(min = 3, max = 80, message = "Username must be 3 to 80 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    /// Defaults to `member`
    pub role: Option<Role>,
}

/// Update member request; absent fields are left untouched
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateMember {
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(length(min = 1, message = "Full name cannot be empty"))]
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

/// Public self-registration request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterMember {
    #[validate(length(min = 3, max = 80, message = "Username must be 3 to 80 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    pub confirm_password: String,
}

/// JWT Claims for authenticated members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberClaims {
    pub sub: String,
    pub member_id: i64,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

impl MemberClaims {
    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    /// Require admin privileges
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Authorization("Administrator privileges required".to_string()))
        }
    }

    /// Require admin or librarian privileges
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(AppError::Authorization("Library staff privileges required".to_string()))
        }
    }
}
