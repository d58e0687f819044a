//! Member management service

use chrono::Utc;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        member::{CreateMember, Member, MemberClaims, MemberDetails, MemberQuery, MemberShort, Role, UpdateMember},
        validation::check_phone,
    },
    repository::{members::NewMember, Repository},
    services::auth::hash_password,
};

#[derive(Clone)]
pub struct MembersService {
    repository: Repository,
}

impl MembersService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Search members
    pub async fn search_members(&self, query: &MemberQuery) -> AppResult<(Vec<MemberShort>, i64)> {
        self.repository.members.search(query).await
    }

    /// Get member with their open-borrow counts
    pub async fn get_details(&self, id: i64) -> AppResult<MemberDetails> {
        let member = self.repository.members.get_by_id(id).await?;
        let (nb_borrows, nb_overdue) = self
            .repository
            .borrows
            .counts_for_member(id, Utc::now())
            .await?;
        Ok(MemberDetails {
            member,
            nb_borrows,
            nb_overdue,
        })
    }

    /// Create a member account. Only administrators may create staff accounts.
    pub async fn create_member(&self, actor: &MemberClaims, member: CreateMember) -> AppResult<Member> {
        member.validate()?;

        let role = member.role.unwrap_or(Role::Member);
        if role.is_staff() {
            actor.require_admin()?;
        }

        let phone = check_phone(member.phone.as_deref())?;

        if self.repository.members.username_exists(&member.username, None).await? {
            return Err(AppError::Conflict("Username already exists".to_string()));
        }
        if self.repository.members.email_exists(&member.email, None).await? {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }

        let created = self
            .repository
            .members
            .create(NewMember {
                username: &member.username,
                email: &member.email,
                full_name: &member.full_name,
                phone,
                address: member.address.as_deref(),
                password_hash: hash_password(&member.password)?,
                role,
            })
            .await?;

        tracing::info!(
            "Member {} (id={}, role={}) created by {}",
            created.username, created.id, created.role, actor.sub
        );
        Ok(created)
    }

    /// Update a member. Role changes and edits of other staff accounts are
    /// reserved to administrators; nobody may demote or disable themselves.
    pub async fn update_member(&self, actor: &MemberClaims, id: i64, update: UpdateMember) -> AppResult<Member> {
        update.validate()?;

        let current = self.repository.members.get_by_id(id).await?;

        let other_staff = current.role.is_staff() && actor.member_id != id;
        if other_staff || update.role.is_some() {
            actor.require_admin()?;
        }

        if actor.member_id == id {
            if update.role.is_some_and(|role| role != current.role) {
                return Err(AppError::BusinessRule("You cannot change your own role".to_string()));
            }
            if update.is_active == Some(false) {
                return Err(AppError::BusinessRule("You cannot disable your own account".to_string()));
            }
        }

        let phone = check_phone(update.phone.as_deref())?;

        if let Some(ref email) = update.email {
            if self.repository.members.email_exists(email, Some(id)).await? {
                return Err(AppError::Conflict("Email already exists".to_string()));
            }
        }

        let password_hash = match update.password {
            Some(ref password) => Some(hash_password(password)?),
            None => None,
        };

        let updated = self
            .repository
            .members
            .update(id, &update, phone, password_hash)
            .await?;

        if current.is_active != updated.is_active {
            tracing::info!(
                "Member {} {} by {}",
                updated.username,
                if updated.is_active { "reactivated" } else { "deactivated" },
                actor.sub
            );
        }
        Ok(updated)
    }

    /// Delete a member; refused while they hold a book
    pub async fn delete_member(&self, actor: &MemberClaims, id: i64) -> AppResult<()> {
        if actor.member_id == id {
            return Err(AppError::BusinessRule("You cannot delete your own account".to_string()));
        }

        self.repository.members.delete(id).await?;
        tracing::info!("Member id={} deleted by {}", id, actor.sub);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::connect_in_memory;

    fn claims(member_id: i64, role: Role) -> MemberClaims {
        MemberClaims {
            sub: "staff".into(),
            member_id,
            role,
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
        }
    }

    fn create_request(username: &str, role: Option<Role>) -> CreateMember {
        CreateMember {
            username: username.into(),
            email: format!("{}@example.com", username),
            full_name: "Some One".into(),
            phone: Some("+44 20 7946 0958".into()),
            address: None,
            password: "secret1".into(),
            role,
        }
    }

    async fn service() -> MembersService {
        MembersService::new(Repository::new(connect_in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn librarian_cannot_create_staff() {
        let members = service().await;
        let librarian = claims(100, Role::Librarian);
        assert!(matches!(
            members.create_member(&librarian, create_request("boss", Some(Role::Admin))).await,
            Err(AppError::Authorization(_))
        ));
        let reader = members.create_member(&librarian, create_request("reader", None)).await.unwrap();
        assert_eq!(reader.role, Role::Member);
    }

    #[tokio::test]
    async fn invalid_phone_is_rejected() {
        let members = service().await;
        let mut request = create_request("reader", None);
        request.phone = Some("123".into());
        assert!(matches!(
            members.create_member(&claims(100, Role::Admin), request).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn admin_cannot_disable_self() {
        let members = service().await;
        let admin = members
            .create_member(&claims(100, Role::Admin), create_request("chief", Some(Role::Admin)))
            .await
            .unwrap();
        let update = UpdateMember {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(matches!(
            members.update_member(&claims(admin.id, Role::Admin), admin.id, update).await,
            Err(AppError::BusinessRule(_))
        ));
    }

    #[tokio::test]
    async fn librarian_can_deactivate_member() {
        let members = service().await;
        let librarian = claims(100, Role::Librarian);
        let reader = members.create_member(&librarian, create_request("reader", None)).await.unwrap();
        let update = UpdateMember {
            is_active: Some(false),
            ..Default::default()
        };
        let updated = members.update_member(&librarian, reader.id, update).await.unwrap();
        assert!(!updated.is_active);
    }
}
