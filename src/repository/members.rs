//! Members repository for database operations

use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::overdue_cutoff,
        member::{Member, MemberQuery, MemberRow, MemberShort, MemberShortRow, Role, UpdateMember},
    },
};

use super::{like_pattern, paginate};

/// Fields of a member about to be inserted
#[derive(Debug)]
pub struct NewMember<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub full_name: &'a str,
    pub phone: Option<String>,
    pub address: Option<&'a str>,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Clone)]
pub struct MembersRepository {
    pool: Pool<Sqlite>,
}

impl MembersRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Get member by ID
    pub async fn get_by_id(&self, id: i64) -> AppResult<Member> {
        sqlx::query_as::<_, MemberRow>("SELECT * FROM members WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Member::from)
            .ok_or_else(|| AppError::NotFound(format!("Member with id {} not found", id)))
    }

    /// Get member by username (login identity, case-insensitive)
    pub async fn get_by_username(&self, username: &str) -> AppResult<Option<Member>> {
        let member = sqlx::query_as::<_, MemberRow>("SELECT * FROM members WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(member.map(Member::from))
    }

    /// Check if username already exists
    pub async fn username_exists(&self, username: &str, exclude_id: Option<i64>) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM members WHERE username = ? AND id != COALESCE(?, -1))",
        )
        .bind(username)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Check if email already exists
    pub async fn email_exists(&self, email: &str, exclude_id: Option<i64>) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM members WHERE email = ? AND id != COALESCE(?, -1))",
        )
        .bind(email)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn admin_exists(&self) -> AppResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM members WHERE role = 'admin')")
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Search members with pagination, ordered by name
    pub async fn search(&self, query: &MemberQuery) -> AppResult<(Vec<MemberShort>, i64)> {
        let (_, per_page, offset) = paginate(query.page, query.per_page);

        let mut conditions = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(search);
            conditions.push(
                "(LOWER(m.username) LIKE ? OR LOWER(m.full_name) LIKE ? OR LOWER(m.email) LIKE ?)"
                    .to_string(),
            );
            params.extend(std::iter::repeat(pattern).take(3));
        }

        if query.active_only.unwrap_or(false) {
            conditions.push("m.is_active = 1".to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_query = format!("SELECT COUNT(*) FROM members m {}", where_clause);
        let mut count_builder = sqlx::query_scalar::<_, i64>(&count_query);
        for param in &params {
            count_builder = count_builder.bind(param);
        }
        let total = count_builder.fetch_one(&self.pool).await?;

        // the overdue count placeholder comes first; it binds the start of today
        let select_query = format!(
            r#"
            SELECT m.id, m.username, m.full_name, m.email, m.role, m.is_active,
                   (SELECT COUNT(*) FROM borrows b
                     WHERE b.member_id = m.id AND b.returned_at IS NULL) AS nb_borrows,
                   (SELECT COUNT(*) FROM borrows b
                     WHERE b.member_id = m.id AND b.returned_at IS NULL AND b.due_at < ?) AS nb_overdue
            FROM members m
            {}
            ORDER BY m.full_name COLLATE NOCASE, m.id
            LIMIT {} OFFSET {}
            "#,
            where_clause, per_page, offset
        );
        let mut select_builder =
            sqlx::query_as::<_, MemberShortRow>(&select_query).bind(overdue_cutoff(Utc::now()));
        for param in &params {
            select_builder = select_builder.bind(param);
        }
        let members = select_builder
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(MemberShort::from)
            .collect();

        Ok((members, total))
    }

    /// Create a new active member
    pub async fn create(&self, member: NewMember<'_>) -> AppResult<Member> {
        sqlx::query_as::<_, MemberRow>(
            r#"
            INSERT INTO members (username, email, full_name, phone, address,
                                 password_hash, role, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)
            RETURNING *
            "#,
        )
        .bind(member.username.trim())
        .bind(member.email.trim())
        .bind(member.full_name.trim())
        .bind(member.phone)
        .bind(member.address)
        .bind(member.password_hash)
        .bind(member.role.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map(Member::from)
        .map_err(|e| AppError::unique_violation(e, "Username or email already exists"))
    }

    /// Update a member; absent fields are left untouched
    pub async fn update(
        &self,
        id: i64,
        update: &UpdateMember,
        phone: Option<String>,
        password_hash: Option<String>,
    ) -> AppResult<Member> {
        sqlx::query_as::<_, MemberRow>(
            r#"
            UPDATE members SET
                email = COALESCE(?, email),
                full_name = COALESCE(?, full_name),
                phone = COALESCE(?, phone),
                address = COALESCE(?, address),
                password_hash = COALESCE(?, password_hash),
                role = COALESCE(?, role),
                is_active = COALESCE(?, is_active)
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(update.email.as_deref().map(str::trim))
        .bind(update.full_name.as_deref().map(str::trim))
        .bind(phone)
        .bind(&update.address)
        .bind(password_hash)
        .bind(update.role.map(|r| r.as_str()))
        .bind(update.is_active)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::unique_violation(e, "Email already exists"))?
        .map(Member::from)
        .ok_or_else(|| AppError::NotFound(format!("Member with id {} not found", id)))
    }

    /// Delete a member and their closed borrows; refused while a borrow is open
    pub async fn delete(&self, id: i64) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let open: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrows WHERE member_id = ? AND returned_at IS NULL",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        if open > 0 {
            return Err(AppError::HasOpenBorrows(format!("Member {}", id)));
        }

        let result = sqlx::query("DELETE FROM members WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Member with id {} not found", id)));
        }

        tx.commit().await?;
        Ok(())
    }
}
