use super::{like_pattern, offset, Page};
use crate::models::auth::User;
use crate::models::classifier::Classifier;
use chrono::Utc;
use sqlx::SqlitePool;

#[derive(Clone, Debug)]
pub struct UserDao {
    pool: SqlitePool,
}

impl UserDao {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, username: &str, email: &str, password_hash: &str) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (username, email, password_hash, created_at) \
             VALUES (?1, ?2, ?3, ?4) RETURNING *",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_all(&self) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
    }

    /// Case-insensitive: e-mails are stored lower-cased.
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?1")
            .bind(email.to_lowercase())
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn update(&self, user: &User) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET username = ?1, email = ?2, password_hash = ?3, image_file = ?4, \
             is_admin = ?5 WHERE id = ?6",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.image_file)
        .bind(user.is_admin)
        .bind(user.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_admin(&self, id: i64, is_admin: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET is_admin = ?1 WHERE id = ?2")
            .bind(is_admin)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Users whose name or e-mail contains `query`, by id.
    pub async fn search(&self, query: &str, page: u32, per_page: u32) -> Result<Page<User>, sqlx::Error> {
        let pattern = like_pattern(query);
        let items = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE username LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\' \
             ORDER BY id LIMIT ?2 OFFSET ?3",
        )
        .bind(&pattern)
        .bind(per_page as i64)
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users WHERE username LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\'",
        )
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        Ok(Page {
            items,
            page: page.max(1),
            per_page,
            total,
        })
    }

    /// Returns whether a row was deleted.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_classifiers(&self, user_id: i64) -> Result<Vec<Classifier>, sqlx::Error> {
        sqlx::query_as::<_, Classifier>(
            "SELECT * FROM classifiers WHERE user_id = ?1 ORDER BY upload_date DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }
}
