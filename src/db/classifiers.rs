use super::{like_pattern, offset, Page};
use crate::models::classifier::Classifier;
use chrono::Utc;
use sqlx::SqlitePool;

#[derive(Clone, Debug)]
pub struct ClassifierDao {
    pool: SqlitePool,
}

impl ClassifierDao {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, name: &str, file_path: &str, user_id: i64) -> Result<Classifier, sqlx::Error> {
        sqlx::query_as::<_, Classifier>(
            "INSERT INTO classifiers (name, file_path, upload_date, user_id) \
             VALUES (?1, ?2, ?3, ?4) RETURNING *",
        )
        .bind(name)
        .bind(file_path)
        .bind(Utc::now())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Classifier>, sqlx::Error> {
        sqlx::query_as::<_, Classifier>("SELECT * FROM classifiers WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn count_by_user(&self, user_id: i64) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM classifiers WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Newest first.
    pub async fn list_by_user(&self, user_id: i64, page: u32, per_page: u32) -> Result<Page<Classifier>, sqlx::Error> {
        let items = sqlx::query_as::<_, Classifier>(
            "SELECT * FROM classifiers WHERE user_id = ?1 \
             ORDER BY upload_date DESC, id DESC LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id)
        .bind(per_page as i64)
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            page: page.max(1),
            per_page,
            total: self.count_by_user(user_id).await?,
        })
    }

    /// Classifiers whose name contains `query`, newest first.
    pub async fn search(&self, query: &str, page: u32, per_page: u32) -> Result<Page<Classifier>, sqlx::Error> {
        let pattern = like_pattern(query);
        let items = sqlx::query_as::<_, Classifier>(
            "SELECT * FROM classifiers WHERE name LIKE ?1 ESCAPE '\\' \
             ORDER BY upload_date DESC, id DESC LIMIT ?2 OFFSET ?3",
        )
        .bind(&pattern)
        .bind(per_page as i64)
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM classifiers WHERE name LIKE ?1 ESCAPE '\\'")
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

    pub async fn update(&self, classifier: &Classifier) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE classifiers SET name = ?1, file_path = ?2, user_id = ?3 WHERE id = ?4")
            .bind(&classifier.name)
            .bind(&classifier.file_path)
            .bind(classifier.user_id)
            .bind(classifier.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes the row and, through the foreign key, its reports.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM classifiers WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
