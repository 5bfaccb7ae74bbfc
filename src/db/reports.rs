use super::{like_pattern, offset, Page};
use crate::models::report::Report;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::SqlitePool;

#[derive(Clone, Debug)]
pub struct ReportDao {
    pool: SqlitePool,
}

impl ReportDao {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(
        &self,
        classifier_id: i64,
        pretrained_classifier: &str,
        data: &Value,
        date: DateTime<Utc>,
    ) -> Result<Report, sqlx::Error> {
        sqlx::query_as::<_, Report>(
            "INSERT INTO reports (date, classifier_id, pretrained_classifier, data) \
             VALUES (?1, ?2, ?3, ?4) RETURNING *",
        )
        .bind(date)
        .bind(classifier_id)
        .bind(pretrained_classifier)
        .bind(Json(data))
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_all(&self) -> Result<Vec<Report>, sqlx::Error> {
        sqlx::query_as::<_, Report>("SELECT * FROM reports ORDER BY id")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Report>, sqlx::Error> {
        sqlx::query_as::<_, Report>("SELECT * FROM reports WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_by_classifier(&self, classifier_id: i64) -> Result<Vec<Report>, sqlx::Error> {
        sqlx::query_as::<_, Report>("SELECT * FROM reports WHERE classifier_id = ?1 ORDER BY date DESC, id DESC")
            .bind(classifier_id)
            .fetch_all(&self.pool)
            .await
    }

    /// Reports filed under any of the user's classifiers, newest first.
    pub async fn list_by_user(&self, user_id: i64, page: u32, per_page: u32) -> Result<Page<Report>, sqlx::Error> {
        let items = sqlx::query_as::<_, Report>(
            "SELECT r.* FROM reports r JOIN classifiers c ON c.id = r.classifier_id \
             WHERE c.user_id = ?1 ORDER BY r.date DESC, r.id DESC LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id)
        .bind(per_page as i64)
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM reports r JOIN classifiers c ON c.id = r.classifier_id WHERE c.user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Page {
            items,
            page: page.max(1),
            per_page,
            total,
        })
    }

    /// Reports whose pretrained classifier contains `query`, newest first.
    pub async fn search(&self, query: &str, page: u32, per_page: u32) -> Result<Page<Report>, sqlx::Error> {
        let pattern = like_pattern(query);
        let items = sqlx::query_as::<_, Report>(
            "SELECT * FROM reports WHERE pretrained_classifier LIKE ?1 ESCAPE '\\' \
             ORDER BY date DESC, id DESC LIMIT ?2 OFFSET ?3",
        )
        .bind(&pattern)
        .bind(per_page as i64)
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM reports WHERE pretrained_classifier LIKE ?1 ESCAPE '\\'")
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

    pub async fn update(&self, report: &Report) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE reports SET date = ?1, classifier_id = ?2, pretrained_classifier = ?3, data = ?4 \
             WHERE id = ?5",
        )
        .bind(report.date)
        .bind(report.classifier_id)
        .bind(&report.pretrained_classifier)
        .bind(&report.data)
        .bind(report.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM reports WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
