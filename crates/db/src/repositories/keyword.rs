use sqlx::Row;

use super::{KeywordStore, RepositoryError};
use crate::DbPool;

pub struct SqlKeywordStore {
    pool: DbPool,
}

impl SqlKeywordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl KeywordStore for SqlKeywordStore {
    async fn active_keywords(&self) -> Result<Vec<String>, RepositoryError> {
        let rows =
            sqlx::query("SELECT keyword FROM handoff_keyword WHERE active = 1 ORDER BY keyword")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|row| Ok(row.try_get::<String, _>("keyword")?.to_lowercase()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::SqlKeywordStore;
    use crate::fixtures::seed_baseline;
    use crate::migrations;
    use crate::repositories::KeywordStore;
    use crate::connect_with_settings;

    #[tokio::test]
    async fn returns_only_active_keywords_lowercased() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        seed_baseline(&pool).await.expect("seed");

        sqlx::query(
            "INSERT INTO handoff_keyword (keyword, active, created_at)
             VALUES ('RECLAMO', 0, '2026-03-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert inactive keyword");

        let store = SqlKeywordStore::new(pool.clone());
        let keywords = store.active_keywords().await.expect("keywords");

        assert!(keywords.contains(&"agente".to_string()));
        assert!(!keywords.contains(&"reclamo".to_string()));
        assert!(keywords.iter().all(|keyword| keyword.chars().all(|ch| !ch.is_uppercase())));

        pool.close().await;
    }
}
