use sqlx::{Sqlite, SqlitePool, Transaction};

/// Read-only access to the industry lookup table.
#[derive(Clone)]
pub struct IndustryRepository {
    pool: SqlitePool,
}

impl IndustryRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns `true` when `industry_id` refers to a known industry.
    pub async fn exists(&self, industry_id: i64) -> Result<bool, sqlx::Error> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM industries WHERE id = ?")
            .bind(industry_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

pub(crate) async fn exists_in(
    tx: &mut Transaction<'_, Sqlite>,
    industry_id: i64,
) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM industries WHERE id = ?")
        .bind(industry_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(found.is_some())
}
