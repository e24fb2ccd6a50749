use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_create_metrics"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

// Portable across SQLite and PostgreSQL. Exactly one of m_value / m_delta is
// set per row, matching m_type.
const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    id VARCHAR(255) PRIMARY KEY NOT NULL CHECK (length(id) BETWEEN 1 AND 255),
    m_type VARCHAR(16) NOT NULL CHECK (m_type IN ('gauge', 'counter')),
    m_value DOUBLE PRECISION,
    m_delta BIGINT,
    CHECK (
        (m_type = 'gauge' AND m_value IS NOT NULL AND m_delta IS NULL)
        OR (m_type = 'counter' AND m_delta IS NOT NULL AND m_value IS NULL)
    )
)";

const DOWN_SQL: &str = "DROP TABLE IF EXISTS metrics";
