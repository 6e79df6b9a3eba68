use sqlx::{types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::projects::dto::{CreateProjectRequest, Document, Task};

/// Project row; tasks and documents ride along as JSONB.
#[derive(Debug, Clone, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub status: String,
    pub progress: i32,
    pub start_date: OffsetDateTime,
    pub end_date: Option<OffsetDateTime>,
    pub tasks: Json<Vec<Task>>,
    pub documents: Json<Vec<Document>>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

const PROJECT_COLUMNS: &str =
    "id, user_id, name, description, status, progress, start_date, end_date, tasks, documents, \
     created_at, updated_at";

impl Project {
    pub async fn create(
        db: &PgPool,
        user_id: Uuid,
        input: &CreateProjectRequest,
    ) -> anyhow::Result<Project> {
        let query = format!(
            r#"
            INSERT INTO projects (user_id, name, description, status, progress, start_date, end_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PROJECT_COLUMNS}
            "#
        );
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(user_id)
            .bind(&input.name)
            .bind(&input.description)
            .bind(input.status.as_str())
            .bind(input.progress)
            .bind(input.start_date)
            .bind(input.end_date)
            .fetch_one(db)
            .await?;
        Ok(project)
    }

    pub async fn find_by_id(
        db: &PgPool,
        id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<Option<Project>> {
        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1 AND user_id = $2");
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(db)
            .await?;
        Ok(project)
    }

    pub async fn list_by_user(
        db: &PgPool,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Project>> {
        let query = format!(
            r#"
            SELECT {PROJECT_COLUMNS}
            FROM projects
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let projects = sqlx::query_as::<_, Project>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(db)
            .await?;
        Ok(projects)
    }

    /// Full-record replace, scoped to the owning user.
    pub async fn save(&self, db: &PgPool) -> anyhow::Result<Project> {
        let query = format!(
            r#"
            UPDATE projects
            SET name = $3, description = $4, status = $5, progress = $6,
                start_date = $7, end_date = $8, tasks = $9, documents = $10,
                updated_at = now()
            WHERE id = $1 AND user_id = $2
            RETURNING {PROJECT_COLUMNS}
            "#
        );
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(self.id)
            .bind(self.user_id)
            .bind(&self.name)
            .bind(&self.description)
            .bind(&self.status)
            .bind(self.progress)
            .bind(self.start_date)
            .bind(self.end_date)
            .bind(&self.tasks)
            .bind(&self.documents)
            .fetch_one(db)
            .await?;
        Ok(project)
    }

    pub async fn delete(db: &PgPool, id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
