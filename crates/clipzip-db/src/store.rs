//! Video status store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use clipzip_models::{User, Video, VideoId, VideoStatus};

use crate::config::DatabaseConfig;
use crate::error::{DbError, DbResult};

/// Persistent per-video state.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Load a video together with its owner. `None` when either is missing.
    async fn find_video_with_user(&self, video_id: &VideoId) -> DbResult<Option<(Video, User)>>;

    /// Move `video_id` from `from` to `to` if and only if it is currently in
    /// `from`. `archive_name` is persisted alongside the status when given.
    ///
    /// Returns `true` when this call performed the transition.
    async fn transition(
        &self,
        video_id: &VideoId,
        from: VideoStatus,
        to: VideoStatus,
        archive_name: Option<&str>,
    ) -> DbResult<bool>;
}

/// Open a connection pool.
pub async fn connect(config: &DatabaseConfig) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(config.connect_options()?)
        .await?;

    info!(
        max_connections = config.max_connections,
        "Database pool created"
    );
    Ok(pool)
}

/// Apply the bundled schema migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct VideoUserRow {
    video_id: String,
    user_id: String,
    data_video_up: DateTime<Utc>,
    status: i16,
    video_name: Option<String>,
    zip_name: Option<String>,
    descricao: Option<String>,
    titulo: Option<String>,
    metadados: Option<serde_json::Value>,
    name: Option<String>,
    email: String,
}

impl VideoUserRow {
    fn into_models(self) -> DbResult<(Video, User)> {
        let video = Video {
            video_id: VideoId::from_string(self.video_id),
            owner_id: self.user_id.clone(),
            uploaded_at: self.data_video_up,
            status: VideoStatus::from_code(self.status)?,
            source_path: self.video_name,
            archive_name: self.zip_name,
            title: self.titulo,
            description: self.descricao,
            metadata: self.metadados.unwrap_or(serde_json::Value::Null),
        };
        let user = User {
            user_id: self.user_id,
            name: self.name,
            email: self.email,
        };
        Ok((video, user))
    }
}

/// Primary key of `video_id`, or `None` when it cannot name a row.
///
/// Keys are compared as `BIGINT` so lookups and the conditional update use
/// the primary key index.
fn row_key(video_id: &VideoId) -> Option<i64> {
    video_id.as_str().trim().parse::<i64>().ok().filter(|id| *id > 0)
}

/// [`StatusStore`] over the `cliptozip` Postgres schema.
#[derive(Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `config`.
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        Ok(Self::new(connect(config).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn find_video_with_user(&self, video_id: &VideoId) -> DbResult<Option<(Video, User)>> {
        let Some(key) = row_key(video_id) else {
            debug!(video_id = %video_id, "Video id is not a row key");
            return Ok(None);
        };

        let row: Option<VideoUserRow> = sqlx::query_as(
            r#"
            SELECT
                v.video_id::text AS video_id,
                v.user_id::text AS user_id,
                v.data_video_up,
                v.status::int2 AS status,
                v.video_name,
                v.zip_name,
                v.descricao,
                v.titulo,
                v.metadados,
                u.name,
                u.email
            FROM cliptozip.videos v
            INNER JOIN cliptozip."user" u ON v.user_id = u.user_id
            WHERE v.video_id = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.into_models()?)),
            None => {
                debug!(video_id = %video_id, "Video or owner not found");
                Ok(None)
            }
        }
    }

    async fn transition(
        &self,
        video_id: &VideoId,
        from: VideoStatus,
        to: VideoStatus,
        archive_name: Option<&str>,
    ) -> DbResult<bool> {
        if !from.can_transition_to(to) {
            return Err(DbError::InvalidTransition { from, to });
        }
        let Some(key) = row_key(video_id) else {
            warn!(video_id = %video_id, "Video id is not a row key, transition skipped");
            return Ok(false);
        };

        let result = sqlx::query(
            r#"
            UPDATE cliptozip.videos
            SET status = $1, zip_name = COALESCE($2, zip_name)
            WHERE video_id = $3 AND status = $4
            "#,
        )
        .bind(to.code())
        .bind(archive_name)
        .bind(key)
        .bind(from.code())
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if applied {
            info!(video_id = %video_id, from = %from, to = %to, "Video status updated");
        } else {
            warn!(
                video_id = %video_id,
                from = %from,
                to = %to,
                "Video not in expected status, transition skipped"
            );
        }

        Ok(applied)
    }
}
