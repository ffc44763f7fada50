use std::future::Future;

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    announcement::{Announcement, AnnouncementRequest},
    timer::{SetTimerRequest, Timer},
};

const ANNOUNCEMENT_COLS: &str = "id, title, content, type, created_at, image_url, video_url";
const TIMER_COLS: &str = "id, title, description, end_time, active, created_at";

/// Durable storage for announcements and timers.
///
/// Implementations are the single writer of truth; sessions only ever hold
/// read-only projections of what these calls return.
pub trait RecordStore: Clone + Send + Sync + 'static {
    /// All announcements, newest `created_at` first.
    fn list_announcements(&self) -> impl Future<Output = anyhow::Result<Vec<Announcement>>> + Send;

    fn insert_announcement(
        &self,
        req: &AnnouncementRequest,
    ) -> impl Future<Output = anyhow::Result<Announcement>> + Send;

    /// Full replace of the editable fields. `None` when the id is unknown.
    fn update_announcement(
        &self,
        id: Uuid,
        req: &AnnouncementRequest,
    ) -> impl Future<Output = anyhow::Result<Option<Announcement>>> + Send;

    /// Returns `false` when nothing was deleted.
    fn delete_announcement(&self, id: Uuid) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// The most recently created row with `active = TRUE`, if any.
    fn get_active_timer(&self) -> impl Future<Output = anyhow::Result<Option<Timer>>> + Send;

    /// Flips every active row to inactive and returns the rows it touched.
    fn deactivate_all_timers(&self) -> impl Future<Output = anyhow::Result<Vec<Timer>>> + Send;

    fn insert_timer(
        &self,
        req: &SetTimerRequest,
    ) -> impl Future<Output = anyhow::Result<Timer>> + Send;

    /// Deactivate-all then insert-active. The default runs the two writes
    /// separately, so concurrent callers can leave two active rows behind;
    /// `get_active_timer` resolving to the newest row covers that window.
    fn replace_active_timer(
        &self,
        req: &SetTimerRequest,
    ) -> impl Future<Output = anyhow::Result<(Vec<Timer>, Timer)>> + Send {
        async move {
            let deactivated = self.deactivate_all_timers().await?;
            let timer = self.insert_timer(req).await?;
            Ok((deactivated, timer))
        }
    }
}

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl RecordStore for PgRecordStore {
    async fn list_announcements(&self) -> anyhow::Result<Vec<Announcement>> {
        let rows = sqlx::query_as::<_, Announcement>(&format!(
            "SELECT {ANNOUNCEMENT_COLS} FROM announcements ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_announcement(&self, req: &AnnouncementRequest) -> anyhow::Result<Announcement> {
        let row = sqlx::query_as::<_, Announcement>(&format!(
            "INSERT INTO announcements (title, content, type, image_url, video_url)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {ANNOUNCEMENT_COLS}"
        ))
        .bind(&req.title)
        .bind(&req.content)
        .bind(req.kind.as_str())
        .bind(&req.image_url)
        .bind(&req.video_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_announcement(
        &self,
        id: Uuid,
        req: &AnnouncementRequest,
    ) -> anyhow::Result<Option<Announcement>> {
        let row = sqlx::query_as::<_, Announcement>(&format!(
            "UPDATE announcements
             SET title = $2, content = $3, type = $4, image_url = $5, video_url = $6
             WHERE id = $1
             RETURNING {ANNOUNCEMENT_COLS}"
        ))
        .bind(id)
        .bind(&req.title)
        .bind(&req.content)
        .bind(req.kind.as_str())
        .bind(&req.image_url)
        .bind(&req.video_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_announcement(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM announcements WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_active_timer(&self) -> anyhow::Result<Option<Timer>> {
        let row = sqlx::query_as::<_, Timer>(&format!(
            "SELECT {TIMER_COLS} FROM timers
             WHERE active = TRUE
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn deactivate_all_timers(&self) -> anyhow::Result<Vec<Timer>> {
        let rows = sqlx::query_as::<_, Timer>(&format!(
            "UPDATE timers SET active = FALSE WHERE active = TRUE RETURNING {TIMER_COLS}"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_timer(&self, req: &SetTimerRequest) -> anyhow::Result<Timer> {
        let row = sqlx::query_as::<_, Timer>(&format!(
            "INSERT INTO timers (title, description, end_time, active)
             VALUES ($1, $2, $3, TRUE)
             RETURNING {TIMER_COLS}"
        ))
        .bind(&req.title)
        .bind(&req.description)
        .bind(req.end_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Both writes in one transaction, so readers never see a moment with no
    /// active timer. Under READ COMMITTED two concurrent calls can still each
    /// commit an active row; `get_active_timer` picking the newest is what
    /// keeps that consistent.
    async fn replace_active_timer(
        &self,
        req: &SetTimerRequest,
    ) -> anyhow::Result<(Vec<Timer>, Timer)> {
        let mut tx = self.pool.begin().await?;

        let deactivated = sqlx::query_as::<_, Timer>(&format!(
            "UPDATE timers SET active = FALSE WHERE active = TRUE RETURNING {TIMER_COLS}"
        ))
        .fetch_all(&mut *tx)
        .await?;

        let timer = sqlx::query_as::<_, Timer>(&format!(
            "INSERT INTO timers (title, description, end_time, active)
             VALUES ($1, $2, $3, TRUE)
             RETURNING {TIMER_COLS}"
        ))
        .bind(&req.title)
        .bind(&req.description)
        .bind(req.end_time)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((deactivated, timer))
    }
}
