//! Postgres repositories
//!
//! `streamers_user_settings` is owned by this service (see `migrations/`).
//! The directory reads the host platform's `users`, `groups` and
//! `group_users` tables.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::debug;

use super::{StreamSettingStore, UserDirectory};
use crate::{
    models::{
        Group, GroupId, NewStreamSetting, PlatformUser, StreamSettingChanges, UserId,
        UserStreamSetting,
    },
    service::stream_key::legacy_filler_key,
    Error, Result,
};

const SETTING_COLUMNS: &str = "user_id, mount, enabled, stream_key_digest, \
     last_stream_started_at, stream_tag, created_at, updated_at";

fn setting_from_row(row: &PgRow) -> std::result::Result<UserStreamSetting, sqlx::Error> {
    Ok(UserStreamSetting {
        user_id: UserId(row.try_get("user_id")?),
        mount: row.try_get("mount")?,
        enabled: row.try_get("enabled")?,
        stream_key_digest: row.try_get("stream_key_digest")?,
        last_stream_started_at: row.try_get("last_stream_started_at")?,
        stream_tag: row.try_get("stream_tag")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Stream settings repository
#[derive(Clone)]
pub struct PgStreamSettingStore {
    pool: PgPool,
}

impl PgStreamSettingStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StreamSettingStore for PgStreamSettingStore {
    async fn find_by_user(&self, user_id: UserId) -> Result<Option<UserStreamSetting>> {
        let row = sqlx::query(&format!(
            "SELECT {SETTING_COLUMNS} FROM streamers_user_settings WHERE user_id = $1"
        ))
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(setting_from_row).transpose()?)
    }

    async fn find_or_create(
        &self,
        user_id: UserId,
        defaults: NewStreamSetting,
    ) -> Result<UserStreamSetting> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO streamers_user_settings (user_id, mount, stream_key, enabled)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING {SETTING_COLUMNS}
            "#
        ))
        .bind(user_id.0)
        .bind(&defaults.mount)
        .bind(legacy_filler_key())
        .bind(defaults.enabled)
        .fetch_one(&self.pool)
        .await?;

        Ok(setting_from_row(&row)?)
    }

    async fn update(
        &self,
        user_id: UserId,
        changes: StreamSettingChanges,
    ) -> Result<UserStreamSetting> {
        // One statement, so every listed field changes together or not at all
        let row = sqlx::query(&format!(
            r#"
            UPDATE streamers_user_settings SET
                mount = CASE WHEN $2 THEN $3 ELSE mount END,
                enabled = COALESCE($4, enabled),
                stream_key_digest = CASE WHEN $5 THEN $6 ELSE stream_key_digest END,
                last_stream_started_at = COALESCE($7, last_stream_started_at),
                stream_tag = CASE WHEN $8 THEN $9 ELSE stream_tag END,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {SETTING_COLUMNS}
            "#
        ))
        .bind(user_id.0)
        .bind(changes.mount.is_some())
        .bind(changes.mount.as_deref().unwrap_or_default())
        .bind(changes.enabled)
        .bind(changes.stream_key_digest.is_some())
        .bind(changes.stream_key_digest.clone().flatten())
        .bind(changes.last_stream_started_at)
        .bind(changes.stream_tag.is_some())
        .bind(changes.stream_tag.clone().flatten())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("stream setting for user {user_id}")))?;

        debug!(user_id = %user_id, "Updated stream setting");
        Ok(setting_from_row(&row)?)
    }

    async fn mount_taken(&self, mount: &str, except: Option<UserId>) -> Result<bool> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM streamers_user_settings
                WHERE mount = $1 AND ($2::BIGINT IS NULL OR user_id <> $2)
            )
            "#,
        )
        .bind(mount)
        .bind(except.map(UserId::as_i64))
        .fetch_one(&self.pool)
        .await?;

        Ok(taken)
    }

    async fn enabled_for_users(&self, user_ids: &[UserId]) -> Result<Vec<UserStreamSetting>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = user_ids.iter().map(|id| id.0).collect();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {SETTING_COLUMNS} FROM streamers_user_settings
            WHERE enabled = TRUE AND user_id = ANY($1)
            ORDER BY user_id
            "#
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| setting_from_row(row).map_err(Error::from))
            .collect()
    }
}

fn user_from_row(row: &PgRow) -> std::result::Result<PlatformUser, sqlx::Error> {
    Ok(PlatformUser {
        id: UserId(row.try_get("id")?),
        username: row.try_get("username")?,
        name: row.try_get("name")?,
        avatar_template: row.try_get("avatar_template")?,
        trust_level: row.try_get("trust_level")?,
    })
}

fn users_from_rows(rows: &[PgRow]) -> Result<Vec<PlatformUser>> {
    rows.iter()
        .map(|row| user_from_row(row).map_err(Error::from))
        .collect()
}

// Host ids may be INT4; everything is read back as BIGINT
const USER_COLUMNS: &str = "u.id::BIGINT AS id, u.username, u.name, u.avatar_template, \
     u.trust_level::INT AS trust_level";

/// Directory backed by the host platform's tables
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_user(&self, user_id: UserId) -> Result<Option<PlatformUser>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1"))
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<PlatformUser>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE LOWER(u.username) = LOWER($1) LIMIT 1"
        ))
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn users_by_ids(&self, user_ids: &[UserId]) -> Result<Vec<PlatformUser>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = user_ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.id = ANY($1) ORDER BY u.id"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        users_from_rows(&rows)
    }

    async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(
            "SELECT id::BIGINT AS id, name FROM groups WHERE LOWER(name) = LOWER($1) LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Group {
                id: GroupId(row.try_get("id")?),
                name: row.try_get("name")?,
            })),
            None => Ok(None),
        }
    }

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM group_users WHERE group_id = $1 AND user_id = $2)",
        )
        .bind(group_id.0)
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn member_ids(&self, group_id: GroupId) -> Result<Vec<UserId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id::BIGINT FROM group_users WHERE group_id = $1 ORDER BY user_id",
        )
        .bind(group_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(UserId).collect())
    }

    async fn members_with_usernames(
        &self,
        group_id: GroupId,
        usernames: &[String],
    ) -> Result<Vec<PlatformUser>> {
        if usernames.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users u
            JOIN group_users gu ON gu.user_id = u.id
            WHERE gu.group_id = $1 AND LOWER(u.username) = ANY($2)
            ORDER BY u.id
            "#
        ))
        .bind(group_id.0)
        .bind(usernames)
        .fetch_all(&self.pool)
        .await?;

        users_from_rows(&rows)
    }

    async fn eligible_users_page(
        &self,
        min_trust_level: i32,
        after: Option<UserId>,
        limit: u32,
    ) -> Result<Vec<PlatformUser>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users u
            WHERE u.trust_level >= $1 AND u.id > $2
            ORDER BY u.id
            LIMIT $3
            "#
        ))
        .bind(min_trust_level)
        .bind(after.map_or(i64::MIN, UserId::as_i64))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        users_from_rows(&rows)
    }

    async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO group_users (group_id, user_id, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_id.0)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM group_users WHERE group_id = $1 AND user_id = $2")
            .bind(group_id.0)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
