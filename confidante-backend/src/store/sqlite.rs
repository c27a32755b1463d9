use anyhow::Error;
use sqlx::{Pool, Sqlite, sqlite::SqlitePoolOptions};

use confidante_core::xmpp::jid::Jid;

use crate::settings::Settings;
use crate::store::{StoredPasswordKind, UserRecord};

use super::StoreBackend;

pub struct SqliteStoreBackend {
    pool: Pool<Sqlite>,
}

impl SqliteStoreBackend {
    pub async fn new(settings: &Settings) -> Result<Self, Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&settings.database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

impl StoreBackend for SqliteStoreBackend {
    async fn add_user(
        &mut self,
        jid: Jid,
        stored_password_argon2: String,
        stored_password_scram_sha1: String,
        stored_password_scram_sha256: String,
    ) -> Result<(), Error> {
        let bare_jid = jid.to_bare().to_string();
        sqlx::query!(
                r#"
                INSERT INTO users (bare_jid, stored_password_argon2, stored_password_scram_sha1, stored_password_scram_sha256)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (bare_jid) DO UPDATE SET updated_at = CURRENT_TIMESTAMP
                "#,
                bare_jid,
                stored_password_argon2,
                stored_password_scram_sha1,
                stored_password_scram_sha256,
            )
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn remove_user(&mut self, jid: Jid) -> Result<(), Error> {
        let bare_jid = jid.to_bare().to_string();
        sqlx::query!(
            r#"
                DELETE FROM users
                WHERE bare_jid = ?
                "#,
            bare_jid,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_stored_password(
        &self,
        jid: Jid,
        kind: StoredPasswordKind,
    ) -> Result<String, Error> {
        let bare_jid = jid.to_bare().to_string();
        let user = sqlx::query_as!(
            StoredPasswords,
            r#"
            SELECT stored_password_argon2, stored_password_scram_sha1, stored_password_scram_sha256, stored_password_digest_md5
            FROM users
            WHERE bare_jid = ?
            "#,
            bare_jid,
        )
        .fetch_one(&self.pool)
        .await?;

        match kind {
            StoredPasswordKind::Argon2 => Ok(user.stored_password_argon2),
            StoredPasswordKind::ScramSha1 => Ok(user.stored_password_scram_sha1),
            StoredPasswordKind::ScramSha256 => Ok(user.stored_password_scram_sha256),
            StoredPasswordKind::DigestMd5 => Ok(user.stored_password_digest_md5),
        }
    }

    async fn set_stored_password(
        &mut self,
        jid: Jid,
        kind: StoredPasswordKind,
        stored_password: String,
    ) -> Result<(), Error> {
        let bare_jid = jid.to_bare().to_string();
        match kind {
            StoredPasswordKind::Argon2 => {
                sqlx::query!(
                    r#"
                UPDATE users
                SET stored_password_argon2 = ?, updated_at = CURRENT_TIMESTAMP
                WHERE bare_jid = ?
                "#,
                    stored_password,
                    bare_jid
                )
                .execute(&self.pool)
                .await?;
            }
            StoredPasswordKind::ScramSha1 => {
                sqlx::query!(
                    r#"
                UPDATE users
                SET stored_password_scram_sha1 = ?, updated_at = CURRENT_TIMESTAMP
                WHERE bare_jid = ?
                "#,
                    stored_password,
                    bare_jid
                )
                .execute(&self.pool)
                .await?;
            }
            StoredPasswordKind::ScramSha256 => {
                sqlx::query!(
                    r#"
                UPDATE users
                SET stored_password_scram_sha256 = ?, updated_at = CURRENT_TIMESTAMP
                WHERE bare_jid = ?
                "#,
                    stored_password,
                    bare_jid
                )
                .execute(&self.pool)
                .await?;
            }
            StoredPasswordKind::DigestMd5 => {
                sqlx::query!(
                    r#"
                UPDATE users
                SET stored_password_digest_md5 = ?, updated_at = CURRENT_TIMESTAMP
                WHERE bare_jid = ?
                "#,
                    stored_password,
                    bare_jid
                )
                .execute(&self.pool)
                .await?;
            }
        };

        Ok(())
    }

    async fn fetch_user(&self, jid: Jid) -> Result<UserRecord, Error> {
        let bare_jid = jid.to_bare().to_string();
        let row = sqlx::query!(
            r#"
            SELECT bare_jid, logged_out_at, logged_out_status
            FROM users
            WHERE bare_jid = ?
            "#,
            bare_jid,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(UserRecord {
            bare_jid: row.bare_jid.parse()?,
            logged_out_at: row.logged_out_at,
            logged_out_status: row.logged_out_status,
        })
    }

    async fn record_logout(
        &mut self,
        jid: Jid,
        at: i64,
        status: Option<String>,
    ) -> Result<(), Error> {
        let bare_jid = jid.to_bare().to_string();
        sqlx::query!(
            r#"
            UPDATE users
            SET logged_out_at = ?, logged_out_status = ?, updated_at = CURRENT_TIMESTAMP
            WHERE bare_jid = ?
            "#,
            at,
            status,
            bare_jid,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_blocked(&self, peer: Jid, owner_username: String) -> Result<bool, Error> {
        let peer_bare_jid = peer.to_bare().to_string();
        let row = sqlx::query!(
            r#"
            SELECT COUNT(*) AS count
            FROM blocked_jids
            WHERE owner_username = ? AND peer_bare_jid = ?
            "#,
            owner_username,
            peer_bare_jid,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.count > 0)
    }
}

#[derive(sqlx::FromRow)]
struct StoredPasswords {
    stored_password_argon2: String,
    stored_password_scram_sha1: String,
    stored_password_scram_sha256: String,
    stored_password_digest_md5: String,
}
