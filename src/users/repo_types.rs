use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::auth::password::{generate_reset_token, hash_reset_token};

/// How long an emailed reset link stays usable.
pub const PASSWORD_RESET_TTL: Duration = Duration::minutes(10);

pub const DEFAULT_PHOTO: &str = "default.jpg";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, never exposed
    #[serde(skip_serializing)]
    pub password_changed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub password_reset_token: Option<String>, // SHA-256 of the emailed token
    #[serde(skip_serializing)]
    pub password_reset_expires: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub active: bool, // deactivated accounts are invisible to lookups
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Fields needed to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

impl User {
    /// True when the password changed after a token with `issued_at` (unix seconds) was signed.
    pub fn changed_password_after(&self, issued_at: i64) -> bool {
        self.password_changed_at
            .map(|changed| changed.unix_timestamp() > issued_at)
            .unwrap_or(false)
    }

    /// Backdated by a second so a token signed right after the change stays valid.
    pub fn set_password(&mut self, password_hash: String, now: OffsetDateTime) {
        self.password_hash = password_hash;
        self.password_changed_at = Some(now - Duration::seconds(1));
    }

    /// Stores the digest and expiry, returns the plain token for the email.
    pub fn create_password_reset_token(&mut self, now: OffsetDateTime) -> String {
        let token = generate_reset_token();
        self.password_reset_token = Some(hash_reset_token(&token));
        self.password_reset_expires = Some(now + PASSWORD_RESET_TTL);
        token
    }

    pub fn clear_password_reset(&mut self) {
        self.password_reset_token = None;
        self.password_reset_expires = None;
    }

    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }
}

#[cfg(test)]
pub(crate) fn sample_user(role: Role) -> User {
    User {
        id: Uuid::new_v4(),
        name: "Jonas Schmedtmann".into(),
        email: "jonas@example.com".into(),
        photo: DEFAULT_PHOTO.into(),
        role,
        password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".into(),
        password_changed_at: None,
        password_reset_token: None,
        password_reset_expires: None,
        active: true,
        created_at: OffsetDateTime::now_utc(),
    }
}
