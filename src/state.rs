use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::email::{mailer_from_config, Mailer};
use crate::users::repo::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        let users = Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>;
        let mailer = mailer_from_config(&config)?;

        tracing::info!(environment = ?config.environment, smtp = config.email.is_some(), "state ready");
        Ok(Self::from_parts(config, users, mailer))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            users,
            mailer,
        }
    }
}

/// In-memory state plus handles to its fakes.
#[cfg(test)]
pub struct Fake {
    pub state: AppState,
    pub users: Arc<crate::users::repo::MemoryUserStore>,
    pub mailer: Arc<crate::email::RecordingMailer>,
}

#[cfg(test)]
impl AppState {
    pub fn fake(environment: crate::config::Environment) -> Fake {
        use crate::email::RecordingMailer;
        use crate::users::repo::MemoryUserStore;

        let users = Arc::new(MemoryUserStore::default());
        let mailer = Arc::new(RecordingMailer::default());
        let state = Self::from_parts(
            Arc::new(AppConfig::for_tests(environment)),
            users.clone() as Arc<dyn UserStore>,
            mailer.clone() as Arc<dyn Mailer>,
        );
        Fake {
            state,
            users,
            mailer,
        }
    }
}

#[cfg(test)]
impl Fake {
    pub fn seed_user(
        &self,
        role: crate::users::repo_types::Role,
        email: &str,
        password: &str,
    ) -> crate::users::repo_types::User {
        let mut user = crate::users::repo_types::sample_user(role);
        user.email = email.to_string();
        user.password_hash = crate::auth::password::hash_password(password).unwrap();
        self.users.insert(user.clone());
        user
    }
}
