use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::email::{Mailer, NoopMailer, SmtpMailer};
use crate::users::services::UserDirectory;
use crate::users::store::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub directory: UserDirectory,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        let store = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;

        let mailer = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp)?) as Arc<dyn Mailer>,
            None => {
                tracing::info!("SMTP_HOST not set, outbound mail disabled");
                Arc::new(NoopMailer) as Arc<dyn Mailer>
            }
        };

        Ok(Self::from_parts(db, config, store, mailer))
    }

    /// Wire the state from explicit collaborators; any `UserStore` or
    /// `Mailer` substitutes cleanly.
    pub fn from_parts(
        db: PgPool,
        config: Arc<AppConfig>,
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            db,
            config,
            directory: UserDirectory::new(store),
            mailer,
        }
    }
}
