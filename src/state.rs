use std::{sync::Arc, time::Duration};

use crate::{
    auth::repo::{PgUserStore, UserStore},
    config::AppConfig,
    contacts::repo::{ContactStore, PgContactStore},
    db,
    notify::{LogNotifier, Notifier, SmtpNotifier},
    rate_limit::RateLimiter,
    storage::{Storage, StorageClient},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub contacts: Arc<dyn ContactStore>,
    pub storage: Arc<dyn StorageClient>,
    pub notifier: Arc<dyn Notifier>,
    pub limiter: RateLimiter,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let pool = db::connect(&config).await?;

        // Real S3/MinIO
        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;

        let notifier: Arc<dyn Notifier> = match &config.mail.smtp_host {
            Some(host) => Arc::new(SmtpNotifier::new(host, &config.mail)?),
            None => {
                tracing::warn!("SMTP_HOST not set; verification links will only be logged");
                Arc::new(LogNotifier)
            }
        };

        let limiter = RateLimiter::new(Duration::from_secs(config.rate_limit_seconds));

        Ok(Self {
            users: Arc::new(PgUserStore::new(pool.clone())),
            contacts: Arc::new(PgContactStore::new(pool)),
            config,
            storage,
            notifier,
            limiter,
        })
    }
}
