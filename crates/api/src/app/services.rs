//! Service wiring: store, transport and secrets behind one [`JobQueue`].

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use relayq_infra::secrets::{EnvSecretStore, SecretStore};
use relayq_infra::{
    HttpTransport, InMemoryStore, JobQueue, PostgresStore, QueueConfig, ReqwestTransport,
};

/// Everything the handlers need.
pub struct AppServices {
    pub queue: Arc<JobQueue>,
}

impl AppServices {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    /// In-memory store with caller-supplied transport and secrets.
    pub fn in_memory(
        transport: Arc<dyn HttpTransport>,
        secrets: Arc<dyn SecretStore>,
        config: &QueueConfig,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new().with_claim_lease(config.claim_lease));
        Self::new(Arc::new(JobQueue::new(
            store.clone(),
            store,
            transport,
            secrets,
            config,
        )))
    }
}

/// Build production services.
///
/// Uses PostgreSQL when `DATABASE_URL` is set (migrations applied on
/// start), the in-memory store otherwise.
pub async fn build_services(config: &QueueConfig) -> anyhow::Result<AppServices> {
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::default().with_response_ttl(config.response_ttl));
    let secrets: Arc<dyn SecretStore> = Arc::new(EnvSecretStore::new());

    match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            let store = Arc::new(PostgresStore::new(pool).with_claim_lease(config.claim_lease));
            store.migrate().await.context("failed to apply migrations")?;
            tracing::info!("using PostgreSQL job store");

            Ok(AppServices::new(Arc::new(JobQueue::new(
                store.clone(),
                store,
                transport,
                secrets,
                config,
            ))))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; jobs are kept in memory only");
            Ok(AppServices::in_memory(transport, secrets, config))
        }
    }
}
