//! Service wiring shared by every handler.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tracing::{info, warn};

use fmshop_infra::ledger::{InMemoryLedger, PostgresLedger};
use fmshop_infra::settlement::SettlementCoordinator;
use fmshop_infra::store::{
    InMemoryCatalog, InMemorySettlementStore, InMemoryUserDirectory, PostgresStore,
};

use crate::config::ApiConfig;

#[derive(Clone, Debug)]
pub struct AppState {
    pub coordinator: Arc<SettlementCoordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<SettlementCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Wire stores and gateways from configuration.
    ///
    /// With `DATABASE_URL` set, every store is backed by Postgres and the
    /// schema is applied at startup. Otherwise state lives in process memory.
    pub async fn from_config(config: &ApiConfig) -> anyhow::Result<Self> {
        let gateways = config.settlement.build_gateways()?;
        let policy = config.settlement.policy();

        let coordinator = match &config.database_url {
            Some(url) => {
                let pool = PgPool::connect(url)
                    .await
                    .context("failed to connect to Postgres")?;
                let store = Arc::new(PostgresStore::new(pool.clone()));
                store.migrate().await.context("failed to apply schema")?;
                info!("using Postgres stores");
                SettlementCoordinator::new(
                    store.clone(),
                    Arc::new(PostgresLedger::new(pool)),
                    store.clone(),
                    store,
                    gateways,
                    policy,
                )
            }
            None => {
                warn!("DATABASE_URL not set; state is kept in memory and lost on restart");
                SettlementCoordinator::new(
                    Arc::new(InMemorySettlementStore::new()),
                    Arc::new(InMemoryLedger::new()),
                    Arc::new(InMemoryCatalog::new()),
                    Arc::new(InMemoryUserDirectory::new()),
                    gateways,
                    policy,
                )
            }
        };

        Ok(Self::new(Arc::new(coordinator)))
    }
}
