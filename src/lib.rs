//! Crate entrypoint wiring together configuration, the cache database, backend clients and APIs.

pub mod api;
pub mod auth;
pub mod cloudflare;
pub mod config;
pub mod db;
pub mod dnssec;
pub mod engine;
pub mod error;
pub mod export;
pub mod fcrdns;
pub mod models;
pub mod powerdns;
pub mod provider;
pub mod reverse;
pub mod serial;
pub mod sync;
pub mod tunnel;
pub mod validation;
pub mod zone_lock;

use config::AppConfig;
use db::{Db, provider_repo, zone_repo};
use error::{AppError, AppResult};
use fcrdns::DnsLookup;
use models::{Provider, Zone};
use provider::{DnsProvider, ProviderDeps, ProviderRegistry};
use tunnel::TunnelManager;
use zone_lock::ZoneLocks;

use std::sync::Arc;

/// Complete application dependencies shared across handlers and commands.
pub struct AppState {
    pub config: AppConfig,
    pub db: Db,
    pub registry: ProviderRegistry,
    pub deps: ProviderDeps,
    pub zone_locks: ZoneLocks,
    pub lookup: Arc<dyn DnsLookup>,
}

/// Arc-wrapped version of `AppState` passed into Axum extensions.
pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Db,
        registry: ProviderRegistry,
        lookup: Arc<dyn DnsLookup>,
    ) -> Self {
        let tunnels = Arc::new(TunnelManager::ssh(config.ssh_binary.clone()));
        Self {
            config,
            db,
            registry,
            deps: ProviderDeps {
                tunnels,
                http: reqwest::Client::new(),
            },
            zone_locks: ZoneLocks::new(),
            lookup,
        }
    }

    pub async fn provider(&self, id: i64) -> AppResult<Provider> {
        provider_repo::find(&self.db, id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("provider {id}")))
    }

    pub async fn zone(&self, id: i64) -> AppResult<Zone> {
        zone_repo::find(&self.db, id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("zone {id}")))
    }

    /// Backend client for an active provider.
    pub fn client(&self, provider: &Provider) -> AppResult<Arc<dyn DnsProvider>> {
        if !provider.active {
            return Err(AppError::configuration(format!(
                "provider '{}' is inactive",
                provider.name
            )));
        }
        self.registry.build(provider, &self.deps)
    }

    pub async fn client_for_zone(&self, zone: &Zone) -> AppResult<Arc<dyn DnsProvider>> {
        let provider = self.provider(zone.provider_id).await?;
        self.client(&provider)
    }

    /// Tear down process-scoped resources (SSH tunnels).
    pub async fn shutdown(&self) {
        self.deps.tunnels.close_all().await;
    }
}
