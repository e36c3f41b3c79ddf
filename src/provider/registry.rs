use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{Provider, ProviderType};
use crate::provider::DnsProvider;
use crate::provider::cloudflare::CloudflareProvider;
use crate::provider::powerdns::PowerDnsProvider;
use crate::tunnel::TunnelManager;

/// Shared handles every backend client may need.
#[derive(Clone)]
pub struct ProviderDeps {
    pub tunnels: Arc<TunnelManager>,
    pub http: reqwest::Client,
}

pub type ProviderFactory =
    Arc<dyn Fn(&Provider, &ProviderDeps) -> AppResult<Arc<dyn DnsProvider>> + Send + Sync>;

/// Maps a provider type to the factory that builds its client.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderType, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// PowerDNS and CloudFlare. Other types resolve only once registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            ProviderType::PowerDns,
            Arc::new(|p: &Provider, deps: &ProviderDeps| {
                Ok(Arc::new(PowerDnsProvider::from_provider(p, deps)?) as Arc<dyn DnsProvider>)
            }),
        );
        registry.register(
            ProviderType::Cloudflare,
            Arc::new(|p: &Provider, deps: &ProviderDeps| {
                Ok(Arc::new(CloudflareProvider::from_provider(p, deps)?) as Arc<dyn DnsProvider>)
            }),
        );
        registry
    }

    pub fn register(&mut self, provider_type: ProviderType, factory: ProviderFactory) {
        self.factories.insert(provider_type, factory);
    }

    pub fn supports(&self, provider_type: ProviderType) -> bool {
        self.factories.contains_key(&provider_type)
    }

    pub fn build(&self, provider: &Provider, deps: &ProviderDeps) -> AppResult<Arc<dyn DnsProvider>> {
        let factory = self.factories.get(&provider.provider_type).ok_or_else(|| {
            AppError::configuration(format!(
                "provider type '{}' is not implemented",
                provider.provider_type
            ))
        })?;
        factory(provider, deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionConfig, RateLimitPolicy};
    use chrono::Utc;

    fn provider(provider_type: ProviderType, connection: ConnectionConfig) -> Provider {
        Provider {
            id: 1,
            name: "p".into(),
            provider_type,
            active: true,
            connection,
            policy: RateLimitPolicy::default(),
            last_sync: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn deps() -> ProviderDeps {
        ProviderDeps {
            tunnels: Arc::new(TunnelManager::ssh("ssh")),
            http: reqwest::Client::new(),
        }
    }

    #[test]
    fn unregistered_types_are_configuration_errors() {
        let registry = ProviderRegistry::with_defaults();
        assert!(!registry.supports(ProviderType::Route53));
        let err = registry
            .build(&provider(ProviderType::Route53, ConnectionConfig::default()), &deps())
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn builds_default_backends() {
        let registry = ProviderRegistry::with_defaults();
        let pdns = ConnectionConfig {
            endpoint: Some("http://127.0.0.1:8081/api/v1".into()),
            api_key: Some("secret".into()),
            ..Default::default()
        };
        let built = registry
            .build(&provider(ProviderType::PowerDns, pdns), &deps())
            .unwrap();
        assert_eq!(built.provider_type(), ProviderType::PowerDns);

        let cf = ConnectionConfig {
            api_token: Some("token".into()),
            ..Default::default()
        };
        let built = registry
            .build(&provider(ProviderType::Cloudflare, cf), &deps())
            .unwrap();
        assert!(built.capabilities().manages_serial);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let registry = ProviderRegistry::with_defaults();
        let err = registry
            .build(
                &provider(ProviderType::PowerDns, ConnectionConfig::default()),
                &deps(),
            )
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
