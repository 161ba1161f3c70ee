//! Per-invocation wiring: API client, query cache, event bus and provider.

use certdesk_client::{CertClient, CertificateMutations, CertificateQueries, CertificateType};
use certdesk_core::{AppConfig, CacheEventBus, QueryClient, QueryProvider};

pub struct Session {
    pub api: CertClient,
    pub queries: CertificateQueries,
    provider: QueryProvider,
}

impl Session {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        if let Err(err) = config.require_api_token() {
            tracing::warn!(error = %err, "sending unauthenticated requests");
        }
        let api = CertClient::from_app_config(config)?;
        let client = QueryClient::new(config.query_defaults());
        let provider = QueryProvider::new(client.clone(), CacheEventBus::new());
        let queries = CertificateQueries::new(&client, api.clone(), config.page_size);
        Ok(Self { api, queries, provider })
    }

    pub fn mutations(&self, cert_type: CertificateType) -> CertificateMutations {
        CertificateMutations::new(&self.api, self.provider.bus(), cert_type)
    }

    pub fn shutdown(mut self) {
        self.provider.shutdown();
    }
}
