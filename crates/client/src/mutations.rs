//! Certificate writes.
//!
//! Every successful write emits `REFRESH_CERTIFICATES` carrying the
//! certificate type it was made for. Listeners currently invalidate all of
//! `["certs"]` regardless of the tag.

use certdesk_core::{CacheEventBus, Error, Mutation, Topic};
use serde_json::Value;

use crate::api::{CertClient, Certificate, CertificateType, CertificateUpdate, NewCertificate};

/// Write operations for one certificate type.
#[derive(Clone)]
pub struct CertificateMutations {
    pub create: Mutation<NewCertificate, Certificate>,
    pub update: Mutation<CertificateUpdate, Certificate>,
    pub apply: Mutation<String, Certificate>,
    pub reapply: Mutation<String, Certificate>,
    pub delete: Mutation<String, ()>,
}

impl CertificateMutations {
    pub fn new(api: &CertClient, bus: &CacheEventBus, cert_type: CertificateType) -> Self {
        let tag = move || vec![Value::from(cert_type.as_str())];
        let topic = Topic::RefreshCertificates;

        let create = {
            let api = api.clone();
            Mutation::new(
                move |cert: NewCertificate| {
                    let api = api.clone();
                    async move { api.create_certificate(&cert).await.map_err(Error::from) }
                },
                bus,
                topic,
            )
            .with_payload(|cert: &NewCertificate| vec![Value::from(cert.cert_type.as_str())])
        };

        let update = {
            let api = api.clone();
            Mutation::new(
                move |changes: CertificateUpdate| {
                    let api = api.clone();
                    async move { api.update_certificate(&changes).await.map_err(Error::from) }
                },
                bus,
                topic,
            )
            .with_payload(move |_: &CertificateUpdate| tag())
        };

        let apply = {
            let api = api.clone();
            Mutation::new(
                move |id: String| {
                    let api = api.clone();
                    async move { api.apply_certificate(&id).await.map_err(Error::from) }
                },
                bus,
                topic,
            )
            .with_payload(move |_: &String| tag())
        };

        let reapply = {
            let api = api.clone();
            Mutation::new(
                move |id: String| {
                    let api = api.clone();
                    async move { api.reapply_certificate(&id).await.map_err(Error::from) }
                },
                bus,
                topic,
            )
            .with_payload(move |_: &String| tag())
        };

        let delete = {
            let api = api.clone();
            Mutation::new(
                move |id: String| {
                    let api = api.clone();
                    async move { api.delete_certificate(&id).await.map_err(Error::from) }
                },
                bus,
                topic,
            )
            .with_payload(move |_: &String| tag())
        };

        Self { create, update, apply, reapply, delete }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiConfig;
    use crate::queries::CertificateQueries;
    use certdesk_core::query::{QueryDefaults, QueryOptions, RetryPolicy};
    use certdesk_core::{CacheEvent, EventHandler, QueryClient, QueryProvider};
    use httpmock::MockServer;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn api(server: &MockServer) -> CertClient {
        CertClient::new(ApiConfig { base_url: server.base_url(), ..ApiConfig::default() }).unwrap()
    }

    fn recorder(bus: &CacheEventBus) -> Arc<Mutex<Vec<CacheEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let handler: EventHandler = {
            let events = events.clone();
            Arc::new(move |event: &CacheEvent| {
                events.lock().unwrap().push(event.clone());
                Ok(())
            })
        };
        bus.on(Topic::RefreshCertificates, handler);
        events
    }

    #[tokio::test]
    async fn test_delete_emits_type_tag() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("DELETE").path("/certs/c1");
                then.status(204);
            })
            .await;
        let bus = CacheEventBus::new();
        let events = recorder(&bus);

        let mutations = CertificateMutations::new(&api(&server), &bus, CertificateType::Ssh);
        mutations.delete.mutate("c1".into()).await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, vec![json!("ssh")]);
    }

    #[tokio::test]
    async fn test_failed_apply_emits_nothing() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST").path("/certs/c1/apply");
                then.status(500).body("acme order failed");
            })
            .await;
        let bus = CacheEventBus::new();
        let events = recorder(&bus);

        let mutations = CertificateMutations::new(&api(&server), &bus, CertificateType::Websites);
        let err = mutations.apply.mutate("c1".into()).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        mock.assert_hits_async(1).await;
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_refreshes_mounted_lists() {
        let server = MockServer::start_async().await;
        let list = server
            .mock_async(|when, then| {
                when.method("GET").path("/certs");
                then.status(200).json_body(json!({"items": [], "total": 0}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method("POST").path("/certs");
                then.status(201).json_body(json!({"id": "c9", "name": "new", "type": "ca", "status": "pending"}));
            })
            .await;

        let client = QueryClient::new(QueryDefaults { retry: RetryPolicy::none(), ..QueryDefaults::default() });
        let bus = CacheEventBus::new();
        let _provider = QueryProvider::new(client.clone(), bus.clone());
        let api = api(&server);
        let queries = CertificateQueries::new(&client, api.clone(), 20);
        let lists = queries.list_blocking().unwrap();
        let mut observer = lists
            .use_query(&CertificateQueries::list_key(Some(CertificateType::Ca)), None, QueryOptions::default())
            .await
            .unwrap();
        list.assert_hits_async(1).await;

        let mutations = CertificateMutations::new(&api, &bus, CertificateType::Ca);
        let created = mutations
            .create
            .mutate(NewCertificate {
                name: "new".into(),
                cert_type: CertificateType::Ca,
                domains: Vec::new(),
                store: None,
                source: None,
                auto_renew: false,
            })
            .await
            .unwrap();
        assert_eq!(created.id, "c9");

        observer.settled().await.unwrap();
        list.assert_hits_async(2).await;
    }
}
