//! HTTP API integration tests running the router against in-memory
//! collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;

use fleet_reporting::api::{build_router, AppState};
use fleet_reporting::app::Reporting;
use fleet_reporting::mapping::{Mapper, Mapping, MappingError, MappingStore};
use fleet_reporting::models::{Device, Job};
use fleet_reporting::store::{BulkItem, DocumentStore, StoreError};

#[derive(Default)]
struct InMemoryMappingStore {
    mappings: Mutex<HashMap<String, Vec<String>>>,
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn get_mapping(&self, tenant_id: &str) -> Result<Mapping, MappingError> {
        let mappings = self.mappings.lock().await;
        Ok(Mapping {
            tenant_id: tenant_id.to_string(),
            inventory: mappings.get(tenant_id).cloned().unwrap_or_default(),
        })
    }

    async fn update_and_get_mapping(
        &self,
        tenant_id: &str,
        inventory: &[String],
    ) -> Result<Mapping, MappingError> {
        let mut mappings = self.mappings.lock().await;
        let entry = mappings.entry(tenant_id.to_string()).or_default();
        for name in inventory {
            if !entry.contains(name) {
                entry.push(name.clone());
            }
        }
        Ok(Mapping {
            tenant_id: tenant_id.to_string(),
            inventory: entry.clone(),
        })
    }

    async fn ping(&self) -> Result<(), MappingError> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeStore {
    search_response: Value,
    queries: SyncMutex<Vec<Value>>,
}

#[async_trait]
impl DocumentStore for FakeStore {
    async fn bulk(&self, _items: &[BulkItem]) -> Result<Value, StoreError> {
        Ok(json!({"errors": false, "items": []}))
    }

    async fn search(&self, _tenant_id: &str, body: &Value) -> Result<Value, StoreError> {
        self.queries.lock().push(body.clone());
        Ok(self.search_response.clone())
    }

    async fn get_devices(
        &self,
        _tenant_id: &str,
        _device_ids: &[String],
    ) -> Result<Vec<Device>, StoreError> {
        Ok(Vec::new())
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_index_mapping(&self, _tenant_id: &str) -> Result<Value, StoreError> {
        Ok(json!({"mappings": {"properties": {}}}))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn devices_index(&self, _tenant_id: &str) -> String {
        "devices".to_string()
    }

    fn routing_key(&self, tenant_id: &str) -> String {
        tenant_id.to_string()
    }
}

fn bearer_token(tenant: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = json!({"sub": "user-1", "mender.tenant": tenant});
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("Bearer {header}.{payload}.signature")
}

fn search_response(total: u64) -> Value {
    json!({
        "hits": {
            "total": { "value": total, "relation": "eq" },
            "hits": [
                {
                    "_id": "d1",
                    "_source": {
                        "id": "d1",
                        "tenant_id": "T1",
                        "identity_mac_str": ["aa:01"]
                    }
                }
            ]
        }
    })
}

fn build_app(search_body: Value, jobs_capacity: usize) -> (Router, Arc<FakeStore>, mpsc::Receiver<Job>) {
    let store = Arc::new(FakeStore {
        search_response: search_body,
        ..Default::default()
    });
    let mapping_store = Arc::new(InMemoryMappingStore::default());
    let mapper = Arc::new(Mapper::new(mapping_store.clone()));
    let (jobs_tx, jobs_rx) = mpsc::channel(jobs_capacity);
    let reporting = Arc::new(Reporting::new(
        store.clone(),
        mapping_store,
        mapper,
        jobs_tx,
    ));
    (build_router(AppState::new(reporting)), store, jobs_rx)
}

#[tokio::test]
async fn test_management_search_end_to_end() {
    let (app, store, _jobs) = build_app(search_response(25), 10);

    let body = json!({
        "page": 2,
        "per_page": 10,
        "filters": [
            {"scope": "inventory", "attribute": "ip4", "type": "$exists", "value": true}
        ],
        "sort": [
            {"scope": "inventory", "attribute": "ip4", "order": "asc"}
        ]
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/management/v1/reporting/devices/search")
        .header(header::AUTHORIZATION, bearer_token("T1"))
        .header("X-MEN-RBAC-Device-Groups", "g1,g2")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers.get("X-Total-Count").unwrap(), "25");
    let link = headers.get(header::LINK).unwrap().to_str().unwrap();
    assert!(link.contains(r#"page=1>;rel="first""#), "got {link}");
    assert!(link.contains(r#"page=1>;rel="previous""#), "got {link}");
    assert!(link.contains(r#"page=3>;rel="next""#), "got {link}");

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let devices: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(devices.as_array().unwrap().len(), 1);
    assert_eq!(devices[0]["id"], json!("d1"));

    // the compiled query: tenant term, RBAC group scope, exists filter,
    // sort, pagination window
    let queries = store.queries.lock();
    let query = &queries[0];
    let must = query["query"]["bool"]["must"].as_array().unwrap();
    assert!(must.contains(&json!({"term": {"tenant_id": "T1"}})));
    assert!(must.contains(&json!({"terms": {"system_group_str": ["g1", "g2"]}})));
    assert!(must.contains(&json!({"exists": {"field": "inventory_ip4_str"}})));
    assert_eq!(query["from"], json!(10));
    assert_eq!(query["size"], json!(10));
    assert_eq!(query["sort"][0]["inventory_ip4_str"]["order"], json!("asc"));
}

#[tokio::test]
async fn test_management_search_requires_identity() {
    let (app, _store, _jobs) = build_app(search_response(0), 10);

    let request = Request::builder()
        .method("POST")
        .uri("/api/management/v1/reporting/devices/search")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_management_search_rejects_malformed_body() {
    let (app, _store, _jobs) = build_app(search_response(0), 10);

    let request = Request::builder()
        .method("POST")
        .uri("/api/management/v1/reporting/devices/search")
        .header(header::AUTHORIZATION, bearer_token("T1"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(""))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_internal_search_tenant_from_path() {
    let (app, store, _jobs) = build_app(search_response(1), 10);

    let request = Request::builder()
        .method("POST")
        .uri("/api/internal/v1/reporting/inventory/tenants/T7/search")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let queries = store.queries.lock();
    let must = queries[0]["query"]["bool"]["must"].as_array().unwrap();
    assert!(must.contains(&json!({"term": {"tenant_id": "T7"}})));
}

#[tokio::test]
async fn test_reindex_accepted() {
    let (app, _store, mut jobs) = build_app(search_response(0), 10);

    let request = Request::builder()
        .method("POST")
        .uri("/api/internal/v1/reporting/tenants/T1/devices/D1/reindex?service=inventory")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let job = jobs.recv().await.unwrap();
    assert_eq!(job.tenant_id, "T1");
    assert_eq!(job.device_id, "D1");
}

#[tokio::test]
async fn test_reindex_unknown_service() {
    let (app, _store, mut jobs) = build_app(search_response(0), 10);

    let request = Request::builder()
        .method("POST")
        .uri("/api/internal/v1/reporting/tenants/T1/devices/D1/reindex?service=ghost")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], json!("unknown service name"));

    // no job was enqueued
    assert!(jobs.try_recv().is_err());
}

#[tokio::test]
async fn test_reindex_backpressure_surfaces_as_service_unavailable() {
    let (app, _store, _jobs) = build_app(search_response(0), 1);

    let first = Request::builder()
        .method("POST")
        .uri("/api/internal/v1/reporting/tenants/T1/devices/D1/reindex?service=inventory")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(first).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let second = Request::builder()
        .method("POST")
        .uri("/api/internal/v1/reporting/tenants/T1/devices/D2/reindex?service=inventory")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(second).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_alive_and_health() {
    let (app, _store, _jobs) = build_app(search_response(0), 10);

    let request = Request::builder()
        .uri("/api/internal/v1/reporting/alive")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let request = Request::builder()
        .uri("/api/internal/v1/reporting/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_management_aggregate() {
    let store_response = json!({
        "hits": { "total": { "value": 3 }, "hits": [] },
        "aggregations": {
            "types": {
                "sum_other_doc_count": 0,
                "buckets": [
                    { "key": "dm1", "doc_count": 2 },
                    { "key": "dm2", "doc_count": 1 }
                ]
            }
        }
    });
    let (app, _store, _jobs) = build_app(store_response, 10);

    let body = json!({
        "aggregations": [
            {"name": "types", "scope": "inventory", "attribute": "device_type"}
        ]
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/management/v1/reporting/devices/aggregate")
        .header(header::AUTHORIZATION, bearer_token("T1"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let aggregations: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(aggregations[0]["name"], json!("types"));
    assert_eq!(aggregations[0]["items"][0]["key"], json!("dm1"));
    assert_eq!(aggregations[0]["items"][0]["count"], json!(2));
}

#[tokio::test]
async fn test_management_aggregate_rejects_invalid_params() {
    let (app, _store, _jobs) = build_app(search_response(0), 10);

    // missing aggregation terms
    let request = Request::builder()
        .method("POST")
        .uri("/api/management/v1/reporting/devices/aggregate")
        .header(header::AUTHORIZATION, bearer_token("T1"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
