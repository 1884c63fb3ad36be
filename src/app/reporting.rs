//! Search service facade: search, aggregation, attribute listing, and
//! reindex request intake.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{AppError, Result};
use crate::mapping::{Mapper, MappingStore};
use crate::models::inventory::InvDeviceAttribute;
use crate::models::{
    build_aggregate_query, build_query, maybe_parse_attr, redot, AggregateParams, AggregationTerm,
    DeviceAggregation, DeviceAggregationItem, FilterAttribute, InvDevice, Job, KnownService,
    Scope, ScopedName, SearchParams, FIELD_ID, FIELD_UPDATED_AT,
    MAX_MAPPING_INVENTORY_ATTRIBUTES,
};
use crate::store::DocumentStore;

/// Mapped attribute listing returned by the management API
#[derive(Debug, Clone, Serialize)]
pub struct MappedAttributes {
    pub limit: usize,
    pub count: usize,
    pub attributes: Vec<MappedAttribute>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MappedAttribute {
    pub name: String,
    pub scope: Scope,
}

pub struct Reporting {
    store: Arc<dyn DocumentStore>,
    mapping_store: Arc<dyn MappingStore>,
    mapper: Arc<Mapper>,
    jobs: mpsc::Sender<Job>,
}

impl Reporting {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        mapping_store: Arc<dyn MappingStore>,
        mapper: Arc<Mapper>,
        jobs: mpsc::Sender<Job>,
    ) -> Self {
        Self {
            store,
            mapping_store,
            mapper,
            jobs,
        }
    }

    /// Search devices; returns matching devices and the total hit count
    pub async fn search(&self, mut params: SearchParams) -> Result<(Vec<InvDevice>, u64)> {
        self.map_search_params(&mut params).await?;
        let query = build_query(&params).map_err(|err| AppError::Validation(err.to_string()))?;
        let response = self
            .store
            .search(&params.tenant_id, &query.to_value())
            .await?;
        let (devices, total) = store_to_inv_devices(&response)?;

        let mut out = Vec::with_capacity(devices.len());
        for device in devices {
            out.push(self.reverse_device_attributes(&params.tenant_id, device).await?);
        }
        Ok((out, total))
    }

    /// Aggregate devices over attribute terms
    pub async fn aggregate(&self, mut params: AggregateParams) -> Result<Vec<DeviceAggregation>> {
        self.map_aggregate_params(&mut params).await?;
        let query =
            build_aggregate_query(&params).map_err(|err| AppError::Validation(err.to_string()))?;
        let response = self
            .store
            .aggregate(&params.tenant_id, &query.to_value())
            .await?;
        let aggregations = response.get("aggregations").unwrap_or(&Value::Null);
        parse_aggregations(&params.aggregations, aggregations)
    }

    /// List searchable attributes discovered in the index mapping
    pub async fn searchable_attributes(&self, tenant_id: &str) -> Result<Vec<FilterAttribute>> {
        let index = self.store.get_index_mapping(tenant_id).await?;
        let properties = index
            .pointer("/mappings/properties")
            .and_then(Value::as_object)
            .ok_or_else(|| AppError::Internal("can't parse index mappings".to_string()))?;

        let mut names: Vec<ScopedName> = Vec::new();
        for field in properties.keys() {
            if let Some((scope, name)) = maybe_parse_attr(field) {
                names.push(ScopedName::new(scope, redot(&name)));
            }
        }
        // slots surface under their logical names
        let names = self
            .mapper
            .reverse_inventory_attributes(tenant_id, &names)
            .await?;

        let mut attrs: Vec<FilterAttribute> = names
            .into_iter()
            .map(|scoped| FilterAttribute {
                name: scoped.name,
                scope: scoped.scope,
                count: 1,
            })
            .collect();
        attrs.sort_by(|a, b| {
            a.scope
                .to_string()
                .cmp(&b.scope.to_string())
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(attrs)
    }

    /// Mapped inventory attributes straight from the mapping store
    pub async fn mapped_attributes(&self, tenant_id: &str) -> Result<MappedAttributes> {
        let mapping = self.mapping_store.get_mapping(tenant_id).await?;
        let attributes: Vec<MappedAttribute> = mapping
            .inventory
            .iter()
            .take(MAX_MAPPING_INVENTORY_ATTRIBUTES)
            .map(|name| MappedAttribute {
                name: name.clone(),
                scope: Scope::Inventory,
            })
            .collect();
        Ok(MappedAttributes {
            limit: MAX_MAPPING_INVENTORY_ATTRIBUTES,
            count: attributes.len(),
            attributes,
        })
    }

    /// Enqueue a single reindex job; backpressure is surfaced to the
    /// caller instead of blocking the request.
    pub fn reindex(&self, tenant_id: &str, device_id: &str, service: &str) -> Result<()> {
        let service: KnownService = service.parse().map_err(|_| AppError::UnknownService)?;
        let job = Job::new(tenant_id, device_id, service);
        match self.jobs.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(AppError::ReindexChannelFull),
            Err(TrySendError::Closed(_)) => {
                Err(AppError::Internal("reindex pipeline is not running".to_string()))
            }
        }
    }

    /// Dependency reachability for the health endpoint
    pub async fn health(&self) -> Result<()> {
        self.store.ping().await?;
        self.mapping_store.ping().await?;
        Ok(())
    }

    async fn map_search_params(&self, params: &mut SearchParams) -> Result<()> {
        let inventory_scope = Scope::Inventory.to_string();
        let mut names: Vec<ScopedName> = Vec::new();
        for f in params.filters.iter().filter(|f| f.scope == inventory_scope) {
            names.push(ScopedName::new(Scope::Inventory, f.attribute.clone()));
        }
        for s in params.sort.iter().filter(|s| s.scope == inventory_scope) {
            names.push(ScopedName::new(Scope::Inventory, s.attribute.clone()));
        }
        for a in params.attributes.iter().filter(|a| a.scope == inventory_scope) {
            names.push(ScopedName::new(Scope::Inventory, a.attribute.clone()));
        }
        if names.is_empty() {
            return Ok(());
        }

        let mapped = self
            .mapper
            .map_inventory_attributes(&params.tenant_id, &names, false)
            .await?;
        let mut mapped = mapped.into_iter();
        for f in params.filters.iter_mut().filter(|f| f.scope == inventory_scope) {
            if let Some(scoped) = mapped.next() {
                f.attribute = scoped.name;
            }
        }
        for s in params.sort.iter_mut().filter(|s| s.scope == inventory_scope) {
            if let Some(scoped) = mapped.next() {
                s.attribute = scoped.name;
            }
        }
        for a in params.attributes.iter_mut().filter(|a| a.scope == inventory_scope) {
            if let Some(scoped) = mapped.next() {
                a.attribute = scoped.name;
            }
        }
        Ok(())
    }

    async fn map_aggregate_params(&self, params: &mut AggregateParams) -> Result<()> {
        let inventory_scope = Scope::Inventory.to_string();
        let mut names: Vec<ScopedName> = Vec::new();
        for f in params.filters.iter().filter(|f| f.scope == inventory_scope) {
            names.push(ScopedName::new(Scope::Inventory, f.attribute.clone()));
        }
        collect_term_names(&params.aggregations, &inventory_scope, &mut names);
        if names.is_empty() {
            return Ok(());
        }

        let mapped = self
            .mapper
            .map_inventory_attributes(&params.tenant_id, &names, false)
            .await?;
        let mut mapped = mapped.into_iter();
        for f in params.filters.iter_mut().filter(|f| f.scope == inventory_scope) {
            if let Some(scoped) = mapped.next() {
                f.attribute = scoped.name;
            }
        }
        apply_term_names(&mut params.aggregations, &inventory_scope, &mut mapped);
        Ok(())
    }

    async fn reverse_device_attributes(
        &self,
        tenant_id: &str,
        mut device: InvDevice,
    ) -> Result<InvDevice> {
        let inventory_scope = Scope::Inventory.to_string();
        let names: Vec<ScopedName> = device
            .attributes
            .iter()
            .filter(|a| a.scope == inventory_scope)
            .map(|a| ScopedName::new(Scope::Inventory, a.name.clone()))
            .collect();
        if names.is_empty() {
            return Ok(device);
        }
        let reversed = self
            .mapper
            .reverse_inventory_attributes(tenant_id, &names)
            .await?;
        let mut reversed = reversed.into_iter();
        for attr in device
            .attributes
            .iter_mut()
            .filter(|a| a.scope == inventory_scope)
        {
            if let Some(scoped) = reversed.next() {
                attr.name = scoped.name;
            }
        }
        Ok(device)
    }
}

fn collect_term_names(terms: &[AggregationTerm], inventory_scope: &str, out: &mut Vec<ScopedName>) {
    for term in terms {
        if term.scope == inventory_scope {
            out.push(ScopedName::new(Scope::Inventory, term.attribute.clone()));
        }
        collect_term_names(&term.aggregations, inventory_scope, out);
    }
}

fn apply_term_names(
    terms: &mut [AggregationTerm],
    inventory_scope: &str,
    mapped: &mut std::vec::IntoIter<ScopedName>,
) {
    for term in terms {
        if term.scope == inventory_scope {
            if let Some(scoped) = mapped.next() {
                term.attribute = scoped.name;
            }
        }
        apply_term_names(&mut term.aggregations, inventory_scope, mapped);
    }
}

/// Translate store hits into inventory-style devices
fn store_to_inv_devices(response: &Value) -> Result<(Vec<InvDevice>, u64)> {
    let total = response
        .pointer("/hits/total/value")
        .and_then(Value::as_u64)
        .ok_or_else(|| AppError::Internal("can't process total hits value".to_string()))?;
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Internal("can't process store hits".to_string()))?;

    let mut devices = Vec::with_capacity(hits.len());
    for hit in hits {
        devices.push(store_to_inv_device(hit)?);
    }
    Ok((devices, total))
}

fn store_to_inv_device(hit: &Value) -> Result<InvDevice> {
    // with a `fields` projection there is no `_source`
    let source = hit
        .get("_source")
        .or_else(|| hit.get("fields"))
        .and_then(Value::as_object)
        .ok_or_else(|| {
            AppError::Internal("can't process hit's '_source' nor 'fields'".to_string())
        })?;

    let id = match source.get(FIELD_ID) {
        Some(Value::String(id)) => id.clone(),
        // with `fields`, every value comes back as an array
        Some(Value::Array(items)) => items
            .first()
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::Internal("can't parse device id".to_string()))?,
        _ => return Err(AppError::Internal("can't parse device id".to_string())),
    };

    let mut device = InvDevice {
        id,
        attributes: Vec::new(),
        updated_ts: source
            .get(FIELD_UPDATED_AT)
            .map(unwrap_single)
            .and_then(|v| v.as_str().map(str::to_string))
            .and_then(|s| parse_time(&s)),
    };

    for (field, value) in source {
        if let Some((scope, name)) = maybe_parse_attr(field) {
            device.attributes.push(InvDeviceAttribute {
                name: redot(&name),
                scope: scope.to_string(),
                value: unwrap_single(value),
                description: None,
            });
        }
    }
    Ok(device)
}

/// Single-value fields may come back as length-1 arrays
fn unwrap_single(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.len() == 1 => items[0].clone(),
        other => other.clone(),
    }
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_aggregations(
    terms: &[AggregationTerm],
    aggregations: &Value,
) -> Result<Vec<DeviceAggregation>> {
    let mut out = Vec::with_capacity(terms.len());
    for term in terms {
        let Some(agg) = aggregations.get(&term.name) else {
            continue;
        };
        let buckets = agg
            .get("buckets")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::Internal("can't process aggregation buckets".to_string()))?;

        let mut items = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            let key = match bucket.get("key") {
                Some(Value::String(key)) => key.clone(),
                Some(other) => other.to_string(),
                None => continue,
            };
            let count = bucket
                .get("doc_count")
                .and_then(Value::as_u64)
                .unwrap_or_default();
            items.push(DeviceAggregationItem {
                key,
                count,
                aggregations: parse_aggregations(&term.aggregations, bucket)?,
            });
        }
        out.push(DeviceAggregation {
            name: term.name.clone(),
            items,
            other_count: agg
                .get("sum_other_doc_count")
                .and_then(Value::as_u64)
                .unwrap_or_default(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::store::testing::InMemoryMappingStore;
    use crate::store::{BulkItem, StoreError};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;

    #[derive(Default)]
    struct FakeStore {
        search_response: Value,
        index_mapping: Value,
        queries: SyncMutex<Vec<Value>>,
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn bulk(&self, _items: &[BulkItem]) -> std::result::Result<Value, StoreError> {
            Ok(json!({"errors": false, "items": []}))
        }

        async fn search(
            &self,
            _tenant_id: &str,
            body: &Value,
        ) -> std::result::Result<Value, StoreError> {
            self.queries.lock().push(body.clone());
            Ok(self.search_response.clone())
        }

        async fn get_devices(
            &self,
            _tenant_id: &str,
            _device_ids: &[String],
        ) -> std::result::Result<Vec<crate::models::Device>, StoreError> {
            Ok(Vec::new())
        }

        async fn migrate(&self) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn get_index_mapping(
            &self,
            _tenant_id: &str,
        ) -> std::result::Result<Value, StoreError> {
            Ok(self.index_mapping.clone())
        }

        async fn ping(&self) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        fn devices_index(&self, _tenant_id: &str) -> String {
            "devices".to_string()
        }

        fn routing_key(&self, tenant_id: &str) -> String {
            tenant_id.to_string()
        }
    }

    fn reporting_with(store: FakeStore) -> (Reporting, mpsc::Receiver<Job>) {
        let mapping_store = Arc::new(InMemoryMappingStore::default());
        let mapper = Arc::new(Mapper::new(mapping_store.clone()));
        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        (
            Reporting::new(Arc::new(store), mapping_store, mapper, jobs_tx),
            jobs_rx,
        )
    }

    fn search_response_with_source() -> Value {
        json!({
            "hits": {
                "total": { "value": 2, "relation": "eq" },
                "hits": [
                    {
                        "_id": "d1",
                        "_source": {
                            "id": "d1",
                            "tenant_id": "t1",
                            "status": "accepted",
                            "updated_at": "2023-02-01T10:00:00Z",
                            "identity_mac_str": ["aa:01"],
                            "inventory_device_type_str": ["dm1"]
                        }
                    },
                    {
                        "_id": "d2",
                        "_source": {
                            "id": "d2",
                            "tenant_id": "t1",
                            "identity_mac_str": ["aa:02"]
                        }
                    }
                ]
            }
        })
    }

    #[tokio::test]
    async fn test_search_decodes_hits() {
        let store = FakeStore {
            search_response: search_response_with_source(),
            ..Default::default()
        };
        let (reporting, _jobs) = reporting_with(store);

        let params = SearchParams {
            tenant_id: "t1".to_string(),
            ..Default::default()
        };
        let (devices, total) = reporting.search(params).await.unwrap();

        assert_eq!(total, 2);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "d1");
        assert!(devices[0].updated_ts.is_some());

        let mac = devices[0]
            .attributes
            .iter()
            .find(|a| a.name == "mac" && a.scope == "identity")
            .unwrap();
        // single-value arrays unwrapped
        assert_eq!(mac.value, json!("aa:01"));
    }

    #[tokio::test]
    async fn test_search_compiles_tenant_term() {
        let store = Arc::new(FakeStore {
            search_response: json!({"hits": {"total": {"value": 0}, "hits": []}}),
            ..Default::default()
        });
        let mapping_store = Arc::new(InMemoryMappingStore::default());
        let mapper = Arc::new(Mapper::new(mapping_store.clone()));
        let (jobs_tx, _jobs_rx) = mpsc::channel(1);
        let reporting = Reporting::new(store.clone(), mapping_store, mapper, jobs_tx);

        let params = SearchParams {
            tenant_id: "t1".to_string(),
            ..Default::default()
        };
        reporting.search(params).await.unwrap();

        // the compiled query must scope by tenant
        let queries = store.queries.lock();
        let must = queries[0]["query"]["bool"]["must"].as_array().unwrap();
        assert!(must.contains(&json!({"term": {"tenant_id": "t1"}})));
    }

    #[tokio::test]
    async fn test_search_with_fields_projection_response() {
        let store = FakeStore {
            search_response: json!({
                "hits": {
                    "total": { "value": 1 },
                    "hits": [
                        {
                            "_id": "d1",
                            "fields": {
                                "id": ["d1"],
                                "tenant_id": ["t1"],
                                "identity_mac_str": ["aa:01"]
                            }
                        }
                    ]
                }
            }),
            ..Default::default()
        };
        let (reporting, _jobs) = reporting_with(store);

        let params = SearchParams {
            tenant_id: "t1".to_string(),
            ..Default::default()
        };
        let (devices, total) = reporting.search(params).await.unwrap();
        assert_eq!(total, 1);
        // id extracted from its length-1 array form
        assert_eq!(devices[0].id, "d1");
    }

    #[tokio::test]
    async fn test_search_reverse_maps_slots() {
        let mapping_store = Arc::new(InMemoryMappingStore::default());
        mapping_store
            .update_and_get_mapping("t1", &["ip4".to_string()])
            .await
            .unwrap();
        let mapper = Arc::new(Mapper::new(mapping_store.clone()));
        let (jobs_tx, _jobs_rx) = mpsc::channel(1);
        let store = FakeStore {
            search_response: json!({
                "hits": {
                    "total": { "value": 1 },
                    "hits": [
                        {
                            "_source": {
                                "id": "d1",
                                "tenant_id": "t1",
                                "inventory_attribute1_str": ["192.168.1.1"]
                            }
                        }
                    ]
                }
            }),
            ..Default::default()
        };
        let reporting = Reporting::new(Arc::new(store), mapping_store, mapper, jobs_tx);

        let params = SearchParams {
            tenant_id: "t1".to_string(),
            ..Default::default()
        };
        let (devices, _) = reporting.search(params).await.unwrap();
        let attr = &devices[0].attributes[0];
        assert_eq!(attr.name, "ip4");
        assert_eq!(attr.scope, "inventory");
    }

    #[tokio::test]
    async fn test_searchable_attributes_sorted_and_reverse_mapped() {
        let mapping_store = Arc::new(InMemoryMappingStore::default());
        mapping_store
            .update_and_get_mapping("t1", &["ip4".to_string()])
            .await
            .unwrap();
        let mapper = Arc::new(Mapper::new(mapping_store.clone()));
        let (jobs_tx, _jobs_rx) = mpsc::channel(1);
        let store = FakeStore {
            index_mapping: json!({
                "mappings": {
                    "properties": {
                        "id": {"type": "keyword"},
                        "tenant_id": {"type": "keyword"},
                        "identity_mac_str": {"type": "keyword"},
                        "identity_serial_no_str": {"type": "keyword"},
                        "inventory_attribute1_str": {"type": "keyword"}
                    }
                }
            }),
            ..Default::default()
        };
        let reporting = Reporting::new(Arc::new(store), mapping_store, mapper, jobs_tx);

        let attrs = reporting.searchable_attributes("t1").await.unwrap();
        assert_eq!(attrs.len(), 3);
        // scope ascending, name descending within the scope
        assert_eq!(attrs[0].scope, Scope::Identity);
        assert_eq!(attrs[0].name, "serial_no");
        assert_eq!(attrs[1].name, "mac");
        assert_eq!(attrs[2].scope, Scope::Inventory);
        assert_eq!(attrs[2].name, "ip4");
    }

    #[tokio::test]
    async fn test_mapped_attributes() {
        let mapping_store = Arc::new(InMemoryMappingStore::default());
        mapping_store
            .update_and_get_mapping("t1", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let mapper = Arc::new(Mapper::new(mapping_store.clone()));
        let (jobs_tx, _jobs_rx) = mpsc::channel(1);
        let reporting = Reporting::new(
            Arc::new(FakeStore::default()),
            mapping_store,
            mapper,
            jobs_tx,
        );

        let mapped = reporting.mapped_attributes("t1").await.unwrap();
        assert_eq!(mapped.limit, 100);
        assert_eq!(mapped.count, 2);
        assert_eq!(mapped.attributes[0].name, "a");
        assert_eq!(mapped.attributes[0].scope, Scope::Inventory);
    }

    #[tokio::test]
    async fn test_aggregate_parses_buckets() {
        let store = FakeStore {
            search_response: json!({
                "hits": { "total": { "value": 3 }, "hits": [] },
                "aggregations": {
                    "types": {
                        "doc_count_error_upper_bound": 0,
                        "sum_other_doc_count": 5,
                        "buckets": [
                            { "key": "dm1", "doc_count": 2 },
                            { "key": "dm2", "doc_count": 1 }
                        ]
                    }
                }
            }),
            ..Default::default()
        };
        let (reporting, _jobs) = reporting_with(store);

        let params = AggregateParams {
            tenant_id: "t1".to_string(),
            aggregations: vec![AggregationTerm {
                name: "types".to_string(),
                attribute: "device_type".to_string(),
                scope: "inventory".to_string(),
                limit: 0,
                aggregations: vec![],
            }],
            ..Default::default()
        };
        let aggregations = reporting.aggregate(params).await.unwrap();
        assert_eq!(aggregations.len(), 1);
        assert_eq!(aggregations[0].name, "types");
        assert_eq!(aggregations[0].other_count, 5);
        assert_eq!(aggregations[0].items.len(), 2);
        assert_eq!(aggregations[0].items[0].key, "dm1");
        assert_eq!(aggregations[0].items[0].count, 2);
    }

    #[tokio::test]
    async fn test_reindex_enqueues_job() {
        let (reporting, mut jobs_rx) = reporting_with(FakeStore::default());

        reporting.reindex("t1", "d1", "inventory").unwrap();
        let job = jobs_rx.recv().await.unwrap();
        assert_eq!(job.tenant_id, "t1");
        assert_eq!(job.device_id, "d1");
        assert_eq!(job.service, KnownService::Inventory);
    }

    #[tokio::test]
    async fn test_reindex_unknown_service_rejected() {
        let (reporting, mut jobs_rx) = reporting_with(FakeStore::default());

        let err = reporting.reindex("t1", "d1", "ghost").unwrap_err();
        assert!(matches!(err, AppError::UnknownService));
        // no job was enqueued
        assert!(jobs_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reindex_backpressure() {
        let (reporting, _jobs_rx) = reporting_with(FakeStore::default());

        // the test channel holds a single job
        reporting.reindex("t1", "d1", "inventory").unwrap();
        let err = reporting.reindex("t1", "d2", "inventory").unwrap_err();
        assert!(matches!(err, AppError::ReindexChannelFull));
    }
}
