//! In-process cache over the mapping store, substituting inventory
//! attribute names with their fixed field slots and back.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::store::{Mapping, MappingStore};
use super::MappingError;
use crate::models::{Scope, ScopedName, MAX_MAPPING_INVENTORY_ATTRIBUTES};

fn slot_name(position: usize) -> String {
    format!("attribute{}", position)
}

#[derive(Debug, Clone, Default)]
struct TenantMapCache {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

/// Maps logical inventory attribute names to fixed slot identifiers.
///
/// The mapping is append-only, so a stale cache can only produce
/// fall-through names, never a wrong slot. Extension happens exclusively
/// on the `update = true` (reindex) path.
pub struct Mapper {
    ds: Arc<dyn MappingStore>,
    cache: RwLock<HashMap<String, TenantMapCache>>,
}

impl Mapper {
    pub fn new(ds: Arc<dyn MappingStore>) -> Self {
        Self {
            ds,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Substitute mapped inventory attribute names with their slots.
    /// Unmapped names and non-inventory scopes pass through unchanged.
    pub async fn map_inventory_attributes(
        &self,
        tenant_id: &str,
        attrs: &[ScopedName],
        update: bool,
    ) -> Result<Vec<ScopedName>, MappingError> {
        let table = match self.lookup_cache(tenant_id, attrs, false) {
            Some(table) => table,
            None => {
                let mapping = if update {
                    self.update_and_get_mapping(tenant_id, attrs).await?
                } else {
                    self.get_mapping(tenant_id).await?
                };
                attributes_to_fields(truncate(&mapping.inventory))
            }
        };
        Ok(map_attributes(attrs, &table))
    }

    /// Substitute slot identifiers back to inventory attribute names
    pub async fn reverse_inventory_attributes(
        &self,
        tenant_id: &str,
        attrs: &[ScopedName],
    ) -> Result<Vec<ScopedName>, MappingError> {
        let table = match self.lookup_cache(tenant_id, attrs, true) {
            Some(table) => table,
            None => {
                let mapping = self.get_mapping(tenant_id).await?;
                fields_to_attributes(truncate(&mapping.inventory))
            }
        };
        Ok(map_attributes(attrs, &table))
    }

    async fn get_mapping(&self, tenant_id: &str) -> Result<Mapping, MappingError> {
        let mapping = self.ds.get_mapping(tenant_id).await?;
        self.cache_mapping(tenant_id, &mapping);
        Ok(mapping)
    }

    async fn update_and_get_mapping(
        &self,
        tenant_id: &str,
        attrs: &[ScopedName],
    ) -> Result<Mapping, MappingError> {
        let inventory: Vec<String> = attrs
            .iter()
            .filter(|a| a.scope == Scope::Inventory)
            .map(|a| a.name.clone())
            .collect();
        let mapping = self.ds.update_and_get_mapping(tenant_id, &inventory).await?;
        self.cache_mapping(tenant_id, &mapping);
        Ok(mapping)
    }

    fn cache_mapping(&self, tenant_id: &str, mapping: &Mapping) {
        let names = truncate(&mapping.inventory);
        let entry = TenantMapCache {
            forward: attributes_to_fields(names),
            reverse: fields_to_attributes(names),
        };
        self.cache.write().insert(tenant_id.to_string(), entry);
    }

    /// Returns the cached table unless an inventory-scoped input name is
    /// missing while the mapping still has room to grow.
    fn lookup_cache(
        &self,
        tenant_id: &str,
        attrs: &[ScopedName],
        reverse: bool,
    ) -> Option<HashMap<String, String>> {
        let cache = self.cache.read();
        let entry = cache.get(tenant_id)?;
        let table = if reverse { &entry.reverse } else { &entry.forward };
        if table.len() < MAX_MAPPING_INVENTORY_ATTRIBUTES {
            for attr in attrs {
                if attr.scope == Scope::Inventory && !table.contains_key(&attr.name) {
                    return None;
                }
            }
        }
        Some(table.clone())
    }
}

fn truncate(names: &[String]) -> &[String] {
    let n = names.len().min(MAX_MAPPING_INVENTORY_ATTRIBUTES);
    &names[..n]
}

fn map_attributes(attrs: &[ScopedName], table: &HashMap<String, String>) -> Vec<ScopedName> {
    attrs
        .iter()
        .map(|attr| {
            if attr.scope != Scope::Inventory {
                return attr.clone();
            }
            match table.get(&attr.name) {
                Some(mapped) => ScopedName::new(attr.scope, mapped.clone()),
                None => attr.clone(),
            }
        })
        .collect()
}

fn attributes_to_fields(names: &[String]) -> HashMap<String, String> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), slot_name(i + 1)))
        .collect()
}

fn fields_to_attributes(names: &[String]) -> HashMap<String, String> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| (slot_name(i + 1), name.clone()))
        .collect()
}
