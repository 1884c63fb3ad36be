//! Persistent mapping store backed by MongoDB

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::{
    ClientOptions, Credential, FindOneAndUpdateOptions, ReturnDocument, Tls, TlsOptions,
};
use mongodb::{Client, Collection, Database};
use serde::{Deserialize, Serialize};

use super::MappingError;
use crate::config::Config;

const DATABASE_NAME: &str = "reporting";
const COLLECTION_MAPPINGS: &str = "mappings";

/// Per-tenant ordered list of inventory attribute names. The 1-based
/// position of a name defines its slot; positions never change once
/// assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    pub tenant_id: String,
    pub inventory: Vec<String>,
}

/// Capability contract of the persistent mapping store
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Current mapping for a tenant; a tenant without one reads as empty
    async fn get_mapping(&self, tenant_id: &str) -> Result<Mapping, MappingError>;

    /// Atomically append any names not yet present, in request order, and
    /// return the resulting mapping. Concurrent callers observe a single
    /// serial extension.
    async fn update_and_get_mapping(
        &self,
        tenant_id: &str,
        inventory: &[String],
    ) -> Result<Mapping, MappingError>;

    /// Reachability check for the health endpoint
    async fn ping(&self) -> Result<(), MappingError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct MappingDoc {
    #[serde(rename = "_id")]
    tenant_id: String,
    #[serde(default)]
    inventory: Vec<String>,
}

impl From<MappingDoc> for Mapping {
    fn from(doc: MappingDoc) -> Self {
        Mapping {
            tenant_id: doc.tenant_id,
            inventory: doc.inventory,
        }
    }
}

/// MongoDB-backed mapping store
pub struct MongoMappingStore {
    database: Database,
    collection: Collection<MappingDoc>,
}

impl MongoMappingStore {
    pub async fn new(cfg: &Config) -> Result<Self, MappingError> {
        let mut options = ClientOptions::parse(&cfg.mongo).await?;
        if cfg.db_ssl {
            options.tls = Some(Tls::Enabled(TlsOptions::default()));
        }
        if let Some(username) = &cfg.db_username {
            options.credential = Some(
                Credential::builder()
                    .username(username.clone())
                    .password(cfg.db_password.clone())
                    .build(),
            );
        }
        let client = Client::with_options(options)?;
        let database = client.database(DATABASE_NAME);
        let collection = database.collection::<MappingDoc>(COLLECTION_MAPPINGS);
        Ok(Self {
            database,
            collection,
        })
    }
}


#[async_trait]
impl MappingStore for MongoMappingStore {
    async fn get_mapping(&self, tenant_id: &str) -> Result<Mapping, MappingError> {
        let found = self
            .collection
            .find_one(doc! { "_id": tenant_id }, None)
            .await?;
        Ok(found.map(Mapping::from).unwrap_or_else(|| Mapping {
            tenant_id: tenant_id.to_string(),
            inventory: Vec::new(),
        }))
    }

    async fn update_and_get_mapping(
        &self,
        tenant_id: &str,
        inventory: &[String],
    ) -> Result<Mapping, MappingError> {
        // $addToSet with $each appends missing names in request order and
        // skips the rest, all inside a single document update
        let update = doc! {
            "$addToSet": {
                "inventory": { "$each": inventory.to_vec() }
            }
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .collection
            .find_one_and_update(doc! { "_id": tenant_id }, update, options)
            .await?;
        Ok(updated.map(Mapping::from).unwrap_or_else(|| Mapping {
            tenant_id: tenant_id.to_string(),
            inventory: inventory.to_vec(),
        }))
    }

    async fn ping(&self) -> Result<(), MappingError> {
        self.database.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }
}
