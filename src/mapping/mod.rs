//! Per-tenant attribute name to field slot mapping

pub mod mapper;
pub mod store;

pub use mapper::Mapper;
pub use store::{Mapping, MappingStore, MongoMappingStore};

use thiserror::Error;

/// Errors from the mapping subsystem
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("mapping store error: {0}")]
    Store(#[from] mongodb::error::Error),
}
