pub mod reporting;

pub use reporting::{MappedAttribute, MappedAttributes, Reporting};
