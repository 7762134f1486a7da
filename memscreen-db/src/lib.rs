pub mod error;
pub mod models;
pub mod store;
pub mod vector;

pub use error::{Error, Result};
pub use store::{mode_str, uuid_v4, MetadataStore};
pub use vector::{collection_name_for_model, VectorFilter, VectorHit, VectorMetadata, VectorSource, VectorStore};
