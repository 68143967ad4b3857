pub mod backends;
pub mod client;
pub mod layout;

pub use backends::*;
pub use client::{create_store, ClientType};
pub use layout::{CollectionLayout, StoreEmbedder};

pub mod prelude {
    pub use super::backends::*;
    pub use super::{create_store, ClientType};
    pub use an_core::VectorStore;
}
