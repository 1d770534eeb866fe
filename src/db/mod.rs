pub(crate) mod error;
mod memory;
pub(crate) mod models;
mod postgres;
mod repositories;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;
pub use repositories::{Storage, StorageTransaction};
