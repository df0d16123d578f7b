pub mod backend;
pub mod memory;
pub mod query;
pub mod state;

pub use backend::{SortOrder, SortSpec, StoreBackend};
pub use memory::MemoryBackend;
pub use query::QueryExpr;
pub use state::{StateStorage, MAX_SEARCH_SIZE};
