pub mod memory_store;
pub mod migrations;
pub mod record;
pub mod sqlite_store;
pub mod turn_store;

pub use memory_store::InMemoryTurnStore;
pub use record::{StoredTurn, TurnRecord};
pub use sqlite_store::SqliteTurnStore;
pub use turn_store::TurnStore;
