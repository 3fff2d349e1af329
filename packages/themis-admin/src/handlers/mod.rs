//! HTTP endpoint implementations wrapping `AdminFacade` (spec §6).

mod admin_handlers;
mod crud_handlers;
mod ddl_handlers;
pub mod response;
mod query_handlers;
mod request_utils;
mod search_handlers;
mod tx_handlers;

pub use admin_handlers::{changefeed_read, stats};
pub use crud_handlers::{batch_put, delete_entity, get_entity, put_entity};
pub use ddl_handlers::{create_index, drop_index};
pub use query_handlers::execute_aql;
pub use search_handlers::{fulltext_search, fusion_search, vector_search};
pub use tx_handlers::{begin_tx, commit_tx, rollback_tx};
