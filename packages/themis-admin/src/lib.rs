//! Admin facade: the library-first API every transport (HTTP, CLI,
//! `themis-bench`) calls into, plus the DTO conversions and transaction-aware
//! query reader it's built from (spec §6).

pub mod dto;
pub mod facade;
pub mod handlers;
pub mod router;
pub mod server;
mod tx_reader;

pub use facade::AdminFacade;

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
