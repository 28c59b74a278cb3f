//! Infrastructure layer: storage, inventory ledger, settlement orchestration.
//!
//! Domain crates stay pure; everything that touches a lock, a database or a
//! payment provider lives here behind traits so in-memory and Postgres
//! backends are interchangeable.

pub mod config;
pub mod ledger;
pub mod retry;
pub mod settlement;
pub mod store;
