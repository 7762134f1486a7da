//! memscreen-server wires C9-C13 together: the Recording Orchestrator, the
//! Ingestion Pipeline, the Query Engine, the HTTP API, and the boot/shutdown
//! Supervisor that ties them to the on-disk stores opened by memscreen-core
//! and memscreen-db.

pub mod http;
pub mod ingestion;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod supervisor;
pub mod tracking;
