//! Knowledge graph persistence: fingerprints, action graphs, findings,
//! repair edges.

pub mod schema;
pub mod store;

pub use store::{GraphRepository, RepairRecord, SimilarFingerprint};
