//! Durable storage: the registry snapshot and uploaded file contents.

mod blob;
pub mod snapshot;

pub use blob::BlobStore;
pub use snapshot::SnapshotFile;
