pub mod blobs;
pub mod registry;
