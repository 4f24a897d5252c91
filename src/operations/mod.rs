//! Index mutation and query operations: the FSDBManager-equivalent core,
//! plus the bundle extractor it depends on.

pub mod bundles;
pub mod indexer;

pub use bundles::{BundleExtractor, ZipBundleExtractor};
pub use indexer::{DirListing, Indexer, SearchResult};
