#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod catalog;
pub mod constraint;
pub mod key;
pub mod metadata;
pub mod record;
pub mod supplemental;
pub mod table;
pub mod validity;

pub use catalog::{
    parallax_for_distance_ly, Catalog, QueryMode, DISTANCE_LY_COLUMN, DISTANCE_PC_COLUMN,
    LY_PER_PARSEC, PARALLAX_COLUMNS,
};
pub use constraint::FetchConstraint;
pub use key::{normalize_object_name, table_keys, KeySource};
pub use metadata::{CacheMetadata, DatasetRequest, CACHE_FORMAT_VERSION};
pub use record::{merge_records, DerivedFields, PropertyRecord};
pub use supplemental::{SupplementalCatalog, SupplementalEntry};
pub use table::{Cell, Table, TableError};
pub use validity::{classify, CacheValidity, InvalidReason};
