//! Schema registry: the reference feature schema and the raw layouts it is aligned from.

mod layout;
mod registry;

pub use layout::{LayoutError, RawColumn, RawLayout, KDD99, KDD99_CATEGORICAL, KDD99_COLUMNS};
pub use registry::{ReferenceSchema, SchemaError, UNVERSIONED};
