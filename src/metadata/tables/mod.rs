//! Metadata table identifiers, schemas, and the `#~` stream codec.
//!
//! ## Reference
//! * ECMA-335 6th Edition, Partition II, Sections 22 and 24.2.6

mod codedindex;
pub mod schema;
mod tableid;

mod info;
mod stream;

pub use codedindex::CodedIndexType;
pub use info::TableInfo;
pub use stream::{Row, TablesStream};
pub use tableid::{TableId, TABLE_SLOT_COUNT};
