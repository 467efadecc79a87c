//! On-disk format: the fixed file header, the generic TLV record codec
//! and the per-field marshallers.

pub mod header;
pub mod marshal;
pub mod record;

pub use header::{Header, HEADER_LEN};
pub use marshal::{FieldValue, Marshal};
pub use record::{decode_record, encode_record, EntryRecord, FieldOrder, GroupRecord, Record};
