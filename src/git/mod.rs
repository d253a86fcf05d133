//! Git-backed note storage and the note record codec.

mod codec;
mod notes;

pub use codec::{NoteCodec, NoteRecord};
pub use notes::{GitNotes, validate_commitish, validate_namespace_token, validate_path_arg};
