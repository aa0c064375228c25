//! apptest-kio: resource streams in and out of functions
//!
//! - [`codec`]: decode/encode multi-document YAML, `ResourceList` envelope
//! - [`resource`]: `Resource` records and their provenance annotations
//! - [`output`]: route function output to stdout, unwrapped, or a directory
//! - [`error`]: `KioError` / `KioResult`

pub mod codec;
mod emit;
pub mod error;
pub mod output;
pub mod resource;

pub use codec::{decode, detect_seq_indent, encode, encode_resource_list, ResourceStream};
pub use error::{KioError, KioResult};
pub use output::{check_directory_not_present, deliver, write_to_directory, Destination};
pub use resource::{Provenance, Resource, SeqIndent};
