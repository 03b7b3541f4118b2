pub mod delta;
pub mod index;
pub mod pack;

pub use index::{generate_index, parse_index, IndexEntry, PackIndex};
pub use pack::{decode_packfile, decode_thin_packfile, parse_header, verify_trailer, PackHeader};
