//! Helpers for building synthetic packfiles in unit tests.

use crate::objects::{sha1_digest, ObjectId};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

pub(crate) struct PackEntrySpec {
    /// Pack type code: 1..=4, 6 (ofs-delta), 7 (ref-delta).
    pub type_code: u8,
    /// Decompressed payload (for deltas, the instruction stream).
    pub payload: Vec<u8>,
    /// For ofs-delta: index of the base entry within the build list.
    pub base_entry: Option<usize>,
    /// For ref-delta: the base identifier.
    pub base_id: Option<ObjectId>,
    /// Overrides the declared decompressed size to forge a corrupt header.
    pub lie_about_size: Option<u64>,
}

impl PackEntrySpec {
    pub fn blob(payload: &[u8]) -> Self {
        PackEntrySpec {
            type_code: 3,
            payload: payload.to_vec(),
            base_entry: None,
            base_id: None,
            lie_about_size: None,
        }
    }

    pub fn object(type_code: u8, payload: Vec<u8>) -> Self {
        PackEntrySpec {
            type_code,
            payload,
            base_entry: None,
            base_id: None,
            lie_about_size: None,
        }
    }

    pub fn ofs_delta(base_entry: usize, instructions: &[u8]) -> Self {
        PackEntrySpec {
            type_code: 6,
            payload: instructions.to_vec(),
            base_entry: Some(base_entry),
            base_id: None,
            lie_about_size: None,
        }
    }

    pub fn ref_delta(base_id: ObjectId, instructions: &[u8]) -> Self {
        PackEntrySpec {
            type_code: 7,
            payload: instructions.to_vec(),
            base_entry: None,
            base_id: Some(base_id),
            lie_about_size: None,
        }
    }
}

/// Assembles a well-formed packfile (header, records, SHA-1 trailer).
pub(crate) fn build_pack(entries: &[PackEntrySpec]) -> Vec<u8> {
    let mut pack = Vec::new();
    pack.extend_from_slice(b"PACK");
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&(entries.len() as u32).to_be_bytes());

    let mut offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        let offset = pack.len() as u64;
        offsets.push(offset);

        let declared = entry.lie_about_size.unwrap_or(entry.payload.len() as u64);
        pack.extend_from_slice(&encode_object_header(entry.type_code, declared));

        if let Some(base) = entry.base_entry {
            pack.extend_from_slice(&encode_base_distance(offset - offsets[base]));
        }
        if let Some(id) = entry.base_id {
            pack.extend_from_slice(id.as_bytes());
        }

        pack.extend_from_slice(&compress(&entry.payload));
    }

    let trailer = sha1_digest(&pack);
    pack.extend_from_slice(trailer.as_bytes());
    pack
}

pub(crate) fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn encode_object_header(type_code: u8, mut size: u64) -> Vec<u8> {
    let mut byte = (type_code << 4) | (size & 0x0f) as u8;
    size >>= 4;
    let mut out = Vec::new();
    while size > 0 {
        out.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.push(byte);
    out
}

fn encode_base_distance(mut distance: u64) -> Vec<u8> {
    let mut out = vec![(distance & 0x7f) as u8];
    distance >>= 7;
    while distance > 0 {
        distance -= 1;
        out.insert(0, 0x80 | (distance & 0x7f) as u8);
        distance >>= 7;
    }
    out
}
