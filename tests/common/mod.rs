//! Shared helpers: synthetic Git objects and packfiles built in memory.
#![allow(dead_code)]

use flate2::write::ZlibEncoder;
use flate2::Compression;
use packfetch::objects::sha1_digest;
use packfetch::{ObjectId, ObjectKind, PackedObject};
use std::io::Write;

pub struct PackEntry {
    pub type_code: u8,
    pub payload: Vec<u8>,
    pub base_entry: Option<usize>,
    pub base_id: Option<ObjectId>,
}

impl PackEntry {
    pub fn plain(kind: ObjectKind, payload: Vec<u8>) -> Self {
        let type_code = match kind {
            ObjectKind::Commit => 1,
            ObjectKind::Tree => 2,
            ObjectKind::Blob => 3,
            ObjectKind::Tag => 4,
            _ => panic!("plain entries only"),
        };
        PackEntry {
            type_code,
            payload,
            base_entry: None,
            base_id: None,
        }
    }

    pub fn ofs_delta(base_entry: usize, instructions: Vec<u8>) -> Self {
        PackEntry {
            type_code: 6,
            payload: instructions,
            base_entry: Some(base_entry),
            base_id: None,
        }
    }

    pub fn ref_delta(base_id: ObjectId, instructions: Vec<u8>) -> Self {
        PackEntry {
            type_code: 7,
            payload: instructions,
            base_entry: None,
            base_id: Some(base_id),
        }
    }
}

/// Assembles a packfile: header, zlib-compressed records, SHA-1 trailer.
pub fn build_pack(entries: &[PackEntry]) -> Vec<u8> {
    let mut pack = Vec::new();
    pack.extend_from_slice(b"PACK");
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&(entries.len() as u32).to_be_bytes());

    let mut offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        let offset = pack.len() as u64;
        offsets.push(offset);

        pack.extend_from_slice(&object_header(entry.type_code, entry.payload.len() as u64));
        if let Some(base) = entry.base_entry {
            pack.extend_from_slice(&base_distance(offset - offsets[base]));
        }
        if let Some(id) = entry.base_id {
            pack.extend_from_slice(id.as_bytes());
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&entry.payload).unwrap();
        pack.extend_from_slice(&encoder.finish().unwrap());
    }

    let trailer = sha1_digest(&pack);
    pack.extend_from_slice(trailer.as_bytes());
    pack
}

fn object_header(type_code: u8, mut size: u64) -> Vec<u8> {
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

fn base_distance(mut distance: u64) -> Vec<u8> {
    let mut out = vec![(distance & 0x7f) as u8];
    distance >>= 7;
    while distance > 0 {
        distance -= 1;
        out.insert(0, 0x80 | (distance & 0x7f) as u8);
        distance >>= 7;
    }
    out
}

/// Serialises tree entries as `mode SP name NUL id20` records.
pub fn tree_payload(entries: &[(&str, &str, ObjectId)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (mode, name, id) in entries {
        out.extend_from_slice(mode.as_bytes());
        out.push(b' ');
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(id.as_bytes());
    }
    out
}

pub fn commit_payload(tree: ObjectId, parents: &[ObjectId], message: &str) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&format!("tree {tree}\n"));
    for parent in parents {
        out.push_str(&format!("parent {parent}\n"));
    }
    out.push_str("author Alice <a@example.com> 1761550977 +0000\n");
    out.push_str("committer Alice <a@example.com> 1761551238 +0000\n\n");
    out.push_str(message);
    out.into_bytes()
}

pub fn blob(contents: &[u8]) -> PackedObject {
    PackedObject::new(ObjectKind::Blob, contents.to_vec())
}
