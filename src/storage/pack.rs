use crate::errors::{GitError, Result};
use crate::objects::{sha1_digest, ObjectId, ObjectKind, ObjectStore, PackedObject, ID_RAW_LEN};
use crate::storage::delta::apply_delta;
use crate::storage::index::IndexEntry;
use flate2::read::ZlibDecoder;
use std::collections::HashMap;
use std::io::Read;

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
pub const PACK_HEADER_LEN: usize = 12;
const TRAILER_LEN: usize = ID_RAW_LEN;

/// The fixed packfile header: signature, version, object count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackHeader {
    pub version: u32,
    pub object_count: u32,
}

/// Parses and validates the 12-byte packfile header.
pub fn parse_header(data: &[u8]) -> Result<PackHeader> {
    if data.len() < PACK_HEADER_LEN {
        return Err(GitError::bad_format("packfile is shorter than its header"));
    }
    if &data[..4] != PACK_SIGNATURE {
        return Err(GitError::bad_format("packfile does not start with PACK"));
    }
    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if version != PACK_VERSION {
        return Err(GitError::UnsupportedVersion {
            expected: PACK_VERSION,
            found: version,
        });
    }
    let object_count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    Ok(PackHeader {
        version,
        object_count,
    })
}

/// Verifies the trailing SHA-1 over every preceding byte and returns it.
///
/// Verification is a precondition for trusting any object in the pack.
pub fn verify_trailer(data: &[u8]) -> Result<ObjectId> {
    if data.len() < PACK_HEADER_LEN + TRAILER_LEN {
        return Err(GitError::bad_format("packfile is too short to carry a trailer"));
    }
    let expected = ObjectId::from_bytes(&data[data.len() - TRAILER_LEN..])?;
    let actual = sha1_digest(&data[..data.len() - TRAILER_LEN]);
    if actual != expected {
        return Err(GitError::ChecksumMismatch(format!(
            "pack trailer is {expected}, computed {actual}"
        )));
    }
    Ok(expected)
}

/// An object as it came off the pack stream, with its on-disk location.
#[derive(Debug, Clone)]
pub(crate) struct ScannedObject {
    pub offset: u64,
    /// First byte past the record's compressed payload.
    pub end: u64,
    pub crc32: u32,
    pub object: PackedObject,
}

#[derive(Debug, Clone, Copy)]
enum RawBase {
    Offset(u64),
    Id(ObjectId),
}

struct RawRecord {
    offset: u64,
    end: u64,
    crc32: u32,
    kind: ObjectKind,
    payload: Vec<u8>,
    base: Option<RawBase>,
}

/// Decodes every object of a packfile into materialised form.
///
/// With `index` entries supplied, each object's on-disk extent and
/// identifier are checked against the index (the extent of an object ends
/// where the next one starts, or at the trailer for the last). Without an
/// index the stream is walked sequentially, learning each compressed
/// length from the inflater's consumed-input count.
pub fn decode_packfile(data: &[u8], index: Option<&[IndexEntry]>) -> Result<Vec<PackedObject>> {
    let scanned = scan_pack(data, None)?;
    if let Some(entries) = index {
        check_against_index(data, &scanned, entries)?;
    }
    Ok(scanned.into_iter().map(|s| s.object).collect())
}

/// Decodes a thin pack, resolving `RefDelta` bases that are absent from
/// the pack itself out of `bases`.
pub fn decode_thin_packfile(data: &[u8], bases: &ObjectStore) -> Result<Vec<PackedObject>> {
    let scanned = scan_pack(data, Some(bases))?;
    Ok(scanned.into_iter().map(|s| s.object).collect())
}

/// Sequentially walks the pack, inflating every record and resolving all
/// deltas. The central routine behind decoding and index generation.
pub(crate) fn scan_pack(data: &[u8], bases: Option<&ObjectStore>) -> Result<Vec<ScannedObject>> {
    let header = parse_header(data)?;
    verify_trailer(data)?;
    let payload_end = data.len() - TRAILER_LEN;

    let mut raws: Vec<RawRecord> = Vec::with_capacity(header.object_count as usize);
    let mut by_offset: HashMap<u64, usize> = HashMap::new();
    let mut pos = PACK_HEADER_LEN;

    for _ in 0..header.object_count {
        let offset = pos as u64;
        let (kind, declared_size) = read_object_header(data, &mut pos, payload_end)?;

        let base = match kind {
            ObjectKind::OfsDelta => {
                let distance = read_base_distance(data, &mut pos, payload_end)?;
                let base_offset = offset.checked_sub(distance).ok_or_else(|| {
                    GitError::bad_format("ofs-delta base lies before the start of the pack")
                })?;
                Some(RawBase::Offset(base_offset))
            }
            ObjectKind::RefDelta => {
                if pos + ID_RAW_LEN > payload_end {
                    return Err(GitError::bad_format("truncated ref-delta base identifier"));
                }
                let id = ObjectId::from_bytes(&data[pos..pos + ID_RAW_LEN])?;
                pos += ID_RAW_LEN;
                Some(RawBase::Id(id))
            }
            _ => None,
        };

        let (payload, consumed) = inflate(&data[pos..payload_end], declared_size)?;
        pos += consumed;

        let crc32 = crc32fast::hash(&data[offset as usize..pos]);
        raws.push(RawRecord {
            offset,
            end: pos as u64,
            crc32,
            kind,
            payload,
            base,
        });
        by_offset.insert(offset, raws.len() - 1);
    }

    if pos != payload_end {
        return Err(GitError::bad_format(format!(
            "pack stream ends at byte {pos} but the trailer starts at {payload_end}"
        )));
    }

    let resolved = resolve_deltas(&mut raws, &by_offset, bases)?;

    Ok(raws
        .iter()
        .zip(resolved)
        .map(|(raw, object)| ScannedObject {
            offset: raw.offset,
            end: raw.end,
            crc32: raw.crc32,
            object,
        })
        .collect())
}

/// Resolves every delta record against its base, memoised by pack offset.
///
/// Plain records materialise directly. Delta records are swept repeatedly:
/// each sweep resolves those whose base has become available, so chains of
/// any depth settle without recursion. A sweep that makes no progress
/// means a base is genuinely missing.
fn resolve_deltas(
    raws: &mut [RawRecord],
    by_offset: &HashMap<u64, usize>,
    bases: Option<&ObjectStore>,
) -> Result<Vec<PackedObject>> {
    let mut resolved: Vec<Option<PackedObject>> = vec![None; raws.len()];
    let mut by_id: HashMap<ObjectId, usize> = HashMap::new();
    let mut remaining = raws.len();

    for (i, raw) in raws.iter_mut().enumerate() {
        if raw.base.is_none() {
            let object = PackedObject::new(raw.kind, std::mem::take(&mut raw.payload));
            by_id.insert(object.id, i);
            resolved[i] = Some(object);
            remaining -= 1;
        }
    }

    while remaining > 0 {
        let mut progressed = false;

        for i in 0..raws.len() {
            if resolved[i].is_some() {
                continue;
            }
            let base = match raws[i].base {
                Some(base) => base,
                None => continue,
            };

            let produced = match base {
                RawBase::Offset(off) => {
                    let j = *by_offset.get(&off).ok_or_else(|| {
                        GitError::bad_format(format!(
                            "ofs-delta base offset {off} does not start an object"
                        ))
                    })?;
                    match &resolved[j] {
                        Some(b) => Some((b.kind, apply_delta(&b.data, &raws[i].payload)?)),
                        None => None,
                    }
                }
                RawBase::Id(id) => {
                    if let Some(&j) = by_id.get(&id) {
                        match &resolved[j] {
                            Some(b) => Some((b.kind, apply_delta(&b.data, &raws[i].payload)?)),
                            None => None,
                        }
                    } else if let Some(b) = bases.and_then(|store| store.get(&id)) {
                        Some((b.kind, apply_delta(&b.data, &raws[i].payload)?))
                    } else {
                        None
                    }
                }
            };

            if let Some((kind, data)) = produced {
                let object = PackedObject::new(kind, data);
                by_id.insert(object.id, i);
                resolved[i] = Some(object);
                raws[i].payload = Vec::new();
                remaining -= 1;
                progressed = true;
            }
        }

        if !progressed {
            let stuck = raws
                .iter()
                .enumerate()
                .find(|(i, _)| resolved[*i].is_none())
                .map(|(_, raw)| match raw.base {
                    Some(RawBase::Id(id)) => id.to_hex(),
                    Some(RawBase::Offset(off)) => format!("at pack offset {off}"),
                    None => "unknown".to_string(),
                })
                .unwrap_or_else(|| "unknown".to_string());
            return Err(GitError::UnresolvedDelta(stuck));
        }
    }

    Ok(resolved.into_iter().map(|o| o.expect("all records resolved")).collect())
}

/// Checks each scanned record against a companion index: the identifier at
/// every indexed offset must match, and each record must end exactly where
/// the next indexed object begins.
fn check_against_index(data: &[u8], scanned: &[ScannedObject], entries: &[IndexEntry]) -> Result<()> {
    if entries.len() != scanned.len() {
        return Err(GitError::bad_format(format!(
            "index lists {} objects but the pack holds {}",
            entries.len(),
            scanned.len()
        )));
    }

    let mut by_offset: Vec<&IndexEntry> = entries.iter().collect();
    by_offset.sort_by_key(|e| e.offset);
    let payload_end = (data.len() - TRAILER_LEN) as u64;

    for (pos, entry) in by_offset.iter().enumerate() {
        let scan = scanned
            .iter()
            .find(|s| s.offset == entry.offset)
            .ok_or_else(|| {
                GitError::bad_format(format!("index offset {} does not start an object", entry.offset))
            })?;
        let expected_end = by_offset
            .get(pos + 1)
            .map(|next| next.offset)
            .unwrap_or(payload_end);
        if scan.end != expected_end {
            return Err(GitError::bad_format(format!(
                "object at offset {} ends at {} but the index expects {}",
                entry.offset, scan.end, expected_end
            )));
        }
        if scan.object.id != entry.id {
            return Err(GitError::ChecksumMismatch(format!(
                "object at offset {} hashes to {}, index says {}",
                entry.offset, scan.object.id, entry.id
            )));
        }
    }
    Ok(())
}

/// Inflates one zlib stream, returning the payload and the exact number of
/// input bytes the inflater consumed.
fn inflate(input: &[u8], declared_size: u64) -> Result<(Vec<u8>, usize)> {
    let mut decoder = ZlibDecoder::new(input);
    let mut payload = Vec::new();
    decoder
        .read_to_end(&mut payload)
        .map_err(|e| GitError::bad_format(format!("zlib inflate failed: {e}")))?;
    if payload.len() as u64 != declared_size {
        return Err(GitError::bad_format(format!(
            "object inflates to {} bytes, header declares {declared_size}",
            payload.len()
        )));
    }
    Ok((payload, decoder.total_in() as usize))
}

/// Reads a packed-object header: kind in bits 6..4 of the first byte, then
/// the decompressed size in 4 + 7·k bits, little-endian in shift order.
fn read_object_header(data: &[u8], pos: &mut usize, end: usize) -> Result<(ObjectKind, u64)> {
    let mut byte = read_byte(data, pos, end)?;
    let kind = ObjectKind::from_pack_code((byte >> 4) & 0x07)?;
    let mut size = (byte & 0x0f) as u64;
    let mut shift = 4u32;
    while byte & 0x80 != 0 {
        byte = read_byte(data, pos, end)?;
        if shift > 63 {
            return Err(GitError::bad_format("object size varint is too large"));
        }
        size |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
    }
    Ok((kind, size))
}

/// Reads the ofs-delta distance: `n0 + (n1+1)·2^7 + (n2+1)·2^14 + …`.
fn read_base_distance(data: &[u8], pos: &mut usize, end: usize) -> Result<u64> {
    let mut byte = read_byte(data, pos, end)?;
    let mut value = (byte & 0x7f) as u64;
    while byte & 0x80 != 0 {
        byte = read_byte(data, pos, end)?;
        if value > (u64::MAX >> 7) - 1 {
            return Err(GitError::bad_format("ofs-delta distance varint is too large"));
        }
        value = ((value + 1) << 7) | (byte & 0x7f) as u64;
    }
    Ok(value)
}

fn read_byte(data: &[u8], pos: &mut usize, end: usize) -> Result<u8> {
    if *pos >= end {
        return Err(GitError::bad_format("unexpected end of packfile"));
    }
    let byte = data[*pos];
    *pos += 1;
    Ok(byte)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{build_pack, PackEntrySpec};

    #[test]
    fn test_parse_header_fields() {
        let bytes = [
            0x50, 0x41, 0x43, 0x4b, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x06,
        ];
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.object_count, 6);
    }

    #[test]
    fn test_parse_header_rejects_bad_signature_and_version() {
        let mut bytes = *b"KCAP\x00\x00\x00\x02\x00\x00\x00\x01";
        assert!(matches!(parse_header(&bytes), Err(GitError::BadFormat(_))));
        bytes[..4].copy_from_slice(b"PACK");
        bytes[7] = 3;
        assert!(matches!(
            parse_header(&bytes),
            Err(GitError::UnsupportedVersion { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn test_trailer_verification_detects_any_flipped_byte() {
        let pack = build_pack(&[PackEntrySpec::blob(b"hello, world\n")]);
        assert!(verify_trailer(&pack).is_ok());

        for i in 0..pack.len() - 20 {
            let mut corrupted = pack.clone();
            corrupted[i] ^= 0x01;
            assert!(
                matches!(verify_trailer(&corrupted), Err(GitError::ChecksumMismatch(_))),
                "flipping byte {i} went undetected"
            );
        }
    }

    #[test]
    fn test_decode_plain_objects() {
        let pack = build_pack(&[
            PackEntrySpec::blob(b"ABCDEFGH"),
            PackEntrySpec::blob(b"second blob\n"),
        ]);
        let objects = decode_packfile(&pack, None).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].kind, ObjectKind::Blob);
        assert_eq!(objects[0].data, b"ABCDEFGH");
        assert_eq!(objects[0].id, crate::objects::object_id_for(ObjectKind::Blob, b"ABCDEFGH"));
        assert_eq!(objects[1].data, b"second blob\n");
    }

    #[test]
    fn test_decode_is_referentially_transparent() {
        let pack = build_pack(&[
            PackEntrySpec::blob(b"ABCDEFGH"),
            PackEntrySpec::ofs_delta(0, &[0x08, 0x0b, 0x91, 0x00, 0x08, 0x03, b'X', b'Y', b'Z']),
        ]);
        let first = decode_packfile(&pack, None).unwrap();
        let second = decode_packfile(&pack, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_resolves_ofs_delta_chain() {
        // Entry 1 deltas on entry 0, entry 2 deltas on entry 1.
        let pack = build_pack(&[
            PackEntrySpec::blob(b"ABCDEFGH"),
            PackEntrySpec::ofs_delta(0, &[0x08, 0x0b, 0x91, 0x00, 0x08, 0x03, b'X', b'Y', b'Z']),
            PackEntrySpec::ofs_delta(1, &[0x0b, 0x03, 0x91, 0x08, 0x03]),
        ]);
        let objects = decode_packfile(&pack, None).unwrap();
        assert_eq!(objects[1].data, b"ABCDEFGHXYZ");
        assert_eq!(objects[1].kind, ObjectKind::Blob);
        assert_eq!(objects[2].data, b"XYZ");
    }

    #[test]
    fn test_ofs_delta_with_a_multibyte_distance() {
        // An incompressible filler object pushes the delta more than 127
        // bytes past its base, forcing the biased two-byte distance form.
        let mut state = 0x2545f491u32;
        let noise: Vec<u8> = (0..600)
            .map(|_| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                (state >> 16) as u8
            })
            .collect();

        let mut delta = vec![0x08, 0x0b, 0x91, 0x00, 0x08, 0x03];
        delta.extend_from_slice(b"XYZ");
        let pack = build_pack(&[
            PackEntrySpec::blob(b"ABCDEFGH"),
            PackEntrySpec::blob(&noise),
            PackEntrySpec::ofs_delta(0, &delta),
        ]);
        let objects = decode_packfile(&pack, None).unwrap();
        assert_eq!(objects[2].data, b"ABCDEFGHXYZ");
    }

    #[test]
    fn test_decode_resolves_ref_delta_within_pack() {
        let base_id = crate::objects::object_id_for(ObjectKind::Blob, b"ABCDEFGH");
        let pack = build_pack(&[
            PackEntrySpec::blob(b"ABCDEFGH"),
            PackEntrySpec::ref_delta(base_id, &[0x08, 0x03, 0x91, 0x00, 0x03]),
        ]);
        let objects = decode_packfile(&pack, None).unwrap();
        assert_eq!(objects[1].data, b"ABC");
    }

    #[test]
    fn test_thin_pack_needs_supplied_bases() {
        let mut store = ObjectStore::new();
        let base = PackedObject::new(ObjectKind::Blob, b"ABCDEFGH".to_vec());
        let base_id = base.id;
        store.insert(base).unwrap();

        let pack = build_pack(&[PackEntrySpec::ref_delta(
            base_id,
            &[0x08, 0x03, 0x91, 0x05, 0x03],
        )]);

        let err = decode_packfile(&pack, None).unwrap_err();
        assert!(matches!(err, GitError::UnresolvedDelta(id) if id == base_id.to_hex()));

        let objects = decode_thin_packfile(&pack, &store).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].data, b"FGH");
    }

    #[test]
    fn test_declared_size_must_match_inflated_length() {
        let mut spec = PackEntrySpec::blob(b"ABCDEFGH");
        spec.lie_about_size = Some(9);
        let pack = build_pack(&[spec]);
        assert!(matches!(decode_packfile(&pack, None), Err(GitError::BadFormat(_))));
    }

    #[test]
    fn test_indexed_decode_checks_identifiers() {
        let pack = build_pack(&[PackEntrySpec::blob(b"ABCDEFGH")]);
        let scanned = scan_pack(&pack, None).unwrap();
        let good = vec![IndexEntry {
            id: scanned[0].object.id,
            offset: scanned[0].offset,
            crc32: scanned[0].crc32,
        }];
        assert!(decode_packfile(&pack, Some(&good)).is_ok());

        let mut bad = good;
        bad[0].id = ObjectId::from_raw([0x42; 20]);
        assert!(matches!(
            decode_packfile(&pack, Some(&bad)),
            Err(GitError::ChecksumMismatch(_))
        ));
    }
}
