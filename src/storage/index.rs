use crate::errors::{GitError, Result};
use crate::objects::{sha1_digest, ObjectId, ID_RAW_LEN};
use crate::storage::pack::scan_pack;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

pub const IDX_SIGNATURE: [u8; 4] = [0xff, b't', b'O', b'c'];
pub const IDX_VERSION: u32 = 2;
pub const RIDX_SIGNATURE: &[u8; 4] = b"RIDX";
pub const RIDX_VERSION: u32 = 1;
const RIDX_HASH_SHA1: u32 = 1;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;
const FANOUT_ENTRIES: usize = 256;
const IDX_HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 2 * ID_RAW_LEN;

/// One object as recorded by a pack index: identifier, byte offset inside
/// the packfile, and the CRC-32 of its on-disk packed representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: ObjectId,
    pub offset: u64,
    pub crc32: u32,
}

/// Derives the v2 index and v1 reverse index for an unindexed packfile.
///
/// The pack is walked sequentially, hashing every object (deltas are
/// resolved to do so) and accumulating per-record CRC-32 values. Only
/// 32-bit offsets are emitted; a pack needing more is refused.
pub fn generate_index(pack: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let scanned = scan_pack(pack, None)?;
    for s in &scanned {
        if s.offset >= LARGE_OFFSET_FLAG as u64 {
            return Err(GitError::LargeOffsetUnsupported);
        }
    }
    let pack_checksum = &pack[pack.len() - ID_RAW_LEN..];

    // Pack positions reordered by ascending identifier.
    let mut sorted_positions: Vec<usize> = (0..scanned.len()).collect();
    sorted_positions.sort_by_key(|&p| *scanned[p].object.id.as_bytes());

    let idx = write_idx(&scanned, &sorted_positions, pack_checksum)?;
    let ridx = write_ridx(&scanned, &sorted_positions, pack_checksum)?;
    Ok((idx, ridx))
}

fn write_idx(
    scanned: &[crate::storage::pack::ScannedObject],
    sorted_positions: &[usize],
    pack_checksum: &[u8],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&IDX_SIGNATURE);
    out.write_u32::<BigEndian>(IDX_VERSION)?;

    // fanout[i] counts objects whose first identifier byte is <= i.
    let mut fanout = [0u32; FANOUT_ENTRIES];
    for s in scanned {
        fanout[s.object.id.first_byte() as usize] += 1;
    }
    let mut running = 0u32;
    for bucket in fanout.iter_mut() {
        running += *bucket;
        *bucket = running;
    }
    for count in fanout {
        out.write_u32::<BigEndian>(count)?;
    }

    for &p in sorted_positions {
        out.extend_from_slice(scanned[p].object.id.as_bytes());
    }
    for &p in sorted_positions {
        out.write_u32::<BigEndian>(scanned[p].crc32)?;
    }
    for &p in sorted_positions {
        out.write_u32::<BigEndian>(scanned[p].offset as u32)?;
    }

    out.extend_from_slice(pack_checksum);
    let digest = sha1_digest(&out);
    out.extend_from_slice(digest.as_bytes());
    Ok(out)
}

fn write_ridx(
    scanned: &[crate::storage::pack::ScannedObject],
    sorted_positions: &[usize],
    pack_checksum: &[u8],
) -> Result<Vec<u8>> {
    // rank_by_pack_pos[p] is the index-order position of pack object p.
    let mut rank_by_pack_pos = vec![0u32; scanned.len()];
    for (rank, &p) in sorted_positions.iter().enumerate() {
        rank_by_pack_pos[p] = rank as u32;
    }

    let mut out = Vec::new();
    out.extend_from_slice(RIDX_SIGNATURE);
    out.write_u32::<BigEndian>(RIDX_VERSION)?;
    out.write_u32::<BigEndian>(RIDX_HASH_SHA1)?;
    for rank in rank_by_pack_pos {
        out.write_u32::<BigEndian>(rank)?;
    }
    out.extend_from_slice(pack_checksum);
    let digest = sha1_digest(&out);
    out.extend_from_slice(digest.as_bytes());
    Ok(out)
}

/// A parsed v2 pack index.
///
/// Keeps the entries in identifier order together with the fanout table,
/// so a lookup is a binary search bounded to one fanout bucket.
#[derive(Debug)]
pub struct PackIndex {
    fanout: [u32; FANOUT_ENTRIES],
    entries: Vec<IndexEntry>,
    pack_checksum: ObjectId,
}

impl PackIndex {
    /// Parses a v2 pack index, verifying its trailing digest, signature,
    /// version, and fanout monotonicity.
    pub fn parse(idx: &[u8]) -> Result<Self> {
        if idx.len() < IDX_HEADER_LEN + FANOUT_ENTRIES * 4 + TRAILER_LEN {
            return Err(GitError::bad_format("pack index is truncated"));
        }

        let digest = sha1_digest(&idx[..idx.len() - ID_RAW_LEN]);
        let stored = ObjectId::from_bytes(&idx[idx.len() - ID_RAW_LEN..])?;
        if digest != stored {
            return Err(GitError::ChecksumMismatch(format!(
                "index trailer is {stored}, computed {digest}"
            )));
        }

        let mut cursor = Cursor::new(idx);
        let mut signature = [0u8; 4];
        cursor.read_exact(&mut signature)?;
        if signature != IDX_SIGNATURE {
            return Err(GitError::bad_format("pack index has an invalid signature"));
        }
        let version = cursor.read_u32::<BigEndian>()?;
        if version != IDX_VERSION {
            return Err(GitError::UnsupportedVersion {
                expected: IDX_VERSION,
                found: version,
            });
        }

        let mut fanout = [0u32; FANOUT_ENTRIES];
        for bucket in fanout.iter_mut() {
            *bucket = cursor.read_u32::<BigEndian>()?;
        }
        if fanout.windows(2).any(|w| w[0] > w[1]) {
            return Err(GitError::bad_format("pack index fanout is not monotonic"));
        }
        let count = fanout[FANOUT_ENTRIES - 1] as usize;

        let tables_len = count
            .checked_mul(ID_RAW_LEN + 4 + 4)
            .ok_or_else(|| GitError::bad_format("pack index object count overflows"))?;
        if idx.len() < IDX_HEADER_LEN + FANOUT_ENTRIES * 4 + tables_len + TRAILER_LEN {
            return Err(GitError::bad_format("pack index tables are truncated"));
        }

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let mut raw = [0u8; ID_RAW_LEN];
            cursor.read_exact(&mut raw)?;
            ids.push(ObjectId::from_raw(raw));
        }
        if ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GitError::bad_format("pack index identifiers are not sorted"));
        }

        let mut crcs = Vec::with_capacity(count);
        for _ in 0..count {
            crcs.push(cursor.read_u32::<BigEndian>()?);
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let offset = cursor.read_u32::<BigEndian>()?;
            if offset & LARGE_OFFSET_FLAG != 0 {
                return Err(GitError::LargeOffsetUnsupported);
            }
            entries.push(IndexEntry {
                id: ids[i],
                offset: offset as u64,
                crc32: crcs[i],
            });
        }

        let pack_checksum =
            ObjectId::from_bytes(&idx[idx.len() - TRAILER_LEN..idx.len() - ID_RAW_LEN])?;

        Ok(PackIndex {
            fanout,
            entries,
            pack_checksum,
        })
    }

    pub fn object_count(&self) -> usize {
        self.entries.len()
    }

    /// The checksum of the packfile this index describes.
    pub fn pack_checksum(&self) -> ObjectId {
        self.pack_checksum
    }

    /// Finds an entry by identifier: the fanout bounds the bucket of
    /// identifiers sharing the first byte, a binary search does the rest.
    pub fn lookup(&self, id: &ObjectId) -> Option<&IndexEntry> {
        let first = id.first_byte() as usize;
        let low = if first == 0 {
            0
        } else {
            self.fanout[first - 1] as usize
        };
        let high = self.fanout[first] as usize;

        let bucket = &self.entries[low..high];
        bucket
            .binary_search_by(|entry| entry.id.cmp(id))
            .ok()
            .map(|i| &bucket[i])
    }

    /// The entries reordered by pack offset, the order a sequential
    /// object reader wants them in.
    pub fn entries_by_offset(&self) -> Vec<IndexEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|e| e.offset);
        entries
    }
}

/// Parses a v2 pack index, returning its entries sorted by pack offset.
pub fn parse_index(idx: &[u8]) -> Result<Vec<IndexEntry>> {
    Ok(PackIndex::parse(idx)?.entries_by_offset())
}

/// Parses a v1 reverse index, returning for each pack position the
/// index-order position of the object stored there.
pub fn parse_reverse_index(ridx: &[u8]) -> Result<Vec<u32>> {
    if ridx.len() < 12 + TRAILER_LEN {
        return Err(GitError::bad_format("reverse index is truncated"));
    }

    let digest = sha1_digest(&ridx[..ridx.len() - ID_RAW_LEN]);
    let stored = ObjectId::from_bytes(&ridx[ridx.len() - ID_RAW_LEN..])?;
    if digest != stored {
        return Err(GitError::ChecksumMismatch(format!(
            "reverse index trailer is {stored}, computed {digest}"
        )));
    }

    let mut cursor = Cursor::new(ridx);
    let mut signature = [0u8; 4];
    cursor.read_exact(&mut signature)?;
    if &signature != RIDX_SIGNATURE {
        return Err(GitError::bad_format("reverse index has an invalid signature"));
    }
    let version = cursor.read_u32::<BigEndian>()?;
    if version != RIDX_VERSION {
        return Err(GitError::UnsupportedVersion {
            expected: RIDX_VERSION,
            found: version,
        });
    }
    let hash_id = cursor.read_u32::<BigEndian>()?;
    if hash_id != RIDX_HASH_SHA1 {
        return Err(GitError::bad_format(format!(
            "reverse index hash id {hash_id} is not SHA-1"
        )));
    }

    let count = (ridx.len() - 12 - TRAILER_LEN) / 4;
    let mut ranks = Vec::with_capacity(count);
    for _ in 0..count {
        ranks.push(cursor.read_u32::<BigEndian>()?);
    }
    Ok(ranks)
}
