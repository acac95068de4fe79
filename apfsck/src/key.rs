use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;

use crate::error::{CheckError, Result};

// Catalog record kinds, stored in the top 4 bits of a key's obj_id_and_type
pub const J_TYPE_SNAP_METADATA: u8 = 1;
pub const J_TYPE_EXTENT: u8 = 2;
pub const J_TYPE_INODE: u8 = 3;
pub const J_TYPE_XATTR: u8 = 4;
pub const J_TYPE_SIBLING_LINK: u8 = 5;
pub const J_TYPE_DSTREAM_ID: u8 = 6;
pub const J_TYPE_CRYPTO_STATE: u8 = 7;
pub const J_TYPE_FILE_EXTENT: u8 = 8;
pub const J_TYPE_DIR_REC: u8 = 9;
pub const J_TYPE_DIR_STATS: u8 = 10;
pub const J_TYPE_SNAP_NAME: u8 = 11;
pub const J_TYPE_SIBLING_MAP: u8 = 12;

const OBJ_ID_MASK: u64 = 0x0FFF_FFFF_FFFF_FFFF;
const OBJ_TYPE_SHIFT: u32 = 60;

// Hashed directory-record name field: 10 bits of length, 22 bits of hash
const DREC_LEN_MASK: u32 = 0x0000_03FF;
const DREC_HASH_MASK: u32 = 0xFFFF_F400;
const DREC_HASH_SHIFT: u32 = 10;

/// Size of an omap key on disk: oid followed by xid.
pub const OMAP_KEY_SIZE: usize = 16;

/// A decoded b-tree key.
///
/// Catalog keys carry a per-kind tail: a number for file extents, a name for
/// directory records and xattrs. The name is copied out of the node so a key
/// stays valid after the node that produced it is gone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Key {
    pub id: u64,
    pub kind: u8,
    pub number: u64,
    pub name: Option<String>,
}

impl Key {
    /// Key matching an omap record by object id alone.
    pub fn for_oid(oid: u64) -> Self {
        Key {
            id: oid,
            ..Default::default()
        }
    }

    /// Key matching catalog records of one kind under one object id.
    pub fn for_record(id: u64, kind: u8) -> Self {
        Key {
            id,
            kind,
            ..Default::default()
        }
    }
}

/// Total order on keys: object id, then record kind, then number, then name.
///
/// The name only takes part when both keys carry one; a key whose kind has
/// no name compares equal on that component.
pub fn keycmp(a: &Key, b: &Key) -> Ordering {
    a.id.cmp(&b.id)
        .then(a.kind.cmp(&b.kind))
        .then(a.number.cmp(&b.number))
        .then_with(|| match (&a.name, &b.name) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => Ordering::Equal,
        })
}

/// Decode an omap key: `(oid: u64, xid: u64)`.
///
/// The transaction id is not part of the comparison; the checker accepts
/// whichever transaction a record carries.
pub fn read_omap_key(raw: &[u8]) -> Result<Key> {
    if raw.len() != OMAP_KEY_SIZE {
        return Err(CheckError::InvalidKey(format!(
            "wrong size of omap key: {} bytes",
            raw.len()
        )));
    }
    Ok(Key::for_oid(LittleEndian::read_u64(raw)))
}

/// Decode a catalog key: the common `obj_id_and_type` header followed by a
/// per-kind tail.
pub fn read_cat_key(raw: &[u8]) -> Result<Key> {
    if raw.len() < 8 {
        return Err(CheckError::InvalidKey(format!(
            "catalog key too short: {} bytes",
            raw.len()
        )));
    }
    let id_and_kind = LittleEndian::read_u64(raw);
    let id = id_and_kind & OBJ_ID_MASK;
    let kind = (id_and_kind >> OBJ_TYPE_SHIFT) as u8;

    match kind {
        J_TYPE_DIR_REC => {
            if raw.len() < 12 {
                return Err(CheckError::InvalidKey(
                    "directory record key too short".into(),
                ));
            }
            let len_and_hash = LittleEndian::read_u32(&raw[8..]);
            let name_len = (len_and_hash & DREC_LEN_MASK) as usize;
            let hash = (len_and_hash & DREC_HASH_MASK) >> DREC_HASH_SHIFT;
            let name = read_name(&raw[12..], name_len)?;
            Ok(Key {
                id,
                kind,
                number: hash as u64,
                name: Some(name),
            })
        }
        J_TYPE_FILE_EXTENT => {
            if raw.len() != 16 {
                return Err(CheckError::InvalidKey(format!(
                    "wrong size of file extent key: {} bytes",
                    raw.len()
                )));
            }
            Ok(Key {
                id,
                kind,
                number: LittleEndian::read_u64(&raw[8..]),
                name: None,
            })
        }
        J_TYPE_XATTR | J_TYPE_SNAP_NAME => {
            if raw.len() < 10 {
                return Err(CheckError::InvalidKey("named key too short".into()));
            }
            let name_len = LittleEndian::read_u16(&raw[8..]) as usize;
            let name = read_name(&raw[10..], name_len)?;
            Ok(Key {
                id,
                kind,
                number: 0,
                name: Some(name),
            })
        }
        _ => Ok(Key {
            id,
            kind,
            ..Default::default()
        }),
    }
}

/// Read a null-terminated UTF-8 name; `len` counts the terminator.
fn read_name(raw: &[u8], len: usize) -> Result<String> {
    if len == 0 || len > raw.len() {
        return Err(CheckError::InvalidKey(format!(
            "key name of {} bytes does not fit in {}-byte tail",
            len,
            raw.len()
        )));
    }
    let bytes = &raw[..len];
    if bytes[len - 1] != 0 {
        return Err(CheckError::InvalidKey(
            "key name is not null-terminated".into(),
        ));
    }
    match std::str::from_utf8(&bytes[..len - 1]) {
        Ok(s) => Ok(s.to_string()),
        Err(_) => Err(CheckError::InvalidKey("key name is not UTF-8".into())),
    }
}
