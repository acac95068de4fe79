use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek};

use crate::error::{CheckError, Result};
use crate::fletcher;
use crate::key::Key;
use crate::node::Node;
use crate::object::ObjectHeader;
use crate::query::{btree_query, Query, TreeFlavor};
use crate::Container;

/// An omap leaf record value: `(flags: u32, size: u32, paddr: u64)`.
#[derive(Debug, Clone)]
pub struct OmapVal {
    pub flags: u32,
    pub size: u32,
    pub paddr: u64,
}

impl OmapVal {
    pub const SIZE: usize = 16;

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(raw);
        Ok(OmapVal {
            flags: cursor.read_u32::<LittleEndian>()?,
            size: cursor.read_u32::<LittleEndian>()?,
            paddr: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Read the omap object stored at block `oid` and return the block number
/// of its b-tree root.
///
/// Omap objects are physical, so the oid doubles as the block number; the
/// header must agree.
pub fn read_omap_object<R: Read + Seek>(ctr: &mut Container<R>, oid: u64) -> Result<u64> {
    let raw = ctr.read_block(oid)?;

    if !fletcher::verify_object(&raw) {
        return Err(CheckError::BadChecksum(oid));
    }
    let header = ObjectHeader::parse(&raw)?;
    if header.oid != oid {
        return Err(CheckError::WrongObjectId(oid));
    }

    // omap_phys layout after the object header:
    //   om_flags: u32, om_snap_count: u32,
    //   om_tree_type: u32, om_snapshot_tree_type: u32,
    //   om_tree_oid: u64  <- b-tree root, physical
    let mut cursor = Cursor::new(&raw[ObjectHeader::SIZE..]);
    let _om_flags = cursor.read_u32::<LittleEndian>()?;
    let _om_snap_count = cursor.read_u32::<LittleEndian>()?;
    let _om_tree_type = cursor.read_u32::<LittleEndian>()?;
    let _om_snap_tree_type = cursor.read_u32::<LittleEndian>()?;
    let om_tree_oid = cursor.read_u64::<LittleEndian>()?;

    Ok(om_tree_oid)
}

/// Read the block number out of a successful omap query.
fn bno_from_query(query: &Query) -> Result<u64> {
    let (_, len) = query.value_range();
    if len != OmapVal::SIZE {
        return Err(CheckError::BadOmapValue(query.node().block_nr()));
    }
    Ok(OmapVal::parse(query.value())?.paddr)
}

/// Find the block number of a b-tree node from its object id.
///
/// The object map must be total for every referenced oid, so a missing
/// record is corruption, not a negative result.
pub fn omap_lookup_block<R: Read + Seek>(
    ctr: &mut Container<R>,
    omap_root: &Node,
    oid: u64,
) -> Result<u64> {
    let query = Query::exact(omap_root, Key::for_oid(oid), TreeFlavor::Omap);

    let query = match btree_query(ctr, query) {
        Ok(query) => query,
        // Omap queries shouldn't fail
        Err(CheckError::NotFound) => return Err(CheckError::OmapRecordMissing(oid)),
        Err(err) => return Err(err),
    };

    bno_from_query(&query)
}
