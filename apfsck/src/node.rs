use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek};

use crate::error::{CheckError, Result};
use crate::fletcher;
use crate::object::ObjectHeader;
use crate::Container;

// B-tree node flags (btn_flags)
pub const BTNODE_ROOT: u16 = 0x0001;
pub const BTNODE_LEAF: u16 = 0x0002;
pub const BTNODE_FIXED_KV_SIZE: u16 = 0x0004;

/// Size of the node header that follows the object header.
pub const NODE_HEADER_SIZE: usize = 24;

/// Size of the tree-info footer carried at the tail of root nodes. Data
/// offsets in a root node count backward from the footer, not the block end.
pub const BTREE_INFO_SIZE: usize = 40;

/// Fixed key length in fixed-kv nodes.
const FIXED_KEY_SIZE: usize = 16;
/// Fixed value length in fixed-kv leaves; nonleaf values are child OIDs.
const FIXED_VAL_SIZE: usize = 16;

/// One B-tree node, backed by its own copy of the block.
///
/// The record table, the key area and the value area are addressed through
/// the offsets computed at load time; `locate_key()` and `locate_data()` are
/// the only readers of the table and bounds-check everything they hand out.
#[derive(Debug)]
pub struct Node {
    flags: u16,
    records: u32,
    toc: usize,  // offset of the record table within the block
    key: usize,  // offset where the key area starts
    free: usize, // offset where the free area starts
    data: usize, // offset where the value area starts
    block_nr: u64,
    oid: u64,
    raw: Vec<u8>,
}

impl Node {
    pub fn records(&self) -> u32 {
        self.records
    }

    pub fn block_nr(&self) -> u64 {
        self.block_nr
    }

    pub fn oid(&self) -> u64 {
        self.oid
    }

    pub fn is_root(&self) -> bool {
        self.flags & BTNODE_ROOT != 0
    }

    pub fn is_leaf(&self) -> bool {
        self.flags & BTNODE_LEAF != 0
    }

    pub fn has_fixed_kv_size(&self) -> bool {
        self.flags & BTNODE_FIXED_KV_SIZE != 0
    }

    /// Offset of the key area within the block.
    pub fn key_area_start(&self) -> usize {
        self.key
    }

    /// Offset of the free area between the keys and the values.
    pub fn free_area_start(&self) -> usize {
        self.free
    }

    /// Offset of the value area within the block.
    pub fn data_area_start(&self) -> usize {
        self.data
    }

    /// The raw block bytes. Slices handed out by the locators index into this.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Check basic sanity of the record table.
    ///
    /// Verifies that the key area lies within the block and that the claimed
    /// record count fits in the table space. Without this a crafted image
    /// could pretend to have too many records and push `locate_key()` and
    /// `locate_data()` past the limits of the node.
    fn is_valid(&self) -> bool {
        if self.records == 0 {
            // Empty nodes could keep a multiple query spinning
            return false;
        }
        if self.key > self.raw.len() {
            return false;
        }

        let entry_size = if self.has_fixed_kv_size() { 4 } else { 8 };
        let index_size = self.key - self.toc;
        self.records as usize * entry_size <= index_size
    }

    /// Locate the key of a record.
    ///
    /// Returns the offset of the key within the block and its length, after
    /// checking that the range lies inside the block. Callers may read
    /// exactly `[off, off + len)`.
    pub fn locate_key(&self, index: u32) -> Result<(usize, usize)> {
        if index >= self.records {
            return Err(CheckError::BadRecordIndex(self.block_nr));
        }

        let (off, len) = if self.has_fixed_kv_size() {
            let entry = self.toc + index as usize * 4;
            let key_off = LittleEndian::read_u16(&self.raw[entry..]) as usize;
            // Translate offset in key area to offset in block
            (self.key + key_off, FIXED_KEY_SIZE)
        } else {
            // These node types have variable length keys and values
            let entry = self.toc + index as usize * 8;
            let key_off = LittleEndian::read_u16(&self.raw[entry..]) as usize;
            let key_len = LittleEndian::read_u16(&self.raw[entry + 2..]) as usize;
            (self.key + key_off, key_len)
        };

        if off + len > self.raw.len() {
            return Err(CheckError::KeyOutOfBounds(self.block_nr));
        }
        Ok((off, len))
    }

    /// Locate the value of a record.
    ///
    /// Value offsets count backward from the end of the block, or from the
    /// start of the tree-info footer on root nodes. Returns the offset of
    /// the value within the block and its length, bounds-checked the same
    /// way as `locate_key()`.
    pub fn locate_data(&self, index: u32) -> Result<(usize, usize)> {
        if index >= self.records {
            return Err(CheckError::BadRecordIndex(self.block_nr));
        }

        let data_end = if self.is_root() {
            self.raw.len() - BTREE_INFO_SIZE
        } else {
            self.raw.len()
        };

        let (val_off, len) = if self.has_fixed_kv_size() {
            let entry = self.toc + index as usize * 4;
            let val_off = LittleEndian::read_u16(&self.raw[entry + 2..]) as usize;
            // Node type decides the length
            let len = if self.is_leaf() { FIXED_VAL_SIZE } else { 8 };
            (val_off, len)
        } else {
            let entry = self.toc + index as usize * 8;
            let val_off = LittleEndian::read_u16(&self.raw[entry + 4..]) as usize;
            let val_len = LittleEndian::read_u16(&self.raw[entry + 6..]) as usize;
            (val_off, val_len)
        };

        let off = data_end
            .checked_sub(val_off)
            .ok_or(CheckError::ValueOutOfBounds(self.block_nr))?;
        if off + len > self.raw.len() {
            return Err(CheckError::ValueOutOfBounds(self.block_nr));
        }
        Ok((off, len))
    }
}

/// Read a node from disk and validate its geometry.
///
/// All downstream bounds checks assume the invariants verified here, so this
/// is the only way to obtain a `Node`.
pub fn read_node<R: Read + Seek>(ctr: &mut Container<R>, block_nr: u64) -> Result<Node> {
    let raw = ctr.read_block(block_nr)?;

    if !fletcher::verify_object(&raw) {
        return Err(CheckError::BadChecksum(block_nr));
    }

    let header = ObjectHeader::parse(&raw)?;
    let mut cursor = Cursor::new(&raw[ObjectHeader::SIZE..]);
    let flags = cursor.read_u16::<LittleEndian>()?;
    let _level = cursor.read_u16::<LittleEndian>()?;
    let records = cursor.read_u32::<LittleEndian>()?;
    let table_off = cursor.read_u16::<LittleEndian>()? as usize;
    let table_len = cursor.read_u16::<LittleEndian>()? as usize;
    let free_off = cursor.read_u16::<LittleEndian>()? as usize;
    let free_len = cursor.read_u16::<LittleEndian>()? as usize;

    let toc = ObjectHeader::SIZE + NODE_HEADER_SIZE + table_off;
    let key = toc + table_len;
    let free = key + free_off;
    let data = free + free_len;

    let node = Node {
        flags,
        records,
        toc,
        key,
        free,
        data,
        block_nr,
        oid: header.oid,
        raw,
    };

    if node.records == 0 {
        return Err(CheckError::EmptyNode(block_nr));
    }
    if !node.is_valid() {
        return Err(CheckError::NotSane(block_nr));
    }
    Ok(node)
}
