//! Builder for synthetic APFS images, so the tests need no fixture file.
//!
//! Blocks are laid out the way the on-disk writer packs them: the record
//! table right after the node header, keys growing forward from the key
//! area, values growing backward from the block end (or from the tree-info
//! footer on root nodes), and a Fletcher-64 seal over every object.

#![allow(dead_code)]

use std::io::Cursor;

use apfsck::fletcher;
use apfsck::key::{J_TYPE_FILE_EXTENT, J_TYPE_INODE};
use apfsck::node::{BTNODE_FIXED_KV_SIZE, BTNODE_LEAF, BTNODE_ROOT, BTREE_INFO_SIZE};
use apfsck::object::{
    OBJECT_TYPE_BTREE, OBJECT_TYPE_BTREE_NODE, OBJECT_TYPE_FS, OBJECT_TYPE_NX_SUPERBLOCK,
    OBJECT_TYPE_OMAP,
};
use apfsck::Container;

pub const BLOCK_SIZE: usize = 4096;

const OBJECT_HEADER_SIZE: usize = 32;
const NODE_HEADER_SIZE: usize = 24;

pub struct NodeSpec {
    pub oid: u64,
    pub flags: u16,
    pub level: u16,
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl NodeSpec {
    pub fn leaf(oid: u64, flags: u16, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        NodeSpec {
            oid,
            flags: flags | BTNODE_LEAF,
            level: 0,
            entries,
        }
    }

    pub fn internal(oid: u64, flags: u16, level: u16, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        NodeSpec {
            oid,
            flags,
            level,
            entries,
        }
    }
}

pub struct Image {
    data: Vec<u8>,
}

impl Image {
    pub fn new(nblocks: u64) -> Self {
        Image {
            data: vec![0u8; nblocks as usize * BLOCK_SIZE],
        }
    }

    pub fn block_mut(&mut self, bno: u64) -> &mut [u8] {
        let start = bno as usize * BLOCK_SIZE;
        &mut self.data[start..start + BLOCK_SIZE]
    }

    /// Recompute the object checksum of a block after patching it.
    pub fn seal(&mut self, bno: u64) {
        fletcher::seal_object(self.block_mut(bno));
    }

    /// Overwrite bytes within a block without resealing.
    pub fn patch(&mut self, bno: u64, offset: usize, bytes: &[u8]) {
        self.block_mut(bno)[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn into_container(self) -> Container<Cursor<Vec<u8>>> {
        Container::new(Cursor::new(self.data), BLOCK_SIZE as u32)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn write_object_header(&mut self, bno: u64, oid: u64, object_type: u32, subtype: u32) {
        let block = self.block_mut(bno);
        block[8..16].copy_from_slice(&oid.to_le_bytes());
        block[16..24].copy_from_slice(&1u64.to_le_bytes()); // xid
        block[24..28].copy_from_slice(&object_type.to_le_bytes());
        block[28..32].copy_from_slice(&subtype.to_le_bytes());
    }

    /// Lay out one b-tree node and seal it.
    pub fn write_node(&mut self, bno: u64, spec: &NodeSpec) {
        let is_root = spec.flags & BTNODE_ROOT != 0;
        let fixed = spec.flags & BTNODE_FIXED_KV_SIZE != 0;
        let entry_size = if fixed { 4 } else { 8 };
        let nkeys = spec.entries.len();

        let object_type = if is_root {
            OBJECT_TYPE_BTREE
        } else {
            OBJECT_TYPE_BTREE_NODE
        };
        self.write_object_header(bno, spec.oid, object_type, 0);

        let table_len = nkeys * entry_size;
        let key_area = OBJECT_HEADER_SIZE + NODE_HEADER_SIZE + table_len;
        let data_end = if is_root {
            BLOCK_SIZE - BTREE_INFO_SIZE
        } else {
            BLOCK_SIZE
        };

        let mut key_off = 0usize;
        let mut val_off = 0usize;

        for (i, (key, val)) in spec.entries.iter().enumerate() {
            if fixed {
                assert_eq!(key.len(), 16, "fixed-kv keys are 16 bytes");
            }
            val_off += val.len();

            let entry = OBJECT_HEADER_SIZE + NODE_HEADER_SIZE + i * entry_size;
            let block = self.block_mut(bno);
            if fixed {
                block[entry..entry + 2].copy_from_slice(&(key_off as u16).to_le_bytes());
                block[entry + 2..entry + 4].copy_from_slice(&(val_off as u16).to_le_bytes());
            } else {
                block[entry..entry + 2].copy_from_slice(&(key_off as u16).to_le_bytes());
                block[entry + 2..entry + 4].copy_from_slice(&(key.len() as u16).to_le_bytes());
                block[entry + 4..entry + 6].copy_from_slice(&(val_off as u16).to_le_bytes());
                block[entry + 6..entry + 8].copy_from_slice(&(val.len() as u16).to_le_bytes());
            }

            block[key_area + key_off..key_area + key_off + key.len()].copy_from_slice(key);
            let val_start = data_end - val_off;
            block[val_start..val_start + val.len()].copy_from_slice(val);

            key_off += key.len();
        }

        let free_start = key_area + key_off;
        let free_len = (data_end - val_off) - free_start;

        let header = self.block_mut(bno);
        let h = OBJECT_HEADER_SIZE;
        header[h..h + 2].copy_from_slice(&spec.flags.to_le_bytes());
        header[h + 2..h + 4].copy_from_slice(&spec.level.to_le_bytes());
        header[h + 4..h + 8].copy_from_slice(&(nkeys as u32).to_le_bytes());
        // table_space: off 0, len = nkeys * entry_size (packed, no slack)
        header[h + 8..h + 10].copy_from_slice(&0u16.to_le_bytes());
        header[h + 10..h + 12].copy_from_slice(&(table_len as u16).to_le_bytes());
        // free_space, relative to the key area
        header[h + 12..h + 14].copy_from_slice(&(key_off as u16).to_le_bytes());
        header[h + 14..h + 16].copy_from_slice(&(free_len as u16).to_le_bytes());
        // key/val free lists stay empty

        if is_root {
            let info = BLOCK_SIZE - BTREE_INFO_SIZE;
            let block = self.block_mut(bno);
            block[info + 4..info + 8].copy_from_slice(&(BLOCK_SIZE as u32).to_le_bytes());
            if fixed {
                block[info + 8..info + 12].copy_from_slice(&16u32.to_le_bytes());
                block[info + 12..info + 16].copy_from_slice(&16u32.to_le_bytes());
            }
            block[info + 24..info + 32].copy_from_slice(&(nkeys as u64).to_le_bytes());
            block[info + 32..info + 40].copy_from_slice(&1u64.to_le_bytes());
        }

        self.seal(bno);
    }

    /// Lay out the omap object pointing at its b-tree root and seal it.
    pub fn write_omap_object(&mut self, bno: u64, tree_bno: u64) {
        self.write_object_header(bno, bno, OBJECT_TYPE_OMAP, 0);
        let block = self.block_mut(bno);
        let h = OBJECT_HEADER_SIZE;
        // om_flags, om_snap_count, om_tree_type, om_snapshot_tree_type
        block[h + 8..h + 12].copy_from_slice(&OBJECT_TYPE_BTREE.to_le_bytes());
        block[h + 16..h + 24].copy_from_slice(&tree_bno.to_le_bytes());
        self.seal(bno);
    }

    /// Lay out the container superblock in block 0 and seal it.
    pub fn write_nx_superblock(&mut self, block_count: u64, omap_oid: u64, vol_oid: u64) {
        self.write_object_header(0, 1, OBJECT_TYPE_NX_SUPERBLOCK, 0);
        let block = self.block_mut(0);
        block[32..36].copy_from_slice(&0x4253584Eu32.to_le_bytes()); // NXSB
        block[36..40].copy_from_slice(&(BLOCK_SIZE as u32).to_le_bytes());
        block[40..48].copy_from_slice(&block_count.to_le_bytes());
        // checkpoint descriptor area left empty: the block-0 copy is current
        block[160..168].copy_from_slice(&omap_oid.to_le_bytes());
        block[180..184].copy_from_slice(&1u32.to_le_bytes()); // max_file_systems
        block[184..192].copy_from_slice(&vol_oid.to_le_bytes());
        self.seal(0);
    }

    /// Lay out a volume superblock and seal it.
    pub fn write_volume_superblock(
        &mut self,
        bno: u64,
        oid: u64,
        omap_oid: u64,
        root_tree_oid: u64,
        name: &str,
    ) {
        self.write_object_header(bno, oid, OBJECT_TYPE_FS, 0);
        let block = self.block_mut(bno);
        block[32..36].copy_from_slice(&0x42535041u32.to_le_bytes()); // APSB
        block[128..136].copy_from_slice(&omap_oid.to_le_bytes());
        block[136..144].copy_from_slice(&root_tree_oid.to_le_bytes());
        block[184..192].copy_from_slice(&2u64.to_le_bytes()); // num_files
        block[192..200].copy_from_slice(&1u64.to_le_bytes()); // num_directories
        block[704..704 + name.len()].copy_from_slice(name.as_bytes());
        self.seal(bno);
    }
}

// ---- record encoding helpers ----

/// 16-byte omap key: oid followed by xid.
pub fn omap_key(oid: u64, xid: u64) -> Vec<u8> {
    let mut raw = Vec::with_capacity(16);
    raw.extend_from_slice(&oid.to_le_bytes());
    raw.extend_from_slice(&xid.to_le_bytes());
    raw
}

/// 16-byte omap value: flags, size, paddr.
pub fn omap_val(paddr: u64) -> Vec<u8> {
    let mut raw = Vec::with_capacity(16);
    raw.extend_from_slice(&0u32.to_le_bytes());
    raw.extend_from_slice(&(BLOCK_SIZE as u32).to_le_bytes());
    raw.extend_from_slice(&paddr.to_le_bytes());
    raw
}

/// 8-byte child pointer stored in nonleaf records.
pub fn child_val(oid: u64) -> Vec<u8> {
    oid.to_le_bytes().to_vec()
}

/// Catalog key header: 60 bits of object id, 4 bits of record kind.
pub fn cat_key(id: u64, kind: u8) -> Vec<u8> {
    ((kind as u64) << 60 | id).to_le_bytes().to_vec()
}

/// 16-byte file-extent key: header plus logical address.
pub fn extent_key(id: u64, addr: u64) -> Vec<u8> {
    let mut raw = cat_key(id, J_TYPE_FILE_EXTENT);
    raw.extend_from_slice(&addr.to_le_bytes());
    raw
}

/// Inode key: the bare header.
pub fn inode_key(id: u64) -> Vec<u8> {
    cat_key(id, J_TYPE_INODE)
}

/// A small omap image: two-level tree, root at `root_bno`, one leaf at
/// `leaf_bno`, mapping each `(oid, paddr)` pair given.
pub fn two_level_omap(
    image: &mut Image,
    root_bno: u64,
    leaf_bno: u64,
    mappings: &[(u64, u64)],
) {
    let first_oid = mappings.first().expect("at least one mapping").0;
    image.write_node(
        leaf_bno,
        &NodeSpec::leaf(
            leaf_bno,
            BTNODE_FIXED_KV_SIZE,
            mappings
                .iter()
                .map(|&(oid, paddr)| (omap_key(oid, 1), omap_val(paddr)))
                .collect(),
        ),
    );
    image.write_node(
        root_bno,
        &NodeSpec::internal(
            root_bno,
            BTNODE_ROOT | BTNODE_FIXED_KV_SIZE,
            1,
            vec![(omap_key(first_oid, 1), child_val(leaf_bno))],
        ),
    );
}
