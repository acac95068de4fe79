//! Read-only consistency checker for the APFS b-trees.
//!
//! An APFS container keeps its catalog (file and directory records) and its
//! object maps (virtual oid to physical block translation) in copy-on-write
//! b-trees of fixed-size blocks. This crate reads those trees from a raw
//! image, verifies their structural integrity and resolves exact and range
//! queries from root to leaf.
//!
//! The library never writes: the first structural fault ends the walk with
//! an error naming the offending block and the class of violation.

pub mod check;
pub mod error;
pub mod fletcher;
pub mod key;
pub mod node;
pub mod object;
pub mod omap;
pub mod query;
pub mod superblock;

pub use error::{CheckError, Result};
pub use key::{keycmp, Key};
pub use node::{read_node, Node};
pub use omap::omap_lookup_block;
pub use query::{btree_query, Query, TreeFlavor};

use std::io::{Read, Seek, SeekFrom};

/// An open container image: the reader plus the block geometry every walk
/// needs. Root nodes returned by the `check` entry points are pinned by the
/// caller alongside this for the life of the run.
pub struct Container<R> {
    reader: R,
    block_size: u32,
}

impl<R: Read + Seek> Container<R> {
    pub fn new(reader: R, block_size: u32) -> Self {
        Container { reader, block_size }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Read one block, without checksum verification.
    pub(crate) fn read_block(&mut self, block_nr: u64) -> Result<Vec<u8>> {
        let offset = block_nr
            .checked_mul(self.block_size as u64)
            .ok_or(CheckError::BlockOutOfRange(block_nr))?;
        self.reader.seek(SeekFrom::Start(offset))?;

        let mut block = vec![0u8; self.block_size as usize];
        self.reader.read_exact(&mut block)?;
        Ok(block)
    }
}

/// What a clean check reports back.
#[derive(Debug, Clone)]
pub struct CheckSummary {
    pub block_size: u32,
    pub block_count: u64,
    pub volume_name: String,
    pub num_files: u64,
    pub num_directories: u64,
    pub num_symlinks: u64,
}

/// Check a whole container image.
///
/// Runs the full sequence: container superblock, container object map,
/// volume superblock of the first volume, volume object map, catalog.
/// Returns a summary on success; the first structural fault aborts the walk
/// with the corresponding error.
pub fn check_container<R: Read + Seek>(mut reader: R) -> Result<CheckSummary> {
    let nxsb = superblock::read_nxsb(&mut reader)?;
    let nxsb = superblock::find_latest_nxsb(&mut reader, &nxsb)?;

    let mut ctr = Container::new(reader, nxsb.block_size);

    let omap_root = check::parse_omap_btree(&mut ctr, nxsb.omap_oid)?;

    let vol_oid = nxsb
        .fs_oids
        .iter()
        .find(|&&oid| oid != 0)
        .copied()
        .ok_or(CheckError::NoVolume)?;
    let vol_bno = omap::omap_lookup_block(&mut ctr, &omap_root, vol_oid)?;

    let raw = ctr.read_block(vol_bno)?;
    if !fletcher::verify_object(&raw) {
        return Err(CheckError::BadChecksum(vol_bno));
    }
    let vsb = superblock::VolumeSuperblock::parse(&raw)?;
    if vsb.header.oid != vol_oid {
        return Err(CheckError::WrongObjectId(vol_bno));
    }

    let vol_omap_root = check::parse_omap_btree(&mut ctr, vsb.omap_oid)?;
    let _cat_root = check::parse_cat_btree(&mut ctr, vsb.root_tree_oid, &vol_omap_root)?;

    Ok(CheckSummary {
        block_size: nxsb.block_size,
        block_count: nxsb.block_count,
        volume_name: vsb.volume_name,
        num_files: vsb.num_files,
        num_directories: vsb.num_directories,
        num_symlinks: vsb.num_symlinks,
    })
}
