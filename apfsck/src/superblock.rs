use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::error::{CheckError, Result};
use crate::fletcher;
use crate::object::{ObjectHeader, OBJECT_TYPE_NX_SUPERBLOCK};

/// NX_MAGIC = "NXSB" as little-endian u32
pub const NX_MAGIC: u32 = 0x4253584E;

/// APSB_MAGIC = "APSB" as little-endian u32
pub const APSB_MAGIC: u32 = 0x42535041;

/// Maximum number of volume OIDs in a container
pub const NX_MAX_FILE_SYSTEMS: usize = 100;

/// Container superblock (NXSB), reduced to the fields the checker consumes.
#[derive(Debug, Clone)]
pub struct NxSuperblock {
    pub header: ObjectHeader,
    pub block_size: u32,
    pub block_count: u64,
    pub xp_desc_blocks: u32,
    pub xp_desc_base: u64, // paddr of the checkpoint descriptor area
    pub omap_oid: u64,     // physical block of the container object map
    pub fs_oids: Vec<u64>, // volume superblock OIDs (virtual)
}

impl NxSuperblock {
    /// Parse the container superblock from a raw block.
    pub fn parse(block: &[u8]) -> Result<Self> {
        let header = ObjectHeader::parse(block)?;
        let mut cursor = Cursor::new(block);
        cursor.set_position(ObjectHeader::SIZE as u64);

        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != NX_MAGIC {
            return Err(CheckError::InvalidMagic(magic));
        }

        let block_size = cursor.read_u32::<LittleEndian>()?;
        if !block_size.is_power_of_two() || block_size < 4096 {
            return Err(CheckError::InvalidSuperblock(format!(
                "unsupported block size {block_size}"
            )));
        }
        let block_count = cursor.read_u64::<LittleEndian>()?;

        // Skip the feature masks, the UUID and the oid/xid counters:
        // 3 * u64 features + 16-byte uuid + next_oid + next_xid.
        cursor.seek(SeekFrom::Current(3 * 8 + 16 + 2 * 8))?;

        let xp_desc_blocks = cursor.read_u32::<LittleEndian>()?;
        let _xp_data_blocks = cursor.read_u32::<LittleEndian>()?;
        let xp_desc_base = cursor.read_u64::<LittleEndian>()?;
        let _xp_data_base = cursor.read_u64::<LittleEndian>()?;

        // Skip the checkpoint ring indexes: 6 * u32.
        cursor.seek(SeekFrom::Current(6 * 4))?;

        let _spaceman_oid = cursor.read_u64::<LittleEndian>()?;
        let omap_oid = cursor.read_u64::<LittleEndian>()?;
        let _reaper_oid = cursor.read_u64::<LittleEndian>()?;

        let _test_type = cursor.read_u32::<LittleEndian>()?;
        let max_file_systems = cursor.read_u32::<LittleEndian>()? as usize;

        let fs_count = max_file_systems.min(NX_MAX_FILE_SYSTEMS);
        let mut fs_oids = Vec::with_capacity(fs_count);
        for _ in 0..fs_count {
            fs_oids.push(cursor.read_u64::<LittleEndian>()?);
        }

        Ok(NxSuperblock {
            header,
            block_size,
            block_count,
            xp_desc_blocks,
            xp_desc_base,
            omap_oid,
            fs_oids,
        })
    }
}

/// Volume superblock (APSB), reduced to the fields the checker consumes.
#[derive(Debug, Clone)]
pub struct VolumeSuperblock {
    pub header: ObjectHeader,
    pub omap_oid: u64,      // physical block of the volume object map
    pub root_tree_oid: u64, // virtual OID of the catalog root
    pub num_files: u64,
    pub num_directories: u64,
    pub num_symlinks: u64,
    pub volume_name: String,
}

impl VolumeSuperblock {
    /// Parse the volume superblock from a raw block.
    pub fn parse(block: &[u8]) -> Result<Self> {
        let header = ObjectHeader::parse(block)?;
        let mut cursor = Cursor::new(block);
        cursor.set_position(ObjectHeader::SIZE as u64);

        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != APSB_MAGIC {
            return Err(CheckError::InvalidMagic(magic));
        }

        // Skip fs_index, the feature masks, the timestamps and quotas, the
        // wrapped crypto state and the tree types:
        // u32 + 3 * u64 + 4 * u64 + 20 bytes + 3 * u32.
        cursor.seek(SeekFrom::Current(4 + 3 * 8 + 4 * 8 + 20 + 3 * 4))?;

        let omap_oid = cursor.read_u64::<LittleEndian>()?;
        let root_tree_oid = cursor.read_u64::<LittleEndian>()?;

        // Skip the extentref/snapshot tree oids and the revert fields:
        // 2 * u64 + 2 * u64 + next_obj_id.
        cursor.seek(SeekFrom::Current(5 * 8))?;

        let num_files = cursor.read_u64::<LittleEndian>()?;
        let num_directories = cursor.read_u64::<LittleEndian>()?;
        let num_symlinks = cursor.read_u64::<LittleEndian>()?;

        // Skip the remaining counters, the UUID, the timestamps and the
        // modified-by log, up to the volume name:
        // 4 * u64 counters + 16-byte uuid + 2 * u64 + 9 * 48 bytes.
        cursor.seek(SeekFrom::Current(4 * 8 + 16 + 2 * 8 + 9 * 48))?;

        let mut name_buf = [0u8; 256];
        cursor.read_exact(&mut name_buf)?;
        let nul = name_buf.iter().position(|&b| b == 0).unwrap_or(256);
        let volume_name = String::from_utf8_lossy(&name_buf[..nul]).to_string();

        Ok(VolumeSuperblock {
            header,
            omap_oid,
            root_tree_oid,
            num_files,
            num_directories,
            num_symlinks,
            volume_name,
        })
    }
}

/// Read and parse the container superblock from block 0.
pub fn read_nxsb<R: Read + Seek>(reader: &mut R) -> Result<NxSuperblock> {
    reader.seek(SeekFrom::Start(0))?;

    // First read with the minimum block size to learn the actual one.
    let mut block = vec![0u8; 4096];
    reader.read_exact(&mut block)?;

    if !fletcher::verify_object(&block) {
        return Err(CheckError::BadChecksum(0));
    }

    let nxsb = NxSuperblock::parse(&block)?;
    if nxsb.block_size == 4096 {
        return Ok(nxsb);
    }

    reader.seek(SeekFrom::Start(0))?;
    let mut block = vec![0u8; nxsb.block_size as usize];
    reader.read_exact(&mut block)?;

    if !fletcher::verify_object(&block) {
        return Err(CheckError::BadChecksum(0));
    }
    NxSuperblock::parse(&block)
}

/// Scan the checkpoint descriptor area for the latest valid NX superblock.
///
/// Returns the superblock with the highest transaction id, falling back to
/// the block-0 copy when the descriptor area holds nothing newer.
pub fn find_latest_nxsb<R: Read + Seek>(
    reader: &mut R,
    nxsb: &NxSuperblock,
) -> Result<NxSuperblock> {
    let block_size = nxsb.block_size as u64;
    let mut best: Option<NxSuperblock> = None;

    for i in 0..nxsb.xp_desc_blocks as u64 {
        let block_nr = nxsb.xp_desc_base + i;

        reader.seek(SeekFrom::Start(block_nr * block_size))?;
        let mut block = vec![0u8; block_size as usize];
        if reader.read_exact(&mut block).is_err() {
            continue;
        }

        // The area mixes superblocks with checkpoint maps; skip anything
        // that is not a well-formed NX superblock.
        if !fletcher::verify_object(&block) {
            continue;
        }
        let header = match ObjectHeader::parse(&block) {
            Ok(h) => h,
            Err(_) => continue,
        };
        if header.object_type() != OBJECT_TYPE_NX_SUPERBLOCK {
            continue;
        }
        let candidate = match NxSuperblock::parse(&block) {
            Ok(sb) => sb,
            Err(_) => continue,
        };

        match &best {
            Some(b) if b.header.xid >= candidate.header.xid => {}
            _ => best = Some(candidate),
        }
    }

    match best {
        Some(sb) if sb.header.xid > nxsb.header.xid => Ok(sb),
        _ => Ok(nxsb.clone()),
    }
}
