use thiserror::Error;

/// Everything the checker can report.
///
/// Apart from `NotFound`, every variant is a structural fault: the image is
/// corrupt and the walk cannot continue. `NotFound` is the normal negative
/// result of a query and is only fatal when the object map returns it, in
/// which case it is converted to `OmapRecordMissing`.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid magic: 0x{0:08X}")]
    InvalidMagic(u32),

    #[error("invalid superblock: {0}")]
    InvalidSuperblock(String),

    #[error("no volume found in container")]
    NoVolume,

    #[error("block number 0x{0:x} is out of range")]
    BlockOutOfRange(u64),

    #[error("bad checksum for object in block 0x{0:x}")]
    BadChecksum(u64),

    #[error("node in block 0x{0:x} is not sane")]
    NotSane(u64),

    #[error("empty node in block 0x{0:x}")]
    EmptyNode(u64),

    #[error("record index out of range in node 0x{0:x}")]
    BadRecordIndex(u64),

    #[error("b-tree key is out-of-bounds in node 0x{0:x}")]
    KeyOutOfBounds(u64),

    #[error("b-tree value is out-of-bounds in node 0x{0:x}")]
    ValueOutOfBounds(u64),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("b-tree keys are out of order in node 0x{0:x}")]
    KeysOutOfOrder(u64),

    #[error("leaf keys are repeated in node 0x{0:x}")]
    KeysRepeated(u64),

    #[error("corrupted record value in node 0x{0:x}")]
    CorruptedValue(u64),

    #[error("wrong size of nonleaf record value in node 0x{0:x}")]
    BadNonleafValue(u64),

    #[error("wrong size of omap leaf record value in node 0x{0:x}")]
    BadOmapValue(u64),

    #[error("wrong object id on b-tree node in block 0x{0:x}")]
    WrongObjectId(u64),

    #[error("corrupted b-tree is too deep")]
    TooDeep,

    #[error("omap record missing for oid 0x{0:x}")]
    OmapRecordMissing(u64),

    #[error("record not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, CheckError>;
