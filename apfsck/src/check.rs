use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;
use std::io::{Read, Seek};

use crate::error::{CheckError, Result};
use crate::key::{keycmp, read_cat_key, read_omap_key, Key};
use crate::node::{read_node, Node};
use crate::omap;
use crate::query::BTREE_MAX_DEPTH;
use crate::Container;

/// Walk a subtree and check it for corruption.
///
/// `last_key` enters holding the greatest key seen so far, which must come
/// before every key in this subtree, and leaves holding the last key of the
/// subtree. Threading it through the whole left-to-right walk enforces the
/// ordering across node boundaries.
///
/// `omap_root` carries the object map used to resolve child oids; `None`
/// means the subtree belongs to an omap itself, whose children need no
/// translation.
pub fn parse_subtree<R: Read + Seek>(
    ctr: &mut Container<R>,
    root: &Node,
    last_key: &mut Key,
    omap_root: Option<&Node>,
) -> Result<()> {
    parse_subtree_at(ctr, root, last_key, omap_root, 0)
}

fn parse_subtree_at<R: Read + Seek>(
    ctr: &mut Container<R>,
    root: &Node,
    last_key: &mut Key,
    omap_root: Option<&Node>,
    depth: u32,
) -> Result<()> {
    if depth >= BTREE_MAX_DEPTH {
        return Err(CheckError::TooDeep);
    }

    for i in 0..root.records() {
        let (off, len) = root.locate_key(i)?;
        let raw_key = &root.raw()[off..off + len];
        let curr_key = if omap_root.is_some() {
            read_cat_key(raw_key)?
        } else {
            read_omap_key(raw_key)?
        };

        if keycmp(last_key, &curr_key) == Ordering::Greater {
            return Err(CheckError::KeysOutOfOrder(root.block_nr()));
        }
        if i != 0 && root.is_leaf() && keycmp(last_key, &curr_key) == Ordering::Equal {
            return Err(CheckError::KeysRepeated(root.block_nr()));
        }
        *last_key = curr_key;

        if root.is_leaf() {
            continue;
        }

        let (off, len) = root.locate_data(i)?;
        if len != 8 {
            return Err(CheckError::BadNonleafValue(root.block_nr()));
        }
        let child_id = LittleEndian::read_u64(&root.raw()[off..off + 8]);

        let bno = match omap_root {
            Some(omap_root) => omap::omap_lookup_block(ctr, omap_root, child_id)?,
            None => child_id,
        };

        let child = read_node(ctr, bno)?;
        if child.oid() != child_id {
            return Err(CheckError::WrongObjectId(bno));
        }

        parse_subtree_at(ctr, &child, last_key, omap_root, depth + 1)?;
    }

    Ok(())
}

/// Parse a catalog tree and check it for corruption.
///
/// Returns the root node; the caller keeps it pinned for later queries.
pub fn parse_cat_btree<R: Read + Seek>(
    ctr: &mut Container<R>,
    oid: u64,
    omap_root: &Node,
) -> Result<Node> {
    let bno = omap::omap_lookup_block(ctr, omap_root, oid)?;
    let root = read_node(ctr, bno)?;

    let mut last_key = Key::default();
    parse_subtree(ctr, &root, &mut last_key, Some(omap_root))?;
    Ok(root)
}

/// Parse an object map and check it for corruption.
///
/// Returns the root node of the omap b-tree; the caller keeps it pinned for
/// later lookups.
pub fn parse_omap_btree<R: Read + Seek>(ctr: &mut Container<R>, oid: u64) -> Result<Node> {
    let tree_bno = omap::read_omap_object(ctr, oid)?;
    let root = read_node(ctr, tree_bno)?;

    let mut last_key = Key::default();
    parse_subtree(ctr, &root, &mut last_key, None)?;
    Ok(root)
}
