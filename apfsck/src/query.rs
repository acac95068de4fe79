use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;
use std::io::{Read, Seek};

use crate::error::{CheckError, Result};
use crate::key::{keycmp, read_cat_key, read_omap_key, Key};
use crate::node::{read_node, Node};
use crate::omap;
use crate::Container;

/// Maximum depth allowed for any b-tree; anything deeper is corrupt.
pub const BTREE_MAX_DEPTH: u32 = 12;

/// What a query searches and how its child pointers resolve.
///
/// Omap trees store physical block numbers directly; every other tree goes
/// through the object map, so a catalog query carries a borrow of the pinned
/// omap root for the second indirection.
#[derive(Clone, Copy, Debug)]
pub enum TreeFlavor<'a> {
    Omap,
    Catalog { omap: &'a Node },
}

impl TreeFlavor<'_> {
    fn decode_key(&self, raw: &[u8]) -> Result<Key> {
        match self {
            TreeFlavor::Omap => read_omap_key(raw),
            TreeFlavor::Catalog { .. } => read_cat_key(raw),
        }
    }
}

/// A query owns the nodes it loads during descent, but only borrows pinned
/// root nodes, which stay with the container until teardown.
#[derive(Debug)]
enum NodeRef<'a> {
    Pinned(&'a Node),
    Owned(Node),
}

impl NodeRef<'_> {
    fn get(&self) -> &Node {
        match self {
            NodeRef::Pinned(node) => node,
            NodeRef::Owned(node) => node,
        }
    }
}

enum NodeStatus {
    Found,
    NotFound,
    /// The next record may be in another node; the caller must ascend.
    CrossNode,
}

/// An in-flight b-tree search.
///
/// A single-match query reuses one `Query` all the way down. A multi-match
/// query chains a fresh `Query` per level, keeping the ancestry alive so the
/// enumeration can re-ascend when a subtree runs out of matching records.
#[derive(Debug)]
pub struct Query<'a> {
    node: NodeRef<'a>,
    flavor: TreeFlavor<'a>,
    key: Key,
    exact: bool,
    multiple: bool,
    done: bool,
    next: bool,
    /// Next record to examine; searches move backward through the node.
    index: u32,
    key_off: usize,
    key_len: usize,
    off: usize,
    len: usize,
    depth: u32,
    parent: Option<Box<Query<'a>>>,
}

impl<'a> Query<'a> {
    /// A single-match query for exactly `key`.
    pub fn exact(root: &'a Node, key: Key, flavor: TreeFlavor<'a>) -> Box<Self> {
        Self::alloc(root, key, flavor, true, false)
    }

    /// A multi-match query enumerating, in descending order, the records
    /// whose key matches `key` with the number and name masked out.
    pub fn multiple(root: &'a Node, key: Key, flavor: TreeFlavor<'a>, exact: bool) -> Box<Self> {
        Self::alloc(root, key, flavor, exact, true)
    }

    fn alloc(
        root: &'a Node,
        key: Key,
        flavor: TreeFlavor<'a>,
        exact: bool,
        multiple: bool,
    ) -> Box<Self> {
        Box::new(Query {
            // Start the search with the last record and go backwards
            index: root.records(),
            node: NodeRef::Pinned(root),
            flavor,
            key,
            exact,
            multiple,
            done: false,
            next: false,
            key_off: 0,
            key_len: 0,
            off: 0,
            len: 0,
            depth: 0,
            parent: None,
        })
    }

    /// Chain a child query below `parent`, inheriting the search state.
    fn descend(parent: Box<Query<'a>>, node: Node) -> Box<Self> {
        Box::new(Query {
            index: node.records(),
            node: NodeRef::Owned(node),
            flavor: parent.flavor,
            key: parent.key.clone(),
            exact: parent.exact,
            multiple: parent.multiple,
            done: false,
            next: false,
            key_off: 0,
            key_len: 0,
            off: 0,
            len: 0,
            depth: parent.depth + 1,
            parent: Some(parent),
        })
    }

    /// The node currently under the cursor.
    pub fn node(&self) -> &Node {
        self.node.get()
    }

    /// Levels below the root; 0 at the root itself.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Offset and length of the located value within the node's block.
    pub fn value_range(&self) -> (usize, usize) {
        (self.off, self.len)
    }

    /// Raw bytes of the located value.
    pub fn value(&self) -> &[u8] {
        &self.node().raw()[self.off..self.off + self.len]
    }

    /// Raw bytes of the located key.
    pub fn key_bytes(&self) -> &[u8] {
        &self.node().raw()[self.key_off..self.key_off + self.key_len]
    }

    /// Decode the key under the cursor, masking the fields a multi-match
    /// query must ignore.
    fn decode_current_key(&self) -> Result<Key> {
        let node = self.node();
        let raw = &node.raw()[self.key_off..self.key_off + self.key_len];
        let mut key = self.flavor.decode_key(raw)?;
        if self.multiple {
            key.number = 0;
            key.name = None;
        }
        Ok(key)
    }
}

/// Find the next matching record in the current node of a multi-match query.
fn node_next(query: &mut Query) -> Result<NodeStatus> {
    if query.done {
        // Nothing left to search at this level; the query failed
        return Ok(NodeStatus::NotFound);
    }
    if query.index == 0 {
        // The next record may be in another node
        return Ok(NodeStatus::CrossNode);
    }
    query.index -= 1;

    let node = query.node();
    let block_nr = node.block_nr();
    let (key_off, key_len) = node.locate_key(query.index)?;
    query.key_off = key_off;
    query.key_len = key_len;

    let curr_key = query.decode_current_key()?;
    let cmp = keycmp(&curr_key, &query.key);

    if cmp == Ordering::Greater {
        return Err(CheckError::KeysOutOfOrder(block_nr));
    }
    if cmp != Ordering::Equal && query.node().is_leaf() && query.exact {
        return Ok(NodeStatus::NotFound);
    }

    let (off, len) = query.node().locate_data(query.index)?;
    query.off = off;
    query.len = len;
    if query.len == 0 {
        return Err(CheckError::CorruptedValue(block_nr));
    }

    if cmp != Ordering::Equal {
        // This is the last entry that can be relevant in this node.
        // Keep searching the children, but don't return to this level.
        query.done = true;
    }
    Ok(NodeStatus::Found)
}

/// Execute a query on a single node.
///
/// Bisects `[0, query.index)` for the last key that does not come after
/// `query.key`. The index is left on the record found, which is how a
/// multi-match query remembers its position at this level between calls.
fn node_query(query: &mut Query) -> Result<NodeStatus> {
    if query.next {
        return node_next(query);
    }

    let block_nr = query.node().block_nr();

    // Search by bisection
    let mut cmp = Ordering::Greater;
    let mut left: u32 = 0;
    let mut right: u32 = 0;
    loop {
        if cmp == Ordering::Greater {
            if query.index == 0 {
                return Ok(NodeStatus::NotFound);
            }
            right = query.index - 1;
            if right < left {
                return Ok(NodeStatus::NotFound);
            }
            query.index = (left + right) / 2;
        } else {
            left = query.index;
            // Round up, so that the search makes progress when it returns
            // to an index it already visited
            query.index = (left + right + 1) / 2;
        }

        let (key_off, key_len) = query.node().locate_key(query.index)?;
        query.key_off = key_off;
        query.key_len = key_len;

        let curr_key = query.decode_current_key()?;
        cmp = keycmp(&curr_key, &query.key);
        if cmp == Ordering::Equal && !query.multiple {
            break;
        }
        if left == right {
            break;
        }
    }

    if cmp == Ordering::Greater {
        return Ok(NodeStatus::NotFound);
    }
    if cmp != Ordering::Equal && query.node().is_leaf() && query.exact {
        return Ok(NodeStatus::NotFound);
    }

    if query.multiple {
        if cmp != Ordering::Equal {
            // Last relevant entry in this level
            query.done = true;
        }
        query.next = true;
    }

    let (off, len) = query.node().locate_data(query.index)?;
    query.off = off;
    query.len = len;
    if query.len == 0 {
        return Err(CheckError::CorruptedValue(block_nr));
    }
    Ok(NodeStatus::Found)
}

/// Read the child id found by a successful nonleaf query.
fn child_from_query(query: &Query) -> Result<u64> {
    // The value of a nonleaf record is the child id
    if query.len != 8 {
        return Err(CheckError::BadNonleafValue(query.node().block_nr()));
    }
    Ok(LittleEndian::read_u64(query.value()))
}

/// Execute a query on a b-tree.
///
/// Descends from the current position toward the record matching the
/// query's key. On success the returned query points at the located record
/// in a leaf node; call again on a multi-match query to enumerate the
/// preceding records. `NotFound` says no (further) record matches.
pub fn btree_query<'a, R: Read + Seek>(
    ctr: &mut Container<R>,
    mut query: Box<Query<'a>>,
) -> Result<Box<Query<'a>>> {
    loop {
        if query.depth >= BTREE_MAX_DEPTH {
            return Err(CheckError::TooDeep);
        }

        match node_query(&mut query)? {
            NodeStatus::Found => {}
            NodeStatus::NotFound => return Err(CheckError::NotFound),
            NodeStatus::CrossNode => {
                // Move back up one level and continue the query
                match query.parent.take() {
                    None => return Err(CheckError::NotFound),
                    Some(parent) => {
                        query = parent;
                        continue;
                    }
                }
            }
        }

        if query.node().is_leaf() {
            // All done
            return Ok(query);
        }

        let child_id = child_from_query(&query)?;

        // The omap maps a node id into a block number. The nodes of the
        // omap itself do not need this translation.
        let child_blk = match query.flavor {
            TreeFlavor::Omap => child_id,
            TreeFlavor::Catalog { omap } => omap::omap_lookup_block(ctr, omap, child_id)?,
        };

        // Now go a level deeper and search the child
        let child = read_node(ctr, child_blk)?;
        if child.oid() != child_id {
            return Err(CheckError::WrongObjectId(child_blk));
        }

        if query.multiple {
            // We are looking for multiple entries, so we must remember
            // the parent node and index to continue the search later.
            query = Query::descend(query, child);
        } else {
            // Reuse the same query structure to search the child
            let records = child.records();
            query.node = NodeRef::Owned(child);
            query.index = records;
            query.depth += 1;
        }
    }
}
