//! Array-addressed left-balanced binary tree math.
//!
//! Leaves sit at even indices, internal nodes at odd indices. A node's level
//! is the number of trailing one bits in its index. For a tree that is not a
//! power of two wide, the right subtree is truncated, so `right` and `parent`
//! skip over positions that fall outside the tree.
//!
//! ```text
//!                 3
//!           ┌─────┴─────┐
//!           1           5
//!        ┌──┴──┐     ┌──┴──┐
//!        0     2     4     6
//! leaf:  0     1     2     3
//! ```
//!
//! All functions are pure. Callers must keep node indices below
//! [`node_width`] of the tree they address.

use std::fmt;

/// Position of any node (leaf or internal) in the tree array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeIndex(pub u32);

/// Position of a member leaf, counting leaves only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LeafIndex(pub u32);

/// Number of leaves (members) in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LeafCount(pub u32);

impl LeafCount {
    /// Largest addressable tree: node indices must fit in a `u32`.
    pub const MAX: Self = Self(1 << 31);

    /// True if a tree with this many leaves can be addressed.
    pub fn is_valid(self) -> bool {
        self.0 >= 1 && self <= Self::MAX
    }

    /// True if `leaf` is a member of a tree this size.
    pub fn contains(self, leaf: LeafIndex) -> bool {
        leaf.0 < self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LeafIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LeafCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node index of a leaf.
///
/// Only meaningful for leaves below [`LeafCount::MAX`]; larger indices wrap.
pub fn to_node_index(leaf: LeafIndex) -> NodeIndex {
    NodeIndex(leaf.0.wrapping_mul(2))
}

/// Height of a node above the leaves (leaves are level 0).
pub fn level(node: NodeIndex) -> u32 {
    node.0.trailing_ones()
}

/// True if `node` is a leaf position.
pub fn is_leaf(node: NodeIndex) -> bool {
    node.0 & 1 == 0
}

/// Number of array positions occupied by a tree of `size` leaves.
pub fn node_width(size: LeafCount) -> u32 {
    if size.0 == 0 { 0 } else { 2 * (size.0 - 1) + 1 }
}

fn log2(x: u32) -> u32 {
    if x == 0 { 0 } else { u32::BITS - 1 - x.leading_zeros() }
}

/// Root node of a tree of `size` leaves.
pub fn root(size: LeafCount) -> NodeIndex {
    NodeIndex((1 << log2(node_width(size))) - 1)
}

/// Left child of `node`. A leaf is its own child.
pub fn left(node: NodeIndex) -> NodeIndex {
    let k = level(node);
    if k == 0 { node } else { NodeIndex(node.0 ^ (1 << (k - 1))) }
}

/// Right child of `node` within a tree of `size` leaves. A leaf is its own
/// child.
pub fn right(node: NodeIndex, size: LeafCount) -> NodeIndex {
    let k = level(node);
    if k == 0 {
        return node;
    }

    let width = node_width(size);
    let mut child = NodeIndex(node.0 ^ (3 << (k - 1)));
    while child.0 >= width {
        child = left(child);
    }
    child
}

fn parent_step(node: NodeIndex) -> NodeIndex {
    let k = level(node);
    let set = 1u32.checked_shl(k).unwrap_or(0);
    let clear = 1u32.checked_shl(k + 1).unwrap_or(0);
    NodeIndex((node.0 | set) & !clear)
}

/// Parent of `node` within a tree of `size` leaves. The root is its own
/// parent.
pub fn parent(node: NodeIndex, size: LeafCount) -> NodeIndex {
    if node == root(size) {
        return node;
    }

    let width = node_width(size);
    let mut p = parent_step(node);
    while p.0 >= width {
        p = parent_step(p);
    }
    p
}

/// Ancestors of `node`, nearest first, ending with the root.
///
/// Empty when `node` is the root.
pub fn direct_path(node: NodeIndex, size: LeafCount) -> Vec<NodeIndex> {
    let r = root(size);
    let mut path = Vec::new();
    if node == r {
        return path;
    }

    let mut p = parent(node, size);
    loop {
        path.push(p);
        if p == r {
            break;
        }
        p = parent(p, size);
    }
    path
}
