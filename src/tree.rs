//! Result tree of parsed headers.
//!
//! Nodes live in an arena owned by [`HeaderTree`]; parent links are plain
//! indices, so a node never owns its parent. Node 0 is the synthetic root.
//! A candidate node is built detached and only linked once it has parsed and
//! passed adjacency and parent checks. Containers record the end of the
//! range they declare for their children in `declared_end`.
//! [`HeaderTree::checkpoint`] and [`HeaderTree::rollback`] undo everything
//! linked after a point.

use std::fmt;

use serde::Serialize;

/// Index of a node inside its [`HeaderTree`].
pub type NodeId = usize;

/// Decoded attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Unsigned(u64),
    Signed(i64),
    Flag(bool),
    Text(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Unsigned(v) => write!(f, "{v}"),
            AttrValue::Signed(v) => write!(f, "{v}"),
            AttrValue::Flag(v) => write!(f, "{v}"),
            AttrValue::Text(v) => f.write_str(v),
        }
    }
}

/// A named field decoded from a header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub name: &'static str,
    pub value: AttrValue,
    /// False when the value lies outside its declared legal range.
    pub valid: bool,
}

impl Attribute {
    pub fn new(name: &'static str, value: AttrValue) -> Self {
        Self {
            name,
            value,
            valid: true,
        }
    }
}

/// One parsed header.
#[derive(Debug, Clone)]
pub struct HeaderNode<K> {
    pub kind: K,
    pub offset: u64,
    /// Bytes consumed by the header, derived from the cursor delta.
    pub length: u64,
    pub valid: bool,
    /// End of the range a container declares for its children.
    pub declared_end: Option<u64>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    pub attributes: Vec<Attribute>,
}

impl<K: Copy> HeaderNode<K> {
    pub fn new(kind: K, offset: u64) -> Self {
        Self {
            kind,
            offset,
            length: 0,
            valid: true,
            declared_end: None,
            parent: None,
            children: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Outer limit of this node's range: the declared end for containers.
    pub fn extent_end(&self) -> u64 {
        self.declared_end.unwrap_or_else(|| self.end()).max(self.end())
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn push_attribute(&mut self, name: &'static str, value: AttrValue, valid: bool) {
        self.attributes.push(Attribute { name, value, valid });
    }

    pub fn invalid_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| !a.valid)
    }
}

/// Marks a point that [`HeaderTree::rollback`] can return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Arena of header nodes with a synthetic root.
#[derive(Debug, Clone)]
pub struct HeaderTree<K> {
    nodes: Vec<HeaderNode<K>>,
}

impl<K: Copy + PartialEq> HeaderTree<K> {
    pub const ROOT: NodeId = 0;

    pub fn new(root_kind: K, offset: u64) -> Self {
        Self {
            nodes: vec![HeaderNode::new(root_kind, offset)],
        }
    }

    pub fn root(&self) -> &HeaderNode<K> {
        &self.nodes[Self::ROOT]
    }

    pub fn node(&self, id: NodeId) -> &HeaderNode<K> {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut HeaderNode<K> {
        &mut self.nodes[id]
    }

    /// Number of linked headers, excluding the root.
    pub fn header_count(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.header_count() == 0
    }

    /// Most recently linked header, in document order.
    pub fn last(&self) -> Option<NodeId> {
        (self.nodes.len() > 1).then(|| self.nodes.len() - 1)
    }

    /// First linked header.
    pub fn first(&self) -> Option<NodeId> {
        (self.nodes.len() > 1).then_some(1)
    }

    /// Headers in document order, excluding the root.
    pub fn headers(&self) -> impl Iterator<Item = (NodeId, &HeaderNode<K>)> {
        self.nodes.iter().enumerate().skip(1)
    }

    /// `id` followed by its ancestors up to and including the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |&n| self.nodes[n].parent)
    }

    /// Link a detached node under `parent`, returning its id.
    pub fn link(&mut self, mut node: HeaderNode<K>, parent: NodeId) -> NodeId {
        let id = self.nodes.len();
        node.parent = Some(parent);
        node.children.clear();
        self.nodes.push(node);
        self.nodes[parent].children.push(id);

        let end = self.nodes[id].end();
        let root = &mut self.nodes[Self::ROOT];
        if root.end() < end {
            root.length = end - root.offset;
        }
        id
    }

    pub fn has_child_of_kind(&self, parent: NodeId, kind: K) -> bool {
        self.nodes[parent]
            .children
            .iter()
            .any(|&c| self.nodes[c].kind == kind)
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.nodes.len())
    }

    /// Discard every node linked after `checkpoint`.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        let keep = checkpoint.0.max(1);
        if keep >= self.nodes.len() {
            return;
        }
        self.nodes.truncate(keep);
        for node in &mut self.nodes {
            node.children.retain(|&c| c < keep);
        }
        let end = self.nodes[1..].iter().map(HeaderNode::end).max();
        let root = &mut self.nodes[Self::ROOT];
        root.length = end.map_or(0, |e| e.saturating_sub(root.offset));
    }

    /// Containment and ordering invariants over the whole tree.
    ///
    /// Every header lies inside its parent's extent (the root is exempt) and
    /// siblings do not overlap.
    pub fn check_invariants(&self) -> bool {
        for (id, node) in self.headers() {
            let Some(parent) = node.parent else {
                return false;
            };
            if parent != Self::ROOT {
                let p = &self.nodes[parent];
                if node.offset < p.offset || node.end() > p.extent_end() {
                    return false;
                }
            }
            let siblings = &self.nodes[parent].children;
            if let Some(pos) = siblings.iter().position(|&c| c == id) {
                if pos > 0 && self.nodes[siblings[pos - 1]].end() > node.offset {
                    return false;
                }
            }
        }
        true
    }
}
