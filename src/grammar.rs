//! Format grammar plug-in interface.
//!
//! A grammar tells the generic [`TreeParser`](crate::parser::TreeParser) which
//! header types exist, how to recognise them from their signature bytes, where
//! they may nest and how to parse their bodies. The parser itself knows
//! nothing about any particular format.

use std::fmt::Debug;
use std::hash::Hash;

use crate::cursor::Cursor;
use crate::error::ParseResult;
use crate::tree::{HeaderNode, HeaderTree, NodeId};

/// Header identity and nesting rules of one format.
pub trait HeaderGrammar {
    /// Tag naming a header type.
    type Kind: Copy + Eq + Hash + Debug + 'static;

    /// Tag of the synthetic root node.
    const ROOT: Self::Kind;

    /// Bytes peeked to identify a header.
    const SIGNATURE_LEN: usize;

    /// Identify the header starting with `signature`, if any.
    fn header_type_of(&self, signature: &[u8]) -> Option<Self::Kind>;

    /// Fallback header type recognised when the container header that would
    /// normally precede it is missing (packet sync loss).
    fn sync_loss_type_of(&self, _signature: &[u8]) -> Option<Self::Kind> {
        None
    }

    /// Header types `kind` may nest under. `ROOT` means top level.
    fn legal_parents(&self, kind: Self::Kind) -> &'static [Self::Kind];

    fn is_container(&self, kind: Self::Kind) -> bool;

    /// Whether several headers of `kind` may share one parent.
    fn allows_duplicates(&self, kind: Self::Kind) -> bool;
}

/// Parses header bodies.
pub trait ParsesHeader: HeaderGrammar {
    /// Parse the header at the cursor into `node`. On return the cursor
    /// sits after the header's own bytes (after the fixed fields for a
    /// container whose children follow).
    fn parse(&mut self, cursor: &mut Cursor<'_>, node: &mut HeaderNode<Self::Kind>)
        -> ParseResult<()>;

    /// Completion hook run after [`ParsesHeader::parse`] succeeds.
    fn parse_end(
        &mut self,
        _cursor: &mut Cursor<'_>,
        _node: &mut HeaderNode<Self::Kind>,
    ) -> ParseResult<()> {
        Ok(())
    }
}

/// Adjacency rule between consecutive headers.
pub trait IsBackToBack: HeaderGrammar {
    /// `expected_offset` is where the previous header ended.
    fn is_back_to_back(&self, expected_offset: u64, header: &HeaderNode<Self::Kind>) -> bool {
        header.offset == expected_offset
    }
}

/// Parent resolution over the chain of accepted ancestors.
pub trait HasSuitableParent: HeaderGrammar {
    /// Find where `header` belongs, starting the walk at `from` (normally the
    /// last accepted header). Returns `None` if the header may not be linked.
    ///
    /// A container in the chain that covers the header's offset must be a
    /// legal parent, otherwise the header is rejected. When no legal parent is
    /// present the header falls back to the root, which tolerates fragments
    /// whose outer container was lost.
    fn suitable_parent(
        &self,
        tree: &HeaderTree<Self::Kind>,
        from: NodeId,
        header: &HeaderNode<Self::Kind>,
    ) -> Option<NodeId> {
        let legal = self.legal_parents(header.kind);
        let mut legal_parent_seen = false;

        for id in tree.ancestors(from) {
            if id == HeaderTree::<Self::Kind>::ROOT {
                break;
            }
            let candidate = tree.node(id);
            let covers = self.is_container(candidate.kind)
                && header.offset >= candidate.end()
                && header.offset < candidate.extent_end();
            let is_legal = legal.contains(&candidate.kind);
            legal_parent_seen |= is_legal;

            if covers {
                if !is_legal || header.end() > candidate.extent_end() {
                    return None;
                }
                return self.admit(tree, id, header.kind);
            }
        }

        if legal.contains(&Self::ROOT) || !legal_parent_seen {
            return self.admit(tree, HeaderTree::<Self::Kind>::ROOT, header.kind);
        }
        None
    }

    /// Duplicate check for linking `kind` under `parent`.
    fn admit(&self, tree: &HeaderTree<Self::Kind>, parent: NodeId, kind: Self::Kind) -> Option<NodeId> {
        if !self.allows_duplicates(kind) && tree.has_child_of_kind(parent, kind) {
            None
        } else {
            Some(parent)
        }
    }
}

/// Everything the tree parser needs from a format.
pub trait Grammar: ParsesHeader + IsBackToBack + HasSuitableParent {}

impl<T: ParsesHeader + IsBackToBack + HasSuitableParent> Grammar for T {}
