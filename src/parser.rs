//! Generic resynchronizing tree parser.
//!
//! Finds the first header a grammar recognises, then greedily appends the
//! headers that directly follow it. A header that fails to parse, is not
//! back-to-back with its predecessor, or has no suitable parent is discarded
//! without touching the tree, and the search resumes one byte later.

use crate::cursor::Cursor;
use crate::error::ParseResult;
use crate::grammar::Grammar;
use crate::tree::{HeaderNode, HeaderTree};

const CANCEL_CHECK_INTERVAL: u64 = 64 * 1024;

/// A position whose signature matches a header type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<K> {
    pub kind: K,
    pub offset: u64,
}

/// Format-agnostic header tree parser.
pub struct TreeParser<G: Grammar> {
    grammar: G,
    /// Bytes a container may leave unexplained before its declared end.
    max_unparsed_bytes: u64,
    /// Offset the next header must start at.
    expected_offset: Option<u64>,
}

impl<G: Grammar> TreeParser<G> {
    pub fn new(grammar: G) -> Self {
        Self {
            grammar,
            max_unparsed_bytes: 0,
            expected_offset: None,
        }
    }

    pub fn with_max_unparsed_bytes(mut self, bytes: u64) -> Self {
        self.max_unparsed_bytes = bytes;
        self
    }

    pub fn grammar(&self) -> &G {
        &self.grammar
    }

    fn candidate_at(&self, cursor: &Cursor<'_>, offset: u64) -> Option<Candidate<G::Kind>> {
        let data = cursor.data();
        let start = offset as usize;
        let end = start.saturating_add(G::SIGNATURE_LEN).min(data.len());
        let signature = &data[start.min(end)..end];
        self.grammar
            .header_type_of(signature)
            .or_else(|| self.grammar.sync_loss_type_of(signature))
            .map(|kind| Candidate { kind, offset })
    }

    /// Scan forward from the cursor for a position that decodes as any known
    /// header type, stopping before `offset_limit`.
    pub fn find_first_header(
        &self,
        cursor: &Cursor<'_>,
        offset_limit: u64,
    ) -> ParseResult<Option<Candidate<G::Kind>>> {
        let limit = offset_limit.min(cursor.len());
        let mut offset = cursor.position();
        while offset < limit {
            if offset % CANCEL_CHECK_INTERVAL == 0 {
                cursor.check_cancel()?;
            }
            if let Some(candidate) = self.candidate_at(cursor, offset) {
                return Ok(Some(candidate));
            }
            offset += 1;
        }
        Ok(None)
    }

    /// Parse `candidate` and link it into `tree`.
    ///
    /// Returns `Ok(false)` when the header is rejected; the tree is left
    /// exactly as it was. Only cancellation is reported as an error.
    pub fn parse_and_append(
        &mut self,
        cursor: &mut Cursor<'_>,
        tree: &mut HeaderTree<G::Kind>,
        candidate: Candidate<G::Kind>,
    ) -> ParseResult<bool> {
        cursor.set_position(candidate.offset);
        let mut node = HeaderNode::new(candidate.kind, candidate.offset);

        let parsed = self
            .grammar
            .parse(cursor, &mut node)
            .and_then(|()| {
                node.length = cursor.position() - node.offset;
                self.grammar.parse_end(cursor, &mut node)
            });
        if let Err(err) = parsed {
            if err.is_fatal() {
                return Err(err);
            }
            tracing::trace!(offset = candidate.offset, kind = ?candidate.kind, %err, "Header rejected");
            return Ok(false);
        }
        node.length = cursor.position() - node.offset;

        if let Some(expected) = self.expected_offset {
            if !self.grammar.is_back_to_back(expected, &node) {
                tracing::trace!(offset = node.offset, expected, "Header not back-to-back");
                return Ok(false);
            }
        }

        let from = tree.last().unwrap_or(HeaderTree::<G::Kind>::ROOT);
        let Some(parent) = self.grammar.suitable_parent(tree, from, &node) else {
            tracing::trace!(offset = node.offset, kind = ?node.kind, "No suitable parent");
            return Ok(false);
        };

        if tree.is_empty() {
            let root = tree.node_mut(HeaderTree::<G::Kind>::ROOT);
            root.offset = node.offset;
            root.length = 0;
        }
        let end = node.end();
        tree.link(node, parent);
        self.expected_offset = Some(end);
        Ok(true)
    }

    /// Find and parse the first valid header before `offset_limit`, then
    /// append every directly following header.
    ///
    /// A rejected candidate is retried one byte further on. When nothing is
    /// found the cursor is left at the limit, so a repeated call makes no
    /// further progress.
    pub fn parse_root(
        &mut self,
        cursor: &mut Cursor<'_>,
        tree: &mut HeaderTree<G::Kind>,
        offset_limit: u64,
    ) -> ParseResult<bool> {
        let limit = offset_limit.min(cursor.len());
        loop {
            self.expected_offset = None;
            let Some(candidate) = self.find_first_header(cursor, limit)? else {
                cursor.set_position(limit);
                return Ok(false);
            };

            if self.parse_and_append(cursor, tree, candidate)? {
                let appended = self.append_headers(cursor, tree)?;
                tracing::debug!(
                    offset = candidate.offset,
                    headers = appended + 1,
                    "Parsed header chain"
                );
                return Ok(true);
            }
            cursor.set_position(candidate.offset + 1);
        }
    }

    /// Greedily extend the chain with headers that start exactly where the
    /// previous one ended. Returns the number of headers appended.
    pub fn append_headers(
        &mut self,
        cursor: &mut Cursor<'_>,
        tree: &mut HeaderTree<G::Kind>,
    ) -> ParseResult<usize> {
        let mut appended = 0;
        loop {
            let Some(next) = self.expected_offset else {
                return Ok(appended);
            };
            if next >= cursor.len() {
                cursor.set_position(next);
                return Ok(appended);
            }

            if let Some(candidate) = self.candidate_at(cursor, next) {
                let checkpoint = tree.checkpoint();
                if self.parse_and_append(cursor, tree, candidate)? {
                    appended += 1;
                    continue;
                }
                tree.rollback(checkpoint);
            }

            if !self.skip_unparsed_tail(tree, next) {
                cursor.set_position(next);
                return Ok(appended);
            }
        }
    }

    /// Jump over a short unexplained tail at the end of an open container.
    fn skip_unparsed_tail(&mut self, tree: &HeaderTree<G::Kind>, at: u64) -> bool {
        let Some(last) = tree.last() else {
            return false;
        };
        let open = tree.ancestors(last).find(|&id| {
            id != HeaderTree::<G::Kind>::ROOT && {
                let n = tree.node(id);
                self.grammar.is_container(n.kind) && at < n.extent_end()
            }
        });
        match open {
            Some(id) => {
                let end = tree.node(id).extent_end();
                if end - at <= self.max_unparsed_bytes {
                    tracing::trace!(at, end, "Skipping unparsed container tail");
                    self.expected_offset = Some(end);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use crate::grammar::{HasSuitableParent, HeaderGrammar, IsBackToBack, ParsesHeader};

    /// Toy TLV grammar: tag byte, length byte, payload.
    /// 'C' is a container holding 'L'/'D' children; 'L' and 'D' are leaves,
    /// 'D' may repeat, 'L' may not.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Tag {
        Root,
        Container,
        Leaf,
        Dup,
    }

    struct Tlv;

    impl HeaderGrammar for Tlv {
        type Kind = Tag;
        const ROOT: Tag = Tag::Root;
        const SIGNATURE_LEN: usize = 1;

        fn header_type_of(&self, sig: &[u8]) -> Option<Tag> {
            match sig.first()? {
                b'C' => Some(Tag::Container),
                b'L' => Some(Tag::Leaf),
                b'D' => Some(Tag::Dup),
                _ => None,
            }
        }

        fn legal_parents(&self, kind: Tag) -> &'static [Tag] {
            match kind {
                Tag::Container => &[Tag::Root],
                _ => &[Tag::Container],
            }
        }

        fn is_container(&self, kind: Tag) -> bool {
            kind == Tag::Container
        }

        fn allows_duplicates(&self, kind: Tag) -> bool {
            kind != Tag::Leaf
        }
    }

    impl ParsesHeader for Tlv {
        fn parse(&mut self, cursor: &mut Cursor<'_>, node: &mut HeaderNode<Tag>) -> ParseResult<()> {
            cursor.read_u8()?;
            let len = u64::from(cursor.read_u8()?);
            if len == 0 {
                return Err(ParseError::StructuralInvalid("zero length"));
            }
            if node.kind == Tag::Container {
                node.declared_end = Some(node.offset + 2 + len);
                if node.declared_end > Some(cursor.len()) {
                    return Err(ParseError::Overflow);
                }
            } else {
                cursor.read_bytes(len)?;
            }
            Ok(())
        }
    }

    impl IsBackToBack for Tlv {}
    impl HasSuitableParent for Tlv {}

    fn run(data: &[u8], unparsed: u64) -> (bool, HeaderTree<Tag>, u64) {
        let mut cursor = Cursor::from_bytes(data);
        let mut tree = HeaderTree::new(Tag::Root, 0);
        let mut parser = TreeParser::new(Tlv).with_max_unparsed_bytes(unparsed);
        let ok = parser.parse_root(&mut cursor, &mut tree, data.len() as u64).unwrap();
        (ok, tree, cursor.position())
    }

    #[test]
    fn parses_container_with_children() {
        let data = b"C\x07L\x01xD\x02yy";
        let (ok, tree, pos) = run(data, 0);
        assert!(ok);
        assert_eq!(tree.header_count(), 3);
        assert_eq!(tree.node(2).parent(), Some(1));
        assert_eq!(tree.node(3).parent(), Some(1));
        assert_eq!(pos, data.len() as u64);
        assert!(tree.check_invariants());
    }

    #[test]
    fn resynchronizes_past_garbage() {
        // 'L' with zero length is rejected; real chain starts at offset 4.
        let data = b"zzL\x00C\x03D\x01q";
        let (ok, tree, _) = run(data, 0);
        assert!(ok);
        assert_eq!(tree.node(1).offset, 4);
        assert_eq!(tree.root().offset, 4);
    }

    #[test]
    fn orphan_leaf_attaches_to_root() {
        let data = b"L\x01aD\x01b";
        let (ok, tree, _) = run(data, 0);
        assert!(ok);
        assert_eq!(tree.header_count(), 2);
        assert_eq!(tree.node(1).parent(), Some(0));
        assert_eq!(tree.node(2).parent(), Some(0));
    }

    #[test]
    fn duplicate_leaf_is_rejected() {
        let data = b"C\x06L\x01aL\x01b";
        let (ok, tree, pos) = run(data, 0);
        assert!(ok);
        assert_eq!(tree.header_count(), 2);
        assert_eq!(pos, 5);
    }

    #[test]
    fn unparsed_tail_within_tolerance_is_skipped() {
        let data = b"C\x05D\x01a\x00\x00C\x03D\x01b";
        let (_, strict, _) = run(data, 0);
        assert_eq!(strict.header_count(), 2);

        let (_, tolerant, pos) = run(data, 2);
        assert_eq!(tolerant.header_count(), 4);
        assert_eq!(pos, data.len() as u64);
        assert!(tolerant.check_invariants());
    }

    #[test]
    fn repeated_parse_root_makes_no_progress() {
        let data = b"xxxxxxxx";
        let mut cursor = Cursor::from_bytes(data);
        let mut tree = HeaderTree::new(Tag::Root, 0);
        let mut parser = TreeParser::new(Tlv);
        assert!(!parser.parse_root(&mut cursor, &mut tree, 8).unwrap());
        let pos = cursor.position();
        assert!(!parser.parse_root(&mut cursor, &mut tree, 8).unwrap());
        assert_eq!(cursor.position(), pos);
        assert!(tree.is_empty());
    }
}
