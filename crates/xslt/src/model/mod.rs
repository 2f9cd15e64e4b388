use crate::runtime::{Error, ErrorCode};
use core::cmp::Ordering;
use core::fmt;
use core::hash::Hash;
use smallvec::SmallVec;
use string_cache::DefaultAtom;

pub mod names;
pub mod tree;

use names::{Fingerprint, NamePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    Namespace,
}

impl NodeKind {
    /// Single-letter tag used when deriving generated identifiers.
    pub(crate) fn letter(self) -> char {
        match self {
            NodeKind::Document => 'r',
            NodeKind::Element => 'e',
            NodeKind::Attribute => 'a',
            NodeKind::Text => 't',
            NodeKind::Comment => 'c',
            NodeKind::ProcessingInstruction => 'p',
            NodeKind::Namespace => 'n',
        }
    }

    /// Rank of the sibling collection a node of this kind lives in: namespaces
    /// precede attributes, attributes precede children.
    pub(crate) fn collection_rank(self) -> u8 {
        match self {
            NodeKind::Namespace => 0,
            NodeKind::Attribute => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub ns_uri: Option<String>,
}

impl QName {
    pub fn local(local: impl Into<String>) -> Self {
        Self { prefix: None, local: local.into(), ns_uri: None }
    }

    pub fn namespaced(prefix: Option<&str>, ns_uri: &str, local: impl Into<String>) -> Self {
        Self {
            prefix: prefix.map(str::to_string),
            local: local.into(),
            ns_uri: if ns_uri.is_empty() { None } else { Some(ns_uri.to_string()) },
        }
    }

    pub fn expanded(&self) -> ExpandedName {
        ExpandedName { ns_uri: self.ns_uri.clone(), local: self.local.clone() }
    }
}

/// Namespace URI plus local name; the identity of a name independent of its prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpandedName {
    pub ns_uri: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(ns_uri: Option<&str>, local: impl Into<String>) -> Self {
        Self { ns_uri: ns_uri.filter(|u| !u.is_empty()).map(str::to_string), local: local.into() }
    }

    pub fn local(local: impl Into<String>) -> Self {
        Self { ns_uri: None, local: local.into() }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        NamePool::global().allocate(self.ns_uri.as_deref().unwrap_or(""), &self.local)
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns_uri {
            Some(ns) => write!(f, "Q{{{}}}{}", ns, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// A prefix → URI binding as declared on an element. An empty URI undeclares the prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceBinding {
    pub prefix: DefaultAtom,
    pub uri: DefaultAtom,
}

impl NamespaceBinding {
    pub fn new(prefix: &str, uri: &str) -> Self {
        Self { prefix: DefaultAtom::from(prefix), uri: DefaultAtom::from(uri) }
    }

    pub fn is_undeclaration(&self) -> bool {
        self.uri.is_empty()
    }
}

/// Compare two nodes by ancestry and sibling position (fallback algorithm).
///
/// Properties:
/// - If one node is an ancestor of the other, the ancestor precedes the descendant.
/// - Among siblings, namespaces come first, then attributes, then children; within
///   each collection `sibling_index` decides.
/// - Nodes from different roots cannot be ordered and yield `err:FOER0000`. This is a
///   broken tree invariant, not bad input, so callers propagate it.
pub fn try_compare_by_ancestry<N: XdmNode>(a: &N, b: &N) -> Result<Ordering, Error> {
    if a == b {
        return Ok(Ordering::Equal);
    }
    fn path_to_root<N: XdmNode>(n: &N) -> SmallVec<[N; 16]> {
        let mut p: SmallVec<[N; 16]> = SmallVec::new();
        p.push(n.clone());
        let mut cur = n.parent();
        while let Some(parent) = cur {
            cur = parent.parent();
            p.push(parent);
        }
        p.reverse();
        p
    }
    let pa = path_to_root(a);
    let pb = path_to_root(b);
    let len = pa.len().min(pb.len());
    let mut i = 0usize;
    while i < len && pa[i] == pb[i] {
        i += 1;
    }
    if i == len {
        return Ok(pa.len().cmp(&pb.len()));
    }
    if i == 0 {
        return Err(Error::from_code(
            ErrorCode::FOER0000,
            "document order is undefined for nodes without a common root",
        ));
    }
    let key = |n: &N| (n.kind().collection_rank(), n.sibling_index());
    Ok(key(&pa[i]).cmp(&key(&pb[i])))
}

/// Read-only node provider. Anything implementing this can be navigated by
/// [`AxisCursor`](crate::axis::AxisCursor), matched by patterns and selected by
/// expressions.
///
/// Handles are cheap to clone and compare by identity: same kind, same parent,
/// same index in the parent's collection.
pub trait XdmNode: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    fn kind(&self) -> NodeKind;
    fn name(&self) -> Option<QName>;
    fn string_value(&self) -> String;

    fn parent(&self) -> Option<Self>;

    /// Index of this node in its parent's children, attributes or namespaces,
    /// whichever collection it belongs to. Zero for a root.
    fn sibling_index(&self) -> usize;

    fn child_count(&self) -> usize;
    fn child_at(&self, index: usize) -> Option<Self>;

    fn attribute_count(&self) -> usize {
        0
    }
    fn attribute_at(&self, _index: usize) -> Option<Self> {
        None
    }

    /// Bindings declared on this element itself (not inherited ones).
    fn namespace_declarations(&self) -> SmallVec<[NamespaceBinding; 4]> {
        SmallVec::new()
    }

    /// Materialize the namespace node for `binding` owned by this element, at position
    /// `index` of its in-scope namespaces.
    fn make_namespace(&self, _binding: &NamespaceBinding, _index: usize) -> Option<Self> {
        None
    }

    fn base_uri(&self) -> Option<String> {
        None
    }

    /// Element with the given ID in this node's document.
    fn select_id(&self, _id: &str) -> Option<Self> {
        None
    }

    fn unparsed_entity(&self, _name: &str) -> Option<String> {
        None
    }

    fn fingerprint(&self) -> Option<Fingerprint> {
        self.name()
            .map(|q| NamePool::global().allocate(q.ns_uri.as_deref().unwrap_or(""), &q.local))
    }

    fn has_children(&self) -> bool {
        self.child_count() > 0
    }

    fn root(&self) -> Self {
        let mut cur = self.clone();
        while let Some(p) = cur.parent() {
            cur = p;
        }
        cur
    }

    /// Default document order comparison uses ancestry and sibling order.
    fn compare_order(&self, other: &Self) -> Result<Ordering, Error> {
        try_compare_by_ancestry(self, other)
    }

    /// Identifier unique within the document, derived from kind, parent and index only.
    fn generate_id(&self) -> String {
        let mut steps: SmallVec<[(char, usize); 16]> = SmallVec::new();
        let mut cur = Some(self.clone());
        while let Some(n) = cur {
            if n.kind() != NodeKind::Document {
                steps.push((n.kind().letter(), n.sibling_index()));
            }
            cur = n.parent();
        }
        steps.iter().rev().fold(String::new(), |mut id, (letter, index)| {
            id.push(*letter);
            id.push_str(&index.to_string());
            id
        })
    }
}
