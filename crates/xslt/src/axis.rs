//! Lazy axis traversal.
//!
//! [`AxisCursor`] is a resumable state machine over one axis from one origin node.
//! It does nothing until first pulled, and its traversal state is a handful of node
//! handles and indices, so `clone()` is the cheap duplicate used by
//! [`NodeEnumeration::count_remaining`].

use crate::consts::XML_URI;
use crate::model::{NamespaceBinding, NodeKind, XdmNode};
use crate::pattern::NodeTest;
use crate::runtime::Error;
use smallvec::SmallVec;
use string_cache::DefaultAtom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Ancestor,
    AncestorOrSelf,
    Attribute,
    Child,
    Descendant,
    DescendantOrSelf,
    Following,
    FollowingSibling,
    Namespace,
    Parent,
    Preceding,
    PrecedingSibling,
    SelfAxis,
    /// Union of `preceding` and `ancestor` in reverse document order. Used by
    /// `level="any"` numbering only.
    PrecedingOrAncestor,
}

impl Axis {
    /// Output is in ascending document order.
    pub fn is_forwards(self) -> bool {
        matches!(
            self,
            Axis::Attribute
                | Axis::Child
                | Axis::Descendant
                | Axis::DescendantOrSelf
                | Axis::Following
                | Axis::FollowingSibling
                | Axis::Parent
                | Axis::SelfAxis
        )
    }

    /// Output is in descending document order.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Ancestor
                | Axis::AncestorOrSelf
                | Axis::Preceding
                | Axis::PrecedingSibling
                | Axis::PrecedingOrAncestor
                | Axis::Parent
                | Axis::SelfAxis
        )
    }

    /// Output never contains two nodes where one is an ancestor of the other.
    pub fn is_peer(self) -> bool {
        matches!(
            self,
            Axis::Attribute
                | Axis::Child
                | Axis::FollowingSibling
                | Axis::Namespace
                | Axis::Parent
                | Axis::PrecedingSibling
                | Axis::SelfAxis
        )
    }

    /// Node kind selected by a `*` name test on this axis.
    pub fn principal_node_kind(self) -> NodeKind {
        match self {
            Axis::Attribute => NodeKind::Attribute,
            Axis::Namespace => NodeKind::Namespace,
            _ => NodeKind::Element,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::Ancestor => "ancestor",
            Axis::AncestorOrSelf => "ancestor-or-self",
            Axis::Attribute => "attribute",
            Axis::Child => "child",
            Axis::Descendant => "descendant",
            Axis::DescendantOrSelf => "descendant-or-self",
            Axis::Following => "following",
            Axis::FollowingSibling => "following-sibling",
            Axis::Namespace => "namespace",
            Axis::Parent => "parent",
            Axis::Preceding => "preceding",
            Axis::PrecedingSibling => "preceding-sibling",
            Axis::SelfAxis => "self",
            Axis::PrecedingOrAncestor => "preceding-or-ancestor",
        }
    }
}

/// Fallible, duplicable node cursor shared by axis traversal and node-set expressions.
pub trait NodeEnumeration<N>: Send {
    /// Consume and return the next node.
    fn next_node(&mut self) -> Result<Option<N>, Error>;

    /// Whether another node is available, without consuming it.
    fn has_next(&mut self) -> Result<bool, Error>;

    /// Independent copy positioned where this cursor currently is.
    fn boxed_clone(&self) -> Box<dyn NodeEnumeration<N>>;

    fn is_sorted(&self) -> bool;
    fn is_reverse_sorted(&self) -> bool;
    fn is_peer(&self) -> bool;

    /// Number of nodes not yet consumed. Exhausts a duplicate; the live cursor is untouched.
    fn count_remaining(&self) -> Result<usize, Error> {
        let mut dup = self.boxed_clone();
        let mut n = 0usize;
        while dup.next_node()?.is_some() {
            n += 1;
        }
        Ok(n)
    }
}

// Navigation over the index-addressed child collections.

fn in_child_collection<N: XdmNode>(n: &N) -> bool {
    !matches!(n.kind(), NodeKind::Attribute | NodeKind::Namespace)
}

fn first_child<N: XdmNode>(n: &N) -> Option<N> {
    n.child_at(0)
}

fn last_child<N: XdmNode>(n: &N) -> Option<N> {
    n.child_count().checked_sub(1).and_then(|i| n.child_at(i))
}

fn next_sibling<N: XdmNode>(n: &N) -> Option<N> {
    if !in_child_collection(n) {
        return None;
    }
    n.parent().and_then(|p| p.child_at(n.sibling_index() + 1))
}

fn prev_sibling<N: XdmNode>(n: &N) -> Option<N> {
    if !in_child_collection(n) {
        return None;
    }
    let i = n.sibling_index().checked_sub(1)?;
    n.parent().and_then(|p| p.child_at(i))
}

fn last_descendant<N: XdmNode>(n: N) -> N {
    let mut cur = n;
    while let Some(c) = last_child(&cur) {
        cur = c;
    }
    cur
}

/// First node after the subtree rooted at `n` (children collections only).
fn after_subtree<N: XdmNode>(n: &N) -> Option<N> {
    let mut cur = n.clone();
    loop {
        if let Some(s) = next_sibling(&cur) {
            return Some(s);
        }
        cur = cur.parent()?;
    }
}

/// Pre-order successor of `n`, not leaving the subtree of `anchor` when given.
fn successor_within<N: XdmNode>(n: &N, anchor: Option<&N>) -> Option<N> {
    if let Some(c) = first_child(n) {
        return Some(c);
    }
    let mut cur = n.clone();
    loop {
        if anchor == Some(&cur) {
            return None;
        }
        if let Some(s) = next_sibling(&cur) {
            return Some(s);
        }
        cur = cur.parent()?;
    }
}

/// Reverse pre-order predecessor: previous sibling's deepest last descendant, else parent.
fn predecessor<N: XdmNode>(n: &N) -> Option<N> {
    if !in_child_collection(n) {
        return n.parent();
    }
    match prev_sibling(n) {
        Some(s) => Some(last_descendant(s)),
        None => n.parent(),
    }
}

fn in_scope_namespaces<N: XdmNode>(element: &N) -> SmallVec<[NamespaceBinding; 8]> {
    let mut seen: SmallVec<[DefaultAtom; 8]> = SmallVec::new();
    let mut bindings: SmallVec<[NamespaceBinding; 8]> = SmallVec::new();
    let mut cur = Some(element.clone());
    while let Some(e) = cur {
        if e.kind() != NodeKind::Element {
            break;
        }
        for b in e.namespace_declarations() {
            if seen.contains(&b.prefix) {
                continue;
            }
            seen.push(b.prefix.clone());
            if !b.is_undeclaration() {
                bindings.push(b);
            }
        }
        cur = e.parent();
    }
    let xml = DefaultAtom::from("xml");
    if !seen.contains(&xml) {
        bindings.push(NamespaceBinding { prefix: xml, uri: DefaultAtom::from(XML_URI) });
    }
    bindings
}

#[derive(Debug, Clone)]
enum AxisState<N> {
    Init,
    Done,
    Single(Option<N>),
    Children { parent: N, next: Option<usize>, forwards: bool },
    Attributes { owner: N, next: usize },
    Namespaces { bindings: SmallVec<[NamespaceBinding; 8]>, next: usize },
    Ancestors { next: Option<N> },
    Descendants { last: Option<N>, include_self: bool, started: bool },
    Following { next: Option<N> },
    Preceding { current: N, ancestor: Option<N>, include_ancestors: bool },
}

/// Cursor over one axis from one origin, filtered by a node test.
#[derive(Debug, Clone)]
pub struct AxisCursor<N> {
    origin: N,
    axis: Axis,
    test: NodeTest,
    state: AxisState<N>,
    peeked: Option<Option<N>>,
}

impl<N: XdmNode> AxisCursor<N> {
    pub fn new(origin: N, axis: Axis, test: NodeTest) -> Self {
        Self { origin, axis, test, state: AxisState::Init, peeked: None }
    }

    /// Every node on the axis, unfiltered.
    pub fn all(origin: &N, axis: Axis) -> Self {
        Self::new(origin.clone(), axis, NodeTest::AnyNode)
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    fn init_state(&self) -> AxisState<N> {
        let origin = &self.origin;
        let container = in_child_collection(origin);
        match self.axis {
            Axis::SelfAxis => AxisState::Single(Some(origin.clone())),
            Axis::Parent => AxisState::Single(origin.parent()),
            Axis::Child if container => {
                AxisState::Children { parent: origin.clone(), next: Some(0), forwards: true }
            }
            Axis::Attribute if origin.kind() == NodeKind::Element => {
                AxisState::Attributes { owner: origin.clone(), next: 0 }
            }
            Axis::Namespace if origin.kind() == NodeKind::Element => {
                AxisState::Namespaces { bindings: in_scope_namespaces(origin), next: 0 }
            }
            Axis::Ancestor => AxisState::Ancestors { next: origin.parent() },
            Axis::AncestorOrSelf => AxisState::Ancestors { next: Some(origin.clone()) },
            Axis::Descendant if container => {
                AxisState::Descendants { last: None, include_self: false, started: false }
            }
            Axis::DescendantOrSelf if container => {
                AxisState::Descendants { last: None, include_self: true, started: false }
            }
            Axis::DescendantOrSelf => AxisState::Single(Some(origin.clone())),
            Axis::FollowingSibling | Axis::PrecedingSibling if container => match origin.parent() {
                Some(parent) => {
                    let forwards = self.axis == Axis::FollowingSibling;
                    let i = origin.sibling_index();
                    let next = if forwards { Some(i + 1) } else { i.checked_sub(1) };
                    AxisState::Children { parent, next, forwards }
                }
                None => AxisState::Done,
            },
            Axis::Following => {
                let next = if container {
                    after_subtree(origin)
                } else {
                    origin
                        .parent()
                        .and_then(|owner| first_child(&owner).or_else(|| after_subtree(&owner)))
                };
                AxisState::Following { next }
            }
            Axis::Preceding | Axis::PrecedingOrAncestor => AxisState::Preceding {
                current: origin.clone(),
                ancestor: origin.parent(),
                include_ancestors: self.axis == Axis::PrecedingOrAncestor,
            },
            _ => AxisState::Done,
        }
    }

    fn step(&mut self) -> Option<N> {
        if matches!(self.state, AxisState::Init) {
            self.state = self.init_state();
        }
        match &mut self.state {
            AxisState::Init | AxisState::Done => None,
            AxisState::Single(node) => node.take(),
            AxisState::Children { parent, next, forwards } => {
                let i = (*next)?;
                let node = parent.child_at(i);
                *next = if node.is_none() {
                    None
                } else if *forwards {
                    Some(i + 1)
                } else {
                    i.checked_sub(1)
                };
                node
            }
            AxisState::Attributes { owner, next } => {
                let node = owner.attribute_at(*next);
                *next += 1;
                node
            }
            AxisState::Namespaces { bindings, next } => {
                let i = *next;
                let binding = bindings.get(i)?;
                *next += 1;
                self.origin.make_namespace(binding, i)
            }
            AxisState::Ancestors { next } => {
                let node = next.take()?;
                *next = node.parent();
                Some(node)
            }
            AxisState::Descendants { last, include_self, started } => {
                let node = if !*started {
                    *started = true;
                    if *include_self {
                        Some(self.origin.clone())
                    } else {
                        first_child(&self.origin)
                    }
                } else {
                    last.as_ref().and_then(|prev| successor_within(prev, Some(&self.origin)))
                };
                last.clone_from(&node);
                node
            }
            AxisState::Following { next } => {
                let node = next.take()?;
                *next = successor_within(&node, None);
                Some(node)
            }
            AxisState::Preceding { current, ancestor, include_ancestors } => loop {
                let prev = predecessor(current)?;
                *current = prev.clone();
                if ancestor.as_ref() == Some(&prev) {
                    *ancestor = prev.parent();
                    if !*include_ancestors {
                        continue;
                    }
                }
                return Some(prev);
            },
        }
    }

    fn advance_raw(&mut self) -> Option<N> {
        while let Some(node) = self.step() {
            if self.test.matches(&node) {
                return Some(node);
            }
        }
        self.state = AxisState::Done;
        None
    }

    /// Consume and return the next matching node.
    pub fn advance(&mut self) -> Option<N> {
        match self.peeked.take() {
            Some(node) => node,
            None => self.advance_raw(),
        }
    }

    pub fn peek(&mut self) -> Option<&N> {
        if self.peeked.is_none() {
            self.peeked = Some(self.advance_raw());
        }
        self.peeked.as_ref().and_then(Option::as_ref)
    }

    pub fn has_next(&mut self) -> bool {
        self.peek().is_some()
    }

    pub fn count_remaining(&self) -> usize {
        self.clone().count()
    }

    pub fn is_sorted(&self) -> bool {
        self.axis.is_forwards()
    }

    pub fn is_reverse_sorted(&self) -> bool {
        self.axis.is_reverse()
    }

    pub fn is_peer(&self) -> bool {
        self.axis.is_peer()
    }
}

impl<N: XdmNode> Iterator for AxisCursor<N> {
    type Item = N;

    fn next(&mut self) -> Option<N> {
        self.advance()
    }
}

impl<N: XdmNode> NodeEnumeration<N> for AxisCursor<N> {
    fn next_node(&mut self) -> Result<Option<N>, Error> {
        Ok(self.advance())
    }

    fn has_next(&mut self) -> Result<bool, Error> {
        Ok(AxisCursor::has_next(self))
    }

    fn boxed_clone(&self) -> Box<dyn NodeEnumeration<N>> {
        Box::new(self.clone())
    }

    fn is_sorted(&self) -> bool {
        AxisCursor::is_sorted(self)
    }

    fn is_reverse_sorted(&self) -> bool {
        AxisCursor::is_reverse_sorted(self)
    }

    fn is_peer(&self) -> bool {
        AxisCursor::is_peer(self)
    }

    fn count_remaining(&self) -> Result<usize, Error> {
        Ok(AxisCursor::count_remaining(self))
    }
}
