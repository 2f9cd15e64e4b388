//! Match patterns: node tests, ID and key patterns, location path patterns and unions.
//!
//! Patterns are simplified once, then matched many times. Simplification collapses
//! structure-free paths to bare node tests and installs the positional shortcuts, so
//! the common `item[1]` and `item[last()]` shapes never enumerate their siblings.

use crate::axis::{Axis, AxisCursor};
use crate::expr::{CompareOp, DataType, Dependencies, Expression, Step};
use crate::expr::value::Value;
use crate::model::names::Fingerprint;
use crate::model::{ExpandedName, NodeKind, XdmNode};
use crate::runtime::{Context, Error};
use string_cache::DefaultAtom;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeTest {
    AnyNode,
    NoNode,
    Kind(NodeKind),
    Name { kind: NodeKind, fingerprint: Fingerprint },
    /// `prefix:*`: any node of the kind whose name is in the namespace.
    Namespace { kind: NodeKind, uri: DefaultAtom },
    /// Element, text, comment or processing instruction: what `node()` matches on the child axis.
    AnyChildNode,
}

impl NodeTest {
    pub fn named(kind: NodeKind, name: &ExpandedName) -> Self {
        NodeTest::Name { kind, fingerprint: name.fingerprint() }
    }

    /// Element name test for a name in no namespace.
    pub fn element(local: &str) -> Self {
        Self::named(NodeKind::Element, &ExpandedName::local(local))
    }

    /// Attribute name test for a name in no namespace.
    pub fn attribute(local: &str) -> Self {
        Self::named(NodeKind::Attribute, &ExpandedName::local(local))
    }

    pub fn in_namespace(kind: NodeKind, uri: &str) -> Self {
        NodeTest::Namespace { kind, uri: DefaultAtom::from(uri) }
    }

    pub fn matches<N: XdmNode>(&self, node: &N) -> bool {
        match self {
            NodeTest::AnyNode => true,
            NodeTest::NoNode => false,
            NodeTest::Kind(kind) => node.kind() == *kind,
            NodeTest::Name { kind, fingerprint } => {
                node.kind() == *kind && node.fingerprint() == Some(*fingerprint)
            }
            NodeTest::Namespace { kind, uri } => {
                node.kind() == *kind
                    && node.name().and_then(|q| q.ns_uri).is_some_and(|ns| ns.as_str() == &**uri)
            }
            NodeTest::AnyChildNode => matches!(
                node.kind(),
                NodeKind::Element
                    | NodeKind::Text
                    | NodeKind::Comment
                    | NodeKind::ProcessingInstruction
            ),
        }
    }

    /// The only kind this test can match, or `None` when several kinds qualify.
    pub fn node_kind(&self) -> Option<NodeKind> {
        match self {
            NodeTest::Kind(kind)
            | NodeTest::Name { kind, .. }
            | NodeTest::Namespace { kind, .. } => Some(*kind),
            NodeTest::AnyNode | NodeTest::NoNode | NodeTest::AnyChildNode => None,
        }
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        match self {
            NodeTest::Name { fingerprint, .. } => Some(*fingerprint),
            _ => None,
        }
    }

    pub fn default_priority(&self) -> f64 {
        match self {
            NodeTest::Name { .. } => 0.0,
            NodeTest::Namespace { .. } => -0.25,
            _ => -0.5,
        }
    }
}

/// `id('a b')`: elements whose ID is one of the whitespace-separated tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPattern {
    pub ids: String,
}

impl IdPattern {
    pub fn matches<N: XdmNode>(&self, node: &N) -> bool {
        if node.kind() != NodeKind::Element {
            return false;
        }
        let root = node.root();
        self.ids.split_whitespace().any(|token| root.select_id(token).as_ref() == Some(node))
    }
}

/// `key('name', 'value')`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    pub name: ExpandedName,
    pub value: String,
}

impl KeyPattern {
    pub fn matches<N: XdmNode>(&self, node: &N, ctx: &Context<N>) -> Result<bool, Error> {
        let controller = ctx.controller()?;
        let hits = controller.keys().select_by_key(&self.name, &node.root(), &self.value, ctx)?;
        Ok(hits.contains(node))
    }
}

#[derive(Debug, Clone)]
enum Positional<N> {
    /// No filters at all.
    None,
    /// Filters that never look at position or size.
    Plain,
    /// `[1]`: no preceding sibling passes the node test.
    First,
    /// `[last()]`: no following sibling passes the node test.
    Last,
    /// `parent::node()/step[filters]`, tested for membership by identity.
    Equivalent(Expression<N>),
}

/// A step of a location path pattern, e.g. `section/para[2]` or `chapter//note`.
#[derive(Debug, Clone)]
pub struct LocationPathPattern<N> {
    test: NodeTest,
    filters: Vec<Expression<N>>,
    parent: Option<Pattern<N>>,
    ancestor: Option<Pattern<N>>,
    positional: Positional<N>,
}

impl<N: XdmNode> LocationPathPattern<N> {
    pub fn new(test: NodeTest) -> Self {
        Self {
            test,
            filters: Vec::new(),
            parent: None,
            ancestor: None,
            positional: Positional::None,
        }
    }

    pub fn with_filter(mut self, filter: Expression<N>) -> Self {
        self.filters.push(filter);
        self.positional = self.classify();
        self
    }

    /// `parent/this`
    pub fn with_parent(mut self, parent: Pattern<N>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// `ancestor//this`
    pub fn with_ancestor(mut self, ancestor: Pattern<N>) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn test(&self) -> &NodeTest {
        &self.test
    }

    pub fn filters(&self) -> &[Expression<N>] {
        &self.filters
    }

    fn step_axis(&self) -> Axis {
        if self.test.node_kind() == Some(NodeKind::Attribute) {
            Axis::Attribute
        } else {
            Axis::Child
        }
    }

    fn classify(&self) -> Positional<N> {
        let axis = self.step_axis();
        // attributes and namespaces have no siblings; only element tests may skip the path
        let element_step = self.test.node_kind() == Some(NodeKind::Element);
        match self.filters.as_slice() {
            [] => return Positional::None,
            [only] if element_step && is_first_predicate(only) => {
                tracing::trace!(test = ?self.test, "pattern uses first-element shortcut");
                return Positional::First;
            }
            [only] if element_step && is_last_predicate(only) => {
                tracing::trace!(test = ?self.test, "pattern uses last-element shortcut");
                return Positional::Last;
            }
            _ => {}
        }
        if self.filters.iter().any(is_positional) {
            let mut step = Step::new(axis, self.test.clone());
            for f in &self.filters {
                step = step.with_filter(f.clone());
            }
            let start = Expression::Axis { axis: Axis::Parent, test: NodeTest::AnyNode };
            return Positional::Equivalent(Expression::Path { start: Box::new(start), step });
        }
        Positional::Plain
    }

    pub fn matches(&self, node: &N, ctx: &Context<N>) -> Result<bool, Error> {
        if !self.test.matches(node) {
            return Ok(false);
        }
        if let Some(parent_pattern) = &self.parent {
            match node.parent() {
                Some(parent) if parent_pattern.matches(&parent, ctx)? => {}
                _ => return Ok(false),
            }
        }
        if let Some(ancestor_pattern) = &self.ancestor {
            let mut cur = node.parent();
            loop {
                match cur {
                    Some(a) if ancestor_pattern.matches(&a, ctx)? => break,
                    Some(a) => cur = a.parent(),
                    None => return Ok(false),
                }
            }
        }
        self.matches_position(node, ctx)
    }

    fn matches_position(&self, node: &N, ctx: &Context<N>) -> Result<bool, Error> {
        match &self.positional {
            Positional::None => Ok(true),
            Positional::First => {
                Ok(!AxisCursor::new(node.clone(), Axis::PrecedingSibling, self.test.clone())
                    .has_next())
            }
            Positional::Last => {
                Ok(!AxisCursor::new(node.clone(), Axis::FollowingSibling, self.test.clone())
                    .has_next())
            }
            Positional::Equivalent(expr) => {
                let mut selected = expr.enumerate(&ctx.with_node(node.clone()), false)?;
                while let Some(candidate) = selected.next_node()? {
                    if &candidate == node {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Positional::Plain => {
                let focus = ctx.singleton(node.clone());
                for f in &self.filters {
                    if !f.evaluate_as_boolean(&focus)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    fn simplify(&self) -> Result<Pattern<N>, Error> {
        let parent = self.parent.as_ref().map(Pattern::simplify).transpose()?;
        let ancestor = self.ancestor.as_ref().map(Pattern::simplify).transpose()?;
        let mut filters = Vec::with_capacity(self.filters.len());
        for f in &self.filters {
            let f = f.simplify()?;
            match &f {
                Expression::Literal(Value::Number(_)) => filters.push(f),
                Expression::Literal(v) if v.as_boolean() => {}
                Expression::Literal(_) => return Ok(Pattern::Test(NodeTest::NoNode)),
                _ => filters.push(f),
            }
        }
        if parent.is_none() && ancestor.is_none() && filters.is_empty() {
            return Ok(Pattern::Test(self.test.clone()));
        }
        let mut simplified = Self {
            test: self.test.clone(),
            filters,
            parent,
            ancestor,
            positional: Positional::None,
        };
        simplified.positional = simplified.classify();
        Ok(Pattern::Path(Box::new(simplified)))
    }

    fn default_priority(&self) -> f64 {
        if self.parent.is_none() && self.ancestor.is_none() && self.filters.is_empty() {
            self.test.default_priority()
        } else {
            0.5
        }
    }
}

fn is_first_predicate<N>(f: &Expression<N>) -> bool {
    match f {
        Expression::Literal(Value::Number(n)) => *n == 1.0,
        Expression::PositionRange { min: 1, max: Some(1) } => true,
        _ => false,
    }
}

fn is_last_predicate<N>(f: &Expression<N>) -> bool {
    match f {
        Expression::IsLast(true) | Expression::Last => true,
        Expression::Compare { op: CompareOp::Eq, lhs, rhs } => matches!(
            (lhs.as_ref(), rhs.as_ref()),
            (Expression::Position, Expression::Last) | (Expression::Last, Expression::Position)
        ),
        _ => false,
    }
}

fn is_positional<N: XdmNode>(f: &Expression<N>) -> bool {
    matches!(f.data_type(), DataType::Number | DataType::Any)
        || f.dependencies().intersects(Dependencies::POSITION | Dependencies::LAST)
}

#[derive(Debug, Clone)]
pub enum Pattern<N> {
    Test(NodeTest),
    Id(IdPattern),
    Key(KeyPattern),
    Path(Box<LocationPathPattern<N>>),
    Union(Box<Pattern<N>>, Box<Pattern<N>>),
}

impl<N: XdmNode> Pattern<N> {
    pub fn id(ids: impl Into<String>) -> Self {
        Pattern::Id(IdPattern { ids: ids.into() })
    }

    pub fn key(name: ExpandedName, value: impl Into<String>) -> Self {
        Pattern::Key(KeyPattern { name, value: value.into() })
    }

    pub fn path(path: LocationPathPattern<N>) -> Self {
        Pattern::Path(Box::new(path))
    }

    pub fn union(a: Pattern<N>, b: Pattern<N>) -> Self {
        Pattern::Union(Box::new(a), Box::new(b))
    }

    pub fn matches(&self, node: &N, ctx: &Context<N>) -> Result<bool, Error> {
        match self {
            Pattern::Test(test) => Ok(test.matches(node)),
            Pattern::Id(id) => Ok(id.matches(node)),
            Pattern::Key(key) => key.matches(node, ctx),
            Pattern::Path(path) => path.matches(node, ctx),
            Pattern::Union(a, b) => Ok(a.matches(node, ctx)? || b.matches(node, ctx)?),
        }
    }

    pub fn simplify(&self) -> Result<Self, Error> {
        match self {
            Pattern::Path(path) => path.simplify(),
            Pattern::Union(a, b) => Ok(Pattern::union(a.simplify()?, b.simplify()?)),
            other => Ok(other.clone()),
        }
    }

    /// The single node kind every match has, or `None` for "any kind".
    pub fn node_kind(&self) -> Option<NodeKind> {
        match self {
            Pattern::Test(test) => test.node_kind(),
            Pattern::Id(_) => Some(NodeKind::Element),
            Pattern::Key(_) => None,
            Pattern::Path(path) => path.test.node_kind(),
            Pattern::Union(a, b) => {
                let kind = a.node_kind();
                if kind == b.node_kind() { kind } else { None }
            }
        }
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        match self {
            Pattern::Test(test) => test.fingerprint(),
            Pattern::Path(path) => path.test.fingerprint(),
            Pattern::Union(a, b) => {
                let fp = a.fingerprint();
                if fp == b.fingerprint() { fp } else { None }
            }
            Pattern::Id(_) | Pattern::Key(_) => None,
        }
    }

    pub fn default_priority(&self) -> f64 {
        match self {
            Pattern::Test(test) => test.default_priority(),
            Pattern::Id(_) | Pattern::Key(_) => 0.5,
            Pattern::Path(path) => path.default_priority(),
            Pattern::Union(a, b) => a.default_priority().max(b.default_priority()),
        }
    }
}

impl<N> From<NodeTest> for Pattern<N> {
    fn from(test: NodeTest) -> Self {
        Pattern::Test(test)
    }
}
