//! Expression trees and their four-operation protocol.
//!
//! Every [`Expression`] supports:
//!
//! - [`Expression::simplify`]: context-free rewriting and constant folding;
//! - [`Expression::dependencies`]: the context facets the expression reads;
//! - [`Expression::reduce`]: partial evaluation against a context for a chosen set
//!   of facets, hoisting invariant sub-expressions into literals;
//! - [`Expression::evaluate`]: the final value, with [`Expression::enumerate`] as
//!   the lazy entry point for node-set producing expressions.
//!
//! Expressions are immutable. Every rewrite returns a new tree.

use crate::axis::{Axis, AxisCursor, NodeEnumeration};
use crate::functions::{FunctionEntry, FunctionRegistry};
use crate::model::{ExpandedName, XdmNode};
use crate::pattern::NodeTest;
use crate::runtime::{Context, Controller, Error};
use core::fmt;
use std::borrow::Cow;
use std::sync::Arc;

pub mod compare;
pub mod cursors;
pub mod value;

use cursors::{FilterCursor, NodeSetCursor, PathCursor, UnionCursor, drain};
use value::{NodeSet, Value, sort_document_order};

bitflags::bitflags! {
    /// Context facets an expression reads while it is evaluated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Dependencies: u8 {
        const VARIABLES = 1;
        const CURRENT_NODE = 4;
        const CONTEXT_NODE = 8;
        const POSITION = 16;
        const LAST = 32;
        const CONTROLLER = 64;
        const CONTEXT_DOCUMENT = 128;
        /// Facets that stay fixed while a path step or predicate is iterated.
        const XSLT_CONTEXT =
            Self::CONTROLLER.bits() | Self::VARIABLES.bits() | Self::CURRENT_NODE.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Number,
    String,
    NodeSet,
    /// Only known at run time.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BooleanOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// The operator with its operands swapped: `a < b` is `b > a`.
    pub fn flip(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            other => other,
        }
    }

    pub fn is_equality(self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl ArithmeticOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ArithmeticOp::Add => a + b,
            ArithmeticOp::Subtract => a - b,
            ArithmeticOp::Multiply => a * b,
            ArithmeticOp::Divide => a / b,
            // truncating remainder, sign of the dividend
            ArithmeticOp::Modulo => a % b,
        }
    }
}

/// One step of a path: an axis, a node test and zero or more predicates.
#[derive(Debug, Clone)]
pub struct Step<N> {
    pub axis: Axis,
    pub test: NodeTest,
    pub filters: Vec<Expression<N>>,
}

enum Predicate<N> {
    Always,
    Never,
    Keep(Expression<N>),
}

/// Rewrites shared by step predicates and filter expressions.
fn normalize_predicate<N: XdmNode>(predicate: Expression<N>) -> Predicate<N> {
    match predicate {
        Expression::Literal(Value::Number(n)) => {
            if n >= 1.0 && n.fract() == 0.0 {
                let at = n as usize;
                Predicate::Keep(Expression::PositionRange { min: at, max: Some(at) })
            } else {
                Predicate::Never
            }
        }
        Expression::Literal(v) => {
            if v.as_boolean() {
                Predicate::Always
            } else {
                Predicate::Never
            }
        }
        Expression::Last => Predicate::Keep(Expression::IsLast(true)),
        other => Predicate::Keep(other),
    }
}

impl<N: XdmNode> Step<N> {
    pub fn new(axis: Axis, test: NodeTest) -> Self {
        Self { axis, test, filters: Vec::new() }
    }

    pub fn with_filter(mut self, filter: Expression<N>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn dependencies(&self) -> Dependencies {
        self.filters.iter().fold(Dependencies::empty(), |d, f| d | f.dependencies())
    }

    pub fn simplify(&self) -> Result<Self, Error> {
        let mut filters = Vec::with_capacity(self.filters.len());
        for f in &self.filters {
            match normalize_predicate(f.simplify()?) {
                Predicate::Always => {}
                Predicate::Never => return Ok(Step::new(self.axis, NodeTest::NoNode)),
                Predicate::Keep(p) => filters.push(p),
            }
        }
        Ok(Step { axis: self.axis, test: self.test.clone(), filters })
    }

    fn reduce(&self, target: Dependencies, ctx: &Context<N>) -> Result<Self, Error> {
        let filters =
            self.filters.iter().map(|f| f.reduce(target, ctx)).collect::<Result<Vec<_>, _>>()?;
        Ok(Step { axis: self.axis, test: self.test.clone(), filters })
    }

    fn hoist_invariants(&self, ctx: &Context<N>) -> Cow<'_, Self> {
        let fixed = invariant_facets(self.dependencies(), ctx);
        if fixed.is_empty() {
            return Cow::Borrowed(self);
        }
        self.reduce(fixed, ctx).map_or(Cow::Borrowed(self), Cow::Owned)
    }

    /// Nodes reached by this step from `origin`, in axis order.
    pub fn enumerate(&self, origin: &N, ctx: &Context<N>) -> Box<dyn NodeEnumeration<N>> {
        let filters: Arc<[Expression<N>]> = Arc::from(self.filters.clone());
        enumerate_step(origin, self.axis, &self.test, &filters, ctx)
    }
}

/// Facets among `deps` that stay fixed while a predicate runs over a node sequence
/// and that `ctx` can supply.
fn invariant_facets<N: XdmNode>(deps: Dependencies, ctx: &Context<N>) -> Dependencies {
    let mut fixed = deps & Dependencies::XSLT_CONTEXT;
    if ctx.controller().is_err() {
        fixed.remove(Dependencies::CONTROLLER);
    }
    if ctx.current_node().is_err() {
        fixed.remove(Dependencies::CURRENT_NODE);
    }
    fixed
}

pub(crate) fn enumerate_step<N: XdmNode>(
    origin: &N,
    axis: Axis,
    test: &NodeTest,
    filters: &Arc<[Expression<N>]>,
    ctx: &Context<N>,
) -> Box<dyn NodeEnumeration<N>> {
    let mut cursor: Box<dyn NodeEnumeration<N>> =
        Box::new(AxisCursor::new(origin.clone(), axis, test.clone()));
    for index in 0..filters.len() {
        cursor = Box::new(FilterCursor::new(cursor, Arc::clone(filters), index, ctx.clone()));
    }
    cursor
}

/// A resolved call to a registered leaf function.
#[derive(Clone)]
pub struct FunctionCall<N> {
    pub name: ExpandedName,
    pub entry: FunctionEntry<N>,
    pub args: Vec<Expression<N>>,
}

impl<N> fmt::Debug for FunctionCall<N>
where
    N: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCall")
            .field("name", &self.name)
            .field("data_type", &self.entry.data_type)
            .field("args", &self.args)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Expression<N> {
    Literal(Value<N>),
    /// `.`
    ContextNode,
    /// `current()`
    CurrentNode,
    /// `/`
    Root,
    Axis {
        axis: Axis,
        test: NodeTest,
    },
    Path {
        start: Box<Expression<N>>,
        step: Step<N>,
    },
    Filter {
        base: Box<Expression<N>>,
        predicate: Box<Expression<N>>,
    },
    Union(Box<Expression<N>>, Box<Expression<N>>),
    Variable(ExpandedName),
    Position,
    Last,
    /// `position() = last()` when `true`, `position() != last()` when `false`.
    IsLast(bool),
    /// `min <= position() <= max`.
    PositionRange {
        min: usize,
        max: Option<usize>,
    },
    Boolean {
        op: BooleanOp,
        lhs: Box<Expression<N>>,
        rhs: Box<Expression<N>>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<Expression<N>>,
        rhs: Box<Expression<N>>,
    },
    Arithmetic {
        op: ArithmeticOp,
        lhs: Box<Expression<N>>,
        rhs: Box<Expression<N>>,
    },
    Negate(Box<Expression<N>>),
    Not(Box<Expression<N>>),
    Convert {
        to: DataType,
        arg: Box<Expression<N>>,
    },
    Count(Box<Expression<N>>),
    /// `key(name, value)`. `document` and `controller` are filled in by [`Expression::reduce`].
    Key {
        name: ExpandedName,
        value: Box<Expression<N>>,
        document: Option<N>,
        controller: Option<Arc<Controller<N>>>,
    },
    Id {
        arg: Box<Expression<N>>,
        document: Option<N>,
    },
    GenerateId(Option<Box<Expression<N>>>),
    Document(Box<Expression<N>>),
    Call(FunctionCall<N>),
}

impl<N: XdmNode> Expression<N> {
    // Constructors ----------------------------------------------------------

    pub fn literal(value: impl Into<Value<N>>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn empty() -> Self {
        Expression::Literal(Value::empty())
    }

    pub fn axis(axis: Axis, test: NodeTest) -> Self {
        Expression::Axis { axis, test }
    }

    pub fn child(test: NodeTest) -> Self {
        Self::axis(Axis::Child, test)
    }

    pub fn path(start: Expression<N>, step: Step<N>) -> Self {
        Expression::Path { start: Box::new(start), step }
    }

    pub fn filter(base: Expression<N>, predicate: Expression<N>) -> Self {
        Expression::Filter { base: Box::new(base), predicate: Box::new(predicate) }
    }

    pub fn union(a: Expression<N>, b: Expression<N>) -> Self {
        Expression::Union(Box::new(a), Box::new(b))
    }

    pub fn variable(name: ExpandedName) -> Self {
        Expression::Variable(name)
    }

    pub fn and(lhs: Expression<N>, rhs: Expression<N>) -> Self {
        Expression::Boolean { op: BooleanOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn or(lhs: Expression<N>, rhs: Expression<N>) -> Self {
        Expression::Boolean { op: BooleanOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn compare(lhs: Expression<N>, op: CompareOp, rhs: Expression<N>) -> Self {
        Expression::Compare { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn arithmetic(lhs: Expression<N>, op: ArithmeticOp, rhs: Expression<N>) -> Self {
        Expression::Arithmetic { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn negate(arg: Expression<N>) -> Self {
        Expression::Negate(Box::new(arg))
    }

    pub fn not(arg: Expression<N>) -> Self {
        Expression::Not(Box::new(arg))
    }

    pub fn convert(to: DataType, arg: Expression<N>) -> Self {
        Expression::Convert { to, arg: Box::new(arg) }
    }

    pub fn count(arg: Expression<N>) -> Self {
        Expression::Count(Box::new(arg))
    }

    pub fn key(name: ExpandedName, value: Expression<N>) -> Self {
        Expression::Key { name, value: Box::new(value), document: None, controller: None }
    }

    pub fn id(arg: Expression<N>) -> Self {
        Expression::Id { arg: Box::new(arg), document: None }
    }

    pub fn generate_id(arg: Option<Expression<N>>) -> Self {
        Expression::GenerateId(arg.map(Box::new))
    }

    pub fn document(arg: Expression<N>) -> Self {
        Expression::Document(Box::new(arg))
    }

    /// Resolve `name#arity` in `registry` and build the call.
    pub fn call(
        registry: &FunctionRegistry<N>,
        name: &ExpandedName,
        args: Vec<Expression<N>>,
    ) -> Result<Self, Error> {
        let entry = registry.resolve(name, args.len())?;
        Ok(Expression::Call(FunctionCall { name: name.clone(), entry: entry.clone(), args }))
    }

    // Static analysis -------------------------------------------------------

    pub fn data_type(&self) -> DataType {
        match self {
            Expression::Literal(v) => v.data_type(),
            Expression::ContextNode
            | Expression::CurrentNode
            | Expression::Root
            | Expression::Axis { .. }
            | Expression::Path { .. }
            | Expression::Union(..)
            | Expression::Key { .. }
            | Expression::Id { .. }
            | Expression::Document(_) => DataType::NodeSet,
            Expression::Filter { base, .. } => base.data_type(),
            Expression::Variable(_) => DataType::Any,
            Expression::Position
            | Expression::Last
            | Expression::Arithmetic { .. }
            | Expression::Negate(_)
            | Expression::Count(_) => DataType::Number,
            Expression::IsLast(_)
            | Expression::PositionRange { .. }
            | Expression::Boolean { .. }
            | Expression::Compare { .. }
            | Expression::Not(_) => DataType::Boolean,
            Expression::Convert { to, .. } => *to,
            Expression::GenerateId(_) => DataType::String,
            Expression::Call(call) => call.entry.data_type,
        }
    }

    pub fn dependencies(&self) -> Dependencies {
        use Dependencies as D;
        match self {
            Expression::Literal(_) => D::empty(),
            Expression::ContextNode | Expression::Axis { .. } => D::CONTEXT_NODE,
            Expression::CurrentNode => D::CURRENT_NODE,
            Expression::Root => D::CONTEXT_DOCUMENT,
            Expression::Path { start, step } => {
                start.dependencies() | (step.dependencies() & D::XSLT_CONTEXT)
            }
            Expression::Filter { base, predicate } => {
                base.dependencies() | (predicate.dependencies() & D::XSLT_CONTEXT)
            }
            Expression::Union(a, b) => a.dependencies() | b.dependencies(),
            Expression::Variable(_) => D::VARIABLES,
            Expression::Position | Expression::PositionRange { .. } => D::POSITION,
            Expression::Last => D::LAST,
            Expression::IsLast(_) => D::POSITION | D::LAST,
            Expression::Boolean { lhs, rhs, .. }
            | Expression::Compare { lhs, rhs, .. }
            | Expression::Arithmetic { lhs, rhs, .. } => lhs.dependencies() | rhs.dependencies(),
            Expression::Negate(arg)
            | Expression::Not(arg)
            | Expression::Count(arg)
            | Expression::Convert { arg, .. } => arg.dependencies(),
            Expression::Key { value, document, controller, .. } => {
                let mut d = value.dependencies();
                if document.is_none() {
                    d |= D::CONTEXT_DOCUMENT;
                }
                if controller.is_none() {
                    d |= D::CONTROLLER;
                }
                d
            }
            Expression::Id { arg, document } => {
                let d = arg.dependencies();
                if document.is_none() { d | D::CONTEXT_DOCUMENT } else { d }
            }
            Expression::GenerateId(arg) => {
                D::CONTROLLER | arg.as_ref().map_or(D::CONTEXT_NODE, |a| a.dependencies())
            }
            Expression::Document(arg) => arg.dependencies() | D::CONTROLLER,
            Expression::Call(call) => {
                call.args.iter().fold(call.entry.dependencies, |d, a| d | a.dependencies())
            }
        }
    }

    fn is_literal(&self) -> bool {
        matches!(self, Expression::Literal(_))
    }

    fn is_empty_literal(&self) -> bool {
        matches!(self, Expression::Literal(v) if v.is_empty_node_set())
    }

    fn literal_boolean(&self) -> Option<bool> {
        match self {
            Expression::Literal(v) => Some(v.as_boolean()),
            _ => None,
        }
    }

    /// Rebuild this node with `f` applied to every operand expression. Steps are
    /// handled by the callers since they take a different target.
    fn map_operands<F>(&self, mut f: F) -> Result<Self, Error>
    where
        F: FnMut(&Expression<N>) -> Result<Expression<N>, Error>,
    {
        let mut b = |e: &Expression<N>| f(e).map(Box::new);
        Ok(match self {
            Expression::Literal(_)
            | Expression::ContextNode
            | Expression::CurrentNode
            | Expression::Root
            | Expression::Axis { .. }
            | Expression::Variable(_)
            | Expression::Position
            | Expression::Last
            | Expression::IsLast(_)
            | Expression::PositionRange { .. } => self.clone(),
            Expression::Path { start, step } => {
                Expression::Path { start: b(start)?, step: step.clone() }
            }
            Expression::Filter { base, predicate } => {
                Expression::Filter { base: b(base)?, predicate: predicate.clone() }
            }
            Expression::Union(x, y) => Expression::Union(b(x)?, b(y)?),
            Expression::Boolean { op, lhs, rhs } => {
                Expression::Boolean { op: *op, lhs: b(lhs)?, rhs: b(rhs)? }
            }
            Expression::Compare { op, lhs, rhs } => {
                Expression::Compare { op: *op, lhs: b(lhs)?, rhs: b(rhs)? }
            }
            Expression::Arithmetic { op, lhs, rhs } => {
                Expression::Arithmetic { op: *op, lhs: b(lhs)?, rhs: b(rhs)? }
            }
            Expression::Negate(arg) => Expression::Negate(b(arg)?),
            Expression::Not(arg) => Expression::Not(b(arg)?),
            Expression::Convert { to, arg } => Expression::Convert { to: *to, arg: b(arg)? },
            Expression::Count(arg) => Expression::Count(b(arg)?),
            Expression::Key { name, value, document, controller } => Expression::Key {
                name: name.clone(),
                value: b(value)?,
                document: document.clone(),
                controller: controller.clone(),
            },
            Expression::Id { arg, document } => {
                Expression::Id { arg: b(arg)?, document: document.clone() }
            }
            Expression::GenerateId(arg) => {
                Expression::GenerateId(arg.as_deref().map(&mut b).transpose()?)
            }
            Expression::Document(arg) => Expression::Document(b(arg)?),
            Expression::Call(call) => Expression::Call(FunctionCall {
                name: call.name.clone(),
                entry: call.entry.clone(),
                args: call.args.iter().map(&mut f).collect::<Result<Vec<_>, _>>()?,
            }),
        })
    }

    // Simplify --------------------------------------------------------------

    /// Context-free rewrite. Literal-only sub-trees with no intrinsic dependency are
    /// folded by evaluating them against an empty context.
    pub fn simplify(&self) -> Result<Self, Error> {
        let rebuilt = match self {
            Expression::Path { start, step } => {
                let start = start.simplify()?;
                let step = step.simplify()?;
                if start.is_empty_literal() || step.test == NodeTest::NoNode {
                    return Ok(Self::empty());
                }
                Expression::Path { start: Box::new(start), step }
            }
            Expression::Filter { base, predicate } => {
                let base = base.simplify()?;
                match normalize_predicate(predicate.simplify()?) {
                    Predicate::Always => base,
                    Predicate::Never => Self::empty(),
                    Predicate::Keep(_) if base.is_empty_literal() => Self::empty(),
                    Predicate::Keep(p) => {
                        Expression::Filter { base: Box::new(base), predicate: Box::new(p) }
                    }
                }
            }
            Expression::Union(a, b) => {
                let a = a.simplify()?;
                let b = b.simplify()?;
                if a.is_empty_literal() {
                    b
                } else if b.is_empty_literal() {
                    a
                } else {
                    Expression::Union(Box::new(a), Box::new(b))
                }
            }
            Expression::Boolean { op, lhs, rhs } => {
                let lhs = lhs.simplify()?;
                match (op, lhs.literal_boolean()) {
                    (BooleanOp::And, Some(false)) => return Ok(Self::literal(false)),
                    (BooleanOp::Or, Some(true)) => return Ok(Self::literal(true)),
                    _ => Expression::Boolean {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs.simplify()?),
                    },
                }
            }
            other => other.map_operands(Expression::simplify)?,
        };
        if !rebuilt.is_literal() && rebuilt.dependencies().is_empty() {
            return Ok(Expression::Literal(rebuilt.evaluate(&Context::empty())?));
        }
        Ok(rebuilt)
    }

    // Reduce ----------------------------------------------------------------

    /// Partially evaluate against `ctx` for the facets in `target`.
    ///
    /// The result behaves like `self` under any context that agrees with `ctx` on
    /// those facets. A sub-expression whose remaining dependencies all lie in
    /// `target` is evaluated now and replaced by its value.
    pub fn reduce(&self, target: Dependencies, ctx: &Context<N>) -> Result<Self, Error> {
        if !self.dependencies().intersects(target) {
            return Ok(self.clone());
        }
        let inner = target & Dependencies::XSLT_CONTEXT;
        let rebuilt = match self {
            Expression::Path { start, step } => Expression::Path {
                start: Box::new(start.reduce(target, ctx)?),
                step: step.reduce(inner, ctx)?,
            },
            Expression::Filter { base, predicate } => Expression::Filter {
                base: Box::new(base.reduce(target, ctx)?),
                predicate: Box::new(predicate.reduce(inner, ctx)?),
            },
            Expression::Key { name, value, document, controller } => Expression::Key {
                name: name.clone(),
                value: Box::new(value.reduce(target, ctx)?),
                document: match document {
                    None if target.contains(Dependencies::CONTEXT_DOCUMENT) => {
                        Some(ctx.context_document()?)
                    }
                    d => d.clone(),
                },
                controller: match controller {
                    None if target.contains(Dependencies::CONTROLLER) => {
                        Some(Arc::clone(ctx.controller()?))
                    }
                    c => c.clone(),
                },
            },
            Expression::Id { arg, document } => Expression::Id {
                arg: Box::new(arg.reduce(target, ctx)?),
                document: match document {
                    None if target.contains(Dependencies::CONTEXT_DOCUMENT) => {
                        Some(ctx.context_document()?)
                    }
                    d => d.clone(),
                },
            },
            other => other.map_operands(|e| e.reduce(target, ctx))?,
        };
        if !rebuilt.is_literal() && target.contains(rebuilt.dependencies()) {
            let value = rebuilt.evaluate(ctx)?;
            tracing::trace!(data_type = ?value.data_type(), "reduced expression to a literal");
            return Ok(Expression::Literal(value));
        }
        Ok(rebuilt)
    }

    /// Reduce by the facets that stay fixed across a predicate's iterations, so that
    /// controller, variable and `current()` sub-expressions run once per enumeration.
    /// A facet that cannot be bound now is left for per-node evaluation to report.
    fn hoist_invariants(&self, ctx: &Context<N>) -> Cow<'_, Self> {
        let fixed = invariant_facets(self.dependencies(), ctx);
        if fixed.is_empty() {
            return Cow::Borrowed(self);
        }
        self.reduce(fixed, ctx).map_or(Cow::Borrowed(self), Cow::Owned)
    }

    // Evaluate --------------------------------------------------------------

    pub fn evaluate(&self, ctx: &Context<N>) -> Result<Value<N>, Error> {
        match self {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::ContextNode
            | Expression::CurrentNode
            | Expression::Root
            | Expression::Axis { .. }
            | Expression::Path { .. }
            | Expression::Filter { .. }
            | Expression::Union(..) => {
                let nodes = drain(self.enumerate(ctx, true)?)?;
                Ok(Value::NodeSet(NodeSet::from_sorted(nodes)))
            }
            Expression::Variable(name) => ctx.variable(name).cloned(),
            Expression::Position => Ok(Value::Number(ctx.position()? as f64)),
            Expression::Last => Ok(Value::Number(ctx.last()? as f64)),
            Expression::IsLast(condition) => {
                Ok(Value::Boolean((ctx.position()? == ctx.last()?) == *condition))
            }
            Expression::PositionRange { min, max } => {
                let p = ctx.position()?;
                Ok(Value::Boolean(p >= *min && max.is_none_or(|m| p <= m)))
            }
            Expression::Boolean { op, lhs, rhs } => {
                let l = lhs.evaluate_as_boolean(ctx)?;
                let result = match op {
                    BooleanOp::And => l && rhs.evaluate_as_boolean(ctx)?,
                    BooleanOp::Or => l || rhs.evaluate_as_boolean(ctx)?,
                };
                Ok(Value::Boolean(result))
            }
            Expression::Compare { op, lhs, rhs } => {
                let l = lhs.evaluate(ctx)?;
                let r = rhs.evaluate(ctx)?;
                Ok(Value::Boolean(compare::compare_values(&l, *op, &r)))
            }
            Expression::Arithmetic { op, lhs, rhs } => {
                let (l, r) = (lhs.evaluate_as_number(ctx)?, rhs.evaluate_as_number(ctx)?);
                Ok(Value::Number(op.apply(l, r)))
            }
            Expression::Negate(arg) => Ok(Value::Number(-arg.evaluate_as_number(ctx)?)),
            Expression::Not(arg) => Ok(Value::Boolean(!arg.evaluate_as_boolean(ctx)?)),
            Expression::Convert { to, arg } => match to {
                DataType::Boolean => Ok(Value::Boolean(arg.evaluate_as_boolean(ctx)?)),
                DataType::Number => Ok(Value::Number(arg.evaluate_as_number(ctx)?)),
                DataType::String => Ok(Value::String(arg.evaluate_as_string(ctx)?)),
                DataType::NodeSet => Ok(Value::NodeSet(arg.evaluate(ctx)?.into_node_set()?)),
                DataType::Any => arg.evaluate(ctx),
            },
            Expression::Count(arg) => Ok(Value::Number(arg.count_nodes(ctx)? as f64)),
            Expression::Key { name, value, document, controller } => {
                let controller = match controller {
                    Some(c) => c,
                    None => ctx.controller()?,
                };
                let root = match document {
                    Some(d) => d.clone(),
                    None => ctx.context_document()?,
                };
                let keys = controller.keys();
                match value.evaluate(ctx)? {
                    Value::NodeSet(set) => {
                        let mut hits = Vec::new();
                        for n in set.iter() {
                            let found = keys.select_by_key(name, &root, &n.string_value(), ctx)?;
                            hits.extend(found.iter().cloned());
                        }
                        Ok(Value::NodeSet(NodeSet::sort(hits)?))
                    }
                    other => {
                        let found = keys.select_by_key(name, &root, &other.as_string(), ctx)?;
                        Ok(Value::NodeSet(found))
                    }
                }
            }
            Expression::Id { arg, document } => {
                let root = match document {
                    Some(d) => d.clone(),
                    None => ctx.context_document()?,
                };
                let tokens: Vec<String> = match arg.evaluate(ctx)? {
                    Value::NodeSet(set) => set.iter().map(XdmNode::string_value).collect(),
                    other => vec![other.as_string()],
                };
                let hits = tokens
                    .iter()
                    .flat_map(|t| t.split_whitespace())
                    .filter_map(|token| root.select_id(token))
                    .collect();
                Ok(Value::NodeSet(NodeSet::sort(hits)?))
            }
            Expression::GenerateId(arg) => {
                let controller = ctx.controller()?;
                let node = match arg {
                    Some(a) => match a.evaluate(ctx)?.into_node_set()?.first() {
                        Some(n) => n.clone(),
                        None => return Ok(Value::String(String::new())),
                    },
                    None => ctx.context_node()?.clone(),
                };
                let number = controller.documents().document_number(&node.root());
                Ok(Value::String(format!("d{number}{}", node.generate_id())))
            }
            Expression::Document(arg) => {
                let controller = ctx.controller()?;
                let hrefs: Vec<String> = match arg.evaluate(ctx)? {
                    Value::NodeSet(set) => set.iter().map(XdmNode::string_value).collect(),
                    other => vec![other.as_string()],
                };
                let pool = controller.documents();
                let mut roots: Vec<(usize, N)> = Vec::with_capacity(hrefs.len());
                for href in &hrefs {
                    let uri = pool.resolve(href, controller.base_uri());
                    let root = pool.load(&uri)?;
                    roots.push((pool.document_number(&root), root));
                }
                roots.sort_by_key(|(number, _)| *number);
                roots.dedup_by_key(|(number, _)| *number);
                Ok(Value::NodeSet(NodeSet::from_sorted(
                    roots.into_iter().map(|(_, r)| r).collect(),
                )))
            }
            Expression::Call(call) => {
                let args =
                    call.args.iter().map(|a| a.evaluate(ctx)).collect::<Result<Vec<_>, _>>()?;
                (call.entry.implementation)(ctx, &args)
            }
        }
    }

    pub fn evaluate_as_boolean(&self, ctx: &Context<N>) -> Result<bool, Error> {
        if self.data_type() == DataType::NodeSet && !self.is_literal() {
            return self.enumerate(ctx, false)?.has_next();
        }
        Ok(self.evaluate(ctx)?.as_boolean())
    }

    pub fn evaluate_as_number(&self, ctx: &Context<N>) -> Result<f64, Error> {
        Ok(self.evaluate(ctx)?.as_number())
    }

    pub fn evaluate_as_string(&self, ctx: &Context<N>) -> Result<String, Error> {
        Ok(self.evaluate(ctx)?.as_string())
    }

    /// Number of distinct nodes selected. Streams when the enumeration is known to be
    /// duplicate-free, otherwise materializes.
    fn count_nodes(&self, ctx: &Context<N>) -> Result<usize, Error> {
        let cursor = self.enumerate(ctx, false)?;
        if cursor.is_sorted() || cursor.is_reverse_sorted() {
            return cursor.count_remaining();
        }
        Ok(sort_document_order(drain(cursor)?)?.len())
    }

    /// Lazy node-set entry point. With `sorted` the output is in document order
    /// without duplicates; otherwise it comes in whatever order is cheapest.
    pub fn enumerate(
        &self,
        ctx: &Context<N>,
        sorted: bool,
    ) -> Result<Box<dyn NodeEnumeration<N>>, Error> {
        let cursor: Box<dyn NodeEnumeration<N>> = match self {
            Expression::ContextNode => {
                Box::new(AxisCursor::all(ctx.context_node()?, Axis::SelfAxis))
            }
            Expression::CurrentNode => {
                Box::new(AxisCursor::all(ctx.current_node()?, Axis::SelfAxis))
            }
            Expression::Root => Box::new(AxisCursor::all(&ctx.context_document()?, Axis::SelfAxis)),
            Expression::Axis { axis, test } => {
                Box::new(AxisCursor::new(ctx.context_node()?.clone(), *axis, test.clone()))
            }
            Expression::Path { start, step } => {
                let start = start.enumerate(ctx, sorted)?;
                Box::new(PathCursor::new(start, &step.hoist_invariants(ctx), ctx.clone())?)
            }
            Expression::Filter { base, predicate } => {
                let base = base.enumerate(ctx, true)?;
                let filters: Arc<[Expression<N>]> =
                    Arc::from(vec![predicate.hoist_invariants(ctx).into_owned()]);
                Box::new(FilterCursor::new(base, filters, 0, ctx.clone()))
            }
            Expression::Union(a, b) => {
                Box::new(UnionCursor::new(a.enumerate(ctx, true)?, b.enumerate(ctx, true)?))
            }
            other => return Ok(other.evaluate(ctx)?.into_node_set()?.enumerate()),
        };
        order(cursor, sorted)
    }
}

/// Bring `cursor` into document order when requested and not already guaranteed.
fn order<N: XdmNode>(
    cursor: Box<dyn NodeEnumeration<N>>,
    sorted: bool,
) -> Result<Box<dyn NodeEnumeration<N>>, Error> {
    if !sorted || cursor.is_sorted() {
        return Ok(cursor);
    }
    let reverse = cursor.is_reverse_sorted();
    let mut nodes = drain(cursor)?;
    if reverse {
        nodes.reverse();
    } else {
        nodes = sort_document_order(nodes)?;
    }
    Ok(Box::new(NodeSetCursor::new(Arc::from(nodes), true)))
}

impl<N: XdmNode> From<Value<N>> for Expression<N> {
    fn from(value: Value<N>) -> Self {
        Expression::Literal(value)
    }
}
