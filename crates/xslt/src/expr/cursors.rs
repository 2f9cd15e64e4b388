//! Lazy node enumerations produced by node-set expressions.

use crate::axis::{Axis, NodeEnumeration};
use crate::expr::value::Value;
use crate::expr::{DataType, Dependencies, Expression, Step, enumerate_step};
use crate::model::XdmNode;
use crate::pattern::NodeTest;
use crate::runtime::{Context, Error};
use core::cmp::Ordering;
use std::sync::Arc;

/// Pull every remaining node out of `cursor`.
pub fn drain<N>(mut cursor: Box<dyn NodeEnumeration<N>>) -> Result<Vec<N>, Error> {
    let mut out = Vec::new();
    while let Some(n) = cursor.next_node()? {
        out.push(n);
    }
    Ok(out)
}

/// Cursor over an already materialized node list.
#[derive(Debug, Clone)]
pub struct NodeSetCursor<N> {
    nodes: Arc<[N]>,
    next: usize,
    sorted: bool,
}

impl<N> NodeSetCursor<N> {
    pub fn new(nodes: Arc<[N]>, sorted: bool) -> Self {
        Self { nodes, next: 0, sorted }
    }
}

impl<N: XdmNode> NodeEnumeration<N> for NodeSetCursor<N> {
    fn next_node(&mut self) -> Result<Option<N>, Error> {
        let node = self.nodes.get(self.next).cloned();
        if node.is_some() {
            self.next += 1;
        }
        Ok(node)
    }

    fn has_next(&mut self) -> Result<bool, Error> {
        Ok(self.next < self.nodes.len())
    }

    fn boxed_clone(&self) -> Box<dyn NodeEnumeration<N>> {
        Box::new(self.clone())
    }

    fn is_sorted(&self) -> bool {
        self.sorted
    }

    fn is_reverse_sorted(&self) -> bool {
        self.nodes.len() <= 1
    }

    fn is_peer(&self) -> bool {
        self.nodes.len() <= 1
    }

    fn count_remaining(&self) -> Result<usize, Error> {
        Ok(self.nodes.len() - self.next)
    }
}

/// Applies the predicate `filters[index]` to the nodes of `base`.
///
/// A number-valued predicate selects by position; anything else by its boolean
/// value. The context size is only computed when the predicate reads it.
pub struct FilterCursor<N> {
    base: Box<dyn NodeEnumeration<N>>,
    filters: Arc<[Expression<N>]>,
    index: usize,
    ctx: Context<N>,
    position: usize,
    last: Option<usize>,
    needs_last: bool,
    limit: Option<usize>,
    peeked: Option<Option<N>>,
}

impl<N: XdmNode> FilterCursor<N> {
    pub fn new(
        base: Box<dyn NodeEnumeration<N>>,
        filters: Arc<[Expression<N>]>,
        index: usize,
        ctx: Context<N>,
    ) -> Self {
        let (needs_last, limit) = match filters.get(index) {
            Some(Expression::PositionRange { max, .. }) => (false, *max),
            Some(p) => (p.dependencies().contains(Dependencies::LAST), None),
            None => (false, None),
        };
        Self { base, filters, index, ctx, position: 0, last: None, needs_last, limit, peeked: None }
    }

    fn accepts(&mut self, node: &N) -> Result<bool, Error> {
        let mut focus = self.ctx.with_node(node.clone()).with_position(self.position);
        if self.needs_last {
            let last = match self.last {
                Some(l) => l,
                None => {
                    let l = self.position + self.base.count_remaining()?;
                    self.last = Some(l);
                    l
                }
            };
            focus = focus.with_last(last);
        } else {
            focus = focus.clear_last();
        }
        let predicate = &self.filters[self.index];
        let position = self.position as f64;
        match predicate.data_type() {
            DataType::Number => Ok(predicate.evaluate_as_number(&focus)? == position),
            DataType::Any => match predicate.evaluate(&focus)? {
                Value::Number(n) => Ok(n == position),
                other => Ok(other.as_boolean()),
            },
            _ => predicate.evaluate_as_boolean(&focus),
        }
    }

    fn advance_raw(&mut self) -> Result<Option<N>, Error> {
        loop {
            if self.limit.is_some_and(|limit| self.position >= limit) {
                return Ok(None);
            }
            let Some(node) = self.base.next_node()? else {
                return Ok(None);
            };
            self.position += 1;
            if self.accepts(&node)? {
                return Ok(Some(node));
            }
        }
    }
}

impl<N: XdmNode> NodeEnumeration<N> for FilterCursor<N> {
    fn next_node(&mut self) -> Result<Option<N>, Error> {
        match self.peeked.take() {
            Some(node) => Ok(node),
            None => self.advance_raw(),
        }
    }

    fn has_next(&mut self) -> Result<bool, Error> {
        if self.peeked.is_none() {
            self.peeked = Some(self.advance_raw()?);
        }
        Ok(matches!(self.peeked, Some(Some(_))))
    }

    fn boxed_clone(&self) -> Box<dyn NodeEnumeration<N>> {
        Box::new(FilterCursor {
            base: self.base.boxed_clone(),
            filters: Arc::clone(&self.filters),
            index: self.index,
            ctx: self.ctx.clone(),
            position: self.position,
            last: self.last,
            needs_last: self.needs_last,
            limit: self.limit,
            peeked: self.peeked.clone(),
        })
    }

    fn is_sorted(&self) -> bool {
        self.base.is_sorted()
    }

    fn is_reverse_sorted(&self) -> bool {
        self.base.is_reverse_sorted()
    }

    fn is_peer(&self) -> bool {
        self.base.is_peer()
    }
}

/// `start/step`: the step applied to every node of `start`, concatenated.
pub struct PathCursor<N> {
    start: Box<dyn NodeEnumeration<N>>,
    axis: Axis,
    test: NodeTest,
    filters: Arc<[Expression<N>]>,
    ctx: Context<N>,
    current: Option<Box<dyn NodeEnumeration<N>>>,
    sorted: bool,
    reverse_sorted: bool,
    peer: bool,
}

impl<N: XdmNode> PathCursor<N> {
    pub fn new(
        start: Box<dyn NodeEnumeration<N>>,
        step: &Step<N>,
        ctx: Context<N>,
    ) -> Result<Self, Error> {
        let axis = step.axis;
        let single_start = at_most(start.as_ref(), 1)?;
        let sorted = (start.is_sorted()
            && start.is_peer()
            && matches!(
                axis,
                Axis::Child
                    | Axis::Attribute
                    | Axis::SelfAxis
                    | Axis::Descendant
                    | Axis::DescendantOrSelf
            ))
            || (single_start && axis.is_forwards());
        let reverse_sorted = single_start && axis.is_reverse();
        let peer = (start.is_peer()
            && matches!(axis, Axis::Child | Axis::Attribute | Axis::Namespace | Axis::SelfAxis))
            || (single_start && axis.is_peer());
        Ok(Self {
            start,
            axis,
            test: step.test.clone(),
            filters: Arc::from(step.filters.clone()),
            ctx,
            current: None,
            sorted,
            reverse_sorted,
            peer,
        })
    }
}

/// Whether at most `n` nodes remain, looking at no more than `n + 1` of them.
fn at_most<N>(cursor: &dyn NodeEnumeration<N>, n: usize) -> Result<bool, Error> {
    let mut dup = cursor.boxed_clone();
    for _ in 0..=n {
        if dup.next_node()?.is_none() {
            return Ok(true);
        }
    }
    Ok(false)
}

impl<N: XdmNode> NodeEnumeration<N> for PathCursor<N> {
    fn next_node(&mut self) -> Result<Option<N>, Error> {
        loop {
            if let Some(cur) = self.current.as_mut()
                && let Some(node) = cur.next_node()?
            {
                return Ok(Some(node));
            }
            match self.start.next_node()? {
                Some(origin) => {
                    self.current = Some(enumerate_step(
                        &origin,
                        self.axis,
                        &self.test,
                        &self.filters,
                        &self.ctx,
                    ));
                }
                None => {
                    self.current = None;
                    return Ok(None);
                }
            }
        }
    }

    fn has_next(&mut self) -> Result<bool, Error> {
        loop {
            if let Some(cur) = self.current.as_mut()
                && cur.has_next()?
            {
                return Ok(true);
            }
            match self.start.next_node()? {
                Some(origin) => {
                    self.current = Some(enumerate_step(
                        &origin,
                        self.axis,
                        &self.test,
                        &self.filters,
                        &self.ctx,
                    ));
                }
                None => {
                    self.current = None;
                    return Ok(false);
                }
            }
        }
    }

    fn boxed_clone(&self) -> Box<dyn NodeEnumeration<N>> {
        Box::new(PathCursor {
            start: self.start.boxed_clone(),
            axis: self.axis,
            test: self.test.clone(),
            filters: Arc::clone(&self.filters),
            ctx: self.ctx.clone(),
            current: self.current.as_ref().map(|c| c.boxed_clone()),
            sorted: self.sorted,
            reverse_sorted: self.reverse_sorted,
            peer: self.peer,
        })
    }

    fn is_sorted(&self) -> bool {
        self.sorted
    }

    fn is_reverse_sorted(&self) -> bool {
        self.reverse_sorted
    }

    fn is_peer(&self) -> bool {
        self.peer
    }
}

/// Merge of two document-ordered inputs, dropping nodes present in both.
pub struct UnionCursor<N> {
    a: Box<dyn NodeEnumeration<N>>,
    b: Box<dyn NodeEnumeration<N>>,
    head_a: Option<N>,
    head_b: Option<N>,
}

impl<N: XdmNode> UnionCursor<N> {
    pub fn new(a: Box<dyn NodeEnumeration<N>>, b: Box<dyn NodeEnumeration<N>>) -> Self {
        Self { a, b, head_a: None, head_b: None }
    }

    fn fill(&mut self) -> Result<(), Error> {
        if self.head_a.is_none() {
            self.head_a = self.a.next_node()?;
        }
        if self.head_b.is_none() {
            self.head_b = self.b.next_node()?;
        }
        Ok(())
    }
}

impl<N: XdmNode> NodeEnumeration<N> for UnionCursor<N> {
    fn next_node(&mut self) -> Result<Option<N>, Error> {
        self.fill()?;
        let order = match (&self.head_a, &self.head_b) {
            (Some(x), Some(y)) => Some(x.compare_order(y)?),
            _ => None,
        };
        match order {
            None => Ok(self.head_a.take().or_else(|| self.head_b.take())),
            Some(Ordering::Less) => Ok(self.head_a.take()),
            Some(Ordering::Greater) => Ok(self.head_b.take()),
            Some(Ordering::Equal) => {
                self.head_b = None;
                Ok(self.head_a.take())
            }
        }
    }

    fn has_next(&mut self) -> Result<bool, Error> {
        self.fill()?;
        Ok(self.head_a.is_some() || self.head_b.is_some())
    }

    fn boxed_clone(&self) -> Box<dyn NodeEnumeration<N>> {
        Box::new(UnionCursor {
            a: self.a.boxed_clone(),
            b: self.b.boxed_clone(),
            head_a: self.head_a.clone(),
            head_b: self.head_b.clone(),
        })
    }

    fn is_sorted(&self) -> bool {
        true
    }

    fn is_reverse_sorted(&self) -> bool {
        false
    }

    fn is_peer(&self) -> bool {
        false
    }
}
