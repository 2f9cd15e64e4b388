//! `xsl:number` counting for the `single`, `multiple` and `any` levels.
//!
//! Only the numbers are computed here; formatting them is left to the caller. When
//! no `count` pattern is given, nodes with the same name (or, for unnamed nodes, the
//! same kind) as the numbered node are counted.

use crate::axis::{Axis, AxisCursor};
use crate::model::XdmNode;
use crate::pattern::{NodeTest, Pattern};
use crate::runtime::{Context, Error};

fn default_count<N: XdmNode>(node: &N) -> Pattern<N> {
    let test = match node.fingerprint() {
        Some(fingerprint) => NodeTest::Name { kind: node.kind(), fingerprint },
        None => NodeTest::Kind(node.kind()),
    };
    Pattern::Test(test)
}

/// One plus the number of preceding siblings of `node` matching `count`.
fn sibling_number<N: XdmNode>(
    node: &N,
    count: &Pattern<N>,
    ctx: &Context<N>,
) -> Result<usize, Error> {
    let mut n = 1;
    for sibling in AxisCursor::all(node, Axis::PrecedingSibling) {
        if count.matches(&sibling, ctx)? {
            n += 1;
        }
    }
    Ok(n)
}

/// `level="single"`: the sibling number of the nearest ancestor-or-self matching
/// `count`, not looking past an ancestor matching `from`. `None` when there is no
/// such node.
pub fn number_single<N: XdmNode>(
    node: &N,
    count: Option<&Pattern<N>>,
    from: Option<&Pattern<N>>,
    ctx: &Context<N>,
) -> Result<Option<usize>, Error> {
    let default;
    let count = match count {
        Some(p) => p,
        None => {
            default = default_count(node);
            &default
        }
    };
    let mut target = node.clone();
    while !count.matches(&target, ctx)? {
        let Some(parent) = target.parent() else {
            return Ok(None);
        };
        if let Some(from) = from
            && from.matches(&parent, ctx)?
        {
            return Ok(None);
        }
        target = parent;
    }
    sibling_number(&target, count, ctx).map(Some)
}

/// `level="multiple"`: sibling numbers of every ancestor-or-self matching `count`,
/// outermost first, stopping below the nearest ancestor matching `from`.
pub fn number_multiple<N: XdmNode>(
    node: &N,
    count: Option<&Pattern<N>>,
    from: Option<&Pattern<N>>,
    ctx: &Context<N>,
) -> Result<Vec<usize>, Error> {
    let default;
    let count = match count {
        Some(p) => p,
        None => {
            default = default_count(node);
            &default
        }
    };
    let mut numbers = Vec::new();
    let mut current = node.clone();
    loop {
        if count.matches(&current, ctx)? {
            numbers.push(sibling_number(&current, count, ctx)?);
        }
        let Some(parent) = current.parent() else { break };
        if let Some(from) = from
            && from.matches(&parent, ctx)?
        {
            break;
        }
        current = parent;
    }
    numbers.reverse();
    Ok(numbers)
}

/// `level="any"`: nodes matching `count` up to and including `node` in document
/// order, counting back no further than the last node matching `from`.
pub fn number_any<N: XdmNode>(
    node: &N,
    count: Option<&Pattern<N>>,
    from: Option<&Pattern<N>>,
    ctx: &Context<N>,
) -> Result<usize, Error> {
    let default;
    let (count, mut n) = match count {
        Some(p) => (p, usize::from(p.matches(node, ctx)?)),
        None => {
            default = default_count(node);
            (&default, 1)
        }
    };
    for prev in AxisCursor::all(node, Axis::PrecedingOrAncestor) {
        if let Some(from) = from
            && from.matches(&prev, ctx)?
        {
            break;
        }
        if count.matches(&prev, ctx)? {
            n += 1;
        }
    }
    Ok(n)
}
