//! Key definitions and the lazily built key index.
//!
//! An index is built per `(key name, document)` the first time it is asked for and
//! is then served from the cache. Concurrent first requests wait for the single
//! builder instead of building their own copy.
//!
//! A `use` expression or match pattern may call `key()` itself. Asking for an index
//! while the same thread is still building it is a circular definition and fails with
//! `err:XTDE0640`. A thread that is already inside a build does not wait for another
//! thread's build; it builds a private copy instead, so mutually dependent keys
//! surface as that error rather than as two threads waiting on each other.

use crate::axis::{Axis, AxisCursor};
use crate::expr::Expression;
use crate::expr::value::{NodeSet, Value};
use crate::model::names::Fingerprint;
use crate::model::{ExpandedName, NodeKind, XdmNode};
use crate::pattern::Pattern;
use crate::runtime::{Context, Error, ErrorCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::thread::{self, ThreadId};

/// `<xsl:key name="..." match="..." use="..."/>`
#[derive(Debug, Clone)]
pub struct KeyDefinition<N> {
    pub name: ExpandedName,
    pub match_pattern: Pattern<N>,
    pub use_expression: Expression<N>,
}

impl<N: XdmNode> KeyDefinition<N> {
    pub fn new(
        name: ExpandedName,
        match_pattern: Pattern<N>,
        use_expression: Expression<N>,
    ) -> Self {
        Self { name, match_pattern, use_expression }
    }

    fn scans_attributes(&self) -> bool {
        matches!(self.match_pattern.node_kind(), None | Some(NodeKind::Attribute))
    }
}

/// Key values of one document mapped to the nodes carrying them, in document order.
#[derive(Debug)]
pub struct KeyIndex<N> {
    entries: HashMap<String, NodeSet<N>>,
}

impl<N: XdmNode> KeyIndex<N> {
    pub fn get(&self, value: &str) -> NodeSet<N> {
        self.entries.get(value).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type IndexCell<N> = Arc<OnceLock<Result<Arc<KeyIndex<N>>, Error>>>;
type Slot<N> = (Fingerprint, N);

pub struct KeyManager<N> {
    definitions: HashMap<Fingerprint, Vec<KeyDefinition<N>>>,
    indexes: RwLock<HashMap<Slot<N>, IndexCell<N>>>,
    /// Builds in progress and the thread running each.
    building: Mutex<Vec<(Slot<N>, ThreadId)>>,
}

impl<N> core::fmt::Debug for KeyManager<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyManager").field("keys", &self.definitions.len()).finish_non_exhaustive()
    }
}

impl<N: XdmNode> KeyManager<N> {
    pub fn new(definitions: Vec<KeyDefinition<N>>) -> Self {
        let mut by_name: HashMap<Fingerprint, Vec<KeyDefinition<N>>> = HashMap::new();
        for def in definitions {
            by_name.entry(def.name.fingerprint()).or_default().push(def);
        }
        Self {
            definitions: by_name,
            indexes: RwLock::new(HashMap::new()),
            building: Mutex::new(Vec::new()),
        }
    }

    pub fn has_key(&self, name: &ExpandedName) -> bool {
        self.definitions.contains_key(&name.fingerprint())
    }

    /// Nodes of `root`'s document whose key `name` has the value `value`.
    ///
    /// `ctx` supplies variables and the controller to the `use` expressions when the
    /// index has to be built. A key that was never declared is `err:XTDE1260`; a key
    /// needed to build its own index is `err:XTDE0640`.
    pub fn select_by_key(
        &self,
        name: &ExpandedName,
        root: &N,
        value: &str,
        ctx: &Context<N>,
    ) -> Result<NodeSet<N>, Error> {
        let fingerprint = name.fingerprint();
        let Some(definitions) = self.definitions.get(&fingerprint) else {
            return Err(Error::from_code(
                ErrorCode::XTDE1260,
                format!("key {name} has not been declared"),
            ));
        };
        let slot = (fingerprint, root.clone());
        let cell = self.cell(&slot);
        if let Some(built) = cell.get() {
            return Ok(built.clone()?.get(value));
        }

        let me = thread::current().id();
        let (circular, nested, elsewhere) = {
            let building = self.building.lock().unwrap_or_else(PoisonError::into_inner);
            (
                building.iter().any(|(s, t)| s == &slot && *t == me),
                building.iter().any(|(_, t)| *t == me),
                building.iter().any(|(s, t)| s == &slot && *t != me),
            )
        };
        if circular {
            return Err(Error::from_code(
                ErrorCode::XTDE0640,
                format!("key {name} is used while its own index is being built"),
            ));
        }
        let build = || {
            let _guard = BuildGuard::enter(&self.building, slot.clone(), me);
            build_index(name, definitions, root, ctx)
        };
        let index = if nested && elsewhere { build()? } else { cell.get_or_init(build).clone()? };
        Ok(index.get(value))
    }

    fn cell(&self, slot: &Slot<N>) -> IndexCell<N> {
        if let Some(cell) = self.indexes.read().unwrap_or_else(PoisonError::into_inner).get(slot) {
            return Arc::clone(cell);
        }
        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(indexes.entry(slot.clone()).or_default())
    }
}

/// Marks a build as in progress for as long as it lives.
struct BuildGuard<'a, N: XdmNode> {
    building: &'a Mutex<Vec<(Slot<N>, ThreadId)>>,
    slot: Slot<N>,
    thread: ThreadId,
}

impl<'a, N: XdmNode> BuildGuard<'a, N> {
    fn enter(
        building: &'a Mutex<Vec<(Slot<N>, ThreadId)>>,
        slot: Slot<N>,
        thread: ThreadId,
    ) -> Self {
        building.lock().unwrap_or_else(PoisonError::into_inner).push((slot.clone(), thread));
        Self { building, slot, thread }
    }
}

impl<N: XdmNode> Drop for BuildGuard<'_, N> {
    fn drop(&mut self) {
        let mut building = self.building.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(i) = building.iter().position(|(s, t)| s == &self.slot && *t == self.thread) {
            building.swap_remove(i);
        }
    }
}

fn build_index<N: XdmNode>(
    name: &ExpandedName,
    definitions: &[KeyDefinition<N>],
    root: &N,
    ctx: &Context<N>,
) -> Result<Arc<KeyIndex<N>>, Error> {
    let mut entries: HashMap<String, Vec<N>> = HashMap::new();
    let scan_attributes = definitions.iter().any(KeyDefinition::scans_attributes);
    for node in AxisCursor::all(root, Axis::DescendantOrSelf) {
        index_node(&node, definitions, ctx, &mut entries)?;
        if scan_attributes && node.kind() == NodeKind::Element {
            for attribute in AxisCursor::all(&node, Axis::Attribute) {
                index_node(&attribute, definitions, ctx, &mut entries)?;
            }
        }
    }
    let index = KeyIndex {
        entries: entries
            .into_iter()
            .map(|(value, nodes)| (value, NodeSet::from_sorted(nodes)))
            .collect(),
    };
    tracing::debug!(key = %name, values = index.len(), "built key index");
    Ok(Arc::new(index))
}

fn index_node<N: XdmNode>(
    node: &N,
    definitions: &[KeyDefinition<N>],
    ctx: &Context<N>,
    entries: &mut HashMap<String, Vec<N>>,
) -> Result<(), Error> {
    for def in definitions {
        if !def.match_pattern.matches(node, ctx)? {
            continue;
        }
        let focus = ctx.with_current(node.clone()).singleton(node.clone());
        let values: Vec<String> = match def.use_expression.evaluate(&focus)? {
            Value::NodeSet(set) => set.iter().map(XdmNode::string_value).collect(),
            other => vec![other.as_string()],
        };
        for value in values {
            let nodes = entries.entry(value).or_default();
            // nodes arrive in document order, so a repeat can only be the last one
            if nodes.last() != Some(node) {
                nodes.push(node.clone());
            }
        }
    }
    Ok(())
}
