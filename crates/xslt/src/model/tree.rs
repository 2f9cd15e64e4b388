//! Arena-backed immutable document used as the reference `XdmNode` implementation.
//!
//! Every node record lives in one `Vec` owned by the document; parents are plain
//! indices into that table, so there are no reference cycles and parent lookup is
//! O(1). Records are allocated in document order (element, its attributes, then its
//! children), which makes document-order comparison a pair of integer compares.
//!
//! ```
//! use platynui_xslt::model::tree::{doc, elem, text, id_attr};
//! use platynui_xslt::XdmNode;
//!
//! // <r><a id="x1">one</a><b/></r>
//! let document = doc()
//!     .child(
//!         elem("r")
//!             .child(elem("a").attr(id_attr("id", "x1")).child(text("one")))
//!             .child(elem("b")),
//!     )
//!     .build();
//! let r = document.document_element().unwrap();
//! assert_eq!(r.child_count(), 2);
//! assert_eq!(r.string_value(), "one");
//! assert_eq!(document.root().select_id("x1"), r.child_at(0));
//! ```

use crate::consts::XML_URI;
use crate::model::names::{Fingerprint, NamePool};
use crate::model::{NamespaceBinding, NodeKind, QName, XdmNode};
use crate::runtime::{Error, ErrorCode};
use compact_str::CompactString;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

type NodeId = u32;

#[derive(Debug)]
struct NodeRecord {
    kind: NodeKind,
    name: Option<QName>,
    fingerprint: Option<Fingerprint>,
    value: CompactString,
    parent: Option<NodeId>,
    index: u32,
    children: Vec<NodeId>,
    attributes: Vec<NodeId>,
    namespaces: SmallVec<[NamespaceBinding; 2]>,
}

impl NodeRecord {
    fn new(kind: NodeKind, parent: Option<NodeId>, index: usize) -> Self {
        Self {
            kind,
            name: None,
            fingerprint: None,
            value: CompactString::default(),
            parent,
            index: index as u32,
            children: Vec::new(),
            attributes: Vec::new(),
            namespaces: SmallVec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct DocumentData {
    nodes: Vec<NodeRecord>,
    ids: HashMap<CompactString, NodeId>,
    entities: HashMap<String, String>,
    base_uri: Option<String>,
}

/// An immutable document. Cloning shares the node table.
#[derive(Clone)]
pub struct TreeDocument {
    data: Arc<DocumentData>,
}

impl TreeDocument {
    pub fn root(&self) -> TreeNode {
        TreeNode { doc: Arc::clone(&self.data), id: 0, ns: None }
    }

    pub fn document_element(&self) -> Option<TreeNode> {
        self.data.nodes[0]
            .children
            .iter()
            .find(|&&c| self.data.nodes[c as usize].kind == NodeKind::Element)
            .map(|&id| TreeNode { doc: Arc::clone(&self.data), id, ns: None })
    }

    /// Number of stored records (namespace nodes are synthesized and not counted).
    pub fn len(&self) -> usize {
        self.data.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nodes.len() <= 1
    }
}

impl fmt::Debug for TreeDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeDocument").field("nodes", &self.data.nodes.len()).finish()
    }
}

#[derive(Debug, Clone)]
struct NamespaceSlot {
    index: u32,
    binding: NamespaceBinding,
}

/// Handle to a node of a [`TreeDocument`]. Namespace nodes are synthesized on demand
/// and identified by their owning element plus their in-scope index.
#[derive(Clone)]
pub struct TreeNode {
    doc: Arc<DocumentData>,
    id: NodeId,
    ns: Option<NamespaceSlot>,
}

impl TreeNode {
    fn record(&self) -> &NodeRecord {
        &self.doc.nodes[self.id as usize]
    }

    fn at(&self, id: NodeId) -> TreeNode {
        TreeNode { doc: Arc::clone(&self.doc), id, ns: None }
    }

    fn order_key(&self) -> (NodeId, Option<u32>) {
        (self.id, self.ns.as_ref().map(|s| s.index))
    }

    pub fn same_document(&self, other: &TreeNode) -> bool {
        Arc::ptr_eq(&self.doc, &other.doc)
    }
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.same_document(other) && self.order_key() == other.order_key()
    }
}
impl Eq for TreeNode {}

impl Hash for TreeNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.doc) as usize).hash(state);
        self.order_key().hash(state);
    }
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(slot) => write!(
                f,
                "TreeNode(#{} xmlns:{}={})",
                self.id, slot.binding.prefix, slot.binding.uri
            ),
            None => {
                let rec = self.record();
                match &rec.name {
                    Some(q) => write!(f, "TreeNode(#{} {:?} {})", self.id, rec.kind, q.local),
                    None => write!(f, "TreeNode(#{} {:?})", self.id, rec.kind),
                }
            }
        }
    }
}

impl XdmNode for TreeNode {
    fn kind(&self) -> NodeKind {
        if self.ns.is_some() { NodeKind::Namespace } else { self.record().kind }
    }

    fn name(&self) -> Option<QName> {
        match &self.ns {
            Some(slot) if slot.binding.prefix.is_empty() => None,
            Some(slot) => Some(QName::local(&*slot.binding.prefix)),
            None => self.record().name.clone(),
        }
    }

    fn fingerprint(&self) -> Option<Fingerprint> {
        match &self.ns {
            Some(slot) if slot.binding.prefix.is_empty() => None,
            Some(slot) => Some(NamePool::global().allocate("", &slot.binding.prefix)),
            None => self.record().fingerprint,
        }
    }

    fn string_value(&self) -> String {
        if let Some(slot) = &self.ns {
            return slot.binding.uri.to_string();
        }
        let rec = self.record();
        match rec.kind {
            NodeKind::Document | NodeKind::Element => {
                let mut out = String::new();
                let mut stack: Vec<NodeId> = rec.children.iter().rev().copied().collect();
                while let Some(id) = stack.pop() {
                    let r = &self.doc.nodes[id as usize];
                    match r.kind {
                        NodeKind::Text => out.push_str(&r.value),
                        NodeKind::Element => stack.extend(r.children.iter().rev().copied()),
                        _ => {}
                    }
                }
                out
            }
            _ => rec.value.to_string(),
        }
    }

    fn parent(&self) -> Option<Self> {
        if self.ns.is_some() {
            return Some(self.at(self.id));
        }
        self.record().parent.map(|p| self.at(p))
    }

    fn sibling_index(&self) -> usize {
        match &self.ns {
            Some(slot) => slot.index as usize,
            None => self.record().index as usize,
        }
    }

    fn child_count(&self) -> usize {
        if self.ns.is_some() { 0 } else { self.record().children.len() }
    }

    fn child_at(&self, index: usize) -> Option<Self> {
        if self.ns.is_some() {
            return None;
        }
        self.record().children.get(index).map(|&c| self.at(c))
    }

    fn attribute_count(&self) -> usize {
        if self.ns.is_some() { 0 } else { self.record().attributes.len() }
    }

    fn attribute_at(&self, index: usize) -> Option<Self> {
        if self.ns.is_some() {
            return None;
        }
        self.record().attributes.get(index).map(|&a| self.at(a))
    }

    fn namespace_declarations(&self) -> SmallVec<[NamespaceBinding; 4]> {
        if self.ns.is_some() {
            return SmallVec::new();
        }
        self.record().namespaces.iter().cloned().collect()
    }

    fn make_namespace(&self, binding: &NamespaceBinding, index: usize) -> Option<Self> {
        if self.ns.is_some() || self.record().kind != NodeKind::Element {
            return None;
        }
        Some(TreeNode {
            doc: Arc::clone(&self.doc),
            id: self.id,
            ns: Some(NamespaceSlot { index: index as u32, binding: binding.clone() }),
        })
    }

    fn base_uri(&self) -> Option<String> {
        self.doc.base_uri.clone()
    }

    fn select_id(&self, id: &str) -> Option<Self> {
        self.doc.ids.get(id.trim()).map(|&n| self.at(n))
    }

    fn unparsed_entity(&self, name: &str) -> Option<String> {
        self.doc.entities.get(name).cloned()
    }

    fn root(&self) -> Self {
        self.at(0)
    }

    fn compare_order(&self, other: &Self) -> Result<Ordering, Error> {
        if !self.same_document(other) {
            return Err(Error::from_code(
                ErrorCode::FOER0000,
                "document order is undefined for nodes of different documents",
            ));
        }
        Ok(self.order_key().cmp(&other.order_key()))
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AttrSpec {
    name: String,
    value: String,
    is_id: bool,
}

#[derive(Debug, Clone)]
pub enum NodeSpec {
    Element(ElementBuilder),
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

impl From<ElementBuilder> for NodeSpec {
    fn from(e: ElementBuilder) -> Self {
        NodeSpec::Element(e)
    }
}

#[derive(Debug, Clone)]
pub struct ElementBuilder {
    name: String,
    attributes: Vec<AttrSpec>,
    namespaces: Vec<NamespaceBinding>,
    children: Vec<NodeSpec>,
}

impl ElementBuilder {
    pub fn attr(mut self, attr: AttrSpec) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn namespace(mut self, binding: NamespaceBinding) -> Self {
        self.namespaces.push(binding);
        self
    }

    pub fn child(mut self, child: impl Into<NodeSpec>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I, C>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<NodeSpec>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentBuilder {
    children: Vec<NodeSpec>,
    entities: HashMap<String, String>,
    base_uri: Option<String>,
}

/// Start a document. Names written `prefix:local` are resolved against the namespace
/// declarations in scope when [`DocumentBuilder::build`] runs.
pub fn doc() -> DocumentBuilder {
    DocumentBuilder::default()
}

pub fn elem(name: &str) -> ElementBuilder {
    ElementBuilder {
        name: name.to_string(),
        attributes: Vec::new(),
        namespaces: Vec::new(),
        children: Vec::new(),
    }
}

pub fn text(value: &str) -> NodeSpec {
    NodeSpec::Text(value.to_string())
}

pub fn comment(value: &str) -> NodeSpec {
    NodeSpec::Comment(value.to_string())
}

pub fn pi(target: &str, data: &str) -> NodeSpec {
    NodeSpec::ProcessingInstruction { target: target.to_string(), data: data.to_string() }
}

pub fn attr(name: &str, value: &str) -> AttrSpec {
    AttrSpec { name: name.to_string(), value: value.to_string(), is_id: name == "xml:id" }
}

/// Attribute declared with type ID: its value is registered for `select_id`.
pub fn id_attr(name: &str, value: &str) -> AttrSpec {
    AttrSpec { name: name.to_string(), value: value.to_string(), is_id: true }
}

pub fn ns(prefix: &str, uri: &str) -> NamespaceBinding {
    NamespaceBinding::new(prefix, uri)
}

impl DocumentBuilder {
    pub fn child(mut self, child: impl Into<NodeSpec>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = Some(uri.into());
        self
    }

    pub fn unparsed_entity(mut self, name: &str, system_id: &str) -> Self {
        self.entities.insert(name.to_string(), system_id.to_string());
        self
    }

    pub fn build(self) -> TreeDocument {
        let mut data = DocumentData {
            nodes: vec![NodeRecord::new(NodeKind::Document, None, 0)],
            ids: HashMap::new(),
            entities: self.entities,
            base_uri: self.base_uri,
        };
        let mut scope: Vec<NamespaceBinding> = Vec::new();
        let children: Vec<NodeId> = self
            .children
            .into_iter()
            .enumerate()
            .map(|(i, spec)| add_node(&mut data, 0, i, spec, &mut scope))
            .collect();
        data.nodes[0].children = children;
        TreeDocument { data: Arc::new(data) }
    }
}

fn add_node(
    data: &mut DocumentData,
    parent: NodeId,
    index: usize,
    spec: NodeSpec,
    scope: &mut Vec<NamespaceBinding>,
) -> NodeId {
    let id = data.nodes.len() as NodeId;
    match spec {
        NodeSpec::Text(v) => {
            let mut rec = NodeRecord::new(NodeKind::Text, Some(parent), index);
            rec.value = CompactString::from(v);
            data.nodes.push(rec);
        }
        NodeSpec::Comment(v) => {
            let mut rec = NodeRecord::new(NodeKind::Comment, Some(parent), index);
            rec.value = CompactString::from(v);
            data.nodes.push(rec);
        }
        NodeSpec::ProcessingInstruction { target, data: body } => {
            let mut rec = NodeRecord::new(NodeKind::ProcessingInstruction, Some(parent), index);
            rec.fingerprint = Some(NamePool::global().allocate("", &target));
            rec.name = Some(QName::local(target));
            rec.value = CompactString::from(body);
            data.nodes.push(rec);
        }
        NodeSpec::Element(e) => {
            let mark = scope.len();
            scope.extend(e.namespaces.iter().cloned());
            let name = resolve_name(&e.name, scope, false);
            let mut rec = NodeRecord::new(NodeKind::Element, Some(parent), index);
            rec.fingerprint = Some(fingerprint_of(&name));
            rec.name = Some(name);
            rec.namespaces = e.namespaces.into_iter().collect();
            data.nodes.push(rec);

            let mut attributes = Vec::with_capacity(e.attributes.len());
            for (i, a) in e.attributes.into_iter().enumerate() {
                let attr_id = data.nodes.len() as NodeId;
                let name = resolve_name(&a.name, scope, true);
                let mut rec = NodeRecord::new(NodeKind::Attribute, Some(id), i);
                rec.fingerprint = Some(fingerprint_of(&name));
                rec.name = Some(name);
                rec.value = CompactString::from(a.value.as_str());
                data.nodes.push(rec);
                if a.is_id {
                    data.ids.entry(CompactString::from(a.value.trim())).or_insert(id);
                }
                attributes.push(attr_id);
            }
            let children: Vec<NodeId> = e
                .children
                .into_iter()
                .enumerate()
                .map(|(i, spec)| add_node(data, id, i, spec, scope))
                .collect();
            let rec = &mut data.nodes[id as usize];
            rec.attributes = attributes;
            rec.children = children;
            scope.truncate(mark);
        }
    }
    id
}

fn resolve_name(lexical: &str, scope: &[NamespaceBinding], is_attribute: bool) -> QName {
    let (prefix, local) = match lexical.split_once(':') {
        Some((p, l)) => (Some(p), l),
        None => (None, lexical),
    };
    let uri = match prefix {
        Some("xml") => Some(XML_URI.to_string()),
        Some(p) => lookup(scope, p),
        None if is_attribute => None,
        None => lookup(scope, ""),
    };
    QName { prefix: prefix.map(str::to_string), local: local.to_string(), ns_uri: uri }
}

fn lookup(scope: &[NamespaceBinding], prefix: &str) -> Option<String> {
    scope
        .iter()
        .rev()
        .find(|b| &*b.prefix == prefix)
        .filter(|b| !b.is_undeclaration())
        .map(|b| b.uri.to_string())
}

fn fingerprint_of(name: &QName) -> Fingerprint {
    NamePool::global().allocate(name.ns_uri.as_deref().unwrap_or(""), &name.local)
}
