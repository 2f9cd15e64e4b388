use crate::consts::ERR_NS;
use crate::docpool::{DocumentLoader, DocumentPool};
use crate::expr::value::Value;
use crate::keys::{KeyDefinition, KeyManager};
use crate::model::{ExpandedName, XdmNode};
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FOER0000, // structural: no common document order
    FODC0002, // document could not be retrieved
    FORG0001, // invalid argument value
    XPDY0002, // context component undefined
    XPTY0004, // type error (node-set required)
    XPST0008, // unbound variable
    XPST0017, // unknown function / arity
    XTDE0640, // circular definition
    XTDE1260, // key not declared
    Unknown,
}

/// Severity classes used by callers to decide how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The caller broke the evaluation contract (missing context facet, wrong type).
    Usage,
    /// The input data is malformed; reported to the caller, which may recover.
    Data,
    /// A tree-model invariant does not hold. Never recoverable.
    Structural,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FOER0000 => "FOER0000",
            ErrorCode::FODC0002 => "FODC0002",
            ErrorCode::FORG0001 => "FORG0001",
            ErrorCode::XPDY0002 => "XPDY0002",
            ErrorCode::XPTY0004 => "XPTY0004",
            ErrorCode::XPST0008 => "XPST0008",
            ErrorCode::XPST0017 => "XPST0017",
            ErrorCode::XTDE0640 => "XTDE0640",
            ErrorCode::XTDE1260 => "XTDE1260",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Returns the QName for this code in the `err:` namespace.
    pub fn qname(&self) -> ExpandedName {
        ExpandedName::new(Some(ERR_NS), self.as_str())
    }

    pub fn from_code(s: &str) -> Self {
        use ErrorCode::*;
        match s.strip_prefix("err:").unwrap_or(s) {
            "FOER0000" => FOER0000,
            "FODC0002" => FODC0002,
            "FORG0001" => FORG0001,
            "XPDY0002" => XPDY0002,
            "XPTY0004" => XPTY0004,
            "XPST0008" => XPST0008,
            "XPST0017" => XPST0017,
            "XTDE0640" => XTDE0640,
            "XTDE1260" => XTDE1260,
            _ => Unknown,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorCode::XPDY0002 | ErrorCode::XPTY0004 | ErrorCode::XPST0017 => ErrorClass::Usage,
            ErrorCode::FODC0002
            | ErrorCode::FORG0001
            | ErrorCode::XPST0008
            | ErrorCode::XTDE0640
            | ErrorCode::XTDE1260 => ErrorClass::Data,
            ErrorCode::FOER0000 | ErrorCode::Unknown => ErrorClass::Structural,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), source: None }
    }

    /// Compose an error with a source cause.
    pub fn with_source(
        mut self,
        source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>,
    ) -> Self {
        self.source = source.into();
        self
    }

    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }

    /// Data errors may be recovered from by the caller; usage and structural errors may not.
    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Data
    }

    pub fn format_code(&self) -> String {
        format!("err:{}", self.code.as_str())
    }

    pub(crate) fn missing(facet: &str) -> Self {
        Self::from_code(
            ErrorCode::XPDY0002,
            format!("{facet} is not defined in the evaluation context"),
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::from_code(ErrorCode::FODC0002, e.to_string())
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::from_code(ErrorCode::FODC0002, format!("invalid URI: {e}"))
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {} ({})", self.message, self.format_code())
    }
}

/// Variable values visible to an evaluation, keyed by expanded name.
#[derive(Debug, Clone)]
pub struct VariableBindings<N> {
    values: HashMap<ExpandedName, Value<N>>,
}

impl<N> Default for VariableBindings<N> {
    fn default() -> Self {
        Self { values: HashMap::new() }
    }
}

impl<N> VariableBindings<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: ExpandedName, value: Value<N>) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &ExpandedName) -> Option<&Value<N>> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Session-wide evaluation state shared by every context of one transformation:
/// key definitions with their lazily built indexes, and the document pool.
pub struct Controller<N> {
    keys: KeyManager<N>,
    documents: DocumentPool<N>,
    base_uri: Option<String>,
}

impl<N: XdmNode> Controller<N> {
    pub fn keys(&self) -> &KeyManager<N> {
        &self.keys
    }

    pub fn documents(&self) -> &DocumentPool<N> {
        &self.documents
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }
}

impl<N> fmt::Debug for Controller<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller").field("base_uri", &self.base_uri).finish_non_exhaustive()
    }
}

pub struct ControllerBuilder<N> {
    keys: Vec<KeyDefinition<N>>,
    loader: Option<Arc<dyn DocumentLoader<N>>>,
    base_uri: Option<String>,
}

impl<N: XdmNode> Default for ControllerBuilder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: XdmNode> ControllerBuilder<N> {
    pub fn new() -> Self {
        Self { keys: Vec::new(), loader: None, base_uri: None }
    }

    /// Declare a key. Several definitions may share one name; their entries are merged.
    pub fn with_key(mut self, key: KeyDefinition<N>) -> Self {
        self.keys.push(key);
        self
    }

    pub fn with_document_loader(mut self, loader: Arc<dyn DocumentLoader<N>>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Base URI against which relative `document()` references are resolved.
    pub fn with_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = Some(uri.into());
        self
    }

    pub fn build(self) -> Controller<N> {
        Controller {
            keys: KeyManager::new(self.keys),
            documents: DocumentPool::new(self.loader),
            base_uri: self.base_uri,
        }
    }
}

/// The ambient facets an expression or pattern may read while it is evaluated.
///
/// A context is cheap to clone: variables and the controller are shared, nodes are
/// handles. Evaluation derives focused child contexts with [`Context::with_node`] and
/// friends instead of building new ones.
pub struct Context<N> {
    context_node: Option<N>,
    current_node: Option<N>,
    position: Option<usize>,
    last: Option<usize>,
    variables: Arc<VariableBindings<N>>,
    controller: Option<Arc<Controller<N>>>,
}

impl<N: Clone> Clone for Context<N> {
    fn clone(&self) -> Self {
        Self {
            context_node: self.context_node.clone(),
            current_node: self.current_node.clone(),
            position: self.position,
            last: self.last,
            variables: Arc::clone(&self.variables),
            controller: self.controller.clone(),
        }
    }
}

impl<N: fmt::Debug> fmt::Debug for Context<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("context_node", &self.context_node)
            .field("current_node", &self.current_node)
            .field("position", &self.position)
            .field("last", &self.last)
            .field("variables", &self.variables.len())
            .field("controller", &self.controller.is_some())
            .finish()
    }
}

impl<N: XdmNode> Default for Context<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<N: XdmNode> Context<N> {
    /// A context with no facets at all; only fully reduced expressions evaluate against it.
    pub fn empty() -> Self {
        Self {
            context_node: None,
            current_node: None,
            position: None,
            last: None,
            variables: Arc::new(VariableBindings::new()),
            controller: None,
        }
    }

    pub fn context_node(&self) -> Result<&N, Error> {
        self.context_node.as_ref().ok_or_else(|| Error::missing("context node"))
    }

    pub fn current_node(&self) -> Result<&N, Error> {
        self.current_node.as_ref().ok_or_else(|| Error::missing("current node"))
    }

    pub fn context_document(&self) -> Result<N, Error> {
        self.context_node().map(XdmNode::root).map_err(|_| Error::missing("context document"))
    }

    pub fn position(&self) -> Result<usize, Error> {
        self.position.ok_or_else(|| Error::missing("context position"))
    }

    pub fn last(&self) -> Result<usize, Error> {
        self.last.ok_or_else(|| Error::missing("context size"))
    }

    pub fn variable(&self, name: &ExpandedName) -> Result<&Value<N>, Error> {
        self.variables
            .get(name)
            .ok_or_else(|| {
                Error::from_code(ErrorCode::XPST0008, format!("variable ${name} is not bound"))
            })
    }

    pub fn controller(&self) -> Result<&Arc<Controller<N>>, Error> {
        self.controller.as_ref().ok_or_else(|| Error::missing("controller"))
    }

    pub fn variables(&self) -> &Arc<VariableBindings<N>> {
        &self.variables
    }

    /// Same context with a different context node; position and size are kept.
    pub fn with_node(&self, node: N) -> Self {
        let mut ctx = self.clone();
        ctx.context_node = Some(node);
        ctx
    }

    pub fn with_current(&self, node: N) -> Self {
        let mut ctx = self.clone();
        ctx.current_node = Some(node);
        ctx
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_last(mut self, last: usize) -> Self {
        self.last = Some(last);
        self
    }

    /// Focus on a single node: context node set, `position() = last() = 1`.
    pub fn singleton(&self, node: N) -> Self {
        self.with_node(node).with_position(1).with_last(1)
    }

    pub(crate) fn clear_last(mut self) -> Self {
        self.last = None;
        self
    }
}

pub struct ContextBuilder<N> {
    ctx: Context<N>,
}

impl<N: XdmNode> Default for ContextBuilder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: XdmNode> ContextBuilder<N> {
    pub fn new() -> Self {
        Self { ctx: Context::empty() }
    }

    pub fn with_context_node(mut self, node: N) -> Self {
        self.ctx.context_node = Some(node);
        self
    }

    pub fn with_current_node(mut self, node: N) -> Self {
        self.ctx.current_node = Some(node);
        self
    }

    /// Set context node and current node together, as at the start of a template rule.
    pub fn with_node(self, node: N) -> Self {
        self.with_context_node(node.clone()).with_current_node(node)
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.ctx.position = Some(position);
        self
    }

    pub fn with_last(mut self, last: usize) -> Self {
        self.ctx.last = Some(last);
        self
    }

    pub fn with_variable(mut self, name: ExpandedName, value: impl Into<Value<N>>) -> Self {
        Arc::make_mut(&mut self.ctx.variables).insert(name, value.into());
        self
    }

    pub fn with_variables(mut self, bindings: Arc<VariableBindings<N>>) -> Self {
        self.ctx.variables = bindings;
        self
    }

    pub fn with_controller(mut self, controller: Arc<Controller<N>>) -> Self {
        self.ctx.controller = Some(controller);
        self
    }

    pub fn build(self) -> Context<N> {
        self.ctx
    }
}
