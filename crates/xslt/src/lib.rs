pub mod axis;
pub mod consts;
pub mod docpool;
pub mod expr;
pub mod functions;
pub mod keys;
pub mod model;
pub mod numbering;
pub mod pattern;
pub mod runtime;

pub use axis::{Axis, AxisCursor, NodeEnumeration};
pub use docpool::{DocumentLoader, DocumentPool};
pub use expr::value::{NodeSet, Value, sort_document_order};
pub use expr::{ArithmeticOp, BooleanOp, CompareOp, DataType, Dependencies, Expression, Step};
pub use functions::{FunctionEntry, FunctionRegistry, ResolveError};
pub use keys::{KeyDefinition, KeyIndex, KeyManager};
pub use model::names::{Fingerprint, NamePool};
pub use model::tree::{TreeDocument, TreeNode, attr, comment, doc, elem, id_attr, ns, pi, text};
pub use model::{ExpandedName, NamespaceBinding, NodeKind, QName, XdmNode};
pub use numbering::{number_any, number_multiple, number_single};
pub use pattern::{IdPattern, KeyPattern, LocationPathPattern, NodeTest, Pattern};
pub use runtime::{
    Context, ContextBuilder, Controller, ControllerBuilder, Error, ErrorClass, ErrorCode,
    VariableBindings,
};
