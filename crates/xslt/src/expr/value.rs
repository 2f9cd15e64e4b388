use crate::axis::NodeEnumeration;
use crate::expr::DataType;
use crate::expr::cursors::NodeSetCursor;
use crate::model::XdmNode;
use crate::runtime::{Error, ErrorCode};
use core::cmp::Ordering;
use std::sync::Arc;

/// A node-set in document order without duplicates.
#[derive(Debug, Clone)]
pub struct NodeSet<N> {
    nodes: Arc<[N]>,
}

impl<N> Default for NodeSet<N> {
    fn default() -> Self {
        Self { nodes: Arc::from(Vec::new()) }
    }
}

impl<N: XdmNode> NodeSet<N> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn singleton(node: N) -> Self {
        Self { nodes: Arc::from(vec![node]) }
    }

    /// Sort into document order and drop duplicates.
    pub fn sort(nodes: Vec<N>) -> Result<Self, Error> {
        Ok(Self { nodes: Arc::from(sort_document_order(nodes)?) })
    }

    /// Wrap nodes the caller already holds in document order without duplicates.
    pub fn from_sorted(nodes: Vec<N>) -> Self {
        Self { nodes: Arc::from(nodes) }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn first(&self) -> Option<&N> {
        self.nodes.first()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, N> {
        self.nodes.iter()
    }

    pub fn as_slice(&self) -> &[N] {
        &self.nodes
    }

    /// Identity membership.
    pub fn contains(&self, node: &N) -> bool {
        self.nodes.iter().any(|n| n == node)
    }

    pub fn to_vec(&self) -> Vec<N> {
        self.nodes.to_vec()
    }

    /// Lazy cursor over the members; shares the node storage.
    pub fn enumerate(&self) -> Box<dyn NodeEnumeration<N>> {
        Box::new(NodeSetCursor::new(Arc::clone(&self.nodes), true))
    }
}

impl<N: XdmNode> PartialEq for NodeSet<N> {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

/// Sort nodes of one document into document order, removing duplicates.
///
/// Every node is first compared with the first one so that a mix of documents is
/// reported as `err:FOER0000` instead of producing an inconsistent order.
pub fn sort_document_order<N: XdmNode>(mut nodes: Vec<N>) -> Result<Vec<N>, Error> {
    if let Some(anchor) = nodes.first().cloned() {
        for n in nodes.iter().skip(1) {
            n.compare_order(&anchor)?;
        }
    }
    nodes.sort_by(|a, b| a.compare_order(b).unwrap_or(Ordering::Equal));
    nodes.dedup();
    Ok(nodes)
}

#[derive(Debug, Clone)]
pub enum Value<N> {
    Boolean(bool),
    Number(f64),
    String(String),
    NodeSet(NodeSet<N>),
}

impl<N> From<bool> for Value<N> {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl<N> From<f64> for Value<N> {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl<N> From<&str> for Value<N> {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<N> From<String> for Value<N> {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<N> From<NodeSet<N>> for Value<N> {
    fn from(s: NodeSet<N>) -> Self {
        Value::NodeSet(s)
    }
}

impl<N: XdmNode> Value<N> {
    pub fn empty() -> Self {
        Value::NodeSet(NodeSet::empty())
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Boolean(_) => DataType::Boolean,
            Value::Number(_) => DataType::Number,
            Value::String(_) => DataType::String,
            Value::NodeSet(_) => DataType::NodeSet,
        }
    }

    pub fn as_boolean(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::NodeSet(s) => !s.is_empty(),
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::NodeSet(s) => {
                s.first().map_or(f64::NAN, |n| string_to_number(&n.string_value()))
            }
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.clone(),
            Value::NodeSet(s) => s.first().map(XdmNode::string_value).unwrap_or_default(),
        }
    }

    pub fn into_node_set(self) -> Result<NodeSet<N>, Error> {
        match self {
            Value::NodeSet(s) => Ok(s),
            other => Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!(
                    "a {:?} value cannot be used where a node-set is required",
                    other.data_type()
                ),
            )),
        }
    }

    pub fn is_empty_node_set(&self) -> bool {
        matches!(self, Value::NodeSet(s) if s.is_empty())
    }

    /// Structural equality of values, with node-sets compared by identity.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::NodeSet(a), Value::NodeSet(b)) => a == b,
            _ => false,
        }
    }
}

/// XPath 1.0 `string(number)`: no exponent, integral values without a fraction.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// XPath 1.0 `number(string)`: optional minus, digits with an optional point,
/// surrounding whitespace allowed; anything else is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n'));
    let body = t.strip_prefix('-').unwrap_or(t);
    let mut digits = 0usize;
    let mut points = 0usize;
    for c in body.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => points += 1,
            _ => return f64::NAN,
        }
    }
    if digits == 0 || points > 1 {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tree::TreeNode;

    type V = Value<TreeNode>;

    #[test]
    fn numbers_format_like_xpath() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(1e21), "1000000000000000000000");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn strings_parse_like_xpath() {
        assert_eq!(string_to_number(" 12 "), 12.0);
        assert_eq!(string_to_number("-1.5"), -1.5);
        assert_eq!(string_to_number(".5"), 0.5);
        assert!(string_to_number("1e3").is_nan());
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("").is_nan());
        assert!(string_to_number("1.2.3").is_nan());
    }

    #[test]
    fn boolean_conversion() {
        assert!(!V::Number(f64::NAN).as_boolean());
        assert!(!V::Number(0.0).as_boolean());
        assert!(V::String("false".into()).as_boolean());
        assert!(!V::empty().as_boolean());
    }

    #[test]
    fn non_node_sets_are_rejected() {
        let err = V::Number(1.0).into_node_set().unwrap_err();
        assert_eq!(err.code, ErrorCode::XPTY0004);
    }
}
