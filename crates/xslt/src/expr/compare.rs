//! XPath 1.0 general comparisons (`=`, `!=`, `<`, `<=`, `>`, `>=`).
//!
//! Node-set operands compare existentially: the comparison holds if it holds for
//! some member (or some pair of members when both sides are node-sets).

use crate::expr::CompareOp;
use crate::expr::value::{Value, string_to_number};
use crate::model::XdmNode;

pub fn compare_values<N: XdmNode>(lhs: &Value<N>, op: CompareOp, rhs: &Value<N>) -> bool {
    match (lhs, rhs) {
        (Value::NodeSet(a), Value::NodeSet(b)) => {
            let right: Vec<String> = b.iter().map(XdmNode::string_value).collect();
            a.iter().any(|x| {
                let sx = x.string_value();
                right.iter().any(|sy| compare_strings(&sx, op, sy))
            })
        }
        (Value::NodeSet(a), Value::Boolean(b)) => compare_booleans(!a.is_empty(), op, *b),
        (Value::Boolean(b), Value::NodeSet(a)) => compare_booleans(*b, op, !a.is_empty()),
        (Value::NodeSet(a), other) => {
            a.iter().any(|x| compare_member(&x.string_value(), op, other))
        }
        (other, Value::NodeSet(a)) => {
            a.iter().any(|x| compare_member(&x.string_value(), op.flip(), other))
        }
        _ => compare_scalars(lhs, op, rhs),
    }
}

fn compare_booleans(a: bool, op: CompareOp, b: bool) -> bool {
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        _ => compare_numbers(f64::from(u8::from(a)), op, f64::from(u8::from(b))),
    }
}

/// A node's string value against a number or string.
fn compare_member<N: XdmNode>(string_value: &str, op: CompareOp, other: &Value<N>) -> bool {
    match other {
        Value::Number(n) => compare_numbers(string_to_number(string_value), op, *n),
        _ => compare_strings(string_value, op, &other.as_string()),
    }
}

fn compare_strings(a: &str, op: CompareOp, b: &str) -> bool {
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        _ => compare_numbers(string_to_number(a), op, string_to_number(b)),
    }
}

fn compare_numbers(a: f64, op: CompareOp, b: f64) -> bool {
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
    }
}

fn compare_scalars<N: XdmNode>(lhs: &Value<N>, op: CompareOp, rhs: &Value<N>) -> bool {
    if !op.is_equality() {
        return compare_numbers(lhs.as_number(), op, rhs.as_number());
    }
    let equal = match (lhs, rhs) {
        (Value::Boolean(_), _) | (_, Value::Boolean(_)) => lhs.as_boolean() == rhs.as_boolean(),
        (Value::Number(_), _) | (_, Value::Number(_)) => lhs.as_number() == rhs.as_number(),
        _ => lhs.as_string() == rhs.as_string(),
    };
    if op == CompareOp::Eq { equal } else { !equal }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::value::NodeSet;
    use crate::model::tree::{TreeNode, doc, elem, text};

    type V = Value<TreeNode>;

    fn items(values: &[&str]) -> V {
        let mut root = elem("list");
        for v in values {
            root = root.child(elem("item").child(text(v)));
        }
        let d = doc().child(root).build();
        let list = d.document_element().unwrap();
        let nodes: Vec<TreeNode> =
            (0..list.child_count()).filter_map(|i| list.child_at(i)).collect();
        Value::NodeSet(NodeSet::from_sorted(nodes))
    }

    #[test]
    fn scalars_follow_conversion_priority() {
        assert!(compare_values(&V::Boolean(true), CompareOp::Eq, &V::String("x".into())));
        assert!(compare_values(&V::Number(1.0), CompareOp::Eq, &V::String(" 1 ".into())));
        assert!(!compare_values(&V::String("1.0".into()), CompareOp::Eq, &V::String("1".into())));
        assert!(compare_values(&V::String("10".into()), CompareOp::Gt, &V::String("9".into())));
    }

    #[test]
    fn nan_is_unequal_to_itself() {
        assert!(!compare_values(&V::Number(f64::NAN), CompareOp::Eq, &V::Number(f64::NAN)));
        assert!(compare_values(&V::Number(f64::NAN), CompareOp::Ne, &V::Number(f64::NAN)));
    }

    #[test]
    fn node_sets_compare_existentially() {
        let set = items(&["1", "5", "9"]);
        assert!(compare_values(&set, CompareOp::Eq, &V::Number(5.0)));
        assert!(compare_values(&set, CompareOp::Ne, &V::Number(5.0)));
        assert!(compare_values(&V::Number(2.0), CompareOp::Lt, &set));
        assert!(!compare_values(&set, CompareOp::Gt, &V::Number(9.0)));
        assert!(compare_values(&set, CompareOp::Eq, &items(&["9", "7"])));
    }

    #[test]
    fn empty_node_set_against_boolean() {
        assert!(compare_values(&V::empty(), CompareOp::Eq, &V::Boolean(false)));
        assert!(!compare_values(&V::empty(), CompareOp::Eq, &V::String(String::new())));
    }
}
