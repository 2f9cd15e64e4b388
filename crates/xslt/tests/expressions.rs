use platynui_xslt::{
    ArithmeticOp, Axis, AxisCursor, CompareOp, Context, ContextBuilder, ControllerBuilder, DataType,
    Dependencies, ErrorClass, ErrorCode, ExpandedName, Expression, FunctionRegistry, NodeKind,
    NodeTest, ResolveError, Step, TreeDocument, TreeNode, Value, XdmNode, attr, comment, doc, elem,
    ns, text,
};
use rstest::{fixture, rstest};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// <r v="b"><item>a</item><item>b</item><item>b</item><!--c--><other/></r>
#[fixture]
fn sample() -> TreeDocument {
    doc()
        .child(
            elem("r")
                .attr(attr("v", "b"))
                .child(elem("item").child(text("a")))
                .child(elem("item").child(text("b")))
                .child(elem("item").child(text("b")))
                .child(comment("c"))
                .child(elem("other")),
        )
        .build()
}

fn ctx(node: &TreeNode) -> Context<TreeNode> {
    ContextBuilder::new().with_node(node.clone()).with_position(1).with_last(1).build()
}

fn nodes(value: Value<TreeNode>) -> Vec<TreeNode> {
    value.into_node_set().unwrap().to_vec()
}

fn items() -> Expression<TreeNode> {
    Expression::child(NodeTest::element("item"))
}

fn debug(e: &Expression<TreeNode>) -> String {
    format!("{e:?}")
}

#[rstest]
fn arithmetic_folds_to_literal() {
    let e: Expression<TreeNode> = Expression::arithmetic(
        Expression::literal(1.0),
        ArithmeticOp::Add,
        Expression::arithmetic(
            Expression::literal(2.0),
            ArithmeticOp::Multiply,
            Expression::literal(3.0),
        ),
    );
    match e.simplify().unwrap() {
        Expression::Literal(Value::Number(n)) => assert_eq!(n, 7.0),
        other => panic!("not folded: {other:?}"),
    }
}

#[rstest]
#[case(ArithmeticOp::Divide, 1.0, 0.0, f64::INFINITY)]
#[case(ArithmeticOp::Modulo, 5.0, 2.0, 1.0)]
#[case(ArithmeticOp::Modulo, -5.0, 2.0, -1.0)]
#[case(ArithmeticOp::Subtract, 0.5, 2.0, -1.5)]
fn arithmetic_operators(
    #[case] op: ArithmeticOp,
    #[case] a: f64,
    #[case] b: f64,
    #[case] expected: f64,
) {
    let e: Expression<TreeNode> =
        Expression::arithmetic(Expression::literal(a), op, Expression::literal(b));
    assert_eq!(e.evaluate(&Context::empty()).unwrap().as_number(), expected);
}

#[rstest]
fn boolean_short_circuit_skips_unbound_variable() {
    let unbound = Expression::variable(ExpandedName::local("nope"));
    let e: Expression<TreeNode> = Expression::and(Expression::literal(false), unbound.clone());
    assert!(matches!(e.simplify().unwrap(), Expression::Literal(Value::Boolean(false))));
    assert!(!e.evaluate_as_boolean(&Context::empty()).unwrap());
    let e: Expression<TreeNode> = Expression::or(Expression::literal(true), unbound);
    assert!(e.evaluate_as_boolean(&Context::empty()).unwrap());
}

#[rstest]
fn simplify_is_idempotent() {
    let shapes: Vec<Expression<TreeNode>> = vec![
        Expression::filter(items(), Expression::literal(2.0)),
        Expression::filter(items(), Expression::Last),
        Expression::path(
            Expression::ContextNode,
            Step::new(Axis::Child, NodeTest::AnyNode).with_filter(Expression::literal(true)),
        ),
        Expression::union(items(), Expression::empty()),
        Expression::count(Expression::union(
            items(),
            Expression::child(NodeTest::element("other")),
        )),
        Expression::not(Expression::compare(
            Expression::Position,
            CompareOp::Lt,
            Expression::literal(3.0),
        )),
        Expression::convert(DataType::String, Expression::literal(4.0)),
    ];
    for e in shapes {
        let once = e.simplify().unwrap();
        let twice = once.simplify().unwrap();
        assert_eq!(debug(&once), debug(&twice));
    }
}

#[rstest]
fn simplify_rewrites_numeric_and_constant_predicates() {
    let positional = Expression::filter(items(), Expression::literal(2.0)).simplify().unwrap();
    assert!(matches!(
        positional,
        Expression::Filter { ref predicate, .. }
            if matches!(**predicate, Expression::PositionRange { min: 2, max: Some(2) })
    ));
    let never = Expression::filter(items(), Expression::literal(1.5)).simplify().unwrap();
    assert!(matches!(never, Expression::Literal(ref v) if v.is_empty_node_set()));
    let always = Expression::filter(items(), Expression::literal("yes")).simplify().unwrap();
    assert!(matches!(always, Expression::Axis { axis: Axis::Child, .. }));
    let dead_step: Expression<TreeNode> = Expression::path(
        Expression::ContextNode,
        Step::new(Axis::Child, NodeTest::AnyNode).with_filter(Expression::literal(false)),
    );
    assert!(matches!(
        dead_step.simplify().unwrap(),
        Expression::Literal(ref v) if v.is_empty_node_set()
    ));
}

#[rstest]
fn simplified_and_original_agree(sample: TreeDocument) {
    let r = sample.document_element().unwrap();
    let shapes: Vec<Expression<TreeNode>> = vec![
        Expression::filter(items(), Expression::literal(2.0)),
        Expression::filter(items(), Expression::Last),
        Expression::path(
            Expression::ContextNode,
            Step::new(Axis::Child, NodeTest::AnyNode).with_filter(Expression::literal(3.0)),
        ),
        Expression::union(items(), Expression::empty()),
    ];
    for e in shapes {
        let simplified = e.simplify().unwrap();
        assert_eq!(
            nodes(e.evaluate(&ctx(&r)).unwrap()),
            nodes(simplified.evaluate(&ctx(&r)).unwrap())
        );
    }
}

#[rstest]
fn empty_target_reduce_changes_nothing(sample: TreeDocument) {
    let r = sample.document_element().unwrap();
    let e = Expression::filter(
        items(),
        Expression::compare(Expression::ContextNode, CompareOp::Eq, Expression::CurrentNode),
    );
    let reduced = e.reduce(Dependencies::empty(), &ctx(&r)).unwrap();
    assert_eq!(debug(&reduced), debug(&e));
}

#[rstest]
fn current_node_is_hoisted(sample: TreeDocument) {
    let r = sample.document_element().unwrap();
    let current_v = Expression::path(
        Expression::CurrentNode,
        Step::new(Axis::Attribute, NodeTest::attribute("v")),
    );
    let e = Expression::filter(
        items(),
        Expression::compare(Expression::ContextNode, CompareOp::Eq, current_v),
    );
    assert!(e.dependencies().contains(Dependencies::CURRENT_NODE));

    let reduced = e.reduce(Dependencies::CURRENT_NODE, &ctx(&r)).unwrap();
    assert!(!reduced.dependencies().contains(Dependencies::CURRENT_NODE));

    let without_current = ContextBuilder::new().with_context_node(r.clone()).build();
    let selected = nodes(reduced.evaluate(&without_current).unwrap());
    assert_eq!(selected.len(), 2);
    assert!(selected.iter().all(|n| n.string_value() == "b"));
    assert_eq!(selected, nodes(e.evaluate(&ctx(&r)).unwrap()));

    let err = e.evaluate(&without_current).unwrap_err();
    assert_eq!(err.code, ErrorCode::XPDY0002);
}

#[rstest]
fn full_reduce_yields_literal(sample: TreeDocument) {
    let r = sample.document_element().unwrap();
    let e = Expression::count(items());
    match e.reduce(Dependencies::all(), &ctx(&r)).unwrap() {
        Expression::Literal(Value::Number(n)) => assert_eq!(n, 3.0),
        other => panic!("not reduced: {other:?}"),
    }
}

#[rstest]
#[case(Expression::Position)]
#[case(Expression::Last)]
#[case(Expression::ContextNode)]
#[case(Expression::CurrentNode)]
#[case(Expression::Root)]
#[case(Expression::generate_id(None))]
fn missing_facet_is_usage_error(#[case] e: Expression<TreeNode>) {
    let err = e.evaluate(&Context::empty()).unwrap_err();
    assert_eq!(err.code, ErrorCode::XPDY0002);
    assert_eq!(err.class(), ErrorClass::Usage);
    assert!(!err.is_recoverable());
    assert_eq!(err.format_code(), "err:XPDY0002");
}

#[rstest]
fn variables_resolve_or_fail() {
    let name = ExpandedName::local("x");
    let ctx: Context<TreeNode> = ContextBuilder::new().with_variable(name.clone(), 3.0).build();
    let sum = Expression::arithmetic(
        Expression::variable(name),
        ArithmeticOp::Add,
        Expression::literal(1.0),
    );
    assert_eq!(sum.evaluate(&ctx).unwrap().as_number(), 4.0);
    assert!(sum.dependencies().contains(Dependencies::VARIABLES));

    let err = Expression::variable(ExpandedName::local("y")).evaluate(&ctx).unwrap_err();
    assert_eq!(err.code, ErrorCode::XPST0008);
}

#[rstest]
fn count_and_duplicates(sample: TreeDocument) {
    let r = sample.document_element().unwrap();
    let c = ctx(&r);
    assert_eq!(Expression::count(items()).evaluate(&c).unwrap().as_number(), 3.0);
    let parents = Expression::path(items(), Step::new(Axis::Parent, NodeTest::AnyNode));
    assert_eq!(Expression::count(parents.clone()).evaluate(&c).unwrap().as_number(), 1.0);
    assert_eq!(nodes(parents.evaluate(&c).unwrap()), vec![r.clone()]);
    let comments = Expression::child(NodeTest::Kind(NodeKind::Comment));
    assert_eq!(Expression::count(comments).evaluate(&c).unwrap().as_number(), 1.0);
}

#[rstest]
fn path_results_are_in_document_order(sample: TreeDocument) {
    let r = sample.document_element().unwrap();
    let texts = Expression::path(
        Expression::axis(Axis::Descendant, NodeTest::Kind(NodeKind::Text)),
        Step::new(Axis::AncestorOrSelf, NodeTest::AnyNode),
    );
    let selected = nodes(texts.evaluate(&ctx(&r)).unwrap());
    let expected: Vec<TreeNode> = AxisCursor::all(&sample.root(), Axis::DescendantOrSelf)
        .filter(|n| {
            n.kind() != NodeKind::Comment
                && !(n.kind() == NodeKind::Element && n.child_count() == 0)
        })
        .collect();
    assert_eq!(selected, expected);
}

#[rstest]
fn reverse_axis_predicates_count_from_the_origin(sample: TreeDocument) {
    let last_item =
        AxisCursor::new(sample.root(), Axis::Descendant, NodeTest::element("item")).last().unwrap();
    let c = ctx(&last_item);
    let nearest = Expression::path(
        Expression::ContextNode,
        Step::new(Axis::PrecedingSibling, NodeTest::element("item"))
            .with_filter(Expression::literal(1.0)),
    );
    let farthest = Expression::path(
        Expression::ContextNode,
        Step::new(Axis::PrecedingSibling, NodeTest::element("item")).with_filter(Expression::Last),
    );
    let nearest = nodes(nearest.simplify().unwrap().evaluate(&c).unwrap());
    let farthest = nodes(farthest.evaluate(&c).unwrap());
    assert_eq!(nearest[0].string_value(), "b");
    assert_eq!(farthest[0].string_value(), "a");
    assert_eq!(nearest[0].sibling_index(), 1);
    assert_eq!(farthest[0].sibling_index(), 0);
}

#[rstest]
fn filter_expression_positions_follow_document_order(sample: TreeDocument) {
    let r = sample.document_element().unwrap();
    let reversed = Expression::axis(Axis::Ancestor, NodeTest::AnyNode);
    let first = Expression::filter(reversed, Expression::literal(1.0));
    let item = AxisCursor::new(r.clone(), Axis::Child, NodeTest::element("item")).next().unwrap();
    assert_eq!(nodes(first.evaluate(&ctx(&item)).unwrap()), vec![sample.root()]);
}

#[rstest]
fn node_set_comparisons_are_existential(sample: TreeDocument) {
    let r = sample.document_element().unwrap();
    let c = ctx(&r);
    let eq = |rhs: Expression<TreeNode>, op| {
        Expression::compare(items(), op, rhs).evaluate_as_boolean(&c).unwrap()
    };
    assert!(eq(Expression::literal("a"), CompareOp::Eq));
    assert!(eq(Expression::literal("a"), CompareOp::Ne));
    assert!(!eq(Expression::literal("z"), CompareOp::Eq));
    assert!(eq(Expression::literal(true), CompareOp::Eq));
    let none = Expression::child(NodeTest::element("missing"));
    let against = |op, rhs: Expression<TreeNode>| {
        Expression::compare(none.clone(), op, rhs).evaluate_as_boolean(&c).unwrap()
    };
    assert!(!against(CompareOp::Eq, Expression::literal("")));
    assert!(!against(CompareOp::Ne, Expression::literal("")));
    assert!(against(CompareOp::Eq, Expression::literal(false)));
}

#[rstest]
fn boolean_of_path_streams(sample: TreeDocument) {
    let r = sample.document_element().unwrap();
    let c = ctx(&r);
    assert!(items().evaluate_as_boolean(&c).unwrap());
    assert!(!Expression::child(NodeTest::element("missing")).evaluate_as_boolean(&c).unwrap());
    let s = Expression::convert(DataType::String, items()).evaluate(&c).unwrap();
    assert!(matches!(s, Value::String(ref v) if v == "a"));
}

#[rstest]
fn non_node_set_where_node_set_required() {
    let err = Expression::<TreeNode>::convert(DataType::NodeSet, Expression::literal(1.0))
        .evaluate(&Context::empty())
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::XPTY0004);
    assert_eq!(err.class(), ErrorClass::Usage);
}

#[rstest]
fn registered_functions(sample: TreeDocument) {
    let mut registry: FunctionRegistry<TreeNode> = FunctionRegistry::new();
    let double = ExpandedName::new(Some("urn:test"), "double");
    registry.register(double.clone(), 1, DataType::Number, Dependencies::empty(), |_, args| {
        Ok(Value::Number(args[0].as_number() * 2.0))
    });
    let name_of = ExpandedName::local("name-of");
    registry.register(name_of.clone(), 0, DataType::String, Dependencies::CONTEXT_NODE, |ctx, _| {
        Ok(Value::String(ctx.context_node()?.name().map(|q| q.local).unwrap_or_default()))
    });

    let folded = Expression::call(&registry, &double, vec![Expression::literal(21.0)])
        .unwrap()
        .simplify()
        .unwrap();
    assert!(matches!(folded, Expression::Literal(Value::Number(n)) if n == 42.0));

    let call = Expression::call(&registry, &name_of, vec![]).unwrap();
    assert_eq!(call.data_type(), DataType::String);
    assert!(matches!(call.simplify().unwrap(), Expression::Call(_)));
    let r = sample.document_element().unwrap();
    assert_eq!(call.evaluate_as_string(&ctx(&r)).unwrap(), "r");

    let unknown = Expression::call(&registry, &ExpandedName::local("nope"), vec![]).unwrap_err();
    assert_eq!(unknown.code, ErrorCode::XPST0017);
    let arity = Expression::call(&registry, &double, vec![]).unwrap_err();
    assert_eq!(arity.code, ErrorCode::XPST0017);
    assert_eq!(
        registry.resolve(&double, 2).unwrap_err(),
        ResolveError::WrongArity { name: double.clone(), available: vec![1] }
    );
    assert!(registry.contains(&double, 1));
}

#[rstest]
fn generate_id_is_stable_and_unique(sample: TreeDocument) {
    let other = doc().child(elem("r").namespace(ns("p", "urn:p")).child(elem("item"))).build();
    let controller = Arc::new(ControllerBuilder::new().build());
    let id_of = |n: &TreeNode| {
        let c = ContextBuilder::new()
            .with_node(n.clone())
            .with_controller(Arc::clone(&controller))
            .build();
        Expression::generate_id(None).evaluate_as_string(&c).unwrap()
    };
    let mut everything = Vec::new();
    for d in [&sample, &other] {
        for n in AxisCursor::all(&d.root(), Axis::DescendantOrSelf) {
            everything.extend(AxisCursor::all(&n, Axis::Attribute));
            everything.extend(AxisCursor::all(&n, Axis::Namespace));
            everything.push(n);
        }
    }
    let ids: Vec<String> = everything.iter().map(id_of).collect();
    let again: Vec<String> = everything.iter().map(id_of).collect();
    assert_eq!(ids, again);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());
    assert!(ids.iter().all(|id| id.chars().all(|c| c.is_ascii_alphanumeric())));
    assert!(ids.iter().all(|id| id.starts_with(|c: char| c.is_ascii_alphabetic())));

    let r = sample.document_element().unwrap();
    let c = ContextBuilder::new().with_node(r).with_controller(Arc::clone(&controller)).build();
    let none = Expression::generate_id(Some(Expression::child(NodeTest::element("missing"))));
    assert_eq!(none.evaluate_as_string(&c).unwrap(), "");
    let first_item = Expression::generate_id(Some(items()));
    let item =
        AxisCursor::new(sample.root(), Axis::Descendant, NodeTest::element("item")).next().unwrap();
    assert_eq!(first_item.evaluate_as_string(&c).unwrap(), id_of(&item));
}

#[test]
fn controller_dependent_predicate_parts_run_once_per_enumeration() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut registry: FunctionRegistry<TreeNode> = FunctionRegistry::new();
    let session_value = ExpandedName::local("session-value");
    registry.register(
        session_value.clone(),
        0,
        DataType::String,
        Dependencies::CONTROLLER,
        move |ctx, _| {
            ctx.controller()?;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::String("even".into()))
        },
    );
    let parity = |i: usize| if i % 2 == 0 { "even" } else { "odd" };
    let list = doc()
        .child(elem("list").children((0..50).map(|i| elem("item").child(text(parity(i))))))
        .build();
    let c = ContextBuilder::new()
        .with_node(list.document_element().unwrap())
        .with_controller(Arc::new(ControllerBuilder::new().build()))
        .build();
    let predicate = Expression::compare(
        Expression::ContextNode,
        CompareOp::Eq,
        Expression::call(&registry, &session_value, vec![]).unwrap(),
    );

    let path = Expression::path(
        Expression::ContextNode,
        Step::new(Axis::Child, NodeTest::element("item")).with_filter(predicate.clone()),
    );
    assert_eq!(nodes(path.evaluate(&c).unwrap()).len(), 25);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let filtered = Expression::filter(items(), predicate);
    assert_eq!(nodes(filtered.evaluate(&c).unwrap()).len(), 25);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
