use platynui_xslt::consts::XML_URI;
use platynui_xslt::{
    Axis, AxisCursor, ErrorClass, ErrorCode, NodeKind, NodeTest, TreeDocument, TreeNode, XdmNode,
    attr, comment, doc, elem, ns, text,
};
use rstest::{fixture, rstest};

fn label(n: &TreeNode) -> String {
    let local = || n.name().map(|q| q.local).unwrap_or_default();
    match n.kind() {
        NodeKind::Document => "/".to_string(),
        NodeKind::Element => local(),
        NodeKind::Attribute => format!("@{}", local()),
        NodeKind::Text => "#text".to_string(),
        NodeKind::Comment => "#comment".to_string(),
        NodeKind::ProcessingInstruction => format!("?{}", local()),
        NodeKind::Namespace => format!("ns:{}", local()),
    }
}

fn walk(origin: &TreeNode, axis: Axis) -> Vec<String> {
    AxisCursor::all(origin, axis).map(|n| label(&n)).collect()
}

fn find(document: &TreeDocument, name: &str) -> TreeNode {
    AxisCursor::all(&document.root(), Axis::Descendant)
        .find(|n| n.kind() == NodeKind::Element && n.name().is_some_and(|q| q.local == name))
        .unwrap()
}

fn attribute(element: &TreeNode, name: &str) -> TreeNode {
    AxisCursor::new(element.clone(), Axis::Attribute, NodeTest::attribute(name)).next().unwrap()
}

// <r xmlns:p="urn:p">
//   <a id="1" q="2"><b/>t<c/></a>
//   <d><e/><!--x--></d>
// </r>
#[fixture]
fn sample() -> TreeDocument {
    doc()
        .child(
            elem("r")
                .namespace(ns("p", "urn:p"))
                .child(
                    elem("a")
                        .attr(attr("id", "1"))
                        .attr(attr("q", "2"))
                        .child(elem("b"))
                        .child(text("t"))
                        .child(elem("c")),
                )
                .child(elem("d").child(elem("e")).child(comment("x"))),
        )
        .build()
}

#[rstest]
fn child_and_descendant(sample: TreeDocument) {
    let r = find(&sample, "r");
    assert_eq!(walk(&r, Axis::Child), ["a", "d"]);
    assert_eq!(walk(&r, Axis::Descendant), ["a", "b", "#text", "c", "d", "e", "#comment"]);
    assert_eq!(walk(&find(&sample, "a"), Axis::DescendantOrSelf), ["a", "b", "#text", "c"]);
}

#[rstest]
fn following_and_preceding(sample: TreeDocument) {
    assert_eq!(walk(&find(&sample, "b"), Axis::Following), ["#text", "c", "d", "e", "#comment"]);
    assert_eq!(walk(&find(&sample, "a"), Axis::Following), ["d", "e", "#comment"]);
    assert_eq!(walk(&find(&sample, "e"), Axis::Preceding), ["c", "#text", "b", "a"]);
}

#[rstest]
fn siblings(sample: TreeDocument) {
    assert_eq!(walk(&find(&sample, "b"), Axis::FollowingSibling), ["#text", "c"]);
    assert_eq!(walk(&find(&sample, "c"), Axis::PrecedingSibling), ["#text", "b"]);
    assert!(walk(&sample.root(), Axis::FollowingSibling).is_empty());
}

#[rstest]
fn ancestors(sample: TreeDocument) {
    let e = find(&sample, "e");
    assert_eq!(walk(&e, Axis::Ancestor), ["d", "r", "/"]);
    assert_eq!(walk(&e, Axis::AncestorOrSelf), ["e", "d", "r", "/"]);
    assert_eq!(walk(&e, Axis::Parent), ["d"]);
    assert!(walk(&sample.root(), Axis::Parent).is_empty());
}

#[rstest]
fn preceding_or_ancestor_includes_ancestors_and_root(sample: TreeDocument) {
    let e = find(&sample, "e");
    assert_eq!(walk(&e, Axis::PrecedingOrAncestor), ["d", "c", "#text", "b", "a", "r", "/"]);
}

#[rstest]
fn attribute_axes(sample: TreeDocument) {
    let a = find(&sample, "a");
    assert_eq!(walk(&a, Axis::Attribute), ["@id", "@q"]);
    let q = attribute(&a, "q");
    assert_eq!(q.parent(), Some(a.clone()));
    assert!(walk(&q, Axis::Child).is_empty());
    assert!(walk(&q, Axis::Preceding).is_empty());
    assert_eq!(walk(&q, Axis::Following), ["b", "#text", "c", "d", "e", "#comment"]);
    assert_eq!(walk(&q, Axis::Ancestor), ["a", "r", "/"]);
}

#[rstest]
fn undefined_axes_are_empty(sample: TreeDocument) {
    let t = AxisCursor::all(&find(&sample, "a"), Axis::Child)
        .find(|n| n.kind() == NodeKind::Text)
        .unwrap();
    assert!(walk(&t, Axis::Attribute).is_empty());
    assert!(walk(&t, Axis::Namespace).is_empty());
    assert!(walk(&t, Axis::Child).is_empty());
    assert_eq!(walk(&t, Axis::DescendantOrSelf), ["#text"]);
}

#[rstest]
fn namespace_axis_inherits_and_adds_xml(sample: TreeDocument) {
    let b = find(&sample, "b");
    let nodes: Vec<TreeNode> = AxisCursor::all(&b, Axis::Namespace).collect();
    assert_eq!(nodes.iter().map(label).collect::<Vec<_>>(), ["ns:p", "ns:xml"]);
    assert_eq!(nodes[0].string_value(), "urn:p");
    assert_eq!(nodes[1].string_value(), XML_URI);
    assert!(nodes.iter().all(|n| n.parent() == Some(b.clone())));
}

#[test]
fn namespace_undeclaration_hides_outer_binding() {
    let d = doc()
        .child(
            elem("r")
                .namespace(ns("p", "urn:p"))
                .namespace(ns("", "urn:default"))
                .child(elem("inner").namespace(ns("p", ""))),
        )
        .build();
    let inner = find(&d, "inner");
    let uris: Vec<String> =
        AxisCursor::all(&inner, Axis::Namespace).map(|n| n.string_value()).collect();
    assert_eq!(uris, ["urn:default", XML_URI]);
}

#[test]
fn inner_declaration_wins() {
    let d = doc()
        .child(
            elem("r")
                .namespace(ns("p", "urn:outer"))
                .child(elem("inner").namespace(ns("p", "urn:inner"))),
        )
        .build();
    let uris: Vec<String> =
        AxisCursor::all(&find(&d, "inner"), Axis::Namespace).map(|n| n.string_value()).collect();
    assert_eq!(uris, ["urn:inner", XML_URI]);
}

#[rstest]
fn node_test_filters_axis(sample: TreeDocument) {
    let r = find(&sample, "r");
    let elements: Vec<String> =
        AxisCursor::new(r.clone(), Axis::Descendant, NodeTest::Kind(NodeKind::Element))
            .map(|n| label(&n))
            .collect();
    assert_eq!(elements, ["a", "b", "c", "d", "e"]);
    let named: Vec<String> =
        AxisCursor::new(r, Axis::Descendant, NodeTest::element("c")).map(|n| label(&n)).collect();
    assert_eq!(named, ["c"]);
}

#[rstest]
fn count_remaining_leaves_cursor_in_place(sample: TreeDocument) {
    let mut cursor = AxisCursor::all(&find(&sample, "r"), Axis::Descendant);
    cursor.advance();
    cursor.advance();
    assert_eq!(cursor.count_remaining(), 5);
    assert!(cursor.has_next());
    assert_eq!(cursor.count_remaining(), 5);
    assert_eq!(cursor.advance().map(|n| label(&n)).as_deref(), Some("#text"));
    assert_eq!(cursor.count_remaining(), 4);
}

#[rstest]
fn clones_are_independent(sample: TreeDocument) {
    let mut cursor = AxisCursor::all(&find(&sample, "r"), Axis::Descendant);
    cursor.advance();
    let dup = cursor.clone();
    let rest: Vec<String> = cursor.map(|n| label(&n)).collect();
    let rest_dup: Vec<String> = dup.map(|n| label(&n)).collect();
    assert_eq!(rest, rest_dup);
}

#[rstest]
#[case(Axis::Child, true, false, true)]
#[case(Axis::FollowingSibling, true, false, true)]
#[case(Axis::Descendant, true, false, false)]
#[case(Axis::DescendantOrSelf, true, false, false)]
#[case(Axis::Following, true, false, false)]
#[case(Axis::SelfAxis, true, true, true)]
#[case(Axis::Parent, true, true, true)]
#[case(Axis::Attribute, true, false, true)]
#[case(Axis::Namespace, false, false, true)]
#[case(Axis::Ancestor, false, true, false)]
#[case(Axis::AncestorOrSelf, false, true, false)]
#[case(Axis::Preceding, false, true, false)]
#[case(Axis::PrecedingOrAncestor, false, true, false)]
#[case(Axis::PrecedingSibling, false, true, true)]
fn ordering_flags(
    #[case] axis: Axis,
    #[case] forwards: bool,
    #[case] reverse: bool,
    #[case] peer: bool,
) {
    assert_eq!(axis.is_forwards(), forwards, "{}", axis.name());
    assert_eq!(axis.is_reverse(), reverse, "{}", axis.name());
    assert_eq!(axis.is_peer(), peer, "{}", axis.name());
}

#[rstest]
fn principal_node_kinds() {
    assert_eq!(Axis::Attribute.principal_node_kind(), NodeKind::Attribute);
    assert_eq!(Axis::Namespace.principal_node_kind(), NodeKind::Namespace);
    assert_eq!(Axis::Descendant.principal_node_kind(), NodeKind::Element);
}

#[rstest]
fn document_order_across_documents_is_structural_error(sample: TreeDocument) {
    let other = doc().child(elem("x")).build();
    let err = find(&sample, "a").compare_order(&find(&other, "x")).unwrap_err();
    assert_eq!(err.code, ErrorCode::FOER0000);
    assert_eq!(err.class(), ErrorClass::Structural);
    assert!(!err.is_recoverable());
}

#[rstest]
fn namespaces_precede_attributes_precede_children() {
    let d = doc()
        .child(elem("r").namespace(ns("p", "urn:p")).attr(attr("x", "1")).child(elem("c")))
        .build();
    let r = find(&d, "r");
    let namespace = AxisCursor::all(&r, Axis::Namespace).next().unwrap();
    let attribute = attribute(&r, "x");
    let child = find(&d, "c");
    assert!(r.compare_order(&namespace).unwrap().is_lt());
    assert!(namespace.compare_order(&attribute).unwrap().is_lt());
    assert!(attribute.compare_order(&child).unwrap().is_lt());
}
