//! Request URI E2E Tests

use odata_edm::{demo_model, EntityDataModel, PrimitiveType};
use odata_uri::*;

fn model() -> EntityDataModel {
    demo_model().expect("demo model")
}

// ============================================================================
// Resource paths
// ============================================================================

#[test]
fn test_property_of_keyed_entity() {
    let model = model();
    let uri = parse_uri("/odata.svc/Customers(1)/Phone", &model).expect("parse");

    assert_eq!(uri.root_path, "/odata.svc");
    assert_eq!(uri.entity_set.as_deref(), Some("Customers"));
    let key = uri.key().expect("key");
    assert_eq!(key.len(), 1);
    assert_eq!(key[0].name, "id");
    assert_eq!(key[0].value, Literal::Int32(1));
    match &uri.target {
        Target::Property { name, type_ref } => {
            assert_eq!(name, "Phone");
            assert!(type_ref.collection);
            assert_eq!(type_ref.as_primitive(), Some(PrimitiveType::String));
        }
        other => panic!("unexpected target {other:?}"),
    }
    assert_eq!(uri.canonical_path(), "Customers(1)/Phone");
}

#[test]
fn test_service_document_and_metadata() {
    let model = model();
    assert!(parse_uri("/odata.svc/", &model)
        .expect("root")
        .is_service_document());
    assert!(parse_uri("/odata.svc", &model)
        .expect("root")
        .is_service_document());
    assert!(parse_uri("/odata.svc/$metadata", &model)
        .expect("metadata")
        .is_metadata());
}

#[test]
fn test_configured_root_without_svc_suffix() {
    let model = model();
    let parser = UriParser::with_config(
        &model,
        UriParserConfig {
            root_path: Some("/api/odata".to_string()),
            max_top: Some(50),
        },
    );
    let uri = parser.parse("/api/odata/Orders?$top=10").expect("parse");
    assert_eq!(uri.root_path, "/api/odata");
    assert_eq!(uri.options.top, Some(10));

    let err = parser.parse("/api/odata/Orders?$top=51").expect_err("over max");
    assert_eq!(err.kind, ParseErrorKind::InvalidOption);
    assert_eq!(err.component, "$top");
}

#[test]
fn test_raw_value_and_count_segments() {
    let model = model();
    let uri = parse_uri("/odata.svc/Customers(1)/name/$value", &model).expect("value");
    assert_eq!(
        uri.target,
        Target::Value {
            primitive: PrimitiveType::String
        }
    );

    let uri = parse_uri("/odata.svc/Orders/$count?$filter=shipped", &model).expect("count");
    assert_eq!(uri.target, Target::Count);
    assert!(uri.options.filter.is_some());

    let err = parse_uri("/odata.svc/Customers(1)/$value", &model).expect_err("entity value");
    assert_eq!(err.kind, ParseErrorKind::InvalidSegment);
}

#[test]
fn test_bound_action_and_function_import() {
    let model = model();
    let uri = parse_uri("/odata.svc/Customers(2)/ODataDemo.ODataDemoAction", &model)
        .expect("action");
    assert!(matches!(uri.target, Target::Action { is_bound: true, .. }));
    assert!(matches!(
        uri.operation(),
        Some(PathSegment::Operation { operation, .. }) if operation == "ODataDemo.ODataDemoAction"
    ));

    let uri = parse_uri("/odata.svc/GetTopCustomers(n=3)?$select=name", &model).expect("function");
    assert_eq!(uri.entity_type(), Some("ODataDemo.Customer"));
    assert_eq!(uri.canonical_path(), "GetTopCustomers(n=3)");
    assert_eq!(
        uri.options.select,
        vec![SelectItem::Path(vec!["name".to_string()])]
    );

    let uri = parse_uri("/odata.svc/ODataDemoActionImport", &model).expect("action import");
    assert!(matches!(uri.target, Target::Action { is_bound: false, .. }));
}

// ============================================================================
// Query options
// ============================================================================

#[test]
fn test_full_option_set() {
    let model = model();
    let uri = parse_uri(
        "/odata.svc/Customers?$filter=startswith(name,'A')%20and%20id%20gt%2010\
         &$select=id,name,address/city&$expand=Orders($select=amount;$top=2;$orderby=placedAt desc)\
         &$orderby=name&$top=5&$skip=10&$count=true&$format=json&debug=on",
        &model,
    )
    .expect("parse");

    let o = &uri.options;
    assert_eq!(o.filter.as_ref().map(|f| f.ty.clone()), Some(ExprType::boolean()));
    assert_eq!(o.select.len(), 3);
    assert!(o.is_selected("address"));
    assert!(!o.is_selected("Phone"));
    assert_eq!(o.top, Some(5));
    assert_eq!(o.skip, Some(10));
    assert!(o.count);
    assert_eq!(o.format, Some(Format::Json));
    assert_eq!(
        o.custom,
        vec![CustomOption {
            name: "debug".to_string(),
            value: "on".to_string()
        }]
    );

    let orders = o.expanded("Orders").expect("expand");
    assert!(orders.collection);
    assert_eq!(orders.target_type, "ODataDemo.Order");
    assert_eq!(orders.options.top, Some(2));
    assert_eq!(orders.options.order_by.len(), 1);
    assert!(orders.options.order_by[0].descending);
}

#[test]
fn test_unknown_options_pass_through_verbatim() {
    let model = model();
    let uri = parse_uri("/odata.svc/Orders?$search=blue&x-trace=1", &model).expect("parse");
    let names: Vec<&str> = uri.options.custom.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["$search", "x-trace"]);
}

#[test]
fn test_top_and_skip_must_be_non_negative_integers() {
    let model = model();
    for bad in ["$top=-1", "$top=abc", "$skip=1.5"] {
        let err = parse_uri(&format!("/odata.svc/Orders?{bad}"), &model).expect_err(bad);
        assert_eq!(err.kind, ParseErrorKind::InvalidOption, "{bad}");
    }
}

#[test]
fn test_options_require_a_matching_target() {
    let model = model();
    let err = parse_uri("/odata.svc/Customers(1)?$top=1", &model).expect_err("single entity");
    assert_eq!(err.kind, ParseErrorKind::InvalidOption);

    let err = parse_uri("/odata.svc/Customers(1)/Phone?$filter=true", &model)
        .expect_err("primitive collection");
    assert_eq!(err.kind, ParseErrorKind::InvalidOption);

    let err = parse_uri("/odata.svc/Orders?$expand=Customer($top=1)", &model)
        .expect_err("top on single nav");
    assert_eq!(err.kind, ParseErrorKind::InvalidOption);

    let err = parse_uri("/odata.svc/Orders?$top=1&$top=2", &model).expect_err("duplicate");
    assert_eq!(err.kind, ParseErrorKind::InvalidOption);
}

#[test]
fn test_malformed_filter_reports_fragment() {
    let model = model();
    let err = parse_uri("/odata.svc/Customers?$filter=(name eq 'x'", &model).expect_err("paren");
    assert_eq!(err.kind, ParseErrorKind::Syntax);
    assert_eq!(err.component, "$filter");
    assert!(err.fragment.contains("name eq 'x'"));

    let err = parse_uri("/odata.svc/Customers?$filter=id eq 'one'", &model).expect_err("type");
    assert_eq!(err.kind, ParseErrorKind::TypeMismatch);
    assert_eq!(err.fragment, "id eq 'one'");
}

#[test]
fn test_plus_in_a_query_value_is_literal() {
    let model = model();
    let uri = parse_uri("/odata.svc/Customers?$filter=name%20eq%20'a+b'", &model).expect("parse");
    let filter = uri.options.filter.expect("filter");
    let ExprNode::Binary { right, .. } = &filter.node else {
        panic!("expected comparison, got {filter:?}");
    };
    assert_eq!(
        right.node,
        ExprNode::Literal {
            value: Literal::String("a+b".to_string())
        }
    );

    let uri = parse_uri("/odata.svc/Orders?x-note=1+1%3D2", &model).expect("custom");
    assert_eq!(uri.options.custom[0].value, "1+1=2");
}

#[test]
fn test_error_positions_point_into_the_request_uri() {
    let model = model();
    let at = |raw: &str, needle: &str| raw.find(needle).expect("needle in uri");

    let raw = "/odata.svc/Customers(1)/Nickname";
    let err = parse_uri(raw, &model).expect_err("unknown property");
    assert_eq!(err.position, at(raw, "Nickname"));

    let raw = "/odata.svc/Customers?$top=2&$filter=id%20eq%201%20and%20nickname%20eq%20'x'";
    let err = parse_uri(raw, &model).expect_err("unknown filter member");
    assert_eq!(err.component, "$filter");
    assert_eq!(err.position, at(raw, "nickname"));

    let raw = "/odata.svc/Customers?$skip=1&$top=-1";
    let err = parse_uri(raw, &model).expect_err("negative top");
    assert_eq!(err.position, at(raw, "-1"));

    let raw = "/odata.svc/Customers?$expand=Orders($select=amount;$filter=bogus%20eq%201)";
    let err = parse_uri(raw, &model).expect_err("nested filter");
    assert_eq!(err.kind, ParseErrorKind::UnknownProperty);
    assert_eq!(err.position, at(raw, "bogus"));

    let raw = "http://localhost:8080/odata.svc/Nobody";
    let err = parse_uri(raw, &model).expect_err("absolute url");
    assert_eq!(err.position, at(raw, "Nobody"));
}

#[test]
fn test_expand_nesting_is_bounded() {
    let model = model();
    let nest = |levels: usize| {
        let mut expand = "Orders".to_string();
        for i in 1..levels {
            let nav = if i % 2 == 1 { "Customer" } else { "Orders" };
            expand = format!("{nav}($expand={expand})");
        }
        if levels % 2 == 0 {
            format!("/odata.svc/Orders?$expand={expand}")
        } else {
            format!("/odata.svc/Customers?$expand={expand}")
        }
    };
    parse_uri(&nest(MAX_EXPAND_DEPTH), &model).expect("at the limit");
    let err = parse_uri(&nest(MAX_EXPAND_DEPTH + 1), &model).expect_err("past the limit");
    assert_eq!(err.kind, ParseErrorKind::InvalidOption);
    assert_eq!(err.component, "$expand");
}

#[test]
fn test_deeply_nested_filter_is_rejected() {
    let model = model();
    let filter = format!("{}id eq 1{}", "(".repeat(5_000), ")".repeat(5_000));
    let err = parse_uri(&format!("/odata.svc/Customers?$filter={filter}"), &model)
        .expect_err("nesting");
    assert_eq!(err.kind, ParseErrorKind::Syntax);
    assert_eq!(err.component, "$filter");
}

#[test]
fn test_select_and_expand_validate_names() {
    let model = model();
    let err = parse_uri("/odata.svc/Customers?$select=nickname", &model).expect_err("select");
    assert_eq!(err.kind, ParseErrorKind::UnknownProperty);
    assert_eq!(err.fragment, "nickname");

    let err = parse_uri("/odata.svc/Customers?$expand=name", &model).expect_err("expand");
    assert_eq!(err.kind, ParseErrorKind::UnknownProperty);
}

#[test]
fn test_descriptor_serializes_to_json() {
    let model = model();
    let uri = parse_uri("/odata.svc/Customers(1)?$select=name", &model).expect("parse");
    let json = serde_json::to_value(&uri).expect("json");
    assert_eq!(json["segments"][0]["tag"], "entity_set");
    assert_eq!(json["segments"][1]["tag"], "key");
    assert_eq!(json["target"]["kind"], "entity");
}
