//! Content Negotiation Property Tests

use odata_edm::demo_model;
use odata_service::*;
use odata_uri::parse_uri;
use proptest::prelude::*;

const RANGES: &[&str] = &[
    "application/json",
    "application/atom+xml",
    "application/xml",
    "application/*",
    "text/plain",
    "text/*",
    "*/*",
    "image/png",
];

const TARGETS: &[&str] = &[
    "/odata.svc/",
    "/odata.svc/$metadata",
    "/odata.svc/Customers",
    "/odata.svc/Customers(1)",
    "/odata.svc/Customers(1)/Phone",
    "/odata.svc/Customers(1)/name/$value",
    "/odata.svc/Customers/$count",
    "/odata.svc/ODataDemoActionImport",
];

const METHODS: &[Method] = &[Method::Get, Method::Post, Method::Put, Method::Patch, Method::Delete];

fn accept_header() -> impl Strategy<Value = Option<String>> {
    proptest::option::of(proptest::collection::vec(
        (proptest::sample::select(RANGES), 0u8..=10),
        1..4,
    ))
    .prop_map(|ranges| {
        ranges.map(|ranges| {
            ranges
                .into_iter()
                .map(|(range, q)| format!("{range};q={}", f32::from(q) / 10.0))
                .collect::<Vec<_>>()
                .join(", ")
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn renderer_choice_is_the_first_best_score(
        target in proptest::sample::select(TARGETS),
        method in proptest::sample::select(METHODS),
        accept in accept_header(),
    ) {
        let model = demo_model().expect("demo model");
        let uri = parse_uri(target, &model).expect("uri");
        let ctx = RequestContext {
            method,
            uri: &uri,
            accept: accept.as_deref(),
            content_type: None,
        };
        let negotiator = Negotiator::default();
        let scores: Vec<u32> = negotiator.renderers().iter().map(|r| r.score(&ctx)).collect();
        let best = scores.iter().copied().max().unwrap_or(0);

        match negotiator.select_renderer(&ctx) {
            Ok(selection) => {
                prop_assert!(best > 0);
                prop_assert_eq!(selection.score, best);
                let first = scores.iter().position(|&s| s == best).expect("best exists");
                prop_assert_eq!(selection.kind, negotiator.renderers()[first]);
                // Same input, same answer.
                prop_assert_eq!(negotiator.select_renderer(&ctx), Ok(selection));
            }
            Err(NegotiationError::MethodNotAllowed { .. }) => {
                prop_assert_eq!(best, 0);
                prop_assert!(!negotiator.renderers().iter().any(|r| r.handles(method, &uri.target)));
            }
            Err(NegotiationError::UnsupportedMediaType { .. }) => {
                prop_assert_eq!(best, 0);
                prop_assert!(negotiator.renderers().iter().any(|r| r.handles(method, &uri.target)));
            }
        }
    }
}
