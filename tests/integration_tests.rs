//! Integration tests for the complete request pipeline
//!
//! These tests drive a model loaded from a JSON document through every
//! stage, across crates:
//! - model document → registry → URI parser
//! - negotiation → unmarshalling → query processor
//! - rendering and chunked streaming of lazy results
//!
//! Run with: cargo test --test integration_tests

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use odata_edm::{EntityDataModel, EntityDataModelBuilder, ModelDocument};
use odata_service::*;
use odata_uri::{BinaryOp, ExprNode, ODataUri, Target};
use serde_json::{json, Value};

// ============================================================================
// A small catalog backend
// ============================================================================

const MODEL: &str = r#"{
  "types": [
    {
      "kind": "entity",
      "namespace": "Shop",
      "name": "Product",
      "key": ["sku"],
      "properties": [
        { "name": "sku", "type": "Edm.String", "nullable": false },
        { "name": "name", "type": "Edm.String" },
        { "name": "price", "type": "Edm.Decimal" },
        { "name": "released", "type": "Edm.Date" },
        { "name": "tags", "type": "Collection(Edm.String)" }
      ]
    }
  ],
  "entity_sets": [{ "name": "Products", "entity_type": "Shop.Product" }]
}"#;

fn model() -> Arc<EntityDataModel> {
    let document: ModelDocument = serde_json::from_str(MODEL).expect("model document");
    Arc::new(
        EntityDataModelBuilder::from_document(document)
            .build()
            .expect("valid model"),
    )
}

fn product(sku: &str, name: &str, price: &str, tags: &[&str]) -> StructuredValue {
    StructuredValue::new("Shop.Product")
        .with("sku", sku)
        .with("name", name)
        .with("price", ODataValue::Decimal(price.to_string()))
        .with(
            "released",
            ODataValue::parse_text(odata_edm::PrimitiveType::Date, "2023-05-01")
                .unwrap_or(ODataValue::Null),
        )
        .with(
            "tags",
            ODataValue::Collection(tags.iter().map(|t| ODataValue::from(*t)).collect()),
        )
}

struct Cursor {
    values: std::vec::IntoIter<ODataValue>,
    fail_after: Option<usize>,
    pulled: usize,
    closes: Arc<AtomicUsize>,
}

impl ResultSource for Cursor {
    fn next_value(&mut self) -> Option<Result<ODataValue, ProcessorError>> {
        if Some(self.pulled) == self.fail_after {
            return Some(Err(ProcessorError::new(503, "catalog shard offline")));
        }
        self.pulled += 1;
        self.values.next().map(Ok)
    }

    fn close(&mut self) -> Result<(), ProcessorError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Catalog {
    products: Mutex<Vec<StructuredValue>>,
    seen: Mutex<Vec<ODataUri>>,
    closes: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl Catalog {
    fn new() -> Self {
        Self {
            products: Mutex::new(vec![
                product("p1", "Tea & Co", "19.90", &["green", "loose"]),
                product("p2", "Kettle", "45.00", &[]),
                product("p3", "Cups", "8.50", &["set"]),
            ]),
            seen: Mutex::new(Vec::new()),
            closes: Arc::new(AtomicUsize::new(0)),
            fail_after: None,
        }
    }

    fn find(&self, uri: &ODataUri) -> Option<StructuredValue> {
        let sku = uri.key()?.first()?;
        let sku = ODataValue::from_literal(&sku.value);
        self.products
            .lock()
            .ok()?
            .iter()
            .find(|p| p.get("sku") == Some(&sku))
            .cloned()
    }
}

impl QueryProcessor for Catalog {
    fn query(&self, uri: &ODataUri) -> Result<QueryResult, ProcessorError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(uri.clone());
        }
        match &uri.target {
            Target::EntityCollection { .. } => {
                let values: Vec<ODataValue> = self
                    .products
                    .lock()
                    .map_err(|_| ProcessorError::internal("poisoned"))?
                    .iter()
                    .cloned()
                    .map(ODataValue::from)
                    .collect();
                let total = values.len() as u64;
                let cursor = Cursor {
                    values: values.into_iter(),
                    fail_after: self.fail_after,
                    pulled: 0,
                    closes: Arc::clone(&self.closes),
                };
                Ok(QueryResult::Lazy(LazySequence::new(cursor).with_count(total)))
            }
            Target::Entity { .. } => Ok(self
                .find(uri)
                .map_or(QueryResult::Empty, |p| QueryResult::Single(p.into()))),
            _ => Err(ProcessorError::not_implemented("catalog only serves products")),
        }
    }

    fn create(&self, _uri: &ODataUri, entity: StructuredValue) -> Result<QueryResult, ProcessorError> {
        let mut products = self
            .products
            .lock()
            .map_err(|_| ProcessorError::internal("poisoned"))?;
        if products.iter().any(|p| p.get("sku") == entity.get("sku")) {
            return Err(ProcessorError::conflict("sku taken"));
        }
        products.push(entity.clone());
        Ok(QueryResult::Single(entity.into()))
    }
}

fn service_for(catalog: Catalog) -> ODataService<Catalog> {
    ODataService::new(model(), catalog).with_config(ServiceConfig {
        service_root: "http://example.org/shop.svc".to_string(),
        ..ServiceConfig::default()
    })
}

/// Records every chunk as it arrives.
#[derive(Default)]
struct Recorder {
    chunks: Vec<RenderChunk>,
}

impl ChunkSink for Recorder {
    fn write_chunk(&mut self, chunk: RenderChunk) -> io::Result<()> {
        self.chunks.push(chunk);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn stream_into(response: ODataResponse, sink: &mut Recorder) -> Result<StreamReport, ODataError> {
    match response.body {
        ResponseBody::Stream(pending) => pending.write_to(sink),
        other => panic!("expected a streamed body, got {other:?}"),
    }
}

fn json_of(response: &ODataResponse) -> Value {
    serde_json::from_slice(response.body_bytes()).expect("json body")
}

// ============================================================================
// Reads
// ============================================================================

#[test]
fn test_model_document_drives_parsing_and_rendering() {
    let service = service_for(Catalog::new());
    let response = service
        .handle(&ODataRequest::get("/shop.svc/Products('p1')?$select=name,price"))
        .buffered()
        .expect("body");

    assert_eq!(response.status, 200);
    assert_eq!(
        json_of(&response),
        json!({
            "@odata.context": "http://example.org/shop.svc/$metadata#Products(name,price)/$entity",
            "name": "Tea & Co",
            "price": "19.90"
        })
    );
}

#[test]
fn test_query_options_reach_the_processor_typed() {
    let service = service_for(Catalog::new());
    let response = service
        .handle(&ODataRequest::get(
            "/shop.svc/Products?$filter=price%20gt%2010%20and%20startswith(name,'T')&$top=5&$count=true",
        ))
        .buffered()
        .expect("body");
    assert_eq!(response.status, 200);
    assert_eq!(json_of(&response)["@odata.count"], 3);

    let seen = service.processor().seen.lock().expect("seen");
    let uri = seen.last().expect("one query");
    assert_eq!(uri.options.top, Some(5));
    assert!(uri.options.count);
    match &uri.options.filter.as_ref().expect("filter").node {
        ExprNode::Binary { op, .. } => assert_eq!(*op, BinaryOp::And),
        other => panic!("expected a conjunction, got {other:?}"),
    }
}

#[test]
fn test_lazy_collection_streams_one_element_per_chunk() {
    let catalog = Catalog::new();
    let closes = Arc::clone(&catalog.closes);
    let service = service_for(catalog);

    let response = service.handle(&ODataRequest::get("/shop.svc/Products"));
    assert!(response.is_stream());
    let mut sink = Recorder::default();
    let report = stream_into(response, &mut sink).expect("stream");

    assert_eq!(report.started, 1);
    assert_eq!(report.bodies, 2);
    assert_eq!(report.ended, 1);
    assert_eq!(sink.chunks.len(), 4);
    assert!(sink.chunks[0].headers.is_some());
    assert!(sink.chunks[1..].iter().all(|c| c.headers.is_none()));
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let body: Vec<u8> = sink.chunks.iter().flat_map(|c| c.body.clone()).collect();
    let doc: Value = serde_json::from_slice(&body).expect("complete document");
    assert_eq!(doc["value"].as_array().map(Vec::len), Some(3));
    assert_eq!(doc["value"][0]["tags"], json!(["green", "loose"]));
}

#[test]
fn test_source_failure_mid_stream_surfaces_the_processor_error() {
    let mut catalog = Catalog::new();
    catalog.fail_after = Some(2);
    let closes = Arc::clone(&catalog.closes);
    let service = service_for(catalog);

    let response = service.handle(
        &ODataRequest::get("/shop.svc/Products").with_header("Accept", "application/atom+xml"),
    );
    let mut sink = Recorder::default();
    let err = stream_into(response, &mut sink).expect_err("source fails");

    assert_eq!(err.status(), 503);
    assert!(err.to_string().contains("catalog shard offline"));
    // Two elements made it out before the failure; no closing fragment.
    assert_eq!(sink.chunks.len(), 2);
    let body: Vec<u8> = sink.chunks.iter().flat_map(|c| c.body.clone()).collect();
    assert!(!String::from_utf8_lossy(&body).contains("</feed>"));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Formats across the read and write paths
// ============================================================================

#[test]
fn test_atom_entry_can_be_posted_back() {
    let service = service_for(Catalog::new());

    let entry = service
        .handle(&ODataRequest::get("/shop.svc/Products('p1')").with_header("Accept", "application/atom+xml"))
        .buffered()
        .expect("entry");
    assert_eq!(entry.status, 200);
    let text = String::from_utf8(entry.body_bytes().to_vec()).expect("utf-8");
    assert!(text.contains("Tea &amp; Co"), "{text}");

    let copy = text.replace(">p1<", ">p9<");
    let created = service
        .handle(
            &ODataRequest::new(Method::Post, "/shop.svc/Products")
                .with_header("Content-Type", "application/atom+xml")
                .with_header("Accept", "application/json")
                .with_body(copy),
        )
        .buffered()
        .expect("created");
    assert_eq!(created.status, 201, "{}", String::from_utf8_lossy(created.body_bytes()));
    assert_eq!(
        created.header("Location"),
        Some("http://example.org/shop.svc/Products('p9')")
    );

    let read = |sku: &str| {
        let response = service
            .handle(&ODataRequest::get(format!("/shop.svc/Products('{sku}')")))
            .buffered()
            .expect("read");
        let mut body = json_of(&response);
        if let Some(object) = body.as_object_mut() {
            object.remove("sku");
            object.remove("@odata.context");
        }
        body
    };
    assert_eq!(read("p9"), read("p1"));
}

#[test]
fn test_negotiation_failures_never_reach_the_processor() {
    let service = service_for(Catalog::new());

    let metadata_as_json = service.handle(
        &ODataRequest::get("/shop.svc/$metadata").with_header("Accept", "application/json"),
    );
    assert_eq!(metadata_as_json.status, 415);

    let put_collection = service.handle(
        &ODataRequest::new(Method::Put, "/shop.svc/Products")
            .with_header("Content-Type", "application/json")
            .with_body("{}"),
    );
    assert_eq!(put_collection.status, 405);

    let seen = service.processor().seen.lock().expect("seen");
    assert!(seen.is_empty());
}

#[test]
fn test_client_and_processor_errors_keep_their_status() {
    let service = service_for(Catalog::new());

    let bad_top = service.handle(&ODataRequest::get("/shop.svc/Products?$top=many"));
    assert_eq!(bad_top.status, 400);

    let conflict = service.handle(
        &ODataRequest::new(Method::Post, "/shop.svc/Products")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"sku": "p2", "name": "Another kettle"}"#),
    );
    assert_eq!(conflict.status, 409);
    assert_eq!(json_of(&conflict)["error"]["message"], "sku taken");

    let missing = service.handle(&ODataRequest::get("/shop.svc/Products('nope')"));
    assert_eq!(missing.status, 404);
}
