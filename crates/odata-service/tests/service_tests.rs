//! Request Pipeline E2E Tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use odata_edm::demo_model;
use odata_service::*;
use odata_uri::{ODataUri, PathSegment, Target};
use serde_json::Value;

// ============================================================================
// In-memory processor
// ============================================================================

#[derive(Default)]
struct Counters {
    queries: AtomicUsize,
    closes: AtomicUsize,
}

struct Store {
    customers: Mutex<Vec<StructuredValue>>,
    counters: Arc<Counters>,
    lazy: bool,
    fail_at: Option<usize>,
}

struct CountingSource {
    values: std::vec::IntoIter<ODataValue>,
    emitted: usize,
    fail_at: Option<usize>,
    counters: Arc<Counters>,
}

impl ResultSource for CountingSource {
    fn next_value(&mut self) -> Option<Result<ODataValue, ProcessorError>> {
        if Some(self.emitted) == self.fail_at {
            self.emitted += 1;
            return Some(Err(ProcessorError::internal("cursor lost")));
        }
        self.emitted += 1;
        self.values.next().map(Ok)
    }

    fn close(&mut self) -> Result<(), ProcessorError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn customer(id: i64, name: &str) -> StructuredValue {
    StructuredValue::new("ODataDemo.Customer")
        .with("id", id)
        .with("name", name)
        .with("Phone", ODataValue::Collection(vec!["555-0100".into(), "555-0199".into()]))
}

impl Store {
    fn new() -> Self {
        Self {
            customers: Mutex::new(vec![customer(1, "Ann"), customer(2, "Bo")]),
            counters: Arc::new(Counters::default()),
            lazy: false,
            fail_at: None,
        }
    }

    fn lazy(mut self, fail_at: Option<usize>) -> Self {
        self.lazy = true;
        self.fail_at = fail_at;
        self
    }

    fn key(uri: &ODataUri) -> Option<i64> {
        uri.key()
            .and_then(|k| k.first())
            .and_then(|kv| ODataValue::from_literal(&kv.value).as_i64())
    }

    fn find(&self, uri: &ODataUri) -> Option<StructuredValue> {
        let id = Self::key(uri)?;
        let customers = self.customers.lock().ok()?;
        customers
            .iter()
            .find(|c| c.get("id").and_then(ODataValue::as_i64) == Some(id))
            .cloned()
    }

    fn property_name(uri: &ODataUri) -> Option<String> {
        uri.segments.iter().rev().find_map(|s| match s {
            PathSegment::Property { name, .. } => Some(name.clone()),
            _ => None,
        })
    }
}

impl QueryProcessor for Store {
    fn query(&self, uri: &ODataUri) -> Result<QueryResult, ProcessorError> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        let all: Vec<ODataValue> = self
            .customers
            .lock()
            .map_err(|_| ProcessorError::internal("poisoned"))?
            .iter()
            .cloned()
            .map(ODataValue::from)
            .collect();
        match &uri.target {
            Target::EntityCollection { .. } if self.lazy => {
                let total = all.len() as u64;
                let source = CountingSource {
                    values: all.into_iter(),
                    emitted: 0,
                    fail_at: self.fail_at,
                    counters: Arc::clone(&self.counters),
                };
                Ok(QueryResult::Lazy(LazySequence::new(source).with_count(total)))
            }
            Target::EntityCollection { .. } => Ok(QueryResult::Collection {
                count: Some(all.len() as u64),
                values: all,
            }),
            Target::Count => Ok(QueryResult::Single(ODataValue::Int(all.len() as i64))),
            Target::Entity { .. } => Ok(self
                .find(uri)
                .map_or(QueryResult::Empty, |c| QueryResult::Single(c.into()))),
            Target::Property { .. } | Target::Value { .. } => {
                let name = Self::property_name(uri).unwrap_or_default();
                Ok(self
                    .find(uri)
                    .and_then(|c| c.get(&name).cloned())
                    .map_or(QueryResult::Empty, QueryResult::Single))
            }
            _ => Err(ProcessorError::not_implemented("unsupported target")),
        }
    }

    fn create(&self, _uri: &ODataUri, entity: StructuredValue) -> Result<QueryResult, ProcessorError> {
        let mut customers = self
            .customers
            .lock()
            .map_err(|_| ProcessorError::internal("poisoned"))?;
        let id = entity.get("id").and_then(ODataValue::as_i64);
        if customers.iter().any(|c| c.get("id").and_then(ODataValue::as_i64) == id) {
            return Err(ProcessorError::conflict("duplicate key"));
        }
        customers.push(entity.clone());
        Ok(QueryResult::Single(entity.into()))
    }

    fn update(&self, uri: &ODataUri, entity: StructuredValue, partial: bool) -> Result<(), ProcessorError> {
        let id = Self::key(uri).ok_or_else(|| ProcessorError::bad_request("no key"))?;
        let mut customers = self
            .customers
            .lock()
            .map_err(|_| ProcessorError::internal("poisoned"))?;
        let stored = customers
            .iter_mut()
            .find(|c| c.get("id").and_then(ODataValue::as_i64) == Some(id))
            .ok_or_else(|| ProcessorError::not_found("no such customer"))?;
        if partial {
            stored.merge(entity);
        } else {
            *stored = entity;
        }
        Ok(())
    }

    fn delete(&self, uri: &ODataUri) -> Result<(), ProcessorError> {
        let id = Self::key(uri).ok_or_else(|| ProcessorError::bad_request("no key"))?;
        let mut customers = self
            .customers
            .lock()
            .map_err(|_| ProcessorError::internal("poisoned"))?;
        customers.retain(|c| c.get("id").and_then(ODataValue::as_i64) != Some(id));
        Ok(())
    }

    fn invoke_operation(
        &self,
        uri: &ODataUri,
        parameters: Vec<Parameter>,
    ) -> Result<QueryResult, ProcessorError> {
        match &uri.target {
            Target::Action { operation, .. } if operation == "ODataDemo.ODataDemoActionImport" => {
                let count = parameters
                    .iter()
                    .find(|p| p.name == "count")
                    .and_then(|p| p.value.as_i64())
                    .unwrap_or_default();
                Ok(QueryResult::Single(ODataValue::Int(count * 2)))
            }
            Target::Action { .. } => {
                let note = parameters
                    .first()
                    .and_then(|p| p.value.as_str())
                    .unwrap_or("none")
                    .to_string();
                Ok(QueryResult::Single(ODataValue::String(format!("noted: {note}"))))
            }
            _ => Err(ProcessorError::bad_request("not an action")),
        }
    }
}

fn service_with(store: Store) -> (ODataService<Store>, Arc<Counters>) {
    let counters = Arc::clone(&store.counters);
    let model = Arc::new(demo_model().expect("demo model"));
    (ODataService::new(model, store), counters)
}

fn service() -> ODataService<Store> {
    service_with(Store::new()).0
}

fn send(service: &ODataService<Store>, request: ODataRequest) -> ODataResponse {
    service.handle(&request).buffered().expect("buffered body")
}

fn json_body(response: &ODataResponse) -> Value {
    serde_json::from_slice(response.body_bytes()).expect("json body")
}

fn text_body(response: &ODataResponse) -> String {
    String::from_utf8(response.body_bytes().to_vec()).expect("utf8 body")
}

// ============================================================================
// Reads
// ============================================================================

#[test]
fn test_collection_as_json() {
    let service = service();
    let response = send(&service, ODataRequest::get("/odata.svc/Customers?$count=true"));

    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.header("OData-Version"), Some("4.0"));
    let body = json_body(&response);
    assert_eq!(
        body["@odata.context"],
        "http://localhost:8080/odata.svc/$metadata#Customers"
    );
    assert_eq!(body["@odata.count"], 2);
    assert_eq!(body["value"][1]["name"], "Bo");
}

#[test]
fn test_entity_as_atom() {
    let service = service();
    let response = send(
        &service,
        ODataRequest::get("/odata.svc/Customers(1)").with_header("Accept", "application/atom+xml"),
    );
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("application/atom+xml"));
    let text = text_body(&response);
    assert!(text.contains("<entry"));
    assert!(text.contains("<id>http://localhost:8080/odata.svc/Customers(1)</id>"));
}

#[test]
fn test_format_option_overrides_accept() {
    let service = service();
    let response = send(
        &service,
        ODataRequest::get("/odata.svc/Customers?$format=atom").with_header("Accept", "application/json"),
    );
    assert_eq!(response.status, 200);
    assert!(text_body(&response).contains("<feed"));
}

#[test]
fn test_collection_property_and_raw_values() {
    let service = service();

    let phone = send(&service, ODataRequest::get("/odata.svc/Customers(1)/Phone"));
    assert_eq!(phone.status, 200);
    let body = json_body(&phone);
    assert_eq!(body["value"], serde_json::json!(["555-0100", "555-0199"]));
    assert_eq!(
        body["@odata.context"],
        "http://localhost:8080/odata.svc/$metadata#Customers(1)/Phone"
    );

    let raw = send(&service, ODataRequest::get("/odata.svc/Customers(1)/name/$value"));
    assert_eq!(raw.status, 200);
    assert_eq!(raw.header("Content-Type"), Some("text/plain"));
    assert_eq!(text_body(&raw), "Ann");

    let count = send(&service, ODataRequest::get("/odata.svc/Customers/$count"));
    assert_eq!(text_body(&count), "2");
}

#[test]
fn test_null_property_and_missing_entity() {
    let service = service();

    let null = send(&service, ODataRequest::get("/odata.svc/Customers(1)/dateOfBirth"));
    assert_eq!(null.status, 204);

    let missing = send(&service, ODataRequest::get("/odata.svc/Customers(42)"));
    assert_eq!(missing.status, 404);
    assert_eq!(json_body(&missing)["error"]["code"], "NotFound");
}

/// Answers every read with the same result.
struct Answer(fn() -> QueryResult);

impl QueryProcessor for Answer {
    fn query(&self, _uri: &ODataUri) -> Result<QueryResult, ProcessorError> {
        Ok((self.0)())
    }
}

fn answer(result: fn() -> QueryResult, target: &str) -> ODataResponse {
    let model = Arc::new(demo_model().expect("demo model"));
    ODataService::new(model, Answer(result))
        .handle(&ODataRequest::get(target))
        .buffered()
        .expect("buffered body")
}

#[test]
fn test_null_honours_declared_nullability() {
    let null = || QueryResult::Single(ODataValue::Null);

    let nullable = answer(null, "/odata.svc/Customers(1)/dateOfBirth");
    assert_eq!(nullable.status, 204);
    assert!(nullable.body_bytes().is_empty());

    let key = answer(null, "/odata.svc/Customers(1)/id");
    assert_eq!(key.status, 500);
    assert_eq!(json_body(&key)["error"]["code"], "RenderError");

    let phones = answer(null, "/odata.svc/Customers(1)/Phone");
    assert_eq!(phones.status, 500);
    assert_eq!(json_body(&phones)["error"]["code"], "RenderError");

    let shipped = answer(null, "/odata.svc/Orders(1)/shipped");
    assert_eq!(shipped.status, 500);
}

#[test]
fn test_absent_property_values() {
    let empty = || QueryResult::Empty;

    assert_eq!(answer(empty, "/odata.svc/Customers(1)/name").status, 204);
    assert_eq!(answer(empty, "/odata.svc/Customers(1)/id").status, 404);

    let phones = answer(empty, "/odata.svc/Customers(1)/Phone");
    assert_eq!(phones.status, 200);
    assert_eq!(json_body(&phones)["value"], serde_json::json!([]));
}

#[test]
fn test_service_document_and_metadata() {
    let service = service();

    let root = send(&service, ODataRequest::get("/odata.svc/"));
    assert_eq!(root.status, 200);
    assert!(json_body(&root)["value"]
        .as_array()
        .is_some_and(|v| v.iter().any(|e| e["name"] == "Orders")));

    let metadata = send(&service, ODataRequest::get("/odata.svc/$metadata"));
    assert_eq!(metadata.status, 200);
    assert_eq!(metadata.header("Content-Type"), Some("application/xml"));
    assert!(text_body(&metadata).contains(r#"<EntitySet Name="Customers""#));
}

#[test]
fn test_properties_and_service_document_as_xml() {
    let service = service();
    let xml = |target: &str| {
        send(&service, ODataRequest::get(target).with_header("Accept", "application/xml"))
    };

    let name = xml("/odata.svc/Customers(1)/name");
    assert_eq!(name.status, 200);
    assert_eq!(name.header("Content-Type"), Some("application/xml"));
    let text = text_body(&name);
    assert!(text.contains(r#"m:context="http://localhost:8080/odata.svc/$metadata#Customers(1)/name""#));
    assert!(text.ends_with(">Ann</m:value>"));

    let phones = xml("/odata.svc/Customers(1)/Phone");
    assert_eq!(phones.status, 200);
    let text = text_body(&phones);
    assert!(text.contains(r##"m:type="#Collection(String)""##));
    assert_eq!(text.matches("<m:element>").count(), 2);

    let root = xml("/odata.svc/");
    assert_eq!(root.status, 200);
    assert!(text_body(&root).contains(r#"<collection href="Orders">"#));

    // Entities stay with the Atom renderer.
    let entity = xml("/odata.svc/Customers(1)");
    assert_eq!(entity.status, 200);
    assert!(text_body(&entity).contains("<entry"));
}

#[test]
fn test_zero_quality_excludes_json() {
    let service = service();
    let response = send(
        &service,
        ODataRequest::get("/odata.svc/Customers").with_header("Accept", "application/json;q=0, */*"),
    );
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("application/atom+xml"));
    assert!(text_body(&response).contains("<feed"));
}

// ============================================================================
// Writes and actions
// ============================================================================

#[test]
fn test_create_update_delete() {
    let service = service();

    let created = send(
        &service,
        ODataRequest::new(Method::Post, "/odata.svc/Customers")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"id": 3, "name": "Cy"}"#),
    );
    assert_eq!(created.status, 201);
    assert_eq!(
        created.header("Location"),
        Some("http://localhost:8080/odata.svc/Customers(3)")
    );
    let body = json_body(&created);
    assert_eq!(
        body["@odata.context"],
        "http://localhost:8080/odata.svc/$metadata#Customers/$entity"
    );
    assert_eq!(body["name"], "Cy");

    let duplicate = send(
        &service,
        ODataRequest::new(Method::Post, "/odata.svc/Customers")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"id": 3}"#),
    );
    assert_eq!(duplicate.status, 409);

    let patched = send(
        &service,
        ODataRequest::new(Method::Patch, "/odata.svc/Customers(3)")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"name": "Cyd"}"#),
    );
    assert_eq!(patched.status, 204);
    let read = send(&service, ODataRequest::get("/odata.svc/Customers(3)"));
    assert_eq!(json_body(&read)["name"], "Cyd");

    let deleted = send(&service, ODataRequest::new(Method::Delete, "/odata.svc/Customers(3)"));
    assert_eq!(deleted.status, 204);
    let gone = send(&service, ODataRequest::get("/odata.svc/Customers(3)"));
    assert_eq!(gone.status, 404);
}

#[test]
fn test_bad_bodies_are_client_errors() {
    let service = service();
    let unknown = send(
        &service,
        ODataRequest::new(Method::Post, "/odata.svc/Customers")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"id": 4, "nickname": "D"}"#),
    );
    assert_eq!(unknown.status, 400);
    assert_eq!(json_body(&unknown)["error"]["code"], "UnmarshalError");
}

#[test]
fn test_actions() {
    let service = service();

    let json = send(
        &service,
        ODataRequest::new(Method::Post, "/odata.svc/ODataDemoActionImport")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"count": 21}"#),
    );
    assert_eq!(json.status, 200);
    assert_eq!(json_body(&json)["value"], 42);

    let xml = send(
        &service,
        ODataRequest::new(Method::Post, "/odata.svc/Customers(1)/ODataDemo.ODataDemoAction")
            .with_header("Content-Type", "application/xml")
            .with_body(
                r#"<m:parameters xmlns:m="http://docs.oasis-open.org/odata/ns/metadata" xmlns:d="http://docs.oasis-open.org/odata/ns/data"><d:note>hi</d:note></m:parameters>"#,
            ),
    );
    assert_eq!(xml.status, 200);
    assert_eq!(json_body(&xml)["value"], "noted: hi");

    let xml_result = send(
        &service,
        ODataRequest::new(Method::Post, "/odata.svc/ODataDemoActionImport")
            .with_header("Content-Type", "application/json")
            .with_header("Accept", "application/xml")
            .with_body(r#"{"count": 21}"#),
    );
    assert_eq!(xml_result.status, 200);
    assert!(text_body(&xml_result).ends_with(r#" m:type="Int32">42</m:value>"#));

    let missing = send(
        &service,
        ODataRequest::new(Method::Post, "/odata.svc/ODataDemoActionImport")
            .with_header("Content-Type", "application/json"),
    );
    assert_eq!(missing.status, 400);
}

// ============================================================================
// Negotiation failures
// ============================================================================

#[test]
fn test_negotiation_failures_skip_the_processor() {
    let (service, counters) = service_with(Store::new());

    let unacceptable = send(
        &service,
        ODataRequest::get("/odata.svc/Customers").with_header("Accept", "text/csv"),
    );
    assert_eq!(unacceptable.status, 415);

    let wrong_method = send(&service, ODataRequest::new(Method::Delete, "/odata.svc/Customers"));
    assert_eq!(wrong_method.status, 405);

    let unsupported_body = send(
        &service,
        ODataRequest::new(Method::Post, "/odata.svc/Customers")
            .with_header("Content-Type", "text/csv")
            .with_body("id,name"),
    );
    assert_eq!(unsupported_body.status, 415);

    assert_eq!(counters.queries.load(Ordering::SeqCst), 0);
}

#[test]
fn test_parse_errors_and_limits() {
    let model = Arc::new(demo_model().expect("demo model"));
    let service = ODataService::new(model, Store::new()).with_config(ServiceConfig {
        max_top: Some(10),
        ..ServiceConfig::default()
    });

    let too_many = send(&service, ODataRequest::get("/odata.svc/Customers?$top=11"));
    assert_eq!(too_many.status, 400);
    assert_eq!(json_body(&too_many)["error"]["code"], "ParseError");

    let unknown = send(&service, ODataRequest::get("/odata.svc/Suppliers"));
    assert_eq!(unknown.status, 400);
}

// ============================================================================
// Streaming
// ============================================================================

#[test]
fn test_lazy_results_stream_one_chunk_per_element() {
    let (service, counters) = service_with(Store::new().lazy(None));
    let response = service.handle(&ODataRequest::get("/odata.svc/Customers?$count=true"));
    assert_eq!(response.status, 200);
    assert!(response.is_stream());

    let ResponseBody::Stream(pending) = response.body else {
        panic!("expected a streamed body");
    };
    let mut sink = BufferSink::default();
    let report = pending.write_to(&mut sink).expect("stream");

    assert_eq!(sink.chunks, 3);
    assert_eq!((report.started, report.bodies, report.ended), (1, 1, 1));
    let headers = sink.headers.expect("headers on the first chunk");
    assert!(headers.iter().any(|(n, v)| n == "Content-Type" && v == "application/json"));
    let body: Value = serde_json::from_slice(&sink.body).expect("json");
    assert_eq!(body["@odata.count"], 2);
    assert_eq!(body["value"].as_array().map(Vec::len), Some(2));
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stream_failure_closes_the_source() {
    let (service, counters) = service_with(Store::new().lazy(Some(1)));
    let response = service.handle(&ODataRequest::get("/odata.svc/Customers"));
    let ResponseBody::Stream(pending) = response.body else {
        panic!("expected a streamed body");
    };
    let mut sink = BufferSink::default();
    let err = pending.write_to(&mut sink).expect_err("cursor fails");

    assert_eq!(err.status(), 500);
    assert_eq!(err.to_string(), "cursor lost");
    assert_eq!(sink.chunks, 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_finite_collections_can_be_streamed() {
    let model = Arc::new(demo_model().expect("demo model"));
    let service = ODataService::new(model, Store::new()).with_config(ServiceConfig {
        stream_collections: true,
        ..ServiceConfig::default()
    });
    let response = service.handle(&ODataRequest::get("/odata.svc/Customers"));
    assert!(response.is_stream());
    let response = response.buffered().expect("buffered");
    assert_eq!(json_body(&response)["value"][0]["id"], 1);
}
