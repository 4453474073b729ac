//! The backend seam.
//!
//! The service calls exactly one of these methods per request, always with a
//! URI that has been fully validated against the model. Errors are final:
//! the service never retries and reports the processor's status verbatim.

use odata_uri::ODataUri;

use crate::error::ProcessorError;
use crate::result::QueryResult;
use crate::value::{ODataValue, StructuredValue};

/// A decoded action or function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: ODataValue,
}

pub trait QueryProcessor: Send + Sync {
    /// Read the resource the URI addresses, honouring its query options.
    fn query(&self, uri: &ODataUri) -> Result<QueryResult, ProcessorError>;

    /// Insert `entity` into the collection the URI addresses and return the
    /// stored entity.
    fn create(&self, uri: &ODataUri, entity: StructuredValue) -> Result<QueryResult, ProcessorError> {
        let _ = entity;
        Err(ProcessorError::not_implemented(format!(
            "create is not supported on {}",
            uri.canonical_path()
        )))
    }

    /// Replace (`partial == false`) or merge into the addressed entity.
    fn update(
        &self,
        uri: &ODataUri,
        entity: StructuredValue,
        partial: bool,
    ) -> Result<(), ProcessorError> {
        let _ = (entity, partial);
        Err(ProcessorError::not_implemented(format!(
            "update is not supported on {}",
            uri.canonical_path()
        )))
    }

    fn delete(&self, uri: &ODataUri) -> Result<(), ProcessorError> {
        Err(ProcessorError::not_implemented(format!(
            "delete is not supported on {}",
            uri.canonical_path()
        )))
    }

    /// Invoke the action the URI addresses. Function calls go through
    /// [`QueryProcessor::query`], their parameters are part of the path.
    fn invoke_operation(
        &self,
        uri: &ODataUri,
        parameters: Vec<Parameter>,
    ) -> Result<QueryResult, ProcessorError> {
        let _ = parameters;
        Err(ProcessorError::not_implemented(format!(
            "{} is not implemented",
            uri.canonical_path()
        )))
    }
}

impl<P: QueryProcessor + ?Sized> QueryProcessor for std::sync::Arc<P> {
    fn query(&self, uri: &ODataUri) -> Result<QueryResult, ProcessorError> {
        (**self).query(uri)
    }

    fn create(&self, uri: &ODataUri, entity: StructuredValue) -> Result<QueryResult, ProcessorError> {
        (**self).create(uri, entity)
    }

    fn update(
        &self,
        uri: &ODataUri,
        entity: StructuredValue,
        partial: bool,
    ) -> Result<(), ProcessorError> {
        (**self).update(uri, entity, partial)
    }

    fn delete(&self, uri: &ODataUri) -> Result<(), ProcessorError> {
        (**self).delete(uri)
    }

    fn invoke_operation(
        &self,
        uri: &ODataUri,
        parameters: Vec<Parameter>,
    ) -> Result<QueryResult, ProcessorError> {
        (**self).invoke_operation(uri, parameters)
    }
}
