//! The `ODataDemo` model used by the CLI, the tests and the documentation.

use crate::descriptor::{
    NavigationPropertyDescriptor, OperationDescriptor, OperationImportDescriptor,
    ParameterDescriptor, PropertyDescriptor, TypeDescriptor, TypeRef,
};
use crate::model::{EntityDataModel, EntityDataModelBuilder, ModelError};
use crate::primitive::PrimitiveType;

pub const DEMO_NAMESPACE: &str = "ODataDemo";

pub fn demo_builder() -> EntityDataModelBuilder {
    let address = TypeDescriptor::complex(DEMO_NAMESPACE, "Address")
        .property(PropertyDescriptor::primitive("Street", PrimitiveType::String))
        .property(PropertyDescriptor::primitive("houseNumber", PrimitiveType::String))
        .property(PropertyDescriptor::primitive("postalCode", PrimitiveType::String))
        .property(PropertyDescriptor::primitive("city", PrimitiveType::String))
        .property(PropertyDescriptor::primitive("country", PrimitiveType::String));

    let customer = TypeDescriptor::entity(DEMO_NAMESPACE, "Customer")
        .key(&["id"])
        .property(PropertyDescriptor::primitive("id", PrimitiveType::Int64).not_null())
        .property(PropertyDescriptor::primitive("name", PrimitiveType::String))
        .property(PropertyDescriptor::primitive("dateOfBirth", PrimitiveType::Date))
        .property(PropertyDescriptor::new(
            "Phone",
            TypeRef::collection(PrimitiveType::String.fully_qualified_name()),
        ))
        .property(PropertyDescriptor::new(
            "address",
            TypeRef::collection("ODataDemo.Address"),
        ))
        .navigation(
            NavigationPropertyDescriptor::new("Orders", TypeRef::collection("ODataDemo.Order"))
                .with_partner("Customer"),
        );

    let order = TypeDescriptor::entity(DEMO_NAMESPACE, "Order")
        .key(&["id"])
        .property(PropertyDescriptor::primitive("id", PrimitiveType::Int64).not_null())
        .property(PropertyDescriptor::primitive("amount", PrimitiveType::Decimal))
        .property(PropertyDescriptor::primitive("placedAt", PrimitiveType::DateTimeOffset))
        .property(PropertyDescriptor::primitive("shipped", PrimitiveType::Boolean).not_null())
        .navigation(
            NavigationPropertyDescriptor::new("Customer", TypeRef::single("ODataDemo.Customer"))
                .with_partner("Orders"),
        );

    let action = OperationDescriptor::action(DEMO_NAMESPACE, "ODataDemoAction")
        .bound_to("customer", TypeRef::single("ODataDemo.Customer"))
        .parameter(ParameterDescriptor::new(
            "note",
            TypeRef::primitive(PrimitiveType::String),
        ))
        .returns(TypeRef::primitive(PrimitiveType::String));

    let action_unbound = OperationDescriptor::action(DEMO_NAMESPACE, "ODataDemoActionImport")
        .parameter(
            ParameterDescriptor::new("count", TypeRef::primitive(PrimitiveType::Int32)).not_null(),
        )
        .returns(TypeRef::primitive(PrimitiveType::Int32));

    let top_customers = OperationDescriptor::function(DEMO_NAMESPACE, "GetTopCustomers")
        .parameter(
            ParameterDescriptor::new("n", TypeRef::primitive(PrimitiveType::Int32)).not_null(),
        )
        .returns(TypeRef::collection("ODataDemo.Customer"))
        .entity_set_path("Customers");

    EntityDataModel::builder()
        .add_types([address, customer, order])
        .add_entity_set("Customers", "ODataDemo.Customer")
        .add_entity_set("Orders", "ODataDemo.Order")
        .add_operation(action)
        .add_operation(action_unbound)
        .add_operation(top_customers)
        .add_operation_import(OperationImportDescriptor::new(
            "ODataDemoActionImport",
            "ODataDemo.ODataDemoActionImport",
        ))
        .add_operation_import(
            OperationImportDescriptor::new("GetTopCustomers", "ODataDemo.GetTopCustomers")
                .with_entity_set("Customers"),
        )
}

pub fn demo_model() -> Result<EntityDataModel, ModelError> {
    demo_builder().build()
}
