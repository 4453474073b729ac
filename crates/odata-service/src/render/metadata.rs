//! CSDL (`$metadata`) document.

use odata_edm::{EntityDataModel, OperationDescriptor, OperationKind, TypeDescriptor, TypeKind};

use crate::error::RenderError;
use crate::xml::{XmlWriter, EDMX_NS, EDM_NS};

pub const CONTAINER_NAME: &str = "DefaultContainer";

fn nullable_attr(nullable: bool) -> Option<(&'static str, &'static str)> {
    (!nullable).then_some(("Nullable", "false"))
}

fn write_structured_type(
    w: &mut XmlWriter,
    ty: &TypeDescriptor,
) -> Result<(), RenderError> {
    let element = if ty.kind == TypeKind::Entity { "EntityType" } else { "ComplexType" };
    let mut attrs = vec![("Name", ty.name.as_str())];
    if let Some(base) = &ty.base_type {
        attrs.push(("BaseType", base.as_str()));
    }
    if ty.is_abstract {
        attrs.push(("Abstract", "true"));
    }
    w.start(element, &attrs)?;

    if !ty.key.is_empty() {
        w.start("Key", &[])?;
        for key in &ty.key {
            w.empty("PropertyRef", &[("Name", key.as_str())])?;
        }
        w.end("Key")?;
    }
    for property in &ty.properties {
        let type_name = property.type_ref.to_string();
        let mut attrs = vec![("Name", property.name.as_str()), ("Type", type_name.as_str())];
        attrs.extend(nullable_attr(property.nullable));
        w.empty("Property", &attrs)?;
    }
    for nav in &ty.navigation_properties {
        let type_name = nav.target.to_string();
        let mut attrs = vec![("Name", nav.name.as_str()), ("Type", type_name.as_str())];
        if !nav.target.collection {
            attrs.extend(nullable_attr(nav.nullable));
        }
        if let Some(partner) = &nav.partner {
            attrs.push(("Partner", partner.as_str()));
        }
        w.empty("NavigationProperty", &attrs)?;
    }
    w.end(element)
}

fn write_operation(w: &mut XmlWriter, op: &OperationDescriptor) -> Result<(), RenderError> {
    let element = match op.kind {
        OperationKind::Action => "Action",
        OperationKind::Function => "Function",
    };
    let mut attrs = vec![("Name", op.name.as_str())];
    if op.is_bound {
        attrs.push(("IsBound", "true"));
    }
    if let Some(path) = &op.entity_set_path {
        attrs.push(("EntitySetPath", path.as_str()));
    }
    w.start(element, &attrs)?;
    for parameter in &op.parameters {
        let type_name = parameter.type_ref.to_string();
        let mut attrs = vec![("Name", parameter.name.as_str()), ("Type", type_name.as_str())];
        attrs.extend(nullable_attr(parameter.nullable));
        w.empty("Parameter", &attrs)?;
    }
    if let Some(rt) = &op.return_type {
        let type_name = rt.to_string();
        w.empty("ReturnType", &[("Type", type_name.as_str())])?;
    }
    w.end(element)
}

fn write_container(w: &mut XmlWriter, model: &EntityDataModel) -> Result<(), RenderError> {
    w.start("EntityContainer", &[("Name", CONTAINER_NAME)])?;
    for set in model.entity_sets() {
        w.empty(
            "EntitySet",
            &[("Name", set.name.as_str()), ("EntityType", set.entity_type.as_str())],
        )?;
    }
    for import in model.operation_imports() {
        let Some((_, op)) = model.operation_import(&import.name) else {
            continue;
        };
        let (element, reference) = match op.kind {
            OperationKind::Action => ("ActionImport", "Action"),
            OperationKind::Function => ("FunctionImport", "Function"),
        };
        let mut attrs = vec![("Name", import.name.as_str()), (reference, import.operation.as_str())];
        if let Some(set) = &import.entity_set {
            attrs.push(("EntitySet", set.as_str()));
        }
        w.empty(element, &attrs)?;
    }
    w.end("EntityContainer")
}

/// The namespace that hosts the entity container: the one of the first
/// entity set's type, else the first declared namespace.
fn container_namespace(model: &EntityDataModel) -> Option<String> {
    model
        .entity_sets()
        .next()
        .and_then(|set| model.resolve(&set.entity_type))
        .map(|t| t.namespace.clone())
        .or_else(|| model.namespaces().first().map(|ns| ns.to_string()))
}

pub fn render_metadata(model: &EntityDataModel) -> Result<Vec<u8>, RenderError> {
    let container_ns = container_namespace(model);
    let mut w = XmlWriter::new();
    w.declaration()?;
    w.start("edmx:Edmx", &[("Version", "4.0"), ("xmlns:edmx", EDMX_NS)])?;
    w.start("edmx:DataServices", &[])?;

    for namespace in model.namespaces() {
        w.start("Schema", &[("Namespace", namespace), ("xmlns", EDM_NS)])?;
        for ty in model.types().filter(|t| t.namespace == namespace) {
            write_structured_type(&mut w, ty)?;
        }
        for op in model.operations().filter(|o| o.namespace == namespace) {
            write_operation(&mut w, op)?;
        }
        if container_ns.as_deref() == Some(namespace) {
            write_container(&mut w, model)?;
        }
        w.end("Schema")?;
    }

    w.end("edmx:DataServices")?;
    w.end("edmx:Edmx")?;
    Ok(w.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{parse_document, XmlNode};
    use odata_edm::demo_model;

    fn named<'a>(node: &'a XmlNode, element: &str, name: &str) -> Option<&'a XmlNode> {
        node.children
            .iter()
            .find(|c| c.name == element && c.attribute("Name") == Some(name))
    }

    #[test]
    fn csdl_describes_the_demo_model() {
        let model = demo_model().expect("demo model");
        let bytes = render_metadata(&model).expect("render");
        let root = parse_document(&String::from_utf8(bytes).expect("utf8")).expect("parse");

        assert_eq!(root.name, "Edmx");
        assert_eq!(root.attribute("Version"), Some("4.0"));
        let schema = root
            .child("DataServices")
            .and_then(|d| d.child("Schema"))
            .expect("schema");
        assert_eq!(schema.attribute("Namespace"), Some("ODataDemo"));

        let customer = named(schema, "EntityType", "Customer").expect("Customer");
        let key = customer.child("Key").and_then(|k| k.child("PropertyRef"));
        assert_eq!(key.and_then(|k| k.attribute("Name")), Some("id"));
        let phone = named(customer, "Property", "Phone").expect("Phone");
        assert_eq!(phone.attribute("Type"), Some("Collection(Edm.String)"));
        let orders = named(customer, "NavigationProperty", "Orders").expect("Orders");
        assert_eq!(orders.attribute("Type"), Some("Collection(ODataDemo.Order)"));
        assert_eq!(orders.attribute("Nullable"), None);

        assert!(named(schema, "ComplexType", "Address").is_some());

        let action = named(schema, "Action", "ODataDemoAction").expect("action");
        assert_eq!(action.attribute("IsBound"), Some("true"));
        assert_eq!(
            action.child("ReturnType").and_then(|r| r.attribute("Type")),
            Some("Edm.String")
        );

        let container = named(schema, "EntityContainer", CONTAINER_NAME).expect("container");
        assert!(named(container, "EntitySet", "Customers").is_some());
        let import = named(container, "FunctionImport", "GetTopCustomers").expect("function import");
        assert_eq!(import.attribute("EntitySet"), Some("Customers"));
        assert!(named(container, "ActionImport", "ODataDemoActionImport").is_some());
    }
}
