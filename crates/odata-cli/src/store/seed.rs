//! Sample data for the `ODataDemo` model.

use chrono::{DateTime, NaiveDate};
use odata_edm::DEMO_NAMESPACE;
use odata_service::{ODataValue, ProcessorError, StructuredValue};

use super::MemoryStore;

fn address(street: &str, number: &str, postal: &str, city: &str, country: &str) -> ODataValue {
    StructuredValue::new(format!("{DEMO_NAMESPACE}.Address"))
        .with("Street", street)
        .with("houseNumber", number)
        .with("postalCode", postal)
        .with("city", city)
        .with("country", country)
        .into()
}

fn customer(id: i64, name: &str, born: Option<(i32, u32, u32)>, phones: &[&str]) -> StructuredValue {
    StructuredValue::new(format!("{DEMO_NAMESPACE}.Customer"))
        .with("id", id)
        .with("name", name)
        .with(
            "dateOfBirth",
            born.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
                .map_or(ODataValue::Null, ODataValue::Date),
        )
        .with(
            "Phone",
            ODataValue::Collection(phones.iter().map(|p| ODataValue::from(*p)).collect()),
        )
}

fn order(id: i64, amount: &str, placed_at: &str, shipped: bool) -> StructuredValue {
    StructuredValue::new(format!("{DEMO_NAMESPACE}.Order"))
        .with("id", id)
        .with("amount", ODataValue::Decimal(amount.to_string()))
        .with(
            "placedAt",
            DateTime::parse_from_rfc3339(placed_at).map_or(ODataValue::Null, ODataValue::DateTimeOffset),
        )
        .with("shipped", shipped)
}

/// Fill the store with three customers and four orders. Models without the
/// demo entity sets are left untouched.
pub fn seed_demo(store: &MemoryStore) -> Result<(), ProcessorError> {
    let model = store.model();
    let is_demo = ["Customers", "Orders"].iter().all(|set| {
        model
            .entity_set_descriptor(set)
            .is_some_and(|s| s.entity_type.starts_with(DEMO_NAMESPACE))
    });
    if !is_demo {
        return Ok(());
    }

    let ann = store.insert(
        "Customers",
        customer(1, "Ann", Some((1984, 3, 2)), &["555-0100", "555-0101"])
            .with(
                "address",
                ODataValue::Collection(vec![address("Main St", "12", "0150", "Oslo", "NO")]),
            ),
    )?;
    let bo = store.insert("Customers", customer(2, "Bo", None, &["555-0200"]))?;
    store.insert("Customers", customer(3, "Cy", Some((1990, 11, 23)), &[]))?;

    let orders = [
        (order(1, "12.50", "2024-01-05T09:30:00Z", true), &ann),
        (order(2, "99.95", "2024-02-11T14:00:00+01:00", false), &ann),
        (order(3, "7.25", "2024-02-12T08:15:00Z", false), &bo),
        (order(4, "150.00", "2024-03-01T17:45:00Z", false), &bo),
    ];
    for (order, owner) in orders {
        let order = store.insert("Orders", order)?;
        store.link("Customers", owner, "Orders", "Orders", &order)?;
    }
    tracing::info!(
        customers = store.entity_count("Customers"),
        orders = store.entity_count("Orders"),
        "seeded demo data"
    );
    Ok(())
}
