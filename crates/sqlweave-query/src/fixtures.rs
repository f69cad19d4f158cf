//! Entity maps shared by the builder tests.

use chrono::NaiveDate;
use sqlweave_core::{
    ColumnMap, Entity, EntityMap, EntityMapRegistry, ShardGranularity, ShardingDescriptor,
    SqlType, Value,
};

use crate::compiler::SqlCompiler;
use crate::dialect::Dialect;

pub(crate) fn order_map() -> EntityMap {
    EntityMap::new("Order", "orders")
        .column(ColumnMap::new("Id", SqlType::BigInt).key().identity())
        .column(ColumnMap::new("CustomerId", SqlType::BigInt))
        .column(ColumnMap::new("Status", SqlType::Integer))
        .column(ColumnMap::new("Name", SqlType::VarChar(50)))
        .column(ColumnMap::new("IsPaid", SqlType::Boolean).column("is_paid"))
        .column(ColumnMap::new("Total", SqlType::Double))
}

pub(crate) fn registry() -> EntityMapRegistry {
    let maps = vec![
        order_map(),
        EntityMap::new("Customer", "customers")
            .column(ColumnMap::new("Id", SqlType::BigInt).key().identity())
            .column(ColumnMap::new("Name", SqlType::VarChar(100)))
            .column(ColumnMap::new("Region", SqlType::VarChar(20)).nullable()),
        EntityMap::new("OrderLine", "order_lines")
            .column(ColumnMap::new("OrderId", SqlType::BigInt).key())
            .column(ColumnMap::new("LineNo", SqlType::Integer).key())
            .column(ColumnMap::new("Qty", SqlType::Integer))
            .column(ColumnMap::new("Price", SqlType::Double)),
        EntityMap::new("Category", "categories")
            .column(ColumnMap::new("Id", SqlType::Integer).key().identity())
            .column(ColumnMap::new("ParentId", SqlType::Integer).nullable())
            .column(ColumnMap::new("Name", SqlType::VarChar(50))),
        EntityMap::new("Log", "log")
            .column(ColumnMap::new("Id", SqlType::BigInt).key())
            .column(ColumnMap::new("Message", SqlType::Text))
            .column(ColumnMap::new("CreatedAt", SqlType::Timestamp))
            .sharding(ShardingDescriptor::by_date("CreatedAt", ShardGranularity::Month)),
    ];
    EntityMapRegistry::from_maps(maps).unwrap()
}

pub(crate) fn compiler(dialect: Dialect) -> SqlCompiler {
    SqlCompiler::new(dialect, registry())
}

pub(crate) fn date(y: i32, m: u32, d: u32) -> Value {
    Value::from(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

#[derive(Debug, Clone)]
pub(crate) struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub status: i32,
    pub name: String,
    pub is_paid: bool,
    pub total: f64,
}

impl Order {
    pub fn sample(id: i64) -> Self {
        Self {
            id,
            customer_id: 7,
            status: 1,
            name: format!("order-{id}"),
            is_paid: false,
            total: 9.5,
        }
    }
}

impl Entity for Order {
    const ENTITY: &'static str = "Order";

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("Id", Value::from(self.id)),
            ("CustomerId", Value::from(self.customer_id)),
            ("Status", Value::from(self.status)),
            ("Name", Value::from(self.name.as_str())),
            ("IsPaid", Value::from(self.is_paid)),
            ("Total", Value::from(self.total)),
        ]
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LogEntry {
    pub id: i64,
    pub message: String,
    pub created_at: Value,
}

impl Entity for LogEntry {
    const ENTITY: &'static str = "Log";

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("Id", Value::from(self.id)),
            ("Message", Value::from(self.message.as_str())),
            ("CreatedAt", self.created_at.clone()),
        ]
    }
}
