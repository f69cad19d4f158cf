use chrono::NaiveDate;
use sqlweave::prelude::*;
use sqlweave::{ResultShape, ShardGranularity, ShardingDescriptor, ShardingResolver};

fn day(y: i32, m: u32, d: u32) -> Value {
    Value::from(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn registry() -> EntityMapRegistry {
    EntityMapRegistry::new()
        .with(
            EntityMap::new("Event", "events")
                .column(ColumnMap::new("Id", SqlType::BigInt).key())
                .column(ColumnMap::new("Kind", SqlType::Integer))
                .column(ColumnMap::new("CreatedAt", SqlType::Timestamp))
                .sharding(ShardingDescriptor::by_date("CreatedAt", ShardGranularity::Month)),
        )
        .unwrap()
        .with(
            EntityMap::new("Ticket", "tickets")
                .column(ColumnMap::new("Id", SqlType::BigInt).key().identity())
                .column(ColumnMap::new("State", SqlType::Integer))
                .column(ColumnMap::new("Owner", SqlType::VarChar(30))),
        )
        .unwrap()
}

#[derive(Debug, Clone)]
struct Event {
    id: i64,
    kind: i32,
    created_at: Value,
}

impl Entity for Event {
    const ENTITY: &'static str = "Event";

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("Id", Value::from(self.id)),
            ("Kind", Value::from(self.kind)),
            ("CreatedAt", self.created_at.clone()),
        ]
    }
}

#[test]
fn two_month_range_reads_as_union() {
    let compiler = SqlCompiler::new(Dialect::Postgres, registry());
    let (sql, params) = compiler
        .from_entity("Event")
        .use_shard(ShardKey::range(day(2024, 3, 10), day(2024, 4, 2)))
        .where_(|t| t[0].field("Kind").eq(2))
        .select(|t| t[0].field("Id"))
        .build_sql()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT a.\"Id\" FROM (SELECT * FROM \"events_202403\" UNION ALL SELECT * FROM \"events_202404\") a WHERE a.\"Kind\" = @Kind"
    );
    assert_eq!(params.len(), 1);

    let map = compiler.entity("Event").unwrap();
    let tables = ShardingResolver::new(map)
        .unwrap()
        .resolve(&ShardKey::range(day(2024, 3, 10), day(2024, 4, 2)))
        .unwrap();
    assert_eq!(tables, vec!["events_202403", "events_202404"]);
}

#[test]
fn two_month_range_is_ambiguous_on_write() {
    let compiler = SqlCompiler::new(Dialect::Postgres, registry());
    let range = ShardKey::range(day(2024, 3, 10), day(2024, 4, 2));

    let err = compiler
        .update_entity("Event")
        .use_shard(range.clone())
        .set("Kind", 0)
        .all_rows()
        .build_sql()
        .unwrap_err();
    assert!(err.is_ambiguous_shard(), "{err}");

    let err = compiler
        .delete_entity("Event")
        .use_shard(range)
        .all_rows()
        .build_sql()
        .unwrap_err();
    assert!(err.is_ambiguous_shard(), "{err}");

    let spanning = [
        Event {
            id: 1,
            kind: 1,
            created_at: day(2024, 3, 31),
        },
        Event {
            id: 2,
            kind: 1,
            created_at: day(2024, 4, 1),
        },
    ];
    let err = compiler.create::<Event>().with_bulk(&spanning).build_sql().unwrap_err();
    assert!(err.is_ambiguous_shard(), "{err}");
}

#[test]
fn single_month_write_targets_one_table() {
    let compiler = SqlCompiler::new(Dialect::Mysql, registry());
    let event = Event {
        id: 5,
        kind: 3,
        created_at: day(2024, 3, 15),
    };
    let (sql, params) = compiler.create::<Event>().with_by(&event).build_sql().unwrap();
    assert_eq!(
        sql,
        "INSERT INTO `events_202403` (`Id`, `Kind`, `CreatedAt`) VALUES (@Id, @Kind, @CreatedAt)"
    );
    assert_eq!(params.len(), 3);

    let (sql, _) = compiler
        .delete_entity("Event")
        .use_shard(ShardKey::value(day(2024, 3, 15)))
        .where_key(5_i64)
        .build_sql()
        .unwrap();
    assert_eq!(sql, "DELETE FROM `events_202403` WHERE `Id` = @Id");
}

#[test]
fn batch_parameters_never_collide() {
    let compiler = SqlCompiler::new(Dialect::SqlServer, registry());
    let batch = compiler
        .batch()
        .list(
            compiler
                .from_entity("Ticket")
                .where_(|t| t[0].field("State").eq(1))
                .select(|t| t[0].field("Id")),
        )
        .scalar(
            compiler
                .from_entity("Ticket")
                .where_(|t| t[0].field("State").eq(2))
                .select_count(),
        )
        .execute(
            compiler
                .update_entity("Ticket")
                .set("Owner", "ops")
                .where_(|t| t[0].field("State").eq(3)),
        )
        .build()
        .unwrap();

    assert_eq!(
        batch.shapes,
        vec![ResultShape::List, ResultShape::Scalar, ResultShape::AffectedRows]
    );
    let names: Vec<&str> = batch.parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["@State_m0", "@State_m1", "@Owner_m2", "@State_m2"]);
    assert_eq!(
        batch.commands[0].sql,
        "SELECT a.[Id] FROM [tickets] a WHERE a.[State] = @State_m0"
    );
    assert_eq!(
        batch.commands[2].sql,
        "UPDATE [tickets] SET [Owner] = @Owner_m2 WHERE [State] = @State_m2"
    );
    assert_eq!(batch.sql.matches(";\n").count(), 2);
}

#[test]
fn batch_rejects_other_dialects() {
    let pg = SqlCompiler::new(Dialect::Postgres, registry());
    let lite = SqlCompiler::new(Dialect::Sqlite, registry());
    let err = pg
        .batch()
        .list(pg.from_entity("Ticket"))
        .execute(lite.delete_entity("Ticket").where_key(1_i64))
        .build()
        .unwrap_err();
    assert!(err.is_dialect_mismatch(), "{err}");
    assert!(pg.batch().build().unwrap_err().is_empty_statement());
}

#[test]
fn batch_output_serializes() {
    let compiler = SqlCompiler::new(Dialect::Sqlite, registry());
    let batch = compiler
        .batch()
        .first(compiler.from_entity("Ticket").where_(|t| t[0].field("Id").eq(1_i64)))
        .build()
        .unwrap();
    let json = serde_json::to_value(&batch).unwrap();
    assert_eq!(json["shapes"][0], "First");
    assert_eq!(json["parameters"][0]["name"], ":Id_m0");
}
