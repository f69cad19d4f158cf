//! Physical table resolution for sharded entities.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlweave_core::{
    EntityMap, Error, Result, ShardGranularity, ShardRule, ShardingDescriptor, Value,
    validate_identifier,
};

/// Upper bound on tables produced by one range key.
const MAX_RANGE_TABLES: usize = 1024;

/// Values selecting one or more physical tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShardKey {
    /// Exact dependency values in declaration order
    Values(Vec<Value>),
    /// Inclusive date range
    Range { begin: Value, end: Value },
    /// Discriminator plus inclusive date range
    DiscriminatedRange {
        discriminator: Value,
        begin: Value,
        end: Value,
    },
}

impl ShardKey {
    pub fn value(value: impl Into<Value>) -> Self {
        ShardKey::Values(vec![value.into()])
    }

    pub fn values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ShardKey::Values(values.into_iter().map(Into::into).collect())
    }

    pub fn range(begin: impl Into<Value>, end: impl Into<Value>) -> Self {
        ShardKey::Range {
            begin: begin.into(),
            end: end.into(),
        }
    }

    pub fn discriminated_range(
        discriminator: impl Into<Value>,
        begin: impl Into<Value>,
        end: impl Into<Value>,
    ) -> Self {
        ShardKey::DiscriminatedRange {
            discriminator: discriminator.into(),
            begin: begin.into(),
            end: end.into(),
        }
    }
}

/// Resolves shard keys to physical table names for one entity.
#[derive(Debug, Clone, Copy)]
pub struct ShardingResolver<'m> {
    map: &'m EntityMap,
    descriptor: &'m ShardingDescriptor,
}

impl<'m> ShardingResolver<'m> {
    pub fn new(map: &'m EntityMap) -> Result<Self> {
        let descriptor = map.sharding.as_ref().ok_or_else(|| {
            Error::config(format!("entity `{}` is not sharded", map.entity))
        })?;
        descriptor.check_arity(&map.entity)?;
        Ok(Self { map, descriptor })
    }

    /// All physical tables a key covers, in period order.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = %self.map.entity))]
    pub fn resolve(&self, key: &ShardKey) -> Result<Vec<String>> {
        let sep = &self.descriptor.separator;
        let table = &self.map.table;
        let names = match (&self.descriptor.rule, key) {
            (ShardRule::Suffix, ShardKey::Values(values)) => {
                self.expect_arity(values.len())?;
                let mut name = table.clone();
                for value in values {
                    name.push_str(sep);
                    name.push_str(&value.to_plain_text()?);
                }
                vec![name]
            }
            (ShardRule::Date { granularity }, ShardKey::Values(values)) => {
                let [value] = values.as_slice() else {
                    return Err(self.arity_error(values.len()));
                };
                let date = date_of(value)?;
                vec![format!("{table}{sep}{}", period(date, *granularity))]
            }
            (ShardRule::Date { granularity }, ShardKey::Range { begin, end }) => {
                periods(date_of(begin)?, date_of(end)?, *granularity)?
                    .into_iter()
                    .map(|p| format!("{table}{sep}{p}"))
                    .collect()
            }
            (ShardRule::DiscriminatedDate { granularity }, ShardKey::Values(values)) => {
                let [discriminator, date] = values.as_slice() else {
                    return Err(self.arity_error(values.len()));
                };
                let discriminator = discriminator.to_plain_text()?;
                let date = date_of(date)?;
                vec![format!(
                    "{table}{sep}{discriminator}{sep}{}",
                    period(date, *granularity)
                )]
            }
            (
                ShardRule::DiscriminatedDate { granularity },
                ShardKey::DiscriminatedRange {
                    discriminator,
                    begin,
                    end,
                },
            ) => {
                let discriminator = discriminator.to_plain_text()?;
                periods(date_of(begin)?, date_of(end)?, *granularity)?
                    .into_iter()
                    .map(|p| format!("{table}{sep}{discriminator}{sep}{p}"))
                    .collect()
            }
            (rule, key) => {
                return Err(Error::config(format!(
                    "shard key {key:?} does not fit rule {rule:?} of entity `{}`",
                    self.map.entity
                )));
            }
        };
        for name in &names {
            validate_identifier(name, "shard table name")?;
        }
        tracing::debug!(tables = ?names, "resolved shard tables");
        Ok(names)
    }

    /// The single table a write goes to.
    pub fn resolve_single(&self, key: &ShardKey) -> Result<String> {
        let mut names = self.resolve(key)?;
        match names.len() {
            1 => Ok(names.remove(0)),
            0 => Err(Error::ambiguous_shard(format!(
                "shard key for `{}` resolves to no table",
                self.map.entity
            ))),
            n => Err(Error::ambiguous_shard(format!(
                "shard key for `{}` resolves to {n} tables; writes need exactly one",
                self.map.entity
            ))),
        }
    }

    /// Exact key built from a row's dependency members.
    pub fn key_from_row(&self, row: &[(String, Value)]) -> Result<ShardKey> {
        let mut values = Vec::with_capacity(self.descriptor.dependencies.len());
        for dependency in &self.descriptor.dependencies {
            let value = row
                .iter()
                .find(|(member, _)| member == dependency)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| {
                    Error::ambiguous_shard(format!(
                        "row of `{}` has no value for shard dependency `{dependency}`",
                        self.map.entity
                    ))
                })?;
            values.push(value);
        }
        Ok(ShardKey::Values(values))
    }

    fn expect_arity(&self, given: usize) -> Result<()> {
        if given == self.descriptor.dependencies.len() {
            Ok(())
        } else {
            Err(self.arity_error(given))
        }
    }

    fn arity_error(&self, given: usize) -> Error {
        Error::config(format!(
            "entity `{}` shards on {} value(s), got {given}",
            self.map.entity,
            self.descriptor.dependencies.len()
        ))
    }
}

/// Physical table a write goes to.
///
/// Unsharded entities use their mapped table. Sharded ones use `key` when
/// given, else the key derived from each row; every row must land in the
/// same table.
pub(crate) fn write_table<'r>(
    map: &EntityMap,
    key: Option<&ShardKey>,
    rows: impl IntoIterator<Item = &'r [(String, Value)]>,
) -> Result<String> {
    if !map.is_sharded() {
        if key.is_some() {
            return Err(Error::config(format!("entity `{}` is not sharded", map.entity)));
        }
        return Ok(map.table.clone());
    }
    let resolver = ShardingResolver::new(map)?;
    if let Some(key) = key {
        return resolver.resolve_single(key);
    }
    let mut target: Option<String> = None;
    for row in rows {
        let table = resolver.resolve_single(&resolver.key_from_row(row)?)?;
        match &target {
            Some(first) if *first != table => {
                return Err(Error::ambiguous_shard(format!(
                    "rows of `{}` span tables `{first}` and `{table}`",
                    map.entity
                )));
            }
            Some(_) => {}
            None => target = Some(table),
        }
    }
    target.ok_or_else(|| {
        Error::ambiguous_shard(format!(
            "sharded entity `{}` needs a shard key (use_shard) or row values",
            map.entity
        ))
    })
}

fn date_of(value: &Value) -> Result<NaiveDate> {
    value.as_date().ok_or_else(|| {
        Error::config(format!(
            "shard date dependency must be a date, got {}",
            value.type_name()
        ))
    })
}

fn period(date: NaiveDate, granularity: ShardGranularity) -> String {
    date.format(granularity.suffix_format()).to_string()
}

/// Period suffixes from `begin` to `end`, both inclusive.
fn periods(begin: NaiveDate, end: NaiveDate, granularity: ShardGranularity) -> Result<Vec<String>> {
    let overflow = || Error::config("shard date range overflows the calendar");
    let mut current = match granularity {
        ShardGranularity::Year => NaiveDate::from_ymd_opt(begin.year(), 1, 1).ok_or_else(overflow)?,
        ShardGranularity::Month => begin.with_day(1).ok_or_else(overflow)?,
        ShardGranularity::Day => begin,
    };
    let mut out = Vec::new();
    while current <= end {
        if out.len() == MAX_RANGE_TABLES {
            return Err(Error::config(format!(
                "shard range covers more than {MAX_RANGE_TABLES} tables"
            )));
        }
        out.push(period(current, granularity));
        current = match granularity {
            ShardGranularity::Year => current.checked_add_months(Months::new(12)),
            ShardGranularity::Month => current.checked_add_months(Months::new(1)),
            ShardGranularity::Day => current.checked_add_days(Days::new(1)),
        }
        .ok_or_else(overflow)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlweave_core::{ColumnMap, SqlType};

    fn log_map(rule: ShardingDescriptor) -> EntityMap {
        EntityMap::new("Log", "log")
            .column(ColumnMap::new("Id", SqlType::BigInt).key())
            .column(ColumnMap::new("Tenant", SqlType::VarChar(20)))
            .column(ColumnMap::new("CreatedAt", SqlType::Timestamp))
            .sharding(rule)
    }

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::from(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn test_suffix_rule() {
        let map = log_map(ShardingDescriptor::suffix(["Tenant"]));
        let resolver = ShardingResolver::new(&map).unwrap();
        assert_eq!(
            resolver.resolve(&ShardKey::value("eu")).unwrap(),
            vec!["log_eu".to_string()]
        );
        assert!(resolver.resolve(&ShardKey::range(1, 2)).is_err());
        let err = resolver.resolve(&ShardKey::value("e-u")).unwrap_err();
        assert!(err.to_string().contains("e-u"), "{err}");
    }

    #[test]
    fn test_month_range_is_inclusive() {
        let map = log_map(ShardingDescriptor::by_date("CreatedAt", ShardGranularity::Month));
        let resolver = ShardingResolver::new(&map).unwrap();
        let tables = resolver
            .resolve(&ShardKey::range(date(2024, 1, 15), date(2024, 3, 1)))
            .unwrap();
        assert_eq!(tables, vec!["log_202401", "log_202402", "log_202403"]);
        assert!(
            resolver
                .resolve(&ShardKey::range(date(2024, 3, 1), date(2024, 1, 1)))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_year_and_day_granularity() {
        let map = log_map(ShardingDescriptor::by_date("CreatedAt", ShardGranularity::Year));
        let resolver = ShardingResolver::new(&map).unwrap();
        assert_eq!(
            resolver.resolve(&ShardKey::range(date(2023, 6, 1), date(2024, 2, 1))).unwrap(),
            vec!["log_2023", "log_2024"]
        );
        let map = log_map(ShardingDescriptor::by_date("CreatedAt", ShardGranularity::Day));
        let resolver = ShardingResolver::new(&map).unwrap();
        assert_eq!(
            resolver.resolve(&ShardKey::value(date(2024, 2, 29))).unwrap(),
            vec!["log_20240229"]
        );
    }

    #[test]
    fn test_discriminated_date() {
        let map = log_map(ShardingDescriptor::by_discriminated_date(
            "Tenant",
            "CreatedAt",
            ShardGranularity::Month,
        ));
        let resolver = ShardingResolver::new(&map).unwrap();
        assert_eq!(
            resolver
                .resolve(&ShardKey::values([Value::from("acme"), date(2024, 5, 2)]))
                .unwrap(),
            vec!["log_acme_202405"]
        );
        assert_eq!(
            resolver
                .resolve(&ShardKey::discriminated_range("acme", date(2024, 5, 2), date(2024, 6, 2)))
                .unwrap(),
            vec!["log_acme_202405", "log_acme_202406"]
        );
    }

    #[test]
    fn test_resolve_single_rejects_ranges() {
        let map = log_map(ShardingDescriptor::by_date("CreatedAt", ShardGranularity::Month));
        let resolver = ShardingResolver::new(&map).unwrap();
        let err = resolver
            .resolve_single(&ShardKey::range(date(2024, 1, 1), date(2024, 2, 1)))
            .unwrap_err();
        assert!(err.is_ambiguous_shard());
    }

    #[test]
    fn test_key_from_row() {
        let map = log_map(ShardingDescriptor::by_date("CreatedAt", ShardGranularity::Month));
        let resolver = ShardingResolver::new(&map).unwrap();
        let row = vec![("CreatedAt".to_string(), date(2024, 7, 4))];
        let key = resolver.key_from_row(&row).unwrap();
        assert_eq!(resolver.resolve_single(&key).unwrap(), "log_202407");
        assert!(resolver.key_from_row(&[]).unwrap_err().is_ambiguous_shard());
    }

    #[test]
    fn test_unsharded_entity() {
        let map = EntityMap::new("Plain", "plain").column(ColumnMap::new("Id", SqlType::Integer));
        assert!(ShardingResolver::new(&map).is_err());
    }

    #[test]
    fn test_descriptor_arity_checked_without_registry() {
        let descriptor = |dependencies: Vec<&str>, rule| ShardingDescriptor {
            dependencies: dependencies.into_iter().map(String::from).collect(),
            rule,
            separator: "_".to_string(),
        };
        let month = ShardGranularity::Month;
        for bad in [
            descriptor(vec![], ShardRule::Date { granularity: month }),
            descriptor(vec!["CreatedAt"], ShardRule::DiscriminatedDate { granularity: month }),
            descriptor(vec![], ShardRule::Suffix),
        ] {
            let map = log_map(bad);
            let err = ShardingResolver::new(&map).unwrap_err();
            assert!(err.to_string().contains("shard dependencies"), "{err}");
        }

        let map = log_map(ShardingDescriptor::by_date("CreatedAt", month));
        let err = ShardingResolver::new(&map)
            .unwrap()
            .resolve(&ShardKey::Values(vec![]))
            .unwrap_err();
        assert!(err.to_string().contains("got 0"), "{err}");
    }

    #[test]
    fn test_write_table_from_rows() {
        let map = log_map(ShardingDescriptor::by_date("CreatedAt", ShardGranularity::Month));
        let jan = vec![("CreatedAt".to_string(), date(2024, 1, 3))];
        let jan_late = vec![("CreatedAt".to_string(), date(2024, 1, 30))];
        let feb = vec![("CreatedAt".to_string(), date(2024, 2, 1))];
        let no_rows: [&[(String, Value)]; 0] = [];

        let table = write_table(&map, None, [jan.as_slice(), jan_late.as_slice()]).unwrap();
        assert_eq!(table, "log_202401");
        let err = write_table(&map, None, [jan.as_slice(), feb.as_slice()]).unwrap_err();
        assert!(err.is_ambiguous_shard());
        assert!(write_table(&map, None, no_rows).unwrap_err().is_ambiguous_shard());

        let key = ShardKey::value(date(2024, 2, 9));
        assert_eq!(write_table(&map, Some(&key), no_rows).unwrap(), "log_202402");

        let plain = EntityMap::new("Plain", "plain").column(ColumnMap::new("Id", SqlType::Integer));
        assert_eq!(write_table(&plain, None, no_rows).unwrap(), "plain");
        assert!(write_table(&plain, Some(&key), no_rows).is_err());
    }
}
