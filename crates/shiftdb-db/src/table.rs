use rusqlite::{Connection, params_from_iter};
use shiftdb_common::{Error, Result};
use tracing::debug;
use uuid::Uuid;

use crate::migrator::Migrator;
use crate::model::{ModelDescriptor, quote_ident};
use crate::record::{Record, Row};
use crate::schema::PendingMigration;
use crate::value::Value;

/// Create `model`'s table, empty.
pub(crate) fn create_table(conn: &Connection, model: &ModelDescriptor) -> Result<()> {
    conn.execute_batch(&model.create_table_sql(model.table()))
        .map_err(|e| Error::Database(format!("failed to create table: {e}")))
}

pub(crate) fn drop_table(conn: &Connection, table: &str) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
        .map_err(|e| Error::Database(format!("failed to drop table: {e}")))
}

/// Rebuild a table in its new shape and carry every row over through the
/// model's migrator. Returns the number of rows copied.
///
/// The old table is renamed aside, the new one created under the original
/// name, rows are transcoded one by one and the old table is dropped. All of
/// it runs in one transaction.
pub(crate) fn migrate_table(conn: &Connection, pending: &PendingMigration<'_>) -> Result<usize> {
    let model = pending.model;
    let table = model.table();
    let temp = format!("_{table}_migrating_{}", Uuid::new_v4().simple());

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

    tx.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(table),
        quote_ident(&temp)
    ))
    .map_err(|e| Error::Database(format!("failed to rename table aside: {e}")))?;

    create_table(&tx, model)?;

    let mut migrator = model.strategy().migrator();
    migrator.begin_migration(pending.from_version, model)?;
    let copied = copy_rows(&tx, &temp, model, migrator.as_mut())?;

    drop_table(&tx, &temp)?;
    tx.commit()
        .map_err(|e| Error::Database(format!("failed to commit table migration: {e}")))?;

    debug!("copied {copied} rows into {table}");
    Ok(copied)
}

fn copy_rows(
    conn: &Connection,
    source_table: &str,
    model: &ModelDescriptor,
    migrator: &mut dyn Migrator,
) -> Result<usize> {
    // No ORDER BY: rows arrive in the store's scan order.
    let mut select = conn
        .prepare(&format!("SELECT * FROM {}", quote_ident(source_table)))
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
    let names: Vec<String> = select
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let mut rows = select
        .query([])
        .map_err(|e| Error::Database(format!("failed to scan table: {e}")))?;

    let mut copied = 0;
    while let Some(row) = rows
        .next()
        .map_err(|e| Error::Database(format!("failed to read row: {e}")))?
    {
        let mut source = Row::new();
        for (index, name) in names.iter().enumerate() {
            let raw = row
                .get_ref(index)
                .map_err(|e| Error::Database(format!("failed to read column {name}: {e}")))?;
            let value = Value::try_from(raw).map_err(|e| match e {
                Error::Coercion(msg) => Error::Coercion(format!("column `{name}`: {msg}")),
                other => other,
            })?;
            source.push(name.as_str(), value);
        }

        let record = migrator.migrate_record(&source)?;
        insert_record(conn, model, &record)?;
        copied += 1;
    }
    Ok(copied)
}

/// Insert `record` into `model`'s table. A primary key left `Null` is
/// omitted so the store assigns one; any other key is kept as is.
pub(crate) fn insert_record(
    conn: &Connection,
    model: &ModelDescriptor,
    record: &Record,
) -> Result<()> {
    let mut columns = Vec::with_capacity(record.len());
    let mut values = Vec::with_capacity(record.len());
    for (name, value) in record.iter() {
        let assigned_by_store =
            value.is_null() && model.find_field(name).is_some_and(|f| f.primary_key);
        if assigned_by_store {
            continue;
        }
        columns.push(quote_ident(name));
        values.push(value);
    }

    let table = quote_ident(model.table());
    let sql = if columns.is_empty() {
        format!("INSERT INTO {table} DEFAULT VALUES")
    } else {
        let placeholders = vec!["?"; columns.len()].join(", ");
        format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        )
    };

    let mut stmt = conn
        .prepare_cached(&sql)
        .map_err(|e| Error::Database(format!("failed to prepare insert: {e}")))?;
    stmt.execute(params_from_iter(values))
        .map_err(|e| Error::Database(format!("failed to insert record: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldDescriptor;
    use crate::value::ValueKind;

    fn v1() -> ModelDescriptor {
        ModelDescriptor::new("ModelA")
            .field(FieldDescriptor::id("id"))
            .field(FieldDescriptor::nullable("value", ValueKind::Text))
    }

    fn v2() -> ModelDescriptor {
        v1().version(2).field(FieldDescriptor::nullable("description", ValueKind::Text))
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn insert_lets_the_store_assign_null_keys() {
        let conn = Connection::open_in_memory().unwrap();
        let model = v1();
        create_table(&conn, &model).unwrap();

        let mut record = Record::blank(&model);
        record.set("value", "a").unwrap();
        insert_record(&conn, &model, &record).unwrap();
        insert_record(&conn, &model, &record).unwrap();

        let max_id: i64 = conn
            .query_row("SELECT MAX(id) FROM \"ModelA\"", [], |row| row.get(0))
            .unwrap();
        assert_eq!(max_id, 2);
    }

    #[test]
    fn migrate_table_keeps_rows_and_identities() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn, &v1()).unwrap();
        conn.execute_batch(
            "INSERT INTO \"ModelA\" (id, value) VALUES (10, 'x');
             INSERT INTO \"ModelA\" (id, value) VALUES (20, 'y');",
        )
        .unwrap();

        let target = v2();
        let pending = PendingMigration {
            model: &target,
            from_version: 1,
        };
        assert_eq!(migrate_table(&conn, &pending).unwrap(), 2);

        let (value, description): (String, Option<String>) = conn
            .query_row(
                "SELECT value, description FROM \"ModelA\" WHERE id = 20",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(value, "y");
        assert!(description.is_none());

        let leftovers: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE '%_migrating_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn failed_record_aborts_the_table_migration() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn, &v1()).unwrap();
        conn.execute_batch("INSERT INTO \"ModelA\" (value) VALUES ('not a number');")
            .unwrap();

        let target = ModelDescriptor::new("ModelA")
            .version(2)
            .field(FieldDescriptor::id("id"))
            .field(FieldDescriptor::new("value", ValueKind::Integer));
        let pending = PendingMigration {
            model: &target,
            from_version: 1,
        };
        assert!(migrate_table(&conn, &pending).is_err());

        // The transaction rolled back: the old table is untouched.
        assert_eq!(count(&conn, "ModelA"), 1);
        let value: String = conn
            .query_row("SELECT value FROM \"ModelA\"", [], |row| row.get(0))
            .unwrap();
        assert_eq!(value, "not a number");
    }
}
