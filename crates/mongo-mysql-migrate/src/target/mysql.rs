//! MySQL/MariaDB destination.
//!
//! Uses mysql_async for connection pooling. Each batch runs in its own
//! transaction as multi-row `INSERT .. ON DUPLICATE KEY UPDATE` statements.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts, TxOpts};
use tracing::{debug, info, warn};

use super::{ConflictPolicy, Destination, TableSpec};
use crate::config::TargetConfig;
use crate::entity::{FieldKind, ID_LENGTH, PRIMARY_KEY_COLUMN};
use crate::error::{MigrateError, Result};
use crate::value::{SqlValue, TransformedRecord};

/// MySQL max placeholders per prepared statement.
const MYSQL_MAX_PLACEHOLDERS: usize = 65535;

/// Server error codes caused by the rows themselves rather than the connection.
const RECORD_LEVEL_CODES: &[u16] = &[
    1048, // column cannot be null
    1062, // duplicate entry
    1264, // out of range value
    1292, // incorrect datetime value
    1366, // incorrect value for column
    1406, // data too long
    1451, // foreign key (parent row)
    1452, // foreign key (child row)
    3819, // check constraint violated
];

/// MySQL destination using a mysql_async pool.
pub struct MysqlDestination {
    pool: Pool,
    database: String,
}

impl MysqlDestination {
    /// Create a pool from configuration and test a connection.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let ssl_opts = match config.ssl_mode.to_lowercase().as_str() {
            "disable" => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            "prefer" | "require" => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
            "verify-ca" | "verify_ca" | "verify-full" | "verify_identity" => {
                Some(SslOpts::default())
            }
            _ => {
                warn!(
                    "Unknown ssl_mode '{}', defaulting to Preferred",
                    config.ssl_mode
                );
                Some(SslOpts::default().with_danger_accept_invalid_certs(true))
            }
        };

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let constraints = PoolConstraints::new(1, max_conns.max(1)).ok_or_else(|| {
            MigrateError::Config(format!("invalid MySQL pool size {}", max_conns))
        })?;
        let opts: Opts = builder
            .pool_opts(PoolOpts::new().with_constraints(constraints))
            .into();
        let pool = Pool::new(opts);

        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "creating MySQL target pool"))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL target connection"))?;
        drop(conn);

        info!(
            "Connected to MySQL target: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            pool,
            database: config.database.clone(),
        })
    }

    /// Quote a MySQL identifier.
    fn quote_ident(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    /// Qualify a table name with the database.
    fn qualify_table(&self, table: &str) -> String {
        format!(
            "{}.{}",
            Self::quote_ident(&self.database),
            Self::quote_ident(table)
        )
    }

    /// Insert all records inside one transaction.
    async fn insert_in_transaction(
        &self,
        qualified_table: &str,
        records: &[TransformedRecord],
        conflict: ConflictPolicy,
    ) -> std::result::Result<u64, mysql_async::Error> {
        let columns = records[0].columns();
        let num_cols = columns.len();
        let max_rows_per_stmt = (MYSQL_MAX_PLACEHOLDERS / num_cols).max(1);

        let mut conn = self.pool.get_conn().await?;
        let mut tx = conn.start_transaction(TxOpts::default()).await?;

        let mut result = Ok(());
        for chunk in records.chunks(max_rows_per_stmt) {
            let sql = insert_sql(qualified_table, &columns, chunk.len(), conflict);
            let params: Vec<mysql_async::Value> = chunk
                .iter()
                .flat_map(|rec| rec.values.iter().map(sql_value_to_mysql))
                .collect();

            if let Err(e) = tx.exec_drop(&sql, params).await {
                result = Err(e);
                break;
            }
        }

        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(records.len() as u64)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!("MySQL: rollback on {} failed: {}", qualified_table, rb);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Destination for MysqlDestination {
    async fn ensure_schema(&self, tables: &[TableSpec]) -> Result<()> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MySQL connection"))?;

        for entry in tables {
            let ddl = create_table_ddl(&self.qualify_table(&entry.table), entry);
            conn.query_drop(&ddl).await?;
            debug!("Ensured table {}.{}", self.database, entry.table);
        }
        Ok(())
    }

    async fn execute_batch(
        &self,
        table: &str,
        records: &[TransformedRecord],
        conflict: ConflictPolicy,
    ) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let qualified_table = self.qualify_table(table);
        let written = self
            .insert_in_transaction(&qualified_table, records, conflict)
            .await
            .map_err(|e| classify_error(table, e))?;

        debug!("MySQL: wrote {} rows to {}", written, qualified_table);
        Ok(written)
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MySQL connection"))?;

        let sql = format!("SELECT COUNT(*) AS cnt FROM {}", self.qualify_table(table));
        let count: Option<i64> = conn.query_first(&sql).await?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL connection"))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL connection"))?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.clone().disconnect().await.ok();
    }
}

/// Separate row problems (recoverable by isolating the row) from transport failures.
fn classify_error(table: &str, err: mysql_async::Error) -> MigrateError {
    match &err {
        mysql_async::Error::Server(server) if RECORD_LEVEL_CODES.contains(&server.code) => {
            MigrateError::rejected(
                table,
                format!("{} ({}): {}", server.code, server.state, server.message),
            )
        }
        _ => MigrateError::Target(err),
    }
}

/// Build one multi-row insert statement.
fn insert_sql(
    qualified_table: &str,
    columns: &[&str],
    rows: usize,
    conflict: ConflictPolicy,
) -> String {
    let col_list = columns
        .iter()
        .map(|c| MysqlDestination::quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let row_placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![row_placeholders; rows].join(", ");

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table, col_list, values
    );

    // An empty update list still has to swallow the conflict without touching the row.
    let update_set = if conflict.update_columns.is_empty() {
        let pk = MysqlDestination::quote_ident(PRIMARY_KEY_COLUMN);
        format!("{} = {}", pk, pk)
    } else {
        conflict
            .update_columns
            .iter()
            .map(|c| {
                let q = MysqlDestination::quote_ident(c);
                format!("{} = VALUES({})", q, q)
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    sql.push_str(" ON DUPLICATE KEY UPDATE ");
    sql.push_str(&update_set);

    sql
}

/// Column type for a field rule.
fn column_type(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Text {
            default: Some(_),
            max_len,
        } => format!("VARCHAR({}) NOT NULL", max_len),
        FieldKind::Text { default: None, max_len } => format!("VARCHAR({}) NULL", max_len),
        FieldKind::Int { .. } => "BIGINT NOT NULL".to_string(),
        FieldKind::Float { .. } => "DOUBLE NOT NULL".to_string(),
        FieldKind::Bool { .. } => "TINYINT(1) NOT NULL".to_string(),
        FieldKind::Timestamp => "DATETIME(3) NULL".to_string(),
        FieldKind::Reference(_) => format!("VARCHAR({}) NULL", ID_LENGTH),
    }
}

/// `CREATE TABLE IF NOT EXISTS` for one entity table, with indexes on reference
/// columns and the entity's composite indexes.
fn create_table_ddl(qualified_table: &str, entry: &TableSpec) -> String {
    let mut defs = vec![format!(
        "{} VARCHAR({}) NOT NULL",
        MysqlDestination::quote_ident(PRIMARY_KEY_COLUMN),
        ID_LENGTH
    )];

    defs.extend(entry.def.fields.iter().map(|f| {
        format!(
            "{} {}",
            MysqlDestination::quote_ident(f.column),
            column_type(&f.kind)
        )
    }));

    defs.push(format!(
        "PRIMARY KEY ({})",
        MysqlDestination::quote_ident(PRIMARY_KEY_COLUMN)
    ));

    defs.extend(entry.def.fields.iter().filter(|f| f.is_indexed()).map(|f| {
        format!(
            "INDEX {} ({})",
            MysqlDestination::quote_ident(&format!("idx_{}_{}", entry.table, f.column)),
            MysqlDestination::quote_ident(f.column)
        )
    }));

    defs.extend(entry.def.composite_indexes.iter().map(|index| {
        let columns = index
            .columns
            .iter()
            .map(|c| MysqlDestination::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INDEX {} ({})",
            MysqlDestination::quote_ident(&format!("idx_{}_{}", entry.table, index.name)),
            columns
        )
    }));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        qualified_table,
        defs.join(",\n    ")
    )
}

/// Convert SqlValue to mysql_async::Value.
fn sql_value_to_mysql(value: &SqlValue) -> mysql_async::Value {
    match value {
        SqlValue::Null => mysql_async::Value::NULL,
        SqlValue::Bool(b) => mysql_async::Value::from(*b),
        SqlValue::Int(i) => mysql_async::Value::from(*i),
        SqlValue::Float(f) => mysql_async::Value::from(*f),
        SqlValue::Text(s) => mysql_async::Value::from(s.as_str()),
        SqlValue::Timestamp(dt) => datetime_to_mysql(dt),
    }
}

fn datetime_to_mysql(dt: &NaiveDateTime) -> mysql_async::Value {
    mysql_async::Value::Date(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        dt.and_utc().timestamp_subsec_micros().min(999_999),
    )
}
