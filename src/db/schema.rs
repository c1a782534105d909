//! Tables, triggers and additive migrations, applied once at connect time.
//!
//! The ingest pipeline never issues DDL; everything it writes to must exist
//! after [`apply`] returns.

use rusqlite::Connection;

use super::DbError;

/// `TestData_ID_1` ..= `TestData_ID_9`.
pub const TEST_DATA_TABLES: u32 = 9;
/// `DataCol_1` ..= `DataCol_30` in every test-data table.
pub const TEST_DATA_COLUMNS: usize = 30;

const BASE_SCHEMA: &str = include_str!("../../resources/schema.sql");

/// Recreated at every startup so each run audits its own sequence.
const INTEGRITY_TABLE: &str = "
    DROP TABLE IF EXISTS integrity_test;
    CREATE TABLE integrity_test (
        message_time    INTEGER NOT NULL,
        db_write_time   INTEGER NOT NULL,
        checksum_number INTEGER NOT NULL
    );";

/// `known_nodes` is maintained by the database, not by the pipeline.
///
/// Each trigger upserts in two steps (`INSERT OR IGNORE` then `UPDATE`) so
/// columns owned by other triggers survive.
const TRIGGERS: &str = "
    DROP TRIGGER IF EXISTS after_received_packets_insert;
    CREATE TRIGGER after_received_packets_insert AFTER INSERT ON received_packets
    BEGIN
        INSERT OR IGNORE INTO known_nodes (network_address, node_address)
            VALUES (new.network_address, new.source_address);
        UPDATE known_nodes SET last_time = new.logged_time
            WHERE network_address = new.network_address AND node_address = new.source_address;
    END;

    DROP TRIGGER IF EXISTS after_diagnostic_node_insert;
    CREATE TRIGGER after_diagnostic_node_insert AFTER INSERT ON diagnostic_node
    BEGIN
        INSERT OR IGNORE INTO known_nodes (network_address, node_address)
            SELECT network_address, source_address FROM received_packets
            WHERE id = new.received_packet;
        UPDATE known_nodes SET voltage = new.voltage, node_role = new.node_role
            WHERE (network_address, node_address) =
                (SELECT network_address, source_address FROM received_packets
                 WHERE id = new.received_packet);
    END;

    DROP TRIGGER IF EXISTS after_diagnostic_boot_insert;
    CREATE TRIGGER after_diagnostic_boot_insert AFTER INSERT ON diagnostic_boot
    BEGIN
        INSERT OR IGNORE INTO known_nodes (network_address, node_address)
            SELECT network_address, source_address FROM received_packets
            WHERE id = new.received_packet;
        UPDATE known_nodes SET
                node_role = new.node_role,
                firmware_version = new.firmware_version,
                scratchpad_seq = new.scratchpad_seq,
                hw_magic = new.hw_magic,
                stack_profile = new.stack_profile,
                boot_count = new.boot_count,
                file_line_num = new.file_line_num,
                file_name_hash = new.file_name_hash
            WHERE (network_address, node_address) =
                (SELECT network_address, source_address FROM received_packets
                 WHERE id = new.received_packet);
    END;";

/// Columns added after the first release: `(table, column, declaration)`.
const MIGRATIONS: &[(&str, &str, &str)] = &[
    ("received_packets", "hop_count", "INTEGER DEFAULT NULL"),
    ("diagnostic_traffic", "cluster_members", "INTEGER DEFAULT NULL"),
    ("diagnostic_traffic", "cluster_headnode_members", "INTEGER DEFAULT NULL"),
    ("diagnostic_boot", "current_seq", "INTEGER DEFAULT NULL"),
    // stack 4.0
    ("diagnostic_node", "lltx_msg_w_ack", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "lltx_msg_unack", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "llrx_w_unack_ok", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "llrx_ack_not_received", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "lltx_cca_unack_fail", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "lltx_cca_w_ack_fail", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "llrx_w_ack_ok", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "llrx_ack_otherreasons", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "blacklistexceeded", "INTEGER DEFAULT NULL"),
    // stack 4.2, optional buffer statistics
    ("diagnostic_node", "pending_ucast_cluster", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "pending_ucast_members", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "pending_bcast_le_members", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "pending_bcast_ll_members", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "pending_bcast_unack", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "pending_expire_queue", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "pending_bcast_next_hop", "INTEGER DEFAULT NULL"),
    ("diagnostic_node", "pending_reroute_packets", "INTEGER DEFAULT NULL"),
];

/// Name of the test-data table for `id`, if the schema has one.
pub fn test_data_table(id: i64) -> Option<String> {
    (1..=i64::from(TEST_DATA_TABLES))
        .contains(&id)
        .then(|| format!("TestData_ID_{id}"))
}

fn test_data_ddl(id: u32) -> String {
    let data_cols: String = (1..=TEST_DATA_COLUMNS)
        .map(|i| format!("    DataCol_{i} INTEGER DEFAULT NULL,\n"))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS TestData_ID_{id} (
    received_packet INTEGER NOT NULL REFERENCES received_packets (id),
    logged_time REAL DEFAULT NULL,
    launch_time REAL DEFAULT NULL,
    ID_ctrl INTEGER DEFAULT NULL,
    field_count INTEGER DEFAULT 0,
{data_cols}    CHECK (field_count <= {TEST_DATA_COLUMNS})
);
CREATE INDEX IF NOT EXISTS TestData_ID_{id}_logged_time ON TestData_ID_{id} (logged_time);
CREATE INDEX IF NOT EXISTS TestData_ID_{id}_launch_time ON TestData_ID_{id} (launch_time);
CREATE INDEX IF NOT EXISTS TestData_ID_{id}_ctrl ON TestData_ID_{id} (ID_ctrl);"
    )
}

/// Column names of `table`, empty if it does not exist.
pub fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>, DbError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Add `column` to `table` unless it is already there. Returns whether the
/// table changed.
pub fn ensure_column(
    conn: &Connection,
    table: &str,
    column: &str,
    declaration: &str,
) -> Result<bool, DbError> {
    let existing = column_names(conn, table)?;
    if existing.is_empty() {
        return Err(DbError::Schema(format!("table {table} does not exist")));
    }
    if existing.iter().any(|c| c == column) {
        return Ok(false);
    }
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {declaration};"))?;
    log::info!("schema: added {}.{}", table, column);
    Ok(true)
}

/// Create or evolve everything the pipeline writes to.
pub fn apply(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(BASE_SCHEMA)?;
    conn.execute_batch(INTEGRITY_TABLE)?;
    for id in 1..=TEST_DATA_TABLES {
        conn.execute_batch(&test_data_ddl(id))?;
    }

    let mut added = 0;
    for (table, column, declaration) in MIGRATIONS {
        if ensure_column(conn, table, column, declaration)? {
            added += 1;
        }
    }
    conn.execute_batch(TRIGGERS)?;

    log::debug!("schema applied ({} column(s) added)", added);
    Ok(())
}
