// tests/schema.rs
//! Schema setup on fresh and on older databases.

mod common;

use rusqlite::Connection;

use common::count;
use mesh_ingest::db::schema::{apply, column_names};

/// Tables as they looked before hop counts, cluster sizes and the stack 4.x
/// node counters were added.
const LEGACY: &str = "
    CREATE TABLE received_packets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        logged_time INTEGER NOT NULL, launch_time INTEGER, path_delay_ms INTEGER NOT NULL,
        network_address INTEGER NOT NULL, sink_address INTEGER NOT NULL,
        source_address INTEGER NOT NULL, dest_address INTEGER NOT NULL,
        source_endpoint INTEGER NOT NULL, dest_endpoint INTEGER NOT NULL,
        qos INTEGER NOT NULL, num_bytes INTEGER NOT NULL);
    INSERT INTO received_packets (logged_time, path_delay_ms, network_address, sink_address,
        source_address, dest_address, source_endpoint, dest_endpoint, qos, num_bytes)
        VALUES (1, 0, 1, 1, 2, 1, 1, 1, 0, 0);
    CREATE TABLE diagnostic_traffic (received_packet INTEGER NOT NULL, access_cycles INTEGER NOT NULL);
    CREATE TABLE diagnostic_boot (received_packet INTEGER NOT NULL, boot_count INTEGER NOT NULL,
        node_role INTEGER NOT NULL, firmware_version INTEGER NOT NULL, scratchpad_seq INTEGER NOT NULL,
        hw_magic INTEGER NOT NULL, stack_profile INTEGER NOT NULL, otap_enabled INTEGER NOT NULL,
        file_line_num INTEGER NOT NULL, file_name_hash INTEGER NOT NULL, stack_trace_0 INTEGER NOT NULL,
        stack_trace_1 INTEGER NOT NULL, stack_trace_2 INTEGER NOT NULL);
    CREATE TABLE diagnostic_node (received_packet INTEGER NOT NULL, voltage REAL NOT NULL,
        node_role INTEGER NOT NULL);
";

#[test]
fn old_database_gains_new_columns_and_keeps_rows() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(LEGACY).unwrap();

    apply(&conn).unwrap();

    let packets = column_names(&conn, "received_packets").unwrap();
    assert!(packets.iter().any(|c| c == "hop_count"));
    let traffic = column_names(&conn, "diagnostic_traffic").unwrap();
    assert!(traffic.iter().any(|c| c == "cluster_headnode_members"));
    let boot = column_names(&conn, "diagnostic_boot").unwrap();
    assert!(boot.iter().any(|c| c == "current_seq"));
    let node = column_names(&conn, "diagnostic_node").unwrap();
    for column in ["lltx_msg_w_ack", "blacklistexceeded", "pending_reroute_packets"] {
        assert!(node.iter().any(|c| c == column), "{column} missing");
    }
    assert_eq!(count(&conn, "received_packets"), 1);

    // a second startup changes nothing
    let before = column_names(&conn, "diagnostic_node").unwrap().len();
    apply(&conn).unwrap();
    assert_eq!(column_names(&conn, "diagnostic_node").unwrap().len(), before);
}

#[test]
fn integrity_table_is_recreated_each_startup() {
    let conn = Connection::open_in_memory().unwrap();
    apply(&conn).unwrap();
    conn.execute(
        "INSERT INTO integrity_test (message_time, db_write_time, checksum_number) VALUES (1, 2, 3)",
        [],
    )
    .unwrap();
    apply(&conn).unwrap();
    assert_eq!(count(&conn, "integrity_test"), 0);
}

#[test]
fn packet_trigger_tracks_last_seen_time() {
    let conn = Connection::open_in_memory().unwrap();
    apply(&conn).unwrap();
    for logged in [100, 250] {
        conn.execute(
            "INSERT INTO received_packets (logged_time, path_delay_ms, network_address, sink_address,
                 source_address, dest_address, source_endpoint, dest_endpoint, qos, num_bytes)
             VALUES (?1, 0, 7, 1, 42, 1, 1, 1, 0, 0)",
            [logged],
        )
        .unwrap();
    }
    let (rows, last): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), MAX(last_time) FROM known_nodes WHERE network_address = 7 AND node_address = 42",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!((rows, last), (1, 250));
}
