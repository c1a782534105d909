// src/db/batch_inserts.rs

//! Message → buffered insert statements.
//!
//! Every diagnostic kind is described by an [`InsertSpec`]: a child table and
//! the apdu field feeding each column. One generic builder turns an `InsertSpec` and
//! an apdu into a parameterized statement whose first bind is the parent
//! `received_packets.id`.

use rusqlite::types::Value;
use serde_json::Value as Json;
use thiserror::Error;

use super::schema::{test_data_table, TEST_DATA_COLUMNS};
use crate::comms::events::{Apdu, Message, MessageKind};
use crate::ingest::operation::{Bind, SqlOperation};

/// Upper bound on neighbors reported by one diagnostic.
pub const MAX_NEIGHBORS: usize = 14;
/// `events_0` ..= `events_14` in node diagnostics.
pub const MAX_NODE_EVENTS: usize = 15;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("missing apdu field '{0}'")]
    MissingField(String),

    #[error("apdu field '{field}' has unsupported value {value}")]
    InvalidField { field: String, value: String },

    #[error("no TestData table for id {0}")]
    UnknownTestTable(i64),

    #[error("{0} data fields exceed the TestData columns")]
    TooManyFields(usize),

    #[error("{field} {value} ms is out of range")]
    TimeOutOfRange { field: &'static str, value: i64 },

    #[error("failed to serialize apdu: {0}")]
    Json(#[from] serde_json::Error),
}

/// One column of a child table and the apdu field that feeds it.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub field: &'static str,
    /// Missing optional fields are written as NULL.
    pub required: bool,
}

const fn req(name: &'static str, field: &'static str) -> Column {
    Column { name, field, required: true }
}

const fn opt(name: &'static str, field: &'static str) -> Column {
    Column { name, field, required: false }
}

/// Declarative insert into a child table keyed by `received_packet`.
#[derive(Debug, Clone, Copy)]
pub struct InsertSpec {
    pub table: &'static str,
    pub columns: &'static [Column],
}

impl InsertSpec {
    /// `INSERT INTO table (received_packet, ..) VALUES (?1, ..), (?1, ..)`.
    pub fn sql(&self, rows: usize) -> String {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name).collect();
        let width = self.columns.len();
        let tuples: Vec<String> = (0..rows)
            .map(|r| {
                let slots: Vec<String> = (0..width).map(|c| format!("?{}", 2 + r * width + c)).collect();
                format!("(?1, {})", slots.join(", "))
            })
            .collect();
        format!(
            "INSERT INTO {} (received_packet, {}) VALUES {}",
            self.table,
            names.join(", "),
            tuples.join(", ")
        )
    }

    /// One child row from one apdu.
    pub fn build(&self, apdu: &Apdu) -> Result<SqlOperation, RecordError> {
        self.build_rows(std::iter::once(apdu))
    }

    /// A single multi-row insert, all rows sharing the parent.
    pub fn build_rows<'a>(
        &self,
        rows: impl IntoIterator<Item = &'a Apdu>,
    ) -> Result<SqlOperation, RecordError> {
        let mut binds = vec![Bind::Parent];
        let mut count = 0;
        for apdu in rows {
            for column in self.columns {
                binds.push(Bind::Value(field_value(apdu, column)?));
            }
            count += 1;
        }
        Ok(SqlOperation::row(self.sql(count), binds))
    }
}

pub static TRAFFIC: InsertSpec = InsertSpec {
    table: "diagnostic_traffic",
    columns: &[
        req("access_cycles", "access_cycles"),
        opt("cluster_members", "cluster_members"),
        opt("cluster_headnode_members", "cluster_headnode_members"),
        req("cluster_channel", "cluster_channel"),
        req("channel_reliability", "channel_reliability"),
        req("rx_count", "rx_amount"),
        req("tx_count", "tx_amount"),
        req("aloha_rxs", "aloha_rx_ratio"),
        req("resv_rx_ok", "reserved_rx_success_ratio"),
        req("data_rxs", "data_rx_ratio"),
        req("dup_rxs", "rx_duplicate_ratio"),
        req("cca_ratio", "cca_success_ratio"),
        req("bcast_ratio", "broadcast_ratio"),
        req("tx_unicast_fail", "failed_unicast_ratio"),
        req("resv_usage_max", "max_reserved_slot_usage"),
        req("resv_usage_avg", "average_reserved_slot_usage"),
        req("aloha_usage_max", "max_aloha_slot_usage"),
    ],
};

pub static BOOT: InsertSpec = InsertSpec {
    table: "diagnostic_boot",
    columns: &[
        req("boot_count", "boot_count"),
        req("node_role", "node_role"),
        req("firmware_version", "firmware_version"),
        req("scratchpad_seq", "scratchpad_sequence"),
        req("hw_magic", "hw_magic"),
        req("stack_profile", "stack_profile"),
        req("otap_enabled", "otap_enabled"),
        req("file_line_num", "boot_line_number"),
        req("file_name_hash", "file_hash"),
        req("stack_trace_0", "stack_trace_0"),
        req("stack_trace_1", "stack_trace_1"),
        req("stack_trace_2", "stack_trace_2"),
        opt("current_seq", "cur_seq"),
    ],
};

pub static NODE: InsertSpec = InsertSpec {
    table: "diagnostic_node",
    columns: &[
        req("access_cycle_ms", "access_cycle"),
        req("node_role", "role"),
        req("voltage", "voltage"),
        req("buf_usage_max", "max_buffer_usage"),
        req("buf_usage_avg", "average_buffer_usage"),
        req("mem_alloc_fails", "mem_alloc_fails"),
        req("tc0_delay", "normal_priority_buf_delay"),
        req("tc1_delay", "high_priority_buf_delay"),
        req("network_scans", "network_scans"),
        req("downlink_delay_avg_0", "dl_delay_avg_0"),
        req("downlink_delay_min_0", "dl_delay_min_0"),
        req("downlink_delay_max_0", "dl_delay_max_0"),
        req("downlink_delay_samples_0", "dl_delay_samples_0"),
        req("downlink_delay_avg_1", "dl_delay_avg_1"),
        req("downlink_delay_min_1", "dl_delay_min_1"),
        req("downlink_delay_max_1", "dl_delay_max_1"),
        req("downlink_delay_samples_1", "dl_delay_samples_1"),
        opt("lltx_msg_w_ack", "lltx_msg_w_ack"),
        opt("lltx_msg_unack", "lltx_msg_unack"),
        opt("llrx_w_unack_ok", "llrx_w_unack_ok"),
        opt("llrx_ack_not_received", "llrx_ack_not_received"),
        opt("lltx_cca_unack_fail", "lltx_cca_unack_fail"),
        opt("lltx_cca_w_ack_fail", "lltx_cca_w_ack_fail"),
        opt("llrx_w_ack_ok", "llrx_w_ack_ok"),
        opt("llrx_ack_otherreasons", "llrx_ack_otherreasons"),
        req("dropped_packets_0", "dropped_packets_0"),
        req("dropped_packets_1", "dropped_packets_1"),
        req("route_address", "route_address"),
        req("next_hop_address_0", "cost_info_next_hop_0"),
        req("cost_0", "cost_info_cost_0"),
        req("quality_0", "cost_info_link_quality_0"),
        req("next_hop_address_1", "cost_info_next_hop_1"),
        req("cost_1", "cost_info_cost_1"),
        req("quality_1", "cost_info_link_quality_1"),
        opt("blacklistexceeded", "blacklistexceeded"),
        opt("pending_ucast_cluster", "pending_ucast_cluster"),
        opt("pending_ucast_members", "pending_ucast_members"),
        opt("pending_bcast_le_members", "pending_bcast_le_members"),
        opt("pending_bcast_ll_members", "pending_bcast_ll_members"),
        opt("pending_bcast_unack", "pending_bcast_unack"),
        opt("pending_expire_queue", "pending_expire_queue"),
        opt("pending_bcast_next_hop", "pending_bcast_next_hop"),
        opt("pending_reroute_packets", "pending_reroute_packets"),
    ],
};

pub static NODE_EVENT: InsertSpec = InsertSpec {
    table: "diagnostic_event",
    columns: &[req("position", "position"), req("event", "event")],
};

pub static NEIGHBOR: InsertSpec = InsertSpec {
    table: "diagnostic_neighbor",
    columns: &[
        req("node_address", "address"),
        req("cluster_channel", "cluster_channel"),
        req("radio_power", "radio_power"),
        req("device_info", "node_info"),
        req("norm_rssi", "rssi"),
    ],
};

const INSERT_RECEIVED_PACKET: &str = "INSERT INTO received_packets \
       (logged_time, launch_time, path_delay_ms, network_address, sink_address, \
        source_address, dest_address, source_endpoint, dest_endpoint, qos, num_bytes, hop_count) \
     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)";

const INSERT_ADVERTISER: &str = "INSERT INTO advertiser_json (received_packet, apdu) VALUES (?1, ?2)";
const INSERT_DIAGNOSTICS: &str = "INSERT INTO diagnostics_json (received_packet, apdu) VALUES (?1, ?2)";

/// Parent row for any message. Times are stored in microseconds.
pub fn received_packet(msg: &Message) -> Result<SqlOperation, RecordError> {
    let values = [
        Value::Integer(micros("rx_time", msg.rx_time_ms_epoch)?),
        Value::Integer(micros("launch_time", launch_time_ms(msg)?)?),
        Value::Integer(msg.travel_time_ms),
        Value::Integer(msg.network_id as i64),
        // the sink is the packet's destination
        Value::Integer(i64::from(msg.destination_address)),
        Value::Integer(i64::from(msg.source_address)),
        Value::Integer(i64::from(msg.destination_address)),
        Value::Integer(i64::from(msg.source_endpoint)),
        Value::Integer(i64::from(msg.destination_endpoint)),
        Value::Integer(i64::from(msg.qos)),
        Value::Integer(msg.data_payload.len() as i64),
        Value::Integer(i64::from(msg.hop_count.unwrap_or(0))),
    ];
    Ok(SqlOperation::row(INSERT_RECEIVED_PACKET, values.into_iter().map(Bind::Value).collect()))
}

fn micros(field: &'static str, ms: i64) -> Result<i64, RecordError> {
    ms.checked_mul(1_000)
        .ok_or(RecordError::TimeOutOfRange { field, value: ms })
}

fn launch_time_ms(msg: &Message) -> Result<i64, RecordError> {
    msg.launch_time_ms_epoch().ok_or(RecordError::TimeOutOfRange {
        field: "travel_time",
        value: msg.travel_time_ms,
    })
}

/// Child operations for a message, by kind. Nothing is returned on error.
pub fn children(msg: &Message) -> Result<Vec<SqlOperation>, RecordError> {
    match msg.kind {
        MessageKind::Data => Ok(Vec::new()),
        MessageKind::Traffic => Ok(vec![TRAFFIC.build(&msg.apdu)?]),
        MessageKind::Boot => Ok(vec![BOOT.build(&msg.apdu)?]),
        MessageKind::Node => node(&msg.apdu),
        MessageKind::Neighbor => neighbors(&msg.apdu),
        MessageKind::Advertiser => Ok(vec![document(INSERT_ADVERTISER, &msg.apdu)?]),
        MessageKind::Diagnostics => Ok(vec![document(INSERT_DIAGNOSTICS, &msg.apdu)?]),
        MessageKind::TestData => test_data(msg),
    }
}

fn document(sql: &'static str, apdu: &Apdu) -> Result<SqlOperation, RecordError> {
    Ok(SqlOperation::document(sql, Value::Text(serde_json::to_string(apdu)?)))
}

fn node(apdu: &Apdu) -> Result<Vec<SqlOperation>, RecordError> {
    let mut ops = vec![NODE.build(apdu)?];

    let mut events = Vec::new();
    for position in 0..MAX_NODE_EVENTS {
        let field = format!("events_{position}");
        let Some(raw) = apdu.get(&field) else { continue };
        let code = raw.as_i64().ok_or_else(|| invalid(&field, raw))?;
        if code != 0 {
            let mut row = Apdu::new();
            row.insert("position".into(), Json::from(position));
            row.insert("event".into(), Json::from(code));
            events.push(row);
        }
    }
    if !events.is_empty() {
        ops.push(NODE_EVENT.build_rows(&events)?);
    }
    Ok(ops)
}

fn neighbors(apdu: &Apdu) -> Result<Vec<SqlOperation>, RecordError> {
    let listed: Vec<&Apdu> = apdu
        .get("neighbor")
        .and_then(Json::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Json::as_object)
                .take(MAX_NEIGHBORS)
                .take_while(|n| n.get("address").and_then(Json::as_u64).is_some_and(|a| a != 0))
                .collect()
        })
        .unwrap_or_default();

    if listed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![NEIGHBOR.build_rows(listed)?])
}

fn test_data(msg: &Message) -> Result<Vec<SqlOperation>, RecordError> {
    let apdu = &msg.apdu;
    let row_count = require(apdu, "row_count")?
        .as_u64()
        .ok_or_else(|| invalid("row_count", &apdu["row_count"]))?;

    let logged = msg.rx_time_ms_epoch as f64 / 1000.0;
    let launched = launch_time_ms(msg)? as f64 / 1000.0;

    let mut ops = Vec::new();
    for row in 0..row_count as usize {
        let id = indexed_i64(apdu, "testdata_id", row)?;
        let table = test_data_table(id).ok_or(RecordError::UnknownTestTable(id))?;
        let fields = indexed_i64(apdu, "number_of_fields", row)?.max(0) as usize;
        if fields > TEST_DATA_COLUMNS {
            return Err(RecordError::TooManyFields(fields));
        }
        let id_ctrl = indexed_i64(apdu, "id_ctrl", row)?;
        let data = indexed(apdu, "datafields", row)?
            .as_array()
            .filter(|d| d.len() >= fields)
            .ok_or_else(|| invalid("datafields", &apdu["datafields"]))?;

        let mut columns = vec!["received_packet", "logged_time", "launch_time", "field_count", "ID_ctrl"]
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        columns.extend((1..=fields).map(|i| format!("DataCol_{i}")));
        let slots: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();

        let mut binds = vec![
            Bind::Parent,
            Bind::Value(Value::Real(logged)),
            Bind::Value(Value::Real(launched)),
            Bind::Value(Value::Integer(fields as i64)),
            Bind::Value(Value::Integer(id_ctrl)),
        ];
        for value in &data[..fields] {
            binds.push(Bind::Value(json_value("datafields", value)?));
        }

        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            slots.join(", ")
        );
        ops.push(SqlOperation::row(sql, binds));
    }
    Ok(ops)
}

fn require<'a>(apdu: &'a Apdu, field: &str) -> Result<&'a Json, RecordError> {
    apdu.get(field).ok_or_else(|| RecordError::MissingField(field.to_owned()))
}

fn indexed<'a>(apdu: &'a Apdu, field: &str, row: usize) -> Result<&'a Json, RecordError> {
    require(apdu, field)?
        .get(row)
        .ok_or_else(|| RecordError::MissingField(format!("{field}[{row}]")))
}

fn indexed_i64(apdu: &Apdu, field: &str, row: usize) -> Result<i64, RecordError> {
    let raw = indexed(apdu, field, row)?;
    raw.as_i64().ok_or_else(|| invalid(field, raw))
}

fn invalid(field: &str, value: &Json) -> RecordError {
    RecordError::InvalidField { field: field.to_owned(), value: value.to_string() }
}

fn field_value(apdu: &Apdu, column: &Column) -> Result<Value, RecordError> {
    match apdu.get(column.field) {
        Some(raw) => json_value(column.field, raw),
        None if column.required => Err(RecordError::MissingField(column.field.to_owned())),
        None => Ok(Value::Null),
    }
}

/// Scalar JSON → SQLite value.
fn json_value(field: &str, raw: &Json) -> Result<Value, RecordError> {
    match raw {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Integer(i64::from(*b))),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Real))
            .ok_or_else(|| invalid(field, raw)),
        Json::String(s) => Ok(Value::Text(s.clone())),
        Json::Array(_) | Json::Object(_) => Err(invalid(field, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apdu(v: Json) -> Apdu {
        v.as_object().cloned().unwrap()
    }

    fn message(kind: MessageKind, apdu_json: Json) -> Message {
        Message {
            kind,
            rx_time_ms_epoch: 1_700_000_000_000,
            travel_time_ms: 120,
            network_id: 0x1234,
            source_address: 42,
            destination_address: 1,
            source_endpoint: 247,
            destination_endpoint: 255,
            qos: 0,
            hop_count: Some(3),
            data_payload: vec![0; 16],
            apdu: apdu(apdu_json),
        }
    }

    #[test]
    fn multi_row_sql_reuses_parent_slot() {
        assert_eq!(
            NODE_EVENT.sql(2),
            "INSERT INTO diagnostic_event (received_packet, position, event) VALUES (?1, ?2, ?3), (?1, ?4, ?5)"
        );
    }

    #[test]
    fn primary_row_has_no_parent_reference() {
        let op = received_packet(&message(MessageKind::Data, json!({}))).unwrap();
        assert!(!op.references_parent());
        assert_eq!(op.binds().len(), 12);
        assert_eq!(op.binds()[1], Bind::Value(Value::Integer(1_699_999_999_880_000)));
        assert_eq!(op.binds()[10], Bind::Value(Value::Integer(16)));
    }

    #[test]
    fn out_of_range_times_are_rejected() {
        let mut msg = message(MessageKind::Data, json!({}));
        msg.rx_time_ms_epoch = i64::MAX / 100;
        assert!(matches!(
            received_packet(&msg),
            Err(RecordError::TimeOutOfRange { field: "rx_time", .. })
        ));

        let mut msg = message(
            MessageKind::TestData,
            json!({"row_count": 1, "testdata_id": [1], "number_of_fields": [1],
                   "id_ctrl": [0], "datafields": [[7]]}),
        );
        msg.rx_time_ms_epoch = i64::MIN + 1;
        assert!(matches!(
            children(&msg),
            Err(RecordError::TimeOutOfRange { field: "travel_time", .. })
        ));
    }

    #[test]
    fn missing_required_field_is_reported() {
        let err = TRAFFIC.build(&apdu(json!({"access_cycles": 1}))).unwrap_err();
        assert!(matches!(err, RecordError::MissingField(f) if f == "cluster_channel"));
    }

    #[test]
    fn optional_field_becomes_null() {
        let mut fields = serde_json::Map::new();
        for column in BOOT.columns.iter().filter(|c| c.required) {
            fields.insert(column.field.into(), json!(1));
        }
        let op = BOOT.build(&fields).unwrap();
        assert_eq!(op.binds().last(), Some(&Bind::Value(Value::Null)));
    }

    #[test]
    fn neighbors_stop_at_first_empty_address() {
        let msg = message(
            MessageKind::Neighbor,
            json!({"neighbor": [
                {"address": 5, "cluster_channel": 1, "radio_power": 2, "node_info": 3, "rssi": 40},
                {"address": 6, "cluster_channel": 1, "radio_power": 2, "node_info": 3, "rssi": 41},
                {"address": 0, "cluster_channel": 0, "radio_power": 0, "node_info": 0, "rssi": 0},
                {"address": 7, "cluster_channel": 1, "radio_power": 2, "node_info": 3, "rssi": 42}
            ]}),
        );
        let ops = children(&msg).unwrap();
        assert_eq!(ops.len(), 1);
        // parent + 2 rows * 5 columns
        assert_eq!(ops[0].binds().len(), 11);

        let none = message(MessageKind::Neighbor, json!({"neighbor": []}));
        assert!(children(&none).unwrap().is_empty());
    }

    #[test]
    fn test_data_rejects_unknown_table() {
        let msg = message(
            MessageKind::TestData,
            json!({"row_count": 1, "testdata_id": [12], "number_of_fields": [1],
                   "id_ctrl": [0], "datafields": [[7]]}),
        );
        assert!(matches!(children(&msg), Err(RecordError::UnknownTestTable(12))));
    }

    #[test]
    fn test_data_builds_one_row_per_measurement() {
        let msg = message(
            MessageKind::TestData,
            json!({"row_count": 2, "testdata_id": [1, 2], "number_of_fields": [2, 1],
                   "id_ctrl": [9, 8], "datafields": [[10, 11], [12]]}),
        );
        let ops = children(&msg).unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops[0].sql().starts_with("INSERT INTO TestData_ID_1 "));
        assert!(ops[0].sql().contains("DataCol_2"));
        assert!(!ops[1].sql().contains("DataCol_2"));
        assert!(ops.iter().all(SqlOperation::references_parent));
    }

    #[test]
    fn advertiser_is_a_bound_document() {
        let msg = message(MessageKind::Advertiser, json!({"name": "it's"}));
        let ops = children(&msg).unwrap();
        assert_eq!(ops[0].kind(), crate::ingest::operation::OperationKind::Document);
        assert!(!ops[0].sql().contains("it's"));
    }
}
