//! Buffered SQL work items.
//!
//! A child row cannot know its parent's `received_packets.id` when it is
//! built: the parent has not been inserted yet. Instead of splicing a marker
//! into SQL text, every statement carries a list of [`Bind`]s and the parent
//! identity is one of them, resolved by the flush engine right before the
//! statement runs.

use std::borrow::Cow;

use rusqlite::types::Value;

/// One positional parameter of a buffered statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    /// Identity of the unit's parent row, known only at flush time.
    Parent,
    /// A concrete value.
    Value(Value),
}

impl Bind {
    /// Resolve against the parent identity, if one is known yet.
    pub fn resolve(&self, parent: Option<i64>) -> Option<Value> {
        match self {
            Bind::Parent => parent.map(Value::Integer),
            Bind::Value(v) => Some(v.clone()),
        }
    }
}

impl From<Value> for Bind {
    fn from(v: Value) -> Self {
        Bind::Value(v)
    }
}

/// Whether an operation is a plain row insert or carries an opaque document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Row,
    Document,
}

/// A statement waiting for the next flush. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlOperation {
    sql: Cow<'static, str>,
    binds: Vec<Bind>,
    kind: OperationKind,
}

impl SqlOperation {
    /// A statement without parameters.
    pub fn statement(sql: impl Into<Cow<'static, str>>) -> Self {
        Self::row(sql, Vec::new())
    }

    /// A row insert with positional binds (`?1`, `?2`, ...).
    pub fn row(sql: impl Into<Cow<'static, str>>, binds: Vec<Bind>) -> Self {
        Self { sql: sql.into(), binds, kind: OperationKind::Row }
    }

    /// A child insert carrying one JSON or binary document.
    ///
    /// `sql` takes two parameters: `?1` is the parent identity and `?2` the
    /// document. The document is only ever bound, never formatted into the
    /// statement text.
    pub fn document(sql: impl Into<Cow<'static, str>>, document: Value) -> Self {
        Self {
            sql: sql.into(),
            binds: vec![Bind::Parent, Bind::Value(document)],
            kind: OperationKind::Document,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn binds(&self) -> &[Bind] {
        &self.binds
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// True when at least one bind waits for the parent identity.
    pub fn references_parent(&self) -> bool {
        self.binds.iter().any(|b| matches!(b, Bind::Parent))
    }

    /// Resolve every bind. `None` if the statement needs a parent that is
    /// not known.
    pub fn resolve(&self, parent: Option<i64>) -> Option<Vec<Value>> {
        self.binds.iter().map(|b| b.resolve(parent)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_bind_resolves_only_when_known() {
        let op = SqlOperation::row(
            "INSERT INTO diagnostic_event (received_packet, position, event) VALUES (?1, ?2, ?3)",
            vec![Bind::Parent, Value::Integer(3).into(), Value::Integer(0x20).into()],
        );
        assert!(op.references_parent());
        assert_eq!(op.resolve(None), None);
        assert_eq!(
            op.resolve(Some(41)),
            Some(vec![Value::Integer(41), Value::Integer(3), Value::Integer(0x20)])
        );
    }

    #[test]
    fn document_keeps_payload_out_of_sql_text() {
        let payload = r#"{"name":"it's; DROP TABLE x"}"#.to_string();
        let op = SqlOperation::document(
            "INSERT INTO advertiser_json (received_packet, apdu) VALUES (?1, ?2)",
            Value::Text(payload.clone()),
        );
        assert_eq!(op.kind(), OperationKind::Document);
        assert!(!op.sql().contains("DROP"));
        assert_eq!(op.binds()[1], Bind::Value(Value::Text(payload)));
    }

    #[test]
    fn plain_statement_has_no_parent() {
        let op = SqlOperation::statement("INSERT INTO log (recordtime, debuglog) VALUES ('t', 'x')");
        assert!(!op.references_parent());
        assert_eq!(op.resolve(None), Some(vec![]));
    }
}
