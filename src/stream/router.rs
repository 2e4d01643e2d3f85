// ABOUTME: Classifies decoded replication messages and dispatches row changes
// ABOUTME: Maintains the pgoutput relation cache and transaction bookkeeping

use postgres_replication::protocol::{LogicalReplicationMessage, RelationBody, TupleData};
use std::collections::HashMap;
use std::fmt;
use tokio_postgres::types::PgLsn;

use crate::error::ReplicationError;

/// Operation carried by a data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::Insert => write!(f, "insert"),
            ChangeOp::Update => write!(f, "update"),
            ChangeOp::Delete => write!(f, "delete"),
        }
    }
}

/// A decoded data change forwarded to downstream consumers. Transient;
/// discarded after dispatch.
#[derive(Debug, Clone)]
pub struct RowChange {
    pub schema: String,
    pub table: String,
    pub op: ChangeOp,
    pub columns: Vec<String>,
    /// Column values in text form; `None` for NULL and unchanged TOAST values
    pub row: Vec<Option<String>>,
    pub lsn: PgLsn,
    pub xid: Option<u32>,
}

/// Downstream consumer of routed data changes.
///
/// The streaming path does not write to the target; the in-scope sink only
/// observes. The batch path owns target writes.
pub trait ChangeSink: Send {
    fn handle(&mut self, change: RowChange);
}

/// Default sink: logs each change.
pub struct LogSink;

impl ChangeSink for LogSink {
    fn handle(&mut self, change: RowChange) {
        tracing::debug!(
            "{} on {}.{} at {} ({} columns)",
            change.op,
            change.schema,
            change.table,
            change.lsn,
            change.columns.len()
        );
    }
}

struct Relation {
    schema: String,
    table: String,
    columns: Vec<String>,
}

/// Routes messages by type: Begin/Commit update transaction bookkeeping,
/// Relation messages feed the pgoutput relation cache, and data messages are
/// forwarded to the sink with their table and row image.
pub struct ChangeRouter {
    relations: HashMap<u32, Relation>,
    current_xid: Option<u32>,
    sink: Box<dyn ChangeSink>,
    changes_routed: u64,
}

impl ChangeRouter {
    pub fn new(sink: Box<dyn ChangeSink>) -> Self {
        Self {
            relations: HashMap::new(),
            current_xid: None,
            sink,
            changes_routed: 0,
        }
    }

    /// Total data changes forwarded since startup.
    pub fn changes_routed(&self) -> u64 {
        self.changes_routed
    }

    /// Route one decoded message at the given position.
    pub fn route(
        &mut self,
        message: LogicalReplicationMessage,
        lsn: PgLsn,
    ) -> Result<(), ReplicationError> {
        match message {
            LogicalReplicationMessage::Begin(body) => {
                self.current_xid = Some(body.xid());
                tracing::debug!("Transaction begin, xid {} at {}", body.xid(), lsn);
                Ok(())
            }
            LogicalReplicationMessage::Commit(body) => {
                let xid = self.current_xid.take();
                tracing::debug!(
                    "Transaction commit, xid {:?}, end {}",
                    xid,
                    PgLsn::from(body.end_lsn())
                );
                Ok(())
            }
            LogicalReplicationMessage::Relation(body) => self.cache_relation(&body),
            LogicalReplicationMessage::Insert(body) => self.dispatch(
                body.rel_id(),
                ChangeOp::Insert,
                decode_tuple(body.tuple().tuple_data())?,
                lsn,
            ),
            LogicalReplicationMessage::Update(body) => self.dispatch(
                body.rel_id(),
                ChangeOp::Update,
                decode_tuple(body.new_tuple().tuple_data())?,
                lsn,
            ),
            LogicalReplicationMessage::Delete(body) => {
                let tuple = body.key_tuple().or_else(|| body.old_tuple()).ok_or_else(|| {
                    ReplicationError::Protocol("delete message without key image".to_string())
                })?;
                self.dispatch(
                    body.rel_id(),
                    ChangeOp::Delete,
                    decode_tuple(tuple.tuple_data())?,
                    lsn,
                )
            }
            LogicalReplicationMessage::Origin(_)
            | LogicalReplicationMessage::Type(_)
            | LogicalReplicationMessage::Truncate(_) => Ok(()),
            other => Err(ReplicationError::Protocol(format!(
                "unexpected replication message: {:?}",
                other
            ))),
        }
    }

    fn cache_relation(&mut self, body: &RelationBody) -> Result<(), ReplicationError> {
        let schema = body
            .namespace()
            .map_err(|e| ReplicationError::Protocol(format!("bad relation namespace: {}", e)))?
            .to_string();
        let table = body
            .name()
            .map_err(|e| ReplicationError::Protocol(format!("bad relation name: {}", e)))?
            .to_string();
        let columns = body
            .columns()
            .iter()
            .map(|c| c.name().map(str::to_string))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ReplicationError::Protocol(format!("bad relation column: {}", e)))?;

        tracing::debug!("Relation {} is {}.{}", body.rel_id(), schema, table);
        self.on_relation(body.rel_id(), schema, table, columns);
        Ok(())
    }

    fn on_relation(&mut self, rel_id: u32, schema: String, table: String, columns: Vec<String>) {
        self.relations.insert(
            rel_id,
            Relation {
                schema,
                table,
                columns,
            },
        );
    }

    fn dispatch(
        &mut self,
        rel_id: u32,
        op: ChangeOp,
        row: Vec<Option<String>>,
        lsn: PgLsn,
    ) -> Result<(), ReplicationError> {
        let relation = self.relations.get(&rel_id).ok_or_else(|| {
            ReplicationError::Protocol(format!("data message for unknown relation {}", rel_id))
        })?;

        self.sink.handle(RowChange {
            schema: relation.schema.clone(),
            table: relation.table.clone(),
            op,
            columns: relation.columns.clone(),
            row,
            lsn,
            xid: self.current_xid,
        });
        self.changes_routed += 1;
        Ok(())
    }
}

/// Convert a pgoutput tuple into text column values.
fn decode_tuple(tuple: &[TupleData]) -> Result<Vec<Option<String>>, ReplicationError> {
    let mut row = Vec::with_capacity(tuple.len());
    for data in tuple {
        match data {
            TupleData::Null | TupleData::UnchangedToast => row.push(None),
            TupleData::Text(bytes) => row.push(Some(String::from_utf8_lossy(bytes).into_owned())),
            other => {
                return Err(ReplicationError::Protocol(format!(
                    "unsupported tuple data under proto_version 1: {:?}",
                    other
                )))
            }
        }
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingSink {
        changes: Arc<Mutex<Vec<RowChange>>>,
    }

    impl ChangeSink for RecordingSink {
        fn handle(&mut self, change: RowChange) {
            self.changes.lock().unwrap().push(change);
        }
    }

    fn recording_router() -> (ChangeRouter, Arc<Mutex<Vec<RowChange>>>) {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            changes: changes.clone(),
        };
        (ChangeRouter::new(Box::new(sink)), changes)
    }

    #[test]
    fn test_dispatch_to_unknown_relation_is_protocol_error() {
        let (mut router, _) = recording_router();
        let result = router.dispatch(99, ChangeOp::Insert, vec![Some("1".to_string())], PgLsn::from(10));
        assert!(matches!(result, Err(ReplicationError::Protocol(_))));
    }

    #[test]
    fn test_dispatch_forwards_table_and_row_image() {
        let (mut router, changes) = recording_router();
        router.on_relation(
            7,
            "public".to_string(),
            "orders".to_string(),
            vec!["id".to_string(), "name".to_string()],
        );

        router
            .dispatch(
                7,
                ChangeOp::Insert,
                vec![Some("42".to_string()), Some("widget".to_string())],
                PgLsn::from(123),
            )
            .unwrap();

        let changes = changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].table, "orders");
        assert_eq!(changes[0].op, ChangeOp::Insert);
        assert_eq!(changes[0].columns, vec!["id", "name"]);
        assert_eq!(changes[0].row[0].as_deref(), Some("42"));
        assert_eq!(router.changes_routed(), 1);
    }

    #[test]
    fn test_relation_cache_updates_in_place() {
        let (mut router, changes) = recording_router();
        router.on_relation(7, "public".into(), "orders".into(), vec!["id".into()]);
        router.on_relation(7, "public".into(), "orders_v2".into(), vec!["id".into()]);

        router
            .dispatch(7, ChangeOp::Delete, vec![Some("1".to_string())], PgLsn::from(5))
            .unwrap();
        assert_eq!(changes.lock().unwrap()[0].table, "orders_v2");
    }

    #[test]
    fn test_decode_tuple_maps_null_and_toast_to_none() {
        let tuple = vec![
            TupleData::Null,
            TupleData::UnchangedToast,
            TupleData::Text("hello".as_bytes().into()),
        ];
        let row = decode_tuple(&tuple).unwrap();
        assert_eq!(row, vec![None, None, Some("hello".to_string())]);
    }
}
