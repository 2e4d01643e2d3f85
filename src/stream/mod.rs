// ABOUTME: Streaming replication path: session lifecycle, consumer loop, change routing
// ABOUTME: Consumes a logical replication stream with durable checkpoints and feedback

pub mod consumer;
pub mod router;
pub mod session;

pub use consumer::StreamConsumer;
pub use router::{ChangeOp, ChangeRouter, ChangeSink, LogSink, RowChange};
pub use session::{ConnectAttempt, ReplicationSession, SessionConfig, SessionState};
