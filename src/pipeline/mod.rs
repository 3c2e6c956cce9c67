//! Message scoring pipeline.
//!
//! Every inbound message, from the poller or the HTTP front end, flows through:
//! 1. `ScoringOrchestrator::process()`: scan, redact, classify, aggregate
//! 2. `EventSink::append()`: one structured record per message
//! 3. `Mailbox::acknowledge()`: so the message is not redelivered
//!
//! Classification is advisory. When it is unavailable the event still carries
//! a risk level computed from local signals.

pub mod orchestrator;
pub mod poller;
pub mod risk;
pub mod sink;
pub mod types;

pub use orchestrator::{MAX_BATCH, ScoringOrchestrator, StaticScore, StaticScorer};
pub use poller::{run_once, spawn_poller};
pub use sink::{EventSink, JsonlSink};
pub use types::{EmailEvent, RawMessage, RiskLevel};
