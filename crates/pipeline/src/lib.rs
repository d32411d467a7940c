//! Certificate-transparency hunting pipeline.
//!
//! ```text
//! StreamSource ─▶ Enricher ─▶ [event queue] ─▶ Matcher × N ─▶ [attribute queue] ─▶ Sink
//!                                                                                    ├─▶ attribute log
//!                                                                                    ├─▶ broadcast
//!                                                                                    └─▶ dedup store
//! ```

pub mod dedup;
pub mod emitter;
pub mod enricher;
pub mod error;
pub mod matcher;
pub mod pipeline;
pub mod rate;
pub mod record_log;
pub mod sink;
pub mod source;

pub use dedup::{DedupStore, MemoryDedupStore, RedisDedupStore};
pub use emitter::AttributeEmitter;
pub use enricher::{registered_domain, registered_domains, Enricher};
pub use error::{PipelineError, SinkError, SourceError, StoreError};
pub use matcher::{MatchReport, Matcher};
pub use pipeline::{Counters, Pipeline, PipelineHandle, PipelineStats, Shutdown, ShutdownTrigger};
pub use rate::{RateCounter, RateMonitor};
pub use record_log::AttributeLog;
pub use sink::{Disposition, Sink};
pub use source::{ChannelSource, JsonLinesSource, StreamSource};
