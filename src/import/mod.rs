//! Syslog file import pipeline.
//!
//! Files announced by the watcher flow through these stages:
//!
//! 1. **Queue** (`queue`) - unbounded multi-producer hand-off to the scheduler
//! 2. **Scheduling** (`scheduler`) - one consumer, one cycle per wake-up, circuit breaker
//! 3. **Per-file processing** (`processor`) - fingerprint, dedup, parse, filter, bulk load
//! 4. **Row filtering** (`filter`) - exclusions, timestamp checks, year correction
//! 5. **Bulk loading** (`bulk_load`) - storage seam, implemented by `crate::database`
//! 6. **Archival** (`archive`) - optional gzip of imported files
//!
//! # Delivery guarantees
//!
//! Staging is truncated at the start of every cycle, so a crash between
//! staging and completion loses nothing durable: unfinished bookkeeping rows
//! are dropped at the same time and the files are imported again. Completed
//! files are remembered in memory (`registry`) and, across restarts, through
//! the bookkeeping table. Content duplicates under a different path are
//! caught by the store through the fingerprint uniqueness constraint.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use syslog_importer::import::ImportScheduler;
//!
//! let mut scheduler = ImportScheduler::new(store, &config.importer);
//! let sender = scheduler.subscribe()?;
//! sender.push("/var/log/remote/syslog_20240101");
//! scheduler.run(cancel).await;
//! ```

pub mod archive;
pub mod bulk_load;
pub mod filter;
pub mod fingerprint;
pub mod parser;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod stats;

pub use archive::Archiver;
pub use bulk_load::{BulkLoadSession, ImportStore};
pub use filter::{DateAnchor, ExclusionSet, RowFilter, correct_year};
pub use fingerprint::{ContentFingerprinter, Fingerprint};
pub use processor::{FileProcessor, ProcessOutcome};
pub use queue::{FileQueue, FileTask, FileTaskSender};
pub use registry::ProcessedFileRegistry;
pub use scheduler::{BatchContext, ImportScheduler, MAX_STORAGE_FAILURES};
pub use stats::{BatchReport, FilterStats};
