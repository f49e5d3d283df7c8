pub mod core;
pub mod storage;
pub mod schema;
pub mod index;
pub mod query;
pub mod memory;
pub mod compression;
pub mod parallel;
pub mod migration;

pub use crate::core::config::Config;
pub use crate::core::database::{Database, DEFAULT_DATABASE};
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::manager::DatabaseManager;
pub use crate::core::record::{Field, Record, RecordMeta};
pub use crate::core::stats::{CompressionReport, DatabaseStats, HealthCheckResult, HealthStatus};
pub use crate::core::types::Value;
pub use crate::migration::MigrationReport;
pub use crate::parallel::CancelToken;
pub use crate::query::{Plan, Predicate};
pub use crate::storage::format::Format;

/*
┌──────────────────────────────────── BUCKETDB ARCHITECTURE ─────────────────────────────────┐
│                                                                                             │
│  DatabaseManager ── name → Arc<Database>, default database, Record::DATABASE routing        │
│        │                                                                                    │
│        ▼                                                                                    │
│  ┌──────────────────────────────── struct Database ─────────────────────────────────────┐  │
│  │ engine:   Arc<dyn KvEngine>      // buckets of key → framed bytes                     │  │
│  │ index:    Arc<SecondaryIndex>    // bucket → field → value → keys                     │  │
│  │ matchers: MatcherCache           // TypeId → FieldMatcher<R>                          │  │
│  │ scanner:  ScanEngine             // producer + N workers + collector                  │  │
│  └───────────────────────────────────────────────────────────────────────────────────────┘  │
│                                                                                             │
│  WRITE:  record ─► FieldMatcher::indexable_values ─► SecondaryIndex::update_index           │
│                 ─► Format::encode ─► envelope::encode_with_threshold ─► KvEngine::update    │
│                                                                                             │
│  READ:   Predicate ─► QueryPlanner::plan ─┬─ IndexLookup ─► point gets                      │
│                                           ├─ Scan        ─► ScanEngine (crossbeam)          │
│                                           └─ Empty       ─► []                              │
│                                                                                             │
│  FRAME:  [tag][payload]   0 = none, 1 = gzip, 2 = zlib, 3 = deflate, 4 = lzw                │
│          tags 0 and 1 are also what the old two-codec writer produced                      │
│                                                                                             │
└─────────────────────────────────────────────────────────────────────────────────────────────┘
*/
