//! gridplane-kvs — the dependency-aware reconciliation engine.
//!
//! Configuration domains register a `Descriptor` per value type; the
//! engine turns desired-state changes into safely ordered dataplane
//! operations:
//!
//! - Computes a topological operation order across types from each
//!   descriptor's declared dependencies (creates forward, deletes
//!   reverse), rejecting dependency cycles
//! - Defers operations whose dependencies are not yet realized and
//!   replays them automatically once they are
//! - Expands values into independently tracked derived sub-values and
//!   cascade-deletes them with their parent
//! - Resynchronizes by diffing desired state against a full dataplane
//!   dump and applying the minimal corrective set
//!
//! # Architecture
//!
//! ```text
//! KvScheduler
//!   ├── Registry (one Descriptor per value type, immutable after start)
//!   ├── GraphStore (every known key: value, state, metadata, edges)
//!   ├── DependencyResolver (ops parked on their first unmet dependency)
//!   ├── MetadataBroker (per-descriptor name → metadata maps)
//!   └── worker task (serialized transaction queue + notifications)
//! ```

pub mod descriptor;
pub mod engine;
pub mod error;
pub mod graph;
pub mod metadata;
pub mod notify;
pub mod registry;
mod resync;
pub mod txn;

mod resolver;

pub use descriptor::{Dependency, Descriptor, Metadata, ValidationError};
pub use engine::KvScheduler;
pub use error::{KvsError, KvsResult};
pub use graph::{NodeState, ValueStatus};
pub use metadata::{MetadataBroker, MetadataMap, RESERVED_UNSET_INDEX};
pub use notify::{ExternalNotification, NotificationKind, NotificationSender};
pub use registry::Registry;
pub use txn::{KvChange, OpOutcome, OpRecord, TxnKind, TxnResult};
