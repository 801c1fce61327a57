//! LPAR DR Sync - Cross-Site Reconciliation Engine
//!
//! Keeps the storage definitions of IBM Power partitions identical between
//! the nominal site and the PRA (disaster recovery) site, so that the
//! partitions can be activated at PRA.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              DR Orchestrator                                 │
//! │   Discover → Normalize → ReconcileNominal → ReconcilePra → Verify            │
//! │                                                        └→ Ready | Blocked    │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    Identity     │  │   Reconciler    │  │   Cross-Site Consistency    │  │
//! │  │ normalize/names │  │  plan │ apply   │  │          Checker            │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                   │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                              Ports                                           │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │      Inventory Source       │  │       Storage State Source          │   │
//! │  │   (HMC dump, memory)        │  │   (JSON file array, memory)         │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`identity`]: WWPN/MAC normalization and the naming convention
//! - [`reconcile`]: site state, planner, applier and consistency checker
//! - [`orchestrator`]: run state machine, locks, reports and metrics
//! - [`adapters`]: inventory and array implementations of the ports
//! - [`domain`]: core domain types and ports
//! - [`config`]: YAML run configuration
//! - [`error`]: Error types and handling

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod reconcile;
pub mod retry;

// Re-export commonly used types
pub use adapters::{HmcDumpInventory, JsonFileArray, MemoryArray, MemoryInventory};

pub use config::DrConfig;

pub use domain::model::{
    ActualStorageObject, DesiredStorageObject, PartitionIdentity, RawPartition, Site,
    SnapshotReplicationStatus,
};

pub use domain::ports::{
    DiscoveryFilter, InventorySource, InventorySourceRef, StorageStateSource,
    StorageStateSourceRef,
};

pub use error::{Error, ErrorScope, Result};

pub use identity::{normalize_mac, normalize_wwpn, Mac, NamingConfig, NamingConvention, Wwpn};

pub use orchestrator::{
    Orchestrator, OrchestratorConfig, RunReport, RunState, SystemSession, SystemTarget,
};

pub use reconcile::{ConsistencyChecker, Operation, Planner, ReconciliationPlan, WwpnPolicy};

pub use retry::RetryPolicy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
