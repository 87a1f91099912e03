//! # conductor-supervisor
//!
//! Lifecycle and crash recovery for detached agent daemons.
//!
//! The supervisor launches each agent session as an independent OS process,
//! remembers it in a durable registry, and on the next start re-attaches only
//! those daemons that prove they are still the process it launched. A pid alone
//! proves nothing after a restart because the OS recycles pids; the proof is a
//! `daemon_started` event in the session stream carrying the same pid and the
//! per-spawn nonce.
//!
//! ## Design Principles
//!
//! - **Synchronous**: no async runtime. Stream reads during rehydration run
//!   one record at a time so registry writes stay ordered.
//! - **Not thread-safe**: callers serialize operations per session.
//! - **Fail closed on identity, fail loud on durability**: anything that
//!   cannot be verified is pruned or skipped; registry write failures are
//!   always returned.

pub mod config;
pub mod error;
pub mod health;
pub mod launcher;
pub mod logging;
pub mod monitor;
pub mod registry;
pub mod rehydrate;
pub mod storage;
pub mod streams;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use error::{Result, SupervisorError};
pub use health::{is_process_running, StopSignal};
pub use launcher::{DaemonLauncher, DetachedLauncher};
pub use monitor::{DaemonStats, ProcessMonitor, SpawnedDaemon};
pub use registry::{DaemonRecord, DaemonRegistry};
pub use rehydrate::{rehydrate_daemons_on_boot, RehydrationReport, DEFAULT_ATTEST_GRACE};
pub use storage::StoragePaths;
pub use streams::{FileStreamConnector, StreamClientCache, StreamConnector};
pub use supervisor::{SpawnReceipt, Supervisor};
