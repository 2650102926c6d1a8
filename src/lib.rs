//! tmaxhoc - supervisor for interactive server workloads
//!
//! Runs game servers and similar long-lived console programs inside a tmux
//! session, where an operator can still attach and type into them, and
//! manages them as named units:
//!
//! - a **service** owns the processes its lifecycle driver starts
//! - a **group** bundles other units and derives its status from them
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │        tmaxhocctl  ──socket──►  tmaxhoc          │
//! ├─────────────────────────────────────────────────┤
//! │  Runtime (shared lock, poll task, escalations)  │
//! ├─────────────────────────────────────────────────┤
//! │  Manager: Unit graph  │  Lifecycle drivers      │
//! ├─────────────────────────────────────────────────┤
//! │  Supervisor (reconciliation)  │  tmux backend    │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod drivers;
pub mod manager;
pub mod protocol;
pub mod runtime;
pub mod supervisor;
pub mod units;

pub use manager::{Manager, ManagerError, UnitGraph, UnitStatus};
pub use runtime::{Runtime, SharedManager};
pub use supervisor::{Backend, Supervisor, TmuxBackend};
