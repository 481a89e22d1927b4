//! Incremental block-level backup engine: unsynced-sector
//! tracking, a kernel-tracer binding, per-device synchronization, and a
//! multi-device backup coordinator, plus the ambient daemon stack
//! (config, logging, locking, and the in-process service façade) needed to
//! run it as a standalone daemon.

pub mod config;
pub mod coordinator;
pub mod device;
pub mod interval;
pub mod lock;
pub mod logging;
pub mod manager;
pub mod service;
pub mod sync;
pub mod tracer;
