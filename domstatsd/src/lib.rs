//! # domstatsd Library
//!
//! In-memory metrics aggregation core of the domstats monitoring daemon.
//! Holds the authoritative live RRD state for the host and every running
//! guest, samples a dynamic set of plugin producers through the wire
//! protocol, and keeps that state consistent across restarts, guest
//! migration and pool topology changes.
//!
//! ## Components
//!
//! - [`store`]: mutex-guarded host slot + guest RRD table
//! - [`registry`]: generic plugin registry, instantiated for local
//!   file-backed and interdomain page-backed producers
//! - [`sync`]: backup, push, migrate, archive and legacy recovery
//! - [`ha`]: high-availability latency tracker
//! - [`context`]: process-wide owner of every table and its lock
//!
//! ## Lock discipline
//!
//! Each resource group carries its own lock (store, each registry, the
//! memory-target table, the cache-SR slot, HA stats); no operation holds
//! two of them at once, and none is held across disk, network or
//! foreign-memory I/O. Outbound transfers work on deep copies snapshotted
//! under the store lock.

pub mod context;
pub mod ha;
pub mod registry;
pub mod rrd;
pub mod store;
pub mod sync;
