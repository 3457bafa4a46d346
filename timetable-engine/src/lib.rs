//! Provider-script timetable engine.
//!
//! Turns typed requests ("departures for stop X from provider Y") into
//! sandboxed script jobs on a bounded worker pool, bridges the scripts'
//! downloads onto async I/O without blocking other jobs, publishes parsed
//! records incrementally while jobs run, and caches per-provider
//! capability probes keyed by script modified times.

pub mod capabilities;
pub mod collector;
pub mod config;
pub mod domain;
pub mod network;
pub mod scheduler;
pub mod script;
pub mod storage;
