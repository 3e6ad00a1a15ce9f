#![allow(clippy::result_large_err)]
#![allow(clippy::large_enum_variant)]

//! `libsystemd` is the core library for systemd-rs: the dependency-aware
//! unit manager that runs as PID 1 (`systemd`).
//!
//! It contains:
//! - Unit name algebra (escaping, templating, type derivation)
//! - Unit file (fragment) parsing, INI-style with systemd extensions
//! - The bidirectional dependency graph and job transaction engine
//! - Per-type unit state machines (service, socket, mount, timer, ...)
//! - The single-threaded cooperative event loop
//! - Configuration loading and logging setup

pub mod cgroup;
pub mod conditions;
pub mod config;
pub mod control;
pub mod entrypoints;
pub mod error;
pub mod event_loop;
pub mod fragment;
pub mod job;
pub mod logging;
pub mod manager;
pub mod mount_table;
pub mod notification_handler;
pub mod relation;
pub mod serialize;
pub mod services;
pub mod store;
pub mod unit_name;
pub mod units;
