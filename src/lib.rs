//! This crate exposes the internal functionality of the netsweep
//! reachability scanner.
//!
//! netsweep answers one question for a set of address/port pairs: can a
//! connection be established within a bounded time? Targets come from octet
//! ranges (`192.168.1.10-192.168.1.50`), CIDR blocks or single hosts, and are
//! probed concurrently without ever holding more sockets than the process's
//! open file limit allows.
//!
//! ## Architecture Overview
//!
//! 1. **Target expansion**: [`address::expand`] turns an expression and a
//!    port set into an ordered list of [`Target`](device::Target)s,
//!    address-major and port-minor.
//! 2. **Concurrency budget**: [`budget::infer_budget`] reads the open file
//!    limit once per scanner.
//! 3. **Admission**: a [`ConcurrencyLimiter`](scanner::ConcurrencyLimiter)
//!    hands out one permit per in-flight probe.
//! 4. **Probing**: a [`PortProbe`](scanner::PortProbe) connects with a
//!    timeout and backs off while the process is out of file descriptors.
//! 5. **Assembly**: the [`Scanner`](scanner::Scanner) joins every probe and
//!    returns one [`Device`](device::Device) per target, in target order.
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use netsweep::budget::infer_budget_or_default;
//! use netsweep::input::ScanConfig;
//! use netsweep::scanner::Scanner;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScanConfig::builder()
//!         .ports([80, 554])
//!         .timeout(Duration::from_millis(500))
//!         .return_only_open(true)
//!         .build()?;
//!
//!     let scanner = Scanner::new(config, infer_budget_or_default());
//!     for device in scanner.run(&["192.168.1.1-192.168.1.254"]).await? {
//!         println!("{device}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Only structural problems abort a scan: a malformed address expression,
//! an unreadable open file limit, or a limiter that was closed or cancelled.
//! Refused, timed out and unreachable targets simply come back closed.
#![allow(clippy::needless_doctest_main)]
#![warn(missing_docs)]

pub mod tui;

pub mod input;

pub mod address;

pub mod budget;

pub mod device;

pub mod error;

pub mod scanner;

pub use error::ScanError;
