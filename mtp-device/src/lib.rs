// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! MTP device stack
//!
//! This crate provides the device side of MTP over USB bulk endpoints.
//! An [`Engine`] decodes containers arriving on the bulk OUT endpoint,
//! dispatches operations to a [`Storage`](mtp::Storage) backend, and
//! drives the data and response phases back to the host.
//!
//! The engine is event driven and independent of any particular USB
//! device stack. Transfers are submitted through a [`BulkPipe`](mtp::BulkPipe),
//! and the caller reports their completion with
//! [`out_complete()`](Engine::out_complete) and
//! [`in_complete()`](Engine::in_complete).

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![forbid(unsafe_code)]

#[cfg(not(any(feature = "log", feature = "defmt")))]
compile_error!("Either log or defmt feature must be enabled");
#[cfg(all(feature = "log", feature = "defmt"))]
compile_error!("log and defmt features are mutually exclusive");

#[macro_use]
mod util;

pub mod config;
pub mod container;
pub mod control;
pub mod dataset;
mod dispatch;
mod engine;
mod session;

pub use config::DeviceConfig;
pub use dispatch::OPERATIONS;
pub use engine::{Engine, Phase};
pub use session::PendingUpload;
