// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Configuration
//!
//! Sizes are fixed at build time, and may be set with environment
//! variables when building the crate. Device identity is supplied at
//! runtime with a [`DeviceConfig`].

use mtp::{format, EventCode};

/// Size of the container buffer.
///
/// This bounds the largest command and dataset container, and is the
/// window size when streaming object content.
///
/// Customise with `MTP_BUFSIZE` environment variable. Must be a multiple
/// of 64, and a multiple of the bulk endpoint maximum packet size.
pub const BUFSIZE: usize = get_build_var!("MTP_BUFSIZE", 512);

/// Maximum number of storages reported by GetStorageIDs.
///
/// Customise with `MTP_MAX_STORAGES` environment variable.
pub const MAX_STORAGES: usize = get_build_var!("MTP_MAX_STORAGES", 4);

/// Maximum length of a host-supplied filename, in UTF-8 bytes.
///
/// Longer names are truncated. Customise with `MTP_MAX_FILENAME`
/// environment variable.
pub const MAX_FILENAME: usize = get_build_var!("MTP_MAX_FILENAME", 64);

const _: () = assert!(BUFSIZE >= 64 && BUFSIZE % 64 == 0);
const _: () = assert!(MAX_STORAGES > 0);

/// Device identity, reported in the DeviceInfo dataset
#[derive(Debug, Clone)]
pub struct DeviceConfig<'a> {
    /// Manufacturer name
    pub manufacturer: &'a str,
    /// Model name
    pub model: &'a str,
    /// Device version string
    pub device_version: &'a str,
    /// Serial number. Should be unique for a given model.
    pub serial_number: &'a str,
    /// Device Friendly Name property value
    pub friendly_name: &'a str,
    /// MTP vendor extension description
    pub extension_desc: &'a str,
    /// Events that may be sent on the interrupt endpoint
    pub events: &'a [EventCode],
    /// Formats the device can capture
    pub capture_formats: &'a [u16],
    /// Formats the device can provide and accept
    pub playback_formats: &'a [u16],
}

impl Default for DeviceConfig<'static> {
    fn default() -> Self {
        Self {
            manufacturer: "Code Construct",
            model: "MTP Device",
            device_version: "1.0",
            serial_number: "0",
            friendly_name: "MTP Device",
            extension_desc: "microsoft.com: 1.0; ",
            events: &[
                EventCode::ObjectAdded,
                EventCode::ObjectRemoved,
                EventCode::StoreFull,
            ],
            capture_formats: &[],
            playback_formats: &[
                format::UNDEFINED,
                format::ASSOCIATION,
                format::TEXT,
            ],
        }
    }
}
