// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */
#![no_std]
#![forbid(unsafe_code)]

mod mtpusb;

pub use mtpusb::{Bulk, Events, MtpUsbClass, State};

/// Bulk maximum packet size for a full-speed device.
pub const MTP_USB_MAX_PACKET_FS: u16 = 64;

/// Bulk maximum packet size for a high-speed device.
pub const MTP_USB_MAX_PACKET_HS: u16 = 512;
