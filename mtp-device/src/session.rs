// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

use mtp::ObjectLocation;

/// An object created by SendObjectInfo, awaiting its SendObject content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingUpload {
    /// Where the object was created
    pub location: ObjectLocation,
    /// Object size declared by the host
    pub size: u32,
}

/// Session and transaction state
///
/// Survives across transactions, cleared on CloseSession and device reset.
#[derive(Debug, Default)]
pub(crate) struct Session {
    /// 0 when no session is open
    pub id: u32,
    /// Most recently accepted command's transaction ID
    pub transaction_id: u32,
    pub pending: Option<PendingUpload>,
    /// A storage child enumeration has not yet been ended
    pub iterating: bool,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.id != 0
    }

    pub fn open(&mut self, id: u32) {
        debug_assert!(id != 0);
        self.id = id;
        self.pending = None;
    }

    /// Closes the session, dropping any pending upload.
    pub fn close(&mut self) {
        *self = Self::default();
    }
}
