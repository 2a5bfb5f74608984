// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Still Image class control requests
//!
//! These arrive on the control endpoint and may interrupt a transaction
//! in any phase.

#[cfg(feature = "defmt")]
#[allow(unused)]
use defmt::{debug, error, info, trace, warn};

#[cfg(feature = "log")]
#[allow(unused)]
use log::{debug, error, info, trace, warn};

use num_traits::FromPrimitive;

use mtp::{
    BulkPipe, ClassRequest, Error, EventCode, ResponseCode, Result, Storage,
};

use crate::container::Reader;
use crate::engine::{Engine, Phase};

/// Length of the Cancel request data
pub const CANCEL_LEN: usize = 6;

/// Length of the GetDeviceStatus response
pub const DEVICE_STATUS_LEN: usize = 4;

impl Engine<'_> {
    /// Handles a host-to-device class request.
    ///
    /// `request` is the `bRequest` field, `data` the data stage.
    /// Returns an error if the request should be rejected.
    pub fn control_out<S: Storage, P: BulkPipe>(
        &mut self,
        storage: &mut S,
        pipe: &mut P,
        request: u8,
        data: &[u8],
    ) -> Result<()> {
        match ClassRequest::from_u8(request) {
            Some(ClassRequest::Cancel) => {
                let mut r = Reader::new(data);
                let code = r.u16()?;
                let tid = r.u32()?;
                if code != EventCode::CancelTransaction as u16 {
                    debug!("unexpected cancel code {:#x}", code);
                }
                self.cancel(storage, pipe, tid)
            }
            Some(ClassRequest::DeviceReset) => self.reset(storage, pipe),
            Some(r) => {
                debug!("unsupported class request {:?}", r);
                Err(Error::Unsupported)
            }
            None => {
                debug!("unknown class request {:#x}", request);
                Err(Error::Unsupported)
            }
        }
    }

    /// Handles a device-to-host class request.
    ///
    /// The response is written to `buf`, returning its length. Returns an
    /// error if the request should be rejected.
    pub fn control_in(&self, request: u8, buf: &mut [u8]) -> Result<usize> {
        match ClassRequest::from_u8(request) {
            Some(ClassRequest::GetDeviceStatus) => {
                let out = buf
                    .get_mut(..DEVICE_STATUS_LEN)
                    .ok_or(Error::NoSpace)?;
                let code = if self.is_busy() {
                    ResponseCode::DEVICE_BUSY
                } else {
                    ResponseCode::OK
                };
                let len = DEVICE_STATUS_LEN as u16;
                out[..2].copy_from_slice(&len.to_le_bytes());
                out[2..].copy_from_slice(&code.0.to_le_bytes());
                Ok(DEVICE_STATUS_LEN)
            }
            // GetExtendedEventData is not implemented
            _ => Err(Error::Unsupported),
        }
    }

    /// Abandons the current transaction, keeping the session.
    fn cancel<S: Storage, P: BulkPipe>(
        &mut self,
        storage: &mut S,
        pipe: &mut P,
        tid: u32,
    ) -> Result<()> {
        debug!("cancel transaction {} in {:?} phase", tid, self.phase());
        let stalled = self.phase() == Phase::Error;
        self.abandon(storage, pipe);
        storage.cancel();
        if stalled {
            pipe.clear_stall();
        }
        self.listen(pipe)
    }

    /// Returns the device to idle, closing the session.
    fn reset<S: Storage, P: BulkPipe>(
        &mut self,
        storage: &mut S,
        pipe: &mut P,
    ) -> Result<()> {
        debug!("device reset in {:?} phase", self.phase());
        self.abandon(storage, pipe);
        storage.reset();
        self.session.close();
        pipe.clear_stall();
        self.listen(pipe)
    }
}
