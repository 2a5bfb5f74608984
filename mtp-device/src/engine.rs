// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Transfer phase engine
//!
//! A transaction is a command container from the host, an optional data
//! phase in either direction, and a response container to the host. Each
//! of these may span many bulk transfers. The engine tracks progress
//! through a transaction with byte counts in [`Transfer`], and moves
//! between [`Phase`]s as bulk transfers complete.
//!
//! All container bytes pass through a single buffer of
//! [`BUFSIZE`](crate::config::BUFSIZE). Data phases larger than the buffer
//! are handled a window at a time: object content to the host is read
//! from storage into the buffer before each IN transfer, and data from
//! the host is passed to storage whenever the buffer fills.
//!
//! A bulk transfer ends with a short packet. When a data phase is an
//! exact multiple of the maximum packet size, it is terminated with a
//! zero-length packet. The engine sends one after such a data phase to
//! the host, and waits for the host's before responding to a data phase
//! from the host.

#[cfg(feature = "defmt")]
#[allow(unused)]
use defmt::{debug, error, info, trace, warn};

#[cfg(feature = "log")]
#[allow(unused)]
use log::{debug, error, info, trace, warn};

use mtp::{
    BulkPipe, ContainerType, Error, ResponseCode, Result, Storage, HEADER_LEN,
};

use crate::config::{DeviceConfig, BUFSIZE};
use crate::container::{Command, Header};
use crate::dispatch::{dispatch, DataIn, DataOut, Next, Response};
use crate::session::{PendingUpload, Session};
use crate::util::{is_short, round_up};

/// Transaction phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Waiting for a command container
    Idle,
    /// Receiving a command container
    Command,
    /// Sending data to the host
    DataIn,
    /// Receiving data from the host
    DataOut,
    /// Sending a response container
    Response,
    /// Protocol error. Bulk endpoints are stalled until the host clears
    /// the halt, or resets the device.
    Error,
}

#[derive(Debug)]
enum Handler {
    None,
    In(DataIn),
    Out(DataOut),
}

/// Per-transaction byte accounting
///
/// Lengths are wire bytes of the current container, including its header.
#[derive(Debug)]
struct Transfer {
    phase: Phase,
    /// Declared container length. For a data phase from the host this is
    /// 0 until the first chunk arrives.
    total_len: usize,
    /// Bytes that have completed on the wire
    xferred_len: usize,
    /// Bytes consumed by a data handler (or sent, for IN)
    handled_len: usize,
    /// Length of the submitted IN transfer
    queued_len: usize,
    /// No further data windows follow
    completed: bool,
    /// Wire offset of `buf[0]`, during a data phase from the host
    window_start: usize,
    /// Final response code for a data phase to the host
    status: ResponseCode,
    handler: Handler,
    code: u16,
    transaction_id: u32,
}

impl Transfer {
    fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            total_len: 0,
            xferred_len: 0,
            handled_len: 0,
            queued_len: 0,
            completed: false,
            window_start: 0,
            status: ResponseCode::OK,
            handler: Handler::None,
            code: 0,
            transaction_id: 0,
        }
    }

    /// Starts a new phase of the current transaction.
    fn begin(&mut self, phase: Phase, total_len: usize) {
        self.phase = phase;
        self.total_len = total_len;
        self.xferred_len = 0;
        self.handled_len = 0;
        self.queued_len = 0;
        self.completed = false;
        self.window_start = 0;
    }
}

/// MTP device engine
///
/// The engine is driven by three kinds of events, each handled to
/// completion without blocking:
///
/// - [`out_complete()`](Self::out_complete) when a bulk OUT transfer
///   finishes
/// - [`in_complete()`](Self::in_complete) when a bulk IN transfer finishes
/// - [`control_out()`](Self::control_out) and
///   [`control_in()`](Self::control_in) for class control requests
///
/// New transfers are submitted through the [`BulkPipe`] passed to each
/// event. At most one transfer is outstanding per direction.
#[derive(Debug)]
pub struct Engine<'c> {
    pub(crate) config: DeviceConfig<'c>,
    mps: usize,
    buf: [u8; BUFSIZE],
    xfer: Transfer,
    pub(crate) session: Session,
    /// Requested length of the outstanding OUT transfer
    out_armed: Option<usize>,
    /// An IN transfer is outstanding
    in_busy: bool,
}

impl<'c> Engine<'c> {
    /// Create a new `Engine`.
    ///
    /// `max_packet` is the bulk endpoint maximum packet size. `new()` will
    /// panic if it is zero, or does not divide
    /// [`BUFSIZE`](crate::config::BUFSIZE).
    pub fn new(config: DeviceConfig<'c>, max_packet: usize) -> Self {
        assert!(max_packet > 0 && BUFSIZE % max_packet == 0);
        Self {
            config,
            mps: max_packet,
            buf: [0; BUFSIZE],
            xfer: Transfer::idle(),
            session: Session::default(),
            out_armed: None,
            in_busy: false,
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.xfer.phase
    }

    /// Bulk endpoint maximum packet size
    pub fn max_packet(&self) -> usize {
        self.mps
    }

    /// Open session ID, 0 if no session is open
    pub fn session_id(&self) -> u32 {
        self.session.id
    }

    /// Transaction ID of the most recent command
    pub fn transaction_id(&self) -> u32 {
        self.session.transaction_id
    }

    /// An object awaiting SendObject
    pub fn pending_upload(&self) -> Option<&PendingUpload> {
        self.session.pending.as_ref()
    }

    /// Starts listening for commands.
    ///
    /// Called once the bulk endpoints are configured, and again after
    /// [`bus_reset()`](Self::bus_reset).
    pub fn open<P: BulkPipe>(&mut self, pipe: &mut P) -> Result<()> {
        if self.xfer.phase == Phase::Idle && self.out_armed.is_none() {
            self.arm(pipe, BUFSIZE)?;
        }
        Ok(())
    }

    /// Handles a USB bus reset or deconfiguration.
    ///
    /// Any transaction is dropped, the session is closed, and storage is
    /// reset. Outstanding transfers are assumed to have been discarded by
    /// the USB device core.
    pub fn bus_reset<S: Storage>(&mut self, storage: &mut S) {
        debug!("bus reset");
        self.drop_transaction(storage);
        storage.reset();
        self.session.close();
        self.out_armed = None;
    }

    /// Handles completion of a bulk OUT transfer.
    ///
    /// `data` is the received data. Returns the resulting phase.
    pub fn out_complete<S: Storage, P: BulkPipe>(
        &mut self,
        storage: &mut S,
        pipe: &mut P,
        data: &[u8],
    ) -> Phase {
        let Some(requested) = self.out_armed.take() else {
            warn!("OUT completion without transfer");
            return self.xfer.phase;
        };

        let r = if data.len() > requested {
            warn!("OUT overrun {} > {}", data.len(), requested);
            Err(Error::RxFailure)
        } else {
            match self.xfer.phase {
                Phase::Idle | Phase::Command => {
                    self.command_out(storage, pipe, data, requested)
                }
                Phase::DataOut => {
                    self.data_out(storage, pipe, data, requested)
                }
                p => {
                    warn!("OUT data in {:?} phase", p);
                    Err(Error::InvalidInput)
                }
            }
        };

        if let Err(e) = r {
            self.fail(storage, pipe, e)
        }
        self.xfer.phase
    }

    /// Handles completion of a bulk IN transfer.
    ///
    /// `n` is the number of bytes sent. Returns the resulting phase.
    /// Completions of transfers abandoned by a cancel or reset are
    /// ignored.
    pub fn in_complete<S: Storage, P: BulkPipe>(
        &mut self,
        storage: &mut S,
        pipe: &mut P,
        n: usize,
    ) -> Phase {
        if !self.in_busy {
            trace!("stale IN completion");
            return self.xfer.phase;
        }
        self.in_busy = false;

        let r = if n > self.xfer.queued_len {
            warn!("IN overrun {} > {}", n, self.xfer.queued_len);
            Err(Error::TxFailure)
        } else {
            match self.xfer.phase {
                Phase::DataIn => self.data_in(storage, pipe, n),
                Phase::Response => self.response_sent(pipe, n),
                _ => Ok(()),
            }
        };

        if let Err(e) = r {
            self.fail(storage, pipe, e)
        }
        self.xfer.phase
    }

    /// Recovers from the [`Error`](Phase::Error) phase once the host has
    /// cleared the endpoint halt.
    pub fn clear_halt<P: BulkPipe>(&mut self, pipe: &mut P) -> Result<()> {
        if self.xfer.phase != Phase::Error {
            return Ok(());
        }
        debug!("halt cleared");
        pipe.clear_stall();
        self.xfer = Transfer::idle();
        self.arm(pipe, BUFSIZE)
    }

    fn arm<P: BulkPipe>(&mut self, pipe: &mut P, len: usize) -> Result<()> {
        debug_assert!(self.out_armed.is_none(), "OUT already armed");
        debug_assert!(len > 0 && len % self.mps == 0);
        pipe.receive(len)?;
        self.out_armed = Some(len);
        Ok(())
    }

    /// Submits `len` bytes of the buffer to the host.
    fn submit<P: BulkPipe>(&mut self, pipe: &mut P, len: usize) -> Result<()> {
        debug_assert!(!self.in_busy, "IN already busy");
        pipe.send(&self.buf[..len])?;
        self.in_busy = true;
        self.xfer.queued_len = len;
        Ok(())
    }

    /// Stalls the bulk endpoints after a protocol error.
    fn fail<S: Storage, P: BulkPipe>(
        &mut self,
        storage: &mut S,
        pipe: &mut P,
        e: Error,
    ) {
        warn!("MTP error {} in {:?} phase, stalling", e, self.xfer.phase);
        if matches!(self.xfer.phase, Phase::DataIn | Phase::DataOut) {
            storage.cancel();
        }
        self.abandon(storage, pipe);
        pipe.stall();
        self.out_armed = None;
        self.xfer.phase = Phase::Error;
    }

    /// Drops the current transaction, discarding an outstanding IN
    /// transfer.
    pub(crate) fn abandon<S: Storage, P: BulkPipe>(
        &mut self,
        storage: &mut S,
        pipe: &mut P,
    ) {
        if self.in_busy {
            trace!("aborting IN transfer");
            pipe.abort_in();
        }
        self.drop_transaction(storage);
    }

    /// Drops the current transaction. A completion for an outstanding IN
    /// transfer will be ignored.
    fn drop_transaction<S: Storage>(&mut self, storage: &mut S) {
        if self.session.iterating {
            storage.children_done();
            self.session.iterating = false;
        }
        self.xfer = Transfer::idle();
        self.in_busy = false;
    }

    /// Re-arms the OUT endpoint for a new command, unless a transfer is
    /// already outstanding.
    pub(crate) fn listen<P: BulkPipe>(&mut self, pipe: &mut P) -> Result<()> {
        if self.out_armed.is_none() {
            self.arm(pipe, BUFSIZE)?;
        }
        Ok(())
    }

    pub(crate) fn is_busy(&self) -> bool {
        matches!(self.xfer.phase, Phase::DataIn | Phase::DataOut)
    }

    fn command_out<S: Storage, P: BulkPipe>(
        &mut self,
        storage: &mut S,
        pipe: &mut P,
        data: &[u8],
        requested: usize,
    ) -> Result<()> {
        let n = data.len();

        if self.xfer.phase == Phase::Idle {
            if n == 0 {
                // trailing zero-length packet from a previous data phase
                trace!("ZLP while idle");
                return self.arm(pipe, BUFSIZE);
            }

            let hdr = Header::decode(data).inspect_err(|_| {
                warn!("bad container header");
            })?;
            if hdr.typ != ContainerType::Command {
                warn!("expected command container, got {:?}", hdr.typ);
                return Err(Error::InvalidInput);
            }
            let total = hdr.len as usize;
            if total > BUFSIZE {
                debug_assert!(false, "command container exceeds buffer");
                return Err(Error::NoSpace);
            }

            self.xfer.begin(Phase::Command, total);
            self.xfer.code = hdr.code;
            self.xfer.transaction_id = hdr.transaction_id;
        }

        let x = &mut self.xfer;
        let start = x.xferred_len;
        let end = start + n;
        if end > x.total_len {
            warn!("command longer than declared");
            return Err(Error::InvalidInput);
        }
        self.buf[start..end].copy_from_slice(data);
        x.xferred_len = end;
        x.handled_len = end;

        if end < x.total_len {
            if is_short(n, self.mps) || n < requested {
                warn!("command truncated at {} of {}", end, x.total_len);
                return Err(Error::InvalidInput);
            }
            let want = round_up(x.total_len - end, self.mps);
            return self.arm(pipe, want);
        }

        self.command(storage, pipe)
    }

    /// Runs the command stage with a complete command container.
    fn command<S: Storage, P: BulkPipe>(
        &mut self,
        storage: &mut S,
        pipe: &mut P,
    ) -> Result<()> {
        let cmd = Command::decode(&self.buf[..self.xfer.total_len])?;
        self.session.transaction_id = cmd.transaction_id;

        let next = dispatch(
            &cmd,
            &mut self.session,
            storage,
            &self.config,
            &mut self.buf,
        );

        match next {
            Next::Response(r) => self.respond(pipe, r),
            Next::DataIn { len, total, source } => {
                trace!("MTP {:#x}: data in phase, {} bytes", cmd.code, total);
                let x = &mut self.xfer;
                x.begin(Phase::DataIn, total);
                x.handler = Handler::In(source);
                x.status = ResponseCode::OK;
                x.completed = len >= total;
                if len < total.min(BUFSIZE) {
                    debug!("short read, {} of {}", len, total.min(BUFSIZE));
                    x.status = ResponseCode::INCOMPLETE_TRANSFER;
                    x.completed = true;
                }
                self.submit(pipe, len)
            }
            Next::DataOut(h) => {
                trace!("MTP {:#x}: data out phase", cmd.code);
                let x = &mut self.xfer;
                x.begin(Phase::DataOut, 0);
                x.handler = Handler::Out(h);
                self.arm(pipe, BUFSIZE)
            }
        }
    }

    fn data_in<S: Storage, P: BulkPipe>(
        &mut self,
        storage: &mut S,
        pipe: &mut P,
        n: usize,
    ) -> Result<()> {
        let x = &mut self.xfer;
        x.xferred_len += n;
        x.handled_len = x.xferred_len;

        if is_short(n, self.mps) {
            // wire transfer has ended
            let r = Response::new(x.status);
            return self.respond(pipe, r);
        }

        if x.completed {
            trace!("data in ZLP");
            return self.submit(pipe, 0);
        }

        let Handler::In(source) = x.handler else {
            return Err(Error::Other);
        };
        let want = (x.total_len - x.xferred_len).min(BUFSIZE);
        let offset = (x.xferred_len - HEADER_LEN) as u64;

        let len = match source.fill(storage, offset, &mut self.buf[..want]) {
            Ok(got) => {
                let got = got.min(want);
                if got < want {
                    debug!("short read at {}, {} of {}", offset, got, want);
                    x.status = ResponseCode::INCOMPLETE_TRANSFER;
                    x.completed = true;
                } else if x.xferred_len + got >= x.total_len {
                    x.completed = true;
                }
                got
            }
            Err(code) => {
                debug!("read failed at {}: {}", offset, code);
                x.status = code;
                x.completed = true;
                0
            }
        };
        self.submit(pipe, len)
    }

    fn data_out<S: Storage, P: BulkPipe>(
        &mut self,
        storage: &mut S,
        pipe: &mut P,
        data: &[u8],
        requested: usize,
    ) -> Result<()> {
        let n = data.len();
        let x = &mut self.xfer;

        if x.total_len > 0 && x.xferred_len == x.total_len {
            // container ended on a full packet, the host terminates the
            // transfer with a zero-length packet
            if n != 0 {
                warn!("data beyond declared length {}", x.total_len);
                return Err(Error::InvalidInput);
            }
            trace!("data out ZLP");
            return self.data_out_end(pipe);
        }

        if x.xferred_len == 0 {
            // first chunk starts with the container header
            let hdr = Header::decode(data).inspect_err(|_| {
                warn!("bad data container header");
            })?;
            if hdr.typ != ContainerType::Data {
                warn!("expected data container, got {:?}", hdr.typ);
                return Err(Error::InvalidInput);
            }
            if hdr.transaction_id != x.transaction_id {
                debug!(
                    "data transaction {} for command {}",
                    hdr.transaction_id, x.transaction_id
                );
            }
            x.total_len = hdr.len as usize;
            x.handled_len = HEADER_LEN;
        }

        let fill = x.xferred_len - x.window_start;
        let end = x.xferred_len + n;
        if end > x.total_len {
            warn!("data beyond declared length {}", x.total_len);
            return Err(Error::InvalidInput);
        }
        self.buf[fill..fill + n].copy_from_slice(data);
        x.xferred_len = end;

        // a transfer shorter than requested ended with a short packet
        let short = is_short(n, self.mps) || n < requested;
        let done = short || end == x.total_len;
        let space = BUFSIZE - (end - x.window_start);
        if done || space < self.mps {
            self.drain(storage, done);
        }

        if done {
            if !short {
                // wait for the zero-length packet before responding
                return self.arm(pipe, self.mps);
            }
            return self.data_out_end(pipe);
        }

        let x = &mut self.xfer;
        let space = BUFSIZE - (x.xferred_len - x.window_start);
        let want = round_up(x.total_len - x.xferred_len, self.mps)
            .min(space / self.mps * self.mps);
        self.arm(pipe, want)
    }

    /// Finishes a data phase from the host once the wire transfer has
    /// ended.
    fn data_out_end<P: BulkPipe>(&mut self, pipe: &mut P) -> Result<()> {
        let x = &mut self.xfer;
        let Handler::Out(h) = &mut x.handler else {
            return Err(Error::Other);
        };
        if x.xferred_len < x.total_len {
            debug!("data ended at {} of {}", x.xferred_len, x.total_len);
            h.incomplete();
        }
        let r = h.finish();
        self.respond(pipe, r)
    }

    /// Passes buffered host data to the data handler.
    fn drain<S: Storage>(&mut self, storage: &mut S, last: bool) {
        let x = &mut self.xfer;
        let start = x.handled_len - x.window_start;
        let end = x.xferred_len - x.window_start;
        let offset = (x.handled_len - HEADER_LEN) as u64;

        if let Handler::Out(h) = &mut x.handler {
            let window = &self.buf[start..end];
            h.data(storage, &mut self.session, window, offset, last);
        }
        x.handled_len = x.xferred_len;
        x.window_start = x.xferred_len;
    }

    fn respond<P: BulkPipe>(
        &mut self,
        pipe: &mut P,
        r: Response,
    ) -> Result<()> {
        let tid = self.xfer.transaction_id;
        let len = r.encode(&mut self.buf, tid)?;
        trace!("MTP {:#x}: response phase, {}", self.xfer.code, r.code);

        let x = &mut self.xfer;
        x.begin(Phase::Response, len);
        x.handler = Handler::None;
        self.submit(pipe, len)
    }

    fn response_sent<P: BulkPipe>(
        &mut self,
        pipe: &mut P,
        n: usize,
    ) -> Result<()> {
        let x = &mut self.xfer;
        x.xferred_len += n;
        if !is_short(n, self.mps) {
            return self.submit(pipe, 0);
        }
        trace!("transaction {} complete", x.transaction_id);
        self.xfer = Transfer::idle();
        self.listen(pipe)
    }
}
