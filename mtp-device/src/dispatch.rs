// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Operation handlers
//!
//! The command stage of each operation runs here. It either responds
//! immediately, or starts a data phase and returns the handler that
//! services it.

#[cfg(feature = "defmt")]
#[allow(unused)]
use defmt::{debug, error, info, trace, warn};

#[cfg(feature = "log")]
#[allow(unused)]
use log::{debug, error, info, trace, warn};

use heapless::Vec;
use num_traits::FromPrimitive;

use mtp::{
    device_prop, ContainerType, ObjectHandle, OpCode, ResponseCode, Storage,
    StorageId, StorageResult, HEADER_LEN, MAX_PARAMS,
};

use crate::config::{DeviceConfig, MAX_STORAGES};
use crate::container::{Command, Container};
use crate::dataset::{self, HostObjectInfo};
use crate::session::{PendingUpload, Session};

/// Operations handled by the device, as reported in DeviceInfo
pub const OPERATIONS: [OpCode; 15] = [
    OpCode::GetDeviceInfo,
    OpCode::OpenSession,
    OpCode::CloseSession,
    OpCode::GetStorageIds,
    OpCode::GetStorageInfo,
    OpCode::GetNumObjects,
    OpCode::GetObjectHandles,
    OpCode::GetObjectInfo,
    OpCode::GetObject,
    OpCode::DeleteObject,
    OpCode::SendObjectInfo,
    OpCode::SendObject,
    OpCode::FormatStore,
    OpCode::GetDevicePropDesc,
    OpCode::GetDevicePropValue,
];

/// A response to be sent to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Response {
    pub code: ResponseCode,
    pub params: Vec<u32, MAX_PARAMS>,
}

impl Response {
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            params: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(ResponseCode::OK)
    }

    fn with_params(code: ResponseCode, params: &[u32]) -> Self {
        let mut r = Self::new(code);
        let fit = r.params.extend_from_slice(params);
        debug_assert!(fit.is_ok(), "too many response params");
        r
    }

    /// Encodes the response container into `buf`, returning the length.
    pub fn encode(
        &self,
        buf: &mut [u8],
        transaction_id: u32,
    ) -> mtp::Result<usize> {
        let mut c = Container::new(
            buf,
            ContainerType::Response,
            self.code.0,
            transaction_id,
        )?;
        for p in &self.params {
            c.append(*p)?;
        }
        Ok(c.len())
    }
}

/// Outcome of the command stage
#[derive(Debug)]
pub(crate) enum Next {
    Response(Response),
    /// A data container has been written to the buffer.
    ///
    /// `len` bytes are in the buffer, of `total` bytes on the wire.
    DataIn {
        len: usize,
        total: usize,
        source: DataIn,
    },
    DataOut(DataOut),
}

/// Provides data-to-host windows after the first
#[derive(Debug, Clone, Copy)]
pub(crate) enum DataIn {
    /// The whole container is in the buffer
    Buffered,
    /// Object content, streamed from storage
    Object(ObjectHandle),
}

impl DataIn {
    /// Fills `out` with content starting at payload `offset`.
    pub fn fill<S: Storage>(
        &self,
        storage: &mut S,
        offset: u64,
        out: &mut [u8],
    ) -> StorageResult<usize> {
        match self {
            Self::Buffered => Ok(0),
            Self::Object(h) => storage.read_object(*h, offset, out),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum OutKind {
    ObjectInfo {
        storage: StorageId,
        parent: ObjectHandle,
    },
    Object(ObjectHandle),
    Discard,
}

/// Consumes data-from-host windows
///
/// The first failure is recorded and later windows are discarded, so
/// that the host's data phase can run to completion before the failure
/// is reported in the response.
#[derive(Debug)]
pub(crate) struct DataOut {
    kind: OutKind,
    status: ResponseCode,
    params: Vec<u32, MAX_PARAMS>,
}

impl DataOut {
    fn new(kind: OutKind) -> Self {
        Self {
            kind,
            status: ResponseCode::OK,
            params: Vec::new(),
        }
    }

    /// Drains the host's data then responds with `code`.
    fn refuse(code: ResponseCode) -> Self {
        Self {
            kind: OutKind::Discard,
            status: code,
            params: Vec::new(),
        }
    }

    /// Handles a window of payload at `offset`.
    ///
    /// `last` is set for the final window of the data phase.
    pub fn data<S: Storage>(
        &mut self,
        storage: &mut S,
        session: &mut Session,
        window: &[u8],
        offset: u64,
        last: bool,
    ) {
        if !self.status.is_ok() {
            return;
        }

        let r = match self.kind {
            OutKind::ObjectInfo { storage: sid, parent } => {
                if last {
                    self.create(storage, session, sid, parent, window)
                } else {
                    warn!("ObjectInfo dataset larger than buffer");
                    Err(ResponseCode::INVALID_DATASET)
                }
            }
            OutKind::Object(h) if !window.is_empty() => {
                storage.write_object(h, offset, window)
            }
            _ => Ok(()),
        };

        if let Err(code) = r {
            debug!("data phase failed {}", code);
            self.status = code;
        }
    }

    fn create<S: Storage>(
        &mut self,
        storage: &mut S,
        session: &mut Session,
        sid: StorageId,
        parent: ObjectHandle,
        payload: &[u8],
    ) -> StorageResult<()> {
        let info = HostObjectInfo::parse(payload)
            .map_err(|_| ResponseCode::INVALID_DATASET)?;
        let loc = storage.create_object(sid, parent, &info.as_info())?;
        trace!("created object {}", loc.handle.0);

        session.pending = Some(PendingUpload {
            location: loc,
            size: info.header.compressed_size,
        });
        self.params.clear();
        let fit = self.params.extend_from_slice(&[
            loc.storage.0,
            loc.parent.0,
            loc.handle.0,
        ]);
        debug_assert!(fit.is_ok(), "too many response params");
        Ok(())
    }

    /// Records that the host sent less data than it declared.
    pub fn incomplete(&mut self) {
        if self.status.is_ok() {
            self.status = ResponseCode::INCOMPLETE_TRANSFER;
        }
    }

    /// Returns the operation's response once the data phase is complete.
    pub fn finish(&mut self) -> Response {
        if self.status.is_ok() {
            Response::with_params(self.status, &self.params)
        } else {
            Response::new(self.status)
        }
    }
}

/// Runs the command stage for `cmd`.
pub(crate) fn dispatch<S: Storage>(
    cmd: &Command,
    session: &mut Session,
    storage: &mut S,
    config: &DeviceConfig,
    buf: &mut [u8],
) -> Next {
    let Some(op) =
        OpCode::from_u16(cmd.code).filter(|op| OPERATIONS.contains(op))
    else {
        debug!("unsupported operation {:#x}", cmd.code);
        return Next::Response(Response::new(
            ResponseCode::OPERATION_NOT_SUPPORTED,
        ));
    };

    trace!("MTP {:?}: command phase", op);

    if !session.is_open()
        && !matches!(op, OpCode::GetDeviceInfo | OpCode::OpenSession)
    {
        let code = ResponseCode::SESSION_NOT_OPEN;
        return match op {
            // the host sends a data phase regardless
            OpCode::SendObjectInfo | OpCode::SendObject => {
                Next::DataOut(DataOut::refuse(code))
            }
            _ => Next::Response(Response::new(code)),
        };
    }

    let mut h = Handler {
        cmd,
        session,
        storage,
        buf,
    };

    let r = match op {
        OpCode::GetDeviceInfo => h.device_info(config),
        OpCode::OpenSession => h.open_session(),
        OpCode::CloseSession => h.close_session(),
        OpCode::GetStorageIds => h.storage_ids(),
        OpCode::GetStorageInfo => h.storage_info(),
        OpCode::GetNumObjects => h.num_objects(),
        OpCode::GetObjectHandles => h.object_handles(),
        OpCode::GetObjectInfo => h.object_info(),
        OpCode::GetObject => h.object(),
        OpCode::DeleteObject => h.delete_object(),
        OpCode::SendObjectInfo => h.send_object_info(),
        OpCode::SendObject => h.send_object(),
        OpCode::FormatStore => h.format_store(),
        OpCode::GetDevicePropDesc => h.prop_desc(config),
        OpCode::GetDevicePropValue => h.prop_value(config),
        _ => Err(ResponseCode::OPERATION_NOT_SUPPORTED),
    };

    r.unwrap_or_else(|code| {
        debug!("MTP {:?}: failed {}", op, code);
        Next::Response(Response::new(code))
    })
}

fn encode_err(e: mtp::Error) -> ResponseCode {
    warn!("dataset encoding failed: {}", e);
    ResponseCode::GENERAL_ERROR
}

fn buffered(c: Container) -> Next {
    let len = c.len();
    Next::DataIn {
        len,
        total: len,
        source: DataIn::Buffered,
    }
}

/// Enumerates the children given by the command's storage and parent
/// parameters. The format parameter is ignored.
///
/// The enumeration is always ended with `children_done()`, including on
/// early failure.
fn children<S: Storage>(
    storage: &mut S,
    session: &mut Session,
    cmd: &Command,
    mut f: impl FnMut(ObjectHandle) -> StorageResult<()>,
) -> StorageResult<()> {
    let sid = StorageId(cmd.param(0));
    let parent = ObjectHandle(cmd.param(2));

    session.iterating = true;
    let r = loop {
        match storage.next_child(sid, parent) {
            Ok(Some(h)) => {
                if let Err(e) = f(h) {
                    break Err(e);
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    storage.children_done();
    session.iterating = false;
    r
}

struct Handler<'h, S: Storage> {
    cmd: &'h Command,
    session: &'h mut Session,
    storage: &'h mut S,
    buf: &'h mut [u8],
}

impl<S: Storage> Handler<'_, S> {
    fn data(&mut self) -> StorageResult<Container<'_>> {
        Container::new(
            &mut *self.buf,
            ContainerType::Data,
            self.cmd.code,
            self.cmd.transaction_id,
        )
        .map_err(encode_err)
    }

    fn device_info(&mut self, config: &DeviceConfig) -> StorageResult<Next> {
        let ops = OPERATIONS.map(|op| op as u16);
        let mut c = self.data()?;
        dataset::write_device_info(&mut c, config, &ops).map_err(encode_err)?;
        Ok(buffered(c))
    }

    fn open_session(&mut self) -> StorageResult<Next> {
        let id = self.cmd.param(0);
        if id == 0 {
            return Err(ResponseCode::INVALID_PARAMETER);
        }
        if self.session.is_open() {
            return Ok(Next::Response(Response::with_params(
                ResponseCode::SESSION_ALREADY_OPEN,
                &[self.session.id],
            )));
        }
        self.storage.open_session(id)?;
        self.session.open(id);
        debug!("session {} open", id);
        Ok(Next::Response(Response::ok()))
    }

    fn close_session(&mut self) -> StorageResult<Next> {
        self.storage.close_session()?;
        debug!("session {} closed", self.session.id);
        self.session.close();
        Ok(Next::Response(Response::ok()))
    }

    fn storage_ids(&mut self) -> StorageResult<Next> {
        let mut ids = [StorageId(0); MAX_STORAGES];
        let n = self.storage.storage_ids(&mut ids)?.min(MAX_STORAGES);
        let mut c = self.data()?;
        c.append(n as u32).map_err(encode_err)?;
        for id in &ids[..n] {
            c.append(id.0).map_err(encode_err)?;
        }
        Ok(buffered(c))
    }

    fn storage_info(&mut self) -> StorageResult<Next> {
        let sid = StorageId(self.cmd.param(0));
        let Self { cmd, storage, buf, .. } = self;
        let info = storage.storage_info(sid)?;
        let mut c = Container::new(
            buf,
            ContainerType::Data,
            cmd.code,
            cmd.transaction_id,
        )
        .map_err(encode_err)?;
        dataset::write_storage_info(&mut c, &info).map_err(encode_err)?;
        Ok(buffered(c))
    }

    fn num_objects(&mut self) -> StorageResult<Next> {
        let mut count = 0u32;
        children(&mut *self.storage, self.session, self.cmd, |_| {
            count += 1;
            Ok(())
        })?;
        Ok(Next::Response(Response::with_params(
            ResponseCode::OK,
            &[count],
        )))
    }

    fn object_handles(&mut self) -> StorageResult<Next> {
        let Self {
            cmd,
            session,
            storage,
            buf,
        } = self;
        let mut c = Container::new(
            buf,
            ContainerType::Data,
            cmd.code,
            cmd.transaction_id,
        )
        .map_err(encode_err)?;
        c.append(0u32).map_err(encode_err)?;

        children(&mut **storage, session, cmd, |handle| {
            c.append_object_handle(handle).map_err(|_| {
                warn!("too many objects for handle list");
                ResponseCode::GENERAL_ERROR
            })
        })?;
        Ok(buffered(c))
    }

    fn object_info(&mut self) -> StorageResult<Next> {
        let handle = ObjectHandle(self.cmd.param(0));
        let Self { cmd, storage, buf, .. } = self;
        let info = storage.object_info(handle)?;
        let mut c = Container::new(
            buf,
            ContainerType::Data,
            cmd.code,
            cmd.transaction_id,
        )
        .map_err(encode_err)?;
        dataset::write_object_info(&mut c, &info).map_err(encode_err)?;
        Ok(buffered(c))
    }

    fn object(&mut self) -> StorageResult<Next> {
        let handle = ObjectHandle(self.cmd.param(0));
        let size = self.storage.object_info(handle)?.size as usize;
        let total = size
            .checked_add(HEADER_LEN)
            .filter(|t| u32::try_from(*t).is_ok())
            .ok_or(ResponseCode::OBJECT_TOO_LARGE)?;

        let Self { cmd, storage, buf, .. } = self;
        let mut c = Container::new(
            buf,
            ContainerType::Data,
            cmd.code,
            cmd.transaction_id,
        )
        .map_err(encode_err)?;

        // First window fills the buffer, later windows are whole buffers
        let tail = c.tail();
        let want = tail.len().min(size);
        let got = storage.read_object(handle, 0, &mut tail[..want])?;
        c.commit_tail(got).map_err(encode_err)?;
        c.set_streamed_len(total as u32).map_err(encode_err)?;

        Ok(Next::DataIn {
            len: c.len(),
            total,
            source: DataIn::Object(handle),
        })
    }

    fn delete_object(&mut self) -> StorageResult<Next> {
        let handle = ObjectHandle(self.cmd.param(0));
        self.storage.delete_object(handle)?;
        if self
            .session
            .pending
            .is_some_and(|p| p.location.handle == handle)
        {
            self.session.pending = None;
        }
        Ok(Next::Response(Response::ok()))
    }

    fn send_object_info(&mut self) -> StorageResult<Next> {
        // a new ObjectInfo replaces any earlier one
        self.session.pending = None;
        Ok(Next::DataOut(DataOut::new(OutKind::ObjectInfo {
            storage: StorageId(self.cmd.param(0)),
            parent: ObjectHandle(self.cmd.param(1)),
        })))
    }

    fn send_object(&mut self) -> StorageResult<Next> {
        let out = match self.session.pending.take() {
            Some(p) => DataOut::new(OutKind::Object(p.location.handle)),
            None => DataOut::refuse(ResponseCode::NO_VALID_OBJECT_INFO),
        };
        Ok(Next::DataOut(out))
    }

    fn format_store(&mut self) -> StorageResult<Next> {
        self.storage.format_store(StorageId(self.cmd.param(0)))?;
        self.session.pending = None;
        Ok(Next::Response(Response::ok()))
    }

    fn prop_desc(&mut self, config: &DeviceConfig) -> StorageResult<Next> {
        let code = self.friendly_name_prop()?;
        let mut c = self.data()?;
        dataset::write_string_prop_desc(
            &mut c,
            code,
            config.friendly_name,
            config.friendly_name,
        )
        .map_err(encode_err)?;
        Ok(buffered(c))
    }

    fn prop_value(&mut self, config: &DeviceConfig) -> StorageResult<Next> {
        self.friendly_name_prop()?;
        let mut c = self.data()?;
        c.append_wstring(config.friendly_name).map_err(encode_err)?;
        Ok(buffered(c))
    }

    fn friendly_name_prop(&self) -> StorageResult<u16> {
        let code = self.cmd.param(0);
        if code == device_prop::DEVICE_FRIENDLY_NAME as u32 {
            Ok(device_prop::DEVICE_FRIENDLY_NAME)
        } else {
            Err(ResponseCode::DEVICE_PROP_NOT_SUPPORTED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BUFSIZE;
    use mtp_memfs::MemFs;

    fn command(code: u16, params: &[u32]) -> Command {
        Command {
            code,
            transaction_id: 1,
            params: Vec::from_slice(params).unwrap(),
        }
    }

    fn response(next: Next) -> Response {
        match next {
            Next::Response(r) => r,
            n => panic!("expected response, got {n:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "too many response params")]
    fn response_params_overflow() {
        Response::with_params(ResponseCode::OK, &[0; MAX_PARAMS + 1]);
    }

    #[test]
    fn session_required() {
        let mut fs = MemFs::<4, 64>::new();
        let mut session = Session::default();
        let config = DeviceConfig::default();
        let mut buf = [0u8; BUFSIZE];

        let cmd = command(OpCode::GetStorageIds as u16, &[]);
        let r = dispatch(&cmd, &mut session, &mut fs, &config, &mut buf);
        assert_eq!(response(r).code, ResponseCode::SESSION_NOT_OPEN);

        let cmd = command(OpCode::GetDeviceInfo as u16, &[]);
        let r = dispatch(&cmd, &mut session, &mut fs, &config, &mut buf);
        assert!(matches!(r, Next::DataIn { .. }));

        // data phase still runs
        let cmd = command(OpCode::SendObject as u16, &[]);
        let r = dispatch(&cmd, &mut session, &mut fs, &config, &mut buf);
        let Next::DataOut(mut out) = r else {
            panic!("expected data out");
        };
        assert_eq!(out.finish().code, ResponseCode::SESSION_NOT_OPEN);
    }

    #[test]
    fn open_session() {
        let mut fs = MemFs::<4, 64>::new();
        let mut session = Session::default();
        let config = DeviceConfig::default();
        let mut buf = [0u8; BUFSIZE];
        let mut open = |id| {
            let cmd = command(OpCode::OpenSession as u16, &[id]);
            response(dispatch(&cmd, &mut session, &mut fs, &config, &mut buf))
        };

        assert_eq!(open(0).code, ResponseCode::INVALID_PARAMETER);
        assert_eq!(open(5), Response::ok());
        let r = open(6);
        assert_eq!(r.code, ResponseCode::SESSION_ALREADY_OPEN);
        assert_eq!(r.params.as_slice(), &[5]);
        assert_eq!(session.id, 5);
        assert_eq!(fs.session(), Some(5));
    }

    #[test]
    fn every_operation_handled() {
        let mut fs = MemFs::<4, 64>::new();
        let mut session = Session::default();
        session.open(1);
        let config = DeviceConfig::default();
        let mut buf = [0u8; BUFSIZE];

        for op in OPERATIONS {
            let cmd = command(op as u16, &[]);
            let r = dispatch(&cmd, &mut session, &mut fs, &config, &mut buf);
            if let Next::Response(r) = r {
                assert_ne!(r.code, ResponseCode::OPERATION_NOT_SUPPORTED);
            }
            if !session.is_open() {
                session.open(1);
            }
        }

        let cmd = command(OpCode::GetThumb as u16, &[]);
        let r = dispatch(&cmd, &mut session, &mut fs, &config, &mut buf);
        assert_eq!(response(r).code, ResponseCode::OPERATION_NOT_SUPPORTED);

        let cmd = command(0x9999, &[]);
        let r = dispatch(&cmd, &mut session, &mut fs, &config, &mut buf);
        assert_eq!(response(r).code, ResponseCode::OPERATION_NOT_SUPPORTED);
    }

    #[test]
    fn device_props() {
        let mut fs = MemFs::<4, 64>::new();
        let mut session = Session::default();
        session.open(1);
        let config = DeviceConfig::default();
        let mut buf = [0u8; BUFSIZE];

        let cmd = command(OpCode::GetDevicePropValue as u16, &[0x5001]);
        let r = dispatch(&cmd, &mut session, &mut fs, &config, &mut buf);
        assert_eq!(response(r).code, ResponseCode::DEVICE_PROP_NOT_SUPPORTED);

        let cmd = command(
            OpCode::GetDevicePropValue as u16,
            &[device_prop::DEVICE_FRIENDLY_NAME as u32],
        );
        let r = dispatch(&cmd, &mut session, &mut fs, &config, &mut buf);
        let Next::DataIn { len, total, .. } = r else {
            panic!("expected data in");
        };
        assert_eq!(len, total);
        let mut rd = crate::container::Reader::new(&buf[HEADER_LEN..len]);
        assert_eq!(rd.get_string::<32>().unwrap(), config.friendly_name);
    }

    #[test]
    fn out_failure_recorded() {
        let mut fs = MemFs::<4, 64>::new();
        let mut session = Session::default();
        session.open(1);

        let mut out = DataOut::new(OutKind::ObjectInfo {
            storage: StorageId(0),
            parent: ObjectHandle(0),
        });
        out.data(&mut fs, &mut session, &[0u8; 10], 0, false);
        out.data(&mut fs, &mut session, &[], 10, true);
        assert_eq!(out.finish().code, ResponseCode::INVALID_DATASET);
        assert!(session.pending.is_none());
    }
}
