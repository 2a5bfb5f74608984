// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use mtp::{
    ClassRequest, ContainerType, EventCode, ObjectHandle, OpCode,
    ResponseCode, HEADER_LEN,
};
use mtp_device::container::Reader;
use mtp_device::dataset::OBJECT_INFO_HEADER_LEN;
use mtp_device::Phase;
use mtp_memfs::{MemFs, STORAGE_ID};

use proptest::prelude::*;

use host::*;

type Fs = MemFs<8, 4096>;

fn op(o: OpCode) -> u16 {
    o as u16
}

#[test]
fn session_scenario() {
    start_log();
    let mut h = Host::new(Fs::with_readme(), 64);

    let r = h.transact(op(OpCode::GetStorageIds), &[], None);
    assert_eq!(r.response.code, ResponseCode::SESSION_NOT_OPEN);

    h.open_session(1);
    assert_eq!(h.engine.session_id(), 1);

    let r = h.transact(op(OpCode::GetStorageIds), &[], None);
    assert_eq!(r.response.code, ResponseCode::OK);
    let data = r.data.unwrap();
    let mut rd = Reader::new(&data);
    assert_eq!(rd.u32().unwrap(), 1);
    assert_eq!(rd.u32().unwrap(), STORAGE_ID.0);

    let r = h.transact(op(OpCode::GetObjectInfo), &[1], None);
    assert_eq!(r.response.code, ResponseCode::OK);
    let data = r.data.unwrap();
    let mut rd = Reader::new(&data[OBJECT_INFO_HEADER_LEN..]);
    assert_eq!(read_string(&mut rd), "readme.txt");

    let info = object_info_dataset(&file_info("hello.txt", 5));
    let r = h.transact(op(OpCode::SendObjectInfo), &[0, 0], Some(&info));
    assert_eq!(r.response.code, ResponseCode::OK);
    assert_eq!(
        r.response.params,
        [STORAGE_ID.0, ObjectHandle::ROOT.0, 2]
    );
    assert!(h.engine.pending_upload().is_some());

    let r = h.transact(op(OpCode::SendObject), &[], Some(b"hello"));
    assert_eq!(r.response.code, ResponseCode::OK);
    assert!(h.engine.pending_upload().is_none());
    assert_eq!(h.storage.content(ObjectHandle(2)), Some(&b"hello"[..]));

    let r = h.transact(op(OpCode::GetObject), &[2], None);
    assert_eq!(r.response.code, ResponseCode::OK);
    assert_eq!(r.data.unwrap(), b"hello");

    let r = h.transact(op(OpCode::GetNumObjects), &[0xFFFF_FFFF], None);
    assert_eq!(r.response.params, [2]);

    let r = h.transact(op(OpCode::DeleteObject), &[2], None);
    assert_eq!(r.response.code, ResponseCode::OK);
    let r = h.transact(op(OpCode::DeleteObject), &[2], None);
    assert_eq!(r.response.code, ResponseCode::INVALID_OBJECT_HANDLE);

    let r = h.transact(op(OpCode::CloseSession), &[], None);
    assert_eq!(r.response.code, ResponseCode::OK);
    assert_eq!(h.engine.session_id(), 0);
    assert_eq!(h.engine.phase(), Phase::Idle);
}

#[test]
fn device_info() {
    start_log();
    let mut h = Host::new(Fs::new(), 64);
    let r = h.transact(op(OpCode::GetDeviceInfo), &[], None);
    assert_eq!(r.response.code, ResponseCode::OK);
    let data = r.data.unwrap();
    let mut rd = Reader::new(&data);
    // standard version, vendor extension id, version
    assert_eq!(rd.u16().unwrap(), 100);
    assert_eq!(rd.u32().unwrap(), 6);
    assert_eq!(rd.u16().unwrap(), 100);
    assert_eq!(read_string(&mut rd), "microsoft.com: 1.0; ");
    // functional mode
    rd.u16().unwrap();
    let n = rd.u32().unwrap() as usize;
    assert_eq!(n, mtp_device::OPERATIONS.len());
    for o in mtp_device::OPERATIONS {
        assert_eq!(rd.u16().unwrap(), op(o));
    }
}

#[test]
fn send_object_without_info() {
    start_log();
    let mut h = Host::new(Fs::new(), 64);
    h.open_session(1);
    let r = h.transact(op(OpCode::SendObject), &[], Some(&[7u8; 200]));
    assert_eq!(r.response.code, ResponseCode::NO_VALID_OBJECT_INFO);
    assert!(h.storage.is_empty());
    assert_eq!(h.engine.phase(), Phase::Idle);
}

#[test]
fn send_object_info_without_session() {
    start_log();
    let mut h = Host::new(Fs::new(), 64);
    let info = object_info_dataset(&file_info("a", 1));
    let r = h.transact(op(OpCode::SendObjectInfo), &[], Some(&info));
    assert_eq!(r.response.code, ResponseCode::SESSION_NOT_OPEN);
    assert!(h.storage.is_empty());
}

#[test]
fn empty_enumeration() {
    start_log();
    let mut h = Host::new(Tally::new(Fs::new()), 64);
    h.open_session(1);

    let r = h.transact(
        op(OpCode::GetObjectHandles),
        &[0xFFFF_FFFF, 0, ObjectHandle::ROOT.0],
        None,
    );
    assert_eq!(r.response.code, ResponseCode::OK);
    assert_eq!(r.data.unwrap(), [0, 0, 0, 0]);
    assert_eq!(h.storage.children_done, 1);

    let r = h.transact(op(OpCode::GetNumObjects), &[0xFFFF_FFFF], None);
    assert_eq!(r.response.params, [0]);
    assert_eq!(h.storage.children_done, 2);

    // failed enumeration is also ended
    let r = h.transact(op(OpCode::GetObjectHandles), &[0x1234], None);
    assert_eq!(r.response.code, ResponseCode::INVALID_STORAGE_ID);
    assert_eq!(h.storage.children_done, 3);
}

#[test]
fn object_handles() {
    start_log();
    let mut fs = Fs::with_readme();
    let dir = fs
        .add_object(
            ObjectHandle::NONE,
            "dir",
            mtp::format::ASSOCIATION,
            mtp::protection::NONE,
            &[],
        )
        .unwrap();
    fs.add_object(dir, "x", mtp::format::TEXT, mtp::protection::NONE, b"x")
        .unwrap();
    let mut h = Host::new(fs, 64);
    h.open_session(1);

    let r = h.transact(
        op(OpCode::GetObjectHandles),
        &[STORAGE_ID.0, 0, ObjectHandle::ROOT.0],
        None,
    );
    let data = r.data.unwrap();
    let mut rd = Reader::new(&data);
    assert_eq!(rd.u32().unwrap(), 2);
    assert_eq!(rd.u32().unwrap(), 1);
    assert_eq!(rd.u32().unwrap(), dir.0);

    let r =
        h.transact(op(OpCode::GetObjectHandles), &[STORAGE_ID.0, 0, 0], None);
    assert_eq!(&r.data.unwrap()[..4], &3u32.to_le_bytes());
}

#[test]
fn read_failure() {
    start_log();
    let mut fs = Fs::new();
    let content = [0x5a; 2000];
    fs.add_object(
        ObjectHandle::NONE,
        "big",
        mtp::format::UNDEFINED,
        mtp::protection::NONE,
        &content,
    )
    .unwrap();
    let mut tally = Tally::new(fs);
    tally.fail_read_at = Some(500);
    let mut h = Host::new(tally, 64);
    h.open_session(1);

    let r = h.transact(op(OpCode::GetObject), &[1], None);
    assert_eq!(r.response.code, ResponseCode::ACCESS_DENIED);
    // first buffer, then a zero-length packet ends the data phase
    assert_eq!(r.data_len, 2000 + HEADER_LEN);
    assert_eq!(r.data.unwrap().len(), 500);
    let lens: Vec<usize> = r.data_transfers.iter().map(|t| t.len()).collect();
    assert_eq!(lens, [512, 0]);
    assert_eq!(h.engine.phase(), Phase::Idle);
}

#[test]
fn short_object_read() {
    start_log();
    let mut h = Host::new(Fs::new(), 64);
    h.open_session(1);
    let info = object_info_dataset(&file_info("short", 100));
    let r = h.transact(op(OpCode::SendObjectInfo), &[], Some(&info));
    let handle = r.response.params[2];

    // host sends less than declared
    let tid = h.send_command(op(OpCode::SendObject), &[]);
    let c = raw_container(
        ContainerType::Data,
        op(OpCode::SendObject),
        tid,
        HEADER_LEN + 100,
        &[1; 10],
    );
    h.transfers.clear();
    h.send(&c);
    h.pump();
    let r = h.reply();
    assert_eq!(r.response.code, ResponseCode::INCOMPLETE_TRANSFER);

    // object is shorter than its size
    let r = h.transact(op(OpCode::GetObject), &[handle], None);
    assert_eq!(r.response.code, ResponseCode::INCOMPLETE_TRANSFER);
    assert_eq!(r.data_len, 100 + HEADER_LEN);
    assert_eq!(r.data.unwrap(), [1; 10]);
}

#[test]
fn stray_zlp_ignored() {
    start_log();
    let mut h = Host::new(Fs::new(), 64);
    h.out.push_back(Vec::new());
    h.pump();
    assert_eq!(h.engine.phase(), Phase::Idle);
    assert!(h.transfers.is_empty());
    h.open_session(3);
}

#[test]
fn bad_container_stalls() {
    start_log();
    let mut h = Host::new(Fs::new(), 64);
    let c = container(ContainerType::Data, 0x1001, 1, &[]);
    h.send(&c);
    h.pump();
    assert_eq!(h.engine.phase(), Phase::Error);
    assert!(h.pipe.stalled);
    assert!(h.pipe.armed.is_none());

    h.engine.clear_halt(&mut h.pipe).unwrap();
    assert!(!h.pipe.stalled);
    assert_eq!(h.engine.phase(), Phase::Idle);
    h.open_session(1);
}

#[test]
#[should_panic(expected = "exceeds buffer")]
fn oversize_command() {
    let mut h = Host::new(Fs::new(), 64);
    let c = raw_container(ContainerType::Command, 0x1002, 1, 600, &[0; 52]);
    h.send(&c);
    h.pump();
}

/// Uploads `content` as a new object.
fn upload(h: &mut Host<Fs>, content: &[u8]) -> ObjectHandle {
    let info = object_info_dataset(&file_info("up", content.len() as u32));
    let r = h.transact(op(OpCode::SendObjectInfo), &[], Some(&info));
    assert_eq!(r.response.code, ResponseCode::OK);
    let handle = ObjectHandle(r.response.params[2]);
    let r = h.transact(op(OpCode::SendObject), &[], Some(content));
    assert_eq!(r.response.code, ResponseCode::OK);
    handle
}

#[test]
fn send_object_packet_boundaries() {
    start_log();
    let mut h = Host::new(Fs::new(), 64);
    h.open_session(1);
    // containers of one packet, one transfer, and a transfer plus a packet
    for total in [64, 128, 512, 576, 1024] {
        let content = vec![total as u8; total - HEADER_LEN];
        let handle = upload(&mut h, &content);
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert_eq!(h.storage.content(handle), Some(&content[..]));
    }
    let r = h.transact(op(OpCode::GetNumObjects), &[0xFFFF_FFFF], None);
    assert_eq!(r.response.params, [5]);
}

#[test]
fn data_out_waits_for_zlp() {
    start_log();
    let mut h = Host::new(Fs::new(), 64);
    h.open_session(1);
    let content = [0x42; 512 - HEADER_LEN];
    let info = object_info_dataset(&file_info("up", content.len() as u32));
    let r = h.transact(op(OpCode::SendObjectInfo), &[], Some(&info));
    let handle = ObjectHandle(r.response.params[2]);

    h.transfers.clear();
    h.zlp = false;
    let code = op(OpCode::SendObject);
    let tid = h.send_command(code, &[]);
    h.send(&container(ContainerType::Data, code, tid, &content));
    h.zlp = true;
    h.pump();

    // no response until the data phase ends on the wire
    assert_eq!(h.engine.phase(), Phase::DataOut);
    assert!(h.pipe.queued.is_none());
    assert_eq!(h.pipe.armed, Some(64));
    assert!(h.transfers.is_empty());

    h.out.push_back(Vec::new());
    h.pump();
    let r = h.reply();
    assert_eq!(r.response.code, ResponseCode::OK);
    assert_eq!(r.response.tid, tid);
    assert_eq!(h.engine.phase(), Phase::Idle);
    assert_eq!(h.storage.content(handle), Some(&content[..]));
}

#[test]
fn data_after_full_container_stalls() {
    start_log();
    let mut h = Host::new(Fs::new(), 64);
    h.open_session(1);
    let content = [0x42; 512 - HEADER_LEN];
    let info = object_info_dataset(&file_info("up", content.len() as u32));
    h.transact(op(OpCode::SendObjectInfo), &[], Some(&info));

    h.zlp = false;
    let code = op(OpCode::SendObject);
    let tid = h.send_command(code, &[]);
    h.send(&container(ContainerType::Data, code, tid, &content));
    h.pump();
    assert_eq!(h.engine.phase(), Phase::DataOut);

    h.out.push_back(vec![1, 2, 3, 4]);
    h.pump();
    assert_eq!(h.engine.phase(), Phase::Error);
    assert!(h.pipe.stalled);
}

/// Drives a fresh device into `phase`, with a session open.
fn enter_phase(phase: Phase) -> Host<Tally<Fs>> {
    let mut fs = Fs::new();
    fs.add_object(
        ObjectHandle::NONE,
        "big",
        mtp::format::UNDEFINED,
        mtp::protection::NONE,
        &[3; 3000],
    )
    .unwrap();
    let mut h = Host::new(Tally::new(fs), 64);
    h.open_session(1);
    h.transfers.clear();

    match phase {
        Phase::DataIn => {
            h.send_command(op(OpCode::GetObject), &[1]);
            h.step();
        }
        Phase::DataOut => {
            h.send_command(op(OpCode::SendObjectInfo), &[]);
            h.step();
        }
        Phase::Response => {
            h.send_command(op(OpCode::GetNumObjects), &[0xFFFF_FFFF]);
            h.step();
        }
        Phase::Error => {
            let c = container(ContainerType::Response, 0x2001, 9, &[]);
            h.send(&c);
            h.step();
        }
        _ => (),
    }
    assert_eq!(h.engine.phase(), phase);
    h
}

const PHASES: [Phase; 5] = [
    Phase::Idle,
    Phase::DataIn,
    Phase::DataOut,
    Phase::Response,
    Phase::Error,
];

#[test]
fn reset_from_any_phase() {
    start_log();
    for phase in PHASES {
        let mut h = enter_phase(phase);
        h.control_out(ClassRequest::DeviceReset as u8, &[]).unwrap();
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert_eq!(h.engine.session_id(), 0);
        assert_eq!(h.storage.resets, 1);
        assert!(!h.pipe.stalled);
        // the host never reads an abandoned IN transfer
        assert!(h.pipe.queued.is_none());
        assert!(h.pipe.armed.is_some());

        let r = h.transact(op(OpCode::GetStorageIds), &[], None);
        assert_eq!(r.response.code, ResponseCode::SESSION_NOT_OPEN);
        h.open_session(2);
    }
}

#[test]
fn bus_reset_from_any_phase() {
    start_log();
    for phase in PHASES {
        let mut h = enter_phase(phase);
        h.engine.bus_reset(&mut h.storage);
        // the device core discards transfers
        h.pipe = Pipe::default();
        h.out.clear();
        h.engine.open(&mut h.pipe).unwrap();

        assert_eq!(h.engine.phase(), Phase::Idle);
        assert_eq!(h.engine.session_id(), 0);
        assert_eq!(h.storage.resets, 1);
        h.open_session(2);
    }
}

fn cancel_data(tid: u32) -> [u8; 6] {
    let mut d = [0u8; 6];
    let code = EventCode::CancelTransaction as u16;
    d[..2].copy_from_slice(&code.to_le_bytes());
    d[2..].copy_from_slice(&tid.to_le_bytes());
    d
}

#[test]
fn cancel_keeps_session() {
    start_log();
    for phase in [Phase::DataIn, Phase::DataOut, Phase::Response] {
        let mut h = enter_phase(phase);
        let tid = h.engine.transaction_id();
        h.control_out(ClassRequest::Cancel as u8, &cancel_data(tid))
            .unwrap();
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert_eq!(h.engine.session_id(), 1);
        assert_eq!(h.storage.cancels, 1);
        assert!(h.pipe.queued.is_none());

        // next command follows directly
        let r = h.transact(op(OpCode::GetObjectInfo), &[1], None);
        assert_eq!(r.response.code, ResponseCode::OK);
    }
}

#[test]
fn cancel_then_data_in() {
    start_log();
    let mut h = enter_phase(Phase::DataIn);
    let tid = h.engine.transaction_id();
    h.control_out(ClassRequest::Cancel as u8, &cancel_data(tid))
        .unwrap();

    let r = h.transact(op(OpCode::GetObject), &[1], None);
    assert_eq!(r.response.code, ResponseCode::OK);
    assert_eq!(r.data.unwrap(), [3; 3000]);
}

#[test]
fn cancel_short_data() {
    let mut h = enter_phase(Phase::DataIn);
    assert!(h.control_out(ClassRequest::Cancel as u8, &[1, 0x40]).is_err());
}

#[test]
fn device_status() {
    start_log();
    let mut buf = [0u8; 8];
    for phase in PHASES {
        let h = enter_phase(phase);
        let n = h
            .engine
            .control_in(ClassRequest::GetDeviceStatus as u8, &mut buf)
            .unwrap();
        assert_eq!(n, 4);
        let code = u16::from_le_bytes([buf[2], buf[3]]);
        let busy = matches!(phase, Phase::DataIn | Phase::DataOut);
        assert_eq!(buf[..2], [4, 0]);
        if busy {
            assert_eq!(ResponseCode(code), ResponseCode::DEVICE_BUSY);
        } else {
            assert_eq!(ResponseCode(code), ResponseCode::OK);
        }
    }

    let h = enter_phase(Phase::Idle);
    assert!(h
        .engine
        .control_in(ClassRequest::GetExtendedEventData as u8, &mut buf)
        .is_err());
    assert!(h.engine.control_in(0x10, &mut buf).is_err());
}

#[test]
fn stale_in_completion() {
    start_log();
    let mut h = Host::new(Fs::new(), 64);
    let phase = h.engine.in_complete(&mut h.storage, &mut h.pipe, 12);
    assert_eq!(phase, Phase::Idle);
    assert!(h.pipe.queued.is_none());
}

proptest! {
    #[test]
    fn get_object_chunking(
        size in 0usize..3000,
        mps in prop::sample::select(vec![16usize, 64, 512]),
    ) {
        let content: Vec<u8> = (0..size).map(|i| i as u8).collect();
        let mut fs = Fs::new();
        fs.add_object(
            ObjectHandle::NONE,
            "f",
            mtp::format::UNDEFINED,
            mtp::protection::NONE,
            &content,
        )
        .unwrap();
        let mut h = Host::new(fs, mps);
        h.open_session(1);

        let r = h.transact(op(OpCode::GetObject), &[1], None);
        prop_assert_eq!(r.response.code, ResponseCode::OK);
        prop_assert_eq!(r.data_len, size + HEADER_LEN);
        prop_assert_eq!(r.data.unwrap(), content);

        // a zero-length packet follows only a full final packet
        let total = size + HEADER_LEN;
        let zlps = r.data_transfers.iter().filter(|t| t.is_empty()).count();
        prop_assert_eq!(zlps, usize::from(total % mps == 0));
        prop_assert_eq!(h.engine.phase(), Phase::Idle);
    }

    #[test]
    fn send_object_chunking(
        size in 0usize..3000,
        mps in prop::sample::select(vec![16usize, 64, 512]),
    ) {
        let content: Vec<u8> = (0..size).map(|i| (i * 7) as u8).collect();
        let mut h = Host::new(Fs::new(), mps);
        h.open_session(1);

        let info = object_info_dataset(&file_info("up", size as u32));
        let r = h.transact(op(OpCode::SendObjectInfo), &[], Some(&info));
        prop_assert_eq!(r.response.code, ResponseCode::OK);
        let handle = ObjectHandle(r.response.params[2]);

        let r = h.transact(op(OpCode::SendObject), &[], Some(&content));
        prop_assert_eq!(r.response.code, ResponseCode::OK);
        prop_assert_eq!(h.storage.content(handle).unwrap(), &content[..]);

        // the trailing ZLP doesn't disturb the next transaction
        let r = h.transact(op(OpCode::OpenSession), &[1], None);
        prop_assert_eq!(r.response.code, ResponseCode::SESSION_ALREADY_OPEN);
        prop_assert_eq!(r.response.params, vec![1]);
        prop_assert_eq!(h.engine.phase(), Phase::Idle);
    }
}
