// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */
#[cfg(feature = "defmt")]
#[allow(unused)]
use defmt::{debug, error, info, trace, warn};

#[cfg(feature = "log")]
#[allow(unused)]
use log::{debug, error, info, trace, warn};

#[cfg(not(any(feature = "log", feature = "defmt")))]
compile_error!("Either log or defmt feature must be enabled");
#[cfg(all(feature = "log", feature = "defmt"))]
compile_error!("log and defmt features are mutually exclusive");

use core::cell::RefCell;
use core::mem::MaybeUninit;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embassy_usb::control::{
    InResponse, OutResponse, Recipient, Request, RequestType,
};
use embassy_usb::descriptor::{SynchronizationType, UsageType};
use embassy_usb::types::InterfaceNumber;
use embassy_usb::{Builder, Handler};
use embassy_usb_driver::{
    Driver, Endpoint, EndpointError, EndpointIn, EndpointOut, EndpointType,
};
use heapless::Vec;

use mtp::{BulkPipe, EventCode, Storage};
use mtp_device::config::BUFSIZE;
use mtp_device::container::{encode_event, MAX_EVENT_PARAMS};
use mtp_device::{DeviceConfig, Engine};

pub const USB_CLASS_STILL_IMAGE: u8 = 0x06;
pub const STILL_IMAGE_SUBCLASS_CAPTURE: u8 = 0x01;
pub const STILL_IMAGE_PROTOCOL_PIMA15740: u8 = 0x01;

const EVENT_MAX_PACKET: u16 = 64;
const EVENT_INTERVAL_MS: u8 = 10;
const EVENT_LEN: usize = mtp::HEADER_LEN + 4 * MAX_EVENT_PARAMS;

type RawMutex = NoopRawMutex;
type BlockingMutex<T> =
    embassy_sync::blocking_mutex::Mutex<RawMutex, RefCell<T>>;

/// Bulk transfers submitted by the engine, performed by [`Bulk::run()`]
#[derive(Default)]
struct Pending {
    tx: Option<Vec<u8, BUFSIZE>>,
    rx: Option<usize>,
    stalled: bool,
    /// Incremented when an in-flight transfer is abandoned
    epoch: u32,
}

impl Pending {
    /// Drops all transfers, including those in flight.
    fn reset(&mut self) {
        self.tx = None;
        self.rx = None;
        self.stalled = false;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

impl BulkPipe for Pending {
    fn send(&mut self, data: &[u8]) -> mtp::Result<()> {
        if self.tx.is_some() {
            return Err(mtp::Error::TxFailure);
        }
        let v = Vec::from_slice(data).map_err(|_| mtp::Error::NoSpace)?;
        self.tx = Some(v);
        Ok(())
    }

    fn receive(&mut self, len: usize) -> mtp::Result<()> {
        if self.rx.is_some() {
            return Err(mtp::Error::RxFailure);
        }
        self.rx = Some(len);
        Ok(())
    }

    fn abort_in(&mut self) {
        // an IN transfer may be in flight in Bulk::run()
        self.tx = None;
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn stall(&mut self) {
        // embassy-usb classes can't halt an endpoint. Transfers stop
        // until the host resets the device.
        warn!("bulk endpoints halted, waiting for reset");
        self.stalled = true;
        self.tx = None;
        self.rx = None;
    }

    fn clear_stall(&mut self) {
        self.stalled = false;
    }
}

struct Inner<'d, S> {
    engine: Engine<'d>,
    storage: S,
    pipe: Pending,
}

struct Shared<'d, S> {
    inner: BlockingMutex<Inner<'d, S>>,
    /// Raised when a control request or bus event changes the pending
    /// transfers
    changed: Signal<RawMutex, ()>,
}

impl<'d, S: Storage> Shared<'d, S> {
    fn with<R>(&self, f: impl FnOnce(&mut Inner<'d, S>) -> R) -> R {
        self.inner.lock(|i| f(&mut i.borrow_mut()))
    }

    fn epoch(&self) -> u32 {
        self.with(|i| i.pipe.epoch)
    }

    fn bus_reset(&self) {
        self.with(|i| {
            i.engine.bus_reset(&mut i.storage);
            i.pipe.reset();
            if let Err(e) = i.engine.open(&mut i.pipe) {
                warn!("mtp open failed {}", e);
            }
        });
        self.changed.signal(());
    }
}

/// State shared between the control handler and [`Bulk`]
///
/// Must outlive the `UsbDevice`.
pub struct State<'d, S: Storage> {
    control: MaybeUninit<Control<'d, S>>,
    shared: Shared<'d, S>,
}

impl<'d, S: Storage> State<'d, S> {
    /// Creates the state for a device.
    ///
    /// `max_packet` is the bulk endpoint maximum packet size, one of
    /// [`MTP_USB_MAX_PACKET_FS`](crate::MTP_USB_MAX_PACKET_FS) or
    /// [`MTP_USB_MAX_PACKET_HS`](crate::MTP_USB_MAX_PACKET_HS).
    pub fn new(config: DeviceConfig<'d>, storage: S, max_packet: u16) -> Self {
        let inner = Inner {
            engine: Engine::new(config, max_packet as usize),
            storage,
            pipe: Pending::default(),
        };
        Self {
            control: MaybeUninit::uninit(),
            shared: Shared {
                inner: BlockingMutex::new(RefCell::new(inner)),
                changed: Signal::new(),
            },
        }
    }
}

/// Class control requests and bus events
struct Control<'d, S: Storage> {
    shared: &'d Shared<'d, S>,
    iface: InterfaceNumber,
}

impl<S: Storage> Control<'_, S> {
    fn accepts(&self, req: &Request) -> bool {
        req.request_type == RequestType::Class
            && req.recipient == Recipient::Interface
            && req.index == u8::from(self.iface) as u16
    }
}

impl<S: Storage> Handler for Control<'_, S> {
    fn enabled(&mut self, enabled: bool) {
        if !enabled {
            self.shared.bus_reset();
        }
    }

    fn reset(&mut self) {
        self.shared.bus_reset();
    }

    fn control_out(
        &mut self,
        req: Request,
        data: &[u8],
    ) -> Option<OutResponse> {
        if !self.accepts(&req) {
            return None;
        }
        let r = self.shared.with(|i| {
            i.engine
                .control_out(&mut i.storage, &mut i.pipe, req.request, data)
        });
        match r {
            Ok(()) => {
                self.shared.changed.signal(());
                Some(OutResponse::Accepted)
            }
            Err(e) => {
                debug!("class request {:#x} rejected: {}", req.request, e);
                Some(OutResponse::Rejected)
            }
        }
    }

    fn control_in<'a>(
        &'a mut self,
        req: Request,
        buf: &'a mut [u8],
    ) -> Option<InResponse<'a>> {
        if !self.accepts(&req) {
            return None;
        }
        match self.shared.with(|i| i.engine.control_in(req.request, buf)) {
            Ok(n) => Some(InResponse::Accepted(&buf[..n])),
            Err(e) => {
                debug!("class request {:#x} rejected: {}", req.request, e);
                Some(InResponse::Rejected)
            }
        }
    }
}

/// The bulk endpoint pair, driving the MTP engine.
///
/// Returned from [`split()`](MtpUsbClass::split)
pub struct Bulk<'d, D: Driver<'d>, S: Storage> {
    ep_in: D::EndpointIn,
    ep_out: D::EndpointOut,
    shared: &'d Shared<'d, S>,
    mps: usize,
    buf: [u8; BUFSIZE],
}

impl<'d, D: Driver<'d>, S: Storage> Bulk<'d, D, S> {
    /// Wait for a host to connect.
    pub async fn wait_connection(&mut self) {
        self.ep_out.wait_enabled().await
    }

    /// Runs the MTP engine.
    pub async fn run(mut self) -> ! {
        let shared = self.shared;
        // Outer loop for reattaching USB
        loop {
            debug!("mtp usb waiting");
            self.wait_connection().await;
            info!("mtp usb attached");
            shared.with(|i| {
                if let Err(e) = i.engine.open(&mut i.pipe) {
                    warn!("mtp open failed {}", e);
                }
            });

            'transfers: loop {
                let (epoch, tx, rx) = shared.with(|i| {
                    (i.pipe.epoch, i.pipe.tx.take(), i.pipe.rx)
                });

                if let Some(tx) = tx {
                    match self.write(&tx, epoch).await {
                        Ok(true) => shared.with(|i| {
                            if i.pipe.epoch == epoch {
                                i.engine.in_complete(
                                    &mut i.storage,
                                    &mut i.pipe,
                                    tx.len(),
                                );
                            }
                        }),
                        Ok(false) => debug!("IN transfer abandoned"),
                        Err(_e) => {
                            info!("mtp usb disconnected");
                            break 'transfers;
                        }
                    }
                    continue;
                }

                if let Some(len) = rx {
                    match self.read(len, epoch).await {
                        Ok(Some(n)) => {
                            let data = &self.buf[..n];
                            shared.with(|i| {
                                if i.pipe.rx.take().is_some() {
                                    i.engine.out_complete(
                                        &mut i.storage,
                                        &mut i.pipe,
                                        data,
                                    );
                                }
                            });
                        }
                        Ok(None) => debug!("OUT transfer abandoned"),
                        Err(_e) => {
                            info!("mtp usb disconnected");
                            break 'transfers;
                        }
                    }
                    continue;
                }

                // Idle or halted, until a control request or bus event
                if shared.with(|i| i.pipe.stalled) {
                    trace!("mtp usb halted");
                }
                shared.changed.wait().await;
            }
        }
    }

    /// Sends `data` as packets. An empty `data` sends a zero-length
    /// packet.
    ///
    /// Returns `Ok(false)` if the transaction was abandoned.
    async fn write(
        &mut self,
        data: &[u8],
        epoch: u32,
    ) -> Result<bool, EndpointError> {
        let shared = self.shared;
        let mut pos = 0;
        loop {
            let end = (pos + self.mps).min(data.len());
            let pkt = &data[pos..end];
            match select(self.ep_in.write(pkt), shared.changed.wait()).await {
                Either::First(r) => {
                    r?;
                    pos = end;
                    if pos >= data.len() {
                        return Ok(true);
                    }
                }
                Either::Second(()) => {
                    if shared.epoch() != epoch {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Receives up to `len` bytes into the buffer, ending early on a
    /// short packet.
    ///
    /// Returns `Ok(None)` if the transaction was abandoned.
    async fn read(
        &mut self,
        len: usize,
        epoch: u32,
    ) -> Result<Option<usize>, EndpointError> {
        let shared = self.shared;
        let len = len.min(self.buf.len());
        let mut n = 0;
        while n < len {
            let end = (n + self.mps).min(len);
            let chunk = &mut self.buf[n..end];
            match select(self.ep_out.read(chunk), shared.changed.wait()).await
            {
                Either::First(r) => {
                    let l = r?;
                    n += l;
                    if l < self.mps {
                        break;
                    }
                }
                Either::Second(()) => {
                    if shared.epoch() != epoch {
                        return Ok(None);
                    }
                }
            }
        }
        Ok(Some(n))
    }
}

/// The interrupt endpoint for events to the host.
///
/// Returned from [`split()`](MtpUsbClass::split)
pub struct Events<'d, D: Driver<'d>> {
    ep: D::EndpointIn,
    buf: [u8; EVENT_LEN],
}

impl<'d, D: Driver<'d>> Events<'d, D> {
    /// Send an event.
    ///
    /// At most three parameters may be given.
    pub async fn send(
        &mut self,
        code: EventCode,
        transaction_id: u32,
        params: &[u32],
    ) -> mtp::Result<()> {
        let n = encode_event(&mut self.buf, code, transaction_id, params)?;
        self.ep
            .write(&self.buf[..n])
            .await
            .map_err(|_e| mtp::Error::TxFailure)
    }

    /// Wait for a host to connect.
    pub async fn wait_connection(&mut self) {
        self.ep.wait_enabled().await
    }
}

/// An MTP USB device function.
pub struct MtpUsbClass<'d, D: Driver<'d>, S: Storage> {
    bulk: Bulk<'d, D, S>,
    events: Events<'d, D>,
}

impl<'d, D: Driver<'d>, S: Storage + 'd> MtpUsbClass<'d, D, S> {
    pub fn new(
        builder: &mut Builder<'d, D>,
        state: &'d mut State<'d, S>,
    ) -> Self {
        let State { control, shared } = state;
        let shared: &'d Shared<'d, S> = shared;
        let mps = shared.with(|i| i.engine.max_packet());

        let mut func = builder.function(
            USB_CLASS_STILL_IMAGE,
            STILL_IMAGE_SUBCLASS_CAPTURE,
            STILL_IMAGE_PROTOCOL_PIMA15740,
        );
        let mut iface = func.interface();
        let iface_num = iface.interface_number();
        // first alt iface is the default (and only)
        let mut alt = iface.alt_setting(
            USB_CLASS_STILL_IMAGE,
            STILL_IMAGE_SUBCLASS_CAPTURE,
            STILL_IMAGE_PROTOCOL_PIMA15740,
            None,
        );
        let interval = 1;
        let ep_out = alt.alloc_endpoint_out(
            EndpointType::Bulk,
            None,
            mps as u16,
            interval,
        );
        let ep_in = alt.alloc_endpoint_in(
            EndpointType::Bulk,
            None,
            mps as u16,
            interval,
        );
        let ep_event = alt.alloc_endpoint_in(
            EndpointType::Interrupt,
            None,
            EVENT_MAX_PACKET,
            EVENT_INTERVAL_MS,
        );

        for info in [ep_out.info(), ep_in.info(), ep_event.info()] {
            alt.endpoint_descriptor(
                info,
                SynchronizationType::NoSynchronization,
                UsageType::DataEndpoint,
                &[],
            );
        }
        drop(func);

        let control = control.write(Control {
            shared,
            iface: iface_num,
        });
        builder.handler(control);

        let bulk = Bulk {
            ep_in,
            ep_out,
            shared,
            mps,
            buf: [0; BUFSIZE],
        };
        let events = Events {
            ep: ep_event,
            buf: [0; EVENT_LEN],
        };
        Self { bulk, events }
    }

    /// Split into `Bulk` and `Events`
    ///
    /// This allows sending events while the engine runs.
    pub fn split(self) -> (Bulk<'d, D, S>, Events<'d, D>) {
        (self.bulk, self.events)
    }

    /// Runs the MTP engine. Events are not sent.
    pub async fn run(self) -> ! {
        self.bulk.run().await
    }
}
