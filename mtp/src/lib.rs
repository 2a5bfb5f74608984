// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP common types and traits.
 *
 * Copyright (c) 2025 Code Construct
 */

// Tests may use std
#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Media Transfer Protocol (MTP)
//!
//! This crate provides common types and traits for a device-side MTP
//! (PIMA 15740 / PTP) implementation.
//!
//! A device stack consumes two collaborators through traits defined here:
//! a [`Storage`] backend providing objects, and a [`BulkPipe`] that submits
//! transfers on the USB bulk endpoints.

pub use chrono::NaiveDateTime;

mod codes;

pub use codes::*;

/// Length of the container header
pub const HEADER_LEN: usize = 12;

/// Maximum number of parameters in a command or response container
pub const MAX_PARAMS: usize = 5;

/// Storage identifier
///
/// Upper 16 bits are the physical storage, lower 16 bits the logical
/// storage.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StorageId(pub u32);

impl StorageId {
    /// Wildcard: all storages
    pub const ALL: StorageId = StorageId(0xFFFF_FFFF);
}

impl core::fmt::Display for StorageId {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(fmt, "{:#010x}", self.0)
    }
}

/// Object handle
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObjectHandle(pub u32);

impl ObjectHandle {
    /// Parent of objects at the root of a storage, in an ObjectInfo dataset
    pub const NONE: ObjectHandle = ObjectHandle(0);
    /// Root of a storage, when used as an enumeration parent parameter
    pub const ROOT: ObjectHandle = ObjectHandle(0xFFFF_FFFF);
}

impl core::fmt::Display for ObjectHandle {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.0.fmt(fmt)
    }
}

/// An error type for MTP
///
/// These are failures of the stack itself (buffer space, malformed input,
/// transport). Protocol-level failures reported to the host are
/// [`ResponseCode`]s instead.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Failure in transmit path, typically transport-specific
    TxFailure,
    /// Failure in receive path, typically transport-specific
    RxFailure,
    /// Bad argument
    BadArgument,
    /// Invalid input
    InvalidInput,
    /// Provided buffer is too small
    NoSpace,
    /// Operation is unsupported
    Unsupported,
    /// Other error type
    Other,
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(fmt, "MTP Error: {:?}", self)
    }
}

/// MTP result type
pub type Result<T> = core::result::Result<T, Error>;

/// Result type for [`Storage`] calls
pub type StorageResult<T> = core::result::Result<T, ResponseCode>;

/// Storage description, as reported by GetStorageInfo
#[derive(Debug, Clone)]
pub struct StorageInfo<'a> {
    /// One of [`storage_type`]
    pub storage_type: u16,
    /// One of [`filesystem_type`]
    pub filesystem_type: u16,
    /// One of [`access_capability`]
    pub access_capability: u16,
    /// Capacity in bytes
    pub max_capacity: u64,
    /// Free space in bytes
    pub free_space: u64,
    /// Free space in objects, `0xFFFFFFFF` if not applicable
    pub free_objects: u32,
    /// Storage description
    pub description: &'a str,
    /// Volume identifier
    pub volume_id: &'a str,
}

/// Object metadata, the ObjectInfo dataset
///
/// Thumbnail fields are not represented, the device reports no
/// thumbnails.
#[derive(Debug, Clone)]
pub struct ObjectInfo<'a> {
    /// Storage holding the object
    pub storage: StorageId,
    /// Object format, one of [`format`]
    pub format: u16,
    /// One of [`protection`]
    pub protection: u16,
    /// Object size in bytes
    pub size: u32,
    #[allow(missing_docs)]
    pub image_width: u32,
    #[allow(missing_docs)]
    pub image_height: u32,
    #[allow(missing_docs)]
    pub image_depth: u32,
    /// Parent object, [`ObjectHandle::NONE`] at the storage root
    pub parent: ObjectHandle,
    /// One of [`association`]
    pub association_type: u16,
    #[allow(missing_docs)]
    pub association_desc: u32,
    #[allow(missing_docs)]
    pub sequence_number: u32,
    /// File name
    pub filename: &'a str,
    #[allow(missing_docs)]
    pub created: Option<NaiveDateTime>,
    #[allow(missing_docs)]
    pub modified: Option<NaiveDateTime>,
    #[allow(missing_docs)]
    pub keywords: &'a str,
}

impl ObjectInfo<'_> {
    /// Returns `true` for folders (associations)
    pub fn is_association(&self) -> bool {
        self.format == format::ASSOCIATION
    }
}

/// Location of a newly created object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObjectLocation {
    /// Storage the object was created on
    pub storage: StorageId,
    /// Parent object, [`ObjectHandle::ROOT`] at the storage root
    pub parent: ObjectHandle,
    /// New object's handle
    pub handle: ObjectHandle,
}

/// A storage backend
///
/// The device stack calls into a `Storage` to service host operations.
/// Any failure is returned as a [`ResponseCode`], which is sent
/// unchanged to the host as the operation's response.
///
/// Calls are made synchronously from the USB event context, so
/// implementations should not block for long periods.
pub trait Storage {
    /// A session has been opened by the host.
    fn open_session(&mut self, session_id: u32) -> StorageResult<()>;

    /// The host has closed the current session.
    fn close_session(&mut self) -> StorageResult<()>;

    /// Fills `ids` with the available storage IDs.
    ///
    /// Returns the number of IDs written.
    fn storage_ids(&mut self, ids: &mut [StorageId]) -> StorageResult<usize>;

    /// Describes a storage.
    fn storage_info(&mut self, storage: StorageId)
        -> StorageResult<StorageInfo<'_>>;

    /// Returns the next child of `parent`.
    ///
    /// Enumeration is a cursor held by the backend. The first call after
    /// [`children_done`](Self::children_done) (or after creation) starts
    /// a new enumeration. Returns `Ok(None)` once all children have been
    /// returned.
    ///
    /// `storage` may be [`StorageId::ALL`]. `parent` may be
    /// [`ObjectHandle::ROOT`] for root-level objects only, or
    /// [`ObjectHandle::NONE`] for every object in the storage.
    fn next_child(
        &mut self,
        storage: StorageId,
        parent: ObjectHandle,
    ) -> StorageResult<Option<ObjectHandle>>;

    /// Ends an enumeration started by [`next_child`](Self::next_child),
    /// releasing any cursor.
    fn children_done(&mut self);

    /// Retrieves object metadata.
    fn object_info(&mut self, handle: ObjectHandle)
        -> StorageResult<ObjectInfo<'_>>;

    /// Creates a new object from host-provided metadata.
    ///
    /// `storage` and `parent` are the destination given by the host,
    /// either may be zero to let the device choose. Object content
    /// follows with [`write_object`](Self::write_object).
    fn create_object(
        &mut self,
        storage: StorageId,
        parent: ObjectHandle,
        info: &ObjectInfo<'_>,
    ) -> StorageResult<ObjectLocation>;

    /// Reads object content at `offset`.
    ///
    /// Returns the number of bytes read, which is less than
    /// `buf.len()` only at the end of the object.
    fn read_object(
        &mut self,
        handle: ObjectHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> StorageResult<usize>;

    /// Writes object content at `offset`.
    ///
    /// Content arrives in order, in chunks of arbitrary size.
    fn write_object(
        &mut self,
        handle: ObjectHandle,
        offset: u64,
        data: &[u8],
    ) -> StorageResult<()>;

    /// Deletes an object.
    fn delete_object(&mut self, handle: ObjectHandle) -> StorageResult<()>;

    /// Erases all objects in a storage.
    fn format_store(&mut self, storage: StorageId) -> StorageResult<()>;

    /// The host cancelled the current transaction.
    ///
    /// Any in-flight operation should be abandoned. The session remains
    /// open.
    fn cancel(&mut self);

    /// The host reset the device. The session is closed.
    fn reset(&mut self);
}

/// The USB bulk endpoint pair used by the device stack
///
/// Transfers are asynchronous: a submitted transfer completes later,
/// and the device core reports it back to the stack. At most one
/// transfer is outstanding per direction.
pub trait BulkPipe {
    /// Submits `data` on the bulk IN endpoint.
    ///
    /// The transfer is split into maximum-size packets by the device core.
    /// An empty `data` sends a zero-length packet. No zero-length packet
    /// is appended automatically.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Arms the bulk OUT endpoint to receive up to `len` bytes.
    ///
    /// The transfer completes when `len` bytes are received, or on a
    /// short (or zero-length) packet. `len` is a multiple of the maximum
    /// packet size.
    fn receive(&mut self, len: usize) -> Result<()>;

    /// Discards the outstanding IN transfer, if any.
    ///
    /// Used when the host cancels or resets a transaction. Once this
    /// returns a new IN transfer may be submitted.
    fn abort_in(&mut self);

    /// Stalls both bulk endpoints.
    fn stall(&mut self);

    /// Clears a stall on both bulk endpoints.
    fn clear_stall(&mut self);
}
