// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP code namespaces.
 *
 * Copyright (c) 2025 Code Construct
 */

//! Operation, response, event and dataset codes.
//!
//! Values are from PIMA 15740 (PTP) and the MTP 1.1 specification.

use num_derive::FromPrimitive;

/// Container type field
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ContainerType {
    /// Command block, host to device
    Command = 1,
    /// Data block, either direction
    Data = 2,
    /// Response block, device to host
    Response = 3,
    /// Event block, interrupt endpoint
    Event = 4,
}

/// Operation codes
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum OpCode {
    GetDeviceInfo = 0x1001,
    OpenSession = 0x1002,
    CloseSession = 0x1003,
    GetStorageIds = 0x1004,
    GetStorageInfo = 0x1005,
    GetNumObjects = 0x1006,
    GetObjectHandles = 0x1007,
    GetObjectInfo = 0x1008,
    GetObject = 0x1009,
    GetThumb = 0x100A,
    DeleteObject = 0x100B,
    SendObjectInfo = 0x100C,
    SendObject = 0x100D,
    InitiateCapture = 0x100E,
    FormatStore = 0x100F,
    ResetDevice = 0x1010,
    SelfTest = 0x1011,
    SetObjectProtection = 0x1012,
    PowerDown = 0x1013,
    GetDevicePropDesc = 0x1014,
    GetDevicePropValue = 0x1015,
    SetDevicePropValue = 0x1016,
    ResetDevicePropValue = 0x1017,
    TerminateOpenCapture = 0x1018,
    MoveObject = 0x1019,
    CopyObject = 0x101A,
    GetPartialObject = 0x101B,
    InitiateOpenCapture = 0x101C,
    GetServiceIds = 0x9301,
    GetServiceInfo = 0x9302,
    GetServiceCapabilities = 0x9303,
    GetServicePropDesc = 0x9304,
    GetObjectPropsSupported = 0x9801,
    GetObjectPropDesc = 0x9802,
    GetObjectPropValue = 0x9803,
    SetObjectPropValue = 0x9804,
    GetObjectPropList = 0x9805,
    SetObjectPropList = 0x9806,
    GetInterdependentPropDesc = 0x9807,
    SendObjectPropList = 0x9808,
    GetObjectReferences = 0x9810,
}

/// A response code.
///
/// Storage backends report failures with these directly, the engine
/// passes them to the host untranslated.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResponseCode(pub u16);

#[allow(missing_docs)]
impl ResponseCode {
    pub const UNDEFINED: Self = Self(0x2000);
    pub const OK: Self = Self(0x2001);
    pub const GENERAL_ERROR: Self = Self(0x2002);
    pub const SESSION_NOT_OPEN: Self = Self(0x2003);
    pub const INVALID_TRANSACTION_ID: Self = Self(0x2004);
    pub const OPERATION_NOT_SUPPORTED: Self = Self(0x2005);
    pub const PARAMETER_NOT_SUPPORTED: Self = Self(0x2006);
    pub const INCOMPLETE_TRANSFER: Self = Self(0x2007);
    pub const INVALID_STORAGE_ID: Self = Self(0x2008);
    pub const INVALID_OBJECT_HANDLE: Self = Self(0x2009);
    pub const DEVICE_PROP_NOT_SUPPORTED: Self = Self(0x200A);
    pub const INVALID_OBJECT_FORMAT_CODE: Self = Self(0x200B);
    pub const STORE_FULL: Self = Self(0x200C);
    pub const OBJECT_WRITE_PROTECTED: Self = Self(0x200D);
    pub const STORE_READ_ONLY: Self = Self(0x200E);
    pub const ACCESS_DENIED: Self = Self(0x200F);
    pub const NO_THUMBNAIL_PRESENT: Self = Self(0x2010);
    pub const SELF_TEST_FAILED: Self = Self(0x2011);
    pub const PARTIAL_DELETION: Self = Self(0x2012);
    pub const STORE_NOT_AVAILABLE: Self = Self(0x2013);
    pub const SPECIFICATION_BY_FORMAT_UNSUPPORTED: Self = Self(0x2014);
    pub const NO_VALID_OBJECT_INFO: Self = Self(0x2015);
    pub const INVALID_CODE_FORMAT: Self = Self(0x2016);
    pub const UNKNOWN_VENDOR_CODE: Self = Self(0x2017);
    pub const CAPTURE_ALREADY_TERMINATED: Self = Self(0x2018);
    pub const DEVICE_BUSY: Self = Self(0x2019);
    pub const INVALID_PARENT_OBJECT: Self = Self(0x201A);
    pub const INVALID_DEVICE_PROP_FORMAT: Self = Self(0x201B);
    pub const INVALID_DEVICE_PROP_VALUE: Self = Self(0x201C);
    pub const INVALID_PARAMETER: Self = Self(0x201D);
    pub const SESSION_ALREADY_OPEN: Self = Self(0x201E);
    pub const TRANSACTION_CANCELLED: Self = Self(0x201F);
    pub const SPECIFICATION_OF_DESTINATION_UNSUPPORTED: Self = Self(0x2020);
    pub const INVALID_OBJECT_PROP_CODE: Self = Self(0xA801);
    pub const INVALID_OBJECT_PROP_FORMAT: Self = Self(0xA802);
    pub const INVALID_OBJECT_PROP_VALUE: Self = Self(0xA803);
    pub const INVALID_OBJECT_REFERENCE: Self = Self(0xA804);
    pub const GROUP_NOT_SUPPORTED: Self = Self(0xA805);
    pub const INVALID_DATASET: Self = Self(0xA806);
    pub const SPECIFICATION_BY_GROUP_UNSUPPORTED: Self = Self(0xA807);
    pub const SPECIFICATION_BY_DEPTH_UNSUPPORTED: Self = Self(0xA808);
    pub const OBJECT_TOO_LARGE: Self = Self(0xA809);
    pub const OBJECT_PROP_NOT_SUPPORTED: Self = Self(0xA80A);
}

impl ResponseCode {
    /// Returns `true` for [`ResponseCode::OK`]
    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }
}

impl core::fmt::Debug for ResponseCode {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(fmt, "ResponseCode({:#06x})", self.0)
    }
}

impl core::fmt::Display for ResponseCode {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(fmt, "{:#06x}", self.0)
    }
}

/// Event codes, sent on the interrupt endpoint
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum EventCode {
    CancelTransaction = 0x4001,
    ObjectAdded = 0x4002,
    ObjectRemoved = 0x4003,
    StoreAdded = 0x4004,
    StoreRemoved = 0x4005,
    DevicePropChanged = 0x4006,
    ObjectInfoChanged = 0x4007,
    DeviceInfoChanged = 0x4008,
    RequestObjectTransfer = 0x4009,
    StoreFull = 0x400A,
    DeviceReset = 0x400B,
    StorageInfoChanged = 0x400C,
    CaptureComplete = 0x400D,
    UnreportedStatus = 0x400E,
    ObjectPropChanged = 0xC801,
    ObjectPropDescChanged = 0xC802,
    ObjectReferencesChanged = 0xC803,
}

/// Still Image class-specific control requests (PIMA 15740 D.5.2)
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ClassRequest {
    /// Host cancels the current transaction
    Cancel = 0x64,
    /// Retrieve extended event data
    GetExtendedEventData = 0x65,
    /// Return the device to the idle state after a stall
    DeviceReset = 0x66,
    /// Retrieve device status
    GetDeviceStatus = 0x67,
}

/// Object format codes
#[allow(missing_docs)]
pub mod format {
    pub const UNDEFINED: u16 = 0x3000;
    pub const ASSOCIATION: u16 = 0x3001;
    pub const SCRIPT: u16 = 0x3002;
    pub const EXECUTABLE: u16 = 0x3003;
    pub const TEXT: u16 = 0x3004;
    pub const HTML: u16 = 0x3005;
    pub const WAV: u16 = 0x3008;
    pub const MP3: u16 = 0x3009;
    pub const UNDEFINED_IMAGE: u16 = 0x3800;
    pub const EXIF_JPEG: u16 = 0x3801;
    pub const BMP: u16 = 0x3804;
    pub const GIF: u16 = 0x3807;
    pub const PNG: u16 = 0x380B;
}

/// Device property codes
#[allow(missing_docs)]
pub mod device_prop {
    pub const BATTERY_LEVEL: u16 = 0x5001;
    pub const DATE_TIME: u16 = 0x5011;
    pub const SYNCHRONIZATION_PARTNER: u16 = 0xD401;
    pub const DEVICE_FRIENDLY_NAME: u16 = 0xD402;
}

/// Dataset data type codes
#[allow(missing_docs)]
pub mod data_type {
    pub const UINT8: u16 = 0x0002;
    pub const UINT16: u16 = 0x0004;
    pub const UINT32: u16 = 0x0006;
    pub const UINT64: u16 = 0x0008;
    pub const AUINT16: u16 = 0x4004;
    pub const AUINT32: u16 = 0x4006;
    pub const STR: u16 = 0xFFFF;
}

/// StorageInfo storage type
#[allow(missing_docs)]
pub mod storage_type {
    pub const UNDEFINED: u16 = 0x0000;
    pub const FIXED_ROM: u16 = 0x0001;
    pub const REMOVABLE_ROM: u16 = 0x0002;
    pub const FIXED_RAM: u16 = 0x0003;
    pub const REMOVABLE_RAM: u16 = 0x0004;
}

/// StorageInfo filesystem type
#[allow(missing_docs)]
pub mod filesystem_type {
    pub const UNDEFINED: u16 = 0x0000;
    pub const GENERIC_FLAT: u16 = 0x0001;
    pub const GENERIC_HIERARCHICAL: u16 = 0x0002;
    pub const DCF: u16 = 0x0003;
}

/// StorageInfo access capability
#[allow(missing_docs)]
pub mod access_capability {
    pub const READ_WRITE: u16 = 0x0000;
    pub const READ_ONLY_WITHOUT_DELETION: u16 = 0x0001;
    pub const READ_ONLY_WITH_DELETION: u16 = 0x0002;
}

/// ObjectInfo protection status
#[allow(missing_docs)]
pub mod protection {
    pub const NONE: u16 = 0x0000;
    pub const READ_ONLY: u16 = 0x0001;
}

/// ObjectInfo association type
#[allow(missing_docs)]
pub mod association {
    pub const UNDEFINED: u16 = 0x0000;
    pub const GENERIC_FOLDER: u16 = 0x0001;
}
