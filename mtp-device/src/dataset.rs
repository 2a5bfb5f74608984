// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Dataset encoding
//!
//! DeviceInfo, StorageInfo, ObjectInfo and DevicePropDesc datasets, as
//! carried in data container payloads.

use deku::{DekuContainerRead, DekuContainerWrite, DekuRead, DekuWrite};
use heapless::String;

use mtp::{
    data_type, device_prop, Error, ObjectHandle, ObjectInfo, Result,
    StorageId, StorageInfo,
};

use crate::config::{DeviceConfig, MAX_FILENAME};
use crate::container::{Container, Reader};

/// PTP standard version, 1.00
const STANDARD_VERSION: u16 = 100;
/// Vendor extension ID. libmtp requires the Microsoft extension ID.
const VENDOR_EXTENSION_ID: u32 = 6;
const MTP_VERSION: u16 = 100;
const FUNCTIONAL_MODE_STANDARD: u16 = 0;

/// Properties reported in DeviceInfo
pub const DEVICE_PROPERTIES: [u16; 1] = [device_prop::DEVICE_FRIENDLY_NAME];

const PROP_GET: u8 = 0;
const FORM_NONE: u8 = 0;

/// Maximum keywords length kept from a host ObjectInfo
const MAX_KEYWORDS: usize = 32;

/// Fixed-length leading fields of the ObjectInfo dataset
#[derive(DekuRead, DekuWrite, Debug, Default, Clone, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct ObjectInfoHeader {
    pub storage_id: u32,
    pub format: u16,
    pub protection: u16,
    pub compressed_size: u32,
    pub thumb_format: u16,
    pub thumb_compressed_size: u32,
    pub thumb_pix_width: u32,
    pub thumb_pix_height: u32,
    pub image_pix_width: u32,
    pub image_pix_height: u32,
    pub image_bit_depth: u32,
    pub parent_object: u32,
    pub association_type: u16,
    pub association_desc: u32,
    pub sequence_number: u32,
}

/// Encoded length of [`ObjectInfoHeader`]
pub const OBJECT_INFO_HEADER_LEN: usize = 52;

/// Appends a DeviceInfo dataset.
///
/// `operations` is the supported operation list.
pub fn write_device_info(
    c: &mut Container,
    config: &DeviceConfig,
    operations: &[u16],
) -> Result<()> {
    c.append(STANDARD_VERSION)?;
    c.append(VENDOR_EXTENSION_ID)?;
    c.append(MTP_VERSION)?;
    c.append_wstring(config.extension_desc)?;
    c.append(FUNCTIONAL_MODE_STANDARD)?;
    c.append_array(operations)?;

    c.append(config.events.len() as u32)?;
    for e in config.events {
        c.append(*e as u16)?;
    }

    c.append_array(&DEVICE_PROPERTIES)?;
    c.append_array(config.capture_formats)?;
    c.append_array(config.playback_formats)?;
    c.append_wstring(config.manufacturer)?;
    c.append_wstring(config.model)?;
    c.append_wstring(config.device_version)?;
    c.append_wstring(config.serial_number)?;
    Ok(())
}

/// Appends a StorageInfo dataset.
pub fn write_storage_info(c: &mut Container, info: &StorageInfo) -> Result<()> {
    c.append(info.storage_type)?;
    c.append(info.filesystem_type)?;
    c.append(info.access_capability)?;
    c.append(info.max_capacity)?;
    c.append(info.free_space)?;
    c.append(info.free_objects)?;
    c.append_wstring(info.description)?;
    c.append_wstring(info.volume_id)?;
    Ok(())
}

/// Appends an ObjectInfo dataset.
///
/// Thumbnail fields are reported as absent.
pub fn write_object_info(c: &mut Container, info: &ObjectInfo) -> Result<()> {
    let hdr = ObjectInfoHeader {
        storage_id: info.storage.0,
        format: info.format,
        protection: info.protection,
        compressed_size: info.size,
        image_pix_width: info.image_width,
        image_pix_height: info.image_height,
        image_bit_depth: info.image_depth,
        parent_object: info.parent.0,
        association_type: info.association_type,
        association_desc: info.association_desc,
        sequence_number: info.sequence_number,
        ..Default::default()
    };
    let mut b = [0u8; OBJECT_INFO_HEADER_LEN];
    let l = hdr.to_slice(&mut b).map_err(|_| Error::NoSpace)?;
    c.append_raw(&b[..l])?;

    c.append_wstring(info.filename)?;
    c.append_date(info.created.as_ref())?;
    c.append_date(info.modified.as_ref())?;
    c.append_wstring(info.keywords)?;
    Ok(())
}

/// Appends a DevicePropDesc dataset for a string property.
///
/// The property is get-only, with no form.
pub fn write_string_prop_desc(
    c: &mut Container,
    code: u16,
    factory: &str,
    current: &str,
) -> Result<()> {
    c.append(code)?;
    c.append(data_type::STR)?;
    c.append(PROP_GET)?;
    c.append_wstring(factory)?;
    c.append_wstring(current)?;
    c.append(FORM_NONE)?;
    Ok(())
}

/// An ObjectInfo dataset received from the host
#[derive(Debug, Clone)]
pub struct HostObjectInfo {
    pub header: ObjectInfoHeader,
    pub filename: String<MAX_FILENAME>,
    pub created: Option<chrono::NaiveDateTime>,
    pub modified: Option<chrono::NaiveDateTime>,
    pub keywords: String<MAX_KEYWORDS>,
}

impl HostObjectInfo {
    /// Parses an ObjectInfo payload.
    ///
    /// The filename is truncated to [`MAX_FILENAME`] bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let ((rest, _), header) = ObjectInfoHeader::from_bytes((payload, 0))
            .map_err(|_| Error::InvalidInput)?;

        let mut r = Reader::new(rest);
        let filename = r.get_string()?;
        let created = r.get_date()?;
        let modified = r.get_date()?;
        // some hosts omit trailing keywords
        let keywords = if r.remaining().is_empty() {
            String::new()
        } else {
            r.get_string()?
        };

        Ok(Self {
            header,
            filename,
            created,
            modified,
            keywords,
        })
    }

    /// Returns the object info as passed to a storage backend
    pub fn as_info(&self) -> ObjectInfo<'_> {
        let h = &self.header;
        ObjectInfo {
            storage: StorageId(h.storage_id),
            format: h.format,
            protection: h.protection,
            size: h.compressed_size,
            image_width: h.image_pix_width,
            image_height: h.image_pix_height,
            image_depth: h.image_bit_depth,
            parent: ObjectHandle(h.parent_object),
            association_type: h.association_type,
            association_desc: h.association_desc,
            sequence_number: h.sequence_number,
            filename: &self.filename,
            created: self.created,
            modified: self.modified,
            keywords: &self.keywords,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mtp::{
        access_capability, filesystem_type, format, protection, storage_type,
        ContainerType, OpCode,
    };

    fn sample_info() -> ObjectInfo<'static> {
        let t = NaiveDate::from_ymd_opt(2025, 8, 8)
            .unwrap()
            .and_hms_opt(17, 35, 0)
            .unwrap();
        ObjectInfo {
            storage: StorageId(0x0001_0001),
            format: format::TEXT,
            protection: protection::READ_ONLY,
            size: 31,
            image_width: 0,
            image_height: 0,
            image_depth: 0,
            parent: ObjectHandle::NONE,
            association_type: 0,
            association_desc: 0,
            sequence_number: 0,
            filename: "readme.txt",
            created: Some(t),
            modified: None,
            keywords: "",
        }
    }

    #[test]
    fn header_len() {
        let mut b = [0u8; 64];
        let l = ObjectInfoHeader::default().to_slice(&mut b).unwrap();
        assert_eq!(l, OBJECT_INFO_HEADER_LEN);
    }

    #[test]
    fn object_info_layout() {
        let mut buf = [0u8; 256];
        let mut c = Container::new(
            &mut buf,
            ContainerType::Data,
            OpCode::GetObjectInfo as u16,
            1,
        )
        .unwrap();
        write_object_info(&mut c, &sample_info()).unwrap();
        let b = c.as_bytes();

        assert_eq!(&b[12..16], &[0x01, 0x00, 0x01, 0x00]);
        assert_eq!(&b[16..18], &[0x04, 0x30]);
        assert_eq!(&b[18..20], &[0x01, 0x00]);
        assert_eq!(&b[20..24], &[31, 0, 0, 0]);
        // filename count follows the fixed fields
        assert_eq!(b[12 + OBJECT_INFO_HEADER_LEN], 11);
    }

    #[test]
    fn object_info_parse() {
        let mut buf = [0u8; 256];
        let mut c = Container::new(
            &mut buf,
            ContainerType::Data,
            OpCode::SendObjectInfo as u16,
            1,
        )
        .unwrap();
        let info = sample_info();
        write_object_info(&mut c, &info).unwrap();

        let parsed = HostObjectInfo::parse(&c.as_bytes()[12..]).unwrap();
        let p = parsed.as_info();
        assert_eq!(p.filename, "readme.txt");
        assert_eq!(p.size, 31);
        assert_eq!(p.format, format::TEXT);
        assert_eq!(p.created, info.created);
        assert_eq!(p.modified, None);
        assert_eq!(p.storage, info.storage);
    }

    #[test]
    fn object_info_truncated() {
        let b = [0u8; OBJECT_INFO_HEADER_LEN - 1];
        assert!(HostObjectInfo::parse(&b).is_err());

        // fixed fields present, filename missing
        let b = [0u8; OBJECT_INFO_HEADER_LEN];
        assert!(HostObjectInfo::parse(&b).is_err());
    }

    #[test]
    fn storage_info() {
        let info = StorageInfo {
            storage_type: storage_type::FIXED_RAM,
            filesystem_type: filesystem_type::GENERIC_HIERARCHICAL,
            access_capability: access_capability::READ_WRITE,
            max_capacity: 0x1_0000_0000,
            free_space: 10,
            free_objects: 2,
            description: "ram",
            volume_id: "",
        };
        let mut buf = [0u8; 128];
        let mut c = Container::new(&mut buf, ContainerType::Data, 0x1005, 1)
            .unwrap();
        write_storage_info(&mut c, &info).unwrap();
        let b = &c.as_bytes()[12..];
        assert_eq!(&b[..6], &[3, 0, 2, 0, 0, 0]);
        assert_eq!(&b[6..14], &[0, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(b.len(), 6 + 8 + 8 + 4 + 1 + 8 + 1);
    }

    #[test]
    fn device_info() {
        let config = DeviceConfig::default();
        let mut buf = [0u8; 512];
        let mut c = Container::new(&mut buf, ContainerType::Data, 0x1001, 0)
            .unwrap();
        write_device_info(&mut c, &config, &[0x1001, 0x1002]).unwrap();

        let mut r = Reader::new(&c.as_bytes()[12..]);
        assert_eq!(r.u16().unwrap(), 100);
        assert_eq!(r.u32().unwrap(), 6);
        assert_eq!(r.u16().unwrap(), 100);
        assert_eq!(r.get_string::<64>().unwrap(), config.extension_desc);
        assert_eq!(r.u16().unwrap(), 0);
        assert_eq!(r.u32().unwrap(), 2);
        assert_eq!(r.u16().unwrap(), 0x1001);
        assert_eq!(r.u16().unwrap(), 0x1002);
        assert_eq!(r.u32().unwrap(), config.events.len() as u32);
        r.take(config.events.len() * 2).unwrap();
        assert_eq!(r.u32().unwrap(), 1);
        assert_eq!(r.u16().unwrap(), device_prop::DEVICE_FRIENDLY_NAME);
        assert_eq!(r.u32().unwrap(), 0);
        let n = r.u32().unwrap() as usize;
        r.take(n * 2).unwrap();
        assert_eq!(r.get_string::<64>().unwrap(), config.manufacturer);
        assert_eq!(r.get_string::<64>().unwrap(), config.model);
        assert_eq!(r.get_string::<64>().unwrap(), config.device_version);
        assert_eq!(r.get_string::<64>().unwrap(), config.serial_number);
        assert!(r.remaining().is_empty());
    }

    #[test]
    fn prop_desc() {
        let mut buf = [0u8; 128];
        let mut c = Container::new(&mut buf, ContainerType::Data, 0x1014, 0)
            .unwrap();
        write_string_prop_desc(&mut c, 0xD402, "a", "b").unwrap();
        assert_eq!(
            &c.as_bytes()[12..],
            &[0x02, 0xD4, 0xFF, 0xFF, 0, 2, b'a', 0, 0, 0, 2, b'b', 0, 0, 0, 0]
        );
    }
}
