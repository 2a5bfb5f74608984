// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Container encoding and decoding
//!
//! A container is a 12 byte little-endian header followed by a payload.
//! [`Container`] builds an outgoing container in a caller-provided buffer,
//! [`Reader`] parses fields from a received payload.

use core::fmt::Write;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use heapless::{String, Vec};
use num_traits::FromPrimitive;

use mtp::{
    ContainerType, Error, EventCode, ObjectHandle, Result, HEADER_LEN,
    MAX_PARAMS,
};

/// Maximum characters in a wstring, including the terminator
const WSTRING_MAX: usize = 255;

/// Length of a date string, `YYYYMMDDThhmmssZ`
const DATE_LEN: usize = 16;

/// Maximum parameters in an event container
pub const MAX_EVENT_PARAMS: usize = 3;

/// A decoded container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    /// Total container length, including the header
    pub len: u32,
    /// Container type
    pub typ: ContainerType,
    /// Operation, response or event code
    pub code: u16,
    /// Transaction ID
    pub transaction_id: u32,
}

impl Header {
    /// Decodes a header from the start of `buf`.
    ///
    /// Returns [`Error::InvalidInput`] if `buf` is too short, the
    /// container type is unknown, or the declared length is smaller
    /// than a header.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let hdr: &[u8; HEADER_LEN] = buf
            .get(..HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::InvalidInput)?;

        let len = u32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
        let typ = u16::from_le_bytes([hdr[4], hdr[5]]);
        let code = u16::from_le_bytes([hdr[6], hdr[7]]);
        let transaction_id =
            u32::from_le_bytes([hdr[8], hdr[9], hdr[10], hdr[11]]);

        let typ = ContainerType::from_u16(typ).ok_or(Error::InvalidInput)?;
        if (len as usize) < HEADER_LEN {
            return Err(Error::InvalidInput);
        }
        Ok(Self {
            len,
            typ,
            code,
            transaction_id,
        })
    }

    /// Encodes the header into the start of `out`.
    pub fn encode(&self, out: &mut [u8]) -> Result<()> {
        let out = out.get_mut(..HEADER_LEN).ok_or(Error::NoSpace)?;
        out[0..4].copy_from_slice(&self.len.to_le_bytes());
        out[4..6].copy_from_slice(&(self.typ as u16).to_le_bytes());
        out[6..8].copy_from_slice(&self.code.to_le_bytes());
        out[8..12].copy_from_slice(&self.transaction_id.to_le_bytes());
        Ok(())
    }
}

/// A decoded command container
#[derive(Debug, Clone)]
pub struct Command {
    /// Operation code
    pub code: u16,
    /// Transaction ID
    pub transaction_id: u32,
    /// Positional parameters
    pub params: Vec<u32, MAX_PARAMS>,
}

impl Command {
    /// Decodes a complete command container.
    ///
    /// Trailing bytes that don't form a whole parameter are ignored, as
    /// are parameters beyond the fifth.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let hdr = Header::decode(buf)?;
        if hdr.typ != ContainerType::Command {
            return Err(Error::InvalidInput);
        }
        let payload = buf
            .get(HEADER_LEN..hdr.len as usize)
            .ok_or(Error::InvalidInput)?;

        let params = payload
            .chunks_exact(4)
            .take(MAX_PARAMS)
            .map(|p| u32::from_le_bytes([p[0], p[1], p[2], p[3]]))
            .collect();

        Ok(Self {
            code: hdr.code,
            transaction_id: hdr.transaction_id,
            params,
        })
    }

    /// Returns parameter `n` (zero-indexed), or 0 if the host omitted it.
    pub fn param(&self, n: usize) -> u32 {
        self.params.get(n).copied().unwrap_or(0)
    }
}

/// A fixed-size little-endian scalar that can be appended to a container
pub trait Scalar: Copy {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Writes the little-endian encoding into `out`, which is `SIZE` bytes.
    fn write_le(self, out: &mut [u8]);
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                const SIZE: usize = core::mem::size_of::<$t>();

                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes())
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, u64);

/// An outgoing container being built in a buffer
///
/// Each append updates the header length. Appends fail with
/// [`Error::NoSpace`] rather than write past the end of the buffer, and
/// leave the container unchanged.
#[derive(Debug)]
pub struct Container<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Container<'a> {
    /// Starts a container in `buf` with an empty payload.
    pub fn new(
        buf: &'a mut [u8],
        typ: ContainerType,
        code: u16,
        transaction_id: u32,
    ) -> Result<Self> {
        let hdr = Header {
            len: HEADER_LEN as u32,
            typ,
            code,
            transaction_id,
        };
        hdr.encode(buf)?;
        Ok(Self {
            buf,
            len: HEADER_LEN,
        })
    }

    /// Total container length in the buffer, including the header
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len == HEADER_LEN
    }

    /// Returns the encoded container
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn set_len(&mut self, len: usize) {
        self.len = len;
        self.buf[0..4].copy_from_slice(&(len as u32).to_le_bytes());
    }

    /// Reserves `n` bytes at the end of the payload.
    fn extend(&mut self, n: usize) -> Result<&mut [u8]> {
        let start = self.len;
        let end = start.checked_add(n).ok_or(Error::NoSpace)?;
        if end > self.buf.len() {
            return Err(Error::NoSpace);
        }
        self.set_len(end);
        Ok(&mut self.buf[start..end])
    }

    /// Appends a scalar value.
    pub fn append<T: Scalar>(&mut self, val: T) -> Result<()> {
        val.write_le(self.extend(T::SIZE)?);
        Ok(())
    }

    /// Appends raw bytes.
    pub fn append_raw(&mut self, data: &[u8]) -> Result<()> {
        self.extend(data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Appends an array: a 32-bit element count then each element.
    pub fn append_array<T: Scalar>(&mut self, items: &[T]) -> Result<()> {
        let count = u32::try_from(items.len()).map_err(|_| Error::NoSpace)?;
        let total = 4 + items.len() * T::SIZE;
        let out = self.extend(total)?;
        out[..4].copy_from_slice(&count.to_le_bytes());
        for (i, v) in items.iter().enumerate() {
            let o = 4 + i * T::SIZE;
            v.write_le(&mut out[o..o + T::SIZE]);
        }
        Ok(())
    }

    /// Appends a handle to a handle list at the start of the payload.
    ///
    /// The list's count is created on the first append to an empty
    /// payload, and incremented for each handle.
    pub fn append_object_handle(&mut self, handle: ObjectHandle) -> Result<()> {
        let need = if self.is_empty() { 8 } else { 4 };
        if self.len + need > self.buf.len() {
            return Err(Error::NoSpace);
        }
        if self.is_empty() {
            self.append(0u32)?;
        }
        self.append(handle.0)?;

        let c = &mut self.buf[HEADER_LEN..HEADER_LEN + 4];
        let count = u32::from_le_bytes([c[0], c[1], c[2], c[3]]) + 1;
        c.copy_from_slice(&count.to_le_bytes());
        Ok(())
    }

    /// Appends a string.
    ///
    /// The encoding is a one byte character count, including a null
    /// terminator, then UTF-16LE code units including the terminator.
    /// An empty string is a single zero byte.
    ///
    /// Returns [`Error::BadArgument`] if the string is longer than 254
    /// UTF-16 code units.
    pub fn append_wstring(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return self.append(0u8);
        }
        let units = s.encode_utf16().count() + 1;
        if units > WSTRING_MAX {
            return Err(Error::BadArgument);
        }

        let out = self.extend(1 + 2 * units)?;
        out[0] = units as u8;
        let chars = s.encode_utf16().chain(core::iter::once(0));
        for (o, c) in out[1..].chunks_exact_mut(2).zip(chars) {
            o.copy_from_slice(&c.to_le_bytes());
        }
        Ok(())
    }

    /// Appends a date string, `YYYYMMDDThhmmssZ`.
    ///
    /// `None` is encoded as an empty string.
    pub fn append_date(&mut self, t: Option<&NaiveDateTime>) -> Result<()> {
        match t {
            Some(t) => self.append_wstring(&format_date(t)?),
            None => self.append_wstring(""),
        }
    }

    /// Sets the declared length for a container whose payload is
    /// streamed beyond the buffer.
    ///
    /// `total` is the whole wire length including the header. It must be
    /// at least the length already in the buffer.
    pub fn set_streamed_len(&mut self, total: u32) -> Result<()> {
        if (total as usize) < self.len {
            return Err(Error::BadArgument);
        }
        self.buf[0..4].copy_from_slice(&total.to_le_bytes());
        Ok(())
    }

    /// Returns the remaining free space in the buffer.
    pub fn tail(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// Marks `n` bytes of [`tail()`](Self::tail) as written.
    pub fn commit_tail(&mut self, n: usize) -> Result<()> {
        self.extend(n).map(|_| ())
    }
}

fn format_date(t: &NaiveDateTime) -> Result<String<DATE_LEN>> {
    let mut s = String::new();
    write!(
        s,
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        t.year(),
        t.month(),
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    )
    .map_err(|_| Error::BadArgument)?;
    Ok(s)
}

/// Parses a PTP date string.
///
/// Accepts `YYYYMMDDThhmmss` with an optional tenths suffix (`.s`) and
/// an optional timezone (`Z` or `+hhmm`), which is ignored.
pub fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let b = s.as_bytes();
    if b.len() < 15 || b[8] != b'T' {
        return None;
    }
    let num = |r: core::ops::Range<usize>| -> Option<u32> {
        s.get(r)?.parse().ok()
    };
    NaiveDate::from_ymd_opt(num(0..4)? as i32, num(4..6)?, num(6..8)?)?
        .and_hms_opt(num(9..11)?, num(11..13)?, num(13..15)?)
}

/// Encodes an event container into `buf`.
///
/// Returns the container length.
pub fn encode_event(
    buf: &mut [u8],
    code: EventCode,
    transaction_id: u32,
    params: &[u32],
) -> Result<usize> {
    if params.len() > MAX_EVENT_PARAMS {
        return Err(Error::BadArgument);
    }
    let mut c =
        Container::new(buf, ContainerType::Event, code as u16, transaction_id)?;
    for p in params {
        c.append(*p)?;
    }
    Ok(c.len())
}

/// A cursor over a received payload
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Returns the unread bytes
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Reads `n` raw bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Error::InvalidInput)?;
        let b = self.buf.get(self.pos..end).ok_or(Error::InvalidInput)?;
        self.pos = end;
        Ok(b)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let b = self.take(N)?;
        b.try_into().map_err(|_| Error::InvalidInput)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.array().map(u64::from_le_bytes)
    }

    /// Reads a wstring.
    ///
    /// Up to `N` bytes of UTF-8 are kept, further characters are
    /// dropped. Invalid UTF-16 is replaced with U+FFFD. The string ends at
    /// the first U+0000, so an embedded NUL truncates it. The cursor
    /// always advances past the whole field.
    pub fn get_string<const N: usize>(&mut self) -> Result<String<N>> {
        let count = self.u8()? as usize;
        let units = self.take(count * 2)?;

        let mut s = String::new();
        let units = units
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&c| c != 0);
        for c in char::decode_utf16(units) {
            let c = c.unwrap_or(char::REPLACEMENT_CHARACTER);
            if s.push(c).is_err() {
                break;
            }
        }
        Ok(s)
    }

    /// Reads a date string.
    ///
    /// Returns `None` for an empty or unparseable date.
    pub fn get_date(&mut self) -> Result<Option<NaiveDateTime>> {
        let s = self.get_string::<32>()?;
        Ok(parse_date(&s))
    }
}
