/*
 * Copyright (C) 2020 The Android Open Source Project
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Container for messages that are sent via binder.

use crate::error::{Result, StatusCode};
use crate::proxy::SpIBinder;

use std::cell::Cell;
use std::fmt;
use std::mem::size_of;

mod parcelable;

pub use self::parcelable::{Deserialize, Serialize};

/// Header written in front of every interface token.
const INTERFACE_HEADER: i32 = i32::from_be_bytes(*b"SYST");

/// Type tag of a null binder reference.
const BINDER_TYPE_NULL: i32 = 0;
/// Type tag of a binder object reference. Chosen to match `BINDER_TYPE_BINDER`.
const BINDER_TYPE_OBJECT: i32 = 0x7362_2a85;

const MIN_CAPACITY: usize = 64;

/// Container for a message (data and object references) that can be sent
/// through Binder.
///
/// A Parcel holds flattened data, written and read back in the same order
/// with no self-describing schema, plus references to live binder objects.
/// Object references are kept alive by the parcel until it is dropped, and
/// the receiving side gets a proxy connected to the original object.
///
/// Writes append at the end of the buffer. Reads advance a separate cursor
/// that starts at zero; a read that needs more bytes than remain fails with
/// [`StatusCode::NOT_ENOUGH_DATA`] and leaves the cursor where it was.
pub struct Parcel {
    data: Vec<u8>,
    position: Cell<usize>,
    objects: Vec<ParcelObject>,
}

/// A binder reference embedded in a parcel at a given byte offset.
pub(crate) struct ParcelObject {
    pub(crate) offset: usize,
    pub(crate) binder: SpIBinder,
}

impl Default for Parcel {
    fn default() -> Self {
        Self::new()
    }
}

impl Parcel {
    /// Create a new empty parcel.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            position: Cell::new(0),
            objects: Vec::new(),
        }
    }

    pub(crate) fn from_parts(data: Vec<u8>, objects: Vec<ParcelObject>) -> Self {
        Self {
            data,
            position: Cell::new(0),
            objects,
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<u8>, Vec<ParcelObject>) {
        (self.data, self.objects)
    }

    /// Raw bytes written so far.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the total amount of data contained in the parcel.
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Returns the current read position in the parcel data. Never more than
    /// [`data_size`](Self::data_size).
    pub fn data_position(&self) -> usize {
        self.position.get()
    }

    /// Returns the amount of data remaining to be read from the parcel.
    pub fn data_avail(&self) -> usize {
        self.data.len() - self.position.get()
    }

    /// Returns the total amount of space in the parcel. This is always
    /// `>= data_size()`.
    pub fn data_capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Number of binder objects carried by the parcel.
    pub fn objects_count(&self) -> usize {
        self.objects.len()
    }

    /// Move the read cursor. `pos` must be between 0 and `data_size()`.
    pub fn set_data_position(&self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(StatusCode::BAD_VALUE);
        }
        self.position.set(pos);
        Ok(())
    }

    /// Write a value implementing [`Serialize`] to the end of the parcel.
    pub fn write<S: Serialize + ?Sized>(&mut self, parcelable: &S) -> Result<()> {
        parcelable.serialize(self)
    }

    /// Read a value implementing [`Deserialize`] at the read cursor.
    pub fn read<D: Deserialize>(&self) -> Result<D> {
        D::deserialize(self)
    }

    pub fn write_i32(&mut self, val: i32) -> Result<()> {
        self.write_aligned(&val.to_ne_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, val: u32) -> Result<()> {
        self.write_aligned(&val.to_ne_bytes());
        Ok(())
    }

    pub fn write_i64(&mut self, val: i64) -> Result<()> {
        self.write_aligned(&val.to_ne_bytes());
        Ok(())
    }

    pub fn write_u64(&mut self, val: u64) -> Result<()> {
        self.write_aligned(&val.to_ne_bytes());
        Ok(())
    }

    pub fn write_bool(&mut self, val: bool) -> Result<()> {
        self.write_i32(val as i32)
    }

    /// Write a string as UTF-16: an `i32` length in code units, the code
    /// units, and a terminating NUL, padded like every other value.
    pub fn write_string16(&mut self, val: &str) -> Result<()> {
        let units: Vec<u16> = val.encode_utf16().collect();
        let len: i32 = units.len().try_into().or(Err(StatusCode::BAD_VALUE))?;
        self.write_i32(len)?;
        let mut bytes = Vec::with_capacity((units.len() + 1) * size_of::<u16>());
        for unit in units.iter().chain(std::iter::once(&0u16)) {
            bytes.extend_from_slice(&unit.to_ne_bytes());
        }
        self.write_aligned(&bytes);
        Ok(())
    }

    /// Write a nullable string. [`None`] is encoded as length `-1`.
    pub fn write_nullable_string16(&mut self, val: Option<&str>) -> Result<()> {
        match val {
            Some(s) => self.write_string16(s),
            None => self.write_i32(-1),
        }
    }

    /// Write a binder object reference, or a null reference.
    ///
    /// The parcel keeps a strong reference to the object for as long as the
    /// parcel is alive, so the object cannot go away while it is in flight.
    pub fn write_binder(&mut self, binder: Option<&SpIBinder>) -> Result<()> {
        match binder {
            None => self.write_i32(BINDER_TYPE_NULL),
            Some(binder) => {
                let offset = self.data.len();
                self.write_i32(BINDER_TYPE_OBJECT)?;
                self.objects.push(ParcelObject {
                    offset,
                    binder: binder.clone(),
                });
                Ok(())
            }
        }
    }

    /// Writes the RPC header naming the interface the call is addressed to.
    pub fn write_interface_token(&mut self, descriptor: &str) -> Result<()> {
        self.write_i32(INTERFACE_HEADER)?;
        self.write_string16(descriptor)
    }

    pub fn read_i32(&self) -> Result<i32> {
        Ok(i32::from_ne_bytes(self.read_array()?))
    }

    pub fn read_u32(&self) -> Result<u32> {
        Ok(u32::from_ne_bytes(self.read_array()?))
    }

    pub fn read_i64(&self) -> Result<i64> {
        Ok(i64::from_ne_bytes(self.read_array()?))
    }

    pub fn read_u64(&self) -> Result<u64> {
        Ok(u64::from_ne_bytes(self.read_array()?))
    }

    pub fn read_bool(&self) -> Result<bool> {
        Ok(self.read_i32()? != 0)
    }

    /// Read a nullable UTF-16 string written by
    /// [`write_string16`](Self::write_string16) or
    /// [`write_nullable_string16`](Self::write_nullable_string16).
    pub fn read_string16(&self) -> Result<Option<String>> {
        let start = self.position.get();
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        let res = usize::try_from(len)
            .or(Err(StatusCode::BAD_VALUE))
            .and_then(|len| {
                let bytes = self.read_raw((len + 1) * size_of::<u16>())?;
                let units: Vec<u16> = bytes
                    .chunks_exact(size_of::<u16>())
                    .take(len)
                    .map(|c| u16::from_ne_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16(&units).or(Err(StatusCode::BAD_VALUE))
            });
        if res.is_err() {
            self.position.set(start);
        }
        res.map(Some)
    }

    /// Read a binder object reference, [`None`] for a null reference.
    ///
    /// Fails with [`StatusCode::BAD_TYPE`] if the bytes at the cursor are not
    /// a reference the parcel carries.
    pub fn read_binder(&self) -> Result<Option<SpIBinder>> {
        let offset = self.position.get();
        match self.read_i32()? {
            BINDER_TYPE_NULL => Ok(None),
            BINDER_TYPE_OBJECT => {
                let object = self.objects.iter().find(|o| o.offset == offset);
                match object {
                    Some(object) => Ok(Some(object.binder.clone())),
                    None => {
                        self.position.set(offset);
                        Err(StatusCode::BAD_TYPE)
                    }
                }
            }
            _ => {
                self.position.set(offset);
                Err(StatusCode::BAD_TYPE)
            }
        }
    }

    /// Parses the RPC header, failing with [`StatusCode::BAD_TYPE`] unless
    /// the interface named in the header is `descriptor`.
    pub fn enforce_interface(&self, descriptor: &str) -> Result<()> {
        let header = self.read_i32()?;
        if header != INTERFACE_HEADER {
            return Err(StatusCode::BAD_TYPE);
        }
        match self.read_string16()? {
            Some(token) if token == descriptor => Ok(()),
            token => {
                log::warn!(
                    "interface token {:?} does not match expected {:?}",
                    token,
                    descriptor
                );
                Err(StatusCode::BAD_TYPE)
            }
        }
    }

    fn read_array<const N: usize>(&self) -> Result<[u8; N]> {
        let bytes = self.read_raw(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes[..N]);
        Ok(out)
    }

    /// Consume `len` bytes plus padding, or nothing at all if that many are
    /// not available.
    fn read_raw(&self, len: usize) -> Result<&[u8]> {
        let start = self.position.get();
        let padded = pad_size(len);
        let end = start.checked_add(padded).ok_or(StatusCode::BAD_VALUE)?;
        if end > self.data.len() {
            return Err(StatusCode::NOT_ENOUGH_DATA);
        }
        self.position.set(end);
        Ok(&self.data[start..start + len])
    }

    fn write_aligned(&mut self, bytes: &[u8]) {
        let padded = pad_size(bytes.len());
        self.grow(padded);
        self.data.extend_from_slice(bytes);
        self.data.resize(self.data.len() + padded - bytes.len(), 0);
    }

    fn grow(&mut self, additional: usize) {
        let needed = self.data.len() + additional;
        if needed <= self.data.capacity() {
            return;
        }
        let target = needed.max(self.data.capacity() * 2).max(MIN_CAPACITY);
        self.data.reserve_exact(target - self.data.len());
    }
}

fn pad_size(len: usize) -> usize {
    (len + 3) & !3
}

impl fmt::Display for Parcel {
    /// Dump the parcel contents, 16 bytes per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Parcel(")?;
        for (line, chunk) in self.data.chunks(16).enumerate() {
            write!(f, "  0x{:08x}:", line * 16)?;
            for word in chunk.chunks(4) {
                write!(f, " ")?;
                for byte in word {
                    write!(f, "{:02x}", byte)?;
                }
            }
            let ascii: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
                .collect();
            writeln!(f, " '{}'", ascii)?;
        }
        if self.data.is_empty() {
            writeln!(f, "  NULL")?;
        }
        for (i, object) in self.objects.iter().enumerate() {
            writeln!(f, "  Object #{} @ 0x{:x}: {:?}", i, object.offset, object.binder)?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for Parcel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parcel")
            .field("data_size", &self.data.len())
            .field("data_position", &self.position.get())
            .field("objects", &self.objects.len())
            .finish()
    }
}
