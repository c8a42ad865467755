// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver to read vital product data (VPD) from a FRU ID EEPROM image.
//!
//! We assume the EEPROM is exposed as a plain byte-addressable file (a sysfs
//! `eeprom` attribute or a raw device node), and that the board product name
//! is free-form ASCII at a fixed offset and of a fixed width.  The field is
//! not necessarily NUL-terminated and is often padded inconsistently, so
//! callers are expected to match it by substring rather than by equality.

use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;

/// Largest product name window we will read.
pub const MAX_PRODUCT_LEN: usize = 64;

/// Default location of the board product name within the EEPROM image.
pub const PRODUCT_NAME_OFFSET: u64 = 0x20;

/// Default width of the board product name field.
pub const PRODUCT_NAME_LEN: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VpdError {
    /// The EEPROM image does not exist or could not be opened.
    Open(io::ErrorKind),
    /// Seeking to the field offset failed.
    Seek(io::ErrorKind),
    /// The requested window exceeds [`MAX_PRODUCT_LEN`].
    WindowTooLarge(usize),
}

impl VpdError {
    /// Whether the error indicates that there is no EEPROM at all, which for
    /// an unpopulated connector is the expected state.
    pub fn is_absent(&self) -> bool {
        matches!(self, VpdError::Open(io::ErrorKind::NotFound))
    }
}

impl fmt::Display for VpdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpdError::Open(kind) => write!(f, "cannot open EEPROM: {kind:?}"),
            VpdError::Seek(kind) => write!(f, "cannot seek EEPROM: {kind:?}"),
            VpdError::WindowTooLarge(len) => {
                write!(f, "{len} byte window exceeds {MAX_PRODUCT_LEN}")
            }
        }
    }
}

impl std::error::Error for VpdError {}

/// Where in the EEPROM image the product name lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FruWindow {
    offset: u64,
    len: usize,
}

impl Default for FruWindow {
    fn default() -> Self {
        Self {
            offset: PRODUCT_NAME_OFFSET,
            len: PRODUCT_NAME_LEN,
        }
    }
}

impl FruWindow {
    pub fn new(offset: u64, len: usize) -> Result<Self, VpdError> {
        if len > MAX_PRODUCT_LEN {
            return Err(VpdError::WindowTooLarge(len));
        }
        Ok(Self { offset, len })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A product name as read from the EEPROM: a bounded buffer plus the number
/// of bytes actually read.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ProductName {
    buf: [u8; MAX_PRODUCT_LEN],
    len: usize,
}

impl ProductName {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_PRODUCT_LEN);
        let mut buf = [0; MAX_PRODUCT_LEN];
        buf[..len].copy_from_slice(&bytes[..len]);
        Self { buf, len }
    }

    /// The raw bytes read, including any padding or garbage.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The field decoded as text, ending at the first NUL.  Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn text(&self) -> Cow<'_, str> {
        let raw = self.as_bytes();
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end])
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text().contains(needle)
    }
}

impl fmt::Debug for ProductName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProductName({:?})", self.text())
    }
}

impl fmt::Display for ProductName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text().trim_end())
    }
}

/// Reads up to `out.len()` bytes starting at `offset` of the file at `path`,
/// returning the number of bytes read.
///
/// A short read is not an error: whatever the file yields before EOF (or
/// before a read error) is returned.  The file is closed before returning.
pub fn read_window(
    path: &Path,
    offset: u64,
    out: &mut [u8],
) -> Result<usize, VpdError> {
    let mut file = File::open(path).map_err(|e| VpdError::Open(e.kind()))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| VpdError::Seek(e.kind()))?;

    let mut n = 0;
    while n < out.len() {
        match file.read(&mut out[n..]) {
            Ok(0) => break,
            Ok(k) => n += k,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("{}: read stopped after {n} bytes: {e}", path.display());
                break;
            }
        }
    }
    Ok(n)
}

/// Reads the board product name field from the EEPROM image at `path`.
pub fn read_product_name(
    path: &Path,
    window: FruWindow,
) -> Result<ProductName, VpdError> {
    let mut buf = [0u8; MAX_PRODUCT_LEN];
    let n = read_window(path, window.offset, &mut buf[..window.len])?;
    let name = ProductName::from_bytes(&buf[..n]);
    debug!("{}: product name {name:?}", path.display());
    Ok(name)
}
