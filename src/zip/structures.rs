//! On-disk ZIP records, read and written little-endian.

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use anyhow::{Result, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Stored,
            8 => Self::Deflate,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 8,
            Self::Unknown(v) => v,
        }
    }
}

/// Marker value of a 32-bit field whose real value lives in the ZIP64 extra.
const SATURATED_U32: u32 = u32::MAX;
/// Header id of the ZIP64 extended information extra field.
const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Check the signature and minimum length of a fixed-size record and return
/// the bytes after the signature.
fn record_body<'a>(data: &'a [u8], signature: &[u8], min_len: usize, what: &str) -> Result<&'a [u8]> {
    if data.len() < min_len || !data.starts_with(signature) {
        bail!("Invalid {}", what);
    }
    Ok(&data[signature.len()..min_len])
}

/// End of Central Directory record, 22 bytes plus a trailing comment.
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = record_body(data, Self::SIGNATURE, Self::SIZE, "End of Central Directory")?;
        Ok(Self {
            disk_number: r.read_u16::<LE>()?,
            disk_with_cd: r.read_u16::<LE>()?,
            disk_entries: r.read_u16::<LE>()?,
            total_entries: r.read_u16::<LE>()?,
            cd_size: r.read_u32::<LE>()?,
            cd_offset: r.read_u32::<LE>()?,
            comment_len: r.read_u16::<LE>()?,
        })
    }

    /// Whether any field is saturated and the ZIP64 record must be read.
    pub fn is_zip64(&self) -> bool {
        self.disk_entries == u16::MAX
            || self.total_entries == u16::MAX
            || self.cd_size == SATURATED_U32
            || self.cd_offset == SATURATED_U32
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(Self::SIGNATURE)?;
        for half in [
            self.disk_number,
            self.disk_with_cd,
            self.disk_entries,
            self.total_entries,
        ] {
            out.write_u16::<LE>(half)?;
        }
        out.write_u32::<LE>(self.cd_size)?;
        out.write_u32::<LE>(self.cd_offset)?;
        out.write_u16::<LE>(self.comment_len)
    }
}

/// Points at the ZIP64 end record; sits right before the regular one.
pub struct Zip64EOCDLocator {
    pub eocd64_offset: u64,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = record_body(data, Self::SIGNATURE, Self::SIZE, "ZIP64 locator")?;
        let _disk_with_eocd64 = r.read_u32::<LE>()?;
        Ok(Self {
            eocd64_offset: r.read_u64::<LE>()?,
        })
    }
}

/// The central directory fields of the ZIP64 end record. Disk numbers and
/// versions are skipped; multi-disk archives are not supported.
pub struct Zip64EOCD {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let body = record_body(data, Self::SIGNATURE, Self::MIN_SIZE, "ZIP64 end record")?;
        // record size (8), versions (2 + 2), disk numbers (4 + 4), disk entries (8)
        let mut r = &body[28..];
        Ok(Self {
            total_entries: r.read_u64::<LE>()?,
            cd_size: r.read_u64::<LE>()?,
            cd_offset: r.read_u64::<LE>()?,
        })
    }
}

pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

pub const FLAG_ENCRYPTED: u16 = 1 << 0;
/// CRC and sizes follow the data instead of preceding it.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
pub const FLAG_UTF8: u16 = 1 << 11;

/// 2.0: deflate and directories.
pub const VERSION_NEEDED: u16 = 20;
/// UNIX host, format 6.3.
pub const VERSION_MADE_BY: u16 = (3 << 8) | 63;

/// One central directory record.
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
}

impl ZipFileEntry {
    /// Read one central directory record at the cursor and leave the cursor
    /// on the next one.
    pub fn read_central(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let mut fixed = [0u8; CDFH_MIN_SIZE];
        cursor.read_exact(&mut fixed)?;
        let mut r = record_body(&fixed, CDFH_SIGNATURE, CDFH_MIN_SIZE, "Central Directory File Header")?;

        let _versions = r.read_u32::<LE>()?;
        let flags = r.read_u16::<LE>()?;
        let method = r.read_u16::<LE>()?;
        let last_mod_time = r.read_u16::<LE>()?;
        let last_mod_date = r.read_u16::<LE>()?;
        let crc32 = r.read_u32::<LE>()?;
        let compressed = r.read_u32::<LE>()?;
        let uncompressed = r.read_u32::<LE>()?;
        let name_len = r.read_u16::<LE>()? as usize;
        let extra_len = r.read_u16::<LE>()? as usize;
        let comment_len = r.read_u16::<LE>()? as u64;
        // disk start, internal and external attributes
        let _attrs = (r.read_u16::<LE>()?, r.read_u16::<LE>()?, r.read_u32::<LE>()?);
        let lfh_offset = r.read_u32::<LE>()?;

        let mut name = vec![0u8; name_len];
        cursor.read_exact(&mut name)?;
        let mut extra = vec![0u8; extra_len];
        cursor.read_exact(&mut extra)?;
        let next = cursor.position() + comment_len;
        if next > cursor.get_ref().len() as u64 {
            bail!("Central Directory File Header runs past the directory");
        }
        cursor.set_position(next);

        let mut wide = Zip64Values {
            uncompressed: widen(uncompressed),
            compressed: widen(compressed),
            lfh_offset: widen(lfh_offset),
        };
        wide.fill_from_extra(&extra)?;

        let file_name = String::from_utf8_lossy(&name).into_owned();
        Ok(Self {
            is_directory: file_name.ends_with('/') || file_name.ends_with('\\'),
            file_name,
            flags,
            compression_method: CompressionMethod::from_u16(method),
            compressed_size: wide.compressed.unwrap_or(u64::from(SATURATED_U32)),
            uncompressed_size: wide.uncompressed.unwrap_or(u64::from(SATURATED_U32)),
            crc32,
            lfh_offset: wide.lfh_offset.unwrap_or(u64::from(SATURATED_U32)),
            last_mod_time,
            last_mod_date,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// (year, month, day) of the DOS date field.
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let d = self.last_mod_date;
        (1980 + (d >> 9), ((d >> 5) & 0x0F) as u8, (d & 0x1F) as u8)
    }

    /// (hour, minute, second) of the DOS time field; seconds are even.
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let t = self.last_mod_time;
        ((t >> 11) as u8, ((t >> 5) & 0x3F) as u8, ((t & 0x1F) * 2) as u8)
    }
}

/// `None` marks a saturated field still waiting for its ZIP64 value.
fn widen(value: u32) -> Option<u64> {
    (value != SATURATED_U32).then_some(u64::from(value))
}

struct Zip64Values {
    uncompressed: Option<u64>,
    compressed: Option<u64>,
    lfh_offset: Option<u64>,
}

impl Zip64Values {
    /// The ZIP64 extra holds 64-bit values only for the saturated fields,
    /// in the order uncompressed, compressed, offset.
    fn fill_from_extra(&mut self, mut extra: &[u8]) -> Result<()> {
        while extra.len() >= 4 {
            let id = extra.read_u16::<LE>()?;
            let len = extra.read_u16::<LE>()? as usize;
            let (mut field, rest) = extra.split_at(len.min(extra.len()));
            extra = rest;
            if id != ZIP64_EXTRA_ID {
                continue;
            }
            for slot in [&mut self.uncompressed, &mut self.compressed, &mut self.lfh_offset] {
                if slot.is_none() && field.len() >= 8 {
                    *slot = Some(field.read_u64::<LE>()?);
                }
            }
        }
        Ok(())
    }
}

/// Offset of an entry's data given the start of its Local File Header.
pub fn local_data_offset(header: &[u8], lfh_offset: u64) -> Result<u64> {
    let mut r = record_body(header, LFH_SIGNATURE, LFH_SIZE, "Local File Header")?;
    let mut skipped = [0u8; 22];
    r.read_exact(&mut skipped)?;
    let name_len = r.read_u16::<LE>()? as u64;
    let extra_len = r.read_u16::<LE>()? as u64;
    Ok(lfh_offset + LFH_SIZE as u64 + name_len + extra_len)
}

/// Header fields shared by the local file header and the central directory
/// record of an entry being written.
pub struct EntryHeader<'a> {
    pub file_name: &'a str,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl EntryHeader<'_> {
    /// Local File Header without extra field.
    pub fn write_local<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(LFH_SIGNATURE)?;
        out.write_u16::<LE>(VERSION_NEEDED)?;
        self.write_common(out)?;
        out.write_all(self.file_name.as_bytes())
    }

    /// Central directory record; no comment, disk 0.
    pub fn write_central<W: Write>(
        &self,
        out: &mut W,
        external_attrs: u32,
        lfh_offset: u32,
    ) -> std::io::Result<()> {
        out.write_all(CDFH_SIGNATURE)?;
        out.write_u16::<LE>(VERSION_MADE_BY)?;
        out.write_u16::<LE>(VERSION_NEEDED)?;
        self.write_common(out)?;
        // comment length, disk start, internal attributes
        out.write_all(&[0; 6])?;
        out.write_u32::<LE>(external_attrs)?;
        out.write_u32::<LE>(lfh_offset)?;
        out.write_all(self.file_name.as_bytes())
    }

    fn write_common<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for half in [
            self.flags,
            self.compression_method.as_u16(),
            self.last_mod_time,
            self.last_mod_date,
        ] {
            out.write_u16::<LE>(half)?;
        }
        for word in [self.crc32, self.compressed_size, self.uncompressed_size] {
            out.write_u32::<LE>(word)?;
        }
        out.write_u16::<LE>(self.file_name.len() as u16)?;
        out.write_u16::<LE>(0)
    }
}
