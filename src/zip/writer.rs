use flate2::Compression;
use flate2::Crc;
use flate2::write::DeflateEncoder;
use std::io::Write;
use time::OffsetDateTime;

use anyhow::{Result, anyhow, bail};

use super::crypto::{self, Keys};
use super::structures::*;

/// Per-file encoding choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub method: CompressionMethod,
    pub level: u32,
}

impl WriteOptions {
    pub fn stored() -> Self {
        Self {
            method: CompressionMethod::Stored,
            level: 0,
        }
    }

    pub fn deflate(level: u32) -> Self {
        Self {
            method: CompressionMethod::Deflate,
            level: level.min(9),
        }
    }
}

/// In-memory ZIP encoder producing a classic (non-ZIP64) archive.
pub struct ZipWriter {
    out: Vec<u8>,
    central: Vec<u8>,
    entries: usize,
    passphrase: Option<Vec<u8>>,
    last_mod_time: u16,
    last_mod_date: u16,
}

impl ZipWriter {
    pub fn new() -> Self {
        Self::with_timestamp(OffsetDateTime::now_utc())
    }

    pub fn with_timestamp(at: OffsetDateTime) -> Self {
        let (last_mod_time, last_mod_date) = dos_timestamp(at);
        Self {
            out: Vec::new(),
            central: Vec::new(),
            entries: 0,
            passphrase: None,
            last_mod_time,
            last_mod_date,
        }
    }

    /// Encrypt every subsequent entry with ZipCrypto.
    pub fn set_passphrase(&mut self, passphrase: &[u8]) {
        self.passphrase = Some(passphrase.to_vec());
    }

    pub fn add_file(&mut self, name: &str, data: &[u8], options: WriteOptions) -> Result<()> {
        let mut crc = Crc::new();
        crc.update(data);
        let crc32 = crc.sum();

        let mut payload = match options.method {
            CompressionMethod::Stored => data.to_vec(),
            CompressionMethod::Deflate => {
                let mut encoder =
                    DeflateEncoder::new(Vec::new(), Compression::new(options.level));
                encoder.write_all(data)?;
                encoder.finish()?
            }
            CompressionMethod::Unknown(method) => {
                bail!("Unsupported compression method: {}", method)
            }
        };

        let mut flags = FLAG_UTF8;
        if let Some(passphrase) = &self.passphrase {
            flags |= FLAG_ENCRYPTED;
            let mut header = [0u8; crypto::HEADER_LEN];
            getrandom::getrandom(&mut header[..crypto::HEADER_LEN - 1])
                .map_err(|e| anyhow!("no randomness for encryption header: {}", e))?;
            header[crypto::HEADER_LEN - 1] = (crc32 >> 24) as u8;

            let mut keys = Keys::new(passphrase);
            keys.encrypt(&mut header);
            keys.encrypt(&mut payload);
            payload.splice(0..0, header);
        }

        let header = EntryHeader {
            file_name: name,
            flags,
            compression_method: options.method,
            last_mod_time: self.last_mod_time,
            last_mod_date: self.last_mod_date,
            crc32,
            compressed_size: fit_u32(payload.len() as u64, name)?,
            uncompressed_size: fit_u32(data.len() as u64, name)?,
        };
        // Regular file, rw-r--r--
        self.push(&header, &payload, 0o100644 << 16)
    }

    pub fn add_directory(&mut self, name: &str) -> Result<()> {
        let name = if name.ends_with('/') {
            name.to_string()
        } else {
            format!("{}/", name)
        };
        let header = EntryHeader {
            file_name: &name,
            flags: FLAG_UTF8,
            compression_method: CompressionMethod::Stored,
            last_mod_time: self.last_mod_time,
            last_mod_date: self.last_mod_date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
        };
        // Directory, rwxr-xr-x, plus the MS-DOS directory bit
        self.push(&header, &[], (0o040755 << 16) | 0x10)
    }

    fn push(&mut self, header: &EntryHeader<'_>, payload: &[u8], external_attrs: u32) -> Result<()> {
        if self.entries >= 0xFFFF {
            bail!("Too many entries for a ZIP archive without ZIP64");
        }
        if header.file_name.len() > u16::MAX as usize {
            bail!("File name too long: {}", header.file_name);
        }

        let lfh_offset = fit_u32(self.out.len() as u64, header.file_name)?;
        header.write_local(&mut self.out)?;
        self.out.extend_from_slice(payload);
        header.write_central(&mut self.central, external_attrs, lfh_offset)?;
        self.entries += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        let cd_offset = fit_u32(self.out.len() as u64, "central directory")?;
        let cd_size = fit_u32(self.central.len() as u64, "central directory")?;
        self.out.extend_from_slice(&self.central);

        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: self.entries as u16,
            total_entries: self.entries as u16,
            cd_size,
            cd_offset,
            comment_len: 0,
        };
        eocd.write_to(&mut self.out)?;
        Ok(self.out)
    }
}

impl Default for ZipWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn fit_u32(value: u64, what: &str) -> Result<u32> {
    // 0xFFFFFFFF itself is the ZIP64 marker
    if value >= u32::MAX as u64 {
        bail!("{} needs ZIP64, which is not supported when writing", what);
    }
    Ok(value as u32)
}

/// MS-DOS (time, date) pair. Dates before 1980 clamp to the DOS epoch.
fn dos_timestamp(at: OffsetDateTime) -> (u16, u16) {
    if at.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let time = ((at.hour() as u16) << 11) | ((at.minute() as u16) << 5) | (at.second() as u16 / 2);
    let date = (((at.year() - 1980) as u16) << 9) | ((u8::from(at.month()) as u16) << 5) | at.day() as u16;
    (time, date)
}
