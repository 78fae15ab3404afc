//! Central directory parser.
//!
//! ZIP archives are read from the end: the End of Central Directory record
//! (optionally its ZIP64 variant) locates the central directory, which holds
//! the metadata of every entry. Entry data is only touched when an entry is
//! read, through its Local File Header.

use std::io::Cursor;
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};

use super::structures::*;

/// Longest comment the 16-bit length field can describe.
const MAX_COMMENT_SIZE: usize = u16::MAX as usize;

/// Where the central directory is and how many records it claims.
struct Directory {
    offset: u64,
    size: u64,
    entries: u64,
}

/// Parser over any [`ReadAt`] source holding a whole archive.
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    async fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.reader.read_at(offset, &mut buf).await?;
        Ok(buf)
    }

    /// The End of Central Directory record and its offset.
    ///
    /// The record is followed by a comment of up to 64 KiB, so the tail of
    /// the archive is scanned backwards for a signature whose comment length
    /// accounts exactly for the remaining bytes.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let min = EndOfCentralDirectory::SIZE as u64;
        if self.size < min {
            bail!("Not a valid ZIP file: {} bytes is too short", self.size);
        }

        let tail_len = (MAX_COMMENT_SIZE as u64 + min).min(self.size);
        let tail_start = self.size - tail_len;
        let tail = self.read_vec(tail_start, tail_len as usize).await?;

        let last = tail.len() - EndOfCentralDirectory::SIZE;
        let found = (0..=last).rev().find(|&i| {
            tail[i..].starts_with(EndOfCentralDirectory::SIGNATURE)
                && usize::from(u16::from_le_bytes([tail[i + 20], tail[i + 21]])) == last - i
        });
        match found {
            Some(i) => Ok((EndOfCentralDirectory::parse(&tail[i..])?, tail_start + i as u64)),
            None => bail!("Not a valid ZIP file: end of central directory not found"),
        }
    }

    /// The ZIP64 end record, reached through the locator that immediately
    /// precedes the regular end record.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .context("ZIP64 locator out of range")?;
        let locator =
            Zip64EOCDLocator::parse(&self.read_vec(locator_offset, Zip64EOCDLocator::SIZE).await?)?;
        if locator.eocd64_offset >= locator_offset {
            bail!("ZIP64 end record points past its locator");
        }
        Zip64EOCD::parse(&self.read_vec(locator.eocd64_offset, Zip64EOCD::MIN_SIZE).await?)
    }

    async fn directory(&self) -> Result<(Directory, u64)> {
        let (eocd, eocd_offset) = self.find_eocd().await?;
        let dir = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            Directory {
                offset: eocd64.cd_offset,
                size: eocd64.cd_size,
                entries: eocd64.total_entries,
            }
        } else {
            Directory {
                offset: u64::from(eocd.cd_offset),
                size: u64::from(eocd.cd_size),
                entries: u64::from(eocd.total_entries),
            }
        };
        Ok((dir, eocd_offset))
    }

    /// Every central directory record, in archive order.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let (dir, eocd_offset) = self.directory().await?;

        if dir.offset.saturating_add(dir.size) > eocd_offset {
            bail!("Central directory overlaps the end record");
        }
        if dir.entries > dir.size / CDFH_MIN_SIZE as u64 {
            bail!("Central directory claims {} entries in {} bytes", dir.entries, dir.size);
        }

        let data = self.read_vec(dir.offset, dir.size as usize).await?;
        let mut cursor = Cursor::new(data.as_slice());
        (0..dir.entries)
            .map(|index| {
                ZipFileEntry::read_central(&mut cursor)
                    .with_context(|| format!("central directory record {}", index))
            })
            .collect()
    }

    /// Offset of the first byte of entry data, past the Local File Header
    /// and its variable-length name and extra field.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let header = self.read_vec(entry.lfh_offset, LFH_SIZE).await?;
        local_data_offset(&header, entry.lfh_offset)
            .with_context(|| format!("entry {}", entry.file_name))
    }
}
