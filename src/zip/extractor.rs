use flate2::Crc;
use flate2::read::DeflateDecoder;
use std::io::Read;
use std::sync::Arc;

use crate::error::EntryError;
use crate::io::ReadAt;
use anyhow::{Result, bail};

use super::crypto::{self, Keys};
use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Reads entry contents out of a ZIP archive.
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all files in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    async fn read_stored_bytes(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        let data_offset = self.parser.get_data_offset(entry).await?;
        let available = self.parser.reader().size().saturating_sub(data_offset);
        if entry.compressed_size > available {
            bail!(
                "entry claims {} compressed bytes but only {} remain",
                entry.compressed_size,
                available
            );
        }
        let mut buf = vec![0u8; entry.compressed_size as usize];
        self.parser.reader().read_at(data_offset, &mut buf).await?;
        Ok(buf)
    }

    /// Decrypt, inflate and CRC-check one entry.
    ///
    /// On an encrypted entry, both a failed header check and a CRC mismatch
    /// are reported as a wrong passphrase: the header check alone lets one
    /// wrong key in 256 through.
    pub async fn extract_to_memory(
        &self,
        entry: &ZipFileEntry,
        passphrase: Option<&[u8]>,
    ) -> std::result::Result<Vec<u8>, EntryError> {
        let unreadable = |reason: String| EntryError::Unreadable {
            path: entry.file_name.clone(),
            reason,
        };

        let mut raw = self
            .read_stored_bytes(entry)
            .await
            .map_err(|e| unreadable(e.to_string()))?;

        if entry.is_encrypted() {
            let passphrase =
                passphrase.ok_or_else(|| EntryError::WrongPassphrase(entry.file_name.clone()))?;
            if raw.len() < crypto::HEADER_LEN {
                return Err(unreadable("encryption header is truncated".to_string()));
            }
            let mut keys = Keys::new(passphrase);
            keys.decrypt(&mut raw);
            let check = if entry.has_data_descriptor() {
                (entry.last_mod_time >> 8) as u8
            } else {
                (entry.crc32 >> 24) as u8
            };
            if raw[crypto::HEADER_LEN - 1] != check {
                return Err(EntryError::WrongPassphrase(entry.file_name.clone()));
            }
            raw.drain(..crypto::HEADER_LEN);
        }

        let data = match entry.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Deflate => {
                let mut out = Vec::new();
                DeflateDecoder::new(raw.as_slice())
                    .take(entry.uncompressed_size.saturating_add(1))
                    .read_to_end(&mut out)
                    .map_err(|e| {
                        if entry.is_encrypted() {
                            EntryError::WrongPassphrase(entry.file_name.clone())
                        } else {
                            unreadable(e.to_string())
                        }
                    })?;
                out
            }
            CompressionMethod::Unknown(method) => {
                return Err(unreadable(format!(
                    "unsupported compression method {}",
                    method
                )));
            }
        };

        let mut crc = Crc::new();
        crc.update(&data);
        if data.len() as u64 != entry.uncompressed_size || crc.sum() != entry.crc32 {
            if entry.is_encrypted() {
                return Err(EntryError::WrongPassphrase(entry.file_name.clone()));
            }
            return Err(unreadable("checksum mismatch".to_string()));
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::{EndOfCentralDirectory, EntryHeader};
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;

    const TEXT: &[u8] = b"hello hello hello";

    /// One DEFLATE entry whose saturated central sizes are replaced by the
    /// given ZIP64 values.
    fn archive_claiming(uncompressed: u64, compressed: Option<u64>) -> Vec<u8> {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::fast());
        enc.write_all(TEXT).unwrap();
        let packed = enc.finish().unwrap();
        let mut crc = Crc::new();
        crc.update(TEXT);

        let header = EntryHeader {
            file_name: "a.txt",
            flags: 0,
            compression_method: CompressionMethod::Deflate,
            last_mod_time: 0,
            last_mod_date: 0,
            crc32: crc.sum(),
            compressed_size: if compressed.is_some() { u32::MAX } else { packed.len() as u32 },
            uncompressed_size: u32::MAX,
        };
        let mut out = Vec::new();
        header.write_local(&mut out).unwrap();
        out.extend_from_slice(&packed);

        let cd_offset = out.len();
        header.write_central(&mut out, 0, 0).unwrap();
        let mut extra = Vec::new();
        extra.extend_from_slice(&1u16.to_le_bytes());
        let values: Vec<u64> = std::iter::once(uncompressed).chain(compressed).collect();
        extra.extend_from_slice(&((values.len() * 8) as u16).to_le_bytes());
        for v in values {
            extra.extend_from_slice(&v.to_le_bytes());
        }
        out[cd_offset + 30..cd_offset + 32].copy_from_slice(&(extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&extra);

        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 1,
            total_entries: 1,
            cd_size: (out.len() - cd_offset) as u32,
            cd_offset: cd_offset as u32,
            comment_len: 0,
        };
        eocd.write_to(&mut out).unwrap();
        out
    }

    fn extractor(bytes: Vec<u8>) -> ZipExtractor<MemoryReader> {
        ZipExtractor::new(Arc::new(MemoryReader::new(Arc::from(bytes))))
    }

    #[tokio::test]
    async fn huge_declared_size_is_unreadable() {
        let zip = extractor(archive_claiming(1 << 44, None));
        let entries = zip.list_files().await.unwrap();
        assert_eq!(entries[0].uncompressed_size, 1 << 44);
        let err = zip.extract_to_memory(&entries[0], None).await.unwrap_err();
        assert!(matches!(err, EntryError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn compressed_size_past_the_end_is_unreadable() {
        let zip = extractor(archive_claiming(TEXT.len() as u64, Some(1 << 44)));
        let entries = zip.list_files().await.unwrap();
        let err = zip.extract_to_memory(&entries[0], None).await.unwrap_err();
        let EntryError::Unreadable { reason, .. } = err else {
            panic!("expected an unreadable entry, got {:?}", err);
        };
        assert!(reason.contains("remain"));
    }
}
