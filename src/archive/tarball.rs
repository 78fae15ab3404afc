use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::DecodeError;

use super::{ArchiveFormat, Entry};

/// A decoded tar archive: members point into the (decompressed) bytes.
pub(crate) struct TarContents {
    data: Arc<[u8]>,
    members: Vec<TarMember>,
}

struct TarMember {
    path: String,
    is_directory: bool,
    offset: usize,
    size: usize,
}

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

impl TarContents {
    pub fn decode(source: &Arc<[u8]>) -> Result<Self, DecodeError> {
        let corrupted = |e: std::io::Error| DecodeError::Corrupted(e.to_string());

        let data: Arc<[u8]> = if source.starts_with(&GZIP_MAGIC) {
            let mut out = Vec::new();
            GzDecoder::new(&source[..])
                .read_to_end(&mut out)
                .map_err(corrupted)?;
            Arc::from(out)
        } else {
            source.clone()
        };

        let members = list_members(&data)?;
        Ok(Self { data, members })
    }

    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        self.members.iter().map(|m| Entry {
            path: m.path.clone(),
            is_directory: m.is_directory,
            uncompressed_size: Some(m.size as u64),
            source_format: ArchiveFormat::Tar,
        })
    }

    /// Bytes of the first member whose normalized path equals `path`.
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.members
            .iter()
            .find(|m| !m.is_directory && super::entry::normalize_path(&m.path) == path)
            .map(|m| self.data[m.offset..m.offset + m.size].to_vec())
    }
}

fn list_members(data: &[u8]) -> Result<Vec<TarMember>, DecodeError> {
    let corrupted = |e: std::io::Error| DecodeError::Corrupted(e.to_string());

    let mut archive = tar::Archive::new(Cursor::new(data));
    let mut members = Vec::new();
    for entry in archive.entries().map_err(corrupted)? {
        let entry = entry.map_err(corrupted)?;
        let kind = entry.header().entry_type();
        if !kind.is_dir() && !kind.is_file() {
            continue;
        }

        let mut path = entry.path().map_err(corrupted)?.to_string_lossy().to_string();
        if kind.is_dir() && !path.ends_with('/') {
            path.push('/');
        }
        let offset = entry.raw_file_position() as usize;
        let size = entry.size() as usize;
        if offset.saturating_add(size) > data.len() {
            return Err(DecodeError::Corrupted(format!(
                "tar member '{}' runs past the end of the archive",
                path
            )));
        }
        members.push(TarMember {
            path,
            is_directory: kind.is_dir(),
            offset,
            size,
        });
    }

    Ok(members)
}
