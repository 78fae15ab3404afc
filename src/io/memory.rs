use super::ReadAt;
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::Arc;

/// Random access over an archive that is already held in memory.
///
/// Reads past the end fail instead of returning short, so a truncated
/// archive surfaces as a parse error rather than as zero-filled data.
#[derive(Clone)]
pub struct MemoryReader {
    data: Arc<[u8]>,
}

impl MemoryReader {
    pub fn new(data: Arc<[u8]>) -> Self {
        Self { data }
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.data
    }
}

#[async_trait]
impl ReadAt for MemoryReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let start = usize::try_from(offset)?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            bail!(
                "unexpected end of archive: wanted {} bytes at offset {}, archive is {} bytes",
                buf.len(),
                offset,
                self.data.len()
            );
        };
        buf.copy_from_slice(&self.data[start..end]);
        Ok(buf.len())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
