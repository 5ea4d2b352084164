//! Self-describing archive file format.
//!
//! ```text
//! magic            8 bytes, "RGAR0001"
//! manifest frame   u32 LE length + manifest JSON
//! sections         one per collection, in manifest order:
//!                      u32 LE record count
//!                      per record: u32 LE length + payload bytes
//! trailer          32-byte SHA-256 over everything above
//! ```
//!
//! The digest is computed incrementally while the file streams out, so a
//! snapshot never needs a second full read. The manifest and trailer make
//! each file independently interpretable: the catalog index can be rebuilt
//! from the files alone.

use crate::archive::ArchiveManifest;
use crate::{BackupError, Result};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter, SeekFrom};

pub const MAGIC: &[u8; 8] = b"RGAR0001";
pub const FORMAT_VERSION: u32 = 1;

const DIGEST_LEN: usize = 32;
// Frame length sanity cap; a larger value means a mangled header, not data.
const MAX_FRAME_LEN: u32 = 1 << 30;

/// Streaming archive writer with incremental checksum.
pub struct ArchiveFileWriter {
    out: BufWriter<File>,
    hasher: Sha256,
    bytes_written: u64,
}

impl ArchiveFileWriter {
    /// Create the file and write the magic header.
    pub async fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).await?;
        let mut writer = Self {
            out: BufWriter::new(file),
            hasher: Sha256::new(),
            bytes_written: 0,
        };
        writer.put(MAGIC).await?;
        Ok(writer)
    }

    async fn put(&mut self, buf: &[u8]) -> Result<()> {
        self.out.write_all(buf).await?;
        self.hasher.update(buf);
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    pub async fn write_manifest(&mut self, manifest: &ArchiveManifest) -> Result<()> {
        let body = serde_json::to_vec(manifest)?;
        self.put(&frame_len(body.len(), "manifest")?.to_le_bytes()).await?;
        self.put(&body).await
    }

    /// Write one collection section: record count, then framed records.
    ///
    /// Rejects record counts and record sizes the reader would refuse, so an
    /// oversized record fails the snapshot instead of producing an archive
    /// that cannot be restored.
    pub async fn write_section(&mut self, records: &[Bytes]) -> Result<()> {
        self.put(&frame_len(records.len(), "record count")?.to_le_bytes()).await?;
        for record in records {
            self.put(&frame_len(record.len(), "record")?.to_le_bytes()).await?;
            self.put(record).await?;
        }
        Ok(())
    }

    /// Write the trailing digest, flush and sync. Returns the hex digest and
    /// the final file size.
    pub async fn finish(mut self) -> Result<(String, u64)> {
        let digest = self.hasher.clone().finalize();
        self.out.write_all(&digest).await?;
        let total = self.bytes_written + DIGEST_LEN as u64;
        self.out.flush().await?;
        self.out.get_ref().sync_all().await?;
        Ok((hex::encode(digest), total))
    }
}

/// Read and fully verify an archive file.
///
/// Returns the manifest, the per-collection records in manifest order, and
/// the hex digest of the payload. Fails with [`BackupError::ChecksumMismatch`]
/// if the trailer does not match the payload.
pub async fn read_archive(
    path: &Path,
) -> Result<(ArchiveManifest, Vec<(String, Vec<Bytes>)>, String)> {
    let data = tokio::fs::read(path).await?;
    if data.len() < MAGIC.len() + 4 + DIGEST_LEN {
        return Err(BackupError::Serialization("archive truncated".into()));
    }

    let (payload, trailer) = data.split_at(data.len() - DIGEST_LEN);
    let computed = Sha256::digest(payload);
    if computed.as_slice() != trailer {
        return Err(BackupError::ChecksumMismatch);
    }

    let mut buf = payload;
    if take(&mut buf, MAGIC.len())? != &MAGIC[..] {
        return Err(BackupError::Serialization("bad archive magic".into()));
    }

    let manifest_len = take_u32(&mut buf)?;
    let manifest: ArchiveManifest = serde_json::from_slice(take(&mut buf, manifest_len as usize)?)?;

    let mut sections = Vec::with_capacity(manifest.collections.len());
    for collection in &manifest.collections {
        let count = take_u32(&mut buf)?;
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = take_u32(&mut buf)?;
            records.push(Bytes::copy_from_slice(take(&mut buf, len as usize)?));
        }
        sections.push((collection.name.clone(), records));
    }

    Ok((manifest, sections, hex::encode(computed)))
}

/// Read only the manifest and the recorded trailer digest, without verifying
/// the payload. Used to rebuild the catalog from disk.
pub async fn read_summary(path: &Path) -> Result<(ArchiveManifest, String, u64)> {
    let mut file = File::open(path).await?;
    let size = file.metadata().await?.len();
    if size < (MAGIC.len() + 4 + DIGEST_LEN) as u64 {
        return Err(BackupError::Serialization("archive truncated".into()));
    }

    let mut magic = [0u8; 8];
    file.read_exact(&mut magic).await?;
    if &magic != MAGIC {
        return Err(BackupError::Serialization("bad archive magic".into()));
    }

    let mut len_buf = [0u8; 4];
    file.read_exact(&mut len_buf).await?;
    let manifest_len = u32::from_le_bytes(len_buf);
    if manifest_len > MAX_FRAME_LEN || (manifest_len as u64) > size {
        return Err(BackupError::Serialization(
            "archive manifest length out of range".into(),
        ));
    }

    let mut manifest_buf = vec![0u8; manifest_len as usize];
    file.read_exact(&mut manifest_buf).await?;
    let manifest: ArchiveManifest = serde_json::from_slice(&manifest_buf)?;

    file.seek(SeekFrom::End(-(DIGEST_LEN as i64))).await?;
    let mut trailer = [0u8; DIGEST_LEN];
    file.read_exact(&mut trailer).await?;

    Ok((manifest, hex::encode(trailer), size))
}

/// Validate a frame value against the same cap `take_u32` enforces on read.
fn frame_len(n: usize, what: &str) -> Result<u32> {
    if n as u64 > MAX_FRAME_LEN as u64 {
        return Err(BackupError::Serialization(format!(
            "{what} of {n} exceeds the archive frame limit"
        )));
    }
    Ok(n as u32)
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(BackupError::Serialization("archive truncated".into()));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn take_u32(buf: &mut &[u8]) -> Result<u32> {
    let raw = take(buf, 4)?;
    let value = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    if value > MAX_FRAME_LEN {
        return Err(BackupError::Serialization("archive frame length out of range".into()));
    }
    Ok(value)
}
