//! Backing store file
//!
//! File format: [MAGIC "FKVMEMF1"][LEN u32 LE][HEADER][CRC32 u32 LE]
//!
//! The header (bincode) records the capacity the store is created with. The
//! server reads its limits from here; the file is created fresh per run and
//! never overwritten.

use crate::common::{Error, Result, StoreLimits};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

const MEMFILE_MAGIC: &[u8; 8] = b"FKVMEMF1";
const MEMFILE_VERSION: u32 = 1;
const MAX_HEADER_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemFileHeader {
    pub version: u32,
    pub limits: StoreLimits,
    pub created_at: DateTime<Utc>,
}

/// Create a new backing store file. Fails if `path` already exists.
pub fn create(path: impl AsRef<Path>, limits: StoreLimits) -> Result<MemFileHeader> {
    let path = path.as_ref();
    limits.validate()?;

    let header = MemFileHeader {
        version: MEMFILE_VERSION,
        limits,
        created_at: Utc::now(),
    };
    let payload = bincode::serialize(&header)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                Error::MemFile(format!("{} already exists", path.display()))
            }
            _ => Error::Io(e),
        })?;

    file.write_all(MEMFILE_MAGIC)?;
    file.write_all(&(payload.len() as u32).to_le_bytes())?;
    file.write_all(&payload)?;
    file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    file.sync_all()?;

    tracing::info!(
        "Created memfile {} (max keys {}, value blocks {} x {})",
        path.display(),
        limits.max_keys,
        limits.value_blocks,
        limits.value_block_size
    );
    Ok(header)
}

/// Read and verify the header of an existing backing store file.
pub fn open(path: impl AsRef<Path>) -> Result<MemFileHeader> {
    let path = path.as_ref();
    let mut file = File::open(path)?;

    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)?;
    if &magic != MEMFILE_MAGIC {
        return Err(Error::MemFile(format!(
            "{} is not a fabrickv memfile",
            path.display()
        )));
    }

    let mut len = [0u8; 4];
    file.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_HEADER_LEN {
        return Err(Error::MemFile(format!("header too large: {} bytes", len)));
    }

    let mut payload = vec![0u8; len];
    file.read_exact(&mut payload)?;
    let mut crc = [0u8; 4];
    file.read_exact(&mut crc)?;
    let expected = u32::from_le_bytes(crc);
    let actual = crc32fast::hash(&payload);
    if expected != actual {
        return Err(Error::ChecksumMismatch { expected, actual });
    }

    let header: MemFileHeader = bincode::deserialize(&payload)?;
    if header.version != MEMFILE_VERSION {
        return Err(Error::MemFile(format!(
            "unsupported memfile version {}",
            header.version
        )));
    }
    header.limits.validate()?;
    Ok(header)
}

/// Header rendered as JSON for `fabrickv-memfile -o info`
pub fn info(path: impl AsRef<Path>) -> Result<serde_json::Value> {
    let path = path.as_ref();
    let header = open(path)?;
    Ok(serde_json::json!({
        "path": path.display().to_string(),
        "version": header.version,
        "created_at": header.created_at.to_rfc3339(),
        "max_keys": header.limits.max_keys,
        "max_key_length": header.limits.max_key_length,
        "value_block_size": header.limits.value_block_size,
        "value_blocks": header.limits.value_blocks,
        "value_capacity": header.limits.value_capacity(),
    }))
}
