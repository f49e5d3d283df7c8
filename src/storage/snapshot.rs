use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use crc32fast::Hasher;
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::memory_engine::EngineState;

// [ MAGIC "BKDB" ][ VERSION u32 ][ CRC32 u32 ][ LEN u64 ]  <- 20 byte header
// [ bincode(EngineState) ]
const MAGIC: &[u8; 4] = b"BKDB";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 20;

/// Write `state` to `path` atomically (temp file, fsync, rename)
pub fn write_snapshot(path: &Path, state: &EngineState) -> Result<()> {
    let payload = bincode::serialize(state)?;

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let checksum = hasher.finalize();

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    {
        let mut file = File::create(tmp_path)?;
        file.write_all(MAGIC)?;
        file.write_all(&VERSION.to_le_bytes())?;
        file.write_all(&checksum.to_le_bytes())?;
        file.write_all(&(payload.len() as u64).to_le_bytes())?;
        file.write_all(&payload)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}

/// Load a snapshot; `Ok(None)` when the file does not exist yet
pub fn read_snapshot(path: &Path) -> Result<Option<EngineState>> {
    if !path.exists() {
        return Ok(None);
    }

    let data = fs::read(path)?;
    if data.is_empty() {
        return Ok(None);
    }
    if data.len() < HEADER_SIZE || &data[0..4] != MAGIC {
        return Err(corrupted(path, "bad header"));
    }

    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != VERSION {
        return Err(Error::new(
            ErrorKind::Corrupted,
            format!("{}: unsupported snapshot version {}", path.display(), version),
        ));
    }

    let checksum = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    let mut len_buf = [0u8; 8];
    len_buf.copy_from_slice(&data[12..20]);
    let len = u64::from_le_bytes(len_buf) as usize;

    let payload = &data[HEADER_SIZE..];
    if payload.len() != len {
        return Err(corrupted(path, "truncated payload"));
    }

    let mut hasher = Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != checksum {
        return Err(corrupted(path, "checksum mismatch"));
    }

    let state = bincode::deserialize(payload)?;
    Ok(Some(state))
}

fn corrupted(path: &Path, why: &str) -> Error {
    Error::new(ErrorKind::Corrupted, format!("{}: {}", path.display(), why))
}
