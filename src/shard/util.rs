//! Utility functions for tablet files
//!
//! Provides helpers for the tablet directory layout and the framing of the
//! append-only event log.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::shard::{ShardError, ShardResult, LOG_MAGIC, LOG_VERSION};

/// Size of the log header: Magic(4) + Version(4)
pub const HEADER_SIZE: u64 = 8;

/// Size of a record frame header: Length(4) + Checksum(4)
pub const RECORD_HEADER_SIZE: u64 = 8;

/// Largest record payload accepted on replay
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// Result of reading one record from the log
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete, checksum-verified payload
    Record(Vec<u8>),
    /// Clean end of the log
    End,
    /// An incomplete or corrupt record; everything from here on is discarded
    Torn(String),
}

/// Get the path of a tablet's event log
pub fn log_path(dir: &Path) -> PathBuf {
    dir.join("events.log")
}

/// Get the path of a tablet's lock file
pub fn lock_path(dir: &Path) -> PathBuf {
    dir.join("LOCK")
}

/// Write the log header
pub fn write_header<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(&header_bytes())
}

/// Read and validate the log header
pub fn read_header<R: Read>(reader: &mut R, path: &Path) -> ShardResult<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(|e| {
        ShardError::storage(path, format!("Failed to read log header: {}", e))
    })?;

    if magic != *LOG_MAGIC {
        return Err(ShardError::storage(
            path,
            format!("Invalid event log header: {:?}", magic),
        ));
    }

    let version = reader.read_u32::<LittleEndian>()?;
    if version != LOG_VERSION {
        return Err(ShardError::storage(
            path,
            format!("Unsupported event log version: {}", version),
        ));
    }

    Ok(())
}

/// Compute the checksum of a record payload
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Check that a payload fits in a single record
pub fn check_record_size(len: usize) -> io::Result<u32> {
    u32::try_from(len)
        .ok()
        .filter(|&len| len <= MAX_RECORD_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("record of {} bytes exceeds the {} byte limit", len, MAX_RECORD_SIZE),
            )
        })
}

/// Frame a payload as one complete record
pub fn encode_record(payload: &[u8]) -> io::Result<Vec<u8>> {
    let len = check_record_size(payload.len())?;

    let mut frame = Vec::with_capacity(RECORD_HEADER_SIZE as usize + payload.len());
    frame.write_u32::<LittleEndian>(len)?;
    frame.write_u32::<LittleEndian>(checksum(payload))?;
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Bytes of a complete log header
pub fn header_bytes() -> [u8; HEADER_SIZE as usize] {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[..4].copy_from_slice(LOG_MAGIC);
    LittleEndian::write_u32(&mut header[4..], LOG_VERSION);
    header
}

/// Read one framed record
pub fn read_record<R: Read>(reader: &mut R) -> io::Result<ReadOutcome> {
    let mut frame = [0u8; RECORD_HEADER_SIZE as usize];
    let n = read_full(reader, &mut frame)?;
    if n == 0 {
        return Ok(ReadOutcome::End);
    }
    if n < frame.len() {
        return Ok(ReadOutcome::Torn(format!("truncated record header ({} bytes)", n)));
    }

    let len = LittleEndian::read_u32(&frame[0..4]);
    let expected = LittleEndian::read_u32(&frame[4..8]);
    if len > MAX_RECORD_SIZE {
        return Ok(ReadOutcome::Torn(format!("implausible record length {}", len)));
    }

    let mut payload = vec![0u8; len as usize];
    let n = read_full(reader, &mut payload)?;
    if n < payload.len() {
        return Ok(ReadOutcome::Torn(format!(
            "truncated record payload ({} of {} bytes)",
            n, len
        )));
    }

    if checksum(&payload) != expected {
        return Ok(ReadOutcome::Torn("record checksum mismatch".to_string()));
    }

    Ok(ReadOutcome::Record(payload))
}

/// Fill `buf` from `reader`, stopping early only at end of input
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_paths() {
        let dir = Path::new("/data/events/3");
        assert_eq!(log_path(dir), Path::new("/data/events/3/events.log"));
        assert_eq!(lock_path(dir), Path::new("/data/events/3/LOCK"));
    }

    #[test]
    fn test_header() -> ShardResult<()> {
        let mut buf = Vec::new();
        write_header(&mut buf)?;
        assert_eq!(buf.len() as u64, HEADER_SIZE);

        read_header(&mut Cursor::new(&buf), Path::new("events.log"))?;

        let mut bad = buf.clone();
        bad[0] = b'X';
        assert!(read_header(&mut Cursor::new(&bad), Path::new("events.log")).is_err());

        let mut future = buf.clone();
        future[4] = 9;
        assert!(read_header(&mut Cursor::new(&future), Path::new("events.log")).is_err());

        assert!(read_header(&mut Cursor::new(&buf[..3]), Path::new("events.log")).is_err());
        Ok(())
    }

    #[test]
    fn test_records_in_sequence() -> io::Result<()> {
        let mut buf = encode_record(b"first")?;
        assert_eq!(buf.len() as u64, RECORD_HEADER_SIZE + 5);
        buf.extend(encode_record(b"second")?);

        let mut reader = Cursor::new(buf);
        assert_eq!(read_record(&mut reader)?, ReadOutcome::Record(b"first".to_vec()));
        assert_eq!(read_record(&mut reader)?, ReadOutcome::Record(b"second".to_vec()));
        assert_eq!(read_record(&mut reader)?, ReadOutcome::End);
        Ok(())
    }

    #[test]
    fn test_torn_records() -> io::Result<()> {
        let buf = encode_record(b"payload")?;

        let truncated_header = &buf[..5];
        assert!(matches!(read_record(&mut Cursor::new(truncated_header))?, ReadOutcome::Torn(_)));

        let truncated_payload = &buf[..buf.len() - 2];
        assert!(matches!(read_record(&mut Cursor::new(truncated_payload))?, ReadOutcome::Torn(_)));

        let mut flipped = buf.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xff;
        assert!(matches!(read_record(&mut Cursor::new(flipped))?, ReadOutcome::Torn(_)));
        Ok(())
    }

    #[test]
    fn test_record_size_limit() {
        assert_eq!(check_record_size(0).unwrap(), 0);
        assert_eq!(check_record_size(MAX_RECORD_SIZE as usize).unwrap(), MAX_RECORD_SIZE);

        let err = check_record_size(MAX_RECORD_SIZE as usize + 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(check_record_size(usize::MAX).is_err());
    }

    #[test]
    fn test_header_bytes_match_writer() -> io::Result<()> {
        let mut buf = Vec::new();
        write_header(&mut buf)?;
        assert_eq!(buf, header_bytes());
        assert_eq!(&buf[..4], b"SKYT");
        Ok(())
    }
}
