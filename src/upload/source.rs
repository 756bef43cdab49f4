//! Source file access
//!
//! Byte-range reads of the local file being uploaded. Every read opens its
//! own handle, so concurrent part workers never share a cursor.

use bytes::{Bytes, BytesMut};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Length of the file at `path`; fails unless it is a regular file
pub async fn file_len(path: &Path) -> io::Result<u64> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }
    Ok(metadata.len())
}

/// Read `length` bytes starting at `offset`
pub async fn read_range(path: &Path, offset: u64, length: u64) -> io::Result<Bytes> {
    let length = usize::try_from(length).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range of {} bytes does not fit in memory", length),
        )
    })?;

    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut buffer = BytesMut::zeroed(length);
    file.read_exact(&mut buffer).await?;
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_read_range() {
        let file = source_file(b"0123456789");
        let bytes = read_range(file.path(), 3, 4).await.unwrap();
        assert_eq!(&bytes[..], b"3456");
    }

    #[tokio::test]
    async fn test_read_empty_range() {
        let file = source_file(b"");
        let bytes = read_range(file.path(), 0, 0).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_read_past_end_fails() {
        let file = source_file(b"abc");
        let err = read_range(file.path(), 2, 5).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_file_len() {
        let file = source_file(b"hello");
        assert_eq!(file_len(file.path()).await.unwrap(), 5);

        let dir = tempfile::tempdir().unwrap();
        assert!(file_len(dir.path()).await.is_err());
    }
}
