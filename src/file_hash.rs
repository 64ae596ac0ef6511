//! Content fingerprint of video files
//!
//! Computes the 64-bit "movie hash" that subtitle databases use for exact
//! release matching: the file size plus the sums of the little-endian 64-bit
//! words of the first and the last 64 KiB, all wrapping at 2^64.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Size of each of the two hashed windows
const CHUNK_SIZE: u64 = 64 * 1024;

/// Errors that can occur while hashing a file
#[derive(Debug, Error)]
pub enum FileHashError {
    /// The file could not be opened or its size determined
    #[error("Failed to open {path}: {source}")]
    OpenFailed { path: PathBuf, source: io::Error },

    /// Reading one of the hashed windows failed
    #[error("Failed to read {path}: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },

    /// The blocking worker running the hash died
    #[error("Hashing task failed: {0}")]
    Task(String),
}

/// Computes the movie hash of a file.
///
/// Both windows are summed independently even when they overlap, which is
/// the case for files smaller than 128 KiB. Trailing bytes of a window that
/// do not fill a whole 8-byte word are ignored.
///
/// # Arguments
///
/// * `path` - Path to the video file
///
/// # Returns
///
/// The hash as a lowercase, zero-padded 16 digit hex string, or a
/// FileHashError if the file cannot be opened or read.
///
/// # Examples
///
/// ```ignore
/// let hash = compute_movie_hash(Path::new("movie.mkv"))?;
/// assert_eq!(hash.len(), 16);
/// ```
pub fn compute_movie_hash(path: &Path) -> Result<String, FileHashError> {
    let open_failed = |source| FileHashError::OpenFailed {
        path: path.to_path_buf(),
        source,
    };
    let read_failed = |source| FileHashError::ReadFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(open_failed)?;
    let size = file.metadata().map_err(open_failed)?.len();

    let head = read_window(&mut file, 0, size).map_err(read_failed)?;
    let tail_start = size.saturating_sub(CHUNK_SIZE);
    let tail = read_window(&mut file, tail_start, size).map_err(read_failed)?;

    let hash = size
        .wrapping_add(sum_words(&head))
        .wrapping_add(sum_words(&tail));

    Ok(format!("{:016x}", hash))
}

/// Computes the movie hash on the blocking thread pool
///
/// Same result as [`compute_movie_hash`], without stalling the async runtime
/// on file IO.
pub async fn hash_video(path: &Path) -> Result<String, FileHashError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || compute_movie_hash(&path))
        .await
        .map_err(|e| FileHashError::Task(e.to_string()))?
}

/// Reads up to one window starting at `offset`
fn read_window(file: &mut File, offset: u64, size: u64) -> io::Result<Vec<u8>> {
    let len = CHUNK_SIZE.min(size.saturating_sub(offset));
    let mut buffer = vec![0u8; len as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Wrapping sum of all complete little-endian u64 words
fn sum_words(bytes: &[u8]) -> u64 {
    bytes.chunks_exact(8).fold(0u64, |acc, word| {
        let mut le = [0u8; 8];
        le.copy_from_slice(word);
        acc.wrapping_add(u64::from_le_bytes(le))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    /// Deterministic pseudo-random content
    fn content(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_4f6c_dd1du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    #[test]
    fn test_sum_words_ignores_trailing_bytes() {
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&2u64.to_le_bytes());
        bytes.extend_from_slice(&[0xff, 0xff, 0xff]);
        assert_eq!(sum_words(&bytes), 3);
    }

    #[test]
    fn test_sum_words_wraps() {
        let mut bytes = u64::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(&2u64.to_le_bytes());
        assert_eq!(sum_words(&bytes), 1);
    }

    #[test]
    fn test_small_file_windows_overlap() {
        let dir = tempfile::tempdir().unwrap();
        // Two words plus 4 stray bytes: each window sums 1 + 2
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&2u64.to_le_bytes());
        bytes.extend_from_slice(&[9, 9, 9, 9]);
        let path = write_file(&dir, "small.bin", &bytes);

        // size 20 + head 3 + tail 3
        assert_eq!(compute_movie_hash(&path).unwrap(), "000000000000001a");
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.bin", &[]);
        assert_eq!(compute_movie_hash(&path).unwrap(), "0000000000000000");
    }

    #[test]
    fn test_large_file_matches_manual_sum() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = content(300 * 1024 + 3);
        let path = write_file(&dir, "large.bin", &bytes);

        let chunk = CHUNK_SIZE as usize;
        let expected = (bytes.len() as u64)
            .wrapping_add(sum_words(&bytes[..chunk]))
            .wrapping_add(sum_words(&bytes[bytes.len() - chunk..]));

        let hash = compute_movie_hash(&path).unwrap();
        assert_eq!(hash, format!("{:016x}", expected));
        assert_eq!(hash.len(), 16);
    }

    #[test]
    fn test_hash_is_deterministic_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = content(200 * 1024);
        let path = write_file(&dir, "video.bin", &bytes);

        let first = compute_movie_hash(&path).unwrap();
        assert_eq!(first, compute_movie_hash(&path).unwrap());

        let mut head_changed = bytes.clone();
        head_changed[10] ^= 0x01;
        let head_path = write_file(&dir, "head.bin", &head_changed);
        assert_ne!(first, compute_movie_hash(&head_path).unwrap());

        let mut tail_changed = bytes.clone();
        let last = tail_changed.len() - 20;
        tail_changed[last] ^= 0x80;
        let tail_path = write_file(&dir, "tail.bin", &tail_changed);
        assert_ne!(first, compute_movie_hash(&tail_path).unwrap());
    }

    #[tokio::test]
    async fn test_hash_video_matches_sync_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "episode.bin", &content(150 * 1024 + 5));

        assert_eq!(
            hash_video(&path).await.unwrap(),
            compute_movie_hash(&path).unwrap()
        );
        assert!(matches!(
            hash_video(Path::new("/nonexistent/video.mkv")).await,
            Err(FileHashError::OpenFailed { .. })
        ));
    }

    #[test]
    fn test_missing_file_fails() {
        let result = compute_movie_hash(Path::new("/nonexistent/video.mkv"));
        assert!(matches!(result, Err(FileHashError::OpenFailed { .. })));
    }
}
