//! Fingerprint computation over entries, files and byte streams.

use super::{Fingerprint, Strategy, PARTIAL_SAMPLE};
use crate::core::archive::{ArchiveEntry, ArchiveReader};
use crate::error::{ArchiveError, FingerprintError};
use memmap2::Mmap;
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

/// Minimum file size to use memory-mapped I/O (1MB)
const MMAP_THRESHOLD: u64 = 1024 * 1024;

const CHUNK: usize = 64 * 1024;

/// Something that can be fingerprinted
pub enum Source<'a> {
    /// An archive entry, read through its open container
    Entry {
        reader: &'a mut ArchiveReader,
        entry: &'a ArchiveEntry,
    },
    /// A file on disk
    File(&'a Path),
}

/// Fingerprint a source under the given strategy
pub fn fingerprint(source: Source<'_>, strategy: Strategy) -> Result<Fingerprint, FingerprintError> {
    match source {
        Source::Entry { reader, entry } => fingerprint_entry(reader, entry, strategy),
        Source::File(path) => fingerprint_file(path, strategy),
    }
}

/// Fingerprint an in-memory byte slice
pub fn fingerprint_bytes(bytes: &[u8], strategy: Strategy) -> Fingerprint {
    let size = bytes.len() as u64;
    match strategy {
        Strategy::SizePartial => {
            let sample = &bytes[..bytes.len().min(PARTIAL_SAMPLE)];
            Fingerprint::partial(size, xxh3_64(sample))
        }
        Strategy::SizeCrc => Fingerprint::crc(size, crc32fast::hash(bytes)),
        Strategy::Full => Fingerprint::full(size, format!("{:x}", Sha256::digest(bytes))),
    }
}

/// Fingerprint a byte stream of known length
///
/// `SizePartial` stops after the first 64 KiB; the other strategies consume
/// the stream to its end.
pub fn fingerprint_reader<R: Read>(
    mut reader: R,
    size: u64,
    strategy: Strategy,
) -> io::Result<Fingerprint> {
    match strategy {
        Strategy::SizePartial => {
            let mut sample = Vec::with_capacity(PARTIAL_SAMPLE);
            reader.take(PARTIAL_SAMPLE as u64).read_to_end(&mut sample)?;
            Ok(Fingerprint::partial(size, xxh3_64(&sample)))
        }
        Strategy::SizeCrc => {
            let mut hasher = crc32fast::Hasher::new();
            stream(&mut reader, |chunk| hasher.update(chunk))?;
            Ok(Fingerprint::crc(size, hasher.finalize()))
        }
        Strategy::Full => {
            let mut hasher = Sha256::new();
            stream(&mut reader, |chunk| hasher.update(chunk))?;
            Ok(Fingerprint::full(size, format!("{:x}", hasher.finalize())))
        }
    }
}

fn stream<R: Read>(reader: &mut R, mut sink: impl FnMut(&[u8])) -> io::Result<()> {
    let mut buffer = vec![0u8; CHUNK];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink(&buffer[..n]);
    }
}

/// Fingerprint an archive entry without writing anything to disk
///
/// `SizeCrc` uses the entry table's stored checksum and reads no payload.
pub fn fingerprint_entry(
    reader: &mut ArchiveReader,
    entry: &ArchiveEntry,
    strategy: Strategy,
) -> Result<Fingerprint, FingerprintError> {
    if strategy == Strategy::SizeCrc {
        return Ok(Fingerprint::crc(entry.size, entry.crc32));
    }

    let archive = reader.id().path.clone();
    let file = reader.open_entry(entry)?;
    fingerprint_reader(file, entry.size, strategy).map_err(|e| {
        FingerprintError::Archive(ArchiveError::UnreadableEntry {
            archive,
            entry: entry.path.clone(),
            reason: e.to_string(),
        })
    })
}

/// Fingerprint a file on disk
///
/// Files of 1MB and more are memory-mapped for the full-read strategies.
/// `SizeCrc` computes the file's complete CRC32 here; it never degrades to a
/// partial read.
pub fn fingerprint_file(path: &Path, strategy: Strategy) -> Result<Fingerprint, FingerprintError> {
    let io_err = |e: io::Error| FingerprintError::Io {
        path: path.to_path_buf(),
        source: e,
    };

    let file = File::open(path).map_err(io_err)?;
    let size = file.metadata().map_err(io_err)?.len();

    if strategy != Strategy::SizePartial && size >= MMAP_THRESHOLD {
        // SAFETY: the mapping is read-only and dropped before `file`
        let mmap = unsafe { Mmap::map(&file) }.map_err(io_err)?;
        return Ok(fingerprint_bytes(&mmap, strategy));
    }

    fingerprint_reader(file, size, strategy).map_err(io_err)
}
