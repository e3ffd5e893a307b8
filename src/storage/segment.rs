//! Append-only binary file of representative vectors.
//!
//! # Storage Format
//!
//! - Header (16 bytes): magic `EXCV`, format version, dimension, record count
//! - Records: 16-byte group UUID followed by `dimension` little-endian f32s
//!
//! All integers are little-endian u32. The header count is rewritten after
//! every append; on open, a trailing partial record (interrupted write) is
//! ignored, and the next append overwrites it.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use uuid::Uuid;

use crate::storage::{StoreError, StoreResult};
use crate::vector::VectorDimension;

const SEGMENT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;
const MAGIC_BYTES: &[u8; 4] = b"EXCV";
const BYTES_PER_F32: usize = 4;
const BYTES_PER_ID: usize = 16;
const COUNT_OFFSET: u64 = 12;

#[derive(Debug)]
pub(crate) struct VectorSegment {
    path: PathBuf,
    dimension: VectorDimension,
    record_count: usize,
}

impl VectorSegment {
    /// Opens the segment at `path`, creating it if missing.
    ///
    /// # Errors
    /// [`StoreError::DimensionMismatch`] if an existing segment was written
    /// with a different dimension.
    pub(crate) fn open_or_create(path: impl AsRef<Path>, dimension: VectorDimension) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let segment = Self::open(path)?;
            if segment.dimension != dimension {
                return Err(StoreError::DimensionMismatch {
                    stored: segment.dimension.get(),
                    requested: dimension.get(),
                });
            }
            Ok(segment)
        } else {
            let segment = Self {
                path,
                dimension,
                record_count: 0,
            };
            segment.initialize()?;
            Ok(segment)
        }
    }

    fn open(path: PathBuf) -> StoreResult<Self> {
        let file = File::open(&path)?;
        let len = file.metadata()?.len() as usize;
        if len < HEADER_SIZE {
            return Err(StoreError::InvalidFormat(
                "Vector segment too small to contain header".to_string(),
            ));
        }
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let (dimension, header_count) = read_header(&mmap)?;

        let on_disk = (mmap.len() - HEADER_SIZE) / record_size(dimension);
        let record_count = header_count.min(on_disk);
        if record_count != header_count {
            tracing::warn!(
                path = %path.display(),
                header_count,
                on_disk,
                "vector segment header count disagrees with file length"
            );
        }

        Ok(Self {
            path,
            dimension,
            record_count,
        })
    }

    pub(crate) fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    pub(crate) fn len(&self) -> usize {
        self.record_count
    }

    /// Appends one record after the last complete record on disk and bumps
    /// the header count. A trailing partial record is overwritten.
    pub(crate) fn append(&mut self, id: Uuid, vector: &[f32]) -> StoreResult<()> {
        self.dimension.validate_vector(vector)?;

        let size = record_size(self.dimension);
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        let len = file.metadata()?.len() as usize;
        let complete = len.saturating_sub(HEADER_SIZE) / size;
        if complete != self.record_count {
            tracing::warn!(
                path = %self.path.display(),
                expected = self.record_count,
                on_disk = complete,
                "vector segment changed since it was opened"
            );
        }
        file.seek(SeekFrom::Start((HEADER_SIZE + complete * size) as u64))?;

        let mut record = Vec::with_capacity(size);
        record.extend_from_slice(id.as_bytes());
        for &value in vector {
            record.extend_from_slice(&value.to_le_bytes());
        }
        file.write_all(&record)?;

        self.record_count = complete + 1;
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&(self.record_count as u32).to_le_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Reads every record in file order.
    pub(crate) fn read_all(&self) -> StoreResult<Vec<(Uuid, Vec<f32>)>> {
        if self.record_count == 0 {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let dimension = self.dimension.get();
        let size = record_size(self.dimension);
        let mut records = Vec::with_capacity(self.record_count);

        for index in 0..self.record_count {
            let offset = HEADER_SIZE + index * size;
            let record = mmap.get(offset..offset + size).ok_or_else(|| {
                StoreError::InvalidFormat(format!("Vector record {index} is truncated"))
            })?;

            let mut id_bytes = [0u8; BYTES_PER_ID];
            id_bytes.copy_from_slice(&record[..BYTES_PER_ID]);

            let vector = record[BYTES_PER_ID..]
                .chunks_exact(BYTES_PER_F32)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect::<Vec<f32>>();
            debug_assert_eq!(vector.len(), dimension);

            records.push((Uuid::from_bytes(id_bytes), vector));
        }

        Ok(records)
    }

    fn initialize(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&self.path)?;
        file.write_all(MAGIC_BYTES)?;
        file.write_all(&SEGMENT_VERSION.to_le_bytes())?;
        file.write_all(&(self.dimension.get() as u32).to_le_bytes())?;
        file.write_all(&0u32.to_le_bytes())?;
        file.flush()?;
        Ok(())
    }
}

fn record_size(dimension: VectorDimension) -> usize {
    BYTES_PER_ID + dimension.get() * BYTES_PER_F32
}

fn read_header(bytes: &[u8]) -> StoreResult<(VectorDimension, usize)> {
    if &bytes[0..4] != MAGIC_BYTES {
        return Err(StoreError::InvalidFormat("Invalid magic bytes".to_string()));
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != SEGMENT_VERSION {
        return Err(StoreError::VersionMismatch {
            expected: SEGMENT_VERSION,
            actual: version,
        });
    }

    let dim_value = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let dimension = VectorDimension::new(dim_value as usize)?;
    let count = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;

    Ok((dimension, count))
}
