use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Datelike, NaiveDateTime, Timelike, Utc};
use crc32fast::Hasher;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;

use super::ArchiveError;
use crate::store::BlobSink;

/// Record signatures
const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
const EOCD_SIGNATURE: u32 = 0x06054b50;
const ZIP64_EOCD_SIGNATURE: u32 = 0x06064b50;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// ZIP64 extended information extra field
const ZIP64_EXTRA_ID: u16 = 0x0001;

const COMPRESSION_DEFLATE: u16 = 8;

/// General purpose flags: sizes and CRC follow the data, name is UTF-8
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const FLAG_UTF8: u16 = 1 << 11;

const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;

/// "Made by" host byte for Unix, so external attributes carry a file mode
const HOST_UNIX: u16 = 3 << 8;
const UNIX_FILE_MODE: u32 = 0o100644;

/// Any 32-bit size or offset at or above this goes to a ZIP64 field
const ZIP64_THRESHOLD: u64 = 0xFFFF_FFFF;
const ZIP64_ENTRY_THRESHOLD: usize = 0xFFFF;

/// Compressed output is handed to the sink once this much is buffered
const FLUSH_THRESHOLD: usize = 64 * 1024;

/// Fixed portion of a ZIP64 end of central directory record after its size field
const ZIP64_EOCD_BODY_SIZE: u64 = 44;

/// Entry currently being written
struct OpenEntry {
    name: String,
    declared_size: u64,
    header_offset: u64,
    zip64: bool,
    dos_time: u16,
    dos_date: u16,
    hasher: Hasher,
    encoder: DeflateEncoder<Vec<u8>>,
    uncompressed: u64,
    compressed: u64,
}

/// Central directory data kept for each finished entry
#[derive(Debug)]
struct CentralRecord {
    name: String,
    crc32: u32,
    compressed: u64,
    uncompressed: u64,
    header_offset: u64,
    zip64: bool,
    dos_time: u16,
    dos_date: u16,
}

/// What a finished archive looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    /// Uncompressed bytes across all entries
    pub uncompressed_bytes: u64,
    /// Bytes of the whole archive, headers included
    pub archive_bytes: u64,
}

/// Streaming ZIP writer over a borrowed sink.
///
/// Entries are deflated as they arrive and the CRC and sizes are written in a
/// data descriptor after each entry's payload, so nothing needs to seek back.
/// Memory use is bounded by the flush threshold plus one central directory
/// record per entry. The writer never closes the sink.
pub struct ZipStreamWriter<'s, S: BlobSink + ?Sized> {
    sink: &'s mut S,
    level: Compression,
    offset: u64,
    uncompressed_total: u64,
    entries: Vec<CentralRecord>,
    current: Option<OpenEntry>,
    finished: bool,
}

impl<'s, S: BlobSink + ?Sized> ZipStreamWriter<'s, S> {
    /// Create a writer compressing at `level` (0-9)
    pub fn new(sink: &'s mut S, level: u32) -> Self {
        ZipStreamWriter {
            sink,
            level: Compression::new(level.min(9)),
            offset: 0,
            uncompressed_total: 0,
            entries: Vec::new(),
            current: None,
            finished: false,
        }
    }

    /// Bytes handed to the sink so far
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// Number of completed entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Start a new entry. `declared_size` is the uncompressed length the
    /// caller promises to write.
    pub async fn begin_entry(&mut self, name: &str, declared_size: u64) -> Result<(), ArchiveError> {
        if self.finished {
            return Err(ArchiveError::Finished);
        }
        if let Some(open) = &self.current {
            return Err(ArchiveError::EntryAlreadyOpen {
                name: open.name.clone(),
            });
        }
        if name.len() > u16::MAX as usize {
            return Err(ArchiveError::NameTooLong { len: name.len() });
        }

        let zip64 = needs_zip64(declared_size);
        let (dos_time, dos_date) = dos_datetime(Utc::now().naive_utc());

        let extra_len: u16 = if zip64 { 20 } else { 0 };
        let mut header = BytesMut::with_capacity(30 + name.len() + extra_len as usize);
        header.put_u32_le(LOCAL_HEADER_SIGNATURE);
        header.put_u16_le(if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT });
        header.put_u16_le(FLAG_DATA_DESCRIPTOR | FLAG_UTF8);
        header.put_u16_le(COMPRESSION_DEFLATE);
        header.put_u16_le(dos_time);
        header.put_u16_le(dos_date);
        // CRC and sizes live in the data descriptor
        header.put_u32_le(0);
        if zip64 {
            header.put_u32_le(ZIP64_THRESHOLD as u32);
            header.put_u32_le(ZIP64_THRESHOLD as u32);
        } else {
            header.put_u32_le(0);
            header.put_u32_le(0);
        }
        header.put_u16_le(name.len() as u16);
        header.put_u16_le(extra_len);
        header.put_slice(name.as_bytes());
        if zip64 {
            header.put_u16_le(ZIP64_EXTRA_ID);
            header.put_u16_le(16);
            header.put_u64_le(0);
            header.put_u64_le(0);
        }

        let header_offset = self.offset;
        self.emit(header.freeze()).await?;

        self.current = Some(OpenEntry {
            name: name.to_string(),
            declared_size,
            header_offset,
            zip64,
            dos_time,
            dos_date,
            hasher: Hasher::new(),
            encoder: DeflateEncoder::new(Vec::with_capacity(FLUSH_THRESHOLD), self.level),
            uncompressed: 0,
            compressed: 0,
        });

        Ok(())
    }

    /// Append bytes to the open entry
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ArchiveError> {
        let entry = self.current.as_mut().ok_or(ArchiveError::NoOpenEntry)?;
        if data.is_empty() {
            return Ok(());
        }

        entry.hasher.update(data);
        entry.uncompressed += data.len() as u64;
        entry
            .encoder
            .write_all(data)
            .map_err(ArchiveError::Compress)?;

        if entry.encoder.get_ref().len() < FLUSH_THRESHOLD {
            return Ok(());
        }

        let pending = std::mem::take(entry.encoder.get_mut());
        entry.compressed += pending.len() as u64;
        self.emit(Bytes::from(pending)).await
    }

    /// Finish the open entry: flush the compressor and write the data descriptor
    pub async fn end_entry(&mut self) -> Result<(), ArchiveError> {
        let OpenEntry {
            name,
            declared_size,
            header_offset,
            zip64,
            dos_time,
            dos_date,
            hasher,
            encoder,
            uncompressed,
            mut compressed,
        } = self.current.take().ok_or(ArchiveError::NoOpenEntry)?;

        if uncompressed != declared_size {
            return Err(ArchiveError::SizeMismatch {
                name,
                declared: declared_size,
                actual: uncompressed,
            });
        }

        let tail = encoder.finish().map_err(ArchiveError::Compress)?;
        compressed += tail.len() as u64;
        self.emit(Bytes::from(tail)).await?;

        let crc32 = hasher.finalize();

        let mut descriptor = BytesMut::with_capacity(24);
        descriptor.put_u32_le(DATA_DESCRIPTOR_SIGNATURE);
        descriptor.put_u32_le(crc32);
        if zip64 {
            descriptor.put_u64_le(compressed);
            descriptor.put_u64_le(uncompressed);
        } else {
            descriptor.put_u32_le(compressed as u32);
            descriptor.put_u32_le(uncompressed as u32);
        }
        self.emit(descriptor.freeze()).await?;

        self.uncompressed_total += uncompressed;
        self.entries.push(CentralRecord {
            name,
            crc32,
            compressed,
            uncompressed,
            header_offset,
            zip64,
            dos_time,
            dos_date,
        });

        Ok(())
    }

    /// Write the central directory and end records. The sink stays open.
    pub async fn finish(&mut self) -> Result<ArchiveSummary, ArchiveError> {
        if self.finished {
            return Err(ArchiveError::Finished);
        }
        if let Some(open) = &self.current {
            return Err(ArchiveError::EntryAlreadyOpen {
                name: open.name.clone(),
            });
        }

        let cd_offset = self.offset;
        let mut buf = BytesMut::with_capacity(FLUSH_THRESHOLD);

        for index in 0..self.entries.len() {
            encode_central_header(&self.entries[index], &mut buf);
            if buf.len() >= FLUSH_THRESHOLD {
                self.emit(buf.split().freeze()).await?;
            }
        }
        if !buf.is_empty() {
            self.emit(buf.split().freeze()).await?;
        }

        let cd_size = self.offset - cd_offset;
        let count = self.entries.len();

        if count >= ZIP64_ENTRY_THRESHOLD || cd_size >= ZIP64_THRESHOLD || cd_offset >= ZIP64_THRESHOLD {
            let zip64_eocd_offset = self.offset;

            buf.put_u32_le(ZIP64_EOCD_SIGNATURE);
            buf.put_u64_le(ZIP64_EOCD_BODY_SIZE);
            buf.put_u16_le(HOST_UNIX | VERSION_ZIP64);
            buf.put_u16_le(VERSION_ZIP64);
            buf.put_u32_le(0);
            buf.put_u32_le(0);
            buf.put_u64_le(count as u64);
            buf.put_u64_le(count as u64);
            buf.put_u64_le(cd_size);
            buf.put_u64_le(cd_offset);

            buf.put_u32_le(ZIP64_LOCATOR_SIGNATURE);
            buf.put_u32_le(0);
            buf.put_u64_le(zip64_eocd_offset);
            buf.put_u32_le(1);
        }

        let short_count = count.min(ZIP64_ENTRY_THRESHOLD) as u16;
        buf.put_u32_le(EOCD_SIGNATURE);
        buf.put_u16_le(0);
        buf.put_u16_le(0);
        buf.put_u16_le(short_count);
        buf.put_u16_le(short_count);
        buf.put_u32_le(cd_size.min(ZIP64_THRESHOLD) as u32);
        buf.put_u32_le(cd_offset.min(ZIP64_THRESHOLD) as u32);
        buf.put_u16_le(0);

        self.emit(buf.freeze()).await?;
        self.finished = true;

        Ok(ArchiveSummary {
            entries: count,
            uncompressed_bytes: self.uncompressed_total,
            archive_bytes: self.offset,
        })
    }

    async fn emit(&mut self, bytes: Bytes) -> Result<(), ArchiveError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let len = bytes.len() as u64;
        self.sink.write(bytes).await?;
        self.offset += len;
        Ok(())
    }
}

fn encode_central_header(record: &CentralRecord, buf: &mut BytesMut) {
    let big_uncompressed = record.uncompressed >= ZIP64_THRESHOLD;
    let big_compressed = record.compressed >= ZIP64_THRESHOLD;
    let big_offset = record.header_offset >= ZIP64_THRESHOLD;

    let mut extra = BytesMut::new();
    if big_uncompressed {
        extra.put_u64_le(record.uncompressed);
    }
    if big_compressed {
        extra.put_u64_le(record.compressed);
    }
    if big_offset {
        extra.put_u64_le(record.header_offset);
    }

    let version = if record.zip64 || !extra.is_empty() {
        VERSION_ZIP64
    } else {
        VERSION_DEFAULT
    };
    let extra_len = if extra.is_empty() { 0 } else { 4 + extra.len() };

    buf.put_u32_le(CENTRAL_HEADER_SIGNATURE);
    buf.put_u16_le(HOST_UNIX | version);
    buf.put_u16_le(version);
    buf.put_u16_le(FLAG_DATA_DESCRIPTOR | FLAG_UTF8);
    buf.put_u16_le(COMPRESSION_DEFLATE);
    buf.put_u16_le(record.dos_time);
    buf.put_u16_le(record.dos_date);
    buf.put_u32_le(record.crc32);
    buf.put_u32_le(record.compressed.min(ZIP64_THRESHOLD) as u32);
    buf.put_u32_le(record.uncompressed.min(ZIP64_THRESHOLD) as u32);
    buf.put_u16_le(record.name.len() as u16);
    buf.put_u16_le(extra_len as u16);
    // Comment length, disk number, internal attributes
    buf.put_u16_le(0);
    buf.put_u16_le(0);
    buf.put_u16_le(0);
    buf.put_u32_le(UNIX_FILE_MODE << 16);
    buf.put_u32_le(record.header_offset.min(ZIP64_THRESHOLD) as u32);
    buf.put_slice(record.name.as_bytes());
    if !extra.is_empty() {
        buf.put_u16_le(ZIP64_EXTRA_ID);
        buf.put_u16_le(extra.len() as u16);
        buf.put_slice(&extra);
    }
}

/// Whether an entry of `declared_size` bytes needs ZIP64 sizes. Leaves room
/// for deflate's worst-case expansion of incompressible input.
fn needs_zip64(declared_size: u64) -> bool {
    declared_size
        .saturating_add(declared_size / 1024)
        .saturating_add(1024)
        >= ZIP64_THRESHOLD
}

/// Convert a timestamp to MS-DOS (time, date), clamped to the representable range
fn dos_datetime(at: NaiveDateTime) -> (u16, u16) {
    let year = at.year().clamp(1980, 2107);
    let date = (((year - 1980) as u16) << 9) | ((at.month() as u16) << 5) | at.day() as u16;
    let time = ((at.hour() as u16) << 11) | ((at.minute() as u16) << 5) | (at.second() as u16 / 2);
    (time, date)
}
