//! Sequential reader/writer for the on-disk feature index.
//!
//! The index is an append-only sequence of fixed-layout records, one per
//! citation, written little-endian:
//!
//! | field     | size    | meaning                                 |
//! |-----------|---------|-----------------------------------------|
//! | `pmid`    | u32     | document identifier                     |
//! | `date`    | u32     | completion date as YYYYMMDD             |
//! | `nbytes`  | u16     | length of the encoded feature payload   |
//! | payload   | nbytes  | variable-byte gap-encoded feature ids   |
//!
//! The record count is stored separately by the indexer; readers scan to EOF.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::{vb_decode, vb_encode, MAX_FEATURES};
use crate::error::{Error, Result};
use crate::{Date, DocId, FeatureId};

/// Record header: pmid (4) + date (4) + nbytes (2).
const HEADER_LEN: usize = 10;

/// Largest encoded payload a well-formed record may carry.
pub const MAX_PAYLOAD: usize = 4000;

/// One decoded index record, borrowing the reader's feature buffer.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub docid: DocId,
    pub date: Date,
    pub features: &'a [FeatureId],
}

/// Buffered sequential reader over a feature-index file.
///
/// The payload and feature buffers are reused across records, so a full
/// corpus scan performs no per-record allocation.
#[derive(Debug)]
pub struct FeatureIndexReader {
    reader: BufReader<File>,
    path: PathBuf,
    payload: Vec<u8>,
    features: Vec<FeatureId>,
}

impl FeatureIndexReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        tracing::debug!(path = %path.display(), "opened feature index");
        Ok(Self {
            reader: BufReader::new(file),
            path,
            payload: Vec::with_capacity(MAX_PAYLOAD),
            features: Vec::with_capacity(MAX_FEATURES),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Position the reader at a record boundary obtained from
    /// [`build_offset_index`].
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Read the next record, or `None` at a clean end of file.
    ///
    /// A partial trailing record is reported as `MalformedRecord`.
    pub fn read_next(&mut self) -> Result<Option<Record<'_>>> {
        let mut header = [0u8; HEADER_LEN];
        match fill_buf(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            HEADER_LEN => {}
            got => {
                return Err(Error::MalformedRecord(format!(
                    "truncated record header: {got} of {HEADER_LEN} bytes"
                )))
            }
        }
        let docid = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let date = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let nbytes = u16::from_le_bytes([header[8], header[9]]) as usize;
        if nbytes > MAX_PAYLOAD {
            return Err(Error::MalformedRecord(format!(
                "record for {docid} claims {nbytes}-byte payload, cap is {MAX_PAYLOAD}"
            )));
        }
        self.payload.resize(nbytes, 0);
        let got = fill_buf(&mut self.reader, &mut self.payload)?;
        if got != nbytes {
            return Err(Error::MalformedRecord(format!(
                "truncated record payload for {docid}: {got} of {nbytes} bytes"
            )));
        }
        vb_decode(&self.payload, &mut self.features)?;
        Ok(Some(Record {
            docid,
            date,
            features: &self.features,
        }))
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
fn fill_buf(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Byte offset of every record in the index, for chunked parallel scans.
///
/// Walks headers only, seeking over payloads.
pub fn build_offset_index(path: impl AsRef<Path>) -> Result<Vec<u64>> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);
    let mut offsets = Vec::new();
    let mut pos: u64 = 0;
    loop {
        let mut header = [0u8; HEADER_LEN];
        match fill_buf(&mut reader, &mut header)? {
            0 => break,
            HEADER_LEN => {}
            got => {
                return Err(Error::MalformedRecord(format!(
                    "truncated record header: {got} of {HEADER_LEN} bytes"
                )))
            }
        }
        let nbytes = u16::from_le_bytes([header[8], header[9]]) as usize;
        if nbytes > MAX_PAYLOAD {
            return Err(Error::MalformedRecord(format!(
                "record claims {nbytes}-byte payload, cap is {MAX_PAYLOAD}"
            )));
        }
        offsets.push(pos);
        reader.seek_relative(nbytes as i64)?;
        pos += (HEADER_LEN + nbytes) as u64;
    }
    Ok(offsets)
}

/// Append-only writer used by the indexer and by test fixtures.
pub struct FeatureIndexWriter {
    writer: BufWriter<File>,
}

impl FeatureIndexWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Append one record. Features must be strictly increasing.
    pub fn append(&mut self, docid: DocId, date: Date, features: &[FeatureId]) -> Result<()> {
        let payload = vb_encode(features)?;
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::MalformedRecord(format!(
                "encoded vector for {docid} is {} bytes, cap is {MAX_PAYLOAD}",
                payload.len()
            )));
        }
        self.writer.write_all(&docid.to_le_bytes())?;
        self.writer.write_all(&date.to_le_bytes())?;
        self.writer.write_all(&(payload.len() as u16).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
