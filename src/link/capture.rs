//! Frame capture
//!
//! Every inbound and outbound frame is offered to a [`CaptureSink`]. The
//! sink is purely observational and must return immediately.
//!
//! File format, repeated until EOF (little-endian):
//!
//! ```text
//! direction:u8 | unix_ms:i64 | header_len:u32 | payload_len:u32 | header | payload
//! ```

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use crossbeam_channel::{bounded, unbounded, Sender};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::CaptureConfig;
use crate::link::dongle::MAX_PAYLOAD_SIZE;
use crate::protocol::HEADER_SIZE;

/// How long `flush()` waits for the writer thread
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_u8(self) -> u8 {
        match self {
            Self::Inbound => 0,
            Self::Outbound => 1,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Inbound),
            1 => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// Receives a copy of every frame crossing the link
pub trait CaptureSink: Send + Sync {
    fn record(&self, direction: Direction, header: &[u8], payload: &[u8], timestamp: DateTime<Utc>);

    /// Persist anything buffered; called when the link closes
    fn flush(&self) {}
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCapture;

impl CaptureSink for NullCapture {
    fn record(&self, _: Direction, _: &[u8], _: &[u8], _: DateTime<Utc>) {}
}

/// One captured frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub header: Bytes,
    pub payload: Bytes,
}

enum WriterCommand {
    Record(CaptureRecord),
    Flush(Sender<()>),
}

/// Appends records to a file from a dedicated writer thread
pub struct FileCapture {
    tx: Sender<WriterCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl FileCapture {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, rx) = unbounded::<WriterCommand>();

        let handle = thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || {
                let mut writer = BufWriter::new(file);
                for command in rx {
                    match command {
                        WriterCommand::Record(record) => {
                            if let Err(e) = write_record(&mut writer, &record) {
                                tracing::warn!("Capture write failed: {}", e);
                            }
                        }
                        WriterCommand::Flush(ack) => {
                            if let Err(e) = writer.flush().and_then(|_| writer.get_ref().sync_data()) {
                                tracing::warn!("Capture flush failed: {}", e);
                            }
                            let _ = ack.send(());
                        }
                    }
                }
                let _ = writer.flush();
            })?;

        Ok(Self {
            tx,
            thread_handle: Some(handle),
        })
    }
}

impl CaptureSink for FileCapture {
    fn record(&self, direction: Direction, header: &[u8], payload: &[u8], timestamp: DateTime<Utc>) {
        let record = CaptureRecord {
            direction,
            timestamp,
            header: Bytes::copy_from_slice(header),
            payload: Bytes::copy_from_slice(payload),
        };
        let _ = self.tx.send(WriterCommand::Record(record));
    }

    fn flush(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.tx.send(WriterCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv_timeout(FLUSH_TIMEOUT);
        }
    }
}

impl Drop for FileCapture {
    fn drop(&mut self) {
        // Closing the channel ends the writer loop
        let (tx, _) = unbounded();
        drop(std::mem::replace(&mut self.tx, tx));
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

fn write_record(writer: &mut impl Write, record: &CaptureRecord) -> io::Result<()> {
    writer.write_all(&[record.direction.as_u8()])?;
    writer.write_all(&record.timestamp.timestamp_millis().to_le_bytes())?;
    writer.write_all(&(record.header.len() as u32).to_le_bytes())?;
    writer.write_all(&(record.payload.len() as u32).to_le_bytes())?;
    writer.write_all(&record.header)?;
    writer.write_all(&record.payload)?;
    Ok(())
}

/// Sink for `config`: a [`FileCapture`] when enabled, else [`NullCapture`]
pub fn capture_sink(config: &CaptureConfig) -> crate::Result<Arc<dyn CaptureSink>> {
    let Some(path) = config.resolved_path()? else {
        return Ok(Arc::new(NullCapture));
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!("Capturing frames to {}", path.display());
    Ok(Arc::new(FileCapture::create(&path)?))
}

/// Iterates the records of a capture file
pub struct CaptureReader<R> {
    reader: R,
}

impl CaptureReader<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> CaptureReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_exact_vec(&mut self, len: usize) -> io::Result<Bytes> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(buf.into())
    }

    fn read_record(&mut self) -> io::Result<Option<CaptureRecord>> {
        let mut direction = [0u8; 1];
        match self.reader.read_exact(&mut direction) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let direction = Direction::from_u8(direction[0])
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad capture direction"))?;

        let mut fixed = [0u8; 16];
        self.reader.read_exact(&mut fixed)?;
        let millis = i64::from_le_bytes(fixed[0..8].try_into().unwrap_or_default());
        let header_len = u32::from_le_bytes(fixed[8..12].try_into().unwrap_or_default()) as usize;
        let payload_len = u32::from_le_bytes(fixed[12..16].try_into().unwrap_or_default()) as usize;

        if header_len > HEADER_SIZE || payload_len > MAX_PAYLOAD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("capture record too large: header {} bytes, payload {} bytes", header_len, payload_len),
            ));
        }

        let timestamp = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad capture timestamp"))?;
        let header = self.read_exact_vec(header_len)?;
        let payload = self.read_exact_vec(payload_len)?;

        Ok(Some(CaptureRecord {
            direction,
            timestamp,
            header,
            payload,
        }))
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = io::Result<CaptureRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}
