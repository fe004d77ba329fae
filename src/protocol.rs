//! # Local Socket Wire Format
//!
//! Two fixed-size, little-endian records travel over the Unix stream sockets.
//! Their layout is the natural C layout of the equivalent structs on a
//! 64-bit little-endian host, padding included.
//!
//! ## Batch announcement (Reader → Router), 88 bytes
//!
//! ```text
//! offset  size  field
//!      0     1  tower_count (0..=7)
//!      1     3  padding
//!      4    84  7 × { mcc: u16, mnc: u16, cid: u32, receive_level: i32 }
//! ```
//!
//! Only the first `tower_count` entries are meaningful.
//!
//! ## Display message (Router → Display), 32 bytes
//!
//! ```text
//! offset  size  field
//!      0     8  msg_type: i64   (1 = TowerReport, 2 = EndOfBatch)
//!      8     2  mcc: u16
//!     10     2  mnc: u16
//!     12     4  cid: u32
//!     16     4  receive_level: i32
//!     20     4  latitude: f32
//!     24     4  longitude: f32
//!     28     4  padding
//! ```
//!
//! EndOfBatch carries zeros after `msg_type`; receivers ignore them.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::{ObservationBatch, ResolvedObservation, TowerObservation, MAX_TOWERS_PER_BATCH};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Size of one tower entry inside a batch announcement.
const BATCH_ENTRY_SIZE: usize = 12;

/// Offset of the first tower entry.
const BATCH_ENTRIES_OFFSET: usize = 4;

/// Encoded batch announcement size.
pub const BATCH_ANNOUNCEMENT_SIZE: usize = BATCH_ENTRIES_OFFSET + MAX_TOWERS_PER_BATCH * BATCH_ENTRY_SIZE;

/// Encoded display message size.
pub const DISPLAY_MESSAGE_SIZE: usize = 32;

/// `msg_type` of a resolved tower.
pub const MSG_TOWER_REPORT: i64 = 1;

/// `msg_type` of the end-of-batch marker.
pub const MSG_END_OF_BATCH: i64 = 2;

/// Wire decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown message type {0}")]
    UnknownMessageType(i64),

    #[error("Tower count {0} exceeds batch capacity of 7")]
    TowerCountOutOfRange(u8),
}

// ─── Batch announcement ──────────────────────────────────────────────────────

/// Encode a batch into its 88-byte record.
pub fn encode_batch(batch: &ObservationBatch) -> [u8; BATCH_ANNOUNCEMENT_SIZE] {
    let mut buf = BytesMut::with_capacity(BATCH_ANNOUNCEMENT_SIZE);
    // len() <= 7 by construction
    buf.put_u8(batch.len() as u8);
    buf.put_bytes(0, BATCH_ENTRIES_OFFSET - 1);

    for slot in 0..MAX_TOWERS_PER_BATCH {
        match batch.as_slice().get(slot) {
            Some(tower) => {
                buf.put_u16_le(tower.country_code);
                buf.put_u16_le(tower.operator_code);
                buf.put_u32_le(tower.cell_id);
                buf.put_i32_le(tower.signal_level);
            }
            None => buf.put_bytes(0, BATCH_ENTRY_SIZE),
        }
    }

    let mut out = [0u8; BATCH_ANNOUNCEMENT_SIZE];
    out.copy_from_slice(&buf);
    out
}

/// Decode an 88-byte record. The region code does not travel on the wire.
pub fn decode_batch(record: &[u8; BATCH_ANNOUNCEMENT_SIZE]) -> Result<ObservationBatch, ProtocolError> {
    let mut buf = &record[..];
    let count = buf.get_u8();
    if usize::from(count) > MAX_TOWERS_PER_BATCH {
        return Err(ProtocolError::TowerCountOutOfRange(count));
    }
    buf.advance(BATCH_ENTRIES_OFFSET - 1);

    let mut batch = ObservationBatch::new();
    for _ in 0..count {
        let observation = TowerObservation {
            country_code: buf.get_u16_le(),
            operator_code: buf.get_u16_le(),
            cell_id: buf.get_u32_le(),
            region_code: None,
            signal_level: buf.get_i32_le(),
        };
        if batch.push(observation).is_err() {
            return Err(ProtocolError::TowerCountOutOfRange(count));
        }
    }
    Ok(batch)
}

// ─── Display message ─────────────────────────────────────────────────────────

/// Router → Display record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayMessage {
    TowerReport(ResolvedObservation),
    EndOfBatch,
}

impl DisplayMessage {
    pub fn msg_type(&self) -> i64 {
        match self {
            DisplayMessage::TowerReport(_) => MSG_TOWER_REPORT,
            DisplayMessage::EndOfBatch => MSG_END_OF_BATCH,
        }
    }

    /// Encode into the 32-byte record.
    pub fn encode(&self) -> [u8; DISPLAY_MESSAGE_SIZE] {
        let mut buf = BytesMut::with_capacity(DISPLAY_MESSAGE_SIZE);
        buf.put_i64_le(self.msg_type());
        match self {
            DisplayMessage::TowerReport(tower) => {
                buf.put_u16_le(tower.country_code);
                buf.put_u16_le(tower.operator_code);
                buf.put_u32_le(tower.cell_id);
                buf.put_i32_le(tower.signal_level);
                buf.put_f32_le(tower.latitude as f32);
                buf.put_f32_le(tower.longitude as f32);
                buf.put_bytes(0, 4);
            }
            DisplayMessage::EndOfBatch => buf.put_bytes(0, DISPLAY_MESSAGE_SIZE - 8),
        }

        let mut out = [0u8; DISPLAY_MESSAGE_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Decode a 32-byte record.
    pub fn decode(record: &[u8; DISPLAY_MESSAGE_SIZE]) -> Result<Self, ProtocolError> {
        let mut buf = &record[..];
        match buf.get_i64_le() {
            MSG_TOWER_REPORT => Ok(DisplayMessage::TowerReport(ResolvedObservation {
                country_code: buf.get_u16_le(),
                operator_code: buf.get_u16_le(),
                cell_id: buf.get_u32_le(),
                signal_level: buf.get_i32_le(),
                latitude: f64::from(buf.get_f32_le()),
                longitude: f64::from(buf.get_f32_le()),
            })),
            MSG_END_OF_BATCH => Ok(DisplayMessage::EndOfBatch),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

// ─── Framing ─────────────────────────────────────────────────────────────────

/// Read one fixed-size record.
///
/// Returns `Ok(None)` when the peer closed the stream on a record boundary.
/// A close in the middle of a record is `UnexpectedEof`.
pub async fn read_record<R, const N: usize>(reader: &mut R) -> std::io::Result<Option<[u8; N]>>
where
    R: AsyncRead + Unpin,
{
    let mut record = [0u8; N];
    let mut filled = 0;
    while filled < N {
        let n = reader.read(&mut record[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("peer closed after {filled} of {N} bytes"),
            ));
        }
        filled += n;
    }
    Ok(Some(record))
}

/// Write one record in full.
pub async fn write_record<W>(writer: &mut W, record: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(record).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tower(cell_id: u32, level: i32) -> TowerObservation {
        TowerObservation {
            country_code: 250,
            operator_code: 1,
            cell_id,
            region_code: Some(0x6d07),
            signal_level: level,
        }
    }

    #[test]
    fn test_batch_layout() {
        let mut batch = ObservationBatch::new();
        batch.push(tower(1000, -60)).expect("room");
        let record = encode_batch(&batch);

        assert_eq!(record.len(), 88);
        assert_eq!(record[0], 1);
        assert_eq!(&record[4..6], &250u16.to_le_bytes());
        assert_eq!(&record[6..8], &1u16.to_le_bytes());
        assert_eq!(&record[8..12], &1000u32.to_le_bytes());
        assert_eq!(&record[12..16], &(-60i32).to_le_bytes());
        assert!(record[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_batch_decode_drops_region_code() {
        let mut batch = ObservationBatch::new();
        batch.push(tower(1000, -60)).expect("room");
        batch.push(tower(1001, -65)).expect("room");
        let decoded = decode_batch(&encode_batch(&batch)).expect("decode");
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.as_slice()[1].cell_id, 1001);
        assert_eq!(decoded.as_slice()[1].signal_level, -65);
        assert_eq!(decoded.as_slice()[1].region_code, None);
    }

    #[test]
    fn test_batch_count_out_of_range() {
        let mut record = [0u8; BATCH_ANNOUNCEMENT_SIZE];
        record[0] = 8;
        assert_eq!(decode_batch(&record), Err(ProtocolError::TowerCountOutOfRange(8)));
    }

    #[test]
    fn test_tower_report_layout() {
        let msg = DisplayMessage::TowerReport(ResolvedObservation {
            country_code: 250,
            operator_code: 1,
            cell_id: 1000,
            signal_level: -70,
            latitude: 55.75,
            longitude: 37.5,
        });
        let record = msg.encode();
        assert_eq!(&record[0..8], &1i64.to_le_bytes());
        assert_eq!(&record[16..20], &(-70i32).to_le_bytes());
        assert_eq!(&record[20..24], &55.75f32.to_le_bytes());
        assert_eq!(DisplayMessage::decode(&record), Ok(msg));
    }

    #[test]
    fn test_end_of_batch_and_unknown_type() {
        let record = DisplayMessage::EndOfBatch.encode();
        assert_eq!(&record[0..8], &2i64.to_le_bytes());
        assert_eq!(DisplayMessage::decode(&record), Ok(DisplayMessage::EndOfBatch));

        let mut bogus = [0u8; DISPLAY_MESSAGE_SIZE];
        bogus[0] = 7;
        assert_eq!(DisplayMessage::decode(&bogus), Err(ProtocolError::UnknownMessageType(7)));
    }

    #[tokio::test]
    async fn test_read_record_boundaries() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_record(&mut a, &DisplayMessage::EndOfBatch.encode()).await.expect("write");
        a.write_all(&[2, 0, 0]).await.expect("write partial");
        drop(a);

        let first: Option<[u8; DISPLAY_MESSAGE_SIZE]> = read_record(&mut b).await.expect("full record");
        assert!(first.is_some());
        let second = read_record::<_, DISPLAY_MESSAGE_SIZE>(&mut b).await;
        assert_eq!(second.map_err(|e| e.kind()), Err(std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_read_record_clean_close() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let record = read_record::<_, BATCH_ANNOUNCEMENT_SIZE>(&mut b).await.expect("clean close");
        assert!(record.is_none());
    }
}
