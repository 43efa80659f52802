//! Length-prefixed framing with optional Snappy compression
//!
//! Frame layout:
//!
//! ```text
//! +----------------+-------+----------------+------------------------+
//! | length: i32 BE | flags | packet id: u32 | payload (maybe snappy) |
//! +----------------+-------+----------------+------------------------+
//! ```
//!
//! `length` counts every byte after itself. Flag bit 0 marks a compressed
//! payload, bit 1 marks a critical-priority message.

use crate::error::{ProtocolError, Result};
use crate::messages::ProtocolErrorReport;
use crate::packet::{Packet, Priority};
use crate::{COMPRESSION_THRESHOLD, MAX_FRAME_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const FLAG_COMPRESSED: u8 = 0x01;
pub const FLAG_CRITICAL: u8 = 0x02;

const LENGTH_PREFIX_SIZE: usize = 4;
/// Flags byte plus packet id.
const FRAME_HEADER_SIZE: usize = 5;
const MAX_DECOMPRESSED_SIZE: usize = 8 * 1024 * 1024;

/// Outcome of decoding one complete frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Packet(Packet),
    /// The frame was well-formed but could not be dispatched; the report
    /// should be sent back to the peer and the connection kept open.
    Rejected(ProtocolErrorReport),
}

#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    compression_enabled: bool,
}

impl FrameEncoder {
    pub fn new(compression_enabled: bool) -> Self {
        Self {
            compression_enabled,
        }
    }

    pub fn encode(&self, packet: &Packet, dst: &mut BytesMut) -> Result<()> {
        let mut payload = BytesMut::new();
        packet.encode_payload(&mut payload)?;

        let mut flags = 0u8;
        let body = if self.compression_enabled && payload.len() > COMPRESSION_THRESHOLD {
            flags |= FLAG_COMPRESSED;
            let compressed = snap::raw::Encoder::new().compress_vec(&payload)?;
            Bytes::from(compressed)
        } else {
            payload.freeze()
        };
        if packet.priority() == Priority::Critical {
            flags |= FLAG_CRITICAL;
        }

        let length = FRAME_HEADER_SIZE + body.len();
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + length);
        dst.put_i32(length as i32);
        dst.put_u8(flags);
        dst.put_u32(packet.id());
        dst.put_slice(&body);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decodes the next frame from `src`.
    ///
    /// Returns `Ok(None)` while the frame is still incomplete; the partial
    /// bytes stay in `src`. An `Err` is always fatal for the connection.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let declared = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if declared < 0 {
            return Err(ProtocolError::InvalidFrameLength(declared));
        }
        let length = declared as usize;
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }
        if length < FRAME_HEADER_SIZE {
            return Err(ProtocolError::InvalidFrameLength(declared));
        }

        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let mut frame = src.split_to(length).freeze();
        let flags = frame.get_u8();
        let packet_id = frame.get_u32();
        trace!("Decoding frame id=0x{:02x} flags={:#04x} len={}", packet_id, flags, length);

        let payload = if flags & FLAG_COMPRESSED != 0 {
            match decompress(&frame) {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Ok(Some(Decoded::Rejected(ProtocolErrorReport::malformed_packet(
                        packet_id,
                        format!("Decompression failed: {}", e),
                    ))))
                }
            }
        } else {
            frame
        };

        let decoded = match Packet::decode_payload(packet_id, payload) {
            Ok(Some(packet)) => Decoded::Packet(packet),
            Ok(None) => Decoded::Rejected(ProtocolErrorReport::unknown_packet(packet_id)),
            Err(e) => Decoded::Rejected(ProtocolErrorReport::malformed_packet(
                packet_id,
                e.to_string(),
            )),
        };
        Ok(Some(decoded))
    }
}

fn decompress(data: &[u8]) -> Result<Bytes> {
    let size = snap::raw::decompress_len(data)?;
    if size > MAX_DECOMPRESSED_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: MAX_DECOMPRESSED_SIZE,
        });
    }
    Ok(Bytes::from(snap::raw::Decoder::new().decompress_vec(data)?))
}

/// Encodes a single packet into a standalone frame.
pub fn encode_frame(packet: &Packet, compression_enabled: bool) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    FrameEncoder::new(compression_enabled).encode(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Buffered frame reader over any async byte stream.
pub struct PacketReader<R> {
    reader: R,
    buffer: BytesMut,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(8 * 1024),
            decoder: FrameDecoder::new(),
        }
    }

    /// Reads until one complete frame is available.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    pub async fn read_packet(&mut self) -> Result<Option<Decoded>> {
        loop {
            if let Some(decoded) = self.decoder.decode(&mut self.buffer)? {
                return Ok(Some(decoded));
            }

            let read = self.reader.read_buf(&mut self.buffer).await?;
            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                )));
            }
        }
    }
}

/// Frame writer; one per connection so writes are never interleaved.
pub struct PacketWriter<W> {
    writer: W,
    buffer: BytesMut,
    encoder: FrameEncoder,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(writer: W, compression_enabled: bool) -> Self {
        Self {
            writer,
            buffer: BytesMut::with_capacity(8 * 1024),
            encoder: FrameEncoder::new(compression_enabled),
        }
    }

    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.buffer.clear();
        self.encoder.encode(packet, &mut self.buffer)?;
        self.writer.write_all(&self.buffer).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Underlying writer, for callers that need to bypass framing.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Heartbeat, KvSync, ProtocolErrorReport, SyncOperation};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn heartbeat() -> Packet {
        Packet::Heartbeat(Heartbeat {
            timestamp: 1_000,
            sequence: 3,
        })
    }

    fn large_kv_sync() -> Packet {
        let mut data = HashMap::new();
        data.insert("inventory".to_string(), vec![0xAB; 4096]);
        Packet::KvSync(KvSync {
            player_id: Uuid::new_v4(),
            origin: "lobby".to_string(),
            operation: SyncOperation::FullSync,
            version: 5,
            data,
        })
    }

    #[test]
    fn test_frame_header_layout() {
        let frame = encode_frame(&heartbeat(), true).unwrap();
        // 1 flag byte + 4 id bytes + 12 payload bytes
        assert_eq!(&frame[..4], &17i32.to_be_bytes());
        assert_eq!(frame[4], FLAG_CRITICAL);
        assert_eq!(&frame[5..9], &0x03u32.to_be_bytes());
        assert_eq!(frame.len(), 21);
    }

    #[test]
    fn test_large_payload_is_compressed() {
        let packet = large_kv_sync();
        let frame = encode_frame(&packet, true).unwrap();
        assert_ne!(frame[4] & FLAG_COMPRESSED, 0);
        assert!(frame.len() < 4096);

        let mut buf = BytesMut::from(&frame[..]);
        let decoded = FrameDecoder::new().decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(Decoded::Packet(packet)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_compression_disabled_sends_raw() {
        let frame = encode_frame(&large_kv_sync(), false).unwrap();
        assert_eq!(frame[4] & FLAG_COMPRESSED, 0);
        assert!(frame.len() > 4096);
    }

    #[test]
    fn test_partial_frame_waits_for_more_data() {
        let frame = encode_frame(&heartbeat(), false).unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&frame[..10]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 10);

        buf.extend_from_slice(&frame[10..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Decoded::Packet(heartbeat()))
        );
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(&heartbeat(), false).unwrap());
        buf.extend_from_slice(&encode_frame(&heartbeat(), false).unwrap());
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(&mut buf).unwrap().is_some());
        assert!(decoder.decode(&mut buf).unwrap().is_some());
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_is_fatal() {
        let mut buf = BytesMut::new();
        buf.put_i32((MAX_FRAME_SIZE + 1) as i32);
        let err = FrameDecoder::new().decode(&mut buf).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_negative_length_is_fatal() {
        let mut buf = BytesMut::new();
        buf.put_i32(-1);
        let err = FrameDecoder::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFrameLength(-1)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unknown_packet_id_is_rejected_not_fatal() {
        let mut buf = BytesMut::new();
        buf.put_i32(5);
        buf.put_u8(0);
        buf.put_u32(0x7F);
        let decoded = FrameDecoder::new().decode(&mut buf).unwrap();
        assert_eq!(
            decoded,
            Some(Decoded::Rejected(ProtocolErrorReport::unknown_packet(0x7F)))
        );
    }

    #[test]
    fn test_malformed_payload_is_rejected_not_fatal() {
        let mut buf = BytesMut::new();
        buf.put_i32(7);
        buf.put_u8(0);
        buf.put_u32(0x03);
        buf.put_u16(1);
        match FrameDecoder::new().decode(&mut buf).unwrap() {
            Some(Decoded::Rejected(report)) => {
                assert_eq!(report.failed_packet_id, 0x03);
                assert_eq!(report.error_code, "MALFORMED_PACKET");
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_compressed_payload_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32(9);
        buf.put_u8(FLAG_COMPRESSED);
        buf.put_u32(0x03);
        buf.put_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf).unwrap(),
            Some(Decoded::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_reader_reassembles_split_frames() {
        let frame = encode_frame(&heartbeat(), false).unwrap();
        let stream = tokio_test::io::Builder::new()
            .read(&frame[..3])
            .read(&frame[3..12])
            .read(&frame[12..])
            .build();
        let mut reader = PacketReader::new(stream);
        assert_eq!(
            reader.read_packet().await.unwrap(),
            Some(Decoded::Packet(heartbeat()))
        );
        assert_eq!(reader.read_packet().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_eof_mid_frame_is_error() {
        let frame = encode_frame(&heartbeat(), false).unwrap();
        let stream = tokio_test::io::Builder::new().read(&frame[..8]).build();
        let mut reader = PacketReader::new(stream);
        assert!(reader.read_packet().await.is_err());
    }

    #[tokio::test]
    async fn test_writer_emits_encoded_frame() {
        let frame = encode_frame(&heartbeat(), true).unwrap();
        let stream = tokio_test::io::Builder::new().write(&frame).build();
        let mut writer = PacketWriter::new(stream, true);
        writer.write_packet(&heartbeat()).await.unwrap();
    }
}
