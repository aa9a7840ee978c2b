//! The 32-byte chunk header that wraps every payload in a USM file.
//!
//! A chunk is either raw bytes (elementary-stream data) or an `@UTF` page
//! table; [`Chunk::from_bytes`] and [`Chunk::pack`] are exact inverses,
//! ported from `original_source/src/chunk.cpp`.

use crate::bytes::{read_be_u16, read_be_u32, slice, write_be_u16, write_be_u32};
use crate::error::{Result, UsmError};
use crate::page::{self, Page};
use crate::types::{ChunkKind, PayloadKind};

/// Either a page table or an opaque elementary-stream payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    Bytes(Vec<u8>),
    Pages(Vec<Page>),
}

/// How much padding follows a packed payload.
///
/// Most chunks use a fixed padding size read straight off the wire; the
/// muxer instead wants "pad up to the next sector boundary", which is a
/// function of the packed size so far - hence the function-pointer variant.
#[derive(Clone, Copy)]
pub enum Padding {
    Fixed(u16),
    Predicate(fn(u32) -> u16),
}

impl std::fmt::Debug for Padding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Padding::Fixed(n) => write!(f, "Padding::Fixed({n})"),
            Padding::Predicate(_) => write!(f, "Padding::Predicate(<fn>)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_type: ChunkKind,
    pub payload_type: PayloadKind,
    pub payload: ChunkPayload,
    pub frame_rate: u32,
    pub frame_time: u32,
    pub padding: Padding,
    pub channel_number: u8,
    /// Byte offset of the payload within the chunk. `0x20` for freshly
    /// packed chunks; for parsed chunks this is `0x08 + payload_offset_field`.
    pub payload_offset: usize,
}

impl Chunk {
    pub fn new(chunk_type: ChunkKind, payload_type: PayloadKind, payload: ChunkPayload) -> Self {
        Self {
            chunk_type,
            payload_type,
            payload,
            frame_rate: 30,
            frame_time: 0,
            padding: Padding::Fixed(0),
            channel_number: 0,
            payload_offset: 0x20,
        }
    }

    fn packed_payload(&self) -> Result<Vec<u8>> {
        match &self.payload {
            ChunkPayload::Bytes(b) => Ok(b.clone()),
            ChunkPayload::Pages(pages) => page::pack_pages(pages, 0),
        }
    }

    /// Resolves [`Padding`] to a concrete byte count. For the predicate form,
    /// the argument is `0x20 + packed payload length`, matching the
    /// reference's `fn(int(0x20 + payload_bytes.size()))`.
    pub fn computed_padding(&self) -> Result<u16> {
        match self.padding {
            Padding::Fixed(n) => Ok(n),
            Padding::Predicate(f) => {
                let payload_len = self.packed_payload()?.len() as u32;
                Ok(f(0x20 + payload_len))
            }
        }
    }

    pub fn packed_size(&self) -> Result<usize> {
        let payload_len = self.packed_payload()?.len();
        let pad = self.computed_padding()? as usize;
        Ok(0x20 + payload_len + pad)
    }

    /// Parses one chunk (header + payload + padding) from `chunk`, which
    /// must contain exactly that chunk's bytes (no trailing data from the
    /// next chunk).
    pub fn from_bytes(chunk: &[u8]) -> Result<Self> {
        if chunk.len() < 0x20 {
            return Err(UsmError::BadChunkGeometry(
                "chunk shorter than the fixed 32-byte header".to_string(),
            ));
        }

        let sig = read_be_u32(chunk, 0)?;
        let chunk_type = ChunkKind::from_fourcc(sig)?;

        let chunksize_field = read_be_u32(chunk, 0x4)? as i64;
        let payload_offset_field = chunk[0x9] as i64;
        let padding_size = read_be_u16(chunk, 0xA)?;
        let chno = chunk[0xC];

        let frame_time = read_be_u32(chunk, 0x10)?;
        let frame_rate = read_be_u32(chunk, 0x14)?;

        let payload_begin = 0x08 + payload_offset_field;
        let payload_size = chunksize_field - padding_size as i64 - payload_offset_field;

        if payload_begin < 0 || payload_begin > chunk.len() as i64 {
            return Err(UsmError::BadChunkGeometry(format!(
                "payload begin {payload_begin} out of range"
            )));
        }
        if payload_size < 0 {
            return Err(UsmError::BadChunkGeometry(format!(
                "negative payload size {payload_size}"
            )));
        }

        let payload_begin = payload_begin as usize;
        let payload_end = payload_begin + payload_size as usize;
        let payload_raw = slice(chunk, payload_begin, payload_end)?;

        let payload_type_bits = chunk[0xF] & 0x3;
        let payload_type = PayloadKind::from_u8(payload_type_bits)?;

        let payload = if payload_raw.len() >= 4 && &payload_raw[0..4] == b"@UTF" {
            ChunkPayload::Pages(page::get_pages(payload_raw)?)
        } else {
            ChunkPayload::Bytes(payload_raw.to_vec())
        };

        Ok(Chunk {
            chunk_type,
            payload_type,
            payload,
            frame_rate,
            frame_time,
            padding: Padding::Fixed(padding_size),
            channel_number: chno,
            payload_offset: payload_begin,
        })
    }

    /// Packs the chunk back into its 32-byte-header-plus-payload-plus-padding
    /// wire form. The packed payload offset is always `0x18` (`payload_begin`
    /// is always `0x20`), matching the reference packer.
    pub fn pack(&self) -> Result<Vec<u8>> {
        let payload_bytes = self.packed_payload()?;
        let pad = self.computed_padding()?;

        let mut out = Vec::with_capacity(0x20 + payload_bytes.len() + pad as usize);
        write_be_u32(&mut out, self.chunk_type.fourcc());

        let chunksize_field = 0x18u32 + payload_bytes.len() as u32 + pad as u32;
        write_be_u32(&mut out, chunksize_field);

        out.push(0x00);
        out.push(0x18);
        write_be_u16(&mut out, pad);

        out.push(self.channel_number);
        out.push(0x00);
        out.push(0x00);
        out.push(self.payload_type as u8);

        write_be_u32(&mut out, self.frame_time);
        write_be_u32(&mut out, self.frame_rate);

        out.extend(std::iter::repeat_n(0u8, 8));
        out.extend_from_slice(&payload_bytes);
        out.extend(std::iter::repeat_n(0u8, pad as usize));

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Element;

    #[test]
    fn raw_payload_chunk_round_trips() {
        let mut chunk = Chunk::new(
            ChunkKind::Video,
            PayloadKind::Stream,
            ChunkPayload::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]),
        );
        chunk.channel_number = 2;
        chunk.frame_time = 1001;
        chunk.frame_rate = 30000;

        let packed = chunk.pack().unwrap();
        let parsed = Chunk::from_bytes(&packed).unwrap();

        assert_eq!(parsed.chunk_type, ChunkKind::Video);
        assert_eq!(parsed.payload_type, PayloadKind::Stream);
        assert_eq!(parsed.channel_number, 2);
        assert_eq!(parsed.frame_time, 1001);
        assert_eq!(parsed.frame_rate, 30000);
        assert_eq!(parsed.payload, ChunkPayload::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]));
    }

    #[test]
    fn page_payload_chunk_round_trips() {
        let mut page = Page::new("VIDEO_HDRINFO");
        page.update("width", Element::I32(1920));
        page.update("height", Element::I32(1080));

        let chunk = Chunk::new(
            ChunkKind::Info,
            PayloadKind::Header,
            ChunkPayload::Pages(vec![page.clone()]),
        );

        let packed = chunk.pack().unwrap();
        let parsed = Chunk::from_bytes(&packed).unwrap();

        match parsed.payload {
            ChunkPayload::Pages(pages) => {
                assert_eq!(pages, vec![page]);
            }
            ChunkPayload::Bytes(_) => panic!("expected page payload"),
        }
    }

    #[test]
    fn header_layout_matches_wire_format() {
        let chunk = Chunk::new(
            ChunkKind::Audio,
            PayloadKind::Stream,
            ChunkPayload::Bytes(vec![1, 2, 3]),
        );
        let packed = chunk.pack().unwrap();

        assert_eq!(&packed[0..4], b"@SFA");
        assert_eq!(packed[0x9], 0x18);
        assert_eq!(read_be_u16(&packed, 0xA).unwrap(), 0);
        assert_eq!(packed[0xC], 0);
        assert_eq!(packed[0xF] & 0x3, PayloadKind::Stream as u8);
        assert_eq!(&packed[0x20..], &[1, 2, 3]);
    }

    #[test]
    fn predicate_padding_pads_to_sector() {
        fn pad_to_sector(n: u32) -> u16 {
            let sector = 0x800u32;
            ((sector - (n % sector)) % sector) as u16
        }

        let mut chunk = Chunk::new(
            ChunkKind::Video,
            PayloadKind::Stream,
            ChunkPayload::Bytes(vec![0u8; 100]),
        );
        chunk.padding = Padding::Predicate(pad_to_sector);

        let packed = chunk.pack().unwrap();
        assert_eq!(packed.len() % 0x800, 0);

        let parsed = Chunk::from_bytes(&packed).unwrap();
        assert_eq!(parsed.payload, ChunkPayload::Bytes(vec![0u8; 100]));
    }

    #[test]
    fn truncated_chunk_is_rejected() {
        assert!(matches!(
            Chunk::from_bytes(&[0u8; 10]),
            Err(UsmError::BadChunkGeometry(_))
        ));
    }

    #[test]
    fn unknown_signature_is_rejected() {
        let mut buf = vec![0u8; 0x20];
        buf[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(
            Chunk::from_bytes(&buf),
            Err(UsmError::UnknownSignature(_))
        ));
    }
}
