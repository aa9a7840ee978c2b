//! Writing a USM container from in-memory sources.
//!
//! The reference implementation (`original_source/include/usm/media.hpp`)
//! only sketches the source interfaces `IVideoSource`/`IAudioSource` used by
//! its (unported) authoring side; this module gives them a working Rust
//! counterpart so [`Muxer`] can build a file a [`crate::demux::Usm`] can
//! open, matching [`crate::demux`]'s chunk layout byte for byte.

use std::io::Write;

use crate::chunk::{Chunk, ChunkPayload, Padding};
use crate::cipher::{self, Keys};
use crate::error::Result;
use crate::page::Page;
use crate::sector::SectorWriter;
use crate::types::{ChunkKind, PayloadKind};

/// One encoded video (or alpha) frame.
#[derive(Debug, Clone)]
pub struct VideoPacket {
    pub data: Vec<u8>,
    pub keyframe: bool,
}

/// A source of video or alpha-mask packets plus their directory metadata.
pub trait VideoSource {
    fn crid_page(&self) -> &Page;
    fn header_page(&self) -> &Page;
    fn metadata_pages(&self) -> Option<&[Page]>;
    fn channel_number(&self) -> i16;
    fn is_alpha(&self) -> bool {
        false
    }
    fn reset(&mut self);
    fn next(&mut self) -> Option<VideoPacket>;
}

/// A source of audio packets plus their directory metadata.
pub trait AudioSource {
    fn crid_page(&self) -> &Page;
    fn header_page(&self) -> &Page;
    fn metadata_pages(&self) -> Option<&[Page]>;
    fn channel_number(&self) -> i16;
    fn reset(&mut self);
    fn next(&mut self) -> Option<Vec<u8>>;
}

/// Writes `INFO`/`HEADER`/`METADATA`/`STREAM` chunks for a set of sources
/// into a sector-padded USM container.
pub struct Muxer<W: Write> {
    out: SectorWriter<W>,
    keys: Option<Keys>,
}

impl<W: Write> Muxer<W> {
    pub fn new(out: W, key: Option<u64>) -> Self {
        Self {
            out: SectorWriter::new(out),
            keys: key.map(cipher::key_schedule),
        }
    }

    fn write_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        self.out.write(&chunk.pack()?)?;
        Ok(())
    }

    /// Emits the file-level `CRID` directory chunk (the page with `chno ==
    /// -1`) followed by one per-channel directory page per source.
    pub fn write_directory(&mut self, usm_crid: Page, channel_crids: Vec<Page>) -> Result<()> {
        let chunk = Chunk::new(
            ChunkKind::Info,
            PayloadKind::Header,
            ChunkPayload::Pages(vec![usm_crid]),
        );
        self.write_chunk(&chunk)?;

        for crid in channel_crids {
            let chunk = Chunk::new(
                ChunkKind::Info,
                PayloadKind::Header,
                ChunkPayload::Pages(vec![crid]),
            );
            self.write_chunk(&chunk)?;
        }

        Ok(())
    }

    fn cipher_video(&self, data: &[u8]) -> Result<Vec<u8>> {
        match &self.keys {
            Some(keys) => cipher::encrypt_video_packet(data, &keys.video_key),
            None => Ok(data.to_vec()),
        }
    }

    fn cipher_audio(&self, data: &[u8]) -> Result<Vec<u8>> {
        match &self.keys {
            Some(keys) => cipher::crypt_audio_packet(data, &keys.audio_key),
            None => Ok(data.to_vec()),
        }
    }

    /// Writes one video/alpha source's `HEADER`, optional `METADATA`, and
    /// `STREAM` chunks in order.
    pub fn write_video_source(&mut self, source: &mut dyn VideoSource) -> Result<()> {
        let kind = if source.is_alpha() {
            ChunkKind::Alpha
        } else {
            ChunkKind::Video
        };
        let channel_number = source.channel_number() as u8;

        let mut header = Chunk::new(
            kind,
            PayloadKind::Header,
            ChunkPayload::Pages(vec![source.header_page().clone()]),
        );
        header.channel_number = channel_number;
        self.write_chunk(&header)?;

        if let Some(metadata) = source.metadata_pages() {
            let mut meta = Chunk::new(
                kind,
                PayloadKind::Metadata,
                ChunkPayload::Pages(metadata.to_vec()),
            );
            meta.channel_number = channel_number;
            self.write_chunk(&meta)?;
        }

        source.reset();
        while let Some(packet) = source.next() {
            let data = self.cipher_video(&packet.data)?;
            let mut stream = Chunk::new(kind, PayloadKind::Stream, ChunkPayload::Bytes(data));
            stream.channel_number = channel_number;
            self.write_chunk(&stream)?;
        }

        Ok(())
    }

    /// Writes one audio source's `HEADER`, optional `METADATA`, and
    /// `STREAM` chunks in order.
    pub fn write_audio_source(&mut self, source: &mut dyn AudioSource) -> Result<()> {
        let channel_number = source.channel_number() as u8;

        let mut header = Chunk::new(
            ChunkKind::Audio,
            PayloadKind::Header,
            ChunkPayload::Pages(vec![source.header_page().clone()]),
        );
        header.channel_number = channel_number;
        self.write_chunk(&header)?;

        if let Some(metadata) = source.metadata_pages() {
            let mut meta = Chunk::new(
                ChunkKind::Audio,
                PayloadKind::Metadata,
                ChunkPayload::Pages(metadata.to_vec()),
            );
            meta.channel_number = channel_number;
            self.write_chunk(&meta)?;
        }

        source.reset();
        while let Some(data) = source.next() {
            let data = self.cipher_audio(&data)?;
            let mut stream = Chunk::new(
                ChunkKind::Audio,
                PayloadKind::Stream,
                ChunkPayload::Bytes(data),
            );
            stream.channel_number = channel_number;
            self.write_chunk(&stream)?;
        }

        Ok(())
    }

    /// Consumes the muxer, returning the underlying sink. A chunk's own
    /// `padding` field (see [`Padding::Predicate`]) is the only place extra
    /// bytes may legally appear between chunks - raw trailing zero bytes
    /// outside of any chunk's header would desync [`crate::demux::Usm::open`]'s
    /// chunk walk, so this never appends any.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

/// Convenience constructor mirroring [`Chunk::new`]'s default fixed-zero
/// padding, exposed for callers that build chunks manually.
pub fn fixed_padding(n: u16) -> Padding {
    Padding::Fixed(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::Usm;
    use crate::page::Element;
    use crate::types::ChunkKind as CK;

    struct OneShotVideo {
        crid: Page,
        header: Page,
        packets: Vec<Vec<u8>>,
        pos: usize,
        channel: i16,
    }

    impl VideoSource for OneShotVideo {
        fn crid_page(&self) -> &Page {
            &self.crid
        }
        fn header_page(&self) -> &Page {
            &self.header
        }
        fn metadata_pages(&self) -> Option<&[Page]> {
            None
        }
        fn channel_number(&self) -> i16 {
            self.channel
        }
        fn reset(&mut self) {
            self.pos = 0;
        }
        fn next(&mut self) -> Option<VideoPacket> {
            let data = self.packets.get(self.pos)?.clone();
            self.pos += 1;
            Some(VideoPacket {
                data,
                keyframe: self.pos == 1,
            })
        }
    }

    fn usm_level_crid() -> Page {
        let mut p = Page::new("CRIUSF_DIR_STREAM");
        p.update("chno", Element::I16(-1));
        p
    }

    fn video_crid(filename: &str) -> Page {
        let mut p = Page::new("CRIUSF_DIR_STREAM");
        p.update("fileid", Element::U32(0));
        p.update("filename", Element::String(filename.to_string()));
        p.update("filesize", Element::U32(0));
        p.update("chno", Element::I16(0));
        p.update("stmid", Element::I32(CK::Video.fourcc() as i32));
        p.update("fmtver", Element::I32(16));
        p
    }

    #[test]
    fn muxed_file_demuxes_back_unkeyed() {
        let mut source = OneShotVideo {
            crid: video_crid("clip.ivf"),
            header: Page::new("VIDEO_HDRINFO"),
            packets: vec![b"frame0".to_vec(), b"frame1".to_vec()],
            pos: 0,
            channel: 0,
        };

        let mut muxer = Muxer::new(Vec::new(), None);
        muxer
            .write_directory(usm_level_crid(), vec![source.crid_page().clone()])
            .unwrap();
        muxer.write_video_source(&mut source).unwrap();
        let bytes = muxer.into_inner();

        let path = std::env::temp_dir().join("usm-test-mux-roundtrip.usm");
        std::fs::write(&path, &bytes).unwrap();
        let usm = Usm::open(&path, None).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(usm.videos().len(), 1);
        assert_eq!(usm.videos()[0].stream.len(), 2);
    }

    #[test]
    fn muxed_file_round_trips_with_key() {
        let mut source = OneShotVideo {
            crid: video_crid("secret.ivf"),
            header: Page::new("VIDEO_HDRINFO"),
            packets: vec![vec![0x42u8; 0x300]],
            pos: 0,
            channel: 0,
        };

        let key = 0x0011_2233_4455_6677u64;
        let mut muxer = Muxer::new(Vec::new(), Some(key));
        muxer
            .write_directory(usm_level_crid(), vec![source.crid_page().clone()])
            .unwrap();
        muxer.write_video_source(&mut source).unwrap();
        let bytes = muxer.into_inner();

        let path = std::env::temp_dir().join("usm-test-mux-keyed.usm");
        std::fs::write(&path, &bytes).unwrap();

        let out_dir = std::env::temp_dir().join("usm-test-mux-keyed-out");
        std::fs::create_dir_all(&out_dir).ok();

        let usm = Usm::open(&path, Some(key)).unwrap();
        usm.demux(&out_dir, true, false, false, None).unwrap();

        let produced =
            std::fs::read(out_dir.join("usm-test-mux-keyed.usm/videos/secret.ivf")).unwrap();

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir_all(&out_dir).ok();

        assert_eq!(produced, vec![0x42u8; 0x300]);
    }
}
