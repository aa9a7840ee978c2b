//! Opening a USM file and demuxing its tracks to elementary-stream files.
//!
//! Ported from `original_source/src/usm.cpp`: [`Usm::open`] walks the chunk
//! list once, bucketing `INFO` pages and per-channel video/audio/alpha
//! spans, then matches each channel's accumulated data against the matching
//! `CRIUSF_DIR_STREAM` page. [`Usm::demux`] reads those spans back out of
//! the file and writes them to disk, deciphering them if a key is set.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::bytes::{read_be_u16, read_be_u32};
use crate::chunk::{Chunk, ChunkPayload};
use crate::cipher::{self, Keys};
use crate::error::{Result, UsmError};
use crate::page::Page;
use crate::slug;
use crate::types::{ChunkKind, PayloadKind};

/// One video/audio/alpha channel: its directory record, optional codec
/// header, optional metadata pages, and the file spans making up its
/// elementary stream.
#[derive(Debug, Clone)]
pub struct Track {
    pub channel_number: i16,
    pub crid: Page,
    pub header: Page,
    pub metadata: Option<Vec<Page>>,
    pub stream: Vec<(u64, u32)>,
}

#[derive(Debug, Clone, Default)]
struct ChannelAccum {
    stream: Vec<(u64, u32)>,
    header: Page,
    metadata: Option<Vec<Page>>,
}

/// An opened USM container: its tracks, bucketed by kind, plus the
/// file-level `CRID` page and any `fmtver` declared on video channel 0.
#[derive(Debug, Clone)]
pub struct Usm {
    path: PathBuf,
    key: Option<u64>,
    usm_crid: Page,
    version: Option<i32>,
    videos: Vec<Track>,
    audios: Vec<Track>,
    alphas: Vec<Track>,
}

fn chunk_size_and_padding(header20: &[u8]) -> Result<(i64, u16)> {
    if header20.len() < 0x20 {
        return Err(UsmError::BadChunkGeometry(
            "chunk header shorter than 0x20 bytes".to_string(),
        ));
    }
    let mut size = read_be_u32(header20, 4)? as i64;
    let offset = header20[9] as i64;
    let padding_size = read_be_u16(header20, 10)?;
    size -= offset + padding_size as i64;
    if size < 0 {
        return Err(UsmError::BadChunkGeometry(format!(
            "negative chunk payload size {size}"
        )));
    }
    Ok((size, padding_size))
}

fn chunk_helper(dst: &mut HashMap<i16, ChannelAccum>, c: &Chunk, chunk_file_offset: u64) -> Result<()> {
    let accum = dst.entry(c.channel_number as i16).or_default();

    match c.payload_type {
        PayloadKind::Stream => {
            let ChunkPayload::Bytes(payload) = &c.payload else {
                return Err(UsmError::SchemaViolation(
                    "STREAM payload was unexpectedly pages".to_string(),
                ));
            };
            accum.stream.push((
                chunk_file_offset + c.payload_offset as u64,
                payload.len() as u32,
            ));
        }
        PayloadKind::Header => {
            let ChunkPayload::Pages(pages) = &c.payload else {
                return Err(UsmError::SchemaViolation(
                    "HEADER payload is not pages".to_string(),
                ));
            };
            let first = pages
                .first()
                .ok_or_else(|| UsmError::SchemaViolation("empty HEADER pages".to_string()))?;
            accum.header = first.clone();
        }
        PayloadKind::Metadata => {
            let ChunkPayload::Pages(pages) = &c.payload else {
                return Err(UsmError::SchemaViolation(
                    "METADATA payload is not pages".to_string(),
                ));
            };
            accum.metadata = Some(pages.clone());
        }
        PayloadKind::SectionEnd => {}
    }

    Ok(())
}

fn build_tracks(
    accums: &HashMap<i16, ChannelAccum>,
    crids: &[Page],
    want_kind: ChunkKind,
) -> Result<Vec<Track>> {
    let mut tracks = Vec::with_capacity(accums.len());

    for (&chno, accum) in accums {
        let crid_match = crids
            .iter()
            .find(|p| {
                let Some(p_chno) = p.require_i16("chno").ok() else {
                    return false;
                };
                let Some(stmid) = p.require_i32("stmid").ok() else {
                    return false;
                };
                p_chno == chno && stmid as u32 == want_kind.fourcc()
            })
            .ok_or(UsmError::OrphanChannel {
                channel: chno,
                kind: want_kind.name(),
            })?;

        tracks.push(Track {
            channel_number: chno,
            crid: crid_match.clone(),
            header: accum.header.clone(),
            metadata: accum.metadata.clone(),
            stream: accum.stream.clone(),
        });
    }

    tracks.sort_by_key(|t| t.channel_number);
    Ok(tracks)
}

impl Usm {
    /// Opens `path`, reading its chunk list into tracks. `key` is stashed
    /// for [`Usm::demux`] when no `key_override` is given there.
    pub fn open(path: impl AsRef<Path>, key: Option<u64>) -> Result<Usm> {
        let path = path.as_ref();
        let filesize = fs::metadata(path)?.len();
        if filesize <= 0x20 {
            return Err(UsmError::BadChunkGeometry(
                "file is too small to contain a single chunk".to_string(),
            ));
        }

        let mut f = fs::File::open(path)?;

        let mut magic = [0u8; 4];
        f.read_exact(&mut magic)?;
        if &magic != b"CRID" {
            return Err(UsmError::BadSignature {
                context: format!("expected CRID magic, got {magic:02X?}"),
            });
        }

        let mut crids: Vec<Page> = Vec::new();
        let mut video_ch: HashMap<i16, ChannelAccum> = HashMap::new();
        let mut audio_ch: HashMap<i16, ChannelAccum> = HashMap::new();
        let mut alpha_ch: HashMap<i16, ChannelAccum> = HashMap::new();

        f.seek(SeekFrom::Start(0))?;

        loop {
            let offset = f.stream_position()?;
            if offset >= filesize {
                break;
            }

            let mut header = [0u8; 0x20];
            if f.read_exact(&mut header).is_err() {
                break;
            }

            let (payload_size, padding_size) = chunk_size_and_padding(&header)?;

            f.seek(SeekFrom::Current(-0x20))?;

            let mut chunk_bytes = vec![0u8; 0x20 + payload_size as usize];
            f.read_exact(&mut chunk_bytes)?;

            f.seek(SeekFrom::Current(padding_size as i64))?;

            let c = Chunk::from_bytes(&chunk_bytes)?;

            if c.chunk_type == ChunkKind::Info {
                if let ChunkPayload::Pages(pages) = &c.payload {
                    crids.extend(pages.iter().cloned());
                }
                continue;
            }

            match c.chunk_type {
                ChunkKind::Video => chunk_helper(&mut video_ch, &c, offset)?,
                ChunkKind::Audio => chunk_helper(&mut audio_ch, &c, offset)?,
                ChunkKind::Alpha => chunk_helper(&mut alpha_ch, &c, offset)?,
                _ => {}
            }
        }

        let usm_crid = crids
            .iter()
            .find(|p| p.require_i16("chno").is_ok_and(|chno| chno == -1))
            .cloned()
            .ok_or(UsmError::MissingUsmCrid)?;

        let videos = build_tracks(&video_ch, &crids, ChunkKind::Video)?;
        let audios = build_tracks(&audio_ch, &crids, ChunkKind::Audio)?;
        let alphas = build_tracks(&alpha_ch, &crids, ChunkKind::Alpha)?;

        let version = videos
            .iter()
            .find(|v| v.channel_number == 0)
            .and_then(|v| v.crid.require_i32("fmtver").ok());

        debug!(
            "opened {:?}: {} video, {} audio, {} alpha tracks",
            path,
            videos.len(),
            audios.len(),
            alphas.len()
        );

        Ok(Usm {
            path: path.to_path_buf(),
            key,
            usm_crid,
            version,
            videos,
            audios,
            alphas,
        })
    }

    pub fn filepath(&self) -> &Path {
        &self.path
    }

    pub fn videos(&self) -> &[Track] {
        &self.videos
    }

    pub fn audios(&self) -> &[Track] {
        &self.audios
    }

    pub fn alphas(&self) -> &[Track] {
        &self.alphas
    }

    pub fn usm_crid_page(&self) -> &Page {
        &self.usm_crid
    }

    pub fn version(&self) -> Option<i32> {
        self.version
    }

    /// Writes each selected track's elementary stream as a single
    /// concatenated file under `out_dir/<slugified file name>/{videos,audios,alphas}/`.
    pub fn demux(
        &self,
        out_dir: impl AsRef<Path>,
        save_video: bool,
        save_audio: bool,
        save_alpha: bool,
        key_override: Option<u64>,
    ) -> Result<()> {
        let use_key = key_override.or(self.key);
        let keys: Option<Keys> = use_key.map(cipher::key_schedule);

        let folder_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let folder = slug::slugify(folder_name, true);

        let out_root = out_dir.as_ref().join(folder);
        fs::create_dir_all(&out_root)?;

        if save_video && !self.videos.is_empty() {
            let sub = out_root.join("videos");
            fs::create_dir_all(&sub)?;
            for t in &self.videos {
                self.write_track(t, &sub, true, false, keys.as_ref())?;
            }
        }

        if save_audio && !self.audios.is_empty() {
            let sub = out_root.join("audios");
            fs::create_dir_all(&sub)?;
            for t in &self.audios {
                self.write_track(t, &sub, false, true, keys.as_ref())?;
            }
        }

        if save_alpha && !self.alphas.is_empty() {
            let sub = out_root.join("alphas");
            fs::create_dir_all(&sub)?;
            for t in &self.alphas {
                self.write_track(t, &sub, true, false, keys.as_ref())?;
            }
        }

        Ok(())
    }

    fn write_track(
        &self,
        t: &Track,
        subdir: &Path,
        is_video: bool,
        is_audio: bool,
        keys: Option<&Keys>,
    ) -> Result<()> {
        let mut input = fs::File::open(&self.path)?;

        let raw_name = t.crid.require_string("filename")?;
        let name = slug::slugify(slug::basename(raw_name), true);

        let out_path = subdir.join(name);
        let mut output = fs::File::create(&out_path)?;

        for &(off, size) in &t.stream {
            let mut buf = vec![0u8; size as usize];
            input.seek(SeekFrom::Start(off))?;
            input.read_exact(&mut buf)?;

            if let Some(keys) = keys {
                if is_video {
                    buf = cipher::decrypt_video_packet(&buf, &keys.video_key)?;
                } else if is_audio {
                    buf = cipher::crypt_audio_packet(&buf, &keys.audio_key)?;
                }
            }

            output.write_all(&buf)?;
        }

        Ok(())
    }
}
