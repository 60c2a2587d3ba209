use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::audio_models::{EncodedUnit, OutputFormat, TrackHandle};
use crate::models::error::WriteError;
use crate::processing::mp4_format::{self, SampleTable, FTYP_SIZE, MDAT_HEADER_SIZE};
use crate::traits::container_writer::{ContainerWriter, FinalizedFile};

const TRACK_ID: u32 = 1;

/// Streaming single-track `.m4a` writer.
///
/// ## File Format
///
/// ```text
/// [28-byte ftyp]
/// [16-byte mdat header, size patched on finalize]
/// [AAC access units, back to back...]
/// [moov, written on finalize]
/// ```
///
/// Everything is written to `<output>.part` and renamed into place only once
/// the `moov` index is complete, so an interrupted session never leaves a
/// file at the output path that looks finished.
pub struct M4aWriter {
    final_path: PathBuf,
    part_path: PathBuf,
    file: Option<BufWriter<File>>,
    format: Option<OutputFormat>,
    timestamps_us: Vec<u64>,
    table: SampleTable,
    payload_bytes: u64,
    finalized: bool,
    completed: bool,
}

impl M4aWriter {
    /// Create `<path>.part` and write the `ftyp` and mdat headers.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, WriteError> {
        let final_path = path.into();
        let part_path = part_path_for(&final_path)?;

        if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| WriteError::CannotCreate(format!("failed to create directory: {}", e)))?;
        }

        let file = File::create(&part_path)
            .map_err(|e| WriteError::CannotCreate(format!("failed to create file: {}", e)))?;

        let mut writer = Self {
            final_path,
            part_path,
            file: Some(BufWriter::new(file)),
            format: None,
            timestamps_us: Vec::new(),
            table: SampleTable::default(),
            payload_bytes: 0,
            finalized: false,
            completed: false,
        };

        let mut header = mp4_format::generate_ftyp();
        header.extend_from_slice(&mp4_format::generate_mdat_header(0));
        if let Err(e) = writer.write_raw(&header) {
            writer.discard();
            return Err(WriteError::CannotCreate(e.to_string()));
        }
        Ok(writer)
    }

    /// Path of the finished file.
    pub fn file_path(&self) -> &Path {
        &self.final_path
    }

    /// Path written to until finalize.
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    pub fn units_written(&self) -> u64 {
        self.table.sizes.len() as u64
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), WriteError> {
        let file = self.file.as_mut().ok_or(WriteError::Finalized)?;
        file.write_all(data)
            .map_err(|e| WriteError::Io(format!("write failed: {}", e)))
    }

    fn finish_file(&mut self, format: &OutputFormat) -> Result<FinalizedFile, WriteError> {
        self.table.durations = unit_durations(&self.timestamps_us, format);
        self.table.chunk_offset = (FTYP_SIZE + MDAT_HEADER_SIZE) as u64;
        let moov = mp4_format::generate_moov(format, &self.table, TRACK_ID);
        let mdat_header = mp4_format::generate_mdat_header(self.payload_bytes);

        let mut file = self.file.take().ok_or(WriteError::Finalized)?;
        file.write_all(&moov).map_err(io_error)?;
        file.seek(SeekFrom::Start(FTYP_SIZE as u64)).map_err(io_error)?;
        file.write_all(&mdat_header).map_err(io_error)?;
        let file = file.into_inner().map_err(|e| io_error(e.into_error()))?;
        file.sync_all().map_err(io_error)?;
        drop(file);

        // Nothing appears at the output path unless the checksum is in hand.
        let checksum = sha256_file(&self.part_path)?;
        fs::rename(&self.part_path, &self.final_path).map_err(io_error)?;

        Ok(FinalizedFile {
            path: self.final_path.clone(),
            checksum,
            units_written: self.units_written(),
            bytes_written: self.payload_bytes,
        })
    }
}

impl ContainerWriter for M4aWriter {
    fn add_track(&mut self, format: &OutputFormat) -> Result<TrackHandle, WriteError> {
        if self.finalized {
            return Err(WriteError::Finalized);
        }
        if self.format.is_some() {
            return Err(WriteError::TrackNotReady);
        }
        log::debug!(
            "registering audio track: {} Hz, {} ch, {} bps",
            format.sample_rate,
            format.channel_count,
            format.bitrate_bps
        );
        self.format = Some(format.clone());
        Ok(TrackHandle(TRACK_ID))
    }

    fn write_unit(&mut self, track: TrackHandle, unit: &EncodedUnit) -> Result<(), WriteError> {
        if self.finalized {
            return Err(WriteError::Finalized);
        }
        if self.format.is_none() || track != TrackHandle(TRACK_ID) {
            return Err(WriteError::TrackNotReady);
        }
        if unit.data.is_empty() {
            return Ok(());
        }
        self.write_raw(&unit.data)?;
        self.payload_bytes += unit.data.len() as u64;
        self.table.sizes.push(unit.data.len() as u32);
        self.timestamps_us.push(unit.timestamp_us);
        Ok(())
    }

    fn finalize(&mut self) -> Result<Option<FinalizedFile>, WriteError> {
        if self.finalized {
            return Ok(None);
        }
        self.finalized = true;

        let Some(format) = self.format.clone() else {
            log::debug!("no track registered, removing {}", self.part_path.display());
            self.discard();
            return Ok(None);
        };

        let finished = self.finish_file(&format)?;
        self.completed = true;
        Ok(Some(finished))
    }

    fn discard(&mut self) {
        if self.completed {
            return;
        }
        self.finalized = true;
        self.file = None;
        match fs::remove_file(&self.part_path) {
            Ok(()) => log::debug!("removed partial output {}", self.part_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to remove partial output {}: {}", self.part_path.display(), e),
        }
    }
}

/// Per-unit durations in media timescale units, from consecutive timestamps.
/// The last unit is assumed to span a full frame.
fn unit_durations(timestamps_us: &[u64], format: &OutputFormat) -> Vec<u32> {
    let rate = format.sample_rate as u128;
    let starts: Vec<u64> = timestamps_us
        .iter()
        .map(|&ts| ((ts as u128 * rate + 500_000) / 1_000_000) as u64)
        .collect();
    let mut durations: Vec<u32> = starts
        .windows(2)
        .map(|pair| pair[1].saturating_sub(pair[0]) as u32)
        .collect();
    if !starts.is_empty() {
        durations.push(format.frames_per_unit);
    }
    durations
}

fn part_path_for(path: &Path) -> Result<PathBuf, WriteError> {
    let name = path
        .file_name()
        .ok_or_else(|| WriteError::CannotCreate(format!("not a file path: {}", path.display())))?;
    let mut part_name = name.to_os_string();
    part_name.push(".part");
    Ok(path.with_file_name(part_name))
}

fn io_error(e: io::Error) -> WriteError {
    WriteError::Io(e.to_string())
}

/// Compute SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> Result<String, WriteError> {
    let mut file = File::open(path)
        .map_err(|e| WriteError::Io(format!("failed to read file for checksum: {}", e)))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(io_error)?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
