//! Dual-file checkpoints of the whole agent.
//!
//! Every save writes the same image twice: first to the primary path, then,
//! as a separate write, to `<primary>.bak`. A crash during the second write
//! leaves the primary intact; a crash during the first leaves the previous
//! cycle's backup intact. Restore reads the primary and falls back to the
//! backup when the primary cannot be loaded.
//!
//! Image layout (little endian):
//! - magic `STRATA01`, `u32` version
//! - chunks of `[tag; 4]`, `u32` length, payload:
//!   - `META`: name, timestep, sensor/action counts, satisfaction, level count
//!   - `ACTS`: full action vector
//!   - `PRNG`: brain PRNG state
//!   - `AFCT`: affect tracker payload (LZ4)
//!   - `LEVL`: one per level, bottom first (LZ4)
//!
//! Unknown chunks are skipped.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::affect::AffectTracker;
use crate::hierarchy::level_chain_is_consistent;
use crate::level::LevelEngine;
use crate::storage::{self, ImagePayload};

const TAG_META: [u8; 4] = *b"META";
const TAG_ACTIONS: [u8; 4] = *b"ACTS";
const TAG_PRNG: [u8; 4] = *b"PRNG";
const TAG_AFFECT: [u8; 4] = *b"AFCT";
const TAG_LEVEL: [u8; 4] = *b"LEVL";

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a checkpoint (bad magic)")]
    BadMagic,

    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),

    #[error("missing {0} chunk")]
    MissingChunk(&'static str),

    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),
}

impl CheckpointError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CheckpointError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

/// Borrowed view of everything a checkpoint holds.
pub struct CheckpointView<'a, L, A> {
    pub name: &'a str,
    pub timestep: u64,
    pub num_sensors: usize,
    // Internal count, reserved action included.
    pub num_actions: usize,
    pub satisfaction: f32,
    pub actions: &'a [f32],
    pub rng_state: u64,
    pub affect: &'a A,
    pub levels: &'a [L],
}

/// Owned state read back from a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredState<L, A> {
    pub name: String,
    pub timestep: u64,
    pub num_sensors: usize,
    pub num_actions: usize,
    pub satisfaction: f32,
    pub actions: Vec<f32>,
    pub rng_state: u64,
    pub affect: A,
    pub levels: Vec<L>,
}

impl<'a, L: LevelEngine, A: AffectTracker> CheckpointView<'a, L, A> {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), CheckpointError> {
        w.write_all(storage::MAGIC)?;
        storage::write_u32_le(w, storage::VERSION_CURRENT)?;

        let mut meta = Vec::new();
        storage::write_string(&mut meta, self.name)?;
        storage::write_u64_le(&mut meta, self.timestep)?;
        storage::write_len(&mut meta, self.num_sensors)?;
        storage::write_len(&mut meta, self.num_actions)?;
        storage::write_f32_le(&mut meta, self.satisfaction)?;
        storage::write_len(&mut meta, self.levels.len())?;
        storage::write_chunk(w, TAG_META, &meta)?;

        let mut actions = Vec::with_capacity(4 + 4 * self.actions.len());
        storage::write_f32_slice(&mut actions, self.actions)?;
        storage::write_chunk(w, TAG_ACTIONS, &actions)?;

        storage::write_chunk(w, TAG_PRNG, &self.rng_state.to_le_bytes())?;

        storage::write_chunk_lz4(w, TAG_AFFECT, &storage::payload_bytes(self.affect)?)?;
        for level in self.levels {
            storage::write_chunk_lz4(w, TAG_LEVEL, &storage::payload_bytes(level)?)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Exact size of one checkpoint file for this state.
    pub fn encoded_len(&self) -> Result<usize, CheckpointError> {
        let mut cw = storage::CountingWriter::new();
        self.write_to(&mut cw)?;
        Ok(cw.written())
    }
}

struct Meta {
    name: String,
    timestep: u64,
    num_sensors: usize,
    num_actions: usize,
    satisfaction: f32,
    level_count: usize,
}

fn read_meta<R: Read>(r: &mut R) -> io::Result<Meta> {
    Ok(Meta {
        name: storage::read_string(r)?,
        timestep: storage::read_u64_le(r)?,
        num_sensors: storage::read_len(r)?,
        num_actions: storage::read_len(r)?,
        satisfaction: storage::read_f32_le(r)?,
        level_count: storage::read_len(r)?,
    })
}

fn corrupt(msg: impl Into<String>) -> CheckpointError {
    CheckpointError::Corrupt(msg.into())
}

/// Decode one checkpoint image.
pub fn read_checkpoint<R, L, A>(r: &mut R) -> Result<RestoredState<L, A>, CheckpointError>
where
    R: Read,
    L: LevelEngine,
    A: AffectTracker,
{
    let magic = storage::read_exact::<8, _>(r).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CheckpointError::BadMagic,
        _ => CheckpointError::Io(e),
    })?;
    if &magic != storage::MAGIC {
        return Err(CheckpointError::BadMagic);
    }
    let version = storage::read_u32_le(r)?;
    if version != storage::VERSION_CURRENT {
        return Err(CheckpointError::UnsupportedVersion(version));
    }

    let mut meta: Option<Meta> = None;
    let mut actions: Option<Vec<f32>> = None;
    let mut rng_state: Option<u64> = None;
    let mut affect: Option<A> = None;
    let mut levels: Vec<L> = Vec::new();

    loop {
        let (tag, len) = match storage::read_chunk_header(r) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        match tag {
            TAG_AFFECT => {
                let body = storage::read_chunk_lz4_body(r, len)?;
                affect = Some(storage::payload_from_bytes(&body)?);
                continue;
            }
            TAG_LEVEL => {
                let body = storage::read_chunk_lz4_body(r, len)?;
                levels.push(storage::payload_from_bytes(&body)?);
                continue;
            }
            _ => {}
        }

        let mut take = r.take(len as u64);
        match tag {
            TAG_META => meta = Some(read_meta(&mut take)?),
            TAG_ACTIONS => actions = Some(storage::read_f32_vec(&mut take)?),
            TAG_PRNG => rng_state = Some(storage::read_u64_le(&mut take)?),
            _ => {
                // Unknown chunk: skip.
            }
        }
        io::copy(&mut take, &mut io::sink())?;
        if take.limit() != 0 {
            return Err(corrupt(format!(
                "truncated {} chunk",
                String::from_utf8_lossy(&tag)
            )));
        }
    }

    let meta = meta.ok_or(CheckpointError::MissingChunk("META"))?;
    let actions = actions.ok_or(CheckpointError::MissingChunk("ACTS"))?;
    let rng_state = rng_state.ok_or(CheckpointError::MissingChunk("PRNG"))?;
    let affect = affect.ok_or(CheckpointError::MissingChunk("AFCT"))?;

    if levels.len() != meta.level_count {
        return Err(corrupt(format!(
            "expected {} levels, found {}",
            meta.level_count,
            levels.len()
        )));
    }
    if actions.len() != meta.num_actions {
        return Err(corrupt(format!(
            "action vector has {} entries, expected {}",
            actions.len(),
            meta.num_actions
        )));
    }

    Ok(RestoredState {
        name: meta.name,
        timestep: meta.timestep,
        num_sensors: meta.num_sensors,
        num_actions: meta.num_actions,
        satisfaction: meta.satisfaction,
        actions,
        rng_state,
        affect,
        levels,
    })
}

/// Owns the checkpoint locations and the save/restore protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointManager {
    path: PathBuf,
    backup_path: PathBuf,
}

impl CheckpointManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut backup = path.clone().into_os_string();
        backup.push(".bak");
        Self {
            path,
            backup_path: PathBuf::from(backup),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Write the primary copy, then the backup copy.
    ///
    /// Returns `false` (after logging) on any encoding or I/O failure. The
    /// backup is not touched when the primary write fails.
    pub fn save<L: LevelEngine, A: AffectTracker>(&self, state: &CheckpointView<'_, L, A>) -> bool {
        let bytes = match state.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                error!(
                    "failed to encode checkpoint for {} at timestep {}: {e}",
                    state.name, state.timestep
                );
                return false;
            }
        };

        for target in [&self.path, &self.backup_path] {
            if let Err(e) = write_file(target, &bytes) {
                error!(
                    "failed to write checkpoint {:?} at timestep {}: {e} (errno: {})",
                    target,
                    state.timestep,
                    e.raw_os_error().unwrap_or(-1)
                );
                return false;
            }
            debug!("wrote {} bytes to {:?}", bytes.len(), target);
        }

        info!(
            "checkpoint saved at timestep {} ({:?})",
            state.timestep, self.path
        );
        true
    }

    /// Load the newest usable checkpoint if it fits the live shape.
    ///
    /// `None` means "keep the fresh state": nothing loadable, or the
    /// checkpoint was trained for a different sensor/action count.
    pub fn restore<L: LevelEngine, A: AffectTracker>(
        &self,
        expected_num_sensors: usize,
        expected_num_actions: usize,
    ) -> Option<RestoredState<L, A>> {
        let state = match Self::load_from::<L, A>(&self.path) {
            Ok(state) => state,
            Err(primary) => {
                if primary.is_not_found() {
                    debug!("no checkpoint at {:?}", self.path);
                } else {
                    warn!("could not load checkpoint {:?}: {primary}", self.path);
                }
                match Self::load_from::<L, A>(&self.backup_path) {
                    Ok(state) => {
                        warn!("restoring from backup copy {:?}", self.backup_path);
                        state
                    }
                    Err(backup) if primary.is_not_found() && backup.is_not_found() => {
                        info!("no checkpoint found at {:?}; starting fresh", self.path);
                        return None;
                    }
                    Err(backup) => {
                        warn!(
                            "could not load backup checkpoint {:?}: {backup}; starting fresh",
                            self.backup_path
                        );
                        return None;
                    }
                }
            }
        };

        if state.num_sensors != expected_num_sensors || state.num_actions != expected_num_actions {
            warn!(
                "checkpoint {:?} has {} sensors and {} actions, but the world has {} and {}; \
                 creating a new brain from scratch",
                self.path,
                state.num_sensors,
                state.num_actions,
                expected_num_sensors,
                expected_num_actions
            );
            return None;
        }
        if !level_chain_is_consistent(&state.levels, state.num_sensors, state.num_actions) {
            warn!(
                "checkpoint {:?} has inconsistent level widths; creating a new brain from scratch",
                self.path
            );
            return None;
        }

        Some(state)
    }

    /// Decode a single checkpoint file without any fallback or shape check.
    pub fn load_from<L: LevelEngine, A: AffectTracker>(
        path: &Path,
    ) -> Result<RestoredState<L, A>, CheckpointError> {
        let file = File::open(path)?;
        let mut reader = io::BufReader::new(file);
        read_checkpoint(&mut reader)
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()
}
