//! Paired index/catalog files.
//!
//! Layout inside the data directory:
//! - index file: `RCLV` magic, format version (u32), dimension (u32),
//!   slot count (u64), then `slot count * dimension` little-endian f32.
//! - catalog file: JSON with the chunk rows, the document index, the slot
//!   count, and the SHA-256 of the index file bytes.
//!
//! Both are written to `.tmp` siblings, synced, then renamed index first.
//! A crash between the two renames leaves a catalog whose checksum no longer
//! matches the index, which `load` reports as `RecallError::Corrupt`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use recall_core::error::{RecallError, Result};
use recall_core::persistence::CatalogPersistence;
use recall_core::types::{Chunk, SnapshotRef, StoreSnapshot};

use crate::codec::{get_f32s, put_f32s};

const MAGIC: &[u8; 4] = b"RCLV";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

#[derive(Serialize)]
struct CatalogFileRef<'a> {
    version: u32,
    dimension: usize,
    slot_count: usize,
    index_sha256: String,
    chunks: &'a [Chunk],
    documents: &'a BTreeMap<String, Vec<usize>>,
}

#[derive(Deserialize)]
struct CatalogFile {
    version: u32,
    dimension: usize,
    slot_count: usize,
    index_sha256: String,
    chunks: Vec<Chunk>,
    documents: BTreeMap<String, Vec<usize>>,
}

/// Index and catalog stored as two co-located files.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    index_path: PathBuf,
    catalog_path: PathBuf,
}

impl FilePersistence {
    pub fn new(index_path: impl Into<PathBuf>, catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            catalog_path: catalog_path.into(),
        }
    }

    /// Both files inside `dir`.
    pub fn in_dir(dir: &Path, index_file: &str, catalog_file: &str) -> Self {
        Self::new(dir.join(index_file), dir.join(catalog_file))
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }
}

fn encode_index(dimension: usize, slot_count: usize, vectors: &[f32]) -> Result<Vec<u8>> {
    let dim = u32::try_from(dimension)
        .map_err(|_| RecallError::Storage(format!("dimension {} too large", dimension)))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + vectors.len() * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&dim.to_le_bytes());
    bytes.extend_from_slice(&(slot_count as u64).to_le_bytes());
    put_f32s(&mut bytes, vectors);
    Ok(bytes)
}

fn decode_index(bytes: &[u8]) -> Result<(usize, usize, Vec<f32>)> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(RecallError::Corrupt("index file header is invalid".to_string()));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(RecallError::Corrupt(format!(
            "unsupported index format version {}",
            version
        )));
    }
    let dimension = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut count = [0u8; 8];
    count.copy_from_slice(&bytes[12..20]);
    let slot_count = u64::from_le_bytes(count) as usize;

    let vectors = get_f32s(&bytes[HEADER_LEN..])?;
    if vectors.len() != slot_count.saturating_mul(dimension) {
        return Err(RecallError::Corrupt(format!(
            "index header claims {} slots of dimension {} but holds {} floats",
            slot_count,
            dimension,
            vectors.len()
        )));
    }
    Ok((dimension, slot_count, vectors))
}

fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

impl CatalogPersistence for FilePersistence {
    fn load(&self) -> Result<Option<StoreSnapshot>> {
        let index_exists = self.index_path.exists();
        let catalog_exists = self.catalog_path.exists();
        match (index_exists, catalog_exists) {
            (false, false) => return Ok(None),
            (true, false) => {
                return Err(RecallError::Corrupt(format!(
                    "index file {} has no catalog file",
                    self.index_path.display()
                )))
            }
            (false, true) => {
                return Err(RecallError::Corrupt(format!(
                    "catalog file {} has no index file",
                    self.catalog_path.display()
                )))
            }
            (true, true) => {}
        }

        let index_bytes = fs::read(&self.index_path)?;
        let catalog: CatalogFile = serde_json::from_slice(&fs::read(&self.catalog_path)?)?;

        if catalog.version != FORMAT_VERSION {
            return Err(RecallError::Corrupt(format!(
                "unsupported catalog format version {}",
                catalog.version
            )));
        }
        if checksum(&index_bytes) != catalog.index_sha256 {
            return Err(RecallError::Corrupt(
                "index file checksum does not match catalog".to_string(),
            ));
        }

        let (dimension, slot_count, vectors) = decode_index(&index_bytes)?;
        if dimension != catalog.dimension || slot_count != catalog.slot_count {
            return Err(RecallError::Corrupt(format!(
                "index holds {} x {} but catalog records {} x {}",
                slot_count, dimension, catalog.slot_count, catalog.dimension
            )));
        }

        let snapshot = StoreSnapshot {
            dimension,
            vectors,
            chunks: catalog.chunks,
            documents: catalog.documents,
        };
        snapshot.verify()?;
        info!(
            slots = slot_count,
            dimension,
            index = %self.index_path.display(),
            "Loaded snapshot from files"
        );
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: SnapshotRef<'_>) -> Result<()> {
        snapshot.verify()?;
        for parent in [self.index_path.parent(), self.catalog_path.parent()]
            .into_iter()
            .flatten()
        {
            fs::create_dir_all(parent)?;
        }

        let index_bytes = encode_index(snapshot.dimension, snapshot.slot_count(), snapshot.vectors)?;
        let catalog = CatalogFileRef {
            version: FORMAT_VERSION,
            dimension: snapshot.dimension,
            slot_count: snapshot.slot_count(),
            index_sha256: checksum(&index_bytes),
            chunks: snapshot.chunks,
            documents: snapshot.documents,
        };
        let catalog_bytes = serde_json::to_vec(&catalog)?;

        let index_tmp = tmp_path(&self.index_path);
        let catalog_tmp = tmp_path(&self.catalog_path);
        write_synced(&index_tmp, &index_bytes)?;
        write_synced(&catalog_tmp, &catalog_bytes)?;
        fs::rename(&index_tmp, &self.index_path)?;
        fs::rename(&catalog_tmp, &self.catalog_path)?;

        debug!(
            slots = snapshot.slot_count(),
            index_bytes = index_bytes.len(),
            catalog_bytes = catalog_bytes.len(),
            "Snapshot written"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "{} + {}",
            self.index_path.display(),
            self.catalog_path.display()
        )
    }
}
