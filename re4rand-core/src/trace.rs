use flate2::{write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::catalog::{ClassKey, ItemId};
use crate::entity::{Guid, Value};
use crate::pool::PlacementId;
use crate::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassSource {
    Drawn,
    Pack,
    MiniBossGroup,
    Unassigned,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropSource {
    Special,
    Valuable,
    Treasure,
    General,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum TraceRecord {
    Pool {
        placement: PlacementId,
        entity: Guid,
        pool: Vec<ClassKey>,
        preferred: Vec<ClassKey>,
        restriction: Option<usize>,
    },
    Duplicate {
        stage: u32,
        source: PlacementId,
        placement: PlacementId,
        entity: Guid,
        context_id: u32,
        target: usize,
        cap: usize,
    },
    Class {
        placement: PlacementId,
        class: Option<ClassKey>,
        source: ClassSource,
        candidates: Vec<(ClassKey, f64)>,
    },
    Loadout {
        placement: PlacementId,
        entity: Guid,
        field: String,
        value: Value,
    },
    Health {
        placement: PlacementId,
        entity: Guid,
        health: i64,
        min: i64,
        max: i64,
        window: (f64, f64),
    },
    Drop {
        placement: PlacementId,
        entity: Guid,
        item: Option<ItemId>,
        count: i64,
        source: DropSource,
        tier: i32,
    },
    WeaponStat {
        item: ItemId,
        path: String,
        before: Value,
        after: Value,
    },
    ShopUnlock {
        item: ItemId,
        chapter: u32,
    },
    Note {
        message: String,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditTrace {
    pub seed: u64,
    pub records: Vec<TraceRecord>,
}

impl AuditTrace {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: TraceRecord) {
        self.records.push(record);
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.records.push(TraceRecord::Note {
            message: message.into(),
        });
    }

    /// SHA-256 of the serialised trace, hex encoded.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&bytes);
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn write(&self, path: &Path, compress: bool) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        if compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&json)?;
            fs::write(path, encoder.finish()?)?;
        } else {
            fs::write(path, json)?;
        }
        Ok(())
    }
}
