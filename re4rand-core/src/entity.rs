//! Boundary to the external entity store.
//!
//! The randomiser never touches the game's binary formats. It reads
//! placements as path-addressable field maps and hands back an ordered list
//! of [`Decision`]s which a store materialises once the whole run resolved.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::catalog::{ClassKey, ItemId};
use crate::rng::RandomStream;
use crate::{RandomiserError, Result};

/// Stable 128-bit entity identifier, serialised as 32 hex digits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Guid(pub u128);

impl Guid {
    pub fn random(rng: &mut RandomStream) -> Self {
        let hi = rng.next_u64() as u128;
        let lo = rng.next_u64() as u128;
        Guid((hi << 64) | lo)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl TryFrom<String> for Guid {
    type Error = String;

    fn try_from(text: String) -> std::result::Result<Self, Self::Error> {
        let digits: String = text.chars().filter(|c| *c != '-').collect();
        if digits.is_empty() || digits.len() > 32 {
            return Err(format!("invalid guid {text:?}"));
        }
        u128::from_str_radix(&digits, 16)
            .map(Guid)
            .map_err(|_| format!("invalid guid {text:?}"))
    }
}

impl From<Guid> for String {
    fn from(guid: Guid) -> Self {
        guid.to_string()
    }
}

/// Tagged field value as exposed by the entity store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Guid(Guid),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Typed field access on an opaque entity.
pub trait EntityView {
    /// Missing paths read as [`Value::Null`].
    fn get_field(&self, path: &str) -> Value;
    fn set_field(&mut self, path: &str, value: Value);
}

/// One enemy spawn as the store reports it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpawnRecord {
    pub guid: Guid,
    pub context_id: u32,
    pub class_key: ClassKey,
    pub stage_id: u32,
    #[serde(default)]
    pub static_trigger: bool,
    #[serde(default)]
    pub boss: bool,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl EntityView for SpawnRecord {
    fn get_field(&self, path: &str) -> Value {
        self.fields.get(path).cloned().unwrap_or_default()
    }

    fn set_field(&mut self, path: &str, value: Value) {
        self.fields.insert(path.to_string(), value);
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AreaRecord {
    pub name: String,
    pub chapter: u32,
    #[serde(default)]
    pub spawns: Vec<SpawnRecord>,
}

/// A single resolved outcome. The list of decisions is final before any of
/// them is applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Decision {
    /// Copy the source entity under a new identity and context index.
    Duplicate {
        source: Guid,
        new_entity: Guid,
        context_id: u32,
    },
    /// Replace an entity with one of another class under a new identity.
    Convert {
        entity: Guid,
        new_entity: Guid,
        class: ClassKey,
    },
    SetField {
        entity: Guid,
        path: String,
        value: Value,
    },
    SetItemField {
        item: ItemId,
        path: String,
        value: Value,
    },
}

pub trait EntityStore {
    fn areas(&self) -> &[AreaRecord];
    fn apply(&mut self, decision: &Decision) -> Result<()>;
}

/// In-memory store backed by a JSON dump of areas and item records.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    pub areas: Vec<AreaRecord>,
    #[serde(default)]
    pub items: BTreeMap<ItemId, BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new(areas: Vec<AreaRecord>) -> Self {
        Self {
            areas,
            items: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    fn locate(&self, guid: Guid) -> Result<(usize, usize)> {
        for (area_idx, area) in self.areas.iter().enumerate() {
            if let Some(spawn_idx) = area.spawns.iter().position(|s| s.guid == guid) {
                return Ok((area_idx, spawn_idx));
            }
        }
        Err(RandomiserError::UnknownEntity(guid))
    }

    pub fn spawn(&self, guid: Guid) -> Option<&SpawnRecord> {
        let (a, s) = self.locate(guid).ok()?;
        Some(&self.areas[a].spawns[s])
    }
}

impl EntityStore for MemoryStore {
    fn areas(&self) -> &[AreaRecord] {
        &self.areas
    }

    fn apply(&mut self, decision: &Decision) -> Result<()> {
        match decision {
            Decision::Duplicate {
                source,
                new_entity,
                context_id,
            } => {
                let (a, s) = self.locate(*source)?;
                let mut copy = self.areas[a].spawns[s].clone();
                copy.guid = *new_entity;
                copy.context_id = *context_id;
                self.areas[a].spawns.push(copy);
            }
            Decision::Convert {
                entity,
                new_entity,
                class,
            } => {
                let (a, s) = self.locate(*entity)?;
                let spawn = &mut self.areas[a].spawns[s];
                spawn.guid = *new_entity;
                spawn.class_key = class.clone();
            }
            Decision::SetField {
                entity,
                path,
                value,
            } => {
                let (a, s) = self.locate(*entity)?;
                self.areas[a].spawns[s].set_field(path, value.clone());
            }
            Decision::SetItemField { item, path, value } => {
                self.items
                    .entry(*item)
                    .or_default()
                    .insert(path.clone(), value.clone());
            }
        }
        Ok(())
    }
}
