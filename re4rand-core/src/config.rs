use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::catalog::{ClassKey, ItemId};
use crate::drops::DropKind;
use crate::{RandomiserError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Range<T> {
    pub min: T,
    pub max: T,
}

/// User-tunable run configuration. Every key has a default, so `{}` is a
/// valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomizerConfig {
    pub seed: u64,

    pub randomize_enemies: bool,
    pub randomize_health: bool,
    pub randomize_drops: bool,
    pub randomize_weapon_stats: bool,
    pub randomize_shop: bool,

    pub class_weights: BTreeMap<ClassKey, f64>,
    pub variety_cap: usize,
    pub enemy_multiplier: f64,
    pub max_per_stage: usize,
    pub stage_caps: BTreeMap<u32, usize>,
    pub max_pack_size: u32,
    pub strong_mini_bosses: bool,
    pub parasite_chance: f64,
    pub parasite_kinds: Vec<String>,

    pub progressive_difficulty: bool,
    pub class_health: BTreeMap<ClassKey, Range<i32>>,
    pub boss_health: Range<i32>,

    pub drop_weights: BTreeMap<DropKind, f64>,
    pub valuables_per_chapter: usize,
    pub treasure_ratio: f64,
    pub special_drops: BTreeMap<ClassKey, ItemId>,
    pub money_range: Range<i64>,

    pub weapon_stat_variance: f64,
    pub weapon_price_variance: f64,
    pub shop_weapons_per_chapter: usize,
    /// Zero means "derive from the highest chapter in the entity dump".
    pub chapter_count: u32,
}

impl Default for RandomizerConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            randomize_enemies: true,
            randomize_health: true,
            randomize_drops: true,
            randomize_weapon_stats: false,
            randomize_shop: false,
            class_weights: BTreeMap::new(),
            variety_cap: 4,
            enemy_multiplier: 1.0,
            max_per_stage: 25,
            stage_caps: BTreeMap::new(),
            max_pack_size: 3,
            strong_mini_bosses: false,
            parasite_chance: 0.0,
            parasite_kinds: Vec::new(),
            progressive_difficulty: true,
            class_health: BTreeMap::new(),
            boss_health: Range {
                min: 10_000,
                max: 30_000,
            },
            drop_weights: [
                (DropKind::None, 4.0),
                (DropKind::Ammo, 3.0),
                (DropKind::Money, 2.0),
                (DropKind::Health, 1.0),
            ]
            .into_iter()
            .collect(),
            valuables_per_chapter: 2,
            treasure_ratio: 0.1,
            special_drops: BTreeMap::new(),
            money_range: Range { min: 100, max: 1000 },
            weapon_stat_variance: 0.25,
            weapon_price_variance: 0.2,
            shop_weapons_per_chapter: 1,
            chapter_count: 0,
        }
    }
}

fn config_err(key: &str, reason: impl std::fmt::Display) -> RandomiserError {
    RandomiserError::Config(format!("{key}: {reason}"))
}

fn check_weight(key: String, weight: f64) -> Result<()> {
    if !weight.is_finite() || weight < 0.0 {
        let reason = format!("weight must be a non-negative number, got {weight}");
        return Err(config_err(&key, reason));
    }
    Ok(())
}

fn check_fraction(key: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(config_err(key, format!("must lie in [0, 1], got {value}")));
    }
    Ok(())
}

impl RandomizerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: RandomizerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (class, weight) in &self.class_weights {
            check_weight(format!("class_weights.{class}"), *weight)?;
        }
        for (kind, weight) in &self.drop_weights {
            check_weight(format!("drop_weights.{kind:?}"), *weight)?;
        }
        if self.variety_cap == 0 {
            return Err(config_err("variety_cap", "must be at least 1"));
        }
        if !self.enemy_multiplier.is_finite() || self.enemy_multiplier <= 0.0 {
            return Err(config_err("enemy_multiplier", "must be positive"));
        }
        if self.max_per_stage == 0 {
            return Err(config_err("max_per_stage", "must be at least 1"));
        }
        if self.max_pack_size == 0 {
            return Err(config_err("max_pack_size", "must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.parasite_chance) {
            return Err(config_err("parasite_chance", "must be a percentage"));
        }
        for (class, range) in &self.class_health {
            if range.min <= 0 || range.min > range.max {
                return Err(config_err(&format!("class_health.{class}"), "invalid range"));
            }
        }
        if self.boss_health.min <= 0 || self.boss_health.min > self.boss_health.max {
            return Err(config_err("boss_health", "invalid range"));
        }
        if self.money_range.min < 0 || self.money_range.min > self.money_range.max {
            return Err(config_err("money_range", "invalid range"));
        }
        check_fraction("treasure_ratio", self.treasure_ratio)?;
        check_fraction("weapon_stat_variance", self.weapon_stat_variance)?;
        check_fraction("weapon_price_variance", self.weapon_price_variance)?;
        Ok(())
    }
}
