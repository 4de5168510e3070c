use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::economy::{WeaponClass, WeaponModifier};
use crate::entity::Value;
use crate::pool::AreaRestriction;
use crate::{RandomiserError, Result};

pub type ClassKey = String;
pub type ItemId = u32;

fn one() -> f64 {
    1.0
}

fn one_u32() -> u32 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeaponChoice {
    #[serde(default)]
    pub primary: Option<i64>,
    #[serde(default)]
    pub secondary: Option<i64>,
    #[serde(default = "one")]
    pub weight: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeightedValue {
    pub value: Value,
    #[serde(default = "one")]
    pub weight: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDistribution {
    pub field: String,
    pub values: Vec<WeightedValue>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnemyClassDefinition {
    pub key: ClassKey,
    pub display_name: String,
    /// Lower is rarer and tougher; drives loot priority.
    pub tier: i32,
    pub min_health: i32,
    pub max_health: i32,
    #[serde(default)]
    pub ranged: bool,
    #[serde(default)]
    pub plaga_eligible: bool,
    /// Stationary ambush types that only work behind a static trigger.
    #[serde(default)]
    pub requires_static_spawn: bool,
    #[serde(default)]
    pub weapon_choices: Vec<WeaponChoice>,
    #[serde(default = "one_u32")]
    pub max_pack_size: u32,
    #[serde(default)]
    pub field_distributions: Vec<FieldDistribution>,
}

/// Weapons carried by enemies (not player items).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnemyWeaponDefinition {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub ranged: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Weapon,
    Attachment,
    CaseUpgrade,
    Charm,
    Ammo,
    Money,
    Health,
    Grenade,
    Resource,
    Treasure,
    Recipe,
    Key,
}

impl ItemKind {
    /// Unique rewards that may be granted at most once per run.
    pub fn is_tracked(self) -> bool {
        matches!(
            self,
            ItemKind::Weapon | ItemKind::Attachment | ItemKind::CaseUpgrade | ItemKind::Charm
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub id: ItemId,
    pub name: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub value: u32,
    #[serde(default = "one_u32")]
    pub max_stack: u32,
    /// First chapter in which the item may be handed out.
    #[serde(default = "one_u32")]
    pub available_from: u32,
    /// Recipes and base items the player always owns.
    #[serde(default)]
    pub always_known: bool,
}

impl ItemDefinition {
    pub fn stackable(&self) -> bool {
        self.max_stack > 1
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeaponDefinition {
    pub id: ItemId,
    pub name: String,
    pub class: WeaponClass,
    pub price: u32,
    #[serde(default)]
    pub modifiers: Vec<WeaponModifier>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShopDefinition {
    /// Weapons the merchant always sells from the start.
    #[serde(default)]
    pub base_stock: Vec<ItemId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogFile {
    enemies: Vec<EnemyClassDefinition>,
    enemy_weapons: Vec<EnemyWeaponDefinition>,
    items: Vec<ItemDefinition>,
    weapons: Vec<WeaponDefinition>,
    shop: Option<ShopDefinition>,
    restrictions: BTreeMap<String, Vec<AreaRestriction>>,
}

#[derive(Clone, Debug, Default)]
pub struct Catalogs {
    enemies: BTreeMap<ClassKey, EnemyClassDefinition>,
    enemy_weapons: BTreeMap<i64, EnemyWeaponDefinition>,
    items: BTreeMap<ItemId, ItemDefinition>,
    weapons: BTreeMap<ItemId, WeaponDefinition>,
    shop: ShopDefinition,
    restrictions: BTreeMap<String, Vec<AreaRestriction>>,
}

fn catalog_err(entry: impl Into<String>, reason: impl Into<String>) -> RandomiserError {
    RandomiserError::Catalog {
        entry: entry.into(),
        reason: reason.into(),
    }
}

impl Catalogs {
    /// Loads and merges every `*.json` file below `dir`, in path order.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|e| {
                RandomiserError::Config(format!("cannot walk catalog directory: {e}"))
            })?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().and_then(|e| e.to_str()) == Some("json")
            {
                paths.push(path.to_path_buf());
            }
        }
        paths.sort();

        let mut catalogs = Catalogs::default();
        for path in &paths {
            let text = fs::read_to_string(path)?;
            let file: CatalogFile = serde_json::from_str(&text).map_err(|e| {
                catalog_err(path.display().to_string(), format!("invalid JSON: {e}"))
            })?;
            debug!(path = %path.display(), "loaded catalog file");
            catalogs.merge(file)?;
        }
        catalogs.validate()?;
        Ok(catalogs)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(text)?;
        let mut catalogs = Catalogs::default();
        catalogs.merge(file)?;
        catalogs.validate()?;
        Ok(catalogs)
    }

    fn merge(&mut self, file: CatalogFile) -> Result<()> {
        for enemy in file.enemies {
            let key = enemy.key.clone();
            if self.enemies.insert(key.clone(), enemy).is_some() {
                return Err(catalog_err(key, "duplicate enemy class"));
            }
        }
        for weapon in file.enemy_weapons {
            let id = weapon.id;
            if self.enemy_weapons.insert(id, weapon).is_some() {
                return Err(catalog_err(format!("enemy weapon {id}"), "duplicate id"));
            }
        }
        for item in file.items {
            let id = item.id;
            if self.items.insert(id, item).is_some() {
                return Err(catalog_err(format!("item {id}"), "duplicate id"));
            }
        }
        for weapon in file.weapons {
            let id = weapon.id;
            if self.weapons.insert(id, weapon).is_some() {
                return Err(catalog_err(format!("weapon {id}"), "duplicate id"));
            }
        }
        if let Some(shop) = file.shop {
            self.shop.base_stock.extend(shop.base_stock);
        }
        for (area, blocks) in file.restrictions {
            self.restrictions.entry(area).or_default().extend(blocks);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for enemy in self.enemies.values() {
            if enemy.min_health <= 0 || enemy.min_health > enemy.max_health {
                return Err(catalog_err(
                    &enemy.key,
                    format!(
                        "invalid health range {}..{}",
                        enemy.min_health, enemy.max_health
                    ),
                ));
            }
            if enemy.max_pack_size == 0 {
                return Err(catalog_err(&enemy.key, "max_pack_size must be at least 1"));
            }
            for choice in &enemy.weapon_choices {
                if !choice.weight.is_finite() || choice.weight < 0.0 {
                    return Err(catalog_err(&enemy.key, "negative weapon choice weight"));
                }
                for id in [choice.primary, choice.secondary].into_iter().flatten() {
                    if !self.enemy_weapons.contains_key(&id) {
                        return Err(catalog_err(&enemy.key, format!("unknown enemy weapon {id}")));
                    }
                }
            }
            for dist in &enemy.field_distributions {
                if dist.values.iter().any(|v| !v.weight.is_finite() || v.weight < 0.0) {
                    return Err(catalog_err(
                        &enemy.key,
                        format!("negative weight in distribution for {}", dist.field),
                    ));
                }
            }
        }

        for weapon in self.weapons.values() {
            match self.items.get(&weapon.id) {
                Some(item) if item.kind == ItemKind::Weapon => {}
                _ => {
                    return Err(catalog_err(
                        &weapon.name,
                        format!("weapon {} has no matching weapon item", weapon.id),
                    ))
                }
            }
        }

        for id in &self.shop.base_stock {
            if !self.weapons.contains_key(id) {
                return Err(catalog_err("shop", format!("base stock lists unknown weapon {id}")));
            }
        }

        for (area, blocks) in &self.restrictions {
            for block in blocks {
                let listed = block.include.iter().chain(block.exclude.iter()).flatten();
                for key in listed {
                    if !self.enemies.contains_key(key) {
                        return Err(catalog_err(
                            format!("restrictions.{area}"),
                            format!("unknown enemy class {key}"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn enemy(&self, key: &str) -> Option<&EnemyClassDefinition> {
        self.enemies.get(key)
    }

    pub fn enemies(&self) -> impl Iterator<Item = &EnemyClassDefinition> {
        self.enemies.values()
    }

    pub fn enemy_weapon(&self, id: i64) -> Option<&EnemyWeaponDefinition> {
        self.enemy_weapons.get(&id)
    }

    pub fn item(&self, id: ItemId) -> Option<&ItemDefinition> {
        self.items.get(&id)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemDefinition> {
        self.items.values()
    }

    pub fn items_of_kind(&self, kind: ItemKind) -> impl Iterator<Item = &ItemDefinition> {
        self.items.values().filter(move |i| i.kind == kind)
    }

    pub fn weapon(&self, id: ItemId) -> Option<&WeaponDefinition> {
        self.weapons.get(&id)
    }

    pub fn weapons(&self) -> impl Iterator<Item = &WeaponDefinition> {
        self.weapons.values()
    }

    pub fn shop(&self) -> &ShopDefinition {
        &self.shop
    }

    pub fn restrictions(&self, area: &str) -> &[AreaRestriction] {
        self.restrictions
            .get(area)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Classes flagged as requiring a static spawn trigger.
    pub fn static_only_classes(&self) -> BTreeSet<ClassKey> {
        self.enemies
            .values()
            .filter(|e| e.requires_static_spawn)
            .map(|e| e.key.clone())
            .collect()
    }

    /// Tier used for loot priority. Unknown classes sort last.
    pub fn tier_of(&self, key: &str) -> i32 {
        self.enemy(key).map_or(i32::MAX, |e| e.tier)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"{
        "enemy_weapons": [
            {"id": 1, "name": "Pitchfork"},
            {"id": 2, "name": "Crossbow", "ranged": true}
        ],
        "enemies": [
            {"key": "villager", "display_name": "Villager", "tier": 6,
             "min_health": 400, "max_health": 800, "max_pack_size": 3,
             "plaga_eligible": true,
             "weapon_choices": [{"primary": 1, "weight": 3}, {"primary": 2, "weight": 1}],
             "field_distributions": [
                {"field": "hat", "values": [
                    {"value": {"type": "int", "value": 0}, "weight": 1},
                    {"value": {"type": "int", "value": 1}, "weight": 1}
                ]}
             ]},
            {"key": "crossbowman", "display_name": "Crossbowman", "tier": 5,
             "min_health": 500, "max_health": 900, "ranged": true,
             "weapon_choices": [{"primary": 2}]},
            {"key": "chainsaw", "display_name": "Chainsaw Man", "tier": 2,
             "min_health": 3000, "max_health": 6000},
            {"key": "lurker", "display_name": "Lurker", "tier": 4,
             "min_health": 1200, "max_health": 2000, "requires_static_spawn": true}
        ],
        "items": [
            {"id": 100, "name": "Handgun", "kind": "weapon", "available_from": 1},
            {"id": 101, "name": "Shotgun", "kind": "weapon", "available_from": 2},
            {"id": 102, "name": "Rifle", "kind": "weapon", "available_from": 1},
            {"id": 200, "name": "Scope", "kind": "attachment"},
            {"id": 300, "name": "Handgun Ammo", "kind": "ammo", "max_stack": 10},
            {"id": 400, "name": "Pesetas", "kind": "money", "max_stack": 99999},
            {"id": 500, "name": "Green Herb", "kind": "health"},
            {"id": 600, "name": "Gold Bar", "kind": "treasure", "value": 5000},
            {"id": 700, "name": "Ammo Recipe", "kind": "recipe", "always_known": true},
            {"id": 800, "name": "Small Case Upgrade", "kind": "case_upgrade", "always_known": true}
        ],
        "weapons": [
            {"id": 100, "name": "Handgun", "class": "handgun", "price": 8000,
             "modifiers": [{"power": [1.0, 1.2, 1.4]}, {"ammo_capacity": [10, 12, 15]}]},
            {"id": 101, "name": "Shotgun", "class": "shotgun", "price": 16000,
             "modifiers": [{"exclusive": {"kind": "power", "value": 2.0}}]},
            {"id": 102, "name": "Rifle", "class": "rifle", "price": 20000}
        ],
        "shop": {"base_stock": [100]},
        "restrictions": {
            "village": [
                {"guids": ["00000000000000000000000000000002"], "include": ["chainsaw"]},
                {"exclude": ["chainsaw"]}
            ]
        }
    }"#;

    #[test]
    fn sample_catalog_loads() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        assert_eq!(catalog.enemies().count(), 4);
        assert_eq!(catalog.enemy("villager").unwrap().weapon_choices.len(), 2);
        assert!(catalog.enemy_weapon(2).unwrap().ranged);
        assert_eq!(catalog.items_of_kind(ItemKind::Weapon).count(), 3);
        assert_eq!(catalog.restrictions("village").len(), 2);
        assert!(catalog.restrictions("castle").is_empty());
        assert_eq!(
            catalog.static_only_classes().into_iter().collect::<Vec<_>>(),
            vec!["lurker".to_string()]
        );
        assert_eq!(catalog.tier_of("chainsaw"), 2);
        assert_eq!(catalog.tier_of("missing"), i32::MAX);
    }

    #[test]
    fn inverted_health_range_names_the_class() {
        let text = r#"{"enemies": [{"key": "bad", "display_name": "Bad", "tier": 1,
            "min_health": 900, "max_health": 100}]}"#;
        match Catalogs::from_json(text) {
            Err(RandomiserError::Catalog { entry, .. }) => assert_eq!(entry, "bad"),
            other => panic!("expected catalog error, got {other:?}"),
        }
    }

    #[test]
    fn weapon_without_item_is_rejected() {
        let text = r#"{"weapons": [{"id": 5, "name": "Ghost", "class": "handgun", "price": 1}]}"#;
        assert!(matches!(
            Catalogs::from_json(text),
            Err(RandomiserError::Catalog { .. })
        ));
    }

    #[test]
    fn unknown_enemy_weapon_is_rejected() {
        let text = r#"{"enemies": [{"key": "v", "display_name": "V", "tier": 1,
            "min_health": 1, "max_health": 2, "weapon_choices": [{"primary": 9}]}]}"#;
        assert!(matches!(
            Catalogs::from_json(text),
            Err(RandomiserError::Catalog { .. })
        ));
    }
}
