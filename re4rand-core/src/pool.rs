use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{Catalogs, ClassKey};
use crate::entity::{EntityView, Guid, Value};

/// Mini-boss placements prefer classes at or below this tier.
pub const MINI_BOSS_MAX_TIER: i32 = 4;

/// One restriction block of an area. The first block whose `guids` is unset
/// or contains the placement applies.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaRestriction {
    pub guids: Option<BTreeSet<Guid>>,
    pub include: Option<BTreeSet<ClassKey>>,
    pub exclude: Option<BTreeSet<ClassKey>>,
    pub horde: bool,
    pub lock_weapon: bool,
    pub prevent_duplicate: bool,
    pub mini_boss: Option<String>,
}

impl AreaRestriction {
    pub fn applies_to(&self, guid: Guid) -> bool {
        self.guids.as_ref().map_or(true, |set| set.contains(&guid))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementFlags {
    pub horde: bool,
    pub lock_weapon: bool,
    pub prevent_duplicate: bool,
    pub mini_boss_tag: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlacementId(pub usize);

/// One opportunity to spawn an enemy, tracked through a run.
#[derive(Clone, Debug)]
pub struct Placement {
    pub id: PlacementId,
    /// Identity in the authored data; restriction lookups always use it.
    pub original: Guid,
    /// Identity after duplication or conversion.
    pub current: Guid,
    pub original_class: ClassKey,
    pub area: usize,
    pub chapter: u32,
    pub stage_id: u32,
    pub context_id: u32,
    pub static_trigger: bool,
    pub boss: bool,
    pub duplicate_of: Option<PlacementId>,
    pub flags: PlacementFlags,
    pub class_pool: BTreeSet<ClassKey>,
    pub preferred_class_pool: BTreeSet<ClassKey>,
    pub chosen_class: Option<ClassKey>,
    pub fields: BTreeMap<String, Value>,
}

impl Placement {
    /// The class the placement ends up as, converted or not.
    pub fn effective_class(&self) -> &str {
        self.chosen_class.as_deref().unwrap_or(&self.original_class)
    }
}

impl EntityView for Placement {
    fn get_field(&self, path: &str) -> Value {
        self.fields.get(path).cloned().unwrap_or_default()
    }

    fn set_field(&mut self, path: &str, value: Value) {
        self.fields.insert(path.to_string(), value);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPool {
    pub class_pool: BTreeSet<ClassKey>,
    pub preferred_class_pool: BTreeSet<ClassKey>,
    pub flags: PlacementFlags,
    /// Index of the restriction block that applied, if any.
    pub restriction: Option<usize>,
}

pub struct ClassPoolResolver<'a> {
    catalog: &'a Catalogs,
    supported: &'a BTreeSet<ClassKey>,
    static_only: BTreeSet<ClassKey>,
}

impl<'a> ClassPoolResolver<'a> {
    pub fn new(catalog: &'a Catalogs, supported: &'a BTreeSet<ClassKey>) -> Self {
        Self {
            catalog,
            supported,
            static_only: catalog.static_only_classes(),
        }
    }

    pub fn resolve(&self, placement: &Placement, restrictions: &[AreaRestriction]) -> ResolvedPool {
        let mut pool: BTreeSet<ClassKey> = self.supported.clone();
        if !placement.static_trigger {
            pool.retain(|key| !self.static_only.contains(key));
        }

        let mut flags = placement.flags.clone();
        let restriction = restrictions
            .iter()
            .position(|r| r.applies_to(placement.original));

        if let Some(idx) = restriction {
            let block = &restrictions[idx];
            flags.horde |= block.horde;
            flags.lock_weapon |= block.lock_weapon;
            flags.prevent_duplicate |= block.prevent_duplicate;
            if block.mini_boss.is_some() {
                flags.mini_boss_tag = block.mini_boss.clone();
            }

            if let Some(include) = &block.include {
                pool = pool.intersection(include).cloned().collect();
            } else if let Some(exclude) = &block.exclude {
                pool.retain(|key| !exclude.contains(key));
            } else if !block.horde && !block.lock_weapon && !block.prevent_duplicate {
                // Leave the placement exactly as authored.
                pool.clear();
                flags.prevent_duplicate = true;
            }
        }

        let preferred_class_pool = if flags.mini_boss_tag.is_some() {
            pool.iter()
                .filter(|key| self.catalog.tier_of(key) <= MINI_BOSS_MAX_TIER)
                .cloned()
                .collect()
        } else if self.has_ranged_weapon(placement) {
            pool.iter()
                .filter(|key| self.catalog.enemy(key).is_some_and(|e| e.ranged))
                .cloned()
                .collect()
        } else {
            pool.clone()
        };

        ResolvedPool {
            class_pool: pool,
            preferred_class_pool,
            flags,
            restriction,
        }
    }

    fn has_ranged_weapon(&self, placement: &Placement) -> bool {
        placement
            .get_field("weapon")
            .as_int()
            .and_then(|id| self.catalog.enemy_weapon(id))
            .is_some_and(|w| w.ranged)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::tests::SAMPLE;

    pub(crate) fn placement(id: usize, guid: u128, pool: &[&str]) -> Placement {
        let class_pool: BTreeSet<ClassKey> = pool.iter().map(|s| s.to_string()).collect();
        Placement {
            id: PlacementId(id),
            original: Guid(guid),
            current: Guid(guid),
            original_class: "villager".to_string(),
            area: 0,
            chapter: 1,
            stage_id: 1,
            context_id: id as u32,
            static_trigger: true,
            boss: false,
            duplicate_of: None,
            flags: PlacementFlags::default(),
            preferred_class_pool: class_pool.clone(),
            class_pool,
            chosen_class: None,
            fields: BTreeMap::new(),
        }
    }

    fn supported() -> BTreeSet<ClassKey> {
        ["villager", "crossbowman", "chainsaw", "lurker"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn keys(set: &BTreeSet<ClassKey>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn no_restriction_keeps_supported_pool() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let supported = supported();
        let resolver = ClassPoolResolver::new(&catalog, &supported);
        let resolved = resolver.resolve(&placement(0, 9, &[]), &[]);
        assert_eq!(resolved.class_pool, supported);
        assert_eq!(resolved.preferred_class_pool, supported);
        assert_eq!(resolved.restriction, None);
    }

    #[test]
    fn missing_static_trigger_drops_ambushers() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let supported = supported();
        let resolver = ClassPoolResolver::new(&catalog, &supported);
        let mut p = placement(0, 9, &[]);
        p.static_trigger = false;
        let resolved = resolver.resolve(&p, &[]);
        assert!(!resolved.class_pool.contains("lurker"));
        assert_eq!(resolved.class_pool.len(), 3);
    }

    #[test]
    fn first_matching_block_wins() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let supported = supported();
        let resolver = ClassPoolResolver::new(&catalog, &supported);
        let blocks = catalog.restrictions("village");

        let targeted = resolver.resolve(&placement(0, 2, &[]), blocks);
        assert_eq!(keys(&targeted.class_pool), vec!["chainsaw"]);
        assert_eq!(targeted.restriction, Some(0));

        let other = resolver.resolve(&placement(1, 3, &[]), blocks);
        assert!(!other.class_pool.contains("chainsaw"));
        assert_eq!(other.restriction, Some(1));
    }

    #[test]
    fn bare_block_freezes_placement() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let supported = supported();
        let resolver = ClassPoolResolver::new(&catalog, &supported);
        let resolved = resolver.resolve(&placement(0, 1, &[]), &[AreaRestriction::default()]);
        assert!(resolved.class_pool.is_empty());
        assert!(resolved.flags.prevent_duplicate);
    }

    #[test]
    fn flag_only_block_keeps_pool() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let supported = supported();
        let resolver = ClassPoolResolver::new(&catalog, &supported);
        let block = AreaRestriction {
            horde: true,
            ..AreaRestriction::default()
        };
        let resolved = resolver.resolve(&placement(0, 1, &[]), &[block]);
        assert_eq!(resolved.class_pool, supported);
        assert!(resolved.flags.horde);
        assert!(!resolved.flags.prevent_duplicate);
    }

    #[test]
    fn mini_boss_prefers_tough_tiers() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let supported = supported();
        let resolver = ClassPoolResolver::new(&catalog, &supported);
        let block = AreaRestriction {
            exclude: Some(BTreeSet::new()),
            mini_boss: Some("gate".to_string()),
            ..AreaRestriction::default()
        };
        let resolved = resolver.resolve(&placement(0, 1, &[]), &[block]);
        assert_eq!(resolved.flags.mini_boss_tag.as_deref(), Some("gate"));
        assert_eq!(keys(&resolved.preferred_class_pool), vec!["chainsaw", "lurker"]);
        assert!(resolved.preferred_class_pool.is_subset(&resolved.class_pool));
    }

    #[test]
    fn ranged_weapon_prefers_ranged_classes() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let supported = supported();
        let resolver = ClassPoolResolver::new(&catalog, &supported);
        let mut p = placement(0, 1, &[]);
        p.set_field("weapon", Value::Int(2));
        let resolved = resolver.resolve(&p, &[]);
        assert_eq!(keys(&resolved.preferred_class_pool), vec!["crossbowman"]);
    }
}
