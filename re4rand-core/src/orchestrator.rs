use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::assign::ClassAssignmentEngine;
use crate::catalog::{Catalogs, ClassKey};
use crate::config::RandomizerConfig;
use crate::drops::{DropAssignment, ItemPlacementTracker};
use crate::duplicate::{DuplicationEngine, IdAllocator};
use crate::economy::WeaponEconomy;
use crate::entity::{AreaRecord, Decision, Guid};
use crate::health::HealthAssignment;
use crate::loadout::LoadoutAssignment;
use crate::pool::{ClassPoolResolver, Placement, PlacementFlags, PlacementId};
use crate::rng::RandomStream;
use crate::shop::ShopPlanner;
use crate::trace::{AuditTrace, TraceRecord};
use crate::{RandomiserError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub decisions: Vec<Decision>,
    pub trace: AuditTrace,
}

struct Streams {
    classes: RandomStream,
    duplication: RandomStream,
    identity: RandomStream,
    loadout: RandomStream,
    parasite: RandomStream,
    health: RandomStream,
    drops: RandomStream,
    shop: RandomStream,
    economy: RandomStream,
}

impl Streams {
    fn new(seed: u64) -> Self {
        let mut root = RandomStream::new(seed);
        Self {
            classes: root.fork(),
            duplication: root.fork(),
            identity: root.fork(),
            loadout: root.fork(),
            parasite: root.fork(),
            health: root.fork(),
            drops: root.fork(),
            shop: root.fork(),
            economy: root.fork(),
        }
    }
}

pub struct RunOrchestrator<'a> {
    config: &'a RandomizerConfig,
    catalog: Arc<Catalogs>,
}

impl<'a> RunOrchestrator<'a> {
    pub fn new(config: &'a RandomizerConfig, catalog: Arc<Catalogs>) -> Self {
        Self { config, catalog }
    }

    fn check_references(&self) -> Result<()> {
        for key in self.config.class_weights.keys() {
            if self.catalog.enemy(key).is_none() {
                return Err(RandomiserError::Config(format!(
                    "class_weights.{key}: unknown enemy class"
                )));
            }
        }
        for key in self.config.class_health.keys() {
            if self.catalog.enemy(key).is_none() {
                return Err(RandomiserError::Config(format!(
                    "class_health.{key}: unknown enemy class"
                )));
            }
        }
        for (class, item) in &self.config.special_drops {
            if self.catalog.item(*item).is_none() {
                return Err(RandomiserError::Config(format!(
                    "special_drops.{class}: unknown item {item}"
                )));
            }
        }
        Ok(())
    }

    pub fn randomize(&self, areas: &[AreaRecord]) -> Result<RunOutput> {
        let config = self.config;
        let catalog: &Catalogs = &self.catalog;
        config.validate()?;
        self.check_references()?;
        if let Some(area) = areas.iter().find(|a| a.chapter == 0) {
            return Err(RandomiserError::PreconditionViolation(format!(
                "area {}: chapters start at 1",
                area.name
            )));
        }

        let mut trace = AuditTrace::new(config.seed);
        let mut streams = Streams::new(config.seed);
        let mut decisions: Vec<Decision> = Vec::new();

        let mut area_order: Vec<usize> = (0..areas.len()).collect();
        area_order.sort_by_key(|&i| areas[i].chapter);

        let highest_chapter = areas.iter().map(|a| a.chapter).max().unwrap_or(1).max(1);
        let chapter_count = if config.chapter_count > 0 {
            config.chapter_count
        } else {
            highest_chapter
        };

        let supported: BTreeSet<ClassKey> = config
            .class_weights
            .iter()
            .filter(|(_, w)| **w > 0.0)
            .map(|(k, _)| k.clone())
            .collect();
        let enemies_enabled = config.randomize_enemies && !supported.is_empty();
        if config.randomize_enemies && supported.is_empty() {
            let gap = RandomiserError::ConfigurationGap {
                category: "class_weights".to_string(),
            };
            warn!(%gap, "enemy classes left as authored");
            trace.note(format!("{gap}; enemy classes left as authored"));
        }

        let mut areas_placements =
            self.build_placements(areas, &area_order, &supported, enemies_enabled, &mut trace);

        if enemies_enabled {
            let next_placement = areas_placements.iter().map(Vec::len).sum();
            let next_context = areas
                .iter()
                .flat_map(|a| a.spawns.iter().map(|s| s.context_id))
                .max()
                .map_or(0, |c| c + 1);
            let mut ids = IdAllocator::new(next_placement, next_context);
            let duplication = DuplicationEngine {
                multiplier: config.enemy_multiplier,
                default_cap: config.max_per_stage,
                stage_caps: &config.stage_caps,
            };
            let assignment = ClassAssignmentEngine {
                catalog,
                weights: &config.class_weights,
                variety_cap: config.variety_cap,
                max_pack_size: config.max_pack_size,
                strong_mini_bosses: config.strong_mini_bosses,
            };

            for (slot, placements) in areas_placements.iter_mut().enumerate() {
                let area = &areas[area_order[slot]].name;
                info!(area = %area, placements = placements.len(), "assigning enemies");

                let mut stages: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
                for (idx, p) in placements.iter().enumerate() {
                    stages.entry(p.stage_id).or_default().push(idx);
                }
                let mut created = Vec::new();
                for (stage_id, members) in &stages {
                    let refs: Vec<&Placement> = members.iter().map(|&i| &placements[i]).collect();
                    created.extend(duplication.duplicate_stage(
                        *stage_id,
                        &refs,
                        &mut ids,
                        &mut streams.duplication,
                        &mut trace,
                    )?);
                }
                for copy in &created {
                    decisions.push(Decision::Duplicate {
                        source: copy.original,
                        new_entity: copy.current,
                        context_id: copy.context_id,
                    });
                }
                placements.extend(created);

                assignment.assign_area(placements, &mut streams.classes, &mut trace)?;
            }

            let loadout = LoadoutAssignment {
                catalog,
                parasite_chance: config.parasite_chance,
                parasite_kinds: &config.parasite_kinds,
            };
            for placement in areas_placements.iter_mut().flatten() {
                let Some(class) = placement.chosen_class.clone() else {
                    continue;
                };
                let new_entity = Guid::random(&mut streams.identity);
                decisions.push(Decision::Convert {
                    entity: placement.current,
                    new_entity,
                    class,
                });
                placement.current = new_entity;
                decisions.extend(loadout.assign(
                    placement,
                    &mut streams.loadout,
                    &mut streams.parasite,
                    &mut trace,
                )?);
            }
        }

        let mut by_chapter: BTreeMap<u32, Vec<&Placement>> = BTreeMap::new();
        for (slot, placements) in areas_placements.iter().enumerate() {
            let chapter = areas[area_order[slot]].chapter;
            by_chapter.entry(chapter).or_default().extend(placements.iter());
        }

        let health = HealthAssignment {
            catalog,
            progressive: config.progressive_difficulty,
            class_health: &config.class_health,
            boss_health: config.boss_health,
        };
        let drops = DropAssignment {
            catalog,
            special_drops: &config.special_drops,
            valuables_per_chapter: config.valuables_per_chapter,
            treasure_ratio: config.treasure_ratio,
            drop_weights: &config.drop_weights,
            money_range: config.money_range,
        };
        let mut tracker = ItemPlacementTracker::new(catalog);
        let mut shop = ShopPlanner::new(catalog, config.shop_weapons_per_chapter);

        let last_chapter = chapter_count.max(highest_chapter);
        for chapter in 1..=last_chapter {
            let placements = by_chapter.get(&chapter).map(Vec::as_slice).unwrap_or_default();
            info!(chapter, placements = placements.len(), "chapter pass");

            if config.randomize_health {
                decisions.extend(health.assign_chapter(
                    chapter,
                    chapter_count,
                    placements,
                    &mut streams.health,
                    &mut trace,
                ));
            }

            if config.randomize_drops {
                let mut chapter_drops = drops.assign_chapter(
                    chapter,
                    placements,
                    &mut tracker,
                    &mut streams.drops,
                    &mut trace,
                )?;
                let filled =
                    drops.fill_general(chapter, &mut chapter_drops, &mut streams.drops, &mut trace);
                match filled {
                    Ok(()) => {}
                    Err(gap @ RandomiserError::ConfigurationGap { .. }) => {
                        warn!(%gap, chapter, "general drops left as authored");
                        trace.note(format!(
                            "chapter {chapter}: {gap}; general drops left as authored"
                        ));
                    }
                    Err(err) => return Err(err),
                }
                decisions.extend(chapter_drops.decisions);
            }

            if config.randomize_shop {
                decisions.extend(shop.plan_chapter(
                    chapter,
                    catalog,
                    &mut tracker,
                    &mut streams.shop,
                    &mut trace,
                )?);
            }
        }

        if config.randomize_weapon_stats {
            let economy = WeaponEconomy {
                stat_variance: config.weapon_stat_variance,
                price_variance: config.weapon_price_variance,
            };
            decisions.extend(economy.randomize(catalog, &mut streams.economy, &mut trace)?);
        }

        info!(
            seed = config.seed,
            decisions = decisions.len(),
            records = trace.records.len(),
            "randomisation finished"
        );
        Ok(RunOutput { decisions, trace })
    }

    /// One placement per authored spawn, grouped per area in chapter order,
    /// with pools resolved against the area's restriction blocks.
    fn build_placements(
        &self,
        areas: &[AreaRecord],
        area_order: &[usize],
        supported: &BTreeSet<ClassKey>,
        enemies_enabled: bool,
        trace: &mut AuditTrace,
    ) -> Vec<Vec<Placement>> {
        let resolver = ClassPoolResolver::new(&self.catalog, supported);
        let mut next_id = 0;
        let mut result = Vec::with_capacity(area_order.len());

        for (slot, &area_idx) in area_order.iter().enumerate() {
            let area = &areas[area_idx];
            let restrictions = self.catalog.restrictions(&area.name);
            let mut placements = Vec::with_capacity(area.spawns.len());

            for spawn in &area.spawns {
                let mut placement = Placement {
                    id: PlacementId(next_id),
                    original: spawn.guid,
                    current: spawn.guid,
                    original_class: spawn.class_key.clone(),
                    area: slot,
                    chapter: area.chapter,
                    stage_id: spawn.stage_id,
                    context_id: spawn.context_id,
                    static_trigger: spawn.static_trigger,
                    boss: spawn.boss,
                    duplicate_of: None,
                    flags: PlacementFlags::default(),
                    class_pool: BTreeSet::new(),
                    preferred_class_pool: BTreeSet::new(),
                    chosen_class: None,
                    fields: spawn.fields.clone(),
                };
                next_id += 1;

                if enemies_enabled && !spawn.boss {
                    let resolved = resolver.resolve(&placement, restrictions);
                    trace.push(TraceRecord::Pool {
                        placement: placement.id,
                        entity: placement.original,
                        pool: resolved.class_pool.iter().cloned().collect(),
                        preferred: resolved.preferred_class_pool.iter().cloned().collect(),
                        restriction: resolved.restriction,
                    });
                    placement.class_pool = resolved.class_pool;
                    placement.preferred_class_pool = resolved.preferred_class_pool;
                    placement.flags = resolved.flags;
                } else {
                    placement.flags.prevent_duplicate = true;
                }
                placements.push(placement);
            }
            result.push(placements);
        }
        result
    }
}
