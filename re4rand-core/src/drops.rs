use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::catalog::{Catalogs, ClassKey, ItemDefinition, ItemId, ItemKind};
use crate::config::Range;
use crate::entity::{Decision, EntityView, Guid, Value};
use crate::pool::{Placement, PlacementId};
use crate::rng::RandomStream;
use crate::sampling::WeightedTable;
use crate::trace::{AuditTrace, DropSource, TraceRecord};
use crate::{RandomiserError, Result};

/// Chance of taking the best remaining tier before falling through.
pub const TIER_PICK_PERCENT: f64 = 75.0;

pub const DROP_LOCKED_FIELD: &str = "item_drop.locked";

/// Categories of the general drop table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropKind {
    None,
    Ammo,
    Money,
    Health,
    Grenade,
    Resource,
}

impl DropKind {
    pub fn item_kind(self) -> Option<ItemKind> {
        match self {
            DropKind::None => None,
            DropKind::Ammo => Some(ItemKind::Ammo),
            DropKind::Money => Some(ItemKind::Money),
            DropKind::Health => Some(ItemKind::Health),
            DropKind::Grenade => Some(ItemKind::Grenade),
            DropKind::Resource => Some(ItemKind::Resource),
        }
    }
}

/// Append-only set of unique reward ids already granted this run.
#[derive(Clone, Debug, Default)]
pub struct ItemPlacementTracker {
    placed: BTreeSet<ItemId>,
}

impl ItemPlacementTracker {
    /// Seeded with items the player always knows and the merchant's base
    /// stock, so neither is ever handed out as a novel reward.
    pub fn new(catalog: &Catalogs) -> Self {
        let mut placed: BTreeSet<ItemId> = catalog
            .items()
            .filter(|i| i.always_known)
            .map(|i| i.id)
            .collect();
        placed.extend(catalog.shop().base_stock.iter().copied());
        Self { placed }
    }

    pub fn is_placed(&self, id: ItemId) -> bool {
        self.placed.contains(&id)
    }

    /// Records `item` if its kind is tracked. Consumables are ignored.
    pub fn record(&mut self, item: &ItemDefinition) {
        if item.kind.is_tracked() {
            self.placed.insert(item.id);
        }
    }

    pub fn placed(&self) -> &BTreeSet<ItemId> {
        &self.placed
    }

    /// Tracked items not yet placed and available by `chapter`, in id order.
    pub fn available(&self, catalog: &Catalogs, chapter: u32) -> Vec<ItemId> {
        catalog
            .items()
            .filter(|i| i.kind.is_tracked() && i.available_from <= chapter && !self.is_placed(i.id))
            .map(|i| i.id)
            .collect()
    }
}

#[derive(Clone, Debug)]
struct Candidate {
    id: PlacementId,
    entity: Guid,
    tier: i32,
    horde: bool,
}

/// Removes and returns one candidate, favouring the toughest tier (lowest
/// number). Each tier is taken with [`TIER_PICK_PERCENT`] before falling
/// through to the next; the last tier always takes.
fn pick_tier_biased(
    candidates: &mut Vec<Candidate>,
    rng: &mut RandomStream,
) -> Result<Option<Candidate>> {
    let tiers: BTreeSet<i32> = candidates.iter().map(|c| c.tier).collect();
    let last = tiers.iter().next_back().copied();
    for tier in tiers.iter().copied() {
        if Some(tier) == last || rng.probability(TIER_PICK_PERCENT) {
            let indices: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| c.tier == tier)
                .map(|(i, _)| i)
                .collect();
            let idx = *rng.choice(&indices)?;
            return Ok(Some(candidates.remove(idx)));
        }
    }
    Ok(None)
}

/// Placements of a chapter not yet given a drop.
#[derive(Debug, Default)]
pub struct ChapterDrops {
    pub decisions: Vec<Decision>,
    leftover: Vec<Candidate>,
}

impl ChapterDrops {
    pub fn leftover_count(&self) -> usize {
        self.leftover.len()
    }
}

pub struct DropAssignment<'a> {
    pub catalog: &'a Catalogs,
    pub special_drops: &'a BTreeMap<ClassKey, ItemId>,
    pub valuables_per_chapter: usize,
    pub treasure_ratio: f64,
    pub drop_weights: &'a BTreeMap<DropKind, f64>,
    pub money_range: Range<i64>,
}

impl DropAssignment<'_> {
    fn set_drop(
        &self,
        candidate: &Candidate,
        item: Option<ItemId>,
        count: i64,
        source: DropSource,
        trace: &mut AuditTrace,
        out: &mut Vec<Decision>,
    ) {
        debug!(placement = candidate.id.0, ?item, count, ?source, "assigned drop");
        trace.push(TraceRecord::Drop {
            placement: candidate.id,
            entity: candidate.entity,
            item,
            count,
            source,
            tier: candidate.tier,
        });
        let fields = [
            ("item_drop.enabled", Value::Bool(item.is_some())),
            ("item_drop.item_id", item.map_or(Value::Null, |id| Value::Int(i64::from(id)))),
            ("item_drop.count", Value::Int(count)),
        ];
        for (path, value) in fields {
            out.push(Decision::SetField {
                entity: candidate.entity,
                path: path.to_string(),
                value,
            });
        }
    }

    /// Special, valuable and treasure drops for one chapter. Placements left
    /// over are handed to [`DropAssignment::fill_general`].
    pub fn assign_chapter(
        &self,
        chapter: u32,
        placements: &[&Placement],
        tracker: &mut ItemPlacementTracker,
        rng: &mut RandomStream,
        trace: &mut AuditTrace,
    ) -> Result<ChapterDrops> {
        let mut out = ChapterDrops::default();
        let mut candidates: Vec<Candidate> = Vec::new();

        for placement in placements {
            if placement.boss || placement.get_field(DROP_LOCKED_FIELD).as_bool() == Some(true) {
                continue;
            }
            let class = placement.effective_class();
            let candidate = Candidate {
                id: placement.id,
                entity: placement.current,
                tier: self.catalog.tier_of(class),
                horde: placement.flags.horde,
            };
            match self.special_drops.get(class) {
                Some(&item_id) => {
                    let item = self.catalog.item(item_id).ok_or_else(|| {
                        RandomiserError::Config(format!(
                            "special_drops.{class}: unknown item {item_id}"
                        ))
                    })?;
                    tracker.record(item);
                    self.set_drop(
                        &candidate,
                        Some(item_id),
                        1,
                        DropSource::Special,
                        trace,
                        &mut out.decisions,
                    );
                }
                None => candidates.push(candidate),
            }
        }

        // Hordes respawn endlessly and never carry unique rewards or treasure.
        let (mut pool, hordes): (Vec<Candidate>, Vec<Candidate>) =
            candidates.into_iter().partition(|c| !c.horde);

        let mut valuables = tracker.available(self.catalog, chapter);
        rng.shuffle(&mut valuables);
        for item_id in valuables.into_iter().take(self.valuables_per_chapter) {
            let Some(candidate) = pick_tier_biased(&mut pool, rng)? else {
                break;
            };
            if let Some(item) = self.catalog.item(item_id) {
                tracker.record(item);
            }
            self.set_drop(
                &candidate,
                Some(item_id),
                1,
                DropSource::Valuable,
                trace,
                &mut out.decisions,
            );
        }

        let treasures: Vec<ItemId> = self
            .catalog
            .items_of_kind(ItemKind::Treasure)
            .filter(|i| i.available_from <= chapter)
            .map(|i| i.id)
            .collect();
        if !treasures.is_empty() {
            let quota = (pool.len() as f64 * self.treasure_ratio).round() as usize;
            for _ in 0..quota {
                let Some(candidate) = pick_tier_biased(&mut pool, rng)? else {
                    break;
                };
                let item_id = *rng.choice(&treasures)?;
                self.set_drop(
                    &candidate,
                    Some(item_id),
                    1,
                    DropSource::Treasure,
                    trace,
                    &mut out.decisions,
                );
            }
        }

        out.leftover = pool;
        out.leftover.extend(hordes);
        out.leftover.sort_by_key(|c| c.id);
        Ok(out)
    }

    /// Fills every leftover placement from the general weighted kind table.
    pub fn fill_general(
        &self,
        chapter: u32,
        drops: &mut ChapterDrops,
        rng: &mut RandomStream,
        trace: &mut AuditTrace,
    ) -> Result<()> {
        if drops.leftover.is_empty() {
            return Ok(());
        }
        let table: WeightedTable<DropKind> = self
            .drop_weights
            .iter()
            .map(|(kind, weight)| (*kind, *weight))
            .collect();
        if table.is_empty() {
            return Err(RandomiserError::ConfigurationGap {
                category: "drop_weights".to_string(),
            });
        }

        for candidate in std::mem::take(&mut drops.leftover) {
            let kind = *table.next(rng)?;
            let items: Vec<&ItemDefinition> = match kind.item_kind() {
                Some(item_kind) => self
                    .catalog
                    .items_of_kind(item_kind)
                    .filter(|i| i.available_from <= chapter)
                    .collect(),
                None => Vec::new(),
            };
            if items.is_empty() {
                let out = &mut drops.decisions;
                self.set_drop(&candidate, None, 0, DropSource::General, trace, out);
                continue;
            }
            let item = *rng.choice(&items)?;
            let count = if kind == DropKind::Money {
                rng.next_int(self.money_range.min, self.money_range.max)
            } else if item.stackable() {
                rng.next_int(1, i64::from(item.max_stack))
            } else {
                1
            };
            let out = &mut drops.decisions;
            self.set_drop(&candidate, Some(item.id), count, DropSource::General, trace, out);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::SAMPLE;
    use crate::pool::tests::placement;
    use proptest::prelude::*;

    fn drop_items(decisions: &[Decision]) -> Vec<(Guid, Option<i64>)> {
        decisions
            .iter()
            .filter_map(|d| match d {
                Decision::SetField { entity, path, value } if path == "item_drop.item_id" => {
                    Some((*entity, value.as_int()))
                }
                _ => None,
            })
            .collect()
    }

    fn engine<'a>(
        catalog: &'a Catalogs,
        special: &'a BTreeMap<ClassKey, ItemId>,
        weights: &'a BTreeMap<DropKind, f64>,
        valuables: usize,
        treasure_ratio: f64,
    ) -> DropAssignment<'a> {
        DropAssignment {
            catalog,
            special_drops: special,
            valuables_per_chapter: valuables,
            treasure_ratio,
            drop_weights: weights,
            money_range: Range { min: 10, max: 20 },
        }
    }

    #[test]
    fn tracker_starts_with_known_items() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let tracker = ItemPlacementTracker::new(&catalog);
        // Recipe and case upgrade are always known, the handgun is base stock.
        assert_eq!(tracker.placed().iter().copied().collect::<Vec<_>>(), vec![100, 700, 800]);
        assert_eq!(tracker.available(&catalog, 1), vec![102, 200]);
        assert_eq!(tracker.available(&catalog, 2), vec![101, 102, 200]);
    }

    #[test]
    fn consumables_are_not_tracked() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let mut tracker = ItemPlacementTracker::new(&catalog);
        tracker.record(catalog.item(300).unwrap());
        tracker.record(catalog.item(200).unwrap());
        assert!(!tracker.is_placed(300));
        assert!(tracker.is_placed(200));
    }

    #[test]
    fn tier_bias_prefers_toughest() {
        let mut rng = RandomStream::new(12);
        let mut hits = 0;
        for _ in 0..1000 {
            let mut candidates = vec![
                Candidate { id: PlacementId(0), entity: Guid(0), tier: 6, horde: false },
                Candidate { id: PlacementId(1), entity: Guid(1), tier: 2, horde: false },
            ];
            let picked = pick_tier_biased(&mut candidates, &mut rng).unwrap().unwrap();
            if picked.tier == 2 {
                hits += 1;
            }
            assert_eq!(candidates.len(), 1);
        }
        assert!((700..=800).contains(&hits), "{hits}");
    }

    #[test]
    fn special_valuable_treasure_then_general() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let special: BTreeMap<ClassKey, ItemId> =
            [("chainsaw".to_string(), 600)].into_iter().collect();
        let weights: BTreeMap<DropKind, f64> = [(DropKind::Ammo, 1.0)].into_iter().collect();
        let drops = engine(&catalog, &special, &weights, 2, 0.5);

        let mut placements: Vec<Placement> = (0..8)
            .map(|i| {
                let mut p = placement(i, i as u128 + 1, &["villager"]);
                p.chosen_class = Some("villager".to_string());
                p
            })
            .collect();
        placements[0].chosen_class = Some("chainsaw".to_string());
        placements[7].flags.horde = true;
        let refs: Vec<&Placement> = placements.iter().collect();

        let mut tracker = ItemPlacementTracker::new(&catalog);
        let mut rng = RandomStream::new(77);
        let mut trace = AuditTrace::new(77);
        let mut chapter = drops
            .assign_chapter(1, &refs, &mut tracker, &mut rng, &mut trace)
            .unwrap();

        // 1 special, 2 valuables, round(4 * 0.5) = 2 treasures, 2 + 1 horde left over.
        assert_eq!(drop_items(&chapter.decisions).len(), 5);
        assert_eq!(chapter.leftover_count(), 3);
        assert!(tracker.is_placed(102) && tracker.is_placed(200));

        let items = drop_items(&chapter.decisions);
        assert_eq!(items[0], (Guid(1), Some(600)));
        let valuable_ids: BTreeSet<i64> = items[1..3].iter().filter_map(|(_, id)| *id).collect();
        assert_eq!(valuable_ids, [102, 200].into_iter().collect());
        assert!(items[1..].iter().all(|(guid, _)| *guid != Guid(8)));

        drops.fill_general(1, &mut chapter, &mut rng, &mut trace).unwrap();
        let items = drop_items(&chapter.decisions);
        assert_eq!(items.len(), 8);
        assert_eq!(items.iter().filter(|(_, id)| *id == Some(300)).count(), 3);
    }

    #[test]
    fn zero_general_weights_are_a_gap() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let special = BTreeMap::new();
        let weights: BTreeMap<DropKind, f64> = [(DropKind::Ammo, 0.0)].into_iter().collect();
        let drops = engine(&catalog, &special, &weights, 0, 0.0);
        let p = placement(0, 1, &["villager"]);
        let mut tracker = ItemPlacementTracker::new(&catalog);
        let mut rng = RandomStream::new(1);
        let mut trace = AuditTrace::new(1);
        let mut chapter = drops
            .assign_chapter(1, &[&p], &mut tracker, &mut rng, &mut trace)
            .unwrap();
        assert!(matches!(
            drops.fill_general(1, &mut chapter, &mut rng, &mut trace),
            Err(RandomiserError::ConfigurationGap { .. })
        ));
    }

    #[test]
    fn locked_and_boss_placements_keep_their_drop() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let special = BTreeMap::new();
        let weights: BTreeMap<DropKind, f64> = [(DropKind::Ammo, 1.0)].into_iter().collect();
        let drops = engine(&catalog, &special, &weights, 5, 1.0);
        let mut locked = placement(0, 1, &["villager"]);
        locked.set_field(DROP_LOCKED_FIELD, Value::Bool(true));
        let mut boss = placement(1, 2, &[]);
        boss.boss = true;
        let mut tracker = ItemPlacementTracker::new(&catalog);
        let mut rng = RandomStream::new(1);
        let mut trace = AuditTrace::new(1);
        let chapter = drops
            .assign_chapter(1, &[&locked, &boss], &mut tracker, &mut rng, &mut trace)
            .unwrap();
        assert!(chapter.decisions.is_empty());
        assert_eq!(chapter.leftover_count(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]
        #[test]
        fn unique_rewards_never_reoccur(
            seed in any::<u64>(),
            per_chapter in 0usize..4,
            size in 1usize..12,
        ) {
            let catalog = Catalogs::from_json(SAMPLE).unwrap();
            let special = BTreeMap::new();
            let weights: BTreeMap<DropKind, f64> = [(DropKind::Ammo, 1.0)].into_iter().collect();
            let drops = engine(&catalog, &special, &weights, per_chapter, 0.2);
            let placements: Vec<Placement> =
                (0..size).map(|i| placement(i, i as u128 + 1, &["villager"])).collect();
            let refs: Vec<&Placement> = placements.iter().collect();

            let mut tracker = ItemPlacementTracker::new(&catalog);
            let mut rng = RandomStream::new(seed);
            let mut trace = AuditTrace::new(seed);
            let mut seen: BTreeSet<i64> = BTreeSet::new();
            for chapter in 1..=3 {
                let before: BTreeSet<ItemId> = tracker.placed().clone();
                let result = drops
                    .assign_chapter(chapter, &refs, &mut tracker, &mut rng, &mut trace)
                    .unwrap();
                for (_, id) in drop_items(&result.decisions) {
                    let id = id.unwrap();
                    let item = catalog.item(id as ItemId).unwrap();
                    if item.kind.is_tracked() {
                        prop_assert!(!before.contains(&(id as ItemId)));
                        prop_assert!(seen.insert(id));
                    }
                }
            }
        }
    }
}
