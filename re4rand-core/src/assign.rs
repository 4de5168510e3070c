use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use crate::catalog::{Catalogs, ClassKey};
use crate::pool::Placement;
use crate::rng::RandomStream;
use crate::sampling::WeightedTable;
use crate::trace::{AuditTrace, ClassSource, TraceRecord};
use crate::Result;

pub struct ClassAssignmentEngine<'a> {
    pub catalog: &'a Catalogs,
    pub weights: &'a BTreeMap<ClassKey, f64>,
    pub variety_cap: usize,
    pub max_pack_size: u32,
    pub strong_mini_bosses: bool,
}

impl ClassAssignmentEngine<'_> {
    fn weight(&self, class: &str) -> f64 {
        self.weights.get(class).copied().unwrap_or(0.0)
    }

    fn table(&self, classes: &BTreeSet<ClassKey>) -> WeightedTable<ClassKey> {
        classes
            .iter()
            .map(|class| (class.clone(), self.weight(class)))
            .collect()
    }

    fn pack_size(&self, class: &str, rng: &mut RandomStream) -> u32 {
        let class_max = self.catalog.enemy(class).map_or(1, |e| e.max_pack_size);
        let hi = self.max_pack_size.min(class_max).max(1);
        rng.next_int(1, i64::from(hi)) as u32
    }

    /// Assigns a class to every placement of one area.
    ///
    /// Placements are visited least-constrained first (largest pool, ties in
    /// area order). Pack repeats follow that visiting order, not spatial
    /// adjacency.
    pub fn assign_area(
        &self,
        placements: &mut [Placement],
        rng: &mut RandomStream,
        trace: &mut AuditTrace,
    ) -> Result<()> {
        let mut order: Vec<usize> = (0..placements.len()).collect();
        order.sort_by(|&a, &b| {
            placements[b]
                .class_pool
                .len()
                .cmp(&placements[a].class_pool.len())
        });

        let mut used: BTreeSet<ClassKey> = BTreeSet::new();
        let mut pack_queue: VecDeque<ClassKey> = VecDeque::new();

        for idx in order {
            let placement = &mut placements[idx];
            let mut pool = placement.class_pool.clone();

            if used.len() >= self.variety_cap {
                let narrowed: BTreeSet<ClassKey> = pool.intersection(&used).cloned().collect();
                if !narrowed.is_empty() {
                    pool = narrowed;
                }
            }

            let mut preferred: BTreeSet<ClassKey> = placement
                .preferred_class_pool
                .intersection(&pool)
                .cloned()
                .collect();
            if preferred.is_empty() {
                preferred = pool.clone();
            }

            let pending_accepted = pack_queue
                .front()
                .is_some_and(|class| preferred.contains(class) && self.weight(class) > 0.0);

            let (chosen, source, candidates) = if pending_accepted {
                (pack_queue.pop_front(), ClassSource::Pack, Vec::new())
            } else {
                pack_queue.clear();
                let mut table = self.table(&preferred);
                if table.is_empty() {
                    table = self.table(&pool);
                }
                let candidates = table.entries().to_vec();
                if table.is_empty() {
                    (None, ClassSource::Unassigned, candidates)
                } else {
                    let class = table.next(rng)?.clone();
                    let size = self.pack_size(&class, rng);
                    for _ in 1..size {
                        pack_queue.push_back(class.clone());
                    }
                    (Some(class), ClassSource::Drawn, candidates)
                }
            };

            if let Some(class) = &chosen {
                used.insert(class.clone());
            }
            debug!(
                placement = placement.id.0,
                class = chosen.as_deref().unwrap_or("-"),
                ?source,
                "assigned class"
            );
            trace.push(TraceRecord::Class {
                placement: placement.id,
                class: chosen.clone(),
                source,
                candidates,
            });
            placement.chosen_class = chosen;
        }

        if self.strong_mini_bosses {
            self.unify_mini_bosses(placements, trace);
        }
        Ok(())
    }

    /// Every placement sharing a mini-boss tag copies the class of the first
    /// one in area order.
    fn unify_mini_bosses(&self, placements: &mut [Placement], trace: &mut AuditTrace) {
        let mut leaders: BTreeMap<String, Option<ClassKey>> = BTreeMap::new();
        for placement in placements.iter_mut() {
            let Some(tag) = placement.flags.mini_boss_tag.clone() else {
                continue;
            };
            match leaders.get(&tag) {
                None => {
                    leaders.insert(tag, placement.chosen_class.clone());
                }
                Some(leader) => {
                    if placement.chosen_class != *leader {
                        placement.chosen_class = leader.clone();
                        trace.push(TraceRecord::Class {
                            placement: placement.id,
                            class: leader.clone(),
                            source: ClassSource::MiniBossGroup,
                            candidates: Vec::new(),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::SAMPLE;
    use crate::pool::tests::placement;
    use proptest::prelude::*;

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<ClassKey, f64> {
        pairs.iter().map(|(k, w)| (k.to_string(), *w)).collect()
    }

    fn distinct(placements: &[Placement]) -> BTreeSet<ClassKey> {
        placements
            .iter()
            .filter_map(|p| p.chosen_class.clone())
            .collect()
    }

    #[test]
    fn zero_weight_classes_are_never_chosen() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let weights = weights(&[("A", 1.0), ("B", 1.0), ("C", 0.0)]);
        let engine = ClassAssignmentEngine {
            catalog: &catalog,
            weights: &weights,
            variety_cap: 1,
            max_pack_size: 1,
            strong_mini_bosses: false,
        };

        for seed in 0..50 {
            let mut placements = vec![
                placement(0, 1, &["A", "B"]),
                placement(1, 2, &["A"]),
                placement(2, 3, &["B", "C"]),
            ];
            let mut rng = RandomStream::new(seed);
            let mut trace = AuditTrace::new(seed);
            engine
                .assign_area(&mut placements, &mut rng, &mut trace)
                .unwrap();

            assert_eq!(placements[1].chosen_class.as_deref(), Some("A"));
            assert_eq!(placements[2].chosen_class.as_deref(), Some("B"));
            assert!(!distinct(&placements).contains("C"));
        }
    }

    #[test]
    fn overlapping_pools_converge_under_cap_one() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let weights = weights(&[("A", 1.0), ("B", 1.0), ("C", 0.0)]);
        let engine = ClassAssignmentEngine {
            catalog: &catalog,
            weights: &weights,
            variety_cap: 1,
            max_pack_size: 1,
            strong_mini_bosses: false,
        };
        let mut placements = vec![
            placement(0, 1, &["A", "B"]),
            placement(1, 2, &["A", "B", "C"]),
            placement(2, 3, &["A", "B"]),
        ];
        let mut rng = RandomStream::new(42);
        let mut trace = AuditTrace::new(42);
        engine
            .assign_area(&mut placements, &mut rng, &mut trace)
            .unwrap();
        assert_eq!(distinct(&placements).len(), 1);
    }

    #[test]
    fn empty_pool_leaves_placement_unassigned() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let weights = weights(&[("A", 1.0)]);
        let engine = ClassAssignmentEngine {
            catalog: &catalog,
            weights: &weights,
            variety_cap: 3,
            max_pack_size: 1,
            strong_mini_bosses: false,
        };
        let mut placements = vec![placement(0, 1, &[]), placement(1, 2, &["A"])];
        let mut rng = RandomStream::new(3);
        let mut trace = AuditTrace::new(3);
        engine
            .assign_area(&mut placements, &mut rng, &mut trace)
            .unwrap();
        assert_eq!(placements[0].chosen_class, None);
        assert_eq!(placements[1].chosen_class.as_deref(), Some("A"));
        assert!(trace.records.iter().any(|r| matches!(
            r,
            TraceRecord::Class {
                source: ClassSource::Unassigned,
                ..
            }
        )));
    }

    #[test]
    fn packs_repeat_the_drawn_class() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let weights = weights(&[("villager", 1.0), ("crossbowman", 1.0)]);
        let engine = ClassAssignmentEngine {
            catalog: &catalog,
            weights: &weights,
            variety_cap: 4,
            max_pack_size: 3,
            strong_mini_bosses: false,
        };
        let mut placements: Vec<Placement> = (0..12)
            .map(|i| placement(i, i as u128 + 1, &["villager", "crossbowman"]))
            .collect();
        let mut rng = RandomStream::new(9);
        let mut trace = AuditTrace::new(9);
        engine
            .assign_area(&mut placements, &mut rng, &mut trace)
            .unwrap();

        // Crossbowmen have a pack size of one; every pack repeat is a villager.
        for record in &trace.records {
            if let TraceRecord::Class {
                class,
                source: ClassSource::Pack,
                ..
            } = record
            {
                assert_eq!(class.as_deref(), Some("villager"));
            }
        }
        assert!(placements.iter().all(|p| p.chosen_class.is_some()));
    }

    #[test]
    fn strong_mini_bosses_share_a_class() {
        let catalog = Catalogs::from_json(SAMPLE).unwrap();
        let weights = weights(&[("villager", 1.0), ("chainsaw", 1.0), ("lurker", 1.0)]);
        let engine = ClassAssignmentEngine {
            catalog: &catalog,
            weights: &weights,
            variety_cap: 4,
            max_pack_size: 1,
            strong_mini_bosses: true,
        };
        let mut placements: Vec<Placement> = (0..4)
            .map(|i| placement(i, i as u128 + 1, &["villager", "chainsaw", "lurker"]))
            .collect();
        placements[1].flags.mini_boss_tag = Some("gate".to_string());
        placements[3].flags.mini_boss_tag = Some("gate".to_string());

        for seed in 0..20 {
            let mut ps = placements.clone();
            let mut rng = RandomStream::new(seed);
            let mut trace = AuditTrace::new(seed);
            engine.assign_area(&mut ps, &mut rng, &mut trace).unwrap();
            assert_eq!(ps[1].chosen_class, ps[3].chosen_class);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]
        #[test]
        fn variety_cap_holds_for_shared_pools(
            seed in any::<u64>(),
            cap in 1usize..4,
            pool_size in 1usize..=5,
            count in 1usize..20,
        ) {
            let catalog = Catalogs::from_json(SAMPLE).unwrap();
            let all = ["A", "B", "C", "D", "E"];
            let weights = weights(&[("A", 1.0), ("B", 2.0), ("C", 1.0), ("D", 0.5), ("E", 3.0)]);
            let engine = ClassAssignmentEngine {
                catalog: &catalog,
                weights: &weights,
                variety_cap: cap,
                max_pack_size: 2,
                strong_mini_bosses: false,
            };
            let mut placements: Vec<Placement> = (0..count)
                .map(|i| placement(i, i as u128 + 1, &all[..pool_size]))
                .collect();
            let mut rng = RandomStream::new(seed);
            let mut trace = AuditTrace::new(seed);
            engine.assign_area(&mut placements, &mut rng, &mut trace).unwrap();
            prop_assert!(distinct(&placements).len() <= cap);
            for p in &placements {
                let class = p.chosen_class.as_ref().unwrap();
                prop_assert!(p.class_pool.contains(class));
            }
        }
    }
}
