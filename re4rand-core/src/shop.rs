use tracing::debug;

use crate::catalog::{Catalogs, ItemId};
use crate::drops::ItemPlacementTracker;
use crate::entity::{Decision, Value};
use crate::rng::RandomStream;
use crate::sampling::ResamplingBag;
use crate::trace::{AuditTrace, TraceRecord};
use crate::Result;

pub const UNLOCK_CHAPTER_FIELD: &str = "shop.unlock_chapter";

/// Decides in which chapter the merchant starts selling each weapon.
///
/// Weapons already granted elsewhere (drops, base stock) are skipped, and
/// every unlock is recorded so later drops do not hand the weapon out again.
pub struct ShopPlanner {
    weapons: ResamplingBag<ItemId>,
    per_chapter: usize,
}

impl ShopPlanner {
    pub fn new(catalog: &Catalogs, per_chapter: usize) -> Self {
        Self {
            weapons: ResamplingBag::new(catalog.weapons().map(|w| w.id)),
            per_chapter,
        }
    }

    pub fn plan_chapter(
        &mut self,
        chapter: u32,
        catalog: &Catalogs,
        tracker: &mut ItemPlacementTracker,
        rng: &mut RandomStream,
        trace: &mut AuditTrace,
    ) -> Result<Vec<Decision>> {
        let mut decisions = Vec::new();
        if self.weapons.is_empty() {
            return Ok(decisions);
        }

        let mut unlocked = 0;
        // Any run of two bag lengths contains a full cycle, so a dry streak
        // that long means nothing is left to unlock this chapter.
        let limit = 2 * self.weapons.len();
        let mut attempts = 0;
        while unlocked < self.per_chapter && attempts < limit {
            attempts += 1;
            let id = self.weapons.next(rng)?;
            let Some(item) = catalog.item(id) else {
                continue;
            };
            if tracker.is_placed(id) || item.available_from > chapter {
                continue;
            }
            tracker.record(item);
            unlocked += 1;
            attempts = 0;

            debug!(weapon = %item.name, chapter, "shop unlock");
            trace.push(TraceRecord::ShopUnlock { item: id, chapter });
            decisions.push(Decision::SetItemField {
                item: id,
                path: UNLOCK_CHAPTER_FIELD.to_string(),
                value: Value::Int(i64::from(chapter)),
            });
        }
        Ok(decisions)
    }
}
