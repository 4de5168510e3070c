use std::collections::BTreeMap;
use tracing::debug;

use crate::entity::Guid;
use crate::pool::{Placement, PlacementId};
use crate::rng::RandomStream;
use crate::sampling::ResamplingBag;
use crate::trace::{AuditTrace, TraceRecord};
use crate::Result;

/// Hands out placement ids and context indices for newly created placements.
#[derive(Clone, Debug)]
pub struct IdAllocator {
    next_placement: usize,
    next_context: u32,
}

impl IdAllocator {
    pub fn new(next_placement: usize, next_context: u32) -> Self {
        Self {
            next_placement,
            next_context,
        }
    }

    pub fn placement(&mut self) -> PlacementId {
        let id = PlacementId(self.next_placement);
        self.next_placement += 1;
        id
    }

    pub fn context(&mut self) -> u32 {
        let ctx = self.next_context;
        self.next_context += 1;
        ctx
    }
}

pub struct DuplicationEngine<'a> {
    pub multiplier: f64,
    pub default_cap: usize,
    pub stage_caps: &'a BTreeMap<u32, usize>,
}

impl DuplicationEngine<'_> {
    pub fn cap_for(&self, stage_id: u32) -> usize {
        self.stage_caps
            .get(&stage_id)
            .copied()
            .unwrap_or(self.default_cap)
    }

    /// Creates duplicates for one stage. `stage` holds every placement of the
    /// stage; only those without `prevent_duplicate` are sources. The stage
    /// never grows past its cap and placements are never removed.
    pub fn duplicate_stage(
        &self,
        stage_id: u32,
        stage: &[&Placement],
        ids: &mut IdAllocator,
        rng: &mut RandomStream,
        trace: &mut AuditTrace,
    ) -> Result<Vec<Placement>> {
        let eligible: Vec<&Placement> = stage
            .iter()
            .copied()
            .filter(|p| !p.flags.prevent_duplicate)
            .collect();
        let n = eligible.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let cap = self.cap_for(stage_id);
        let target = ((n as f64 * self.multiplier).round() as usize).min(cap);
        if target <= n {
            return Ok(Vec::new());
        }
        let delta = target - n;

        let mut bag = ResamplingBag::new(0..n);
        let mut stage_count = stage.len();
        let mut created = Vec::with_capacity(delta);

        while created.len() < delta && stage_count < cap {
            let source = eligible[bag.next(rng)?];
            let mut copy = source.clone();
            copy.id = ids.placement();
            copy.current = Guid::random(rng);
            copy.context_id = ids.context();
            copy.duplicate_of = Some(source.id);
            copy.chosen_class = None;

            debug!(
                stage = stage_id,
                source = %source.current,
                duplicate = %copy.current,
                "duplicated placement"
            );
            trace.push(TraceRecord::Duplicate {
                stage: stage_id,
                source: source.id,
                placement: copy.id,
                entity: copy.current,
                context_id: copy.context_id,
                target,
                cap,
            });

            created.push(copy);
            stage_count += 1;
        }

        Ok(created)
    }
}
