use tracing::debug;

use crate::catalog::{Catalogs, FieldDistribution};
use crate::entity::{Decision, EntityView, Value};
use crate::pool::Placement;
use crate::rng::RandomStream;
use crate::sampling::WeightedTable;
use crate::trace::{AuditTrace, TraceRecord};
use crate::{RandomiserError, Result};

pub const WEAPON_FIELD: &str = "weapon";
pub const SECONDARY_WEAPON_FIELD: &str = "secondary_weapon";
pub const PARASITE_FIELD: &str = "parasite";

/// Fills in weapons, per-class field values and parasites for converted
/// placements.
pub struct LoadoutAssignment<'a> {
    pub catalog: &'a Catalogs,
    pub parasite_chance: f64,
    pub parasite_kinds: &'a [String],
}

impl LoadoutAssignment<'_> {
    pub fn assign(
        &self,
        placement: &Placement,
        rng: &mut RandomStream,
        parasite_rng: &mut RandomStream,
        trace: &mut AuditTrace,
    ) -> Result<Vec<Decision>> {
        let Some(class_key) = placement.chosen_class.as_deref() else {
            return Ok(Vec::new());
        };
        let class = self.catalog.enemy(class_key).ok_or_else(|| RandomiserError::Catalog {
            entry: class_key.to_string(),
            reason: "assigned class is missing from the catalog".to_string(),
        })?;

        let mut fields: Vec<(String, Value)> = Vec::new();

        if placement.flags.lock_weapon {
            fields.push((WEAPON_FIELD.to_string(), placement.get_field(WEAPON_FIELD)));
            fields.push((
                SECONDARY_WEAPON_FIELD.to_string(),
                placement.get_field(SECONDARY_WEAPON_FIELD),
            ));
        } else {
            let table: WeightedTable<_> = class
                .weapon_choices
                .iter()
                .map(|choice| (choice, choice.weight))
                .collect();
            if !table.is_empty() {
                let choice = table.next(rng)?;
                let as_value = |id: Option<i64>| id.map_or(Value::Null, Value::Int);
                fields.push((WEAPON_FIELD.to_string(), as_value(choice.primary)));
                fields.push((SECONDARY_WEAPON_FIELD.to_string(), as_value(choice.secondary)));
            }
        }

        for dist in &class.field_distributions {
            if let Some(value) = draw_field(dist, rng)? {
                fields.push((dist.field.clone(), value));
            }
        }

        if class.plaga_eligible
            && !self.parasite_kinds.is_empty()
            && parasite_rng.probability(self.parasite_chance)
        {
            let kind = parasite_rng.choice(self.parasite_kinds)?;
            fields.push((PARASITE_FIELD.to_string(), Value::Text(kind.clone())));
        }

        let mut decisions = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            debug!(placement = placement.id.0, %field, ?value, "loadout field");
            trace.push(TraceRecord::Loadout {
                placement: placement.id,
                entity: placement.current,
                field: field.clone(),
                value: value.clone(),
            });
            decisions.push(Decision::SetField {
                entity: placement.current,
                path: field,
                value,
            });
        }
        Ok(decisions)
    }
}

fn draw_field(dist: &FieldDistribution, rng: &mut RandomStream) -> Result<Option<Value>> {
    let table: WeightedTable<&Value> = dist.values.iter().map(|v| (&v.value, v.weight)).collect();
    if table.is_empty() {
        return Ok(None);
    }
    Ok(Some((*table.next(rng)?).clone()))
}
