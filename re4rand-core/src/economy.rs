use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{Catalogs, ItemId, WeaponDefinition};
use crate::entity::{Decision, Value};
use crate::rng::RandomStream;
use crate::trace::{AuditTrace, TraceRecord};
use crate::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponClass {
    Handgun,
    Shotgun,
    Rifle,
    Smg,
    Magnum,
    Knife,
    Special,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusiveKind {
    Power,
    Capacity,
    CriticalRate,
    Penetration,
    FireRate,
    ReloadSpeed,
    Durability,
}

impl ExclusiveKind {
    pub fn valid_for(class: WeaponClass) -> &'static [ExclusiveKind] {
        use ExclusiveKind::*;
        match class {
            WeaponClass::Handgun => &[Power, Capacity, CriticalRate, ReloadSpeed],
            WeaponClass::Shotgun => &[Power, Capacity, ReloadSpeed],
            WeaponClass::Rifle => &[Power, Capacity, CriticalRate, Penetration],
            WeaponClass::Smg => &[Power, Capacity, FireRate],
            WeaponClass::Magnum => &[Power, Capacity, Penetration],
            WeaponClass::Knife => &[Power, Durability],
            WeaponClass::Special => &[Power, Capacity],
        }
    }
}

/// Upgrade tables attached to a weapon. Level tables are indexed by
/// upgrade level and never decrease.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponModifier {
    Power(Vec<f64>),
    AmmoCapacity(Vec<u32>),
    Penetration(Vec<f64>),
    Exclusive { kind: ExclusiveKind, value: f64 },
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn scale_floats(levels: &[f64], factor: f64) -> Vec<f64> {
    let mut floor = f64::MIN;
    levels
        .iter()
        .map(|v| {
            let scaled = round2(v * factor).max(floor);
            floor = scaled;
            scaled
        })
        .collect()
}

fn scale_ints(levels: &[u32], factor: f64) -> Vec<u32> {
    let mut floor = 1;
    levels
        .iter()
        .map(|v| {
            let scaled = ((f64::from(*v) * factor).round() as u32).max(floor);
            floor = scaled;
            scaled
        })
        .collect()
}

pub struct WeaponEconomy {
    pub stat_variance: f64,
    pub price_variance: f64,
}

impl WeaponEconomy {
    fn factor(&self, variance: f64, rng: &mut RandomStream) -> f64 {
        rng.next_float(1.0 - variance, 1.0 + variance)
    }

    fn randomize_modifier(
        &self,
        weapon: &WeaponDefinition,
        modifier: &WeaponModifier,
        rng: &mut RandomStream,
    ) -> Result<WeaponModifier> {
        let randomized = match modifier {
            WeaponModifier::Power(levels) => {
                WeaponModifier::Power(scale_floats(levels, self.factor(self.stat_variance, rng)))
            }
            WeaponModifier::AmmoCapacity(levels) => WeaponModifier::AmmoCapacity(scale_ints(
                levels,
                self.factor(self.stat_variance, rng),
            )),
            WeaponModifier::Penetration(levels) => WeaponModifier::Penetration(scale_floats(
                levels,
                self.factor(self.stat_variance, rng),
            )),
            WeaponModifier::Exclusive { value, .. } => {
                let kind = *rng.choice(ExclusiveKind::valid_for(weapon.class))?;
                WeaponModifier::Exclusive {
                    kind,
                    value: round2(value * self.factor(self.stat_variance, rng)),
                }
            }
        };
        Ok(randomized)
    }

    /// Randomises every weapon's modifiers and price, in id order.
    pub fn randomize(
        &self,
        catalog: &Catalogs,
        rng: &mut RandomStream,
        trace: &mut AuditTrace,
    ) -> Result<Vec<Decision>> {
        let mut decisions = Vec::new();
        for weapon in catalog.weapons() {
            for (slot, modifier) in weapon.modifiers.iter().enumerate() {
                let randomized = self.randomize_modifier(weapon, modifier, rng)?;
                let path = format!("modifiers[{slot}]");
                let before = Value::Text(serde_json::to_string(modifier)?);
                let after = Value::Text(serde_json::to_string(&randomized)?);
                push_item_field(weapon.id, path, before, after, trace, &mut decisions);
            }

            let factor = self.factor(self.price_variance, rng);
            let price =
                ((f64::from(weapon.price) * factor / 100.0).round() * 100.0).max(100.0) as i64;
            push_item_field(
                weapon.id,
                "price".to_string(),
                Value::Int(i64::from(weapon.price)),
                Value::Int(price),
                trace,
                &mut decisions,
            );
            debug!(weapon = %weapon.name, price, "randomised weapon");
        }
        Ok(decisions)
    }
}

fn push_item_field(
    item: ItemId,
    path: String,
    before: Value,
    after: Value,
    trace: &mut AuditTrace,
    decisions: &mut Vec<Decision>,
) {
    trace.push(TraceRecord::WeaponStat {
        item,
        path: path.clone(),
        before,
        after: after.clone(),
    });
    decisions.push(Decision::SetItemField {
        item,
        path,
        value: after,
    });
}
