use std::collections::BTreeMap;
use tracing::debug;

use crate::catalog::{Catalogs, ClassKey};
use crate::config::Range;
use crate::entity::{Decision, Value};
use crate::pool::Placement;
use crate::rng::RandomStream;
use crate::trace::{AuditTrace, TraceRecord};

pub const HEALTH_MIN: i64 = 1;
pub const HEALTH_MAX: i64 = 99_999;

/// Fraction of a stat range unlocked by a chapter.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChapterWindow {
    pub start: f64,
    pub end: f64,
}

impl ChapterWindow {
    pub const FULL: ChapterWindow = ChapterWindow { start: 0.0, end: 1.0 };

    pub fn new(chapter: u32, chapter_count: u32, progressive: bool) -> Self {
        if !progressive || chapter_count == 0 {
            return Self::FULL;
        }
        let chapter = chapter.clamp(1, chapter_count);
        let count = f64::from(chapter_count);
        ChapterWindow {
            start: f64::from(chapter - 1) / count,
            end: f64::from(chapter) / count,
        }
    }

    pub fn sample(&self, rng: &mut RandomStream) -> f64 {
        rng.next_float(self.start, self.end)
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

pub struct HealthAssignment<'a> {
    pub catalog: &'a Catalogs,
    pub progressive: bool,
    pub class_health: &'a BTreeMap<ClassKey, Range<i32>>,
    pub boss_health: Range<i32>,
}

impl HealthAssignment<'_> {
    fn class_range(&self, class: &str) -> Option<(i64, i64)> {
        if let Some(range) = self.class_health.get(class) {
            return Some((i64::from(range.min), i64::from(range.max)));
        }
        self.catalog
            .enemy(class)
            .map(|e| (i64::from(e.min_health), i64::from(e.max_health)))
    }

    /// Health for every converted or boss placement of one chapter.
    pub fn assign_chapter(
        &self,
        chapter: u32,
        chapter_count: u32,
        placements: &[&Placement],
        rng: &mut RandomStream,
        trace: &mut AuditTrace,
    ) -> Vec<Decision> {
        let window = ChapterWindow::new(chapter, chapter_count, self.progressive);
        let mut decisions = Vec::new();

        for placement in placements {
            let (health, min, max, used_window) = if placement.boss {
                let min = i64::from(self.boss_health.min);
                let max = i64::from(self.boss_health.max);
                let t = ChapterWindow::FULL.sample(rng);
                (lerp(min as f64, max as f64, t).round() as i64, min, max, ChapterWindow::FULL)
            } else {
                let Some(class) = placement.chosen_class.as_deref() else {
                    continue;
                };
                let Some((min, max)) = self.class_range(class) else {
                    continue;
                };
                if placement.flags.mini_boss_tag.is_some() {
                    (max * 2, min, max, ChapterWindow::FULL)
                } else {
                    let t = window.sample(rng);
                    (lerp(min as f64, max as f64, t).round() as i64, min, max, window)
                }
            };
            let health = health.clamp(HEALTH_MIN, HEALTH_MAX);

            debug!(placement = placement.id.0, health, chapter, "assigned health");
            trace.push(TraceRecord::Health {
                placement: placement.id,
                entity: placement.current,
                health,
                min,
                max,
                window: (used_window.start, used_window.end),
            });
            decisions.push(Decision::SetField {
                entity: placement.current,
                path: "health.has_value".to_string(),
                value: Value::Bool(true),
            });
            decisions.push(Decision::SetField {
                entity: placement.current,
                path: "health.value".to_string(),
                value: Value::Int(health),
            });
        }
        decisions
    }
}
