//! Pure schedule evaluation: turns a schedule document plus the
//! current moment, location and criteria context into what should be
//! playing right now. Holds no state and performs no I/O — every input is
//! a parameter, which is what makes the resolution rules checkable in
//! isolation from the orchestrator that calls them.

mod interrupts;

pub use interrupts::{InterruptSlot, plan_interrupt_slots};

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Local, NaiveTime, Timelike};

use signage_contracts::ids::{LayoutId, ScheduleEntryId};
use signage_contracts::schedule_doc::{ScheduleDocument, ScheduleEntry, ScheduleEntryKind};

#[derive(Debug, Clone, Default)]
pub struct ResolvedSchedule {
    pub main_layouts: Vec<LayoutId>,
    pub overlays: Vec<LayoutId>,
    pub interrupts: Vec<InterruptSlot>,
    pub conflicts: Vec<Conflict>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub priority: i32,
    pub entries: Vec<ScheduleEntryId>,
}

/// A surviving entry after rules 1-3 (time/geo/criteria filtering and
/// campaign expansion), flattened to its contributing layout ids.
struct ExpandedEntry<'a> {
    entry: &'a ScheduleEntry,
    layouts: Vec<LayoutId>,
}

pub struct ResolverContext {
    pub now: DateTime<Local>,
    pub location: Option<(f64, f64)>,
    pub criteria_context: HashMap<String, String>,
}

/// Evaluates `document` against `ctx` and returns what should play now.
/// See the module docs above for the seven resolution rules this function implements in
/// order.
pub fn resolve(document: &ScheduleDocument, ctx: &ResolverContext) -> ResolvedSchedule {
    let surviving: Vec<ExpandedEntry> = document
        .entries
        .iter()
        .filter(|entry| time_matches(entry, ctx.now))
        .filter(|entry| geo_and_criteria_match(entry, ctx))
        .map(|entry| ExpandedEntry {
            entry,
            layouts: entry.kind.layouts(),
        })
        .collect();

    let overlays = overlay_layouts(&surviving);
    let (main_layouts, conflicts) = main_selection(&surviving, document.default_layout_id.as_ref());
    let interrupts = interrupt_slots(&surviving, ctx.now);

    ResolvedSchedule {
        main_layouts,
        overlays,
        interrupts,
        conflicts,
    }
}

fn time_matches(entry: &ScheduleEntry, now: DateTime<Local>) -> bool {
    let Some(window) = &entry.window else {
        return true;
    };
    match window {
        signage_contracts::schedule_doc::TimeWindow::Absolute { from, to } => {
            let now_utc = now.with_timezone(&chrono::Utc);
            now_utc >= *from && now_utc <= *to
        }
        signage_contracts::schedule_doc::TimeWindow::Recurring {
            from_time_of_day,
            to_time_of_day,
            repeats_on,
            range,
        } => {
            if let Some(range) = range {
                if now.with_timezone(&chrono::Utc) > *range {
                    return false;
                }
            }
            let weekday_iso = now.weekday().number_from_monday() as u8;
            if !repeats_on.contains(&weekday_iso) {
                return false;
            }
            time_of_day_in_window(now.time(), *from_time_of_day, *to_time_of_day)
        }
    }
}

/// Handles midnight-wrap dayparting: a window where `to < from` spans past
/// midnight (e.g. 22:00-02:00 matches 23:00 and 01:00 but not 12:00).
fn time_of_day_in_window(now: NaiveTime, from: NaiveTime, to: NaiveTime) -> bool {
    if from <= to {
        now >= from && now <= to
    } else {
        now >= from || now <= to
    }
}

fn geo_and_criteria_match(entry: &ScheduleEntry, ctx: &ResolverContext) -> bool {
    if let Some(fence) = &entry.geo_fence {
        match ctx.location {
            Some(point) if fence.contains(point) => {}
            _ => return false,
        }
    }
    if let Some(criteria) = &entry.criteria {
        if !criteria.matches(&ctx.criteria_context) {
            return false;
        }
    }
    true
}

fn overlay_layouts(surviving: &[ExpandedEntry]) -> Vec<LayoutId> {
    let mut overlays: Vec<&ExpandedEntry> = surviving
        .iter()
        .filter(|e| e.entry.kind.is_overlay())
        .collect();
    overlays.sort_by(|a, b| b.entry.priority.cmp(&a.entry.priority));
    overlays.into_iter().flat_map(|e| e.layouts.clone()).collect()
}

/// Rule 4 (main selection) + rule 7 (conflict detection among the main
/// layer). Overlays and interrupts never conflict with the main layer;
/// only same-priority main entries are reported.
fn main_selection(
    surviving: &[ExpandedEntry],
    default_layout_id: Option<&LayoutId>,
) -> (Vec<LayoutId>, Vec<Conflict>) {
    let main_entries: Vec<&ExpandedEntry> = surviving
        .iter()
        .filter(|e| !e.entry.kind.is_overlay() && !e.entry.kind.is_interrupt())
        .collect();

    let Some(top_priority) = main_entries.iter().map(|e| e.entry.priority).max() else {
        return (default_layout_id.cloned().into_iter().collect(), Vec::new());
    };

    let tied: Vec<&&ExpandedEntry> = main_entries
        .iter()
        .filter(|e| e.entry.priority == top_priority)
        .collect();

    let layouts: Vec<LayoutId> = tied.iter().flat_map(|e| e.layouts.clone()).collect();

    let conflicts = if tied.len() > 1 {
        vec![Conflict {
            priority: top_priority,
            entries: tied.iter().map(|e| e.entry.id.clone()).collect(),
        }]
    } else {
        Vec::new()
    };

    (layouts, conflicts)
}

fn interrupt_slots(surviving: &[ExpandedEntry], now: DateTime<Local>) -> Vec<InterruptSlot> {
    let requests: Vec<(LayoutId, u8)> = surviving
        .iter()
        .filter_map(|e| match &e.entry.kind {
            ScheduleEntryKind::Interrupt {
                layout_id,
                percentage_of_hour,
            } => Some((layout_id.clone(), *percentage_of_hour)),
            _ => None,
        })
        .collect();

    plan_interrupt_slots(&requests, now.hour())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use signage_contracts::ids::ScheduleEntryId;
    use signage_contracts::schedule_doc::TimeWindow;

    fn entry(
        id: &str,
        priority: i32,
        window: Option<TimeWindow>,
        kind: ScheduleEntryKind,
    ) -> ScheduleEntry {
        ScheduleEntry {
            id: ScheduleEntryId::new(id),
            priority,
            window,
            geo_fence: None,
            criteria: None,
            kind,
        }
    }

    fn ctx(now: DateTime<Local>) -> ResolverContext {
        ResolverContext {
            now,
            location: None,
            criteria_context: HashMap::new(),
        }
    }

    #[test]
    fn midnight_wrap_recurring_window_matches_both_sides_of_midnight() {
        let window = TimeWindow::Recurring {
            from_time_of_day: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            to_time_of_day: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            repeats_on: (1..=7).collect(),
            range: None,
        };

        let late_night = Local.with_ymd_and_hms(2026, 7, 26, 23, 30, 0).unwrap();
        let early_morning = Local.with_ymd_and_hms(2026, 7, 27, 1, 0, 0).unwrap();
        let midday = Local.with_ymd_and_hms(2026, 7, 26, 12, 0, 0).unwrap();

        assert!(time_matches(
            &entry(
                "e1",
                1,
                Some(window.clone()),
                ScheduleEntryKind::Layout {
                    layout_id: LayoutId::new("l1")
                }
            ),
            late_night
        ));
        assert!(time_matches(
            &entry(
                "e1",
                1,
                Some(window.clone()),
                ScheduleEntryKind::Layout {
                    layout_id: LayoutId::new("l1")
                }
            ),
            early_morning
        ));
        assert!(!time_matches(
            &entry(
                "e1",
                1,
                Some(window),
                ScheduleEntryKind::Layout {
                    layout_id: LayoutId::new("l1")
                }
            ),
            midday
        ));
    }

    #[test]
    fn main_selection_falls_back_to_default_layout_when_nothing_matches() {
        let document = ScheduleDocument {
            default_layout_id: Some(LayoutId::new("default")),
            entries: vec![],
        };
        let result = resolve(&document, &ctx(Local::now()));
        assert_eq!(result.main_layouts, vec![LayoutId::new("default")]);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn tied_priority_entries_concatenate_and_report_a_conflict() {
        let document = ScheduleDocument {
            default_layout_id: None,
            entries: vec![
                entry(
                    "a",
                    5,
                    None,
                    ScheduleEntryKind::Layout {
                        layout_id: LayoutId::new("la"),
                    },
                ),
                entry(
                    "b",
                    5,
                    None,
                    ScheduleEntryKind::Layout {
                        layout_id: LayoutId::new("lb"),
                    },
                ),
                entry(
                    "c",
                    1,
                    None,
                    ScheduleEntryKind::Layout {
                        layout_id: LayoutId::new("lc"),
                    },
                ),
            ],
        };
        let result = resolve(&document, &ctx(Local::now()));
        assert_eq!(
            result.main_layouts,
            vec![LayoutId::new("la"), LayoutId::new("lb")]
        );
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].priority, 5);
    }

    #[test]
    fn overlays_are_ordered_by_priority_descending() {
        let document = ScheduleDocument {
            default_layout_id: None,
            entries: vec![
                entry(
                    "o1",
                    1,
                    None,
                    ScheduleEntryKind::Overlay {
                        layout_id: LayoutId::new("low"),
                    },
                ),
                entry(
                    "o2",
                    9,
                    None,
                    ScheduleEntryKind::Overlay {
                        layout_id: LayoutId::new("high"),
                    },
                ),
            ],
        };
        let result = resolve(&document, &ctx(Local::now()));
        assert_eq!(
            result.overlays,
            vec![LayoutId::new("high"), LayoutId::new("low")]
        );
    }

    #[test]
    fn recurring_window_stops_matching_once_its_range_cutoff_has_passed() {
        let window = TimeWindow::Recurring {
            from_time_of_day: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            to_time_of_day: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            repeats_on: (1..=7).collect(),
            range: Some(Local.with_ymd_and_hms(2026, 7, 26, 6, 0, 0).unwrap().with_timezone(&chrono::Utc)),
        };
        let e = entry(
            "e1",
            1,
            Some(window),
            ScheduleEntryKind::Layout {
                layout_id: LayoutId::new("l1"),
            },
        );

        let before_cutoff = Local.with_ymd_and_hms(2026, 7, 25, 23, 0, 0).unwrap();
        let after_cutoff = Local.with_ymd_and_hms(2026, 7, 26, 23, 0, 0).unwrap();

        assert!(time_matches(&e, before_cutoff));
        assert!(!time_matches(&e, after_cutoff));
    }

    #[test]
    fn campaign_expands_in_layout_order_and_beats_a_lower_priority_standalone() {
        let document = ScheduleDocument {
            default_layout_id: None,
            entries: vec![entry(
                "campaign",
                10,
                None,
                ScheduleEntryKind::Campaign {
                    layouts: vec![LayoutId::new("a"), LayoutId::new("b")],
                },
            ), entry(
                "standalone",
                5,
                None,
                ScheduleEntryKind::Layout {
                    layout_id: LayoutId::new("d"),
                },
            )],
        };
        let result = resolve(&document, &ctx(Local::now()));
        assert_eq!(result.main_layouts, vec![LayoutId::new("a"), LayoutId::new("b")]);
    }

    #[test]
    fn two_tied_priority_campaigns_concatenate_in_schedule_order() {
        let document = ScheduleDocument {
            default_layout_id: None,
            entries: vec![
                entry(
                    "c1",
                    10,
                    None,
                    ScheduleEntryKind::Campaign {
                        layouts: vec![LayoutId::new("a"), LayoutId::new("b")],
                    },
                ),
                entry(
                    "c2",
                    10,
                    None,
                    ScheduleEntryKind::Campaign {
                        layouts: vec![LayoutId::new("d")],
                    },
                ),
            ],
        };
        let result = resolve(&document, &ctx(Local::now()));
        assert_eq!(
            result.main_layouts,
            vec![LayoutId::new("a"), LayoutId::new("b"), LayoutId::new("d")]
        );
    }
}
