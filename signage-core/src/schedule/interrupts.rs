//! Share-of-voice interrupt scheduling: spreads each
//! interrupt's requested percentage of the hour evenly across the hour
//! rather than clustering it into one contiguous block at the top.

use signage_contracts::ids::LayoutId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptSlot {
    pub layout_id: LayoutId,
    /// Minute-of-hour the slot starts at, inclusive.
    pub start_minute: u8,
    /// Minute-of-hour the slot ends at, exclusive.
    pub end_minute: u8,
}

const MINUTES_PER_HOUR: u32 = 60;

/// Assigns each interrupt its `needed[i] = round(percentage_of_hour / 100 *
/// 60)` minutes using a deficit-based interleave: at every minute, the
/// layout whose ideal cumulative share (`needed[i] * minute / 60`) most
/// exceeds what it has actually been given so far gets that minute. This
/// is the same trick weighted round-robin packet schedulers use to avoid
/// bursty allocation, and it guarantees each layout ends the hour with
/// exactly its rounded minute count.
pub fn plan_interrupt_slots(requests: &[(LayoutId, u8)], _current_hour: u32) -> Vec<InterruptSlot> {
    let needed: Vec<u32> = requests
        .iter()
        .map(|(_, pct)| (*pct as u32 * MINUTES_PER_HOUR).div_ceil(100).min(MINUTES_PER_HOUR))
        .collect();

    if needed.iter().all(|n| *n == 0) {
        return Vec::new();
    }

    let mut consumed = vec![0u32; needed.len()];
    let mut assignment: Vec<Option<usize>> = Vec::with_capacity(MINUTES_PER_HOUR as usize);

    for minute in 0..MINUTES_PER_HOUR {
        let mut best: Option<(usize, f64)> = None;
        for (i, &need) in needed.iter().enumerate() {
            if need == 0 || consumed[i] >= need {
                continue;
            }
            let ideal_so_far = need as f64 * (minute + 1) as f64 / MINUTES_PER_HOUR as f64;
            let deficit = ideal_so_far - consumed[i] as f64;
            if best.map(|(_, best_deficit)| deficit > best_deficit).unwrap_or(true) {
                best = Some((i, deficit));
            }
        }
        match best {
            Some((i, _)) => {
                consumed[i] += 1;
                assignment.push(Some(i));
            }
            None => assignment.push(None),
        }
    }

    coalesce(&assignment, requests)
}

fn coalesce(assignment: &[Option<usize>], requests: &[(LayoutId, u8)]) -> Vec<InterruptSlot> {
    let mut slots = Vec::new();
    let mut run_start: Option<(usize, u8)> = None;

    for (minute, slot) in assignment.iter().enumerate() {
        match (run_start, slot) {
            (Some((index, start)), Some(current)) if index == *current => {
                // still in the same run
                let _ = start;
            }
            (Some((index, start)), _) => {
                slots.push(InterruptSlot {
                    layout_id: requests[index].0.clone(),
                    start_minute: start,
                    end_minute: minute as u8,
                });
                run_start = slot.map(|i| (i, minute as u8));
            }
            (None, Some(current)) => {
                run_start = Some((*current, minute as u8));
            }
            (None, None) => {}
        }
    }
    if let Some((index, start)) = run_start {
        slots.push(InterruptSlot {
            layout_id: requests[index].0.clone(),
            start_minute: start,
            end_minute: MINUTES_PER_HOUR as u8,
        });
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_interrupt_gets_exactly_its_share_of_minutes() {
        let requests = vec![(LayoutId::new("promo"), 25u8)];
        let slots = plan_interrupt_slots(&requests, 14);
        let total: u32 = slots.iter().map(|s| (s.end_minute - s.start_minute) as u32).sum();
        assert_eq!(total, 15); // 25% of 60
    }

    #[test]
    fn two_interrupts_interleave_without_clustering_all_at_the_start() {
        let requests = vec![(LayoutId::new("a"), 50u8), (LayoutId::new("b"), 50u8)];
        let slots = plan_interrupt_slots(&requests, 9);

        // Perfectly even 50/50 split should alternate every other minute,
        // producing far more than two runs (a single cluster would yield
        // exactly two runs: all of "a" then all of "b").
        assert!(slots.len() > 2, "expected interleaved runs, got {slots:?}");

        let a_minutes: u32 = slots
            .iter()
            .filter(|s| s.layout_id == LayoutId::new("a"))
            .map(|s| (s.end_minute - s.start_minute) as u32)
            .sum();
        assert_eq!(a_minutes, 30);
    }

    #[test]
    fn zero_percent_requests_produce_no_slots() {
        let requests = vec![(LayoutId::new("a"), 0u8)];
        assert!(plan_interrupt_slots(&requests, 0).is_empty());
    }
}
