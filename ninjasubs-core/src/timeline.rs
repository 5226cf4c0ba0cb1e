//! Turns one scene's overlapping entries into the ordered list of
//! "which entries are on screen" states the runtime steps through.

use std::collections::BTreeSet;

use crate::project::Entry;

/// A point in time and the entries (scene-local indexes, ascending) visible
/// from there until the next state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub time_ms: u64,
    pub active: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Edge {
    Enter,
    Exit,
}

/// Compact a scene into visibility states.
///
/// The result always starts at time 0 and always ends with an empty state;
/// an empty scene yields the single state `(0, [])`. States recorded at the
/// same instant collapse into the last one, so every state's active set holds
/// for a non-empty stretch of time (except the terminal one).
pub fn compact(entries: &[Entry]) -> Vec<State> {
    let mut events: Vec<(u64, usize, Edge)> = Vec::with_capacity(entries.len() * 2);
    for (idx, entry) in entries.iter().enumerate() {
        // Inverted ranges count as zero-length.
        let end = entry.end.max(entry.start);
        events.push((entry.start, idx, Edge::Enter));
        events.push((end, idx, Edge::Exit));
    }
    events.sort();

    let mut states = vec![State {
        time_ms: 0,
        active: Vec::new(),
    }];
    let mut active = BTreeSet::new();

    for (time_ms, idx, edge) in events {
        match edge {
            Edge::Enter => {
                active.insert(idx);
            }
            Edge::Exit => {
                active.remove(&idx);
            }
        }
        let state = State {
            time_ms,
            active: active.iter().copied().collect(),
        };
        match states.last_mut() {
            Some(last) if last.time_ms == time_ms => *last = state,
            _ => states.push(state),
        }
    }

    if let Some(last) = states.last() {
        if !last.active.is_empty() {
            let time_ms = last.time_ms;
            states.push(State {
                time_ms,
                active: Vec::new(),
            });
        }
    }

    states
}

/// Convert milliseconds into runtime frame ticks, reserving `0xFFFF`.
pub fn ms_to_ticks(time_ms: u64, fps: u32) -> u16 {
    let ticks = time_ms.saturating_mul(u64::from(fps)) / 1000;
    ticks.min(0xFFFE) as u16
}
