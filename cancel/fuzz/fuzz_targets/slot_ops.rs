#![no_main]

use std::cell::Cell;
use std::rc::Rc;

use libfuzzer_sys::fuzz_target;
use tripline_cancel::{Signal, Slot, State};

const MAX_NODES: usize = 8;

fn slot_at(signals: &[Option<Signal>], states: &[State], sel: usize) -> Option<Slot> {
    let total = signals.len() + states.len();
    if total == 0 {
        return None;
    }
    match sel % total {
        i if i < signals.len() => signals[i].as_ref().map(Signal::slot),
        i => Some(states[i - signals.len()].slot()),
    }
}

// Drives a small web of signals and propagation nodes through an arbitrary
// operation sequence, shaking the record reuse and retirement paths.
fuzz_target!(|data: &[u8]| {
    let mut signals: Vec<Option<Signal>> = vec![Some(Signal::new())];
    let mut states: Vec<State> = Vec::new();
    let hits = Rc::new(Cell::new(0u64));

    for chunk in data.chunks(3) {
        let op = chunk[0];
        let sel = chunk.get(1).copied().unwrap_or(0) as usize;
        let arg = chunk.get(2).copied().unwrap_or(0);

        match op % 7 {
            0 => {
                if signals.len() < MAX_NODES {
                    signals.push(Some(Signal::new()));
                }
            }
            1 => {
                if let Some(slot) = slot_at(&signals, &states, sel)
                    && slot.is_connected()
                {
                    let hits = Rc::clone(&hits);
                    match arg % 3 {
                        0 => slot.emplace(move || hits.set(hits.get() + 1)),
                        1 => {
                            let pad = [arg; 48];
                            slot.emplace(move || {
                                hits.set(hits.get() + u64::from(pad[0]));
                            });
                        }
                        _ => {
                            let pad = [u64::from(arg); 40];
                            slot.emplace(move || {
                                hits.set(hits.get() + pad[39]);
                            });
                        }
                    }
                }
            }
            2 => {
                if let Some(slot) = slot_at(&signals, &states, sel) {
                    slot.clear();
                }
            }
            3 => {
                if let Some(signal) = signals[sel % signals.len()].as_ref() {
                    signal.emit();
                }
            }
            4 => {
                if states.len() < MAX_NODES
                    && let Some(slot) = slot_at(&signals, &states, sel)
                {
                    states.push(State::new(&slot));
                }
            }
            5 => {
                let i = sel % signals.len();
                signals[i] = None;
            }
            _ => {
                if !states.is_empty() {
                    states.swap_remove(sel % states.len());
                }
            }
        }
    }
});
