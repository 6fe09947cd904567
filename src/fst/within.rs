use std::collections::{BTreeSet, HashSet};

use crate::core::error::Result;
use crate::fst::reader::GraphReader;

/// One pending traversal state: node address, remaining edit budget, index
/// into the target text, accumulated label bytes.
#[derive(PartialEq, Eq, Hash)]
struct State {
    addr: u64,
    budget: i64,
    index: usize,
    sofar: Vec<u8>,
}

/// Every accepted key in `field`'s graph within `k` edits of `text`
/// (insert, delete, substitute, adjacent transpose), each exactly once, in
/// lexicographic order. `prefix` requires that many leading bytes to match
/// exactly before any edits are spent.
pub fn within(
    reader: &GraphReader,
    field: &str,
    text: &[u8],
    k: u32,
    prefix: usize,
) -> Result<Vec<Vec<u8>>> {
    let mut results: BTreeSet<Vec<u8>> = BTreeSet::new();
    let mut seen: HashSet<State> = HashSet::new();
    let mut stack: Vec<State> = Vec::new();

    let root = match reader.root(field)? {
        Some(root) => root,
        None => return Ok(Vec::new()),
    };
    let k = k as i64;
    let prefix = prefix.min(text.len());

    // Walk the required exact prefix before spending any budget.
    let mut addr = root;
    let mut sofar = Vec::new();
    let mut start = None;
    for i in 0..prefix {
        let arc = match reader.find_arc(addr, &[text[i]])? {
            Some(arc) => arc,
            None => return Ok(Vec::new()),
        };
        sofar.extend_from_slice(&arc.label);
        // A key ending inside the required prefix lacks the prefix itself.
        if arc.accept && i + 1 == prefix && (text.len() - (i + 1)) as i64 <= k {
            results.insert(sofar.clone());
        }
        match arc.target {
            Some(t) => addr = t,
            None => {
                start = Some(None);
                break;
            }
        }
    }
    if start.is_none() {
        start = Some(Some(addr));
    }
    if let Some(Some(addr)) = start {
        stack.push(State { addr, budget: k, index: prefix, sofar });
    }

    while let Some(state) = stack.pop() {
        if !seen.insert(State {
            addr: state.addr,
            budget: state.budget,
            index: state.index,
            sofar: state.sofar.clone(),
        }) {
            continue;
        }

        // Deletion: drop one text byte without consuming an arc.
        if state.index < text.len() && state.budget > 0 {
            stack.push(State {
                addr: state.addr,
                budget: state.budget - 1,
                index: state.index + 1,
                sofar: state.sofar.clone(),
            });
        }

        for arc in reader.arcs_at(state.addr)? {
            let exact = arc.label.len() == 1
                && state.index < text.len()
                && arc.label[0] == text[state.index];

            // Exact continuation costs nothing; substitution and insertion
            // each spend one unit.
            let mut moves: Vec<(i64, usize)> = Vec::new();
            if exact {
                moves.push((state.budget, state.index + 1));
            } else if state.index < text.len() {
                moves.push((state.budget - 1, state.index + 1)); // substitute
            }
            moves.push((state.budget - 1, state.index)); // insert

            for (budget, index) in moves {
                if budget < 0 {
                    continue;
                }
                let mut key = state.sofar.clone();
                key.extend_from_slice(&arc.label);
                if arc.accept && (text.len() - index) as i64 <= budget {
                    results.insert(key.clone());
                }
                if let Some(target) = arc.target {
                    stack.push(State { addr: target, budget, index, sofar: key });
                }
            }

            // Adjacent transposition: consume text[i+1] then text[i].
            if state.budget > 0
                && arc.label.len() == 1
                && state.index + 1 < text.len()
                && arc.label[0] == text[state.index + 1]
                && text[state.index] != text[state.index + 1]
            {
                if let Some(mid) = arc.target {
                    if let Some(second) = reader.find_arc(mid, &[text[state.index]])? {
                        let budget = state.budget - 1;
                        let index = state.index + 2;
                        let mut key = state.sofar.clone();
                        key.extend_from_slice(&arc.label);
                        key.extend_from_slice(&second.label);
                        if second.accept && (text.len() - index) as i64 <= budget {
                            results.insert(key.clone());
                        }
                        if let Some(target) = second.target {
                            stack.push(State { addr: target, budget, index, sofar: key });
                        }
                    }
                }
            }
        }
    }

    Ok(results.into_iter().collect())
}
