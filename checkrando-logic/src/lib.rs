pub mod compiler;
pub mod evaluator;
pub mod lexer;
pub mod macros;

use anyhow::{Context, Result};
use checkrando_game::{EdgeIdx, SceneId};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use crate::compiler::{CompileReport, LogicCompiler};
pub use crate::evaluator::LogicEvaluator;
pub use crate::macros::{MacroTable, NoSkips, SkipPredicate};

// Reserved state names produced by the `true`/`false` literals:
pub const TRUE_STATE: &str = "true";
pub const FALSE_STATE: &str = "false";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicCondition {
    pub state: String,
    pub count: u32,
}

impl LogicCondition {
    pub fn new(state: &str, count: u32) -> Self {
        LogicCondition {
            state: state.to_string(),
            count,
        }
    }
}

impl fmt::Display for LogicCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 1 {
            write!(f, "{}", self.state)
        } else {
            write!(f, "{}#{}", self.count, self.state)
        }
    }
}

/// A conjunction of conditions. The empty set is always satisfied; a set
/// containing the `false` state never is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicSet {
    pub conditions: Vec<LogicCondition>,
}

impl LogicSet {
    pub fn always() -> Self {
        LogicSet::default()
    }

    pub fn never() -> Self {
        LogicSet {
            conditions: vec![LogicCondition::new(FALSE_STATE, 1)],
        }
    }

    pub fn single(state: &str, count: u32) -> Self {
        if count == 0 || state == TRUE_STATE {
            return LogicSet::always();
        }
        LogicSet {
            conditions: vec![LogicCondition::new(state, count)],
        }
    }

    pub fn is_never(&self) -> bool {
        self.conditions.iter().any(|c| c.state == FALSE_STATE)
    }

    // Adds a condition, merging counts with an existing condition on the same state.
    pub fn add(&mut self, state: &str, count: u32) -> Result<()> {
        if count == 0 || state == TRUE_STATE {
            return Ok(());
        }
        if let Some(c) = self.conditions.iter_mut().find(|c| c.state == state) {
            c.count = c
                .count
                .checked_add(count)
                .with_context(|| format!("count of {state} overflows"))?;
        } else {
            self.conditions.push(LogicCondition::new(state, count));
        }
        Ok(())
    }

    pub fn normalized(self) -> Result<Self> {
        if self.is_never() {
            return Ok(LogicSet::never());
        }
        let mut out = LogicSet::default();
        for c in &self.conditions {
            out.add(&c.state, c.count)?;
        }
        Ok(out)
    }

    pub fn is_satisfied(&self, ctx: &dyn LogicContext) -> bool {
        !self.is_never()
            && self
                .conditions
                .iter()
                .all(|c| ctx.get_count(&c.state) >= c.count)
    }
}

impl fmt::Display for LogicSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conditions.is_empty() {
            return write!(f, "{TRUE_STATE}");
        }
        for (i, c) in self.conditions.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Drops `false` alternatives when others exist, and duplicate alternatives.
pub fn normalize_alternatives(alternatives: Vec<LogicSet>) -> Result<Vec<LogicSet>> {
    let any_possible = alternatives.iter().any(|s| !s.is_never());
    let mut out: Vec<LogicSet> = vec![];
    for set in alternatives {
        let set = set.normalized()?;
        if any_possible && set.is_never() {
            continue;
        }
        let mut key = set.conditions.clone();
        key.sort_by(|a, b| a.state.cmp(&b.state));
        let duplicate = out.iter().any(|s| {
            let mut k = s.conditions.clone();
            k.sort_by(|a, b| a.state.cmp(&b.state));
            k == key
        });
        if !duplicate {
            out.push(set);
        }
    }
    Ok(out)
}

/// The compiled output of one logic source.
#[derive(Clone, Debug, Default)]
pub struct LogicLayer {
    pub name: String,
    pub logic: HashMap<EdgeIdx, Vec<LogicSet>>,
    pub scenes: BTreeMap<SceneId, Vec<EdgeIdx>>,
}

impl LogicLayer {
    pub fn new(name: &str) -> Self {
        LogicLayer {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn get(&self, edge: EdgeIdx) -> &[LogicSet] {
        match self.logic.get(&edge) {
            Some(v) => v,
            None => &[],
        }
    }

    // Repeated statements for the same edge add alternatives.
    pub fn insert(
        &mut self,
        scene: SceneId,
        edge: EdgeIdx,
        alternatives: Vec<LogicSet>,
    ) -> Result<()> {
        let scene_edges = self.scenes.entry(scene).or_default();
        if !scene_edges.contains(&edge) {
            scene_edges.push(edge);
        }
        let entry = self.logic.entry(edge).or_default();
        entry.extend(alternatives);
        *entry = normalize_alternatives(std::mem::take(entry))?;
        Ok(())
    }

    pub fn num_edges(&self) -> usize {
        self.logic.len()
    }
}

pub trait LogicContext {
    fn get_count(&self, state: &str) -> u32;

    fn has_state(&self, state: &str) -> bool {
        self.get_count(state) >= 1
    }
}

/// Acquired logic states with counts, iterable in acquisition order.
#[derive(Clone, Debug, Default)]
pub struct StateSet {
    counts: HashMap<String, u32>,
    order: Vec<String>,
}

impl StateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, state: &str) -> bool {
        self.acquire_n(state, 1)
    }

    // Returns true if the state was not held before.
    pub fn acquire_n(&mut self, state: &str, count: u32) -> bool {
        match self.counts.get_mut(state) {
            Some(c) => {
                *c = c.saturating_add(count);
                false
            }
            None => {
                self.counts.insert(state.to_string(), count);
                self.order.push(state.to_string());
                true
            }
        }
    }

    // Sets a state to at least one, without adding to its count.
    pub fn ensure(&mut self, state: &str) -> bool {
        if self.counts.contains_key(state) {
            false
        } else {
            self.acquire(state)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.order
            .iter()
            .map(|s| (s.as_str(), self.counts.get(s).copied().unwrap_or(0)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl LogicContext for StateSet {
    fn get_count(&self, state: &str) -> u32 {
        if state == TRUE_STATE {
            return 1;
        }
        self.counts.get(state).copied().unwrap_or(0)
    }
}
