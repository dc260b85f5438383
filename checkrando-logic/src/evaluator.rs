use checkrando_game::EdgeIdx;

use crate::{LogicCondition, LogicContext, LogicLayer, LogicSet};

/// Answers traversal queries over an ordered stack of compiled layers. Later
/// layers only add alternatives.
#[derive(Clone, Debug, Default)]
pub struct LogicEvaluator {
    pub layers: Vec<LogicLayer>,
}

impl LogicEvaluator {
    pub fn new(layers: Vec<LogicLayer>) -> Self {
        LogicEvaluator { layers }
    }

    pub fn get_all_logic(&self, edge: EdgeIdx) -> Vec<&LogicSet> {
        self.layers.iter().flat_map(|l| l.get(edge)).collect()
    }

    pub fn is_constrained(&self, edge: EdgeIdx) -> bool {
        self.layers.iter().any(|l| !l.get(edge).is_empty())
    }

    pub fn is_false_edge(&self, edge: EdgeIdx) -> bool {
        let all = self.get_all_logic(edge);
        !all.is_empty() && all.iter().all(|s| s.is_never())
    }

    pub fn can_traverse(&self, edge: EdgeIdx, ctx: &dyn LogicContext) -> bool {
        let all = self.get_all_logic(edge);
        all.is_empty() || all.iter().any(|s| s.is_satisfied(ctx))
    }

    /// Unmet conditions of the alternative closest to being satisfied, with
    /// each count reduced to the remaining deficit. Ties prefer fewer unmet
    /// conditions, then the smaller total deficit, then the earlier alternative.
    /// Returns `None` for edges that can never be traversed.
    pub fn get_missing_logic(
        &self,
        edge: EdgeIdx,
        ctx: &dyn LogicContext,
    ) -> Option<Vec<LogicCondition>> {
        let all = self.get_all_logic(edge);
        if all.is_empty() {
            return Some(vec![]);
        }
        let mut best: Option<(usize, u32, Vec<LogicCondition>)> = None;
        for set in all {
            if set.is_never() {
                continue;
            }
            let missing: Vec<LogicCondition> = set
                .conditions
                .iter()
                .filter_map(|c| {
                    let have = ctx.get_count(&c.state);
                    if have >= c.count {
                        None
                    } else {
                        Some(LogicCondition::new(&c.state, c.count - have))
                    }
                })
                .collect();
            let deficit: u32 = missing.iter().map(|c| c.count).sum();
            let better = match &best {
                None => true,
                Some((n, d, _)) => (missing.len(), deficit) < (*n, *d),
            };
            if better {
                best = Some((missing.len(), deficit, missing));
            }
        }
        best.map(|(_, _, missing)| missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StateSet;

    fn layer(name: &str, edge: EdgeIdx, alts: Vec<LogicSet>) -> LogicLayer {
        let mut l = LogicLayer::new(name);
        l.insert(1, edge, alts).unwrap();
        l
    }

    fn set(conds: &[(&str, u32)]) -> LogicSet {
        let mut s = LogicSet::default();
        for (state, n) in conds {
            s.add(state, *n).unwrap();
        }
        s
    }

    #[test]
    fn test_layers_compose() {
        let base = layer("base", 0, vec![set(&[("Key", 2)])]);
        let skips = layer("skips", 0, vec![set(&[("Dash", 1)])]);
        let eval = LogicEvaluator::new(vec![base, skips]);
        assert_eq!(eval.get_all_logic(0).len(), 2);
        assert!(!eval.is_constrained(3));

        let mut states = StateSet::new();
        assert!(!eval.can_traverse(0, &states));
        assert!(eval.can_traverse(3, &states));
        states.acquire("Dash");
        assert!(eval.can_traverse(0, &states));
    }

    #[test]
    fn test_missing_logic() {
        let eval = LogicEvaluator::new(vec![layer(
            "base",
            0,
            vec![
                set(&[("A", 1), ("B", 1)]),
                set(&[("Key", 3)]),
                set(&[("C", 1)]),
            ],
        )]);
        let mut states = StateSet::new();
        states.acquire("Key");
        // {Key:3} and {C:1} both lack one condition; {C:1} has the smaller deficit.
        assert_eq!(
            eval.get_missing_logic(0, &states),
            Some(vec![LogicCondition::new("C", 1)])
        );
        states.acquire("Key");
        // Tied at one condition with deficit one; the earlier alternative wins.
        assert_eq!(
            eval.get_missing_logic(0, &states),
            Some(vec![LogicCondition::new("Key", 1)])
        );
    }

    #[test]
    fn test_false_edge() {
        let eval = LogicEvaluator::new(vec![layer("base", 0, vec![LogicSet::never()])]);
        let states = StateSet::new();
        assert!(eval.is_false_edge(0));
        assert!(!eval.can_traverse(0, &states));
        assert_eq!(eval.get_missing_logic(0, &states), None);

        let mut rescued = eval.clone();
        rescued.layers.push(layer("skips", 0, vec![set(&[("Clip", 1)])]));
        assert!(!rescued.is_false_edge(0));
        assert_eq!(
            rescued.get_missing_logic(0, &states),
            Some(vec![LogicCondition::new("Clip", 1)])
        );
    }
}
