/// Weighted random choice over a changing set of items. Picks are driven by an
/// externally supplied uniform draw so the caller controls the stream.
#[derive(Clone, Debug)]
pub struct WeightedSet<T> {
    items: Vec<T>,
    weights: Vec<f64>,
    cumulative: Vec<f64>,
}

impl<T> Default for WeightedSet<T> {
    fn default() -> Self {
        WeightedSet {
            items: vec![],
            weights: vec![],
            cumulative: vec![],
        }
    }
}

impl<T: PartialEq> WeightedSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, weight: f64, item: T) {
        assert!(
            weight > 0.0 && weight.is_finite(),
            "invalid sampling weight {weight}"
        );
        let total = self.total() + weight;
        self.items.push(item);
        self.weights.push(weight);
        self.cumulative.push(total);
    }

    pub fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    pub fn pick_index(&self, t: f64) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        let target = t * self.total();
        match self.cumulative.iter().position(|&c| c >= target) {
            Some(i) => Some(i),
            // Rounding error
            None => Some(self.items.len() - 1),
        }
    }

    pub fn pick(&self, t: f64) -> Option<&T> {
        self.pick_index(t).map(|i| &self.items[i])
    }

    pub fn remove_at(&mut self, idx: usize) -> T {
        let item = self.items.remove(idx);
        self.weights.remove(idx);
        self.cumulative.remove(idx);
        let mut total = if idx == 0 {
            0.0
        } else {
            self.cumulative[idx - 1]
        };
        for i in idx..self.cumulative.len() {
            total += self.weights[i];
            self.cumulative[i] = total;
        }
        item
    }

    pub fn remove(&mut self, item: &T) -> bool {
        match self.items.iter().position(|x| x == item) {
            Some(idx) => {
                self.remove_at(idx);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> + '_ {
        self.items.iter().zip(self.weights.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_bands() {
        let mut set = WeightedSet::new();
        set.add(1.0, 0);
        set.add(2.0, 1);
        set.add(3.0, 2);
        assert_eq!(set.total(), 6.0);
        for (t, expected) in [
            (0.0, 0),
            (0.1, 0),
            (0.16, 0),
            (0.2, 1),
            (0.4, 1),
            (0.5, 1),
            (0.51, 2),
            (0.99, 2),
        ] {
            assert_eq!(set.pick(t), Some(&expected), "t = {t}");
        }
    }

    #[test]
    fn test_remove() {
        let mut set = WeightedSet::new();
        set.add(1.0, "a");
        set.add(2.0, "b");
        set.add(3.0, "c");
        assert!(set.remove(&"b"));
        assert!(!set.remove(&"b"));
        assert_eq!(set.total(), 4.0);
        for i in 0..100 {
            let t = i as f64 / 100.0;
            assert_ne!(set.pick(t), Some(&"b"));
        }
        assert_eq!(set.pick(0.25), Some(&"a"));
        assert_eq!(set.pick(0.26), Some(&"c"));
        set.remove_at(0);
        assert_eq!(set.pick(0.0), Some(&"c"));
        set.remove(&"c");
        assert!(set.is_empty());
        assert_eq!(set.pick(0.5), None);
    }

    #[test]
    #[should_panic]
    fn test_zero_weight_rejected() {
        let mut set = WeightedSet::new();
        set.add(0.0, 1);
    }
}
