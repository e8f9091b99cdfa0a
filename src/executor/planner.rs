//! Capacity-bounded batch partitioning

use crate::config::SUB_LIST_COUNT;
use crate::state::Recipient;

use std::collections::VecDeque;

/// One round's worth of recipients
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    /// Contract list arguments, filled in order
    pub sub_lists: [Vec<Recipient>; SUB_LIST_COUNT],
    /// Everything taken from the queue, in queue order
    pub consumed: Vec<Recipient>,
    /// Queue after removing `consumed`
    pub remaining: VecDeque<Recipient>,
}

impl BatchPlan {
    /// No work left in the queue
    pub fn is_empty(&self) -> bool {
        self.consumed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.consumed.len()
    }

    pub fn sizes(&self) -> [usize; SUB_LIST_COUNT] {
        let mut sizes = [0; SUB_LIST_COUNT];
        for (size, list) in sizes.iter_mut().zip(&self.sub_lists) {
            *size = list.len();
        }
        sizes
    }
}

/// Splits the pending queue into the contract's list arguments
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    capacities: [usize; SUB_LIST_COUNT],
}

impl BatchPlanner {
    pub fn new(capacities: [usize; SUB_LIST_COUNT]) -> Self {
        Self { capacities }
    }

    #[cfg(test)]
    pub fn capacities(&self) -> [usize; SUB_LIST_COUNT] {
        self.capacities
    }

    /// Largest batch a single call can carry
    #[cfg(test)]
    pub fn total_capacity(&self) -> usize {
        self.capacities.iter().sum()
    }

    /// Take up to `size` recipients from the front of `pending`.
    ///
    /// The first list is filled to capacity before the second is touched, and
    /// so on. `size` is expected to be within `total_capacity`; anything beyond
    /// it simply stays in `remaining`.
    pub fn plan(&self, mut pending: VecDeque<Recipient>, size: usize) -> BatchPlan {
        let mut sub_lists: [Vec<Recipient>; SUB_LIST_COUNT] = Default::default();
        let mut consumed = Vec::with_capacity(size.min(pending.len()));

        for (list, capacity) in sub_lists.iter_mut().zip(self.capacities) {
            while list.len() < capacity && consumed.len() < size {
                match pending.pop_front() {
                    Some(item) => {
                        consumed.push(item.clone());
                        list.push(item);
                    }
                    None => break,
                }
            }
        }

        BatchPlan {
            sub_lists,
            consumed,
            remaining: pending,
        }
    }
}

impl Default for BatchPlanner {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SUB_LIST_CAPACITIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(n: usize) -> VecDeque<Recipient> {
        (0..n)
            .map(|i| Recipient::new(&format!("SP{:04}", i)).unwrap())
            .collect()
    }

    fn assert_invariants(planner: &BatchPlanner, original: &VecDeque<Recipient>, plan: &BatchPlan, size: usize) {
        for (list, capacity) in plan.sub_lists.iter().zip(planner.capacities()) {
            assert!(list.len() <= capacity);
        }
        assert!(plan.len() <= size);
        assert_eq!(plan.sizes().iter().sum::<usize>(), plan.len());

        let rebuilt: Vec<Recipient> = plan
            .sub_lists
            .iter()
            .flatten()
            .chain(plan.remaining.iter())
            .cloned()
            .collect();
        assert_eq!(rebuilt, Vec::from(original.clone()));

        let flattened: Vec<Recipient> = plan.sub_lists.iter().flatten().cloned().collect();
        assert_eq!(flattened, plan.consumed);
    }

    #[test]
    fn test_twelve_recipients_in_two_rounds() {
        let planner = BatchPlanner::new([5, 5, 5]);

        let first = planner.plan(queue(12), 10);
        assert_eq!(first.sizes(), [5, 5, 0]);
        assert_eq!(first.remaining.len(), 2);

        let second = planner.plan(first.remaining.clone(), 10);
        assert_eq!(second.sizes(), [2, 0, 0]);
        assert!(second.remaining.is_empty());

        let third = planner.plan(second.remaining.clone(), 10);
        assert!(third.is_empty());
    }

    #[test]
    fn test_empty_queue_means_no_work() {
        let plan = BatchPlanner::default().plan(VecDeque::new(), 14995);
        assert!(plan.is_empty());
        assert_eq!(plan.sizes(), [0, 0, 0]);
        assert!(plan.remaining.is_empty());
    }

    #[test]
    fn test_full_size_batch_fills_all_lists() {
        let planner = BatchPlanner::default();
        let pending = queue(20000);
        let plan = planner.plan(pending.clone(), planner.total_capacity());

        assert_eq!(plan.sizes(), [5000, 5000, 4995]);
        assert_eq!(plan.remaining.len(), 20000 - 14995);
        assert_invariants(&planner, &pending, &plan, 14995);
    }

    #[test]
    fn test_invariants_hold_across_sizes() {
        let planner = BatchPlanner::new([3, 4, 2]);
        for len in [0usize, 1, 2, 3, 5, 8, 9, 10, 17] {
            for size in 1..=planner.total_capacity() {
                let pending = queue(len);
                let plan = planner.plan(pending.clone(), size);
                assert_invariants(&planner, &pending, &plan, size);
                assert_eq!(plan.len(), size.min(len));
            }
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let planner = BatchPlanner::new([5, 5, 5]);
        assert_eq!(planner.plan(queue(11), 7), planner.plan(queue(11), 7));
    }
}
