use std::sync::atomic::{AtomicUsize, Ordering};

/// The run wide episode budget, shared by every worker.
#[derive(Debug)]
pub struct EpisodeCounter {
    claimed: AtomicUsize,
    max: usize,
}

impl EpisodeCounter {
    pub fn new(max: usize) -> Self {
        Self {
            claimed: AtomicUsize::new(0),
            max,
        }
    }

    /// Claims the next episode of the budget.
    ///
    /// # Returns
    /// The index of the claimed episode, or `None` once the budget is exhausted.
    pub fn try_claim(&self) -> Option<usize> {
        self.claimed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
    }

    /// Returns the amount of episodes claimed so far.
    pub fn claimed(&self) -> usize {
        self.claimed.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use super::*;

    #[test]
    fn budget_is_exhausted_exactly_once() {
        let counter = EpisodeCounter::new(3);

        assert_eq!(counter.try_claim(), Some(0));
        assert_eq!(counter.try_claim(), Some(1));
        assert_eq!(counter.try_claim(), Some(2));
        assert_eq!(counter.try_claim(), None);
        assert_eq!(counter.claimed(), 3);
    }

    #[test]
    fn contended_claims_are_unique() {
        const MAX: usize = 1000;
        let counter = EpisodeCounter::new(MAX);

        let claims: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        let mut mine = Vec::new();
                        while let Some(episode) = counter.try_claim() {
                            mine.push(episode);
                        }
                        mine
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        let unique: HashSet<_> = claims.iter().copied().collect();
        assert_eq!(claims.len(), MAX);
        assert_eq!(unique.len(), MAX);
        assert_eq!(counter.claimed(), MAX);
    }
}
