//! Critique pairing: round-robin, agent i critiques agent (i+1) mod N.

/// `(critic, target)` index pairs for `n` agents.
///
/// For n ≥ 2 every agent gives and receives exactly one critique and
/// nobody critiques itself. For n < 2 there is nothing to pair.
pub fn critique_pairs(n: usize) -> Vec<(usize, usize)> {
    if n < 2 {
        return Vec::new();
    }
    (0..n).map(|i| (i, (i + 1) % n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_pairs_below_two() {
        assert!(critique_pairs(0).is_empty());
        assert!(critique_pairs(1).is_empty());
    }

    #[test]
    fn two_agents_critique_each_other() {
        assert_eq!(critique_pairs(2), vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn every_agent_has_one_critic_and_one_target() {
        for n in 2..12 {
            let pairs = critique_pairs(n);
            let mut gives = vec![0; n];
            let mut receives = vec![0; n];
            for (critic, target) in pairs {
                assert_ne!(critic, target, "n={n}: self critique");
                gives[critic] += 1;
                receives[target] += 1;
            }
            assert!(gives.iter().all(|&c| c == 1), "n={n}: {gives:?}");
            assert!(receives.iter().all(|&c| c == 1), "n={n}: {receives:?}");
        }
    }
}
