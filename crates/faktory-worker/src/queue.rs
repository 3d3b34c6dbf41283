//! Queue-priority policies used to order the queue list passed to `FETCH`.

use rand::seq::SliceRandom;
use rand::Rng;

/// How [`select_queues`] orders the queue list before each `FETCH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Always the configured order.
    Strict,
    /// A uniform random permutation each call.
    Uniform,
    /// Efraimidis–Spirakis weighted reservoir sampling.
    Weighted,
}

/// Orders `queues` according to `priority`. `weights` must be `Some` and
/// the same length as `queues` when `priority` is [`Priority::Weighted`]
/// (that invariant is enforced at `Consumer` construction, not here).
pub fn select_queues<R: Rng>(
    queues: &[String],
    priority: Priority,
    weights: Option<&[f64]>,
    rng: &mut R,
) -> Vec<String> {
    match priority {
        Priority::Strict => queues.to_vec(),
        Priority::Uniform => {
            let mut shuffled = queues.to_vec();
            shuffled.shuffle(rng);
            shuffled
        }
        Priority::Weighted => {
            let weights = weights.expect("weighted priority requires weights");
            weighted_shuffle(queues, weights, rng)
        }
    }
}

/// Efraimidis–Spirakis weighted shuffle: for each item, draw `u ~ U(0,1)`
/// and key it by `u^(1/w)`; return items sorted by key descending. This is
/// the correct formula (`u^w`, seen in some reference implementations of
/// this algorithm, biases toward low-weight items and is wrong).
fn weighted_shuffle<R: Rng>(items: &[String], weights: &[f64], rng: &mut R) -> Vec<String> {
    debug_assert_eq!(items.len(), weights.len());
    let mut keyed: Vec<(f64, &String)> = items
        .iter()
        .zip(weights.iter())
        .map(|(item, &w)| {
            let u: f64 = rng.gen_range(f64::EPSILON..1.0);
            let key = if w > 0.0 { u.powf(1.0 / w) } else { f64::MIN };
            (key, item)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    keyed.into_iter().map(|(_, item)| item.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strict_priority_never_reorders() {
        let q = queues(&["a", "b", "c"]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..5 {
            assert_eq!(select_queues(&q, Priority::Strict, None, &mut rng), q);
        }
    }

    #[test]
    fn uniform_priority_visits_every_position_roughly_equally() {
        let q = queues(&["a", "b", "c"]);
        let mut rng = StdRng::seed_from_u64(42);
        let samples = 30_000;
        let mut first_position_counts = std::collections::HashMap::new();
        for _ in 0..samples {
            let order = select_queues(&q, Priority::Uniform, None, &mut rng);
            *first_position_counts.entry(order[0].clone()).or_insert(0) += 1;
        }
        let expected = samples as f64 / q.len() as f64;
        for name in &q {
            let count = *first_position_counts.get(name).unwrap_or(&0) as f64;
            assert!(
                (count - expected).abs() / expected < 0.1,
                "queue {name} appeared first {count} times, expected ~{expected}"
            );
        }
    }

    #[test]
    fn weighted_priority_favors_heavier_queues_in_first_position() {
        let q = queues(&["a", "b", "c"]);
        let weights = vec![0.5, 0.3, 0.2];
        let mut rng = StdRng::seed_from_u64(7);
        let samples = 10_000;
        let mut first_position_counts = std::collections::HashMap::new();
        for _ in 0..samples {
            let order = select_queues(&q, Priority::Weighted, Some(&weights), &mut rng);
            *first_position_counts.entry(order[0].clone()).or_insert(0) += 1;
        }
        for (name, weight) in q.iter().zip(weights.iter()) {
            let freq = *first_position_counts.get(name).unwrap_or(&0) as f64 / samples as f64;
            assert!(
                (freq - weight).abs() < 0.1,
                "queue {name} had frequency {freq}, expected ~{weight}"
            );
        }
    }
}
