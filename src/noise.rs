//! Randomized response for event-level attribution
//!
//! With probability `rate` a source gets a fixed set of fake reports instead
//! of truthful attribution. The output space is every way of placing up to
//! `max_reports` reports into `cardinality * windows` buckets, i.e. a
//! stars-and-bars sequence with `max_reports` stars and
//! `cardinality * windows` bars. One sequence is picked uniformly and decoded
//! through the combinatorial number system.

use crate::report_time;
use crate::types::CommonSourceInfo;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FakeReport {
    pub trigger_data: u64,
    pub report_time: DateTime<Utc>,
}

/// `None` means truthful attribution; `Some` (possibly empty) means the
/// source is noised and only these reports will ever exist for it.
pub type RandomizedResponse = Option<Vec<FakeReport>>;

/// `n choose k`, or `None` on overflow.
pub fn binomial(n: u64, k: u64) -> Option<u128> {
    if k > n {
        return Some(0);
    }
    let k = k.min(n - k);
    let mut result: u128 = 1;
    for i in 0..k {
        result = result.checked_mul(u128::from(n - i))? / u128::from(i + 1);
    }
    Some(result)
}

/// Number of distinct randomized-response outputs.
pub fn num_states(cardinality: u64, num_windows: u64, max_reports: u64) -> Option<u128> {
    let bars = cardinality.checked_mul(num_windows)?;
    binomial(bars.checked_add(max_reports)?, max_reports)
}

/// The `k`-combination `c_k > ... > c_1 >= 0` with
/// `sum(C(c_i, i)) == index`, in descending order.
pub fn k_combination_at_index(mut index: u128, k: u64) -> Vec<u64> {
    let mut combination = Vec::with_capacity(k as usize);

    for i in (1..=k).rev() {
        // Largest c with C(c, i) <= index; C(i - 1, i) == 0 always qualifies.
        let mut c = i - 1;
        while matches!(binomial(c + 1, i), Some(next) if next <= index) {
            c += 1;
        }
        index -= binomial(c, i).unwrap_or(0);
        combination.push(c);
    }
    combination
}

/// Decodes one output state into `(window_index, trigger_data)` pairs.
pub fn fake_reports_for_sequence_index(
    index: u128,
    cardinality: u64,
    max_reports: u64,
) -> Vec<(u64, u64)> {
    let stars = k_combination_at_index(index, max_reports);
    let num_stars = stars.len() as u64;

    stars
        .iter()
        .enumerate()
        .filter_map(|(i, star)| {
            let bars_preceding = star - (num_stars - 1 - i as u64);
            if bars_preceding == 0 {
                return None;
            }
            let bucket = bars_preceding - 1;
            Some((bucket / cardinality, bucket % cardinality))
        })
        .collect()
}

/// Draws a randomized response for `source`.
pub fn randomized_response<R: Rng + ?Sized>(
    rng: &mut R,
    source: &CommonSourceInfo,
    rate: f64,
    cardinality: u64,
    max_reports: u64,
) -> RandomizedResponse {
    if !(rate > 0.0) || cardinality == 0 {
        return None;
    }
    if !rng.gen_bool(rate.min(1.0)) {
        return None;
    }

    let num_windows = report_time::num_report_windows(source) as u64;
    let states = match num_states(cardinality, num_windows, max_reports) {
        Some(states) if states > 0 => states,
        _ => {
            log::warn!(
                "Randomized response state space overflows (cardinality={}, windows={}, max_reports={})",
                cardinality,
                num_windows,
                max_reports
            );
            return None;
        }
    };

    let index = rng.gen_range(0..states);
    let reports = fake_reports_for_sequence_index(index, cardinality, max_reports)
        .into_iter()
        .map(|(window, trigger_data)| FakeReport {
            trigger_data,
            report_time: report_time::report_time_at_window(source, window as usize),
        })
        .collect();
    Some(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Origin, SourceRegistration, SourceType};
    use chrono::TimeDelta;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn navigation_source() -> CommonSourceInfo {
        let reg = SourceRegistration::new(
            Origin::parse("https://a.example").unwrap(),
            Origin::parse("https://b.example").unwrap(),
            Origin::parse("https://r.example").unwrap(),
            SourceType::Navigation,
        );
        CommonSourceInfo::from_registration(reg, DateTime::from_timestamp(1_700_000_000, 0).unwrap())
    }

    #[test]
    fn test_binomial() {
        assert_eq!(binomial(27, 3), Some(2925));
        assert_eq!(binomial(5, 0), Some(1));
        assert_eq!(binomial(3, 5), Some(0));
        assert!(binomial(200, 100).is_none());
    }

    #[test]
    fn test_navigation_state_count() {
        assert_eq!(num_states(8, 3, 3), Some(2925));
        // Event sources: 2 trigger data values, 1 window, 1 report
        assert_eq!(num_states(2, 1, 1), Some(3));
    }

    #[test]
    fn test_k_combination_at_index() {
        assert_eq!(k_combination_at_index(0, 3), vec![2, 1, 0]);
        assert_eq!(k_combination_at_index(1, 3), vec![3, 1, 0]);
        assert_eq!(k_combination_at_index(2924, 3), vec![26, 25, 24]);
    }

    #[test]
    fn test_combinations_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for index in 0..2925u128 {
            let combination = k_combination_at_index(index, 3);
            assert!(combination.windows(2).all(|w| w[0] > w[1]));
            assert!(seen.insert(combination));
        }
    }

    #[test]
    fn test_decode_sequence_index() {
        assert!(fake_reports_for_sequence_index(0, 8, 3).is_empty());
        assert_eq!(fake_reports_for_sequence_index(1, 8, 3), vec![(0, 0)]);
        assert_eq!(
            fake_reports_for_sequence_index(2924, 8, 3),
            vec![(2, 7), (2, 7), (2, 7)]
        );
    }

    #[test]
    fn test_zero_rate_is_truthful() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(randomized_response(&mut rng, &navigation_source(), 0.0, 8, 3), None);
    }

    #[test]
    fn test_full_rate_always_noises() {
        let source = navigation_source();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let reports = randomized_response(&mut rng, &source, 1.0, 8, 3).unwrap();
            assert!(reports.len() <= 3);
            for report in reports {
                assert!(report.trigger_data < 8);
                assert!(report.report_time > source.source_time + TimeDelta::days(2));
                assert!(report.report_time <= source.expiry_time + TimeDelta::hours(1));
            }
        }
    }
}
