//! Energy-efficiency metric derivation
//!
//! Pure functions over whatever telemetry survived collection. A metric is
//! either derived from real inputs or left unset; nothing is estimated.

use crate::telemetry::{AccountingRecord, TimelineSeries};
use serde::{Deserialize, Serialize};

/// Derived energy-efficiency metrics; each independently optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// Energy to solution (J)
    pub energy_to_solution_j: Option<f64>,
    /// Time to solution (s)
    pub time_to_solution_s: Option<f64>,
    /// Average power (W)
    pub average_power_w: Option<f64>,
    /// Peak power (W)
    pub peak_power_w: Option<f64>,
    /// Energy-delay product (J*s)
    pub energy_delay_product: Option<f64>,
    /// Throughput per watt
    pub performance_per_watt: Option<f64>,
}

impl DerivedMetrics {
    /// Whether no metric could be derived
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Trapezoidal integral of `(t, p)` points; `None` below two points
pub fn trapezoid<I>(points: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut points = points.into_iter();
    let mut prev = points.next()?;
    let mut total = 0.0;
    let mut segments = 0usize;

    for (t, p) in points {
        total += (t - prev.0) * (p + prev.1) / 2.0;
        prev = (t, p);
        segments += 1;
    }

    (segments > 0).then_some(total)
}

/// Derive metrics from the available telemetry
pub fn compute(
    accounting: Option<&AccountingRecord>,
    timeline: Option<&TimelineSeries>,
    throughput: Option<f64>,
) -> DerivedMetrics {
    let timeline = timeline.filter(|series| !series.is_empty());
    let timeline_span = timeline.and_then(TimelineSeries::span);

    let accounted_elapsed = accounting.and_then(|acc| acc.elapsed_secs);
    let time_to_solution = match (accounted_elapsed, timeline_span) {
        // A zero elapsed time is a sub-second job; prefer a real span
        (Some(elapsed), Some(span)) if elapsed <= 0.0 && span > 0.0 => Some(span),
        (Some(elapsed), _) => Some(elapsed),
        (None, span) => span,
    };

    let energy_to_solution = accounting
        .and_then(AccountingRecord::consumed_energy_joules)
        .filter(|joules| *joules > 0.0)
        .or_else(|| timeline.and_then(|series| trapezoid(series.power_points())));

    let average_power = match (energy_to_solution, time_to_solution) {
        (Some(energy), Some(time)) if time > 0.0 => Some(energy / time),
        _ => None,
    };

    let performance_per_watt = match (throughput, average_power) {
        (Some(work), Some(power)) if power > 0.0 => Some(work / power),
        _ => None,
    };

    DerivedMetrics {
        energy_to_solution_j: energy_to_solution,
        time_to_solution_s: time_to_solution,
        average_power_w: average_power,
        peak_power_w: timeline.and_then(TimelineSeries::peak_power),
        energy_delay_product: energy_to_solution
            .zip(time_to_solution)
            .map(|(energy, time)| energy * time),
        performance_per_watt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::JobId;
    use crate::scheduler::AccountingSnapshot;
    use proptest::prelude::*;

    fn timeline(text: &str) -> TimelineSeries {
        TimelineSeries::parse(text).unwrap()
    }

    fn accounting(elapsed: Option<f64>, raw: Option<f64>, normalized: Option<f64>) -> AccountingRecord {
        AccountingRecord {
            elapsed_secs: elapsed,
            energy_raw_joules: raw,
            energy_normalized_joules: normalized,
            ..Default::default()
        }
    }

    #[test]
    fn test_accounting_only() {
        let acc = accounting(Some(923.0), Some(125_600.0), None);
        let m = compute(Some(&acc), None, None);

        assert_eq!(m.time_to_solution_s, Some(923.0));
        assert_eq!(m.energy_to_solution_j, Some(125_600.0));
        let avg = m.average_power_w.unwrap();
        assert!((avg - 136.07).abs() < 0.01, "average power {}", avg);
        assert_eq!(m.peak_power_w, None);
        assert_eq!(m.energy_delay_product, Some(125_600.0 * 923.0));
        assert_eq!(m.performance_per_watt, None);
    }

    #[test]
    fn test_timeline_only_trapezoid() {
        let series = timeline("time,power\n0,10\n1,20\n2,10\n");
        let m = compute(None, Some(&series), None);

        assert_eq!(m.time_to_solution_s, Some(2.0));
        assert_eq!(m.energy_to_solution_j, Some(30.0));
        assert_eq!(m.average_power_w, Some(15.0));
        assert_eq!(m.peak_power_w, Some(20.0));
    }

    #[test]
    fn test_nothing_available() {
        assert!(compute(None, None, Some(10.0)).is_empty());
        let empty = timeline("time,power\n");
        assert!(compute(None, Some(&empty), None).is_empty());
    }

    #[test]
    fn test_single_sample_timeline() {
        let series = timeline("time,power\n5,42\n");
        let m = compute(None, Some(&series), None);
        assert_eq!(m.time_to_solution_s, Some(0.0));
        assert_eq!(m.energy_to_solution_j, None);
        assert_eq!(m.average_power_w, None);
        assert_eq!(m.peak_power_w, Some(42.0));
    }

    #[test]
    fn test_accounting_energy_preferred_over_timeline() {
        let acc = accounting(Some(4.0), None, Some(400.0));
        let series = timeline("time,power\n0,10\n2,10\n");
        let m = compute(Some(&acc), Some(&series), Some(50.0));

        assert_eq!(m.energy_to_solution_j, Some(400.0));
        assert_eq!(m.time_to_solution_s, Some(4.0));
        assert_eq!(m.average_power_w, Some(100.0));
        assert_eq!(m.performance_per_watt, Some(0.5));
        assert_eq!(m.peak_power_w, Some(10.0));
    }

    #[test]
    fn test_zero_elapsed_defers_to_timeline_span() {
        let acc = accounting(Some(0.0), Some(30.0), None);
        let series = timeline("time,power\n0,10\n3,10\n");
        let m = compute(Some(&acc), Some(&series), None);
        assert_eq!(m.time_to_solution_s, Some(3.0));
        assert_eq!(m.average_power_w, Some(10.0));

        // Without a timeline the zero stands and no power is derived
        let m = compute(Some(&acc), None, None);
        assert_eq!(m.time_to_solution_s, Some(0.0));
        assert_eq!(m.average_power_w, None);
        assert_eq!(m.energy_delay_product, Some(0.0));
    }

    #[test]
    fn test_zero_accounting_energy_is_not_a_reading() {
        let acc = accounting(Some(10.0), Some(0.0), None);
        let m = compute(Some(&acc), None, Some(100.0));
        assert_eq!(m.energy_to_solution_j, None);
        assert_eq!(m.average_power_w, None);
        assert_eq!(m.performance_per_watt, None);
        assert_eq!(m.time_to_solution_s, Some(10.0));
    }

    #[test]
    fn test_zero_power_timeline_has_no_performance_per_watt() {
        let series = timeline("time,power\n0,0\n4,0\n");
        let m = compute(None, Some(&series), Some(100.0));
        assert_eq!(m.energy_to_solution_j, Some(0.0));
        assert_eq!(m.average_power_w, Some(0.0));
        assert_eq!(m.performance_per_watt, None);
    }

    #[test]
    fn test_sacct_energy_sentinels_defer_to_timeline() {
        let series = timeline("time,power\n0,10\n1,20\n2,10\n");
        for energy in ["0|0", "|18446744073709551614"] {
            let raw = format!("4242|COMPLETED|0:0|00:00:02|01:00:00|2.4GHz|{}\n", energy);
            let snapshot = AccountingSnapshot::parse(&JobId::new("4242"), &raw).unwrap();
            let acc = AccountingRecord::from_snapshot(&snapshot);

            let m = compute(Some(&acc), Some(&series), None);
            assert_eq!(m.energy_to_solution_j, Some(30.0), "sacct energy {:?}", energy);
            assert_eq!(m.time_to_solution_s, Some(2.0));
            assert_eq!(m.average_power_w, Some(15.0));
            assert_eq!(m.energy_delay_product, Some(60.0));
        }
    }

    #[test]
    fn test_trapezoid() {
        assert_eq!(trapezoid(Vec::new()), None);
        assert_eq!(trapezoid(vec![(0.0, 5.0)]), None);
        assert_eq!(trapezoid(vec![(0.0, 0.0), (2.0, 10.0)]), Some(10.0));
    }

    fn series_from(points: &[(f64, f64)]) -> TimelineSeries {
        let mut text = String::from("time,power\n");
        for (t, p) in points {
            text.push_str(&format!("{},{}\n", t, p));
        }
        timeline(&text)
    }

    fn populated(m: &DerivedMetrics) -> [bool; 6] {
        [
            m.energy_to_solution_j.is_some(),
            m.time_to_solution_s.is_some(),
            m.average_power_w.is_some(),
            m.peak_power_w.is_some(),
            m.energy_delay_product.is_some(),
            m.performance_per_watt.is_some(),
        ]
    }

    proptest! {
        #[test]
        fn prop_more_telemetry_never_unsets_a_metric(
            elapsed in prop::option::of(0.0f64..1e4),
            energy in prop::option::of(0.0f64..1e7),
            steps in prop::collection::vec((0.0f64..10.0, 0.0f64..500.0), 1..12),
            throughput in 1.0f64..1e6,
        ) {
            let acc = accounting(elapsed, energy, None);
            let mut t = 0.0;
            let mut points = Vec::new();
            for (dt, p) in &steps {
                points.push((t, *p));
                t += dt;
            }
            let series = series_from(&points);

            // Bit 0: accounting, bit 1: timeline, bit 2: throughput
            let run = |mask: u8| {
                compute(
                    (mask & 1 != 0).then_some(&acc),
                    (mask & 2 != 0).then_some(&series),
                    (mask & 4 != 0).then_some(throughput),
                )
            };
            for smaller in 0u8..8 {
                for larger in 0u8..8 {
                    if smaller & !larger != 0 {
                        continue;
                    }
                    let before = populated(&run(smaller));
                    let after = populated(&run(larger));
                    for (field, (was, is)) in before.iter().zip(after.iter()).enumerate() {
                        prop_assert!(
                            !*was || *is,
                            "field {} lost going from inputs {:03b} to {:03b}",
                            field,
                            smaller,
                            larger
                        );
                    }
                }
            }
        }

        #[test]
        fn prop_energy_monotonic_in_power(
            steps in prop::collection::vec((0.1f64..10.0, 0.0f64..500.0), 2..40),
            bump in 0.1f64..100.0,
        ) {
            let mut t = 0.0;
            let mut base = Vec::new();
            for (dt, p) in &steps {
                base.push((t, *p));
                t += dt;
            }
            let raised: Vec<(f64, f64)> = base.iter().map(|(t, p)| (*t, p + bump)).collect();

            let low = compute(None, Some(&series_from(&base)), None);
            let high = compute(None, Some(&series_from(&raised)), None);
            prop_assert!(high.energy_to_solution_j.unwrap() >= low.energy_to_solution_j.unwrap());
        }

        #[test]
        fn prop_average_power_times_time_is_energy(
            elapsed in 0.001f64..1e6,
            energy in 1.0f64..1e9,
        ) {
            let acc = accounting(Some(elapsed), Some(energy), None);
            let m = compute(Some(&acc), None, None);
            let avg = m.average_power_w.unwrap();
            let tts = m.time_to_solution_s.unwrap();
            let ets = m.energy_to_solution_j.unwrap();
            prop_assert!((avg * tts - ets).abs() <= 1e-9 * ets.max(1.0));
        }
    }
}
