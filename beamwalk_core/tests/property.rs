use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use beamwalk_core::{
    Beamline, DelaySchedule, Document, Filters, LinearFit, SourceRef, adaptive_tolerance,
    measure_average,
};
use beamwalk_core::mocks::{FnSource, TestImager, TestMotor};
use proptest::prelude::*;

fn fit_points(points: &[(f64, f64)]) -> LinearFit {
    let mut fit = LinearFit::new("centroid", "pitch");
    for &(x, y) in points {
        let doc: Document = [("pitch".to_string(), x), ("centroid".to_string(), y)]
            .into_iter()
            .collect();
        fit.ingest(&doc);
    }
    fit
}

proptest! {
    #[test]
    fn ols_recovers_a_noiseless_line(
        slope in -1e4f64..1e4,
        intercept in -1e3f64..1e3,
        xs in proptest::collection::vec(-1e2f64..1e2, 2..20),
    ) {
        // Need a real spread in x; near-coincident abscissae make the
        // closed form cancel catastrophically and a fit meaningless.
        prop_assume!(xs.iter().any(|x| (x - xs[0]).abs() > 1.0));
        prop_assume!(slope.abs() > 1e-6);
        let points: Vec<(f64, f64)> = xs.iter().map(|&x| (x, slope * x + intercept)).collect();
        let fit = fit_points(&points);
        let result = fit.result().unwrap();
        prop_assert!((result.slope - slope).abs() <= 1e-6 * slope.abs().max(1.0));
        prop_assert!((result.intercept - intercept).abs() <= 1e-5 * intercept.abs().max(1.0));
        prop_assert!(result.r_abs > 0.999);
    }

    #[test]
    fn backsolve_is_a_right_inverse(
        slope in -1e3f64..1e3,
        intercept in -1e3f64..1e3,
        target in -1e4f64..1e4,
    ) {
        prop_assume!(slope.abs() > 1e-3);
        let fit = fit_points(&[(0.0, intercept), (1.0, slope + intercept)]);
        let x = fit.backsolve(target).unwrap();
        let y = fit.eval(x).unwrap();
        prop_assert!((y - target).abs() <= 1e-6 * target.abs().max(1.0));
    }

    #[test]
    fn adaptive_tolerance_never_undercuts_the_fixed_one(
        current in -1e6f64..1e6,
        goal in -1e6f64..1e6,
        tolerance in 1e-3f64..1e3,
        scaling in proptest::option::of(1e-3f64..1e3),
    ) {
        let selected = adaptive_tolerance(current, goal, tolerance, scaling);
        prop_assert!(selected >= tolerance);
        if scaling.is_none() {
            prop_assert!(selected == tolerance);
        }
    }

    #[test]
    fn median_ignores_rejected_samples(
        values in proptest::collection::vec(-100f64..100.0, 1..30),
    ) {
        // Reject negative readings; expect the median of the survivors.
        let accepted: Vec<f64> = values.iter().copied().filter(|v| *v >= 0.0).collect();
        prop_assume!(!accepted.is_empty());

        let queue = Rc::new(RefCell::new(values.iter().copied().collect::<VecDeque<f64>>()));
        let q = Rc::clone(&queue);
        let mut bl = Beamline::builder()
            .add_pair(TestImager::at("img1", 0.0), TestMotor::at("m1", 0.0))
            .add_extra(FnSource::new("level", "value", move || {
                q.borrow_mut().pop_front().unwrap_or(0.0)
            }))
            .build()
            .unwrap();
        let filters = Filters::new().with("level_value", |v| v >= 0.0);
        let avgs = measure_average(
            &mut bl,
            &[SourceRef::Extra(0)],
            &["value"],
            values.len(),
            &DelaySchedule::None,
            &filters,
            1,
        )
        .unwrap();

        let mut sorted = accepted.clone();
        sorted.sort_by(f64::total_cmp);
        let expected = if sorted.len() % 2 == 0 {
            (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) / 2.0
        } else {
            sorted[sorted.len() / 2]
        };
        prop_assert!((avgs[0] - expected).abs() < 1e-12);
    }
}
