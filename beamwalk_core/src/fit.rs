//! Online models fitted from the event stream.
//!
//! `LinearFit` maintains a closed-form ordinary-least-squares line of one
//! dependent field against one independent field. Incoming event documents
//! are filtered, cached, and compressed through a per-event averaging window
//! before a point enters the fit. Running sums keep the slope/intercept/|r|
//! update O(1) per point; a reset recomputes them from the surviving buffer.
//!
//! `TwoPitchFit` is the two-mirror variant: centroid = x0 + a0·x1 + a1·x2,
//! solved through the 3x3 normal equations. Its backsolve pins one pitch at
//! the type level, so "exactly one variable fixed" cannot be violated at
//! runtime.

use tracing::{debug, warn};

use crate::error::AlignError;
use crate::filters::Filters;
use crate::stream::{Document, EventWatcher};

/// Frozen coefficients of the most recent fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitResult {
    pub slope: f64,
    pub intercept: f64,
    /// |r|, clamped to [0, 1]. Zero when either variance vanishes.
    pub r_abs: f64,
}

pub struct LinearFit {
    y_field: String,
    x_field: String,
    average: usize,
    /// Recompute cadence in points; `None` defers to an explicit
    /// [`update_fit`](Self::update_fit) call at end of run.
    update_every: Option<usize>,
    filters: Filters,
    avg_cache: Vec<(f64, f64)>,
    xs: Vec<f64>,
    ys: Vec<f64>,
    sx: f64,
    sy: f64,
    sxx: f64,
    syy: f64,
    sxy: f64,
    points_since_fit: usize,
    result: Option<FitResult>,
}

impl core::fmt::Debug for LinearFit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinearFit")
            .field("y", &self.y_field)
            .field("x", &self.x_field)
            .field("points", &self.xs.len())
            .field("result", &self.result)
            .finish()
    }
}

impl LinearFit {
    /// Fit `y_field` against `x_field`, updating on every averaged point.
    pub fn new(y_field: impl Into<String>, x_field: impl Into<String>) -> Self {
        Self {
            y_field: y_field.into(),
            x_field: x_field.into(),
            average: 1,
            update_every: Some(1),
            filters: Filters::new(),
            avg_cache: Vec::new(),
            xs: Vec::new(),
            ys: Vec::new(),
            sx: 0.0,
            sy: 0.0,
            sxx: 0.0,
            syy: 0.0,
            sxy: 0.0,
            points_since_fit: 0,
            result: None,
        }
    }

    /// Average this many event documents into one fitted point.
    pub fn with_average(mut self, average: usize) -> Self {
        self.average = average.max(1);
        self
    }

    pub fn with_update_every(mut self, update_every: Option<usize>) -> Self {
        self.update_every = update_every.map(|n| n.max(1));
        self
    }

    /// Install additional gates applied before a document enters the
    /// averaging cache.
    pub fn install_filters(&mut self, filters: Filters) {
        self.filters.install(filters);
    }

    pub fn x_field(&self) -> &str {
        &self.x_field
    }

    pub fn y_field(&self) -> &str {
        &self.y_field
    }

    /// Number of averaged points currently in the fit buffer.
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    pub fn result(&self) -> Option<&FitResult> {
        self.result.as_ref()
    }

    /// Fitted points as (sequence, x, y); the sequence number reflects the
    /// averaged series, not the raw event count.
    pub fn points(&self) -> impl Iterator<Item = (usize, f64, f64)> + '_ {
        self.xs
            .iter()
            .zip(self.ys.iter())
            .enumerate()
            .map(|(i, (x, y))| (i + 1, *x, *y))
    }

    /// Ingest one event document.
    pub fn ingest(&mut self, doc: &Document) {
        if !self.filters.passes(doc) {
            return;
        }
        let (Some(x), Some(y)) = (doc.get(&self.x_field), doc.get(&self.y_field)) else {
            return;
        };
        self.avg_cache.push((*x, *y));
        if self.avg_cache.len() < self.average {
            return;
        }
        let n = self.avg_cache.len() as f64;
        let (sx, sy) = self
            .avg_cache
            .iter()
            .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        self.avg_cache.clear();
        self.push_point(sx / n, sy / n);
    }

    fn push_point(&mut self, x: f64, y: f64) {
        self.xs.push(x);
        self.ys.push(y);
        self.sx += x;
        self.sy += y;
        self.sxx += x * x;
        self.syy += y * y;
        self.sxy += x * y;
        self.points_since_fit += 1;
        if let Some(every) = self.update_every
            && self.points_since_fit >= every
        {
            self.update_fit();
        }
    }

    /// Recompute slope/intercept/|r| from the running sums. A fit exists only
    /// once two distinct-x points have been ingested.
    pub fn update_fit(&mut self) {
        self.points_since_fit = 0;
        let n = self.xs.len() as f64;
        if self.xs.len() < 2 {
            self.result = None;
            return;
        }
        let var_x = n * self.sxx - self.sx * self.sx;
        if var_x.abs() < f64::EPSILON * n * n {
            // All x coincide; a vertical line has no slope.
            self.result = None;
            return;
        }
        let cov = n * self.sxy - self.sx * self.sy;
        let slope = cov / var_x;
        let intercept = (self.sy - slope * self.sx) / n;
        let var_y = n * self.syy - self.sy * self.sy;
        let r_abs = if var_y <= 0.0 {
            // Horizontal data: correlation is undefined, report none.
            0.0
        } else {
            (cov / (var_x * var_y).sqrt()).abs().min(1.0)
        };
        debug!(slope, intercept, r_abs, points = self.xs.len(), "fit updated");
        self.result = Some(FitResult {
            slope,
            intercept,
            r_abs,
        });
    }

    /// Predict y at `x` from the current fit.
    pub fn eval(&self, x: f64) -> Result<f64, AlignError> {
        let fit = self
            .result
            .as_ref()
            .ok_or(AlignError::NoFit("eval requires an updated fit"))?;
        Ok(fit.slope * x + fit.intercept)
    }

    /// Find the x that reaches `target`; the right-inverse of [`eval`](Self::eval).
    pub fn backsolve(&self, target: f64) -> Result<f64, AlignError> {
        let fit = self
            .result
            .as_ref()
            .ok_or(AlignError::NoFit("backsolve requires an updated fit"))?;
        if fit.slope == 0.0 {
            // Horizontal: nothing to invert, even when the intercept already
            // sits on the target.
            return Err(AlignError::BacksolveUndefined {
                target,
                points: self.xs.len(),
            });
        }
        Ok((target - fit.intercept) / fit.slope)
    }

    /// Discard everything but the most recent point and invalidate the fit.
    /// Used when correlation collapses and the walk reseeds.
    pub fn reset_keep_last(&mut self) {
        warn!(
            dropped = self.xs.len().saturating_sub(1),
            "fit buffers reset"
        );
        let last = self.xs.pop().zip(self.ys.pop());
        self.xs.clear();
        self.ys.clear();
        self.avg_cache.clear();
        self.sx = 0.0;
        self.sy = 0.0;
        self.sxx = 0.0;
        self.syy = 0.0;
        self.sxy = 0.0;
        self.points_since_fit = 0;
        self.result = None;
        if let Some((x, y)) = last {
            self.push_point(x, y);
            // A single point cannot carry a fit.
            self.result = None;
        }
    }
}

impl EventWatcher for LinearFit {
    fn event(&mut self, doc: &Document) {
        self.ingest(doc);
    }
}

/// Which mirror is held fixed while backsolving a [`TwoPitchFit`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PinnedPitch {
    First(f64),
    Second(f64),
}

/// Two-mirror centroid model: y = x0 + a0·x1 + a1·x2.
pub struct TwoPitchFit {
    y_field: String,
    a0_field: String,
    a1_field: String,
    average: usize,
    avg_cache: Vec<(f64, f64, f64)>,
    samples: Vec<(f64, f64, f64)>,
    coeffs: Option<[f64; 3]>,
}

impl TwoPitchFit {
    pub fn new(
        y_field: impl Into<String>,
        a0_field: impl Into<String>,
        a1_field: impl Into<String>,
    ) -> Self {
        Self {
            y_field: y_field.into(),
            a0_field: a0_field.into(),
            a1_field: a1_field.into(),
            average: 1,
            avg_cache: Vec::new(),
            samples: Vec::new(),
            coeffs: None,
        }
    }

    pub fn with_average(mut self, average: usize) -> Self {
        self.average = average.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fitted coefficients [x0, x1, x2], if the system was solvable.
    pub fn coefficients(&self) -> Option<[f64; 3]> {
        self.coeffs
    }

    pub fn ingest(&mut self, doc: &Document) {
        let (Some(a0), Some(a1), Some(y)) = (
            doc.get(&self.a0_field),
            doc.get(&self.a1_field),
            doc.get(&self.y_field),
        ) else {
            return;
        };
        self.avg_cache.push((*a0, *a1, *y));
        if self.avg_cache.len() < self.average {
            return;
        }
        let n = self.avg_cache.len() as f64;
        let (sa0, sa1, sy) = self
            .avg_cache
            .iter()
            .fold((0.0, 0.0, 0.0), |(p, q, r), (a, b, c)| {
                (p + a, q + b, r + c)
            });
        self.avg_cache.clear();
        self.samples.push((sa0 / n, sa1 / n, sy / n));
        self.update_fit();
    }

    /// Solve the normal equations for [x0, x1, x2]; requires three samples
    /// spanning both pitch axes.
    fn update_fit(&mut self) {
        if self.samples.len() < 3 {
            self.coeffs = None;
            return;
        }
        // Normal matrix for the design [1, a0, a1].
        let mut m = [[0.0f64; 3]; 3];
        let mut v = [0.0f64; 3];
        for &(a0, a1, y) in &self.samples {
            let row = [1.0, a0, a1];
            for i in 0..3 {
                for j in 0..3 {
                    m[i][j] += row[i] * row[j];
                }
                v[i] += row[i] * y;
            }
        }
        self.coeffs = solve3(m, v);
    }

    pub fn eval(&self, a0: f64, a1: f64) -> Result<f64, AlignError> {
        let [x0, x1, x2] = self
            .coeffs
            .ok_or(AlignError::NoFit("eval requires an updated fit"))?;
        Ok(x0 + a0 * x1 + a1 * x2)
    }

    /// Solve for the free pitch that reaches `target` with the other pinned.
    pub fn backsolve(&self, target: f64, pinned: PinnedPitch) -> Result<f64, AlignError> {
        let [x0, x1, x2] = self
            .coeffs
            .ok_or(AlignError::NoFit("backsolve requires an updated fit"))?;
        let (fixed_term, divisor) = match pinned {
            PinnedPitch::First(a0) => (a0 * x1, x2),
            PinnedPitch::Second(a1) => (a1 * x2, x1),
        };
        if divisor == 0.0 {
            return Err(AlignError::BacksolveUndefined {
                target,
                points: self.samples.len(),
            });
        }
        Ok((target - x0 - fixed_term) / divisor)
    }
}

impl EventWatcher for TwoPitchFit {
    fn event(&mut self, doc: &Document) {
        self.ingest(doc);
    }
}

/// Gaussian elimination with partial pivoting on a 3x3 system.
fn solve3(mut m: [[f64; 3]; 3], mut v: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        v.swap(col, pivot);
        for row in col + 1..3 {
            let f = m[row][col] / m[col][col];
            for k in col..3 {
                m[row][k] -= f * m[col][k];
            }
            v[row] -= f * v[col];
        }
    }
    let mut out = [0.0; 3];
    for row in (0..3).rev() {
        let mut acc = v[row];
        for k in row + 1..3 {
            acc -= m[row][k] * out[k];
        }
        out[row] = acc / m[row][row];
    }
    Some(out)
}

/// Order models by how closely they predict `target` at `x`, best first.
/// Models that cannot produce an estimate are dropped.
pub fn rank_models<'a>(models: &[&'a LinearFit], x: f64, target: f64) -> Vec<&'a LinearFit> {
    let mut scored: Vec<(f64, &LinearFit)> = models
        .iter()
        .filter_map(|m| m.eval(x).ok().map(|est| ((est - target).abs(), *m)))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.into_iter().map(|(_, m)| m).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(x: f64, y: f64) -> Document {
        [("pitch".to_string(), x), ("centroid".to_string(), y)]
            .into_iter()
            .collect()
    }

    fn fit_of(points: &[(f64, f64)]) -> LinearFit {
        let mut f = LinearFit::new("centroid", "pitch");
        for &(x, y) in points {
            f.ingest(&doc(x, y));
        }
        f
    }

    #[test]
    fn two_distinct_points_reproduce_themselves() {
        let f = fit_of(&[(1.0, 3.0), (2.0, 5.0)]);
        let r = f.result().unwrap();
        assert!((r.slope - 2.0).abs() < 1e-12);
        assert!((r.intercept - 1.0).abs() < 1e-12);
        assert!((f.eval(1.0).unwrap() - 3.0).abs() < 1e-12);
        assert!((f.eval(2.0).unwrap() - 5.0).abs() < 1e-12);
        assert!((r.r_abs - 1.0).abs() < 1e-12);
    }

    #[test]
    fn backsolve_is_right_inverse_of_eval() {
        let f = fit_of(&[(0.0, 2.0), (1.0, 7.0), (2.0, 12.0)]);
        for target in [-3.0, 0.0, 2.0, 240.0] {
            let x = f.backsolve(target).unwrap();
            assert!((f.eval(x).unwrap() - target).abs() < 1e-9);
        }
    }

    #[test]
    fn no_fit_before_two_points() {
        let f = fit_of(&[(1.0, 1.0)]);
        assert!(f.result().is_none());
        assert!(matches!(f.eval(0.0), Err(AlignError::NoFit(_))));
    }

    #[test]
    fn coincident_x_never_fits() {
        let f = fit_of(&[(1.0, 1.0), (1.0, 5.0), (1.0, 9.0)]);
        assert!(f.result().is_none());
    }

    #[test]
    fn horizontal_fit_refuses_backsolve() {
        let f = fit_of(&[(0.0, 4.0), (1.0, 4.0), (2.0, 4.0)]);
        let r = f.result().unwrap();
        assert_eq!(r.slope, 0.0);
        assert_eq!(r.r_abs, 0.0);
        assert!(matches!(
            f.backsolve(9.0),
            Err(AlignError::BacksolveUndefined { .. })
        ));
        // Even a target on the line is refused; the inversion is undefined.
        assert!(matches!(
            f.backsolve(4.0),
            Err(AlignError::BacksolveUndefined { .. })
        ));
    }

    #[test]
    fn averaging_window_compresses_events() {
        let mut f = LinearFit::new("centroid", "pitch").with_average(2);
        f.ingest(&doc(0.0, 0.0));
        assert_eq!(f.len(), 0);
        f.ingest(&doc(2.0, 4.0));
        assert_eq!(f.len(), 1);
        let (seq, x, y) = f.points().next().unwrap();
        assert_eq!(seq, 1);
        assert!((x - 1.0).abs() < 1e-12);
        assert!((y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn null_cadence_defers_until_update_fit() {
        let mut f = LinearFit::new("centroid", "pitch").with_update_every(None);
        f.ingest(&doc(0.0, 1.0));
        f.ingest(&doc(1.0, 3.0));
        assert!(f.result().is_none());
        f.update_fit();
        assert!((f.result().unwrap().slope - 2.0).abs() < 1e-12);
    }

    #[test]
    fn filters_gate_the_cache() {
        let mut f = LinearFit::new("centroid", "pitch");
        f.install_filters(Filters::new().with("centroid", |y| y >= 0.0));
        f.ingest(&doc(0.0, -1.0));
        f.ingest(&doc(0.0, f64::NAN));
        assert!(f.is_empty());
        f.ingest(&doc(0.0, 1.0));
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn reset_keeps_only_the_latest_point() {
        let mut f = fit_of(&[(0.0, 0.0), (1.0, 2.0), (2.0, 4.0)]);
        assert!(f.result().is_some());
        f.reset_keep_last();
        assert_eq!(f.len(), 1);
        assert!(f.result().is_none());
        let (_, x, y) = f.points().next().unwrap();
        assert_eq!((x, y), (2.0, 4.0));
        // The fit recovers once fresh points arrive.
        f.ingest(&doc(3.0, 7.0));
        assert!((f.result().unwrap().slope - 3.0).abs() < 1e-9);
    }

    #[test]
    fn two_pitch_fit_solves_the_plane() {
        let mut f = TwoPitchFit::new("centroid", "m1_pitch", "m2_pitch");
        // y = 10 + 2*a0 - 3*a1
        for (a0, a1) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (2.0, 2.0)] {
            let d: Document = [
                ("m1_pitch".to_string(), a0),
                ("m2_pitch".to_string(), a1),
                ("centroid".to_string(), 10.0 + 2.0 * a0 - 3.0 * a1),
            ]
            .into_iter()
            .collect();
            f.ingest(&d);
        }
        let [x0, x1, x2] = f.coefficients().unwrap();
        assert!((x0 - 10.0).abs() < 1e-9);
        assert!((x1 - 2.0).abs() < 1e-9);
        assert!((x2 + 3.0).abs() < 1e-9);

        let a1 = f.backsolve(0.0, PinnedPitch::First(1.0)).unwrap();
        assert!((f.eval(1.0, a1).unwrap()).abs() < 1e-9);
        let a0 = f.backsolve(4.0, PinnedPitch::Second(2.0)).unwrap();
        assert!((f.eval(a0, 2.0).unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn two_pitch_fit_needs_span() {
        let mut f = TwoPitchFit::new("centroid", "a", "b");
        for a in [0.0, 1.0, 2.0] {
            let d: Document = [
                ("a".to_string(), a),
                ("b".to_string(), 0.0),
                ("centroid".to_string(), a),
            ]
            .into_iter()
            .collect();
            f.ingest(&d);
        }
        // a1 never moved; the plane is underdetermined.
        assert!(f.coefficients().is_none());
    }

    #[test]
    fn rank_orders_by_prediction_error() {
        let good = fit_of(&[(0.0, 0.0), (1.0, 10.0)]);
        let bad = fit_of(&[(0.0, 5.0), (1.0, 6.0)]);
        let empty = LinearFit::new("centroid", "pitch");
        let ranked = rank_models(&[&bad, &empty, &good], 2.0, 20.0);
        assert_eq!(ranked.len(), 2);
        assert!(std::ptr::eq(ranked[0], &good));
        assert!(std::ptr::eq(ranked[1], &bad));
    }
}
