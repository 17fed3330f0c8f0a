//! Pivot / support / resistance ladder derived from a window's high, low and close.
//!
//! Pure and deterministic: the same window always yields the same ladder.

/// Number of rungs on each side of the range.
pub const LADDER_DEPTH: usize = 30;

#[derive(Clone, Debug, PartialEq)]
pub struct PriceLevelSet {
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// M1..M7, the successive midpoints inside the range.
    pub mids: [f64; 7],
    pub z1: f64,
    pub pip: f64,
    /// U1..UN, resistance above the high.
    pub up: Vec<f64>,
    /// D1..DN, support below the low.
    pub down: Vec<f64>,
}

pub fn compute_levels(high: f64, low: f64, close: f64) -> PriceLevelSet {
    compute_levels_with_depth(high, low, close, LADDER_DEPTH)
}

pub fn compute_levels_with_depth(high: f64, low: f64, close: f64, depth: usize) -> PriceLevelSet {
    let (h, l) = if high < low { (low, high) } else { (high, low) };
    let c = close;

    let m1 = (h + l) / 2.0;
    let m2 = (h + m1) / 2.0;
    let m3 = (l + m1) / 2.0;
    let m4 = (h + m2) / 2.0;
    let m5 = (m2 + m1) / 2.0;
    let m6 = (m1 + m3) / 2.0;
    let m7 = (m3 + l) / 2.0;
    let z1 = (h + l + c) / 3.0;
    let pip = (h - m4).abs();

    let up = (1..=depth).map(|i| h + pip * i as f64).collect();
    let down = (1..=depth).map(|i| l - pip * i as f64).collect();

    PriceLevelSet {
        high: h,
        low: l,
        close: c,
        mids: [m1, m2, m3, m4, m5, m6, m7],
        z1,
        pip,
        up,
        down,
    }
}

impl PriceLevelSet {
    /// Every level an alert can fire on: M1..M7, Z1, then U and D ladders.
    pub fn candidates(&self) -> impl Iterator<Item = f64> + '_ {
        self.mids
            .iter()
            .copied()
            .chain(std::iter::once(self.z1))
            .chain(self.up.iter().copied())
            .chain(self.down.iter().copied())
    }

    /// Half-open proximity window of `pip / 10` around each level.
    pub fn tolerance(&self) -> f64 {
        self.pip / 10.0
    }

    /// Whether `price` is close enough to `level` to count as touching it.
    ///
    /// A flat window has a zero tolerance and never matches.
    pub fn touches(&self, price: f64, level: f64) -> bool {
        let tol = self.tolerance();
        if !(tol.is_finite() && tol > 0.0 && price.is_finite()) {
            return false;
        }
        (price - level).abs() < tol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn reference_window_produces_known_ladder() {
        let s = compute_levels(1800.0, 1750.0, 1775.0);
        let expected = [
            1775.0, 1787.5, 1762.5, 1793.75, 1781.25, 1768.75, 1756.25,
        ];
        for (got, want) in s.mids.iter().zip(expected) {
            approx(*got, want);
        }
        approx(s.z1, 1775.0);
        approx(s.pip, 6.25);
        approx(s.up[0], 1806.25);
        approx(s.down[0], 1743.75);
        approx(s.up[29], 1800.0 + 6.25 * 30.0);
        assert_eq!(s.up.len(), LADDER_DEPTH);
        assert_eq!(s.down.len(), LADDER_DEPTH);
        assert_eq!(s.candidates().count(), 8 + 2 * LADDER_DEPTH);
    }

    #[test]
    fn range_ordering_holds_across_windows() {
        let windows = [
            (1.0, 0.5, 0.7),
            (1.1025, 1.0801, 1.0950),
            (150.2, 149.9, 150.0),
            (45_000.0, 39_000.0, 44_000.0),
            (0.0001, 0.00005, 0.00007),
        ];
        for (h, l, c) in windows {
            let s = compute_levels(h, l, c);
            let m1 = s.mids[0];
            assert!(l <= m1 && m1 <= h);
            assert!(s.down[0] < l);
            assert!(h < s.up[0]);
            for w in s.up.windows(2) {
                assert!(w[0] < w[1]);
            }
            for w in s.down.windows(2) {
                assert!(w[0] > w[1]);
            }
        }
    }

    #[test]
    fn inverted_input_is_normalized() {
        let a = compute_levels(1750.0, 1800.0, 1775.0);
        let b = compute_levels(1800.0, 1750.0, 1775.0);
        assert_eq!(a, b);
    }

    #[test]
    fn flat_window_never_touches() {
        let s = compute_levels(100.0, 100.0, 100.0);
        assert_eq!(s.pip, 0.0);
        assert!(s.candidates().all(|lvl| lvl == 100.0));
        assert!(!s.touches(100.0, 100.0));
    }

    #[test]
    fn touch_window_is_strict() {
        let s = compute_levels(1800.0, 1750.0, 1775.0);
        // tolerance = 0.625
        assert!(s.touches(1806.0, 1806.25));
        assert!(!s.touches(1806.875, 1806.25));
        assert!(!s.touches(f64::NAN, 1806.25));
    }
}
