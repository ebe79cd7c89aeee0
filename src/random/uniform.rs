//! Unbiased bounded sampling.
//!
//! Rejection method from Lemire, "Fast Random Integer
//! Generation in an Interval" (ACM TOMACS 29(1), 2019): the 128-bit product
//! `r * n` is accepted unless its low half falls below `2^64 mod n`, and the
//! high half is the result. The modulus is only computed when the low
//! half lands below `n`. Worst case rejection probability is 1/2 at
//! `n = 2^63 + 1`.

use super::csrand::csrand;

/// Uniform value in `[0, n)` from an arbitrary word source.
/// `n == 0` returns one raw, unscaled word.
pub fn uniform_with<F: FnMut() -> u64>(n: u64, mut draw: F) -> u64 {
    if n == 0 {
        return draw();
    }

    let mut product = u128::from(draw()) * u128::from(n);
    if (product as u64) < n {
        // 2^64 mod n, since (2^64 - n) mod n == 2^64 mod n
        let bound = n.wrapping_neg() % n;
        while (product as u64) < bound {
            product = u128::from(draw()) * u128::from(n);
        }
    }
    (product >> 64) as u64
}

/// Uniform value in `[min, max]` from an arbitrary word source
pub fn interval_with<F: FnMut() -> u64>(min: u64, max: u64, draw: F) -> u64 {
    debug_assert!(min <= max, "empty interval [{}, {}]", min, max);
    uniform_with(max.wrapping_sub(min).wrapping_add(1), draw).wrapping_add(min)
}

/// CS-random value uniform over `[0, n)`; `n == 0` yields a raw word
pub fn csrand_uniform(n: u64) -> u64 {
    uniform_with(n, csrand)
}

/// CS-random value uniform over `[min, max]`. Requires `min <= max`.
pub fn csrand_interval(min: u64, max: u64) -> u64 {
    interval_with(min, max, csrand)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(words: &[u64]) -> impl FnMut() -> u64 + '_ {
        let mut next = words.iter();
        move || *next.next().expect("script exhausted")
    }

    #[test]
    fn zero_bound_returns_raw_word() {
        assert_eq!(uniform_with(0, scripted(&[0xdead_beef_0000_0001])), 0xdead_beef_0000_0001);
        let _ = csrand_uniform(0);
    }

    #[test]
    fn low_product_below_bound_is_redrawn() {
        // 2^64 mod 3 == 1, so r == 0 (low half 0) must be rejected.
        let mut calls = 0;
        let mut words = scripted(&[0, u64::MAX]);
        let value = uniform_with(3, || {
            calls += 1;
            words()
        });
        assert_eq!(calls, 2);
        assert_eq!(value, 2);
    }

    #[test]
    fn power_of_two_never_rejects() {
        // 2^64 mod 8 == 0: every draw is accepted and the top bits are used.
        assert_eq!(uniform_with(8, scripted(&[0])), 0);
        assert_eq!(uniform_with(8, scripted(&[u64::MAX])), 7);
        assert_eq!(uniform_with(8, scripted(&[1 << 61])), 1);
    }

    #[test]
    fn worst_case_bound_accepts_upper_half() {
        let n = (1u64 << 63) + 1;
        assert_eq!(n.wrapping_neg() % n, (1u64 << 63) - 1);
        assert_eq!(uniform_with(n, scripted(&[u64::MAX])), n - 1);
    }

    #[test]
    fn one_bound_is_always_zero() {
        for _ in 0..100 {
            assert_eq!(csrand_uniform(1), 0);
        }
    }

    #[test]
    fn values_stay_below_bound() {
        for n in [2u64, 3, 7, 10, 1000, u64::MAX / 3, (1 << 63) + 1, u64::MAX] {
            for _ in 0..200 {
                assert!(csrand_uniform(n) < n, "out of range for n={}", n);
            }
        }
    }

    #[test]
    fn distribution_is_flat_for_non_dividing_bound() {
        const N: u64 = 6;
        const SAMPLES: usize = 60_000;
        let mut counts = [0usize; N as usize];
        for _ in 0..SAMPLES {
            counts[csrand_uniform(N) as usize] += 1;
        }

        let expected = SAMPLES as f64 / N as f64;
        let chi_square: f64 = counts
            .iter()
            .map(|&c| {
                let d = c as f64 - expected;
                d * d / expected
            })
            .sum();
        // 5 degrees of freedom; 20.5 is the p=0.001 critical value.
        assert!(chi_square < 30.0, "chi-square {} for counts {:?}", chi_square, counts);
    }

    #[test]
    fn interval_bounds_are_inclusive() {
        let mut seen = [false; 5];
        for _ in 0..2_000 {
            let v = csrand_interval(10, 14);
            assert!((10..=14).contains(&v));
            seen[(v - 10) as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(csrand_interval(42, 42), 42);
    }

    #[test]
    fn interval_is_shifted_uniform() {
        let words = [0u64, 17, u64::MAX, 1 << 40, 12345678901234567];
        for (min, max) in [(0u64, 9u64), (100, 355), (u64::MAX - 4, u64::MAX)] {
            let expected = uniform_with(max - min + 1, scripted(&words)) + min;
            assert_eq!(interval_with(min, max, scripted(&words)), expected);
        }
    }

    #[test]
    fn full_interval_maps_to_raw_word() {
        assert_eq!(interval_with(0, u64::MAX, scripted(&[77])), 77);
    }
}
