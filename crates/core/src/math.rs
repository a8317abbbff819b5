//! Special functions and root finding used by the estimators.
//!
//! Distribution quantiles come from `statrs`; the Brent solver below serves
//! the estimator-specific dual and wealth equations.

use crate::error::{OpeError, OpeResult};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::{beta, gamma};
use tracing::debug;

const MAX_ITER: usize = 100;
const XTOL: f64 = 2e-12;
const RTOL: f64 = 4.0 * f64::EPSILON;

/// Brent's method on `[a, b]` with the default tolerances.
pub fn brentq<F>(f: F, a: f64, b: f64) -> OpeResult<f64>
where
    F: Fn(f64) -> f64,
{
    brentq_with_tolerance(f, a, b, XTOL, RTOL)
}

/// Brent's method (inverse quadratic interpolation safeguarded by bisection).
///
/// Fails with [`OpeError::RootFinding`] if `f(a)` and `f(b)` share a sign or
/// the iteration cap is reached.
pub fn brentq_with_tolerance<F>(f: F, a: f64, b: f64, xtol: f64, rtol: f64) -> OpeResult<f64>
where
    F: Fn(f64) -> f64,
{
    let mut xpre = a;
    let mut xcur = b;
    let mut fpre = f(xpre);
    let mut fcur = f(xcur);

    if !fpre.is_finite() || !fcur.is_finite() {
        return Err(OpeError::RootFinding(format!(
            "objective is not finite at bracket [{a}, {b}]: f(a) = {fpre}, f(b) = {fcur}"
        )));
    }
    if fpre == 0.0 {
        return Ok(xpre);
    }
    if fcur == 0.0 {
        return Ok(xcur);
    }
    if fpre.signum() == fcur.signum() {
        return Err(OpeError::RootFinding(format!(
            "no sign change on bracket [{a}, {b}]: f(a) = {fpre}, f(b) = {fcur}"
        )));
    }

    let mut xblk = 0.0;
    let mut fblk = 0.0;
    let mut spre = 0.0;
    let mut scur = 0.0;

    for iteration in 0..MAX_ITER {
        if fpre != 0.0 && fcur != 0.0 && fpre.signum() != fcur.signum() {
            xblk = xpre;
            fblk = fpre;
            spre = xcur - xpre;
            scur = spre;
        }
        if fblk.abs() < fcur.abs() {
            xpre = xcur;
            xcur = xblk;
            xblk = xpre;

            fpre = fcur;
            fcur = fblk;
            fblk = fpre;
        }

        let delta = (xtol + rtol * xcur.abs()) / 2.0;
        let sbis = (xblk - xcur) / 2.0;
        if fcur == 0.0 || sbis.abs() < delta {
            debug!(root = xcur, iterations = iteration, "brent converged");
            return Ok(xcur);
        }

        if spre.abs() > delta && fcur.abs() < fpre.abs() {
            let stry = if xpre == xblk {
                // secant
                -fcur * (xcur - xpre) / (fcur - fpre)
            } else {
                // inverse quadratic interpolation
                let dpre = (fpre - fcur) / (xpre - xcur);
                let dblk = (fblk - fcur) / (xblk - xcur);
                -fcur * (fblk * dblk - fpre * dpre) / (dblk * dpre * (fblk - fpre))
            };
            if 2.0 * stry.abs() < spre.abs().min(3.0 * sbis.abs() - delta) {
                spre = scur;
                scur = stry;
            } else {
                spre = sbis;
                scur = sbis;
            }
        } else {
            spre = sbis;
            scur = sbis;
        }

        xpre = xcur;
        fpre = fcur;
        if scur.abs() > delta {
            xcur += scur;
        } else {
            xcur += if sbis > 0.0 { delta } else { -delta };
        }
        fcur = f(xcur);
        if !fcur.is_finite() {
            return Err(OpeError::RootFinding(format!(
                "objective became non-finite at {xcur}"
            )));
        }
    }

    Err(OpeError::RootFinding(format!(
        "brent did not converge within {MAX_ITER} iterations on [{a}, {b}]"
    )))
}

/// Quantile of the standard normal distribution, `p` in `[0, 1]`.
pub fn normal_quantile(p: f64) -> f64 {
    Normal::standard().inverse_cdf(p)
}

/// Quantile of the Beta(a, b) distribution.
pub fn beta_quantile(p: f64, a: f64, b: f64) -> OpeResult<f64> {
    if !(a > 0.0 && b > 0.0) || !a.is_finite() || !b.is_finite() {
        return Err(OpeError::Validation(format!(
            "beta shape parameters must be positive and finite, got ({a}, {b})"
        )));
    }
    if p <= 0.0 {
        return Ok(0.0);
    }
    if p >= 1.0 {
        return Ok(1.0);
    }
    let x = beta::inv_beta_reg(a, b, p);
    if !(0.0..=1.0).contains(&x) {
        return Err(OpeError::RootFinding(format!(
            "beta quantile failed for p = {p}, shape ({a}, {b})"
        )));
    }
    Ok(x)
}

/// Inverse survival function of the F distribution with `(1, dfd)` degrees
/// of freedom: the `x` with `P(F > x) = alpha`.
///
/// Uses `P(F(1, m) > x) = I_{m/(m+x)}(m/2, 1/2)`, so the root is taken on the
/// small tail of the incomplete beta where it is well conditioned.
pub fn f_isf_1(alpha: f64, dfd: f64) -> OpeResult<f64> {
    let v = beta_quantile(alpha, dfd / 2.0, 0.5)?;
    if v <= 0.0 {
        return Err(OpeError::RootFinding(format!(
            "F quantile underflow at alpha = {alpha}, dfd = {dfd}"
        )));
    }
    Ok(dfd * (1.0 - v) / v)
}

/// Exact binomial confidence interval, extended to fractional counts.
pub fn clopper_pearson(successes: f64, trials: f64, alpha: f64) -> OpeResult<(f64, f64)> {
    if !(trials > 0.0) {
        return Err(OpeError::Validation(format!(
            "clopper-pearson requires positive trials, got {trials}"
        )));
    }
    let lower = if successes <= 0.0 {
        0.0
    } else {
        beta_quantile(alpha / 2.0, successes, trials - successes + 1.0)?
    };
    let upper = if successes >= trials {
        1.0
    } else {
        beta_quantile(1.0 - alpha / 2.0, successes + 1.0, trials - successes)?
    };
    Ok((lower, upper))
}

/// `ln γ(a, x)`, the log of the (unregularized) lower incomplete gamma.
pub fn ln_lower_gamma(a: f64, x: f64) -> OpeResult<f64> {
    if !(a > 0.0 && x > 0.0) || !a.is_finite() || !x.is_finite() {
        return Err(OpeError::Validation(format!(
            "lower incomplete gamma requires a > 0 and x > 0, got ({a}, {x})"
        )));
    }
    Ok(gamma::gamma_lr(a, x).ln() + gamma::ln_gamma(a))
}

/// Trigamma function `ψ₁(x)` for `x > 0`: recurrence up to `x ≥ 10`, then the
/// asymptotic series through the `x⁻¹¹` term.
pub fn trigamma(x: f64) -> f64 {
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    let tail = 1.0 / 6.0
        - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 * (1.0 / 30.0 - inv2 * 5.0 / 66.0)));
    acc + inv + inv2 / 2.0 + inv * inv2 * tail
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() <= tol, "{a} vs {b}");
    }

    #[test]
    fn test_brentq_finds_sqrt2() {
        let root = brentq(|x| x * x - 2.0, 0.0, 2.0).unwrap();
        assert_close(root, std::f64::consts::SQRT_2, 1e-11);
    }

    #[test]
    fn test_brentq_rejects_bracket_without_sign_change() {
        let err = brentq(|x| x * x + 1.0, -1.0, 1.0).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_normal_quantile() {
        assert_close(normal_quantile(0.975), 1.959_963_984_540_054, 1e-9);
        assert_close(normal_quantile(0.5), 0.0, 1e-12);
        assert_close(normal_quantile(0.05), -1.644_853_626_951_472_2, 1e-9);
    }

    #[test]
    fn test_beta_quantile() {
        // Beta(1, 1) is uniform
        assert_close(beta_quantile(0.3, 1.0, 1.0).unwrap(), 0.3, 1e-12);
        // Beta(1, n): quantile is 1 - (1 - p)^(1/n)
        let q = beta_quantile(0.975, 1.0, 10.0).unwrap();
        assert_close(q, 1.0 - 0.025f64.powf(0.1), 1e-10);
    }

    #[test]
    fn test_beta_quantile_inverts_cdf() {
        for (a, b) in [(0.5, 0.5), (2.0, 8.0), (37.0, 964.0), (500.0, 501.0), (5000.0, 0.5)] {
            for p in [1e-6, 0.025, 0.5, 0.975] {
                let x = beta_quantile(p, a, b).unwrap();
                assert_close(beta::beta_reg(a, b, x), p, 1e-9 * p.max(1e-3));
            }
        }
        assert!(beta_quantile(0.5, 0.0, 1.0).unwrap_err().is_validation());
    }

    #[test]
    fn test_f_isf() {
        assert_close(f_isf_1(0.05, 10.0).unwrap(), 4.964_602_743_730_711, 1e-7);
        assert_close(f_isf_1(0.05, 1.0).unwrap(), 161.447_638_797_588, 1e-5);
    }

    #[test]
    fn test_clopper_pearson_edges() {
        let (lower, upper) = clopper_pearson(0.0, 10.0, 0.05).unwrap();
        assert_eq!(lower, 0.0);
        assert_close(upper, 1.0 - 0.025f64.powf(0.1), 1e-10);

        let (lower, upper) = clopper_pearson(10.0, 10.0, 0.05).unwrap();
        assert_close(lower, 0.025f64.powf(0.1), 1e-10);
        assert_eq!(upper, 1.0);

        assert!(clopper_pearson(0.0, 0.0, 0.05).is_err());
    }

    #[test]
    fn test_trigamma() {
        let pi2 = std::f64::consts::PI.powi(2);
        assert_close(trigamma(1.0), pi2 / 6.0, 1e-12);
        assert_close(trigamma(2.0), pi2 / 6.0 - 1.0, 1e-12);
        assert_close(trigamma(0.5), pi2 / 2.0, 1e-12);

        // ψ₁(10) = π²/6 - Σ_{k<10} 1/k², straddling the switch to the series
        let partial: f64 = (1..10).map(|k| 1.0 / (k * k) as f64).sum();
        assert_close(trigamma(10.0), pi2 / 6.0 - partial, 1e-12);
        assert_close(trigamma(9.5), trigamma(10.5) + 1.0 / (9.5 * 9.5), 1e-13);

        assert_close(trigamma(1000.0), 1.0 / 1000.0 + 0.5 / 1e6 + 1.0 / 6e9, 1e-15);
    }

    #[test]
    fn test_ln_lower_gamma() {
        // γ(1, x) = 1 - e^{-x}
        assert_close(ln_lower_gamma(1.0, 1.0).unwrap(), (1.0 - (-1.0f64).exp()).ln(), 1e-12);
        assert!(ln_lower_gamma(0.0, 1.0).is_err());
    }
}
