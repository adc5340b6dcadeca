//! # Faddeeva 函数
//!
//! w(z) = exp(−z²)·erfc(−iz)，用于 Voigt 线形计算。
//! 使用 Humlíček W4 有理逼近（相对误差约 1e-4），分四个区域求值。
//!
//! ## 参考
//! - J. Humlíček, J. Quant. Spectrosc. Radiat. Transfer 27, 437 (1982)
//!
//! ## 依赖关系
//! - 被 `deconv/profile.rs` 调用
//! - 使用 `num-complex` 进行复数运算

use num_complex::Complex64;

/// 计算 Faddeeva 函数 w(z)
pub fn faddeeva(z: Complex64) -> Complex64 {
    if z.im < 0.0 {
        // w(z) = 2·exp(−z²) − w(−z)
        let minus = -z;
        return 2.0 * (-(z * z)).exp() - humlicek_w4(minus.re, minus.im);
    }
    humlicek_w4(z.re, z.im)
}

/// 上半平面 (y ≥ 0) 的 Humlíček W4 逼近
fn humlicek_w4(x: f64, y: f64) -> Complex64 {
    let t = Complex64::new(y, -x);
    let s = x.abs() + y;

    if s >= 15.0 {
        // 区域 I
        t * 0.5641896 / (0.5 + t * t)
    } else if s >= 5.5 {
        // 区域 II
        let u = t * t;
        t * (1.410474 + u * 0.5641896) / (0.75 + u * (3.0 + u))
    } else if y >= 0.195 * x.abs() - 0.176 {
        // 区域 III
        let num = 16.4955 + t * (20.20933 + t * (11.96482 + t * (3.778987 + t * 0.5642236)));
        let den = 16.4955
            + t * (38.82363 + t * (39.27121 + t * (21.69274 + t * (6.699398 + t))));
        num / den
    } else {
        // 区域 IV
        let u = t * t;
        let num = t
            * (36183.31
                - u * (3321.9905
                    - u * (1540.787 - u * (219.0313 - u * (35.76683 - u * (1.320522 - u * 0.56419))))));
        let den = 32066.6
            - u * (24322.84
                - u * (9022.228
                    - u * (2186.181 - u * (364.2191 - u * (61.57037 - u * (1.841439 - u))))));
        u.exp() - num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_w_at_origin() {
        let w = faddeeva(Complex64::new(0.0, 0.0));
        assert!((w.re - 1.0).abs() < 1e-4);
        assert!(w.im.abs() < 1e-4);
    }

    #[test]
    fn test_real_axis_is_gaussian() {
        // Re w(x) = exp(−x²) on the real axis
        for &x in &[0.3_f64, 0.8, 1.5, 2.5, 4.0] {
            let w = faddeeva(Complex64::new(x, 0.0));
            let expected = (-x * x).exp();
            assert!(
                (w.re - expected).abs() < 2e-4,
                "x = {}: {} vs {}",
                x,
                w.re,
                expected
            );
        }
    }

    #[test]
    fn test_imaginary_axis() {
        // w(iy) = exp(y²)·erfc(y); erfc(1)·e ≈ 0.427584
        let w = faddeeva(Complex64::new(0.0, 1.0));
        assert!((w.re - 0.427584).abs() < 2e-4);
    }

    #[test]
    fn test_asymptotic_region() {
        // large |z|: w(z) ≈ i/(√π z)
        let z = Complex64::new(20.0, 1.0);
        let w = faddeeva(z);
        let approx = Complex64::new(0.0, 1.0) / (std::f64::consts::PI.sqrt() * z);
        assert!((w - approx).norm() < 1e-4);
    }
}
