//! Conversion factors and the pixel rounding discipline.
//!
//! DVI distances are exact integers; pixels are not. All conversions go
//! through `conv`, the number of pixels per DVI unit, and the way each
//! product is rounded is part of the file format's contract: glyph motions
//! round to nearest, rule dimensions round up so that abutting rules never
//! leave a gap.

/// Pixels-per-DVI-unit factors derived from the preamble.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Conversions {
    /// Pixels per DVI unit, including magnification.
    pub conv: f64,
    /// Pixels per DVI unit at magnification 1000.
    pub true_conv: f64,
    /// The magnification actually in effect, in thousandths.
    pub magnification: i32,
}

impl Conversions {
    /// Derive the factors from the preamble parameters.
    ///
    /// One DVI unit is `numerator/denominator * 10^-7` meters; 254000 of
    /// those units of 10^-7 m make an inch. A positive
    /// `magnification_override` replaces the file's own magnification.
    pub fn new(
        numerator: i32,
        denominator: i32,
        file_magnification: i32,
        magnification_override: i32,
        display_dpi: f64,
    ) -> Self {
        let magnification = if magnification_override > 0 {
            magnification_override
        } else {
            file_magnification
        };
        let true_conv = (numerator as f64 / 254000.0) * (display_dpi / denominator as f64);
        Self {
            conv: true_conv * (magnification as f64 / 1000.0),
            true_conv,
            magnification,
        }
    }

    /// Round a DVI distance to the nearest pixel.
    pub fn pixels(&self, d: i32) -> i32 {
        round(self.conv * d as f64)
    }

    /// Round a position (which may exceed 32 bits mid-computation) to the
    /// nearest pixel.
    pub fn pixels_wide(&self, d: i64) -> i32 {
        round(self.conv * d as f64)
    }

    /// The width in pixels of a rule of DVI width `d`: the smallest integer
    /// n with `n >= conv * d`.
    ///
    /// Rounding up rather than to nearest guarantees that a rule never
    /// comes out narrower than the distance the typesetter allotted it.
    pub fn rule_pixels(&self, d: i32) -> i32 {
        let product = self.conv * d as f64;
        let truncated = product.trunc();
        if truncated < product {
            truncated as i32 + 1
        } else {
            truncated as i32
        }
    }
}

/// Round half away from zero.
pub(crate) fn round(d: f64) -> i32 {
    d.round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The factors TeX emits: 7227 pt = 254 cm and 2^16 sp = 1 pt.
    fn tex_conversions(display_dpi: f64) -> Conversions {
        Conversions::new(25400000, 473628672, 1000, 0, display_dpi)
    }

    #[test]
    fn conv_at_72_dpi() {
        let c = tex_conversions(72.0);
        // 72.27 pt per inch, 2^16 sp per pt, 72 pixels per inch.
        let sp_per_pixel = 72.27 / 72.0 * 65536.0;
        assert!((c.conv - 1.0 / sp_per_pixel).abs() < 1e-12);
        assert_eq!(c.conv, c.true_conv);
    }

    #[test]
    fn magnification_scales_conv() {
        let magnified = Conversions::new(25400000, 473628672, 2000, 0, 72.0);
        let plain = tex_conversions(72.0);
        assert!((magnified.conv - 2.0 * plain.conv).abs() < 1e-12);
        assert_eq!(magnified.true_conv, plain.true_conv);
    }

    #[test]
    fn override_replaces_file_magnification() {
        let c = Conversions::new(25400000, 473628672, 1000, 3000, 72.0);
        assert_eq!(c.magnification, 3000);
        assert!((c.conv - 3.0 * c.true_conv).abs() < 1e-12);
    }

    #[test]
    fn rule_pixels_is_a_ceiling() {
        let c = tex_conversions(72.0);
        // 10pt and 20pt rules at 72 dpi.
        for d in [655360, 1310720, 1, 65536, 654321, 999999] {
            let n = c.rule_pixels(d);
            let product = c.conv * d as f64;
            assert!(n as f64 >= product);
            assert!((n as f64) - product < 1.0, "rule_pixels({d}) = {n}");
        }
    }

    #[test]
    fn rule_pixels_exact_product_is_not_bumped() {
        let c = Conversions {
            conv: 0.5,
            true_conv: 0.5,
            magnification: 1000,
        };
        assert_eq!(c.rule_pixels(4), 2);
        assert_eq!(c.rule_pixels(5), 3);
    }

    #[test]
    fn pixel_rounding_is_half_away_from_zero() {
        let c = Conversions {
            conv: 0.5,
            true_conv: 0.5,
            magnification: 1000,
        };
        assert_eq!(c.pixels(3), 2);
        assert_eq!(c.pixels(-3), -2);
        assert_eq!(c.pixels(2), 1);
        assert_eq!(c.pixels(-2), -1);
    }
}
