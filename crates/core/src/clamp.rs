//! Aspect-preserving reduction of image dimensions to fit maximum bounds.

/// Largest edge the hardware resize and encode blocks accept.
pub const HARDWARE_MAX_EDGE: u32 = 2048;
/// Default bound for the longer side of generated images.
pub const DEFAULT_IMAGE_RES: u32 = 720;
/// Default bound used for 16:9 artwork that is at least this tall.
pub const DEFAULT_FANART_RES: u32 = 1080;

/// Shrink `width`/`height` in place so neither exceeds its bound.
///
/// The aspect ratio is kept to within one pixel of rounding. With `transposed`
/// set the bounds are compared against the swapped dimensions, matching an image
/// that is displayed rotated by 90 degrees. A zero bound leaves that axis
/// unconstrained. Returns whether the dimensions changed.
///
/// # Example
/// ```rust
/// use hwimg_core::clamp::clamp_limits;
///
/// let (mut w, mut h) = (4000, 3000);
/// assert!(clamp_limits(&mut w, &mut h, 160, 160, false));
/// assert_eq!((w, h), (160, 120));
/// ```
pub fn clamp_limits(
    width: &mut u32,
    height: &mut u32,
    max_width: u32,
    max_height: u32,
    transposed: bool,
) -> bool {
    if *width == 0 || *height == 0 {
        return false;
    }
    let (max_w, max_h) = if transposed {
        (max_height, max_width)
    } else {
        (max_width, max_height)
    };
    let max_w = if max_w == 0 { u32::MAX } else { max_w };
    let max_h = if max_h == 0 { u32::MAX } else { max_h };
    if *width <= max_w && *height <= max_h {
        return false;
    }

    let aspect = f64::from(*width) / f64::from(*height);
    let (w, h) = if (f64::from(max_w) / aspect).round() > f64::from(max_h) {
        let w = (f64::from(max_h) * aspect).round() as u32;
        (w.clamp(1, max_w), max_h)
    } else {
        let h = (f64::from(max_w) / aspect).round() as u32;
        (max_w, h.clamp(1, max_h))
    };
    *width = w;
    *height = h;
    true
}

/// Resolves default bounds for callers that ask for "whatever fits".
///
/// A zero requested bound falls back to `image_res` tall at 16:9, or to
/// `fanart_res` for 16:9 sources at least that tall. The result is then capped
/// by the display size and by `hardware_max`. An `image_res` of 0 uses
/// [`DEFAULT_IMAGE_RES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClampPolicy {
    pub image_res: u32,
    pub fanart_res: u32,
    /// Display width and height; 0 means unknown.
    pub display_width: u32,
    pub display_height: u32,
    pub hardware_max: u32,
}

impl Default for ClampPolicy {
    fn default() -> Self {
        Self {
            image_res: DEFAULT_IMAGE_RES,
            fanart_res: DEFAULT_FANART_RES,
            display_width: 0,
            display_height: 0,
            hardware_max: HARDWARE_MAX_EDGE,
        }
    }
}

impl ClampPolicy {
    /// Maximum width and height for a `source_width`x`source_height` image when
    /// the caller requested `requested_width`x`requested_height`.
    pub fn bounds_for(
        &self,
        requested_width: u32,
        requested_height: u32,
        source_width: u32,
        source_height: u32,
        transposed: bool,
    ) -> (u32, u32) {
        let (mut max_w, mut max_h) = (requested_width, requested_height);
        if max_w == 0 || max_h == 0 {
            max_h = if self.image_res == 0 {
                DEFAULT_IMAGE_RES
            } else {
                self.image_res
            };
            if self.fanart_res > self.image_res && source_height > 0 {
                let aspect = f64::from(source_width) / f64::from(source_height);
                let widescreen = (aspect / (16.0 / 9.0) - 1.0).abs() <= 0.01;
                if widescreen && source_height >= self.fanart_res {
                    max_h = self.fanart_res;
                }
            }
            max_w = u32::try_from(u64::from(max_h) * 16 / 9).unwrap_or(u32::MAX);
        }

        let (display_w, display_h) = if transposed {
            (self.display_height, self.display_width)
        } else {
            (self.display_width, self.display_height)
        };
        if display_w > 0 {
            max_w = max_w.min(display_w);
        }
        if display_h > 0 {
            max_h = max_h.min(display_h);
        }
        let cap = self.hardware_max.max(1);
        (max_w.min(cap), max_h.min(cap))
    }

    /// Clamp a source size to the bounds resolved by [`ClampPolicy::bounds_for`].
    ///
    /// Returns the target size and whether it differs from the source.
    pub fn fit(
        &self,
        source_width: u32,
        source_height: u32,
        requested_width: u32,
        requested_height: u32,
        transposed: bool,
    ) -> (u32, u32, bool) {
        let (max_w, max_h) = self.bounds_for(
            requested_width,
            requested_height,
            source_width,
            source_height,
            false,
        );
        let (mut w, mut h) = (source_width, source_height);
        let changed = clamp_limits(&mut w, &mut h, max_w, max_h, transposed);
        (w, h, changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_by_three_fits_square_box() {
        let (mut w, mut h) = (4000, 3000);
        assert!(clamp_limits(&mut w, &mut h, 160, 160, false));
        assert_eq!((w, h), (160, 120));
    }

    #[test]
    fn portrait_source_limited_by_height() {
        let (mut w, mut h) = (3000, 4000);
        assert!(clamp_limits(&mut w, &mut h, 160, 160, false));
        assert_eq!((w, h), (120, 160));
    }

    #[test]
    fn small_source_untouched() {
        let (mut w, mut h) = (100, 50);
        assert!(!clamp_limits(&mut w, &mut h, 160, 160, false));
        assert_eq!((w, h), (100, 50));
    }

    #[test]
    fn transposed_swaps_bounds() {
        let (mut w, mut h) = (4000, 3000);
        assert!(clamp_limits(&mut w, &mut h, 320, 100, true));
        assert!(w <= 100 && h <= 320);
        assert_eq!((w, h), (100, 75));
    }

    #[test]
    fn zero_bound_is_unconstrained() {
        let (mut w, mut h) = (4000, 3000);
        assert!(clamp_limits(&mut w, &mut h, 0, 300, false));
        assert_eq!((w, h), (400, 300));
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        let (mut w, mut h) = (10_000, 1);
        assert!(clamp_limits(&mut w, &mut h, 100, 100, false));
        assert_eq!((w, h), (100, 1));
    }

    #[test]
    fn policy_defaults_when_unrequested() {
        let policy = ClampPolicy::default();
        assert_eq!(policy.bounds_for(0, 0, 800, 600, false), (1280, 720));
        assert_eq!(policy.bounds_for(0, 0, 3840, 2160, false), (1920, 1080));
        assert_eq!(policy.bounds_for(4000, 4000, 10, 10, false), (2048, 2048));
    }

    #[test]
    fn policy_caps_by_display() {
        let policy = ClampPolicy {
            display_width: 1024,
            display_height: 600,
            ..ClampPolicy::default()
        };
        assert_eq!(policy.bounds_for(0, 0, 800, 600, false), (1024, 600));
        assert_eq!(policy.bounds_for(0, 0, 800, 600, true), (600, 720));
    }

    #[test]
    fn policy_fit_reports_change() {
        let policy = ClampPolicy::default();
        assert_eq!(policy.fit(4000, 3000, 160, 160, false), (160, 120, true));
        assert_eq!(policy.fit(64, 48, 160, 160, false), (64, 48, false));
    }

    #[test]
    fn huge_default_resolution_is_capped() {
        let policy = ClampPolicy {
            image_res: 300_000_000,
            fanart_res: u32::MAX,
            ..ClampPolicy::default()
        };
        assert_eq!(policy.bounds_for(0, 0, 4000, 3000, false), (2048, 2048));
    }

    mod proptests {
        use super::super::{ClampPolicy, clamp_limits};
        use proptest::prelude::*;

        fn dims() -> impl Strategy<Value = (u32, u32)> {
            (1u32..20_000, 1u32..20_000)
        }

        fn bounds() -> impl Strategy<Value = (u32, u32)> {
            (1u32..4_096, 1u32..4_096)
        }

        proptest! {
            #[test]
            fn never_exceeds_bounds((w0, h0) in dims(), (mw, mh) in bounds()) {
                let (mut w, mut h) = (w0, h0);
                clamp_limits(&mut w, &mut h, mw, mh, false);
                prop_assert!(w >= 1 && h >= 1);
                prop_assert!(w <= mw || w == w0);
                prop_assert!(h <= mh || h == h0);
                if w0 > mw || h0 > mh {
                    prop_assert!(w <= mw && h <= mh);
                }
            }

            #[test]
            fn preserves_aspect_within_a_pixel((w0, h0) in dims(), (mw, mh) in bounds()) {
                let (mut w, mut h) = (w0, h0);
                if clamp_limits(&mut w, &mut h, mw, mh, false) {
                    let aspect = f64::from(w0) / f64::from(h0);
                    let height_err = (f64::from(w) / aspect - f64::from(h)).abs();
                    let width_err = (f64::from(h) * aspect - f64::from(w)).abs();
                    prop_assert!(height_err <= 1.0 || width_err <= 1.0);
                }
            }

            #[test]
            fn transposed_matches_swapped_bounds((w0, h0) in dims(), (mw, mh) in bounds()) {
                let (mut a_w, mut a_h) = (w0, h0);
                let (mut b_w, mut b_h) = (w0, h0);
                let a = clamp_limits(&mut a_w, &mut a_h, mw, mh, true);
                let b = clamp_limits(&mut b_w, &mut b_h, mh, mw, false);
                prop_assert_eq!((a, a_w, a_h), (b, b_w, b_h));
            }

            #[test]
            fn policy_bounds_stay_under_hardware_max(
                image_res in any::<u32>(),
                fanart_res in any::<u32>(),
                (w0, h0) in dims(),
                (rw, rh) in (0u32..8_192, 0u32..8_192),
            ) {
                let policy = ClampPolicy { image_res, fanart_res, ..ClampPolicy::default() };
                let (mw, mh) = policy.bounds_for(rw, rh, w0, h0, false);
                prop_assert!(mw <= policy.hardware_max && mh <= policy.hardware_max);
                let (w, h, _) = policy.fit(w0, h0, rw, rh, false);
                prop_assert!(w <= policy.hardware_max && h <= policy.hardware_max);
            }

            #[test]
            fn idempotent((w0, h0) in dims(), (mw, mh) in bounds()) {
                let (mut w, mut h) = (w0, h0);
                clamp_limits(&mut w, &mut h, mw, mh, false);
                let (w1, h1) = (w, h);
                prop_assert!(!clamp_limits(&mut w, &mut h, mw, mh, false));
                prop_assert_eq!((w, h), (w1, h1));
            }
        }
    }
}
