//! User-facing progression derived from a continuous rating.
//!
//! The rating scale is cut into [`LEVELS`] equal, contiguous bands. The level is the index of the
//! band a rating falls in and the XP is how far through that band it sits, as a percentage. The
//! top band is closed at both ends so that a perfect rating reads as level 8 with full XP.

use crate::rating::{round2, RATING_MAX, RATING_MIN};
use serde::{Deserialize, Serialize};

pub const LEVELS: u8 = 8;

const BAND_WIDTH: f64 = (RATING_MAX - RATING_MIN) / LEVELS as f64;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Progress {
    /// 1 through [`LEVELS`].
    pub level: u8,
    /// Percentage of the way to the next level, 0 through 100.
    pub xp: f64,
}

/// Derive the level and XP for `rating`.
///
/// Out-of-range ratings are clamped first; a NaN rating reads as the bottom of the scale.
pub fn progress(rating: f64) -> Progress {
    let rating = if rating.is_nan() {
        RATING_MIN
    } else {
        rating.clamp(RATING_MIN, RATING_MAX)
    };

    let band = (((rating - RATING_MIN) / BAND_WIDTH).floor() as u8).min(LEVELS - 1);
    let band_min = RATING_MIN + band as f64 * BAND_WIDTH;
    let xp = round2(100.0 * (rating - band_min) / BAND_WIDTH);
    Progress {
        level: band + 1,
        xp: xp.clamp(0.0, 100.0),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn band_boundaries() {
        assert_eq!(progress(0.0), Progress { level: 1, xp: 0.0 });
        assert_eq!(progress(12.5), Progress { level: 2, xp: 0.0 });
        assert_eq!(progress(25.0), Progress { level: 3, xp: 0.0 });
        assert_eq!(progress(50.0), Progress { level: 5, xp: 0.0 });
        assert_eq!(progress(87.5), Progress { level: 8, xp: 0.0 });
    }

    #[test]
    fn top_of_scale_is_full_level_8() {
        assert_eq!(
            progress(100.0),
            Progress {
                level: 8,
                xp: 100.0
            }
        );
    }

    #[test]
    fn within_band() {
        assert_eq!(progress(56.0), Progress { level: 5, xp: 48.0 });
        assert_eq!(progress(12.49), Progress { level: 1, xp: 99.92 });
        assert_eq!(progress(93.75), Progress { level: 8, xp: 50.0 });
    }

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(progress(-4.0), Progress { level: 1, xp: 0.0 });
        assert_eq!(
            progress(140.0),
            Progress {
                level: 8,
                xp: 100.0
            }
        );
        assert_eq!(progress(f64::NAN), Progress { level: 1, xp: 0.0 });
    }

    #[test]
    fn total_over_domain() {
        for i in 0..=10_000 {
            let r = i as f64 / 100.0;
            let p = progress(r);
            assert!((1..=LEVELS).contains(&p.level), "{r} => {p:?}");
            assert!((0.0..=100.0).contains(&p.xp), "{r} => {p:?}");
        }
    }
}
