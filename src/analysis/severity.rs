/// RGB triple, 0-255 per channel.
pub type Rgb = [u8; 3];

/// Reconstruction error mapped to pure red.
pub const SEVERITY_DOMAIN_MAX: f64 = 0.015;

pub const GREEN: Rgb = [0, 255, 0];
pub const ORANGE: Rgb = [255, 165, 0];
pub const RED: Rgb = [255, 0, 0];

/// Green -> orange -> red ramp over `[0, SEVERITY_DOMAIN_MAX]`, saturating at both
/// ends. A display cue only; it is not a calibrated probability.
pub fn severity_color(error: f64) -> Rgb {
    if !error.is_finite() {
        return RED;
    }
    let t = (error / SEVERITY_DOMAIN_MAX).clamp(0.0, 1.0);
    if t <= 0.5 {
        [(2.0 * t * 255.0) as u8, (255.0 - 180.0 * t) as u8, 0]
    } else {
        let t = (t - 0.5) * 2.0;
        [255, (165.0 - 165.0 * t) as u8, 0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_hits_its_anchor_colors() {
        assert_eq!(severity_color(0.0), GREEN);
        assert_eq!(severity_color(SEVERITY_DOMAIN_MAX / 2.0), ORANGE);
        assert_eq!(severity_color(SEVERITY_DOMAIN_MAX), RED);
    }

    #[test]
    fn ramp_saturates_outside_the_domain() {
        assert_eq!(severity_color(-1.0), GREEN);
        assert_eq!(severity_color(1.0), RED);
        assert_eq!(severity_color(f64::NAN), RED);
    }

    #[test]
    fn ramp_is_monotonic_in_red_then_green() {
        let colors: Vec<Rgb> = (0..=30)
            .map(|i| severity_color(i as f64 * SEVERITY_DOMAIN_MAX / 30.0))
            .collect();
        for pair in colors.windows(2) {
            assert!(pair[1][0] >= pair[0][0]);
            assert!(pair[1][1] <= pair[0][1]);
        }
    }
}
