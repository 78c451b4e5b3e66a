/// Hue in degrees [0, 360), saturation and lightness in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
}

pub fn rgb_to_hsl(rgb: [u8; 3]) -> Hsl {
    let r = rgb[0] as f64 / 255.0;
    let g = rgb[1] as f64 / 255.0;
    let b = rgb[2] as f64 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    let d = max - min;

    if d < 1e-9 {
        return Hsl { h: 0.0, s: 0.0, l };
    }

    let s = d / (1.0 - (2.0 * l - 1.0).abs());
    let h = if max == r {
        60.0 * (((g - b) / d).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / d + 2.0)
    } else {
        60.0 * ((r - g) / d + 4.0)
    };

    Hsl {
        h: h.rem_euclid(360.0),
        s: s.clamp(0.0, 1.0),
        l,
    }
}

/// HSL saturation of a pixel, in [0, 1]
pub fn saturation(rgb: [u8; 3]) -> f64 {
    rgb_to_hsl(rgb).s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_hues() {
        assert!((rgb_to_hsl([255, 0, 0]).h - 0.0).abs() < 1e-6);
        assert!((rgb_to_hsl([0, 255, 0]).h - 120.0).abs() < 1e-6);
        assert!((rgb_to_hsl([0, 0, 255]).h - 240.0).abs() < 1e-6);
        assert!((rgb_to_hsl([255, 0, 0]).s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_gray_is_unsaturated() {
        let hsl = rgb_to_hsl([128, 128, 128]);
        assert_eq!(hsl.s, 0.0);
        assert!((hsl.l - 128.0 / 255.0).abs() < 1e-9);
    }
}
