use crate::color::rgb_to_hsl;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Item tier, shown in game as a coloured frame around the icon
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    #[default]
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

/// Colour window of a rarity frame.
///
/// The RGB box is a cheap pre-filter checked before the HSL conversion.
#[derive(Debug, Clone, Copy)]
pub struct BorderSpec {
    /// Inclusive hue window in degrees, `None` for achromatic frames
    pub hue: Option<(f64, f64)>,
    pub saturation: (f64, f64),
    pub lightness: (f64, f64),
    pub rgb_min: [u8; 3],
    pub rgb_max: [u8; 3],
    /// Canonical frame colour
    pub reference: [u8; 3],
}

const BORDERS: [BorderSpec; 5] = [
    // common: gray
    BorderSpec {
        hue: None,
        saturation: (0.0, 0.15),
        lightness: (0.35, 0.75),
        rgb_min: [80, 80, 80],
        rgb_max: [200, 200, 200],
        reference: [140, 140, 140],
    },
    // uncommon: green
    BorderSpec {
        hue: Some((85.0, 160.0)),
        saturation: (0.35, 1.0),
        lightness: (0.2, 0.7),
        rgb_min: [0, 90, 0],
        rgb_max: [150, 255, 160],
        reference: [60, 200, 60],
    },
    // rare: blue
    BorderSpec {
        hue: Some((195.0, 245.0)),
        saturation: (0.4, 1.0),
        lightness: (0.25, 0.75),
        rgb_min: [0, 40, 130],
        rgb_max: [140, 210, 255],
        reference: [40, 110, 230],
    },
    // epic: purple
    BorderSpec {
        hue: Some((260.0, 310.0)),
        saturation: (0.35, 1.0),
        lightness: (0.25, 0.75),
        rgb_min: [80, 0, 120],
        rgb_max: [230, 140, 255],
        reference: [160, 60, 220],
    },
    // legendary: orange / gold
    BorderSpec {
        hue: Some((20.0, 55.0)),
        saturation: (0.55, 1.0),
        lightness: (0.35, 0.75),
        rgb_min: [180, 80, 0],
        rgb_max: [255, 230, 120],
        reference: [240, 160, 30],
    },
];

impl BorderSpec {
    fn in_rgb_box(&self, rgb: [u8; 3]) -> bool {
        (0..3).all(|i| rgb[i] >= self.rgb_min[i] && rgb[i] <= self.rgb_max[i])
    }

    pub fn matches(&self, rgb: [u8; 3]) -> bool {
        if !self.in_rgb_box(rgb) {
            return false;
        }
        let hsl = rgb_to_hsl(rgb);
        let hue_ok = match self.hue {
            Some((lo, hi)) => hsl.h >= lo && hsl.h <= hi,
            None => true,
        };
        hue_ok
            && hsl.s >= self.saturation.0
            && hsl.s <= self.saturation.1
            && hsl.l >= self.lightness.0
            && hsl.l <= self.lightness.1
    }
}

impl Rarity {
    pub const ALL: [Rarity; 5] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Epic,
        Rarity::Legendary,
    ];

    pub fn border(self) -> &'static BorderSpec {
        &BORDERS[self as usize]
    }

    pub fn reference_color(self) -> [u8; 3] {
        self.border().reference
    }

    pub fn tag(self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }

    /// Classify a pixel as a frame colour. Chromatic tiers are tested before
    /// gray so a tinted pixel is never reported as common.
    pub fn classify_border(rgb: [u8; 3]) -> Option<Rarity> {
        Rarity::ALL
            .iter()
            .rev()
            .copied()
            .find(|rarity| rarity.border().matches(rgb))
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Rarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "common" => Ok(Rarity::Common),
            "uncommon" => Ok(Rarity::Uncommon),
            "rare" => Ok(Rarity::Rare),
            "epic" => Ok(Rarity::Epic),
            "legendary" => Ok(Rarity::Legendary),
            other => Err(format!("unknown rarity '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_colors_classify_to_themselves() {
        for rarity in Rarity::ALL {
            assert_eq!(
                Rarity::classify_border(rarity.reference_color()),
                Some(rarity),
                "{} reference colour misclassified",
                rarity
            );
        }
    }

    #[test]
    fn test_background_is_not_a_border() {
        assert_eq!(Rarity::classify_border([20, 22, 28]), None);
        assert_eq!(Rarity::classify_border([250, 250, 250]), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Legendary".parse::<Rarity>(), Ok(Rarity::Legendary));
        assert!("mythic".parse::<Rarity>().is_err());
    }
}
