//! Quality ladder policy: which renditions to produce for a given source.

use serde::{Deserialize, Serialize};

/// One resolution/bitrate target of the ladder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rendition {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
}

impl Rendition {
    /// Bandwidth advertised in the master manifest, in bits per second.
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.bitrate_kbps) * 1000
    }
}

struct Tier {
    name: &'static str,
    height: u32,
    bitrate_kbps: u32,
}

const TIERS: [Tier; 4] = [
    Tier {
        name: "240p",
        height: 240,
        bitrate_kbps: 500,
    },
    Tier {
        name: "480p",
        height: 480,
        bitrate_kbps: 1500,
    },
    Tier {
        name: "720p",
        height: 720,
        bitrate_kbps: 3000,
    },
    Tier {
        name: "1080p",
        height: 1080,
        bitrate_kbps: 5000,
    },
];

pub const ORIGINAL_NAME: &str = "original";
pub const ORIGINAL_BITRATE_KBPS: u32 = 8000;

/// Compute the ordered (ascending height) rendition list for a source.
///
/// Every standard tier not taller than the source is kept, scaled to the
/// source aspect ratio with the width snapped to the nearest even value.
/// An `original` entry at source size is appended unless a tier already
/// matches the source height. Both dimensions of every entry are even.
pub fn quality_ladder(source_width: u32, source_height: u32) -> Vec<Rendition> {
    if source_width == 0 || source_height == 0 {
        return Vec::new();
    }

    let mut ladder: Vec<Rendition> = TIERS
        .iter()
        .filter(|tier| tier.height <= source_height)
        .map(|tier| Rendition {
            name: tier.name.to_string(),
            width: scaled_even_width(tier.height, source_width, source_height),
            height: round_down_even(tier.height),
            bitrate_kbps: tier.bitrate_kbps,
        })
        .collect();

    let original_height = round_down_even(source_height);
    if !ladder.iter().any(|r| r.height == original_height) {
        ladder.push(Rendition {
            name: ORIGINAL_NAME.to_string(),
            width: round_down_even(source_width),
            height: original_height,
            bitrate_kbps: ORIGINAL_BITRATE_KBPS,
        });
    }

    ladder
}

/// `height * source_width / source_height` rounded to the nearest even
/// integer, never below 2.
fn scaled_even_width(height: u32, source_width: u32, source_height: u32) -> u32 {
    let numerator = u64::from(height) * u64::from(source_width) + u64::from(source_height);
    let halves = numerator / (2 * u64::from(source_height));
    u32::try_from(halves * 2).unwrap_or(u32::MAX - 1).max(2)
}

fn round_down_even(value: u32) -> u32 {
    value - value % 2
}
