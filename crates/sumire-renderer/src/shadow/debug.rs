//! Debug visualisation settings and CPU-side light mask statistics.

use std::str::FromStr;

use super::light_mask::LightMask;

/// What the composition pass overlays on the final image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowDebugView {
    #[default]
    None,
    Hzb,
    LightCount,
    LightCulling,
}

impl FromStr for ShadowDebugView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "hzb" => Ok(Self::Hzb),
            "light_count" | "lightcount" => Ok(Self::LightCount),
            "light_culling" | "lightculling" => Ok(Self::LightCulling),
            other => Err(format!("unknown debug view '{other}'")),
        }
    }
}

/// Which buffer the light count view reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightCountSource {
    #[default]
    LightMask,
    TileGroupLightMask,
    EarlyList,
    FinalList,
    ApproxEarlyDifference,
}

/// Per-tile light counts of a generated light mask.
#[derive(Debug, Clone, PartialEq)]
pub struct LightMaskStats {
    pub counts: Vec<u32>,
    pub max: u32,
    pub mean: f32,
    pub empty_tiles: usize,
}

impl LightMaskStats {
    pub fn from_mask(mask: &LightMask) -> Self {
        let counts: Vec<u32> = mask.tiles.iter().map(|t| t.light_count()).collect();
        let max = counts.iter().copied().max().unwrap_or(0);
        let total: u64 = counts.iter().map(|&c| c as u64).sum();
        let mean = if counts.is_empty() { 0.0 } else { total as f32 / counts.len() as f32 };
        let empty_tiles = counts.iter().filter(|&&c| c == 0).count();
        Self { counts, max, mean, empty_tiles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_of_hand_built_mask() {
        let mut mask = LightMask::new(64, 32);
        mask.tile_mut(0, 0).set_light_bit(0);
        mask.tile_mut(0, 0).set_light_bit(40);
        mask.tile_mut(0, 0).set_light_bit(41);

        let stats = LightMaskStats::from_mask(&mask);
        assert_eq!(stats.counts, vec![3, 0]);
        assert_eq!(stats.max, 3);
        assert_eq!(stats.mean, 1.5);
        assert_eq!(stats.empty_tiles, 1);
    }

    #[test]
    fn test_debug_view_parse() {
        assert_eq!("HZB".parse::<ShadowDebugView>(), Ok(ShadowDebugView::Hzb));
        assert_eq!("light_count".parse::<ShadowDebugView>(), Ok(ShadowDebugView::LightCount));
        assert!("bogus".parse::<ShadowDebugView>().is_err());
    }
}
