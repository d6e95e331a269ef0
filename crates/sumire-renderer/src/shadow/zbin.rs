//! Logarithmic depth binning of the sorted light list.
//!
//! Each slice stores the smallest and largest index (into the depth-sorted
//! light list) of the lights overlapping it. The ranged fields widen those
//! bounds across empty slices so the shader can query any contiguous depth
//! range with a single lookup per end.

use bytemuck::{Pod, Zeroable};

use super::view_space_light::ViewSpaceLight;

/// Number of depth slices between the camera near and far planes.
pub const NUM_SLICES: usize = 1024;

/// One zBin slice as laid out in the GPU buffer (16 bytes). -1 means unset.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ZBinSlice {
    pub min_light_idx: i32,
    pub max_light_idx: i32,
    pub ranged_min_light_idx: i32,
    pub ranged_max_light_idx: i32,
}

impl ZBinSlice {
    pub const UNSET: Self = Self {
        min_light_idx: -1,
        max_light_idx: -1,
        ranged_min_light_idx: -1,
        ranged_max_light_idx: -1,
    };
}

impl Default for ZBinSlice {
    fn default() -> Self {
        Self::UNSET
    }
}

/// Log-depth slice mapping for a near/far pair.
///
/// `slice(z) = floor(ln(z) * scale - bias)` with
/// `scale = N / ln(far / near)` and `bias = N * ln(near) / ln(far / near)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceMapping {
    pub scale: f32,
    pub bias: f32,
}

impl SliceMapping {
    pub fn new(near: f32, far: f32) -> Self {
        let log_far_near = (far / near).ln();
        Self {
            scale: NUM_SLICES as f32 / log_far_near,
            bias: NUM_SLICES as f32 * near.ln() / log_far_near,
        }
    }

    /// Slice index for a view-space depth, clamped to `[-1, NUM_SLICES]`.
    ///
    /// -1 flags "before the first slice", `NUM_SLICES` flags "beyond the last".
    /// Depths at or behind the eye map to -1.
    pub fn slice(&self, depth: f32) -> i32 {
        let slice = (depth.ln() * self.scale - self.bias).floor();
        if slice.is_nan() {
            return -1;
        }
        (slice as i32).clamp(-1, NUM_SLICES as i32)
    }
}

/// Per-frame zBin. Rebuilt in full by `generate`.
#[derive(Debug, Clone)]
pub struct ZBin {
    pub min_light: i32,
    pub max_light: i32,
    pub first_full_idx: i32,
    pub last_full_idx: i32,
    pub data: Vec<ZBinSlice>,
}

impl Default for ZBin {
    fn default() -> Self {
        Self::new()
    }
}

impl ZBin {
    pub fn new() -> Self {
        Self {
            min_light: -1,
            max_light: -1,
            first_full_idx: -1,
            last_full_idx: -1,
            data: vec![ZBinSlice::UNSET; NUM_SLICES],
        }
    }

    pub fn reset(&mut self) {
        self.data.fill(ZBinSlice::UNSET);
        self.min_light = -1;
        self.max_light = -1;
        self.first_full_idx = -1;
        self.last_full_idx = -1;
    }

    /// Bin `lights` (ascending `min_depth`) into slices between `near` and `far`.
    ///
    /// Out-of-order input is not detected and yields a non-conservative zBin.
    pub fn generate(&mut self, lights: &[ViewSpaceLight<'_>], near: f32, far: f32) {
        self.reset();

        if lights.is_empty() {
            return;
        }

        debug_assert!(
            lights.windows(2).all(|w| w[0].min_depth <= w[1].min_depth),
            "zBin input must be sorted by min depth"
        );

        let mapping = SliceMapping::new(near, far);
        let intervals = lights
            .iter()
            .map(|l| (mapping.slice(l.min_depth), mapping.slice(l.max_depth)));

        self.bin_intervals(intervals);
        self.fill_explicit_ranges();
        self.fill_gaps();
    }

    /// Record each light's `[min_slice, max_slice]` interval.
    fn bin_intervals(&mut self, intervals: impl Iterator<Item = (i32, i32)>) {
        for (i, (min_slice, max_slice)) in intervals.enumerate() {
            let i = i as i32;

            if min_slice < NUM_SLICES as i32 && max_slice >= 0 {
                if self.min_light == -1 {
                    self.min_light = i;
                }
                self.max_light = i;
            }

            let first = min_slice.max(0);
            let last = max_slice.min(NUM_SLICES as i32 - 1);
            for j in first..=last {
                let slice = &mut self.data[j as usize];
                if slice.min_light_idx == -1 || i < slice.min_light_idx {
                    slice.min_light_idx = i;
                }
                slice.max_light_idx = slice.max_light_idx.max(i);

                if self.first_full_idx == -1 || j < self.first_full_idx {
                    self.first_full_idx = j;
                }
                self.last_full_idx = self.last_full_idx.max(j);
            }
        }
    }

    /// Ranged bounds from each populated slice and its neighbour.
    ///
    /// A missing neighbour (unset or past either end) falls back to the
    /// slice's own bound, so every populated slice ends up with both ranged
    /// fields set.
    fn fill_explicit_ranges(&mut self) {
        let last = NUM_SLICES - 1;
        for j in 0..NUM_SLICES {
            let curr = self.data[j].min_light_idx;
            if curr != -1 {
                let next = if j != last { self.data[j + 1].min_light_idx } else { -1 };
                let next = if next == -1 { curr } else { next };
                self.data[j].ranged_min_light_idx = curr.min(next);
            }

            let curr = self.data[j].max_light_idx;
            if curr != -1 {
                let prev = if j != 0 { self.data[j - 1].max_light_idx } else { -1 };
                let prev = if prev == -1 { curr } else { prev };
                self.data[j].ranged_max_light_idx = curr.max(prev);
            }
        }
    }

    /// Propagate the nearest defined ranged bound into empty slices.
    ///
    /// Mins sweep from the far end toward the eye (gaps take the bound of the
    /// next populated slice behind them); maxes sweep outward from the eye.
    fn fill_gaps(&mut self) {
        let last = NUM_SLICES - 1;
        let mut min_idx_cache = self.max_light;
        let mut max_idx_cache = self.min_light;

        for max_ptr in 0..NUM_SLICES {
            let min_ptr = last - max_ptr;

            if (min_ptr as i32) <= self.last_full_idx {
                let curr = self.data[min_ptr].ranged_min_light_idx;
                if curr == -1 {
                    self.data[min_ptr].ranged_min_light_idx = min_idx_cache;
                } else if min_ptr == 0 || self.data[min_ptr - 1].ranged_min_light_idx == -1 {
                    min_idx_cache = curr;
                }
            }

            if self.first_full_idx != -1 && (max_ptr as i32) >= self.first_full_idx {
                let curr = self.data[max_ptr].ranged_max_light_idx;
                if curr == -1 {
                    self.data[max_ptr].ranged_max_light_idx = max_idx_cache;
                } else if max_ptr == last || self.data[max_ptr + 1].ranged_max_light_idx == -1 {
                    max_idx_cache = curr;
                }
            }
        }
    }

    /// Raw bytes for upload into the zBin storage buffer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Light;
    use glam::{Mat4, Vec3};

    const NEAR: f32 = 0.1;
    const FAR: f32 = 1000.0;

    fn view_light(light: &Light, depth: f32) -> ViewSpaceLight<'_> {
        ViewSpaceLight {
            id: 0,
            light,
            view_space_position: Vec3::new(0.0, 0.0, -depth),
            view_space_depth: depth,
            min_depth: depth - light.range,
            max_depth: depth + light.range,
        }
    }

    fn assert_all_unset(zbin: &ZBin) {
        assert_eq!(zbin.min_light, -1);
        assert_eq!(zbin.max_light, -1);
        assert_eq!(zbin.first_full_idx, -1);
        assert_eq!(zbin.last_full_idx, -1);
        assert!(zbin.data.iter().all(|s| *s == ZBinSlice::UNSET));
    }

    // ============================================================
    // Slice mapping
    // ============================================================

    #[test]
    fn test_slice_mapping_endpoints() {
        let m = SliceMapping::new(NEAR, FAR);
        // 1024 slices over four decades: 256 slices per decade
        assert!((m.scale - 256.0 / 10f32.ln()).abs() < 1e-3);
        assert!((m.bias + 256.0).abs() < 1e-3);
        assert_eq!(m.slice(NEAR * 1.0001), 0);
        assert_eq!(m.slice(FAR * 0.9999), NUM_SLICES as i32 - 1);
        assert_eq!(m.slice(FAR * 2.0), NUM_SLICES as i32);
        assert_eq!(m.slice(NEAR * 0.5), -1);
    }

    #[test]
    fn test_slice_mapping_non_positive_depth() {
        let m = SliceMapping::new(NEAR, FAR);
        assert_eq!(m.slice(0.0), -1);
        assert_eq!(m.slice(-5.0), -1);
    }

    // ============================================================
    // Empty input
    // ============================================================

    #[test]
    fn test_empty_input_yields_unset_bins() {
        let mut zbin = ZBin::new();
        zbin.generate(&[], NEAR, FAR);
        assert_all_unset(&zbin);
    }

    #[test]
    fn test_empty_input_resets_prior_state() {
        let light = Light::point(Vec3::ZERO, 2.0);
        let lights = [view_light(&light, 10.0)];
        let mut zbin = ZBin::new();
        zbin.generate(&lights, NEAR, FAR);
        assert_ne!(zbin.min_light, -1);

        zbin.generate(&[], NEAR, FAR);
        assert_all_unset(&zbin);
    }

    // ============================================================
    // Three lights at 5 / 50 / 500
    // ============================================================

    #[test]
    fn test_three_light_scenario() {
        let l0 = Light::point(Vec3::ZERO, 1.0);
        let l1 = Light::point(Vec3::ZERO, 10.0);
        let l2 = Light::point(Vec3::ZERO, 100.0);
        let lights = [view_light(&l0, 5.0), view_light(&l1, 50.0), view_light(&l2, 500.0)];

        // floor(256 * (log10(z) + 1))
        let m = SliceMapping::new(NEAR, FAR);
        let expected = [(4.0, 410), (6.0, 455), (40.0, 666), (60.0, 711), (400.0, 922), (600.0, 967)];
        for (depth, slice) in expected {
            assert_eq!(m.slice(depth), slice, "depth {depth}");
        }

        let mut zbin = ZBin::new();
        zbin.generate(&lights, NEAR, FAR);

        assert_eq!(zbin.min_light, 0);
        assert_eq!(zbin.max_light, 2);
        assert_eq!(zbin.first_full_idx, 410);
        assert_eq!(zbin.last_full_idx, 967);

        let check = |range: std::ops::RangeInclusive<usize>, min: i32, max: i32, rmin: i32, rmax: i32| {
            for j in range {
                let s = zbin.data[j];
                assert_eq!(
                    (s.min_light_idx, s.max_light_idx, s.ranged_min_light_idx, s.ranged_max_light_idx),
                    (min, max, rmin, rmax),
                    "slice {j}"
                );
            }
        };

        // Before the first light: only the min bound propagates toward the eye
        check(0..=409, -1, -1, 0, -1);
        check(410..=455, 0, 0, 0, 0);
        // Gap between lights 0 and 1: min from the light behind, max from the light in front
        check(456..=665, -1, -1, 1, 0);
        check(666..=711, 1, 1, 1, 1);
        check(712..=921, -1, -1, 2, 1);
        check(922..=967, 2, 2, 2, 2);
        // Past the last light: only the max bound propagates outward
        check(968..=1023, -1, -1, -1, 2);
    }

    // ============================================================
    // Soundness
    // ============================================================

    /// Deterministic pseudo-random sequence in [0, 1).
    fn lcg(state: &mut u64) -> f32 {
        *state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((*state >> 40) as f32) / (1u64 << 24) as f32
    }

    #[test]
    fn test_ranged_bounds_contain_every_covering_light() {
        let mut state = 0x5eed_u64;
        let owned: Vec<(Light, f32)> = (0..200)
            .map(|_| {
                let depth = 0.05 + lcg(&mut state) * 1200.0;
                let range = 0.1 + lcg(&mut state) * 60.0;
                (Light::point(Vec3::ZERO, range), depth)
            })
            .collect();

        let mut lights: Vec<_> = owned.iter().map(|(l, d)| view_light(l, *d)).collect();
        lights.sort_by(|a, b| a.min_depth.total_cmp(&b.min_depth));

        let mut zbin = ZBin::new();
        zbin.generate(&lights, NEAR, FAR);

        let m = SliceMapping::new(NEAR, FAR);
        let mut covered = 0;
        for (i, light) in lights.iter().enumerate() {
            let i = i as i32;
            let lo = m.slice(light.min_depth).max(0);
            let hi = m.slice(light.max_depth).min(NUM_SLICES as i32 - 1);
            for k in lo..=hi {
                let s = zbin.data[k as usize];
                assert!(
                    s.ranged_min_light_idx <= i && i <= s.ranged_max_light_idx,
                    "light {i} escapes slice {k}: {s:?}"
                );
                assert!(s.min_light_idx <= i && i <= s.max_light_idx);
                covered += 1;
            }
        }
        assert!(covered > 0);
    }

    #[test]
    fn test_light_reaching_last_slice_stays_bounded() {
        // The far light has a lower index than the near one that ends first
        let far = Light::point(Vec3::ZERO, 500.0);
        let near = Light::point(Vec3::ZERO, 1.0);
        let lights = [view_light(&far, 900.0), view_light(&near, 450.0)];
        assert!(lights[0].min_depth < lights[1].min_depth);

        let mut zbin = ZBin::new();
        zbin.generate(&lights, NEAR, FAR);

        let last = zbin.data[NUM_SLICES - 1];
        assert_eq!(last.min_light_idx, 0);
        assert!(last.ranged_min_light_idx <= 0);
        assert!(last.ranged_max_light_idx >= 0);
    }

    #[test]
    fn test_light_outside_depth_range_is_not_visible() {
        let beyond = Light::point(Vec3::ZERO, 1.0);
        let behind = Light::point(Vec3::ZERO, 1.0);
        let lights = [view_light(&behind, -10.0), view_light(&beyond, 5000.0)];

        let mut zbin = ZBin::new();
        zbin.generate(&lights, NEAR, FAR);
        assert_all_unset(&zbin);
    }

    #[test]
    fn test_light_straddling_camera_starts_at_first_slice() {
        let light = Light::point(Vec3::ZERO, 5.0);
        let lights = [view_light(&light, 1.0)];

        let mut zbin = ZBin::new();
        zbin.generate(&lights, NEAR, FAR);
        assert_eq!(zbin.first_full_idx, 0);
        assert_eq!(zbin.data[0].min_light_idx, 0);
        assert_eq!(zbin.min_light, 0);
        assert_eq!(zbin.max_light, 0);
    }

    #[test]
    fn test_upload_bytes_match_slice_layout() {
        let zbin = ZBin::new();
        assert_eq!(std::mem::size_of::<ZBinSlice>(), 16);
        assert_eq!(zbin.as_bytes().len(), NUM_SLICES * 16);
        assert!(zbin.as_bytes().iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_sorted_view_lights_feed_generate() {
        use crate::scene::LightMap;
        use crate::shadow::sort_lights_by_view_space_depth;

        let mut map = LightMap::new();
        map.insert(3, Light::point(Vec3::new(0.0, 0.0, -500.0), 100.0));
        map.insert(9, Light::point(Vec3::new(0.0, 0.0, -5.0), 1.0));
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let sorted = sort_lights_by_view_space_depth(&map, view);

        let mut zbin = ZBin::new();
        zbin.generate(&sorted, NEAR, FAR);
        // Sorted index 0 is the near light
        assert_eq!(zbin.data[430].min_light_idx, 0);
        assert_eq!(zbin.data[940].min_light_idx, 1);
    }
}
