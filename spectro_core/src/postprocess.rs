//! Pixel fixups applied to every averaged spectrum, plus the downstream hook.

use crate::acquisition::Measurement;
use crate::descriptor::DeviceDescriptor;

/// Leading pixels shadowed by the sensor mask.
pub const EDGE_PIXELS: usize = 4;

/// Optional stage run after the built-in fixups (dark subtraction, etc.).
pub trait PostProcessor: Send {
    fn process(&mut self, measurement: &mut Measurement) -> eyre::Result<()>;
}

impl<F> PostProcessor for F
where
    F: FnMut(&mut Measurement) -> eyre::Result<()> + Send,
{
    fn process(&mut self, measurement: &mut Measurement) -> eyre::Result<()> {
        self(measurement)
    }
}

/// Copy pixel 4 over pixels 0..4 and the second-to-last over the last.
pub fn fix_edge_pixels(pixels: &mut [f64]) {
    if let Some(&anchor) = pixels.get(EDGE_PIXELS) {
        pixels[..EDGE_PIXELS].fill(anchor);
    }
    if let [.., prev, last] = pixels {
        *last = *prev;
    }
}

/// Mean of each pixel with its right neighbour; the last pixel is kept.
pub fn bin_2x2(pixels: &mut [f64]) {
    for i in 0..pixels.len().saturating_sub(1) {
        pixels[i] = (pixels[i] + pixels[i + 1]) / 2.0;
    }
}

/// Built-in fixups in order: edges, then binning when the unit bins 2×2.
pub fn apply(pixels: &mut [f64], descriptor: &DeviceDescriptor) {
    fix_edge_pixels(pixels);
    if descriptor.feature_mask.bin_2x2() {
        bin_2x2(pixels);
    }
}
