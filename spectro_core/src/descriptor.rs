//! Device profile parsed from the EEPROM calibration blob.
//!
//! The blob is `MAX_PAGES` fixed 64-byte pages; fields sit at fixed offsets
//! (multi-byte values little-endian). Fields introduced by later format
//! revisions are only read when `format_version` reaches their threshold,
//! otherwise a fixed default is substituted. Parsing is all-or-nothing: a
//! `DeviceDescriptor` only exists once every field has been extracted and
//! known-bad values repaired.

use tracing::warn;

use crate::codec::{self, Endian};
use crate::error::ParseError;

pub const PAGE_SIZE: usize = 64;
pub const MAX_PAGES: usize = 8;
pub type Page = [u8; PAGE_SIZE];

pub const DEFAULT_PIXEL_COUNT: u32 = 1952;
pub const DEFAULT_DETECTOR_GAIN: f32 = 8.0;
pub const DEFAULT_LASER_WARMUP_SEC: u8 = 20;
pub const IDENTITY_WAVECAL: [f32; 4] = [0.0, 1.0, 0.0, 0.0];
/// Valid detector gain range in dB; also bounds the runtime gain setter.
pub const GAIN_DB_RANGE: std::ops::RangeInclusive<f32> = 0.0..=72.0;

pub const BAD_PIXEL_SLOTS: usize = 15;
pub const MAX_INTENSITY_COEFFS: usize = 8;

pub const INTENSITY_CORRECTION_MIN_VERSION: u8 = 6;
pub const WAVECAL_C4_MIN_VERSION: u8 = 7;
pub const FEATURE_MASK_MIN_VERSION: u8 = 8;
pub const LASER_WARMUP_MIN_VERSION: u8 = 10;

/// Hardware feature bits stored on page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureMask(u16);

impl FeatureMask {
    pub const INVERT_X_AXIS: u16 = 1 << 0;
    pub const BIN_2X2: u16 = 1 << 1;
    pub const GEN15: u16 = 1 << 2;
    pub const CUTOFF_FILTER: u16 = 1 << 3;
    pub const HARDWARE_EVEN_ODD: u16 = 1 << 4;
    pub const SIG_LASER_TEC: u16 = 1 << 5;
    pub const INTERLOCK_FEEDBACK: u16 = 1 << 6;

    #[inline]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn contains(self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    pub fn invert_x_axis(self) -> bool {
        self.contains(Self::INVERT_X_AXIS)
    }

    pub fn bin_2x2(self) -> bool {
        self.contains(Self::BIN_2X2)
    }
}

/// Immutable profile of one connected spectrometer.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub format_version: u8,
    pub model: String,
    pub serial_number: String,
    pub baud_rate: u32,
    pub has_cooling: bool,
    pub has_battery: bool,
    pub has_laser: bool,
    pub feature_mask: FeatureMask,
    pub slit_size_um: u16,
    pub startup_integration_time_ms: u16,
    pub startup_temp_deg_c: i16,
    pub startup_trigger_mode: u8,
    pub detector_gain: f32,
    pub detector_offset: i16,
    pub detector_gain_odd: f32,
    pub detector_offset_odd: i16,

    /// Pixel → wavelength polynomial, lowest order first (4 or 5 terms).
    pub wavecal_coeffs: Vec<f32>,
    pub calibration_date: String,
    pub calibrated_by: String,

    pub detector_name: String,
    pub pixel_count: u32,
    pub laser_warmup_sec: u8,
    pub vertical_pixels: u16,
    pub roi_horiz_start: u16,
    pub roi_horiz_end: u16,
    pub roi_vert: [(u16, u16); 3],

    pub laser_excitation_nm: f32,
    pub max_laser_power_mw: f32,
    pub min_laser_power_mw: f32,
    pub min_integration_time_ms: u32,
    pub max_integration_time_ms: u32,
    pub laser_watchdog_sec: u16,

    pub user_data: Vec<u8>,
    /// Negative entries are unused slots.
    pub bad_pixels: [i16; BAD_PIXEL_SLOTS],
    pub product_configuration: String,

    pub intensity_correction_coeffs: Vec<f32>,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            format_version: 10,
            model: "WP-785X-SIM".into(),
            serial_number: "SIM0001".into(),
            baud_rate: 0,
            has_cooling: false,
            has_battery: true,
            has_laser: true,
            feature_mask: FeatureMask::default(),
            slit_size_um: 50,
            startup_integration_time_ms: 100,
            startup_temp_deg_c: 10,
            startup_trigger_mode: 0,
            detector_gain: DEFAULT_DETECTOR_GAIN,
            detector_offset: 0,
            detector_gain_odd: DEFAULT_DETECTOR_GAIN,
            detector_offset_odd: 0,
            wavecal_coeffs: vec![790.0, 0.135, -1.2e-5, 0.0, 0.0],
            calibration_date: String::new(),
            calibrated_by: String::new(),
            detector_name: "IMX385".into(),
            pixel_count: DEFAULT_PIXEL_COUNT,
            laser_warmup_sec: DEFAULT_LASER_WARMUP_SEC,
            vertical_pixels: 1096,
            roi_horiz_start: 0,
            roi_horiz_end: (DEFAULT_PIXEL_COUNT - 1) as u16,
            roi_vert: [(250, 950), (0, 0), (0, 0)],
            laser_excitation_nm: 785.0,
            max_laser_power_mw: 450.0,
            min_laser_power_mw: 0.0,
            min_integration_time_ms: 1,
            max_integration_time_ms: 5000,
            laser_watchdog_sec: 60,
            user_data: vec![0; PAGE_SIZE],
            bad_pixels: [-1; BAD_PIXEL_SLOTS],
            product_configuration: String::new(),
            intensity_correction_coeffs: Vec::new(),
        }
    }
}

/// Bounds-checked field extraction; any miss names the field that failed.
struct PageReader<'a> {
    pages: &'a [Page],
}

impl<'a> PageReader<'a> {
    fn bytes(
        &self,
        page: usize,
        offset: usize,
        len: usize,
        field: &'static str,
    ) -> Result<&'a [u8], ParseError> {
        self.pages
            .get(page)
            .and_then(|p| p.get(offset..offset.checked_add(len)?))
            .ok_or(ParseError::MalformedField {
                page,
                offset,
                field,
            })
    }

    fn u8(&self, page: usize, offset: usize, field: &'static str) -> Result<u8, ParseError> {
        Ok(self.bytes(page, offset, 1, field)?[0])
    }

    fn flag(&self, page: usize, offset: usize, field: &'static str) -> Result<bool, ParseError> {
        Ok(self.u8(page, offset, field)? != 0)
    }

    fn u16(&self, page: usize, offset: usize, field: &'static str) -> Result<u16, ParseError> {
        codec::u16_at(self.bytes(page, offset, 2, field)?, 0, Endian::Little).ok_or(
            ParseError::MalformedField {
                page,
                offset,
                field,
            },
        )
    }

    fn i16(&self, page: usize, offset: usize, field: &'static str) -> Result<i16, ParseError> {
        self.u16(page, offset, field).map(|v| v as i16)
    }

    fn u32(&self, page: usize, offset: usize, field: &'static str) -> Result<u32, ParseError> {
        codec::u32_at(self.bytes(page, offset, 4, field)?, 0, Endian::Little).ok_or(
            ParseError::MalformedField {
                page,
                offset,
                field,
            },
        )
    }

    fn f32(&self, page: usize, offset: usize, field: &'static str) -> Result<f32, ParseError> {
        self.u32(page, offset, field).map(f32::from_bits)
    }

    /// NUL/0xFF-terminated text, decoded lossily and trimmed.
    fn string(
        &self,
        page: usize,
        offset: usize,
        len: usize,
        field: &'static str,
    ) -> Result<String, ParseError> {
        let raw = self.bytes(page, offset, len, field)?;
        let end = raw
            .iter()
            .position(|&b| b == 0 || b == 0xFF)
            .unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).trim().to_string())
    }
}

/// Returns the fill byte if `page` is uniformly 0x00 or 0xFF.
fn unprogrammed_fill(page: &Page) -> Option<u8> {
    [0x00, 0xFF]
        .into_iter()
        .find(|&fill| page.iter().all(|&b| b == fill))
}

impl DeviceDescriptor {
    /// Parse a full EEPROM image.
    ///
    /// Fails with `InsufficientPages` below `MAX_PAGES`, with `CorruptEeprom`
    /// when page 0 is unprogrammed, and with `MalformedField` when a field
    /// cannot be decoded. On success, `enforce_defaults` has already run.
    pub fn parse(pages: &[Page]) -> Result<Self, ParseError> {
        if pages.len() < MAX_PAGES {
            return Err(ParseError::InsufficientPages {
                found: pages.len(),
                required: MAX_PAGES,
            });
        }
        if let Some(fill) = unprogrammed_fill(&pages[0]) {
            return Err(ParseError::CorruptEeprom { page: 0, fill });
        }

        let r = PageReader { pages };
        let format_version = r.u8(0, 63, "format_version")?;

        let feature_mask = if format_version >= FEATURE_MASK_MIN_VERSION {
            FeatureMask::from_bits(r.u16(0, 39, "feature_mask")?)
        } else {
            FeatureMask::default()
        };

        let mut wavecal_coeffs = Vec::with_capacity(5);
        for i in 0..4 {
            wavecal_coeffs.push(r.f32(1, i * 4, "wavecal_coeffs")?);
        }
        if format_version >= WAVECAL_C4_MIN_VERSION {
            wavecal_coeffs.push(r.f32(2, 21, "wavecal_coeffs[4]")?);
        }

        let laser_warmup_sec = if format_version >= LASER_WARMUP_MIN_VERSION {
            r.u8(2, 18, "laser_warmup_sec")?
        } else {
            DEFAULT_LASER_WARMUP_SEC
        };

        let mut roi_vert = [(0u16, 0u16); 3];
        for (i, region) in roi_vert.iter_mut().enumerate() {
            let off = 31 + i * 4;
            *region = (r.u16(2, off, "roi_vert_start")?, r.u16(2, off + 2, "roi_vert_end")?);
        }

        let mut bad_pixels = [-1i16; BAD_PIXEL_SLOTS];
        for (i, slot) in bad_pixels.iter_mut().enumerate() {
            *slot = r.i16(5, i * 2, "bad_pixels")?;
        }

        let intensity_correction_coeffs = if format_version >= INTENSITY_CORRECTION_MIN_VERSION {
            // Order is stored signed; -1 (0xFF) means no correction.
            let order = r.u8(6, 0, "intensity_correction_order")? as i8;
            if order < 0 {
                Vec::new()
            } else {
                let count = order as usize + 1;
                if count > MAX_INTENSITY_COEFFS {
                    return Err(ParseError::MalformedField {
                        page: 6,
                        offset: 0,
                        field: "intensity_correction_order",
                    });
                }
                (0..count)
                    .map(|i| r.f32(6, 1 + i * 4, "intensity_correction_coeffs"))
                    .collect::<Result<Vec<_>, _>>()?
            }
        } else {
            Vec::new()
        };

        let parsed = Self {
            format_version,
            model: r.string(0, 0, 16, "model")?,
            serial_number: r.string(0, 16, 16, "serial_number")?,
            baud_rate: r.u32(0, 32, "baud_rate")?,
            has_cooling: r.flag(0, 36, "has_cooling")?,
            has_battery: r.flag(0, 37, "has_battery")?,
            has_laser: r.flag(0, 38, "has_laser")?,
            feature_mask,
            slit_size_um: r.u16(0, 41, "slit_size_um")?,
            startup_integration_time_ms: r.u16(0, 43, "startup_integration_time_ms")?,
            startup_temp_deg_c: r.i16(0, 45, "startup_temp_deg_c")?,
            startup_trigger_mode: r.u8(0, 47, "startup_trigger_mode")?,
            detector_gain: r.f32(0, 48, "detector_gain")?,
            detector_offset: r.i16(0, 52, "detector_offset")?,
            detector_gain_odd: r.f32(0, 54, "detector_gain_odd")?,
            detector_offset_odd: r.i16(0, 58, "detector_offset_odd")?,
            wavecal_coeffs,
            calibration_date: r.string(1, 48, 12, "calibration_date")?,
            calibrated_by: r.string(1, 60, 3, "calibrated_by")?,
            detector_name: r.string(2, 0, 16, "detector_name")?,
            pixel_count: u32::from(r.u16(2, 16, "pixel_count")?),
            laser_warmup_sec,
            vertical_pixels: r.u16(2, 19, "vertical_pixels")?,
            roi_horiz_start: r.u16(2, 27, "roi_horiz_start")?,
            roi_horiz_end: r.u16(2, 29, "roi_horiz_end")?,
            roi_vert,
            laser_excitation_nm: r.f32(3, 0, "laser_excitation_nm")?,
            max_laser_power_mw: r.f32(3, 20, "max_laser_power_mw")?,
            min_laser_power_mw: r.f32(3, 24, "min_laser_power_mw")?,
            min_integration_time_ms: r.u32(3, 28, "min_integration_time_ms")?,
            max_integration_time_ms: r.u32(3, 32, "max_integration_time_ms")?,
            laser_watchdog_sec: r.u16(3, 40, "laser_watchdog_sec")?,
            user_data: r.bytes(4, 0, PAGE_SIZE, "user_data")?.to_vec(),
            bad_pixels,
            product_configuration: r.string(5, 30, 16, "product_configuration")?,
            intensity_correction_coeffs,
        };
        Ok(parsed.enforce_defaults())
    }

    /// Repair values known to be wrong on shipped units. Never fails.
    fn enforce_defaults(mut self) -> Self {
        if self.wavecal_coeffs.iter().any(|c| c.is_nan()) {
            warn!(serial = %self.serial_number, "NaN wavecal coefficients; using identity calibration");
            self.wavecal_coeffs = IDENTITY_WAVECAL.to_vec();
        }
        if self.min_integration_time_ms == 0 {
            warn!(serial = %self.serial_number, "min integration time 0; using 1 ms");
            self.min_integration_time_ms = 1;
        }
        if !GAIN_DB_RANGE.contains(&self.detector_gain) {
            warn!(gain = self.detector_gain, "detector gain out of range; using default");
            self.detector_gain = DEFAULT_DETECTOR_GAIN;
        }
        if !GAIN_DB_RANGE.contains(&self.detector_gain_odd) {
            warn!(gain = self.detector_gain_odd, "odd-pixel detector gain out of range; using default");
            self.detector_gain_odd = DEFAULT_DETECTOR_GAIN;
        }
        if self.pixel_count == 0 {
            warn!(serial = %self.serial_number, "pixel count 0; using {DEFAULT_PIXEL_COUNT}");
            self.pixel_count = DEFAULT_PIXEL_COUNT;
        }
        self
    }

    /// Serialize back to the on-device page layout.
    pub fn to_pages(&self) -> Vec<Page> {
        let mut pages = vec![[0u8; PAGE_SIZE]; MAX_PAGES];
        let mut put = |page: usize, offset: usize, bytes: &[u8]| {
            pages[page][offset..offset + bytes.len()].copy_from_slice(bytes);
        };
        let text = |s: &str, len: usize| -> Vec<u8> {
            let mut v: Vec<u8> = s.bytes().take(len).collect();
            v.resize(len, 0);
            v
        };

        put(0, 0, &text(&self.model, 16));
        put(0, 16, &text(&self.serial_number, 16));
        put(0, 32, &self.baud_rate.to_le_bytes());
        put(0, 36, &[u8::from(self.has_cooling)]);
        put(0, 37, &[u8::from(self.has_battery)]);
        put(0, 38, &[u8::from(self.has_laser)]);
        put(0, 39, &self.feature_mask.bits().to_le_bytes());
        put(0, 41, &self.slit_size_um.to_le_bytes());
        put(0, 43, &self.startup_integration_time_ms.to_le_bytes());
        put(0, 45, &self.startup_temp_deg_c.to_le_bytes());
        put(0, 47, &[self.startup_trigger_mode]);
        put(0, 48, &self.detector_gain.to_le_bytes());
        put(0, 52, &self.detector_offset.to_le_bytes());
        put(0, 54, &self.detector_gain_odd.to_le_bytes());
        put(0, 58, &self.detector_offset_odd.to_le_bytes());
        put(0, 63, &[self.format_version]);

        for (i, c) in self.wavecal_coeffs.iter().take(4).enumerate() {
            put(1, i * 4, &c.to_le_bytes());
        }
        put(1, 48, &text(&self.calibration_date, 12));
        put(1, 60, &text(&self.calibrated_by, 3));

        put(2, 0, &text(&self.detector_name, 16));
        put(2, 16, &(self.pixel_count.min(u32::from(u16::MAX)) as u16).to_le_bytes());
        put(2, 18, &[self.laser_warmup_sec]);
        put(2, 19, &self.vertical_pixels.to_le_bytes());
        if let Some(c4) = self.wavecal_coeffs.get(4) {
            put(2, 21, &c4.to_le_bytes());
        }
        put(2, 27, &self.roi_horiz_start.to_le_bytes());
        put(2, 29, &self.roi_horiz_end.to_le_bytes());
        for (i, (start, end)) in self.roi_vert.iter().enumerate() {
            put(2, 31 + i * 4, &start.to_le_bytes());
            put(2, 33 + i * 4, &end.to_le_bytes());
        }

        put(3, 0, &self.laser_excitation_nm.to_le_bytes());
        put(3, 20, &self.max_laser_power_mw.to_le_bytes());
        put(3, 24, &self.min_laser_power_mw.to_le_bytes());
        put(3, 28, &self.min_integration_time_ms.to_le_bytes());
        put(3, 32, &self.max_integration_time_ms.to_le_bytes());
        put(3, 40, &self.laser_watchdog_sec.to_le_bytes());

        let user_len = self.user_data.len().min(PAGE_SIZE);
        put(4, 0, &self.user_data[..user_len]);

        for (i, px) in self.bad_pixels.iter().enumerate() {
            put(5, i * 2, &px.to_le_bytes());
        }
        put(5, 30, &text(&self.product_configuration, 16));

        let coeffs = &self.intensity_correction_coeffs;
        if coeffs.is_empty() {
            put(6, 0, &[0xFF]);
        } else {
            let n = coeffs.len().min(MAX_INTENSITY_COEFFS);
            put(6, 0, &[(n - 1) as u8]);
            for (i, c) in coeffs.iter().take(n).enumerate() {
                put(6, 1 + i * 4, &c.to_le_bytes());
            }
        }
        pages
    }

    /// Wavelength (nm) of each pixel, honouring the invert-X feature bit.
    pub fn wavelengths(&self) -> Vec<f64> {
        let n = self.pixel_count as usize;
        let invert = self.feature_mask.invert_x_axis();
        (0..n)
            .map(|i| {
                let x = if invert { (n - 1 - i) as f64 } else { i as f64 };
                self.wavecal_coeffs
                    .iter()
                    .rev()
                    .fold(0.0_f64, |acc, &c| acc * x + f64::from(c))
            })
            .collect()
    }

    /// Raman shift (cm⁻¹) per pixel, or `None` without a configured excitation.
    pub fn wavenumbers(&self) -> Option<Vec<f64>> {
        let ex = f64::from(self.laser_excitation_nm);
        if !(ex.is_finite() && ex > 0.0) {
            return None;
        }
        Some(
            self.wavelengths()
                .into_iter()
                .map(|nm| if nm > 0.0 { 1e7 / ex - 1e7 / nm } else { 0.0 })
                .collect(),
        )
    }

    /// Distinct programmed bad-pixel indices within the detector, ascending.
    pub fn bad_pixel_indices(&self) -> Vec<usize> {
        let mut v: Vec<usize> = self
            .bad_pixels
            .iter()
            .filter(|&&p| p >= 0 && (p as u32) < self.pixel_count)
            .map(|&p| p as usize)
            .collect();
        v.sort_unstable();
        v.dedup();
        v
    }
}
