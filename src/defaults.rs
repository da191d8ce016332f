//! Default configuration asset
//!
//! Blocks with "obvious" defaults (debin and demosaic parameters, the gamma
//! curve, resample filter kernels, sharpening, colour-encoding matrices)
//! are initialised from a JSON asset so users can simply enable them. The
//! asset is loaded once per process and is read-only afterwards; a compiled
//! -in copy is used unless the constructor supplies an explicit path.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use serde_json::Value;

use crate::error::{PlanError, Result};
use crate::regs::{
    CcmConfig, DebinConfig, DemosaicConfig, FalseColourConfig, GammaConfig, ResampleConfig,
    SharpenConfig, ShFcCombineConfig, DEBIN_NUM_COEFFS, GAMMA_LUT_SIZE, RESAMPLE_FILTER_SIZE,
    SHARPEN_FUNC_NUM_POINTS, SHARPEN_SIZE,
};

const EMBEDDED_DEFAULTS: &str = include_str!("../data/backend_defaults.json");

static DEFAULTS: OnceLock<Defaults> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct Defaults {
    pub debin: DebinConfig,
    pub demosaic: DemosaicConfig,
    pub false_colour: FalseColourConfig,
    pub gamma: GammaConfig,
    pub sharpen: SharpenConfig,
    pub sh_fc_combine: ShFcCombineConfig,
    ycbcr_map: BTreeMap<String, CcmConfig>,
    ycbcr_inverse_map: BTreeMap<String, CcmConfig>,
    resample_filters: BTreeMap<String, ResampleConfig>,
    resample_select: Vec<(f64, String)>,
}

impl Defaults {
    /// The process-wide defaults, loading them on first use. The first
    /// caller's `path` wins; later callers share the same instance.
    pub fn get(path: Option<&Path>) -> Result<&'static Defaults> {
        if let Some(d) = DEFAULTS.get() {
            return Ok(d);
        }
        let text = match path {
            Some(p) => std::fs::read_to_string(p)?,
            None => EMBEDDED_DEFAULTS.to_string(),
        };
        let root: Value = serde_json::from_str(&text)?;
        let parsed = Defaults::parse(&root)?;
        Ok(DEFAULTS.get_or_init(|| parsed))
    }

    /// A resample kernel by filter name; zero coefficients for unknown names.
    pub fn resample_filter(&self, name: &str) -> ResampleConfig {
        let mut config = ResampleConfig::default();
        if let Some(f) = self.resample_filters.get(name) {
            config.coef = f.coef;
        }
        config
    }

    /// The kernel the smart-selection table names for a downscale factor:
    /// the first entry whose scale is at least `downscale`, else the last.
    pub fn resample_filter_for_scale(&self, downscale: f64) -> ResampleConfig {
        let name = self
            .resample_select
            .iter()
            .find(|(scale, _)| *scale >= downscale)
            .or_else(|| self.resample_select.last())
            .map(|(_, name)| name.as_str())
            .unwrap_or("");
        self.resample_filter(name)
    }

    /// Forward colour-encoding matrix; all-zero for unknown colour spaces.
    pub fn ycbcr(&self, colour_space: &str) -> CcmConfig {
        self.ycbcr_map.get(colour_space).copied().unwrap_or_default()
    }

    /// Inverse colour-encoding matrix; all-zero for unknown colour spaces.
    pub fn ycbcr_inverse(&self, colour_space: &str) -> CcmConfig {
        self.ycbcr_inverse_map.get(colour_space).copied().unwrap_or_default()
    }

    fn parse(root: &Value) -> Result<Defaults> {
        Ok(Defaults {
            debin: read_debin(root)?,
            demosaic: read_demosaic(root)?,
            false_colour: read_false_colour(root)?,
            gamma: read_gamma(root)?,
            sharpen: read_sharpen(root)?,
            sh_fc_combine: read_sh_fc_combine(root)?,
            ycbcr_map: read_colour_encoding(root, "ycbcr")?,
            ycbcr_inverse_map: read_colour_encoding(root, "ycbcr_inverse")?,
            resample_filters: read_resample_filters(root)?,
            resample_select: read_resample_select(root)?,
        })
    }
}

fn get<'a>(root: &'a Value, path: &str) -> Result<&'a Value> {
    let mut v = root;
    for key in path.split('.') {
        v = v
            .get(key)
            .ok_or_else(|| PlanError::Defaults(format!("missing key '{path}'")))?;
    }
    Ok(v)
}

fn get_int(root: &Value, path: &str) -> Result<i64> {
    get(root, path)?
        .as_i64()
        .ok_or_else(|| PlanError::Defaults(format!("'{path}' is not an integer")))
}

fn get_array<'a>(root: &'a Value, path: &str) -> Result<&'a Vec<Value>> {
    get(root, path)?
        .as_array()
        .ok_or_else(|| PlanError::Defaults(format!("'{path}' is not an array")))
}

fn int_array<const N: usize, T>(root: &Value, path: &str) -> Result<[T; N]>
where
    T: TryFrom<i64> + Default + Copy,
{
    let values = get_array(root, path)?;
    if values.len() != N {
        return Err(PlanError::Defaults(format!(
            "'{path}' has {} entries, expected {N}",
            values.len()
        )));
    }
    let mut out = [T::default(); N];
    for (i, v) in values.iter().enumerate() {
        let n = v
            .as_i64()
            .ok_or_else(|| PlanError::Defaults(format!("'{path}[{i}]' is not an integer")))?;
        out[i] = T::try_from(n)
            .map_err(|_| PlanError::Defaults(format!("'{path}[{i}]' out of range")))?;
    }
    Ok(out)
}

fn read_debin(root: &Value) -> Result<DebinConfig> {
    let coeffs: [i8; DEBIN_NUM_COEFFS] = int_array(root, "debin.coefs")?;
    Ok(DebinConfig {
        coeffs,
        h_enable: 1,
        v_enable: 1,
        ..Default::default()
    })
}

fn read_demosaic(root: &Value) -> Result<DemosaicConfig> {
    Ok(DemosaicConfig {
        sharper: get_int(root, "demosaic.sharper")? as u8,
        fc_mode: get_int(root, "demosaic.fc_mode")? as u8,
        ..Default::default()
    })
}

fn read_false_colour(root: &Value) -> Result<FalseColourConfig> {
    Ok(FalseColourConfig {
        distance: get_int(root, "false_colour.distance")? as u8,
        ..Default::default()
    })
}

/// A piecewise-linear function given as flattened (x, y) pairs.
struct Pwl {
    points: Vec<(f64, f64)>,
}

impl Pwl {
    fn read(root: &Value, path: &str) -> Result<Pwl> {
        let values = get_array(root, path)?;
        if values.len() < 4 || values.len() % 2 != 0 {
            return Err(PlanError::Defaults(format!("'{path}' is not a list of (x, y) pairs")));
        }
        let mut points = Vec::with_capacity(values.len() / 2);
        for pair in values.chunks(2) {
            let x = pair[0]
                .as_f64()
                .ok_or_else(|| PlanError::Defaults(format!("'{path}' contains a non-number")))?;
            let y = pair[1]
                .as_f64()
                .ok_or_else(|| PlanError::Defaults(format!("'{path}' contains a non-number")))?;
            points.push((x, y));
        }
        Ok(Pwl { points })
    }

    fn eval(&self, x: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if x <= first.0 {
            return first.1;
        }
        if x >= last.0 {
            return last.1;
        }
        let i = self.points.partition_point(|p| p.0 < x);
        let (x0, y0) = self.points[i - 1];
        let (x1, y1) = self.points[i];
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }
}

fn read_gamma(root: &Value) -> Result<GammaConfig> {
    const SLOPE_BITS: u32 = 14;
    const POS_BITS: u32 = 16;

    let pwl = Pwl::read(root, "gamma.lut")?;
    let mut gamma = GammaConfig::default();
    let mut last_y: i32 = 0;

    // The curve is sampled more densely in the shadows: 512 steps up to
    // 16384, 1024 to 32768, then 2048 to the top of the 16-bit range.
    for i in 0..GAMMA_LUT_SIZE {
        let x = if i < 32 {
            i as i32 * 512
        } else if i < 48 {
            (i as i32 - 32) * 1024 + 16384
        } else {
            (65535i32).min((i as i32 - 48) * 2048 + 32768)
        };

        let mut y = pwl.eval(x as f64) as i32;
        if y < 0 || (i > 0 && y < last_y) {
            return Err(PlanError::Defaults("gamma.lut is malformed (not monotone)".to_string()));
        }

        if i > 0 {
            let mut slope = (y - last_y) as u32;
            if slope >= 1 << SLOPE_BITS {
                slope = (1 << SLOPE_BITS) - 1;
                y = last_y + slope as i32;
            }
            gamma.lut[i - 1] |= slope << POS_BITS;
        }

        gamma.lut[i] = y as u32;
        last_y = y;
    }

    Ok(gamma)
}

fn read_sharpen_filter(
    root: &Value,
    idx: usize,
) -> Result<([i8; SHARPEN_SIZE * SHARPEN_SIZE], u16, u16, u16)> {
    let base = format!("sharpen.filter{idx}");
    let kernel: [i8; SHARPEN_SIZE * SHARPEN_SIZE] = int_array(root, &format!("{base}.kernel"))?;
    let offset = get_int(root, &format!("{base}.offset"))? as u16;
    let threshold_slope = get_int(root, &format!("{base}.threshold_slope"))? as u16;
    let scale = get_int(root, &format!("{base}.scale"))? as u16;
    Ok((kernel, offset, threshold_slope, scale))
}

fn read_sharpen_response(
    root: &Value,
    which: &str,
) -> Result<(u16, u16, [u16; SHARPEN_FUNC_NUM_POINTS], u16)> {
    let base = format!("sharpen.{which}");
    let strength = get_int(root, &format!("{base}.strength"))? as u16;
    let pre_limit = get_int(root, &format!("{base}.pre_limit"))? as u16;
    let function: [u16; SHARPEN_FUNC_NUM_POINTS] = int_array(root, &format!("{base}.function"))?;
    let limit = get_int(root, &format!("{base}.limit"))? as u16;
    Ok((strength, pre_limit, function, limit))
}

fn read_sharpen(root: &Value) -> Result<SharpenConfig> {
    let mut sharpen = SharpenConfig::default();

    (sharpen.kernel0, sharpen.threshold_offset0, sharpen.threshold_slope0, sharpen.scale0) =
        read_sharpen_filter(root, 0)?;
    (sharpen.kernel1, sharpen.threshold_offset1, sharpen.threshold_slope1, sharpen.scale1) =
        read_sharpen_filter(root, 1)?;
    (sharpen.kernel2, sharpen.threshold_offset2, sharpen.threshold_slope2, sharpen.scale2) =
        read_sharpen_filter(root, 2)?;
    (sharpen.kernel3, sharpen.threshold_offset3, sharpen.threshold_slope3, sharpen.scale3) =
        read_sharpen_filter(root, 3)?;
    (sharpen.kernel4, sharpen.threshold_offset4, sharpen.threshold_slope4, sharpen.scale4) =
        read_sharpen_filter(root, 4)?;

    (
        sharpen.positive_strength,
        sharpen.positive_pre_limit,
        sharpen.positive_func,
        sharpen.positive_limit,
    ) = read_sharpen_response(root, "positive")?;
    (
        sharpen.negative_strength,
        sharpen.negative_pre_limit,
        sharpen.negative_func,
        sharpen.negative_limit,
    ) = read_sharpen_response(root, "negative")?;

    let enables = get(root, "sharpen.enables")?
        .as_str()
        .ok_or_else(|| PlanError::Defaults("'sharpen.enables' is not a hex string".to_string()))?;
    sharpen.enables = u8::from_str_radix(enables, 16)
        .map_err(|_| PlanError::Defaults(format!("'sharpen.enables' ({enables}) is not valid hex")))?;
    sharpen.white = get_int(root, "sharpen.white")? as u8;
    sharpen.black = get_int(root, "sharpen.black")? as u8;
    sharpen.grey = get_int(root, "sharpen.grey")? as u8;

    Ok(sharpen)
}

fn read_sh_fc_combine(root: &Value) -> Result<ShFcCombineConfig> {
    let y_factor = get(root, "sharpen.shfc_y_factor")?
        .as_f64()
        .ok_or_else(|| PlanError::Defaults("'sharpen.shfc_y_factor' is not a number".to_string()))?;
    Ok(ShFcCombineConfig {
        y_factor: (y_factor * 256.0) as u8,
        ..Default::default()
    })
}

fn read_colour_encoding(root: &Value, key: &str) -> Result<BTreeMap<String, CcmConfig>> {
    let encodings = get(root, "colour_encoding")?
        .as_object()
        .ok_or_else(|| PlanError::Defaults("'colour_encoding' is not an object".to_string()))?;

    let mut map = BTreeMap::new();
    for name in encodings.keys() {
        let base = format!("colour_encoding.{name}.{key}");
        let ccm = CcmConfig {
            coeffs: int_array(root, &format!("{base}.coeffs"))?,
            offsets: int_array(root, &format!("{base}.offsets"))?,
            ..Default::default()
        };
        map.insert(name.clone(), ccm);
    }
    Ok(map)
}

fn read_resample_filters(root: &Value) -> Result<BTreeMap<String, ResampleConfig>> {
    let filters = get(root, "resample.filters")?
        .as_object()
        .ok_or_else(|| PlanError::Defaults("'resample.filters' is not an object".to_string()))?;

    let mut map = BTreeMap::new();
    for name in filters.keys() {
        let coef: [i16; RESAMPLE_FILTER_SIZE] = int_array(root, &format!("resample.filters.{name}"))?;
        map.insert(name.clone(), ResampleConfig { coef, ..Default::default() });
    }
    Ok(map)
}

fn read_resample_select(root: &Value) -> Result<Vec<(f64, String)>> {
    let scales = get_array(root, "resample.smart_selection.downscale")?;
    let filters = get_array(root, "resample.smart_selection.filter")?;
    if scales.len() != filters.len() {
        return Err(PlanError::Defaults(
            "resample.smart_selection downscale/filter lists differ in length".to_string(),
        ));
    }

    let mut select = Vec::with_capacity(scales.len());
    for (scale, filter) in scales.iter().zip(filters) {
        let scale = scale
            .as_f64()
            .ok_or_else(|| PlanError::Defaults("smart_selection downscale is not a number".to_string()))?;
        let filter = filter
            .as_str()
            .ok_or_else(|| PlanError::Defaults("smart_selection filter is not a string".to_string()))?;
        select.push((scale, filter.to_string()));
    }
    Ok(select)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedded() -> Defaults {
        let root: Value = serde_json::from_str(EMBEDDED_DEFAULTS).unwrap();
        Defaults::parse(&root).unwrap()
    }

    #[test]
    fn test_embedded_asset_parses() {
        let d = embedded();
        assert_eq!(d.debin.h_enable, 1);
        assert_eq!(d.debin.v_enable, 1);
        assert!(!d.resample_filters.is_empty());
        assert!(!d.resample_select.is_empty());
    }

    #[test]
    fn test_gamma_lut_monotone() {
        let d = embedded();
        let mut last = 0u32;
        for (i, &entry) in d.gamma.lut.iter().enumerate() {
            let y = entry & 0xffff;
            assert!(y >= last, "gamma entry {i} not monotone");
            last = y;
        }
        // every slope fits the 14-bit field
        for &entry in &d.gamma.lut {
            assert!(entry >> 16 < (1 << 14));
        }
    }

    #[test]
    fn test_filter_rows_preserve_dc() {
        let d = embedded();
        for (name, filter) in &d.resample_filters {
            for phase in 0..16 {
                let sum: i32 = filter.coef[phase * 6..(phase + 1) * 6]
                    .iter()
                    .map(|&c| c as i32)
                    .sum();
                assert_eq!(sum, 1024, "filter {name} phase {phase} sum {sum}");
            }
        }
    }

    #[test]
    fn test_filter_selection_by_scale() {
        let d = embedded();
        // Mild scaling selects the first (sharpest) kernel; extreme scaling
        // falls off the end of the table and takes the last.
        let first = d.resample_select.first().unwrap().1.clone();
        let last = d.resample_select.last().unwrap().1.clone();
        assert_eq!(d.resample_filter_for_scale(0.5).coef, d.resample_filter(&first).coef);
        assert_eq!(d.resample_filter_for_scale(1000.0).coef, d.resample_filter(&last).coef);
    }

    #[test]
    fn test_ycbcr_lookup() {
        let d = embedded();
        let jpeg = d.ycbcr("jpeg");
        // BT.601 luma row in Q10: 306, 601, 117
        assert_eq!(jpeg.coeffs[0], 306);
        assert_eq!(jpeg.coeffs[1], 601);
        assert_eq!(jpeg.coeffs[2], 117);
        // Unknown colour spaces produce a zero matrix.
        assert_eq!(d.ycbcr("nonsense"), CcmConfig::default());
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let root: Value = serde_json::json!({ "debin": { "coefs": [1, 2, 3, 4] } });
        assert!(Defaults::parse(&root).is_err());
    }
}
