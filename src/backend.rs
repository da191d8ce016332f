//! The back-end planner
//!
//! `BackEnd` owns one register file plus the extra (non-register) state the
//! planner needs: per-branch crops and scaled sizes, smart-resize targets,
//! grid placements and dirty flags. Callers populate blocks through the
//! setters (each raises the block's dirty bit) and then call
//! [`BackEnd::prepare`] to validate, finalise and tile the frame.
//!
//! Exclusive access is the `&mut self` contract on every setter and on
//! `prepare`; the register file itself stays plain data so it can be copied
//! into shared or device-visible memory as-is.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::CONFIG_MAP;
use crate::defaults::Defaults;
use crate::error::{PlanError, Result};
use crate::format::ImageFormatConfig;
use crate::regs::*;
use crate::variant::Variant;

/// Construction-time options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackEndOptions {
    /// Use zero to get default behaviour.
    pub max_stripe_height: u32,
    /// Can only exceed the hardware limit in simulation.
    pub max_tile_width: u32,
    /// JSON file of default block settings; `None` uses the compiled-in copy.
    pub defaults_file: Option<PathBuf>,
}

/// A user-requested output size; the preparer decides how to split the work
/// between the downscaler and the resampler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartResize {
    pub width: u16,
    pub height: u16,
}

/// Planner state that sits beside the register file rather than in it.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ConfigExtra {
    pub crop: [CropConfig; NUM_OUTPUT_BRANCHES],
    pub downscale: [DownscaleExtra; NUM_OUTPUT_BRANCHES],
    pub resample: [ResampleExtra; NUM_OUTPUT_BRANCHES],
    pub lsc: LscExtra,
    pub cac: CacExtra,
    pub dirty_bayer: u32,
    pub dirty_rgb: u32,
    pub dirty_extra: u32,
}

/// A partial configuration update: the register file plus masks naming the
/// blocks that should be taken from it.
#[derive(Clone, Copy)]
pub struct ConfigUpdate {
    pub config: BackendConfig,
    pub dirty_bayer: u32,
    pub dirty_rgb: u32,
    pub dirty_extra: u32,
}

pub struct BackEnd {
    pub(crate) options: BackEndOptions,
    pub(crate) variant: Variant,
    pub(crate) config: BackendConfig,
    pub(crate) extra: ConfigExtra,
    pub(crate) retile: bool,
    pub(crate) finalise_tiling: bool,
    pub(crate) tiles: Vec<Tile>,
    pub(crate) num_tiles_x: usize,
    pub(crate) num_tiles_y: usize,
    pub(crate) smart_resize: [SmartResize; NUM_OUTPUT_BRANCHES],
    pub(crate) smart_resize_dirty: u32,
    pub(crate) defaults: &'static Defaults,
}

impl BackEnd {
    pub fn new(options: BackEndOptions, variant: Variant) -> Result<BackEnd> {
        if options.max_tile_width > variant.max_tile_width() {
            return Err(PlanError::InvalidConfig(format!(
                "configured max tile width {} exceeds {}",
                options.max_tile_width,
                variant.max_tile_width()
            )));
        }

        let defaults = Defaults::get(options.defaults_file.as_deref())?;

        let mut be = BackEnd {
            options,
            variant,
            config: BackendConfig::default(),
            extra: ConfigExtra::default(),
            retile: true,
            finalise_tiling: true,
            tiles: Vec::new(),
            num_tiles_x: 0,
            num_tiles_y: 0,
            smart_resize: [SmartResize::default(); NUM_OUTPUT_BRANCHES],
            smart_resize_dirty: 0,
            defaults,
        };
        be.initialise_config();
        Ok(be)
    }

    // Blocks with obvious defaults are pre-loaded so users can simply
    // enable them.
    fn initialise_config(&mut self) {
        self.config = BackendConfig::default();

        self.config.debin = self.defaults.debin;
        self.extra.dirty_bayer |= BAYER_ENABLE_DEBIN;

        self.config.demosaic = self.defaults.demosaic;
        self.extra.dirty_bayer |= BAYER_ENABLE_DEMOSAIC;

        self.config.false_colour = self.defaults.false_colour;
        self.extra.dirty_rgb |= RGB_ENABLE_FALSE_COLOUR;

        // Start with a sensible default YCbCr, which must be full-range.
        self.config.ycbcr = self.defaults.ycbcr("jpeg");
        self.config.ycbcr_inverse = self.defaults.ycbcr_inverse("jpeg");
        self.extra.dirty_rgb |= RGB_ENABLE_YCBCR | RGB_ENABLE_YCBCR_INVERSE;

        self.config.gamma = self.defaults.gamma;
        self.extra.dirty_rgb |= RGB_ENABLE_GAMMA;

        self.config.sharpen = self.defaults.sharpen;
        self.config.sh_fc_combine = self.defaults.sh_fc_combine;
        self.extra.dirty_rgb |= RGB_ENABLE_SHARPEN;
        self.extra.dirty_extra |= DIRTY_SH_FC_COMBINE;

        for i in 0..self.variant.num_branches() {
            self.config.resample[i].coef = self.defaults.resample_filter("lanczos3").coef;
            self.extra.dirty_rgb |= rgb_enable_resample(i);
        }
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    /// The current register file. Fields finalised by the last `prepare`
    /// are visible here; after a failed `prepare` the contents are
    /// indeterminate.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn set_global(&mut self, global: GlobalConfig) {
        let changed_rgb_enables = global.rgb_enables ^ self.config.global.rgb_enables;

        // Must retile when rescaling or HoG blocks change.
        if changed_rgb_enables
            & (RGB_ENABLE_DOWNSCALE0
                | RGB_ENABLE_DOWNSCALE1
                | RGB_ENABLE_RESAMPLE0
                | RGB_ENABLE_RESAMPLE1
                | RGB_ENABLE_HOG)
            != 0
        {
            self.retile = true;
        }

        // Label anything newly enabled as dirty.
        self.extra.dirty_bayer |= global.bayer_enables & !self.config.global.bayer_enables;
        self.extra.dirty_rgb |= global.rgb_enables & !self.config.global.rgb_enables;
        self.config.global = global;
        self.config.global.pad = [0; 3];
        self.extra.dirty_extra |= DIRTY_GLOBAL;
    }

    pub fn global(&self) -> GlobalConfig {
        self.config.global
    }

    pub fn set_input_format(&mut self, input_format: ImageFormatConfig) {
        self.config.input_format = input_format;
        self.extra.dirty_bayer |= BAYER_ENABLE_INPUT;
        self.retile = true;
    }

    pub fn input_format(&self) -> ImageFormatConfig {
        self.config.input_format
    }

    pub fn set_decompress(&mut self, decompress: DecompressConfig) {
        self.config.decompress = decompress;
        self.extra.dirty_bayer |= BAYER_ENABLE_DECOMPRESS;
    }

    pub fn set_dpc(&mut self, dpc: DpcConfig) {
        self.config.dpc = dpc;
        self.config.dpc.pad = 0;
        self.extra.dirty_bayer |= BAYER_ENABLE_DPC;
    }

    pub fn set_geq(&mut self, geq: GeqConfig) {
        self.config.geq = geq;
        self.config.geq.slope_sharper &= GEQ_SLOPE | GEQ_SHARPER;
        self.extra.dirty_bayer |= BAYER_ENABLE_GEQ;
    }

    pub fn set_tdn_input_format(&mut self, tdn_input_format: ImageFormatConfig) {
        self.config.tdn_input_format = tdn_input_format;
        // the TDN input address is written for every tile
        self.extra.dirty_bayer |= BAYER_ENABLE_TDN_INPUT;
        self.finalise_tiling = true;
    }

    pub fn set_tdn_decompress(&mut self, tdn_decompress: DecompressConfig) {
        self.config.tdn_decompress = tdn_decompress;
        self.extra.dirty_bayer |= BAYER_ENABLE_TDN_DECOMPRESS;
    }

    pub fn set_tdn(&mut self, tdn: TdnConfig) {
        self.config.tdn = tdn;
        self.config.tdn.pad = 0;
        self.extra.dirty_bayer |= BAYER_ENABLE_TDN;
    }

    pub fn tdn(&self) -> TdnConfig {
        self.config.tdn
    }

    pub fn set_tdn_compress(&mut self, tdn_compress: CompressConfig) {
        self.config.tdn_compress = tdn_compress;
        self.extra.dirty_bayer |= BAYER_ENABLE_TDN_COMPRESS;
    }

    pub fn set_tdn_output_format(&mut self, tdn_output_format: ImageFormatConfig) {
        self.config.tdn_output_format = tdn_output_format;
        self.extra.dirty_bayer |= BAYER_ENABLE_TDN_OUTPUT;
        self.finalise_tiling = true;
    }

    pub fn tdn_output_format(&self) -> ImageFormatConfig {
        self.config.tdn_output_format
    }

    pub fn set_sdn(&mut self, sdn: SdnConfig) {
        self.config.sdn = sdn;
        self.config.sdn.pad = 0;
        self.extra.dirty_bayer |= BAYER_ENABLE_SDN;
    }

    pub fn set_blc(&mut self, blc: BlaConfig) {
        self.config.blc = blc;
        self.config.blc.pad = [0; 2];
        self.extra.dirty_bayer |= BAYER_ENABLE_BLC;
    }

    pub fn set_stitch_input_format(&mut self, stitch_input_format: ImageFormatConfig) {
        self.config.stitch_input_format = stitch_input_format;
        self.extra.dirty_bayer |= BAYER_ENABLE_STITCH_INPUT;
        self.finalise_tiling = true;
    }

    pub fn stitch_input_format(&self) -> ImageFormatConfig {
        self.config.stitch_input_format
    }

    pub fn set_stitch_decompress(&mut self, stitch_decompress: DecompressConfig) {
        self.config.stitch_decompress = stitch_decompress;
        self.extra.dirty_bayer |= BAYER_ENABLE_STITCH_DECOMPRESS;
    }

    pub fn set_stitch(&mut self, stitch: StitchConfig) {
        self.config.stitch = stitch;
        self.config.stitch.pad = 0;
        self.extra.dirty_bayer |= BAYER_ENABLE_STITCH;
    }

    pub fn set_stitch_compress(&mut self, stitch_compress: CompressConfig) {
        self.config.stitch_compress = stitch_compress;
        self.extra.dirty_bayer |= BAYER_ENABLE_STITCH_COMPRESS;
    }

    pub fn set_stitch_output_format(&mut self, stitch_output_format: ImageFormatConfig) {
        self.config.stitch_output_format = stitch_output_format;
        self.extra.dirty_bayer |= BAYER_ENABLE_STITCH_OUTPUT;
        self.finalise_tiling = true;
    }

    pub fn stitch_output_format(&self) -> ImageFormatConfig {
        self.config.stitch_output_format
    }

    pub fn set_wbg(&mut self, wbg: WbgConfig) {
        self.config.wbg = wbg;
        self.config.wbg.pad = [0; 2];
        self.extra.dirty_bayer |= BAYER_ENABLE_WBG;
    }

    pub fn wbg(&self) -> WbgConfig {
        self.config.wbg
    }

    pub fn set_cdn(&mut self, cdn: CdnConfig) {
        self.config.cdn = cdn;
        self.extra.dirty_bayer |= BAYER_ENABLE_CDN;
    }

    pub fn set_lsc(&mut self, lsc: LscConfig, lsc_extra: LscExtra) {
        // No re-finalise needed when only the cell gains changed.
        self.finalise_tiling |= self.config.lsc.grid_step_x != lsc.grid_step_x
            || self.config.lsc.grid_step_y != lsc.grid_step_y;
        self.config.lsc = lsc;
        self.extra.lsc = lsc_extra;
        self.extra.dirty_bayer |= BAYER_ENABLE_LSC;
    }

    pub fn set_cac(&mut self, cac: CacConfig, cac_extra: CacExtra) {
        self.finalise_tiling |= self.config.cac.grid_step_x != cac.grid_step_x
            || self.config.cac.grid_step_y != cac.grid_step_y;
        self.config.cac = cac;
        self.extra.cac = cac_extra;
        self.extra.dirty_bayer |= BAYER_ENABLE_CAC;
    }

    pub fn set_debin(&mut self, debin: DebinConfig) {
        self.config.debin = debin;
        self.config.debin.pad = [0; 2];
        self.extra.dirty_bayer |= BAYER_ENABLE_DEBIN;
    }

    pub fn debin(&self) -> DebinConfig {
        self.config.debin
    }

    pub fn set_tonemap(&mut self, tonemap: TonemapConfig) {
        self.config.tonemap = tonemap;
        self.extra.dirty_bayer |= BAYER_ENABLE_TONEMAP;
    }

    pub fn set_demosaic(&mut self, demosaic: DemosaicConfig) {
        self.config.demosaic = demosaic;
        self.config.demosaic.pad = [0; 2];
        self.extra.dirty_bayer |= BAYER_ENABLE_DEMOSAIC;
    }

    pub fn demosaic(&self) -> DemosaicConfig {
        self.config.demosaic
    }

    pub fn set_ccm(&mut self, ccm: CcmConfig) {
        self.config.ccm = ccm;
        self.config.ccm.pad = [0; 2];
        self.extra.dirty_rgb |= RGB_ENABLE_CCM;
    }

    pub fn set_sat_control(&mut self, sat_control: SatControlConfig) {
        self.config.sat_control = sat_control;
        self.config.sat_control.pad = 0;
        self.extra.dirty_rgb |= RGB_ENABLE_SAT_CONTROL;
    }

    pub fn set_ycbcr(&mut self, ycbcr: CcmConfig) {
        self.config.ycbcr = ycbcr;
        self.config.ycbcr.pad = [0; 2];
        self.extra.dirty_rgb |= RGB_ENABLE_YCBCR;
    }

    pub fn ycbcr(&self) -> CcmConfig {
        self.config.ycbcr
    }

    pub fn set_false_colour(&mut self, false_colour: FalseColourConfig) {
        self.config.false_colour = false_colour;
        self.config.false_colour.pad = [0; 3];
        self.extra.dirty_rgb |= RGB_ENABLE_FALSE_COLOUR;
    }

    pub fn set_sharpen(&mut self, sharpen: SharpenConfig) {
        self.config.sharpen = sharpen;
        self.config.sharpen.pad0 = [0; 3];
        self.config.sharpen.pad1 = [0; 3];
        self.config.sharpen.pad2 = [0; 3];
        self.config.sharpen.pad3 = [0; 3];
        self.config.sharpen.pad4 = [0; 3];
        self.config.sharpen.pad5 = 0;
        self.config.sharpen.pad6 = 0;
        self.config.sharpen.pad7 = 0;
        self.config.sharpen.pad8 = 0;
        self.config.sharpen.pad9 = 0;
        self.extra.dirty_rgb |= RGB_ENABLE_SHARPEN;
    }

    pub fn sharpen(&self) -> SharpenConfig {
        self.config.sharpen
    }

    pub fn set_sh_fc_combine(&mut self, sh_fc_combine: ShFcCombineConfig) {
        self.config.sh_fc_combine = sh_fc_combine;
        self.config.sh_fc_combine.pad = 0;
        self.extra.dirty_extra |= DIRTY_SH_FC_COMBINE;
    }

    pub fn set_ycbcr_inverse(&mut self, ycbcr_inverse: CcmConfig) {
        self.config.ycbcr_inverse = ycbcr_inverse;
        self.config.ycbcr_inverse.pad = [0; 2];
        self.extra.dirty_rgb |= RGB_ENABLE_YCBCR_INVERSE;
    }

    pub fn set_gamma(&mut self, gamma: GammaConfig) {
        self.config.gamma = gamma;
        self.extra.dirty_rgb |= RGB_ENABLE_GAMMA;
    }

    pub fn gamma(&self) -> GammaConfig {
        self.config.gamma
    }

    pub fn set_crop(&mut self, i: usize, crop: CropConfig) {
        assert!(i < self.variant.num_branches());
        self.extra.crop[i] = crop;
        self.extra.dirty_extra |= DIRTY_CROP;
        self.retile = true;
    }

    pub fn crop(&self, i: usize) -> CropConfig {
        assert!(i < self.variant.num_branches());
        self.extra.crop[i]
    }

    pub fn set_csc(&mut self, i: usize, csc: CcmConfig) {
        assert!(i < self.variant.num_branches());
        self.config.csc[i] = csc;
        self.extra.dirty_rgb |= rgb_enable_csc(i);
    }

    pub fn csc(&self, i: usize) -> CcmConfig {
        assert!(i < self.variant.num_branches());
        self.config.csc[i]
    }

    pub fn set_downscale(&mut self, i: usize, downscale: DownscaleConfig, downscale_extra: DownscaleExtra) {
        assert!(i < self.variant.num_branches());
        self.config.downscale[i] = downscale;
        self.extra.downscale[i] = downscale_extra;
        self.extra.dirty_rgb |= rgb_enable_downscale(i);
        self.retile = true;
    }

    pub fn set_downscale_extra(&mut self, i: usize, downscale_extra: DownscaleExtra) {
        assert!(i < self.variant.num_branches());
        self.extra.downscale[i] = downscale_extra;
        self.extra.dirty_rgb |= rgb_enable_downscale(i);
        self.retile = true;
    }

    pub fn set_resample(&mut self, i: usize, resample: ResampleConfig, resample_extra: ResampleExtra) {
        assert!(i < self.variant.num_branches());
        self.config.resample[i] = resample;
        self.extra.resample[i] = resample_extra;
        self.extra.dirty_rgb |= rgb_enable_resample(i);
        self.retile = true;
    }

    pub fn set_resample_extra(&mut self, i: usize, resample_extra: ResampleExtra) {
        assert!(i < self.variant.num_branches());
        self.extra.resample[i] = resample_extra;
        self.extra.dirty_rgb |= rgb_enable_resample(i);
        self.retile = true;
    }

    pub fn set_output_format(&mut self, i: usize, output_format: OutputFormatConfig) {
        assert!(i < self.variant.num_branches());
        self.config.output_format[i] = output_format;

        if output_format.image.format.is_integral_image() {
            // An integral-image request constrains the format parameters.
            use crate::format::ImageFormat;
            self.config.output_format[i].image.format = ImageFormat(
                ImageFormat::INTEGRAL_IMAGE
                    + ImageFormat::PLANARITY_PLANAR
                    + ImageFormat::SAMPLING_444
                    + (output_format.image.format.0 & ImageFormat::SHIFT_MASK)
                    + (output_format.image.format.0 & ImageFormat::THREE_CHANNEL),
            );
        }
        self.config.output_format[i].pad = [0; 3];
        self.extra.dirty_rgb |= rgb_enable_output(i);
        // A retile is only strictly needed when the transform changed, but
        // keep it simple.
        self.retile = true;
    }

    pub fn output_format(&self, i: usize) -> OutputFormatConfig {
        assert!(i < self.variant.num_branches());
        self.config.output_format[i]
    }

    pub fn set_hog(&mut self, hog: HogConfig) {
        self.config.hog = hog;
        self.extra.dirty_rgb |= RGB_ENABLE_HOG;
        self.finalise_tiling = true;
    }

    /// Non-zero width and height mean "enabled".
    pub fn set_smart_resize(&mut self, i: usize, smart_resize: SmartResize) {
        assert!(i < self.variant.num_branches());
        self.smart_resize[i] = smart_resize;
        self.smart_resize_dirty |= 1 << i;
    }

    /// Copy the dirty blocks of `update` into this configuration. The byte
    /// ranges come from the block catalogue, so only whole blocks move.
    pub fn merge_config(&mut self, update: &ConfigUpdate) {
        let src = bytemuck::bytes_of(&update.config);
        let dest = bytemuck::bytes_of_mut(&mut self.config);

        for param in CONFIG_MAP {
            if (param.dirty_bayer & update.dirty_bayer) != 0
                || (param.dirty_rgb & update.dirty_rgb) != 0
                || (param.dirty_extra & update.dirty_extra) != 0
            {
                dest[param.offset..param.offset + param.size]
                    .copy_from_slice(&src[param.offset..param.offset + param.size]);
                self.extra.dirty_bayer |= param.dirty_bayer;
                self.extra.dirty_rgb |= param.dirty_rgb;
                self.extra.dirty_extra |= param.dirty_extra;
                // Force a retile for now; this could become more granular.
                self.retile = true;
            }
        }
        debug!(
            "merged config, dirty bayer {:#x} rgb {:#x} extra {:#x}",
            self.extra.dirty_bayer, self.extra.dirty_rgb, self.extra.dirty_extra
        );
    }

    /// Forward colour-encoding matrix for a named colour space.
    pub fn initialise_ycbcr(&self, colour_space: &str) -> CcmConfig {
        self.defaults.ycbcr(colour_space)
    }

    /// Inverse colour-encoding matrix for a named colour space.
    pub fn initialise_ycbcr_inverse(&self, colour_space: &str) -> CcmConfig {
        self.defaults.ycbcr_inverse(colour_space)
    }

    /// A named resample kernel from the defaults asset.
    pub fn initialise_resample(&self, filter: &str) -> ResampleConfig {
        self.defaults.resample_filter(filter)
    }

    /// The resample kernel the smart-selection table picks for a scale.
    pub fn initialise_resample_for_scale(&self, downscale: f64) -> ResampleConfig {
        self.defaults.resample_filter_for_scale(downscale)
    }

    /// Default sharpening and sharpen/false-colour-combine settings.
    pub fn initialise_sharpen(&self) -> (SharpenConfig, ShFcCombineConfig) {
        (self.defaults.sharpen, self.defaults.sh_fc_combine)
    }

    /// An estimate of the largest horizontal downscale the hardware can do.
    pub fn max_downscale(&self) -> u32 {
        let max_tile_width = if self.options.max_tile_width != 0 {
            self.options.max_tile_width
        } else {
            self.variant.max_tile_width()
        };

        // A 640-pixel tile-width implementation can manage roughly 24x with
        // one-byte-per-pixel formats; scale with the tile width.
        const REF_DOWNSCALE: u32 = 24;
        const REF_TILE_WIDTH: u32 = 640;
        REF_DOWNSCALE * max_tile_width / REF_TILE_WIDTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::BCM2712_C0;

    fn backend() -> BackEnd {
        BackEnd::new(BackEndOptions::default(), BCM2712_C0).unwrap()
    }

    #[test]
    fn test_construction_applies_defaults() {
        let be = backend();
        // The constructor pre-loads debin, gamma, ycbcr and resample.
        assert_eq!(be.debin().h_enable, 1);
        assert_ne!(be.gamma().lut[63], 0);
        assert_ne!(be.ycbcr().coeffs[0], 0);
        assert_ne!(be.config.resample[0].coef.iter().filter(|&&c| c != 0).count(), 0);
    }

    #[test]
    fn test_oversize_tile_width_rejected() {
        let options = BackEndOptions {
            max_tile_width: 100_000,
            ..Default::default()
        };
        assert!(BackEnd::new(options, BCM2712_C0).is_err());
    }

    #[test]
    fn test_setters_raise_dirty_bits() {
        let mut be = backend();
        be.extra.dirty_bayer = 0;
        be.set_sdn(SdnConfig::default());
        assert_ne!(be.extra.dirty_bayer & BAYER_ENABLE_SDN, 0);

        be.extra.dirty_rgb = 0;
        be.set_ccm(CcmConfig::default());
        assert_ne!(be.extra.dirty_rgb & RGB_ENABLE_CCM, 0);
    }

    #[test]
    fn test_set_global_marks_new_enables_dirty() {
        let mut be = backend();
        be.extra.dirty_bayer = 0;
        let mut global = be.global();
        global.bayer_enables |= BAYER_ENABLE_BLC;
        be.set_global(global);
        assert_ne!(be.extra.dirty_bayer & BAYER_ENABLE_BLC, 0);
        assert_ne!(be.extra.dirty_extra & DIRTY_GLOBAL, 0);
    }

    #[test]
    fn test_rescale_enable_change_forces_retile() {
        let mut be = backend();
        be.retile = false;
        let mut global = be.global();
        global.rgb_enables |= RGB_ENABLE_RESAMPLE0;
        be.set_global(global);
        assert!(be.retile);
    }

    #[test]
    fn test_merge_respects_dirty_masks() {
        let mut be = backend();
        let original_sdn = be.config.sdn;

        let mut update = ConfigUpdate {
            config: BackendConfig::default(),
            dirty_bayer: BAYER_ENABLE_GEQ,
            dirty_rgb: 0,
            dirty_extra: 0,
        };
        update.config.geq = GeqConfig {
            offset: 111,
            slope_sharper: 222,
            min: 333,
            max: 444,
        };
        update.config.sdn.black_level = 999; // not selected by the mask

        be.merge_config(&update);
        assert_eq!(be.config.geq.offset, 111);
        assert_eq!(be.config.geq.max, 444);
        assert_eq!(be.config.sdn, original_sdn);
    }

    #[test]
    fn test_max_downscale_scales_with_tile_width() {
        let be = backend();
        assert_eq!(be.max_downscale(), 24);

        let options = BackEndOptions {
            max_tile_width: 320,
            ..Default::default()
        };
        let be = BackEnd::new(options, BCM2712_C0).unwrap();
        assert_eq!(be.max_downscale(), 12);
    }
}
