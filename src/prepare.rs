//! Frame preparation
//!
//! `BackEnd::prepare` turns the caller's accumulated block settings into a
//! hardware-ready `TilesConfig`: it sanity-checks the enables, resolves any
//! smart-resize requests, finalises every dirty-and-enabled block, retiles
//! the frame when the geometry changed, and composes per-tile addresses and
//! scaler phases.

use tracing::{debug, warn};

use crate::backend::{BackEnd, SmartResize};
use crate::error::{PlanError, Result};
use crate::format::{
    compute_addr_offset, compute_stride, compute_stride_align, pixel_alignment, ImageFormatConfig,
};
use crate::geometry::{Crop2, Interval, Interval2, Length2};
use crate::regs::*;
use crate::tiling::{tile_pipeline, TilingConfig};

// Limit stripes to a sensible height.
const MAX_STRIPE_HEIGHT: i32 = 3072;
// Precision of the scaler blocks.
const SCALE_PRECISION: u32 = 12;
const PHASE_PRECISION: u32 = 12;
const UNITY_SCALE: u32 = 1 << SCALE_PRECISION;
const UNITY_PHASE: u32 = 1 << PHASE_PRECISION;
// Polyphase filter properties.
const RESAMPLE_PRECISION: u32 = 10;
const NUM_PHASES: u32 = 16;
const NUM_TAPS: u32 = 6;

fn check_stride(config: &ImageFormatConfig) -> Result<()> {
    if config.stride % OUTPUT_MIN_ALIGN != 0 || config.stride2 % OUTPUT_MIN_ALIGN != 0 {
        return Err(PlanError::InvalidConfig(
            "output stride values not sufficiently aligned".to_string(),
        ));
    }

    if config.format.is_wallpaper() && (config.stride % 128 != 0 || config.stride2 % 128 != 0) {
        return Err(PlanError::InvalidConfig(
            "wallpaper format should have 128-byte aligned rolls".to_string(),
        ));
    }

    let mut check = *config;
    compute_stride_align(&mut check, OUTPUT_MIN_ALIGN, false);
    if check.stride > config.stride || check.stride2 > config.stride2 {
        return Err(PlanError::InvalidConfig(format!(
            "strides should be at least {} and {} but are {} and {}",
            check.stride, check.stride2, config.stride, config.stride2
        )));
    }

    Ok(())
}

fn finalise_bayer_rgb_inputs(config: &ImageFormatConfig) -> Result<()> {
    if (config.width as i32) < MIN_TILE_WIDTH || (config.height as i32) < MIN_TILE_HEIGHT {
        return Err(PlanError::InvalidConfig("input image too small".to_string()));
    }
    Ok(())
}

// Not so much finalising, just checking that input dimensions and strides
// are OK.
fn finalise_inputs(config: &BackendConfig) -> Result<()> {
    let fmt = &config.input_format;

    if config.global.bayer_enables & BAYER_ENABLE_INPUT != 0 {
        if fmt.width % 2 != 0 || fmt.height % 2 != 0 {
            return Err(PlanError::InvalidConfig(
                "bayer pipe image dimensions must be even".to_string(),
            ));
        }
        if fmt.stride % 16 != 0 {
            return Err(PlanError::InvalidConfig(
                "input stride should be at least 16-byte aligned".to_string(),
            ));
        }
    } else if config.global.rgb_enables & RGB_ENABLE_INPUT != 0 {
        if fmt.format.sampling_420() && fmt.height % 2 != 0 {
            return Err(PlanError::InvalidConfig("420 input height must be even".to_string()));
        }
        if (fmt.format.sampling_420() || fmt.format.sampling_422()) && fmt.width % 2 != 0 {
            return Err(PlanError::InvalidConfig("420/422 input width must be even".to_string()));
        }
        if fmt.format.is_wallpaper() {
            if fmt.stride % 128 != 0 || fmt.stride2 % 128 != 0 {
                return Err(PlanError::InvalidConfig(
                    "wallpaper format strides must be at least 128-byte aligned".to_string(),
                ));
            }
        } else if fmt.stride % 16 != 0 || fmt.stride2 % 16 != 0 {
            return Err(PlanError::InvalidConfig(
                "input strides must be at least 16-byte aligned".to_string(),
            ));
        }
    }

    Ok(())
}

fn finalise_decompression(config: &BackendConfig) -> Result<()> {
    let fmt = config.input_format.format;
    let bayer_enables = config.global.bayer_enables;

    if fmt.is_compressed() && bayer_enables & BAYER_ENABLE_DECOMPRESS == 0 {
        return Err(PlanError::InvalidConfig(
            "input compressed but decompression not enabled".to_string(),
        ));
    }
    if !fmt.is_compressed() && bayer_enables & BAYER_ENABLE_DECOMPRESS != 0 {
        return Err(PlanError::InvalidConfig(
            "input uncompressed but decompression enabled".to_string(),
        ));
    }
    if bayer_enables & BAYER_ENABLE_DECOMPRESS != 0 && !fmt.is_bps_8() {
        return Err(PlanError::InvalidConfig("compressed input is not 8bpp".to_string()));
    }

    Ok(())
}

// ACLS algorithms might want the grid calculations here to match the
// AWB/ACLS statistics regions.
fn finalise_lsc(lsc: &mut LscConfig, lsc_extra: &LscExtra, width: u16, height: u16) -> Result<()> {
    const P: u32 = LSC_STEP_PRECISION;

    if width == 0 || height == 0 {
        return Err(PlanError::InvalidConfig("LSC grid requires a valid input size".to_string()));
    }

    if lsc.grid_step_x == 0 {
        lsc.grid_step_x = ((LSC_GRID_SIZE << P) / width as u32) as u16;
    }
    if lsc.grid_step_y == 0 {
        lsc.grid_step_y = ((LSC_GRID_SIZE << P) / height as u32) as u16;
    }

    if lsc.grid_step_x as u64 * (width as u64 + lsc_extra.offset_x as u64 - 1) >= (LSC_GRID_SIZE as u64) << P
        || lsc.grid_step_y as u64 * (height as u64 + lsc_extra.offset_y as u64 - 1) >= (LSC_GRID_SIZE as u64) << P
    {
        return Err(PlanError::InvalidConfig("LSC grid steps overrun the grid".to_string()));
    }

    Ok(())
}

fn finalise_cac(cac: &mut CacConfig, cac_extra: &CacExtra, width: u16, height: u16) -> Result<()> {
    const P: u32 = CAC_STEP_PRECISION;

    if width == 0 || height == 0 {
        return Err(PlanError::InvalidConfig("CAC grid requires a valid input size".to_string()));
    }

    if cac.grid_step_x == 0 {
        cac.grid_step_x = ((CAC_GRID_SIZE << P) / width as u32) as u16;
    }
    if cac.grid_step_y == 0 {
        cac.grid_step_y = ((CAC_GRID_SIZE << P) / height as u32) as u16;
    }

    if cac.grid_step_x as u64 * (width as u64 + cac_extra.offset_x as u64 - 1) >= (CAC_GRID_SIZE as u64) << P
        || cac.grid_step_y as u64 * (height as u64 + cac_extra.offset_y as u64 - 1) >= (CAC_GRID_SIZE as u64) << P
    {
        return Err(PlanError::InvalidConfig("CAC grid steps overrun the grid".to_string()));
    }

    Ok(())
}

fn finalise_resample(
    resample: &mut ResampleConfig,
    resample_extra: &ResampleExtra,
    width: u16,
    height: u16,
) -> Result<()> {
    if resample_extra.scaled_width < 2 || resample_extra.scaled_height < 2 || width < 2 || height < 2 {
        return Err(PlanError::InvalidConfig(format!(
            "resample {}x{} -> {}x{} is too small",
            width, height, resample_extra.scaled_width, resample_extra.scaled_height
        )));
    }

    let scale_factor_h = (((width as u32 - 1) << SCALE_PRECISION) / (resample_extra.scaled_width as u32 - 1)) as u32;
    let scale_factor_v = (((height as u32 - 1) << SCALE_PRECISION) / (resample_extra.scaled_height as u32 - 1)) as u32;

    if scale_factor_h < UNITY_SCALE / 16
        || scale_factor_h >= 16 * UNITY_SCALE
        || scale_factor_v < UNITY_SCALE / 16
        || scale_factor_v >= 16 * UNITY_SCALE
    {
        return Err(PlanError::InvalidConfig(
            "invalid resample scaling factors (must be < 16x down/upscale)".to_string(),
        ));
    }

    resample.scale_factor_h = scale_factor_h as u16;
    resample.scale_factor_v = scale_factor_v as u16;
    Ok(())
}

fn finalise_downscale(
    downscale: &mut DownscaleConfig,
    downscale_extra: &DownscaleExtra,
    width: u16,
    height: u16,
) -> Result<()> {
    if downscale_extra.scaled_width == 0 || downscale_extra.scaled_height == 0 {
        return Err(PlanError::InvalidConfig("downscale output size not set".to_string()));
    }

    debug!(
        "downscale {}x{} -> {}x{}",
        width, height, downscale_extra.scaled_width, downscale_extra.scaled_height
    );

    let scale_factor_h = ((width as u32) << SCALE_PRECISION) / downscale_extra.scaled_width as u32;
    let scale_factor_v = ((height as u32) << SCALE_PRECISION) / downscale_extra.scaled_height as u32;

    let valid = |scale: u32| scale == UNITY_SCALE || (2 * UNITY_SCALE..=8 * UNITY_SCALE).contains(&scale);
    if !valid(scale_factor_h) || !valid(scale_factor_v) {
        return Err(PlanError::InvalidConfig(
            "invalid downscale factors (must be 1x or >= 2x && <= 8x)".to_string(),
        ));
    }

    downscale.scale_factor_h = scale_factor_h as u16;
    downscale.scale_factor_v = scale_factor_v as u16;
    downscale.scale_recip_h =
        (((downscale_extra.scaled_width as u32) << SCALE_PRECISION) / width as u32) as u16;
    downscale.scale_recip_v =
        (((downscale_extra.scaled_height as u32) << SCALE_PRECISION) / height as u32) as u16;

    Ok(())
}

// TDN and stitch I/O dimensions must match the input, though the format may
// differ.
fn check_rawio_format(fmt: &mut ImageFormatConfig, width: u16, height: u16) -> Result<()> {
    if fmt.width == 0 || fmt.height == 0 {
        fmt.width = width;
        fmt.height = height;
    } else if fmt.width != width || fmt.height != height {
        return Err(PlanError::InvalidConfig(
            "image dimensions do not match input".to_string(),
        ));
    }

    if fmt.stride == 0 {
        compute_stride(fmt);
        Ok(())
    } else {
        check_stride(fmt)
    }
}

fn finalise_tdn(config: &mut BackendConfig) -> Result<()> {
    let enables = config.global.bayer_enables;
    let tdn_enabled = enables & BAYER_ENABLE_TDN != 0;
    let tdn_input_enabled = enables & BAYER_ENABLE_TDN_INPUT != 0;
    let tdn_decompress_enabled = enables & BAYER_ENABLE_TDN_DECOMPRESS != 0;
    let tdn_compress_enabled = enables & BAYER_ENABLE_TDN_COMPRESS != 0;
    let tdn_output_enabled = enables & BAYER_ENABLE_TDN_OUTPUT != 0;
    let fmt = config.tdn_output_format.format;

    if tdn_enabled && !tdn_output_enabled {
        return Err(PlanError::InvalidConfig(
            "TDN output not enabled when TDN enabled".to_string(),
        ));
    }
    if fmt.is_compressed() && !tdn_compress_enabled {
        return Err(PlanError::InvalidConfig(
            "TDN output compressed but compression not enabled".to_string(),
        ));
    }
    if !fmt.is_compressed() && tdn_compress_enabled {
        return Err(PlanError::InvalidConfig(
            "TDN output uncompressed but compression enabled".to_string(),
        ));
    }
    if tdn_compress_enabled && !fmt.is_bps_8() {
        return Err(PlanError::InvalidConfig(
            "TDN output does not match compression mode".to_string(),
        ));
    }

    let (width, height) = (config.input_format.width, config.input_format.height);
    if tdn_output_enabled {
        check_rawio_format(&mut config.tdn_output_format, width, height)?;
    }
    if tdn_input_enabled {
        check_rawio_format(&mut config.tdn_input_format, width, height)?;
    }

    if !tdn_enabled {
        if tdn_input_enabled {
            return Err(PlanError::InvalidConfig(
                "TDN input enabled but TDN not enabled".to_string(),
            ));
        }
        // There is a weird (and entirely pointless) case where TDN is
        // disabled but TDN output is on, which we allow.
    } else if config.tdn.reset != 0 {
        if tdn_input_enabled {
            return Err(PlanError::InvalidConfig(
                "TDN input enabled but TDN being reset".to_string(),
            ));
        }
    } else {
        if !tdn_input_enabled {
            return Err(PlanError::InvalidConfig(
                "TDN input not enabled but TDN not being reset".to_string(),
            ));
        }
        // Make the TDN input match the output if it's unset; usually the
        // sensible thing to do.
        if config.tdn_input_format.width == 0 && config.tdn_input_format.height == 0 {
            config.tdn_input_format = config.tdn_output_format;
        }
        if fmt.is_compressed() && !tdn_decompress_enabled {
            return Err(PlanError::InvalidConfig(
                "TDN input compressed but decompression not enabled".to_string(),
            ));
        }
        if !fmt.is_compressed() && tdn_decompress_enabled {
            return Err(PlanError::InvalidConfig(
                "TDN input uncompressed but decompression enabled".to_string(),
            ));
        }
    }

    Ok(())
}

fn finalise_stitch(config: &mut BackendConfig) -> Result<()> {
    let enables = config.global.bayer_enables;
    let stitch_enabled = enables & BAYER_ENABLE_STITCH != 0;
    let stitch_input_enabled = enables & BAYER_ENABLE_STITCH_INPUT != 0;
    let stitch_decompress_enabled = enables & BAYER_ENABLE_STITCH_DECOMPRESS != 0;
    let stitch_compress_enabled = enables & BAYER_ENABLE_STITCH_COMPRESS != 0;
    let stitch_output_enabled = enables & BAYER_ENABLE_STITCH_OUTPUT != 0;
    let input_fmt = config.stitch_input_format.format;
    let output_fmt = config.stitch_output_format.format;

    if stitch_enabled != stitch_input_enabled {
        return Err(PlanError::InvalidConfig(
            "stitch and stitch_input should be enabled/disabled together".to_string(),
        ));
    }
    if stitch_input_enabled && input_fmt.is_compressed() && !stitch_decompress_enabled {
        return Err(PlanError::InvalidConfig(
            "stitch input compressed but decompression not enabled".to_string(),
        ));
    }
    if stitch_input_enabled && !input_fmt.is_compressed() && stitch_decompress_enabled {
        return Err(PlanError::InvalidConfig(
            "stitch input uncompressed but decompression enabled".to_string(),
        ));
    }
    if stitch_output_enabled && output_fmt.is_compressed() && !stitch_compress_enabled {
        return Err(PlanError::InvalidConfig(
            "stitch output compressed but compression not enabled".to_string(),
        ));
    }
    if stitch_output_enabled && !output_fmt.is_compressed() && stitch_compress_enabled {
        return Err(PlanError::InvalidConfig(
            "stitch output uncompressed but compression enabled".to_string(),
        ));
    }
    if stitch_decompress_enabled && !input_fmt.is_bps_8() {
        return Err(PlanError::InvalidConfig(
            "stitch input does not match compression mode".to_string(),
        ));
    }
    if stitch_compress_enabled && !output_fmt.is_bps_8() {
        return Err(PlanError::InvalidConfig(
            "stitch output does not match compression mode".to_string(),
        ));
    }

    let (width, height) = (config.input_format.width, config.input_format.height);
    if stitch_output_enabled {
        check_rawio_format(&mut config.stitch_output_format, width, height)?;
    }
    if stitch_input_enabled {
        check_rawio_format(&mut config.stitch_input_format, width, height)?;
    }

    // Compute the motion threshold reciprocal if it hasn't been done. The
    // result is rounded up where possible as the block works (ever so
    // slightly) better like this.
    if config.stitch.motion_threshold_recip == 0 {
        config.stitch.motion_threshold_recip = if config.stitch.motion_threshold_256 == 0 {
            255
        } else {
            let t = config.stitch.motion_threshold_256 as u32;
            255.min((256 + t - 1) / t) as u8
        };
    }

    Ok(())
}

fn finalise_output(config: &mut OutputFormatConfig) -> Result<()> {
    // A zero high clipping bound means it wasn't set and no clipping is
    // wanted.
    if config.hi == 0 {
        config.hi = 65535;
    }
    if config.hi2 == 0 {
        config.hi2 = 65535;
    }

    if (config.image.width as i32) < MIN_TILE_WIDTH || (config.image.height as i32) < MIN_TILE_HEIGHT {
        return Err(PlanError::InvalidConfig("output image too small".to_string()));
    }

    if config.image.format.sampling_420() && config.image.height % 2 != 0 {
        return Err(PlanError::InvalidConfig("420 image height should be even".to_string()));
    }
    if (config.image.format.sampling_420() || config.image.format.sampling_422())
        && config.image.width % 2 != 0
    {
        return Err(PlanError::InvalidConfig("420/422 image width should be even".to_string()));
    }

    if config.image.format.is_wallpaper() {
        if config.image.stride % 128 != 0 || config.image.stride2 % 128 != 0 {
            return Err(PlanError::InvalidConfig(
                "wallpaper image stride should be at least 128-byte aligned".to_string(),
            ));
        }
    } else if config.image.stride % 16 != 0 || config.image.stride2 % 16 != 0 {
        return Err(PlanError::InvalidConfig(
            "image stride should be at least 16-byte aligned".to_string(),
        ));
    }

    Ok(())
}

fn lcm(a: i32, b: i32) -> i32 {
    let (orig_a, orig_b) = (a, b);
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let tmp = a % b;
        a = b;
        b = tmp;
    }
    orig_a / a * orig_b
}

fn calculate_input_alignment(config: &BackendConfig) -> Length2 {
    if config.global.rgb_enables & RGB_ENABLE_INPUT != 0 {
        debug!("RGB input enabled");
        // 4-byte alignment AND an even number of pixels; rows in pairs only
        // for 4:2:0 input.
        return Length2::new(
            lcm(pixel_alignment(config.input_format.format, INPUT_ALIGN), 2),
            if config.input_format.format.sampling_420() { 2 } else { 1 },
        );
    }

    let bayer_enables = config.global.bayer_enables;
    // 4-byte alignment automatically covers 2-pixel alignment for all the
    // raw formats.
    let mut alignment = pixel_alignment(config.input_format.format, INPUT_ALIGN);

    // Any compressed input forces 8-pixel alignment.
    if config.input_format.format.is_compressed()
        || (bayer_enables & BAYER_ENABLE_TDN_INPUT != 0 && config.tdn_input_format.format.is_compressed())
        || (bayer_enables & BAYER_ENABLE_STITCH_INPUT != 0
            && config.stitch_input_format.format.is_compressed())
    {
        alignment = lcm(alignment, COMPRESSED_ALIGN);
    }

    // Enabled bayer outputs need 16-byte alignment, which also covers those
    // outputs being compressed.
    if bayer_enables & BAYER_ENABLE_TDN_OUTPUT != 0 {
        alignment = lcm(
            alignment,
            pixel_alignment(config.tdn_output_format.format, OUTPUT_MIN_ALIGN),
        );
    }
    if bayer_enables & BAYER_ENABLE_STITCH_OUTPUT != 0 {
        alignment = lcm(
            alignment,
            pixel_alignment(config.stitch_output_format.format, OUTPUT_MIN_ALIGN),
        );
    }

    Length2::new(alignment, 2) // bayer input rows always come in pairs
}

fn calculate_output_alignment(format: crate::format::ImageFormat, align: i32) -> Length2 {
    let y_alignment = if format.sampling_420() { 2 } else { 1 };
    Length2::new(pixel_alignment(format, align), y_alignment)
}

fn check_tiles(
    tiles: &[Tile],
    rgb_enables: u32,
    num_branches: usize,
    tiling_config: &TilingConfig,
) -> Result<()> {
    for (tile_num, tile) in tiles.iter().enumerate() {
        // zero inputs shouldn't be possible
        debug_assert!(tile.input_width != 0 && tile.input_height != 0);

        if (tile.input_width as i32) < MIN_TILE_WIDTH || (tile.input_height as i32) < MIN_TILE_HEIGHT {
            return Err(PlanError::Tiling("tile too small at input".to_string()));
        }

        for i in 0..num_branches {
            if rgb_enables & rgb_enable_output(i) == 0 {
                continue;
            }

            let width_after_crop =
                tile.input_width as i32 - tile.crop_x_start[i] as i32 - tile.crop_x_end[i] as i32;
            let height_after_crop =
                tile.input_height as i32 - tile.crop_y_start[i] as i32 - tile.crop_y_end[i] as i32;

            // A tile cropped away completely can't produce output, and vice
            // versa.
            let cropped_away = width_after_crop * height_after_crop == 0;
            let no_output = tile.output_width[i] as i32 * tile.output_height[i] as i32 == 0;
            if cropped_away != no_output {
                return Err(PlanError::Tiling(format!(
                    "tile {tile_num} output {i} cropping and output size disagree"
                )));
            }

            // Zero size legitimately means "no output"; otherwise minimum
            // tile sizes apply.
            if cropped_away {
                continue;
            }

            let rh_edge = tile.output_offset_x[i] as i32 + tile.output_width[i] as i32
                == tiling_config.output_image_size[i].dx;

            if width_after_crop < MIN_TILE_WIDTH {
                warn!(
                    "tile {tile_num} output {i} narrow after crop: input_width {} after_crop {width_after_crop}",
                    tile.input_width
                );
                if !rh_edge {
                    return Err(PlanError::Tiling("tile width too small after crop".to_string()));
                }
            }
            if height_after_crop < MIN_TILE_HEIGHT {
                return Err(PlanError::Tiling("tile height too small after crop".to_string()));
            }

            if (tile.resample_in_width[i] as i32) < MIN_TILE_WIDTH {
                warn!(
                    "tile {tile_num} output {i} narrow after downscale: {}",
                    tile.resample_in_width[i]
                );
                if !rh_edge {
                    return Err(PlanError::Tiling("tile width too small after downscale".to_string()));
                }
            }
            if (tile.resample_in_height[i] as i32) < MIN_TILE_HEIGHT {
                return Err(PlanError::Tiling("tile height too small after downscale".to_string()));
            }

            if !rh_edge && (tile.output_width[i] as i32) < MIN_TILE_WIDTH {
                return Err(PlanError::Tiling("tile width too small at output".to_string()));
            }
            if (tile.output_height[i] as i32) < MIN_TILE_HEIGHT {
                return Err(PlanError::Tiling("tile height too small at output".to_string()));
            }
        }
    }

    Ok(())
}

impl BackEnd {
    /// Resolve the width/height a branch will produce, without checking
    /// whether the output is enabled.
    fn output_size(&self, i: usize, input_format: &ImageFormatConfig) -> (u16, u16) {
        if self.smart_resize[i].width != 0 && self.smart_resize[i].height != 0 {
            (self.smart_resize[i].width, self.smart_resize[i].height)
        } else if self.config.global.rgb_enables & rgb_enable_resample(i) != 0 {
            (self.extra.resample[i].scaled_width, self.extra.resample[i].scaled_height)
        } else if self.config.global.rgb_enables & rgb_enable_downscale(i) != 0 {
            (self.extra.downscale[i].scaled_width, self.extra.downscale[i].scaled_height)
        } else if self.extra.crop[i].width != 0 {
            // crop width and height are zero when the crop is disabled
            (self.extra.crop[i].width, self.extra.crop[i].height)
        } else {
            (input_format.width, input_format.height)
        }
    }

    /// The image format branch `i` will write: dimensions resolved through
    /// smart-resize/rescale/crop and a stride filled in (or validated) from
    /// the format. Disabled branches produce an all-zero geometry.
    pub fn compute_output_image_format(
        &self,
        i: usize,
        input_format: &ImageFormatConfig,
    ) -> Result<ImageFormatConfig> {
        assert!(i < self.variant.num_branches());
        let mut fmt = self.config.output_format[i].image;

        if self.config.global.rgb_enables & rgb_enable_output(i) != 0 {
            let (width, height) = self.output_size(i, input_format);
            fmt.width = width;
            fmt.height = height;
            if fmt.stride == 0 {
                compute_stride(&mut fmt);
            } else {
                check_stride(&fmt)?;
            }
        } else {
            fmt.width = 0;
            fmt.height = 0;
            fmt.stride = 0;
            fmt.stride2 = 0;
        }

        Ok(fmt)
    }

    // Adjust the scaling blocks of any branch with a pending smart-resize
    // request.
    fn update_smart_resize(&mut self) {
        for i in 0..self.variant.num_branches() {
            // The input to the rescalers: crops are zero when not in use.
            let mut input_width = self.extra.crop[i].width;
            if input_width == 0 {
                input_width = self.config.input_format.width;
            }
            let mut input_height = self.extra.crop[i].height;
            if input_height == 0 {
                input_height = self.config.input_format.height;
            }

            let pending = self.smart_resize_dirty & (1 << i) != 0
                || self.extra.dirty_extra & DIRTY_CROP != 0;
            if !pending || self.smart_resize[i].width == 0 || self.smart_resize[i].height == 0 {
                continue;
            }

            let SmartResize { width: target_width, height: target_height } = self.smart_resize[i];
            let mut resampler_input_width = input_width;
            let mut resampler_input_height = input_height;

            debug!(
                "smart resize branch {i}: input {input_width}x{input_height} output {target_width}x{target_height}"
            );

            // Use the downscaler when it exists on this branch and we're
            // reducing by more than 2x on either axis.
            if self.variant.downscaler_available(i)
                && ((target_width as u32 * 2) < input_width as u32
                    || (target_height as u32 * 2) < input_height as u32)
            {
                let mut downscaler_output_width = input_width;
                let mut downscaler_output_height = input_height;

                // Aim to leave 2x for the resampler and put the rest into
                // the downscaler, remembering it must do at least 2x and at
                // most 8x (rounding that limit up).
                if (target_width as u32 * 2) < input_width as u32 {
                    downscaler_output_width = (target_width as i32 * 2)
                        .clamp((input_width as i32 + 7) / 8, input_width as i32 / 2)
                        as u16;
                }
                if (target_height as u32 * 2) < input_height as u32 {
                    downscaler_output_height = (target_height as i32 * 2)
                        .clamp((input_height as i32 + 7) / 8, input_height as i32 / 2)
                        as u16;
                }

                debug!("using downscaler, output {downscaler_output_width}x{downscaler_output_height}");

                self.set_downscale_extra(
                    i,
                    DownscaleExtra {
                        scaled_width: downscaler_output_width,
                        scaled_height: downscaler_output_height,
                    },
                );
                self.config.global.rgb_enables |= rgb_enable_downscale(i);

                resampler_input_width = downscaler_output_width;
                resampler_input_height = downscaler_output_height;
            } else {
                self.config.global.rgb_enables &= !rgb_enable_downscale(i);
            }

            // Program the resampler. When the x and y factors are (close
            // to) the same, we're reducing by more than 2x, and the factor
            // fits within the filter taps, the polyphase filter can act as
            // a trapezoidal downscaler by constructing per-phase
            // coefficients directly; this improves quality for larger
            // factors. Otherwise pick a named kernel by scale factor from
            // the defaults.
            let scale_factor_x =
                (resampler_input_width as f64 - 1.0) / (target_width as f64 - 1.0);
            let scale_factor_y =
                (resampler_input_height as f64 - 1.0) / (target_height as f64 - 1.0);

            let resample = if scale_factor_x > 2.1
                && scale_factor_x < scale_factor_y * 1.1
                && scale_factor_y < scale_factor_x * 1.1
            {
                debug!("setting the polyphase filter as a trapezoidal filter");
                trapezoidal_filter(scale_factor_x)
            } else {
                self.initialise_resample_for_scale(scale_factor_x)
            };

            let resample_extra = ResampleExtra {
                scaled_width: target_width,
                scaled_height: target_height,
                ..Default::default()
            };
            self.set_resample(i, resample, resample_extra);
            self.config.global.rgb_enables |= rgb_enable_resample(i);
        }

        self.smart_resize_dirty = 0;
    }

    // Only finalise blocks that are dirty *and* enabled.
    fn finalise_config(&mut self) -> Result<()> {
        let dirty_bayer = self.extra.dirty_bayer & self.config.global.bayer_enables;
        let dirty_rgb = self.extra.dirty_rgb & self.config.global.rgb_enables;

        if dirty_bayer & BAYER_ENABLE_INPUT != 0 || dirty_rgb & RGB_ENABLE_INPUT != 0 {
            finalise_bayer_rgb_inputs(&self.config.input_format)?;
        }

        if dirty_bayer & BAYER_ENABLE_INPUT != 0 {
            finalise_inputs(&self.config)?;
        }

        if dirty_bayer & (BAYER_ENABLE_INPUT | BAYER_ENABLE_DECOMPRESS) != 0 {
            finalise_decompression(&self.config)?;
        }

        if self.extra.dirty_bayer
            & (BAYER_ENABLE_TDN
                | BAYER_ENABLE_TDN_INPUT
                | BAYER_ENABLE_TDN_DECOMPRESS
                | BAYER_ENABLE_TDN_COMPRESS
                | BAYER_ENABLE_TDN_OUTPUT)
            != 0
        {
            finalise_tdn(&mut self.config)?;
        }

        if self.extra.dirty_bayer
            & (BAYER_ENABLE_STITCH
                | BAYER_ENABLE_STITCH_INPUT
                | BAYER_ENABLE_STITCH_DECOMPRESS
                | BAYER_ENABLE_STITCH_COMPRESS
                | BAYER_ENABLE_STITCH_OUTPUT)
            != 0
        {
            finalise_stitch(&mut self.config)?;
        }

        if dirty_bayer & BAYER_ENABLE_LSC != 0 {
            finalise_lsc(
                &mut self.config.lsc,
                &self.extra.lsc,
                self.config.input_format.width,
                self.config.input_format.height,
            )?;
        }

        if dirty_bayer & BAYER_ENABLE_CAC != 0 {
            finalise_cac(
                &mut self.config.cac,
                &self.extra.cac,
                self.config.input_format.width,
                self.config.input_format.height,
            )?;
        }

        for j in 0..self.variant.num_branches() {
            let enabled = self.config.global.rgb_enables & rgb_enable_output(j) != 0;
            if !enabled {
                continue;
            }

            // The crop is enabled when it contains a non-zero width/height.
            let mut width = if self.extra.crop[j].width != 0 {
                self.extra.crop[j].width
            } else {
                self.config.input_format.width
            };
            let mut height = if self.extra.crop[j].width != 0 {
                self.extra.crop[j].height
            } else {
                self.config.input_format.height
            };

            if dirty_rgb & rgb_enable_downscale(j) != 0 {
                if !self.variant.downscaler_available(j) {
                    return Err(PlanError::InvalidConfig(format!(
                        "downscale is not available in output branch {j}"
                    )));
                }
                finalise_downscale(&mut self.config.downscale[j], &self.extra.downscale[j], width, height)?;
            }

            if self.config.global.rgb_enables & rgb_enable_downscale(j) != 0 {
                // With the downscaler enabled the resample stage sees its
                // output size instead.
                width = self.extra.downscale[j].scaled_width;
                height = self.extra.downscale[j].scaled_height;
            }

            if dirty_rgb & rgb_enable_resample(j) != 0 {
                finalise_resample(&mut self.config.resample[j], &self.extra.resample[j], width, height)?;
            }

            if dirty_rgb & rgb_enable_output(j) != 0 {
                finalise_output(&mut self.config.output_format[j])?;
            }
        }

        // Finally check for a sane collection of enable bits.
        if self.config.global.bayer_enables & BAYER_ENABLE_INPUT == 0 && self.config.global.bayer_enables != 0 {
            return Err(PlanError::InvalidConfig(
                "bayer input disabled but bayer pipe active".to_string(),
            ));
        }

        let bayer_input = self.config.global.bayer_enables & BAYER_ENABLE_INPUT != 0;
        let rgb_input = self.config.global.rgb_enables & RGB_ENABLE_INPUT != 0;
        if bayer_input == rgb_input {
            return Err(PlanError::InvalidConfig(
                "exactly one of bayer and RGB inputs should be enabled".to_string(),
            ));
        }

        let mut output_enables = self.config.global.bayer_enables
            & (BAYER_ENABLE_TDN_OUTPUT | BAYER_ENABLE_STITCH_OUTPUT);
        for i in 0..self.variant.num_branches() {
            output_enables |= self.config.global.rgb_enables & rgb_enable_output(i);
        }
        if output_enables == 0 {
            return Err(PlanError::InvalidConfig("not configured to do anything".to_string()));
        }

        Ok(())
    }

    fn build_tiling_config(&self) -> TilingConfig {
        let c = &self.config;
        let ce = &self.extra;

        let mut tc = TilingConfig {
            input_alignment: calculate_input_alignment(c),
            input_image_size: Length2::new(c.input_format.width as i32, c.input_format.height as i32),
            ..Default::default()
        };

        debug!("input alignments are {} pixels", tc.input_alignment);

        for i in 0..self.variant.num_branches() {
            tc.crop[i] = Interval2::new(
                Interval::new(ce.crop[i].offset_x as i32, ce.crop[i].width as i32),
                Interval::new(ce.crop[i].offset_y as i32, ce.crop[i].height as i32),
            );
            if tc.crop[i].x.length == 0 || tc.crop[i].y.length == 0 {
                tc.crop[i] = Interval2::new(
                    Interval::new(0, c.input_format.width as i32),
                    Interval::new(0, c.input_format.height as i32),
                );
            }

            tc.output_h_mirror[i] = c.output_format[i].transform & TRANSFORM_HFLIP != 0;
            tc.downscale_factor[i] = Length2::new(
                c.downscale[i].scale_factor_h as i32,
                c.downscale[i].scale_factor_v as i32,
            );
            tc.resample_factor[i] = Length2::new(
                c.resample[i].scale_factor_h as i32,
                c.resample[i].scale_factor_v as i32,
            );
            tc.downscale_image_size[i] = Length2::new(
                ce.downscale[i].scaled_width as i32,
                ce.downscale[i].scaled_height as i32,
            );
            tc.output_image_size[i] = Length2::new(
                c.output_format[i].image.width as i32,
                c.output_format[i].image.height as i32,
            );
            tc.output_max_alignment[i] =
                calculate_output_alignment(c.output_format[i].image.format, OUTPUT_MAX_ALIGN);
            tc.output_min_alignment[i] =
                calculate_output_alignment(c.output_format[i].image.format, OUTPUT_MIN_ALIGN);
        }

        tc.max_tile_size.dx = if self.options.max_tile_width != 0 {
            self.options.max_tile_width as i32
        } else {
            self.variant.max_tile_width() as i32
        };
        tc.max_tile_size.dy = if self.options.max_stripe_height != 0 {
            self.options.max_stripe_height as i32
        } else {
            MAX_STRIPE_HEIGHT
        };
        tc.min_tile_size = Length2::new(MIN_TILE_WIDTH, MIN_TILE_HEIGHT);
        tc.resample_enables = c.global.rgb_enables / RGB_ENABLE_RESAMPLE0;
        tc.downscale_enables = c.global.rgb_enables / RGB_ENABLE_DOWNSCALE0;

        // Leave compressed_input off: the tiling would otherwise pad tiles
        // to multiples of 8 pixels even beyond the image width, and we've
        // chosen not to handle compression like that.
        tc.compressed_input = false;

        tc
    }

    fn update_tiles(&mut self) -> Result<()> {
        if self.retile {
            self.retile = false;
            let tiling_config = self.build_tiling_config();
            self.tiles = self.retile_pipeline(&tiling_config)?;
            check_tiles(
                &self.tiles,
                self.config.global.rgb_enables,
                self.variant.num_branches(),
                &tiling_config,
            )?;
            self.finalise_tiling = true;
        }

        if self.finalise_tiling {
            self.compose_tiles()?;
            self.finalise_tiling = false;
        }

        Ok(())
    }

    // Convert the tiling library's regions into hardware tile records.
    fn retile_pipeline(&mut self, tiling_config: &TilingConfig) -> Result<Vec<Tile>> {
        let (regions, grid) = tile_pipeline(tiling_config, NUM_TILES)?;
        self.num_tiles_x = grid.dx as usize;
        self.num_tiles_y = grid.dy as usize;

        let num_branches = self.variant.num_branches();
        let (nx, ny) = (self.num_tiles_x, self.num_tiles_y);
        let mut tiles = Vec::with_capacity(nx * ny);

        for (idx, r) in regions.iter().enumerate() {
            let mut t = Tile::default();

            if idx < nx {
                t.edge |= TOP_EDGE;
            }
            if idx >= nx * (ny - 1) {
                t.edge |= BOTTOM_EDGE;
            }
            if idx % nx == 0 {
                t.edge |= LEFT_EDGE;
            }
            if (idx + 1) % nx == 0 {
                t.edge |= RIGHT_EDGE;
            }

            t.input_offset_x = r.input.input.x.offset as u16;
            t.input_offset_y = r.input.input.y.offset as u16;
            t.input_width = r.input.input.x.length as u16;
            t.input_height = r.input.input.y.length as u16;

            if r.input.output != r.input.input {
                return Err(PlanError::Tiling("tiling error in bayer pipe".to_string()));
            }

            for j in 0..num_branches {
                let enabled = self.config.global.rgb_enables & rgb_enable_output(j) != 0;

                if enabled && (r.output[j].output.x.length == 0 || r.output[j].output.y.length == 0) {
                    // A tile that produces no output sends nothing down this
                    // branch: make the crop eat everything and zero the rest.
                    t.crop_x_start[j] = t.input_width;
                    t.crop_x_end[j] = 0;
                    t.crop_y_start[j] = t.input_height;
                    t.crop_y_end[j] = 0;
                    t.resample_in_width[j] = 0;
                    t.resample_in_height[j] = 0;
                    t.output_offset_x[j] = 0;
                    t.output_offset_y[j] = 0;
                    t.output_width[j] = 0;
                    t.output_height[j] = 0;
                    continue;
                }

                let downscale_enabled = self.config.global.rgb_enables & rgb_enable_downscale(j) != 0;
                let resample_enabled = self.config.global.rgb_enables & rgb_enable_resample(j) != 0;

                let mut resample_size = r.crop[j].output;
                resample_size.x = resample_size.x - r.resample[j].crop.x;
                resample_size.y = resample_size.y - r.resample[j].crop.y;

                // With a resize stage disabled, the tile size after it is
                // that of the next block's input, and the resize adds no
                // crop of its own.
                let downscale_crop: Crop2;
                if downscale_enabled {
                    downscale_crop = r.downscale[j].crop + r.crop[j].crop;
                    // The resample block's input is the downscaler's output.
                    resample_size = r.downscale[j].output;
                } else if resample_enabled {
                    downscale_crop = r.resample[j].crop + r.crop[j].crop;
                } else {
                    downscale_crop = r.output[j].crop + r.crop[j].crop;
                }

                t.crop_x_start[j] = downscale_crop.x.start as u16;
                t.crop_x_end[j] = downscale_crop.x.end as u16;
                t.crop_y_start[j] = downscale_crop.y.start as u16;
                t.crop_y_end[j] = downscale_crop.y.end as u16;
                t.resample_in_width[j] = resample_size.x.length as u16;
                t.resample_in_height[j] = resample_size.y.length as u16;
                t.output_offset_x[j] = r.output[j].output.x.offset as u16;
                t.output_offset_y[j] = r.output[j].output.y.offset as u16;
                t.output_width[j] = r.output[j].output.x.length as u16;
                t.output_height[j] = r.output[j].output.y.length as u16;

                for p in 0..3 {
                    // Initial per-plane downsampler/resampler phases.
                    if downscale_enabled {
                        let frac_x = (resample_size.x.offset as u32
                            * self.config.downscale[j].scale_factor_h as u32)
                            & (UNITY_SCALE - 1);
                        let frac_y = (resample_size.y.offset as u32
                            * self.config.downscale[j].scale_factor_v as u32)
                            & (UNITY_SCALE - 1);
                        // The fractional part of the input needed to
                        // generate the output pixel.
                        t.downscale_phase_x[p * num_branches + j] = (UNITY_PHASE - frac_x) as u16;
                        t.downscale_phase_y[p * num_branches + j] = (UNITY_PHASE - frac_y) as u16;
                    }

                    if resample_enabled {
                        // Where the output pixel sits in the interpolated
                        // (input) image.
                        let interpolated_pix_x = ((t.output_offset_x[j] as u64
                            * NUM_PHASES as u64
                            * self.config.resample[j].scale_factor_h as u64)
                            >> SCALE_PRECISION) as u32;
                        let interpolated_pix_y = ((t.output_offset_y[j] as u64
                            * NUM_PHASES as u64
                            * self.config.resample[j].scale_factor_v as u64)
                            >> SCALE_PRECISION) as u32;
                        // Phase of the interpolated input pixel, plus any
                        // caller-supplied initial phase (which may be
                        // negative).
                        let mut phase_x = (((interpolated_pix_x % NUM_PHASES) << SCALE_PRECISION)
                            / NUM_PHASES) as i32;
                        let mut phase_y = (((interpolated_pix_y % NUM_PHASES) << SCALE_PRECISION)
                            / NUM_PHASES) as i32;
                        phase_x += self.extra.resample[j].initial_phase_h[p] as i32;
                        phase_y += self.extra.resample[j].initial_phase_v[p] as i32;

                        if !(0..=2 * UNITY_PHASE as i32 - 1).contains(&phase_x)
                            || !(0..=2 * UNITY_PHASE as i32 - 1).contains(&phase_y)
                        {
                            return Err(PlanError::Tiling(format!(
                                "resample phase out of range for tile {idx} output {j}"
                            )));
                        }

                        t.resample_phase_x[p * num_branches + j] = phase_x as u16;
                        t.resample_phase_y[p * num_branches + j] = phase_y as u16;
                    }
                }

                // Per-plane phase difference cannot exceed 0.5 pixels on
                // the output dimensions.
                if resample_enabled {
                    let check = |phases: &[u16], scale_factor: u16| -> bool {
                        let phase_max =
                            ((scale_factor as u32 * UNITY_PHASE / 2) >> SCALE_PRECISION) as i32;
                        let p0 = phases[j] as i32;
                        let p1 = phases[num_branches + j] as i32;
                        let p2 = phases[2 * num_branches + j] as i32;
                        (p0 - p1).abs() <= phase_max
                            && (p1 - p2).abs() <= phase_max
                            && (p0 - p2).abs() <= phase_max
                    };
                    if !check(&t.resample_phase_x, self.config.resample[j].scale_factor_h) {
                        return Err(PlanError::Tiling(
                            "resample phase x for tile is > 0.5 pixels on the output dimensions".to_string(),
                        ));
                    }
                    if !check(&t.resample_phase_y, self.config.resample[j].scale_factor_v) {
                        return Err(PlanError::Tiling(
                            "resample phase y for tile is > 0.5 pixels on the output dimensions".to_string(),
                        ));
                    }
                }
            }

            tiles.push(t);
        }

        Ok(tiles)
    }

    // Fill in the per-tile addresses and grid offsets from the pipeline
    // configuration.
    fn compose_tiles(&mut self) -> Result<()> {
        let config = &self.config;
        let extra = &self.extra;
        let num_branches = self.variant.num_branches();

        for t in &mut self.tiles {
            let (x, y) = (t.input_offset_x as i32, t.input_offset_y as i32);

            let (addr, addr2) = compute_addr_offset(&config.input_format, x, y)?;
            t.input_addr_offset = addr;
            t.input_addr_offset2 = addr2;

            t.tdn_input_addr_offset = if config.global.bayer_enables & BAYER_ENABLE_TDN_INPUT != 0 {
                compute_addr_offset(&config.tdn_input_format, x, y)?.0
            } else {
                0
            };
            t.tdn_output_addr_offset = if config.global.bayer_enables & BAYER_ENABLE_TDN_OUTPUT != 0 {
                compute_addr_offset(&config.tdn_output_format, x, y)?.0
            } else {
                0
            };
            t.stitch_input_addr_offset = if config.global.bayer_enables & BAYER_ENABLE_STITCH_INPUT != 0 {
                compute_addr_offset(&config.stitch_input_format, x, y)?.0
            } else {
                0
            };
            t.stitch_output_addr_offset = if config.global.bayer_enables & BAYER_ENABLE_STITCH_OUTPUT != 0 {
                compute_addr_offset(&config.stitch_output_format, x, y)?.0
            } else {
                0
            };

            debug!(
                "input offsets {x},{y} address offsets {} and {}",
                t.input_addr_offset, t.input_addr_offset2
            );

            if config.global.bayer_enables & BAYER_ENABLE_LSC != 0 {
                t.lsc_grid_offset_x =
                    (x as u32 + extra.lsc.offset_x as u32) * config.lsc.grid_step_x as u32;
                t.lsc_grid_offset_y =
                    (y as u32 + extra.lsc.offset_y as u32) * config.lsc.grid_step_y as u32;
            }

            if config.global.bayer_enables & BAYER_ENABLE_CAC != 0 {
                t.cac_grid_offset_x =
                    (x as u32 + extra.cac.offset_x as u32) * config.cac.grid_step_x as u32;
                t.cac_grid_offset_y =
                    (y as u32 + extra.cac.offset_y as u32) * config.cac.grid_step_y as u32;
            }

            for j in 0..num_branches {
                if config.global.rgb_enables & rgb_enable_output(j) == 0 {
                    continue;
                }
                // A branch producing nothing for this tile contributes no
                // output addresses either.
                if t.output_width[j] == 0 || t.output_height[j] == 0 {
                    continue;
                }
                let image = &config.output_format[j].image;
                let unflipped_x = t.output_offset_x[j];
                let unflipped_y = t.output_offset_y[j];

                if config.output_format[j].transform & TRANSFORM_HFLIP != 0 {
                    t.output_offset_x[j] = image.width - unflipped_x - t.output_width[j];
                }
                if config.output_format[j].transform & TRANSFORM_VFLIP != 0 {
                    // single-line addressing: point at the first (top) line
                    // of the flipped tile
                    t.output_offset_y[j] = image.height - unflipped_y - 1;
                }

                let (addr, addr2) = compute_addr_offset(
                    image,
                    t.output_offset_x[j] as i32,
                    t.output_offset_y[j] as i32,
                )?;
                t.output_addr_offset[j] = addr;
                t.output_addr_offset2[j] = addr2;

                debug!(
                    "branch {j} output offsets {},{} address offsets {} and {}",
                    t.output_offset_x[j], t.output_offset_y[j], addr, addr2
                );
            }
        }

        Ok(())
    }

    /// Validate, finalise and tile the frame.
    ///
    /// With `Some(out)` the finished register file and tile plan are copied
    /// into `out` and the dirty state is cleared; with `None` only the
    /// internal configuration is brought up to date.
    pub fn prepare(&mut self, out: Option<&mut TilesConfig>) -> Result<()> {
        debug!("new frame");

        // 1. The input configuration must be coherent.
        let bayer_input = self.config.global.bayer_enables & BAYER_ENABLE_INPUT != 0;
        let rgb_input = self.config.global.rgb_enables & RGB_ENABLE_INPUT != 0;
        if !bayer_input && !rgb_input {
            return Err(PlanError::InvalidConfig(
                "neither bayer nor RGB inputs are enabled".to_string(),
            ));
        }
        if bayer_input && rgb_input {
            return Err(PlanError::InvalidConfig(
                "both bayer and RGB inputs are enabled".to_string(),
            ));
        }

        // 2. The output configuration must be filled in and sensible.
        // Buffer addresses are left to the caller's I/O layer.
        let input_format = self.config.input_format;
        for i in 0..self.variant.num_branches() {
            let fmt = self.compute_output_image_format(i, &input_format)?;
            if fmt.format.is_integral_image() {
                return Err(PlanError::InvalidConfig("integral images are not supported".to_string()));
            }
            self.config.output_format[i].image = fmt;
        }

        // 3. Fill in any other missing configuration and retile if needed.
        self.update_smart_resize();
        self.finalise_config()?;
        self.update_tiles()?;

        // 4. Hand the config and tiles over, and clear the dirty state for
        // the next update.
        if let Some(out) = out {
            let num_tiles = self.num_tiles_x * self.num_tiles_y;
            out.config = self.config;
            out.tiles[..num_tiles].copy_from_slice(&self.tiles);
            out.num_tiles = num_tiles as i32;

            self.extra.dirty_bayer = 0;
            self.extra.dirty_rgb = 0;
            self.extra.dirty_extra = 0;
        }

        Ok(())
    }
}

/// Per-phase trapezoidal low-pass coefficients for the polyphase filter.
///
/// The arithmetic here (float multiplies, truncation on narrowing) is part
/// of the observable behaviour: the coefficients come out through the debug
/// dump, so the exact rounding must not change.
fn trapezoidal_filter(scale_factor: f64) -> ResampleConfig {
    let mut resample = ResampleConfig::default();
    let scale_factor = scale_factor.min((NUM_TAPS - 1) as f64);

    for p in 0..NUM_PHASES as usize {
        // The initial phase for the current pixel (offset 2 in the filter)
        // is 1 - p/NUM_PHASES.
        let c0 = (1 << RESAMPLE_PRECISION) as i32
            - ((p << RESAMPLE_PRECISION) as u32 / NUM_PHASES) as i32;
        resample.coef[p * NUM_TAPS as usize] = (c0 as f64 / scale_factor) as i16;

        let mut scale = scale_factor - (1.0 - p as f64 / NUM_PHASES as f64);
        for t in 1..(1 + scale_factor.ceil() as usize) {
            let s = scale.min(1.0);
            resample.coef[p * NUM_TAPS as usize + t] =
                (s * (1 << RESAMPLE_PRECISION) as f64 / scale_factor) as i16;
            scale -= s;
        }
    }

    resample
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcm() {
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(8, 8), 8);
        assert_eq!(lcm(3, 5), 15);
        assert_eq!(lcm(2, 16), 16);
    }

    #[test]
    fn test_motion_threshold_recip_rounds_up() {
        let mut config = BackendConfig::default();
        config.global.bayer_enables = BAYER_ENABLE_STITCH | BAYER_ENABLE_STITCH_INPUT;
        config.input_format.width = 64;
        config.input_format.height = 64;
        config.stitch.motion_threshold_256 = 100;
        finalise_stitch(&mut config).unwrap();
        // (256 + 100 - 1) / 100 = 3, not the naive 256/100 = 2
        assert_eq!(config.stitch.motion_threshold_recip, 3);

        let mut config2 = BackendConfig::default();
        config2.global.bayer_enables = BAYER_ENABLE_STITCH | BAYER_ENABLE_STITCH_INPUT;
        config2.input_format.width = 64;
        config2.input_format.height = 64;
        finalise_stitch(&mut config2).unwrap();
        assert_eq!(config2.stitch.motion_threshold_recip, 255);
    }

    #[test]
    fn test_downscale_factor_range() {
        let mut downscale = DownscaleConfig::default();
        let extra = DownscaleExtra { scaled_width: 1024, scaled_height: 540 };
        finalise_downscale(&mut downscale, &extra, 4096, 2160).unwrap();
        assert_eq!(downscale.scale_factor_h, (4 * UNITY_SCALE) as u16);
        assert_eq!(downscale.scale_factor_v, (4 * UNITY_SCALE) as u16);
        assert_eq!(downscale.scale_recip_h, (UNITY_SCALE / 4) as u16);
        assert_eq!(downscale.scale_recip_v, (UNITY_SCALE / 4) as u16);

        // 1.5x is outside {1} ∪ [2, 8]
        let extra = DownscaleExtra { scaled_width: 2730, scaled_height: 1440 };
        assert!(finalise_downscale(&mut downscale, &extra, 4096, 2160).is_err());
    }

    #[test]
    fn test_resample_factor_range() {
        let mut resample = ResampleConfig::default();
        let extra = ResampleExtra {
            scaled_width: 1280,
            scaled_height: 720,
            ..Default::default()
        };
        finalise_resample(&mut resample, &extra, 1920, 1080).unwrap();
        // (1919 << 12) / 1279 ~= 1.5 * 4096
        assert!((6100..6200).contains(&resample.scale_factor_h));

        // 20x downscale is out of range
        let extra = ResampleExtra {
            scaled_width: 96,
            scaled_height: 54,
            ..Default::default()
        };
        assert!(finalise_resample(&mut resample, &extra, 1920, 1080).is_err());
    }

    #[test]
    fn test_lsc_grid_steps() {
        let mut lsc = LscConfig::default();
        let extra = LscExtra::default();
        finalise_lsc(&mut lsc, &extra, 1920, 1080).unwrap();
        assert_eq!(lsc.grid_step_x, ((32u32 << 18) / 1920) as u16);
        assert_eq!(lsc.grid_step_y, ((32u32 << 18) / 1080) as u16);
        // the last pixel must stay inside the grid
        assert!(lsc.grid_step_x as u32 * 1919 < 32u32 << 18);
    }

    #[test]
    fn test_trapezoidal_filter_rows() {
        // Pin one phase table so any arithmetic drift is caught: at scale 3,
        // phase 0 has coefficients 1024/3 then unit steps of 1024/3 down.
        let f = trapezoidal_filter(3.0);
        assert_eq!(f.coef[0], 341); // (1024 / 3) truncated
        // remaining taps cover scale - 1.0 = 2.0 pixels: two full units
        assert_eq!(f.coef[1], 341);
        assert_eq!(f.coef[2], 341);
        assert_eq!(f.coef[3], 0);

        // every row's magnitude stays near unity (within truncation loss)
        for p in 0..16 {
            let sum: i32 = f.coef[p * 6..(p + 1) * 6].iter().map(|&c| c as i32).sum();
            assert!((1024 - 6..=1024).contains(&sum), "phase {p} sum {sum}");
        }
    }

    #[test]
    fn test_check_stride_rejects_misalignment() {
        let mut cfg = ImageFormatConfig {
            width: 1920,
            height: 1080,
            format: crate::format::format_from_name("RGB888").unwrap(),
            stride: 0,
            stride2: 0,
        };
        compute_stride(&mut cfg);
        assert!(check_stride(&cfg).is_ok());

        cfg.stride += 4; // no longer 16-byte aligned
        assert!(check_stride(&cfg).is_err());

        cfg.stride = 16; // aligned but too small
        assert!(check_stride(&cfg).is_err());
    }
}
