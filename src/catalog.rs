//! Block catalogue
//!
//! Two tables describe the register file to generic code. `CONFIG_MAP`
//! relates dirty bits to the byte range of each block and drives the
//! partial-update merger. `CONFIG_BLOCKS` and `TILE_FIELDS` name every
//! field with its offset, element size and count, and drive the JSON debug
//! dump/load. Offsets are taken from the real layouts with `offset_of!` so
//! the tables can never drift from the structs.

use std::mem::offset_of;

use crate::format::ImageFormatConfig;
use crate::regs::*;

/// One mergeable block: the dirty bits that select it and its byte range.
pub struct BlockParam {
    pub dirty_bayer: u32,
    pub dirty_rgb: u32,
    pub dirty_extra: u32,
    pub offset: usize,
    pub size: usize,
}

macro_rules! block {
    (bayer $bit:expr, $field:ident, $ty:ty) => {
        BlockParam {
            dirty_bayer: $bit,
            dirty_rgb: 0,
            dirty_extra: 0,
            offset: offset_of!(BackendConfig, $field),
            size: std::mem::size_of::<$ty>(),
        }
    };
    (rgb $bit:expr, $field:ident, $ty:ty, $index:expr) => {
        BlockParam {
            dirty_bayer: 0,
            dirty_rgb: $bit,
            dirty_extra: 0,
            offset: offset_of!(BackendConfig, $field) + $index * std::mem::size_of::<$ty>(),
            size: std::mem::size_of::<$ty>(),
        }
    };
    (extra $bit:expr, $field:ident, $ty:ty) => {
        BlockParam {
            dirty_bayer: 0,
            dirty_rgb: 0,
            dirty_extra: $bit,
            offset: offset_of!(BackendConfig, $field),
            size: std::mem::size_of::<$ty>(),
        }
    };
}

pub const CONFIG_MAP: &[BlockParam] = &[
    block!(extra DIRTY_GLOBAL, global, GlobalConfig),
    block!(extra DIRTY_SH_FC_COMBINE, sh_fc_combine, ShFcCombineConfig),
    block!(bayer BAYER_ENABLE_DECOMPRESS, decompress, DecompressConfig),
    block!(bayer BAYER_ENABLE_DPC, dpc, DpcConfig),
    block!(bayer BAYER_ENABLE_GEQ, geq, GeqConfig),
    block!(bayer BAYER_ENABLE_TDN_INPUT, tdn_input_format, ImageFormatConfig),
    block!(bayer BAYER_ENABLE_TDN_DECOMPRESS, tdn_decompress, DecompressConfig),
    block!(bayer BAYER_ENABLE_TDN, tdn, TdnConfig),
    block!(bayer BAYER_ENABLE_TDN_COMPRESS, tdn_compress, CompressConfig),
    block!(bayer BAYER_ENABLE_TDN_OUTPUT, tdn_output_format, ImageFormatConfig),
    block!(bayer BAYER_ENABLE_SDN, sdn, SdnConfig),
    block!(bayer BAYER_ENABLE_BLC, blc, BlaConfig),
    block!(bayer BAYER_ENABLE_STITCH_COMPRESS, stitch_compress, CompressConfig),
    block!(bayer BAYER_ENABLE_STITCH_OUTPUT, stitch_output_format, ImageFormatConfig),
    block!(bayer BAYER_ENABLE_STITCH_INPUT, stitch_input_format, ImageFormatConfig),
    block!(bayer BAYER_ENABLE_STITCH_DECOMPRESS, stitch_decompress, DecompressConfig),
    block!(bayer BAYER_ENABLE_STITCH, stitch, StitchConfig),
    block!(bayer BAYER_ENABLE_LSC, lsc, LscConfig),
    block!(bayer BAYER_ENABLE_WBG, wbg, WbgConfig),
    block!(bayer BAYER_ENABLE_CDN, cdn, CdnConfig),
    block!(bayer BAYER_ENABLE_CAC, cac, CacConfig),
    block!(bayer BAYER_ENABLE_DEBIN, debin, DebinConfig),
    block!(bayer BAYER_ENABLE_TONEMAP, tonemap, TonemapConfig),
    block!(bayer BAYER_ENABLE_DEMOSAIC, demosaic, DemosaicConfig),
    block!(rgb RGB_ENABLE_CCM, ccm, CcmConfig, 0),
    block!(rgb RGB_ENABLE_SAT_CONTROL, sat_control, SatControlConfig, 0),
    block!(rgb RGB_ENABLE_YCBCR, ycbcr, CcmConfig, 0),
    block!(rgb RGB_ENABLE_SHARPEN, sharpen, SharpenConfig, 0),
    block!(rgb RGB_ENABLE_FALSE_COLOUR, false_colour, FalseColourConfig, 0),
    block!(rgb RGB_ENABLE_YCBCR_INVERSE, ycbcr_inverse, CcmConfig, 0),
    block!(rgb RGB_ENABLE_GAMMA, gamma, GammaConfig, 0),
    block!(rgb RGB_ENABLE_CSC0, csc, CcmConfig, 0),
    block!(rgb RGB_ENABLE_DOWNSCALE0, downscale, DownscaleConfig, 0),
    block!(rgb RGB_ENABLE_RESAMPLE0, resample, ResampleConfig, 0),
    block!(rgb RGB_ENABLE_OUTPUT0, output_format, OutputFormatConfig, 0),
    block!(rgb RGB_ENABLE_HOG, hog, HogConfig, 0),
    block!(rgb RGB_ENABLE_CSC1, csc, CcmConfig, 1),
    block!(rgb RGB_ENABLE_DOWNSCALE1, downscale, DownscaleConfig, 1),
    block!(rgb RGB_ENABLE_RESAMPLE1, resample, ResampleConfig, 1),
    block!(rgb RGB_ENABLE_OUTPUT1, output_format, OutputFormatConfig, 1),
];

/// One named field within a block: element size in bytes and element count.
pub struct FieldDesc {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
    pub num: usize,
}

pub struct BlockDesc {
    pub name: &'static str,
    pub offset: usize,
    pub fields: &'static [FieldDesc],
}

macro_rules! field {
    ($block:ty, $name:ident, $size:expr) => {
        FieldDesc {
            name: stringify!($name),
            offset: offset_of!($block, $name),
            size: $size,
            num: 1,
        }
    };
    ($block:ty, $name:ident, $size:expr, $num:expr) => {
        FieldDesc {
            name: stringify!($name),
            offset: offset_of!($block, $name),
            size: $size,
            num: $num,
        }
    };
}

const GLOBAL_FIELDS: &[FieldDesc] = &[
    field!(GlobalConfig, bayer_enables, 4),
    field!(GlobalConfig, rgb_enables, 4),
    field!(GlobalConfig, bayer_order, 1),
];

const IMAGE_FORMAT_FIELDS: &[FieldDesc] = &[
    field!(ImageFormatConfig, width, 2),
    field!(ImageFormatConfig, height, 2),
    field!(ImageFormatConfig, format, 4),
    field!(ImageFormatConfig, stride, 4),
    field!(ImageFormatConfig, stride2, 4),
];

const DECOMPRESS_FIELDS: &[FieldDesc] = &[
    field!(DecompressConfig, offset, 2),
    field!(DecompressConfig, mode, 1),
];

const COMPRESS_FIELDS: &[FieldDesc] = &[
    field!(CompressConfig, offset, 2),
    field!(CompressConfig, mode, 1),
];

const DPC_FIELDS: &[FieldDesc] = &[
    field!(DpcConfig, coeff_level, 1),
    field!(DpcConfig, coeff_range, 1),
    field!(DpcConfig, flags, 1),
];

const GEQ_FIELDS: &[FieldDesc] = &[
    field!(GeqConfig, offset, 2),
    field!(GeqConfig, slope_sharper, 2),
    field!(GeqConfig, min, 2),
    field!(GeqConfig, max, 2),
];

const TDN_FIELDS: &[FieldDesc] = &[
    field!(TdnConfig, black_level, 2),
    field!(TdnConfig, ratio, 2),
    field!(TdnConfig, noise_constant, 2),
    field!(TdnConfig, noise_slope, 2),
    field!(TdnConfig, threshold, 2),
    field!(TdnConfig, reset, 1),
];

const SDN_FIELDS: &[FieldDesc] = &[
    field!(SdnConfig, black_level, 2),
    field!(SdnConfig, leakage, 1),
    field!(SdnConfig, noise_constant, 2),
    field!(SdnConfig, noise_slope, 2),
    field!(SdnConfig, noise_constant2, 2),
    field!(SdnConfig, noise_slope2, 2),
];

const BLC_FIELDS: &[FieldDesc] = &[
    field!(BlaConfig, black_level_r, 2),
    field!(BlaConfig, black_level_gr, 2),
    field!(BlaConfig, black_level_gb, 2),
    field!(BlaConfig, black_level_b, 2),
    field!(BlaConfig, output_black_level, 2),
];

const STITCH_FIELDS: &[FieldDesc] = &[
    field!(StitchConfig, threshold_lo, 2),
    field!(StitchConfig, threshold_diff_power, 1),
    field!(StitchConfig, exposure_ratio, 2),
    field!(StitchConfig, motion_threshold_256, 1),
    field!(StitchConfig, motion_threshold_recip, 1),
];

const LSC_FIELDS: &[FieldDesc] = &[
    field!(LscConfig, grid_step_x, 2),
    field!(LscConfig, grid_step_y, 2),
    field!(LscConfig, lut_packed, 4, (LSC_GRID_SIZE as usize + 1) * (LSC_GRID_SIZE as usize + 1)),
];

const WBG_FIELDS: &[FieldDesc] = &[
    field!(WbgConfig, gain_r, 2),
    field!(WbgConfig, gain_g, 2),
    field!(WbgConfig, gain_b, 2),
];

const CDN_FIELDS: &[FieldDesc] = &[
    field!(CdnConfig, thresh, 2),
    field!(CdnConfig, iir_strength, 1),
    field!(CdnConfig, g_adjust, 1),
];

const CAC_FIELDS: &[FieldDesc] = &[
    field!(CacConfig, grid_step_x, 2),
    field!(CacConfig, grid_step_y, 2),
    field!(CacConfig, lut, 1, (CAC_GRID_SIZE as usize + 1) * (CAC_GRID_SIZE as usize + 1) * 4),
];

const DEBIN_FIELDS: &[FieldDesc] = &[
    field!(DebinConfig, coeffs, 1, DEBIN_NUM_COEFFS),
    field!(DebinConfig, h_enable, 1),
    field!(DebinConfig, v_enable, 1),
];

const TONEMAP_FIELDS: &[FieldDesc] = &[
    field!(TonemapConfig, detail_constant, 2),
    field!(TonemapConfig, detail_slope, 2),
    field!(TonemapConfig, iir_strength, 2),
    field!(TonemapConfig, strength, 2),
    field!(TonemapConfig, lut, 4, TONEMAP_LUT_SIZE),
];

const DEMOSAIC_FIELDS: &[FieldDesc] = &[
    field!(DemosaicConfig, sharper, 1),
    field!(DemosaicConfig, fc_mode, 1),
];

const CCM_FIELDS: &[FieldDesc] = &[
    field!(CcmConfig, coeffs, 2, 9),
    field!(CcmConfig, offsets, 4, 3),
];

const SAT_CONTROL_FIELDS: &[FieldDesc] = &[
    field!(SatControlConfig, shift_r, 1),
    field!(SatControlConfig, shift_g, 1),
    field!(SatControlConfig, shift_b, 1),
];

const SHARPEN_FIELDS: &[FieldDesc] = &[
    field!(SharpenConfig, kernel0, 1, SHARPEN_SIZE * SHARPEN_SIZE),
    field!(SharpenConfig, kernel1, 1, SHARPEN_SIZE * SHARPEN_SIZE),
    field!(SharpenConfig, kernel2, 1, SHARPEN_SIZE * SHARPEN_SIZE),
    field!(SharpenConfig, kernel3, 1, SHARPEN_SIZE * SHARPEN_SIZE),
    field!(SharpenConfig, kernel4, 1, SHARPEN_SIZE * SHARPEN_SIZE),
    field!(SharpenConfig, threshold_offset0, 2),
    field!(SharpenConfig, threshold_slope0, 2),
    field!(SharpenConfig, scale0, 2),
    field!(SharpenConfig, threshold_offset1, 2),
    field!(SharpenConfig, threshold_slope1, 2),
    field!(SharpenConfig, scale1, 2),
    field!(SharpenConfig, threshold_offset2, 2),
    field!(SharpenConfig, threshold_slope2, 2),
    field!(SharpenConfig, scale2, 2),
    field!(SharpenConfig, threshold_offset3, 2),
    field!(SharpenConfig, threshold_slope3, 2),
    field!(SharpenConfig, scale3, 2),
    field!(SharpenConfig, threshold_offset4, 2),
    field!(SharpenConfig, threshold_slope4, 2),
    field!(SharpenConfig, scale4, 2),
    field!(SharpenConfig, positive_strength, 2),
    field!(SharpenConfig, positive_pre_limit, 2),
    field!(SharpenConfig, positive_func, 2, SHARPEN_FUNC_NUM_POINTS),
    field!(SharpenConfig, positive_limit, 2),
    field!(SharpenConfig, negative_strength, 2),
    field!(SharpenConfig, negative_pre_limit, 2),
    field!(SharpenConfig, negative_func, 2, SHARPEN_FUNC_NUM_POINTS),
    field!(SharpenConfig, negative_limit, 2),
    field!(SharpenConfig, enables, 1),
    field!(SharpenConfig, white, 1),
    field!(SharpenConfig, black, 1),
    field!(SharpenConfig, grey, 1),
];

const FALSE_COLOUR_FIELDS: &[FieldDesc] = &[field!(FalseColourConfig, distance, 1)];

const SH_FC_COMBINE_FIELDS: &[FieldDesc] = &[
    field!(ShFcCombineConfig, y_factor, 1),
    field!(ShFcCombineConfig, c1_factor, 1),
    field!(ShFcCombineConfig, c2_factor, 1),
];

const GAMMA_FIELDS: &[FieldDesc] = &[field!(GammaConfig, lut, 4, GAMMA_LUT_SIZE)];

const DOWNSCALE_FIELDS: &[FieldDesc] = &[
    field!(DownscaleConfig, scale_factor_h, 2),
    field!(DownscaleConfig, scale_factor_v, 2),
    field!(DownscaleConfig, scale_recip_h, 2),
    field!(DownscaleConfig, scale_recip_v, 2),
];

const RESAMPLE_FIELDS: &[FieldDesc] = &[
    field!(ResampleConfig, scale_factor_h, 2),
    field!(ResampleConfig, scale_factor_v, 2),
    field!(ResampleConfig, coef, 2, RESAMPLE_FILTER_SIZE),
];

const OUTPUT_FORMAT_FIELDS: &[FieldDesc] = &[
    field!(ImageFormatConfig, width, 2),
    field!(ImageFormatConfig, height, 2),
    field!(ImageFormatConfig, format, 4),
    field!(ImageFormatConfig, stride, 4),
    field!(ImageFormatConfig, stride2, 4),
    field!(OutputFormatConfig, transform, 1),
    field!(OutputFormatConfig, lo, 2),
    field!(OutputFormatConfig, hi, 2),
    field!(OutputFormatConfig, lo2, 2),
    field!(OutputFormatConfig, hi2, 2),
];

const HOG_FIELDS: &[FieldDesc] = &[
    field!(HogConfig, compute_signed, 1),
    field!(HogConfig, channel_mix, 1, 3),
    field!(HogConfig, stride, 4),
];

macro_rules! block_desc {
    ($name:literal, $field:ident, $fields:expr) => {
        BlockDesc {
            name: $name,
            offset: offset_of!(BackendConfig, $field),
            fields: $fields,
        }
    };
    ($name:literal, $field:ident [ $index:literal ] : $ty:ty, $fields:expr) => {
        BlockDesc {
            name: $name,
            offset: offset_of!(BackendConfig, $field) + $index * std::mem::size_of::<$ty>(),
            fields: $fields,
        }
    };
}

pub const CONFIG_BLOCKS: &[BlockDesc] = &[
    block_desc!("global", global, GLOBAL_FIELDS),
    block_desc!("input_format", input_format, IMAGE_FORMAT_FIELDS),
    block_desc!("decompress", decompress, DECOMPRESS_FIELDS),
    block_desc!("dpc", dpc, DPC_FIELDS),
    block_desc!("geq", geq, GEQ_FIELDS),
    block_desc!("tdn_input_format", tdn_input_format, IMAGE_FORMAT_FIELDS),
    block_desc!("tdn_decompress", tdn_decompress, DECOMPRESS_FIELDS),
    block_desc!("tdn", tdn, TDN_FIELDS),
    block_desc!("tdn_compress", tdn_compress, COMPRESS_FIELDS),
    block_desc!("tdn_output_format", tdn_output_format, IMAGE_FORMAT_FIELDS),
    block_desc!("sdn", sdn, SDN_FIELDS),
    block_desc!("blc", blc, BLC_FIELDS),
    block_desc!("stitch_compress", stitch_compress, COMPRESS_FIELDS),
    block_desc!("stitch_output_format", stitch_output_format, IMAGE_FORMAT_FIELDS),
    block_desc!("stitch_input_format", stitch_input_format, IMAGE_FORMAT_FIELDS),
    block_desc!("stitch_decompress", stitch_decompress, DECOMPRESS_FIELDS),
    block_desc!("stitch", stitch, STITCH_FIELDS),
    block_desc!("lsc", lsc, LSC_FIELDS),
    block_desc!("wbg", wbg, WBG_FIELDS),
    block_desc!("cdn", cdn, CDN_FIELDS),
    block_desc!("cac", cac, CAC_FIELDS),
    block_desc!("debin", debin, DEBIN_FIELDS),
    block_desc!("tonemap", tonemap, TONEMAP_FIELDS),
    block_desc!("demosaic", demosaic, DEMOSAIC_FIELDS),
    block_desc!("ccm", ccm, CCM_FIELDS),
    block_desc!("sat_control", sat_control, SAT_CONTROL_FIELDS),
    block_desc!("ycbcr", ycbcr, CCM_FIELDS),
    block_desc!("sharpen", sharpen, SHARPEN_FIELDS),
    block_desc!("false_colour", false_colour, FALSE_COLOUR_FIELDS),
    block_desc!("sh_fc_combine", sh_fc_combine, SH_FC_COMBINE_FIELDS),
    block_desc!("ycbcr_inverse", ycbcr_inverse, CCM_FIELDS),
    block_desc!("gamma", gamma, GAMMA_FIELDS),
    block_desc!("csc0", csc[0]: CcmConfig, CCM_FIELDS),
    block_desc!("csc1", csc[1]: CcmConfig, CCM_FIELDS),
    block_desc!("downscale0", downscale[0]: DownscaleConfig, DOWNSCALE_FIELDS),
    block_desc!("downscale1", downscale[1]: DownscaleConfig, DOWNSCALE_FIELDS),
    block_desc!("resample0", resample[0]: ResampleConfig, RESAMPLE_FIELDS),
    block_desc!("resample1", resample[1]: ResampleConfig, RESAMPLE_FIELDS),
    block_desc!("output_format0", output_format[0]: OutputFormatConfig, OUTPUT_FORMAT_FIELDS),
    block_desc!("output_format1", output_format[1]: OutputFormatConfig, OUTPUT_FORMAT_FIELDS),
    block_desc!("hog", hog, HOG_FIELDS),
    // the real AXI register is not part of the configuration interface
];

pub const TILE_FIELDS: &[FieldDesc] = &[
    field!(Tile, edge, 1),
    field!(Tile, input_addr_offset, 4),
    field!(Tile, input_addr_offset2, 4),
    field!(Tile, input_offset_x, 2),
    field!(Tile, input_offset_y, 2),
    field!(Tile, input_width, 2),
    field!(Tile, input_height, 2),
    field!(Tile, tdn_input_addr_offset, 4),
    field!(Tile, tdn_output_addr_offset, 4),
    field!(Tile, stitch_input_addr_offset, 4),
    field!(Tile, stitch_output_addr_offset, 4),
    field!(Tile, lsc_grid_offset_x, 4),
    field!(Tile, lsc_grid_offset_y, 4),
    field!(Tile, cac_grid_offset_x, 4),
    field!(Tile, cac_grid_offset_y, 4),
    field!(Tile, crop_x_start, 2, NUM_OUTPUT_BRANCHES),
    field!(Tile, crop_x_end, 2, NUM_OUTPUT_BRANCHES),
    field!(Tile, crop_y_start, 2, NUM_OUTPUT_BRANCHES),
    field!(Tile, crop_y_end, 2, NUM_OUTPUT_BRANCHES),
    field!(Tile, downscale_phase_x, 2, 3 * NUM_OUTPUT_BRANCHES),
    field!(Tile, downscale_phase_y, 2, 3 * NUM_OUTPUT_BRANCHES),
    field!(Tile, resample_in_width, 2, NUM_OUTPUT_BRANCHES),
    field!(Tile, resample_in_height, 2, NUM_OUTPUT_BRANCHES),
    field!(Tile, resample_phase_x, 2, 3 * NUM_OUTPUT_BRANCHES),
    field!(Tile, resample_phase_y, 2, 3 * NUM_OUTPUT_BRANCHES),
    field!(Tile, output_offset_x, 2, NUM_OUTPUT_BRANCHES),
    field!(Tile, output_offset_y, 2, NUM_OUTPUT_BRANCHES),
    field!(Tile, output_width, 2, NUM_OUTPUT_BRANCHES),
    field!(Tile, output_height, 2, NUM_OUTPUT_BRANCHES),
    field!(Tile, output_addr_offset, 4, NUM_OUTPUT_BRANCHES),
    field!(Tile, output_addr_offset2, 4, NUM_OUTPUT_BRANCHES),
    field!(Tile, output_hog_addr_offset, 4),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_stay_in_bounds() {
        let config_size = std::mem::size_of::<BackendConfig>();
        for block in CONFIG_BLOCKS {
            for f in block.fields {
                assert!(
                    block.offset + f.offset + f.size * f.num <= config_size,
                    "field {}.{} overruns the register file",
                    block.name,
                    f.name
                );
            }
        }
        for param in CONFIG_MAP {
            assert!(param.offset + param.size <= config_size);
        }
    }

    #[test]
    fn test_tile_fields_stay_in_bounds() {
        let tile_size = std::mem::size_of::<Tile>();
        for f in TILE_FIELDS {
            assert!(f.offset + f.size * f.num <= tile_size, "tile field {} overruns", f.name);
        }
    }

    #[test]
    fn test_every_dirty_bit_selects_one_block() {
        // A dirty bit must never be claimed by two catalogue entries.
        for (i, a) in CONFIG_MAP.iter().enumerate() {
            for b in &CONFIG_MAP[i + 1..] {
                assert_eq!(a.dirty_bayer & b.dirty_bayer, 0);
                assert_eq!(a.dirty_rgb & b.dirty_rgb, 0);
                assert_eq!(a.dirty_extra & b.dirty_extra, 0);
            }
        }
    }
}
