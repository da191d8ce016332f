//! Image format descriptor and byte-layout calculus
//!
//! A pixel format is a packed 32-bit descriptor: bits-per-sample, planarity,
//! chroma sampling, byte order, channel count, compression mode and a few
//! special layouts (wallpaper rolls, integral images, HoG feature buffers).
//! The functions here derive byte strides, per-plane address offsets and
//! plane sizes from a descriptor plus image dimensions. They are pure and do
//! no allocation; everything downstream of them (tiling, address
//! composition) depends on their answers being exact.

use bytemuck::{Pod, Zeroable};

use crate::error::{PlanError, Result};

/// Storage rolls in wallpaper layouts are always this many bytes wide.
pub const WALLPAPER_WIDTH: u32 = 128;

/// Packed image format descriptor.
///
/// The raw bit assignments are part of the hardware ABI and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct ImageFormat(pub u32);

impl ImageFormat {
    pub const BPS_MASK: u32 = 0x0000_0003;
    pub const BPS_8: u32 = 0x0000_0000;
    pub const BPS_10: u32 = 0x0000_0001;
    pub const BPS_12: u32 = 0x0000_0002;
    pub const BPS_16: u32 = 0x0000_0003;

    pub const PLANARITY_MASK: u32 = 0x0000_0030;
    pub const PLANARITY_INTERLEAVED: u32 = 0x0000_0000;
    pub const PLANARITY_SEMI_PLANAR: u32 = 0x0000_0010;
    pub const PLANARITY_PLANAR: u32 = 0x0000_0020;

    pub const SAMPLING_MASK: u32 = 0x0000_0300;
    pub const SAMPLING_444: u32 = 0x0000_0000;
    pub const SAMPLING_422: u32 = 0x0000_0100;
    pub const SAMPLING_420: u32 = 0x0000_0200;

    pub const ORDER_NORMAL: u32 = 0x0000_0000;
    pub const ORDER_SWAPPED: u32 = 0x0000_1000;

    pub const SINGLE_CHANNEL: u32 = 0x0000_0000;
    pub const THREE_CHANNEL: u32 = 0x0001_0000;

    pub const SHIFT_MASK: u32 = 0x00f0_0000;

    pub const COMPRESSION_MASK: u32 = 0x0300_0000;
    pub const UNCOMPRESSED: u32 = 0x0000_0000;
    pub const COMPRESSION_MODE_1: u32 = 0x0100_0000;
    pub const COMPRESSION_MODE_2: u32 = 0x0200_0000;
    pub const COMPRESSION_MODE_3: u32 = 0x0300_0000;

    pub const HOG_SIGNED: u32 = 0x0400_0000;
    pub const HOG_UNSIGNED: u32 = 0x0800_0000;
    pub const INTEGRAL_IMAGE: u32 = 0x1000_0000;
    pub const WALLPAPER_ROLL: u32 = 0x2000_0000;
    pub const BPP_32: u32 = 0x4000_0000;

    pub fn bps(self) -> u32 {
        self.0 & Self::BPS_MASK
    }

    pub fn is_bps_8(self) -> bool {
        self.bps() == Self::BPS_8
    }

    pub fn is_bps_10(self) -> bool {
        self.bps() == Self::BPS_10
    }

    pub fn is_bps_12(self) -> bool {
        self.bps() == Self::BPS_12
    }

    pub fn is_bps_16(self) -> bool {
        self.bps() == Self::BPS_16
    }

    pub fn planarity(self) -> u32 {
        self.0 & Self::PLANARITY_MASK
    }

    pub fn is_interleaved(self) -> bool {
        self.planarity() == Self::PLANARITY_INTERLEAVED
    }

    pub fn is_semi_planar(self) -> bool {
        self.planarity() == Self::PLANARITY_SEMI_PLANAR
    }

    pub fn is_planar(self) -> bool {
        self.planarity() == Self::PLANARITY_PLANAR
    }

    pub fn sampling_444(self) -> bool {
        self.0 & Self::SAMPLING_MASK == Self::SAMPLING_444
    }

    pub fn sampling_422(self) -> bool {
        self.0 & Self::SAMPLING_MASK == Self::SAMPLING_422
    }

    pub fn sampling_420(self) -> bool {
        self.0 & Self::SAMPLING_MASK == Self::SAMPLING_420
    }

    pub fn is_order_swapped(self) -> bool {
        self.0 & Self::ORDER_SWAPPED != 0
    }

    pub fn is_three_channel(self) -> bool {
        self.0 & Self::THREE_CHANNEL != 0
    }

    pub fn compression_mode(self) -> u32 {
        (self.0 & Self::COMPRESSION_MASK) >> 24
    }

    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSION_MASK != 0
    }

    pub fn is_hog(self) -> bool {
        self.0 & (Self::HOG_SIGNED | Self::HOG_UNSIGNED) != 0
    }

    pub fn is_hog_unsigned(self) -> bool {
        self.0 & Self::HOG_UNSIGNED != 0
    }

    pub fn is_integral_image(self) -> bool {
        self.0 & Self::INTEGRAL_IMAGE != 0
    }

    pub fn is_wallpaper(self) -> bool {
        self.0 & Self::WALLPAPER_ROLL != 0
    }

    pub fn is_bpp_32(self) -> bool {
        self.0 & Self::BPP_32 != 0
    }
}

/// Image dimensions plus the descriptor and byte strides.
///
/// Strides are in bytes. A zero stride means "not yet computed" and will be
/// filled in during preparation; `stride2` covers the chroma plane(s) of
/// planar and semi-planar layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct ImageFormatConfig {
    pub width: u16,
    pub height: u16,
    pub format: ImageFormat,
    pub stride: i32,
    pub stride2: i32,
}

const _: () = assert!(std::mem::size_of::<ImageFormatConfig>() == 16);

/// Byte offset of column `x` in the first plane.
pub fn compute_x_offset(format: ImageFormat, x: i32) -> u32 {
    debug_assert!((0..65536).contains(&x));
    let x = x as u32;

    // HoG features are slightly different from the rest: x is in units of
    // cells, each packing to 32 bytes (unsigned histogram) or 48 (signed).
    if format.is_hog() {
        return x * if format.is_hog_unsigned() { 32 } else { 48 };
    }

    if format.is_integral_image() || format.is_bpp_32() {
        return x * 4;
    }

    let mut x_offset = if format.is_bps_16() {
        x * 2
    } else if format.is_bps_12() {
        // 2 samples in 3 bytes
        (x * 3 + 1) / 2
    } else if format.is_bps_10() {
        // 3 samples in 4 bytes
        (x / 3) * 4
    } else {
        x
    };

    if format.is_three_channel() && format.is_interleaved() {
        x_offset *= if format.sampling_422() { 2 } else { 3 };
    }

    x_offset
}

/// Set `stride`/`stride2` to the smallest legal values at least `align`-byte
/// aligned. With `preserve_subsample_ratio`, fully planar 4:2:2/4:2:0
/// layouts additionally force `stride = 2 * stride2` so plane strides match
/// the subsample ratio.
pub fn compute_stride_align(config: &mut ImageFormatConfig, align: i32, preserve_subsample_ratio: bool) {
    let format = config.format;

    if format.is_wallpaper() {
        config.stride = config.height as i32 * WALLPAPER_WIDTH as i32;
        config.stride2 = config.stride;
        if format.sampling_420() {
            config.stride2 /= 2;
        }
        return;
    }

    let mut width = config.width as i32;
    if format.is_compressed() {
        width = (width + 7) & !7; // compression uses blocks of 8 samples
    }

    let computed_stride = compute_x_offset(format, width) as i32;
    if config.stride == 0 || config.stride < computed_stride {
        config.stride = computed_stride;
    }
    config.stride2 = 0;

    if !format.is_hog() {
        if format.is_planar() {
            if format.sampling_422() || format.sampling_420() {
                config.stride2 = config.stride >> 1;
            } else if format.is_three_channel() {
                config.stride2 = config.stride;
            }
        } else if format.is_semi_planar() {
            debug_assert!(format.sampling_422() || format.sampling_420());
            config.stride2 = config.stride;
        }

        // image in memory must be sufficiently aligned
        config.stride = (config.stride + align - 1) & !(align - 1);
        config.stride2 = (config.stride2 + align - 1) & !(align - 1);

        if preserve_subsample_ratio
            && format.is_planar()
            && (format.sampling_422() || format.sampling_420())
        {
            config.stride = config.stride2 << 1;
        }
    }
}

/// Minimum (16-byte) stride finalisation.
pub fn compute_stride(config: &mut ImageFormatConfig) {
    compute_stride_align(config, crate::regs::OUTPUT_MIN_ALIGN, false);
}

/// Preferred (64-byte) stride finalisation.
pub fn compute_optimal_stride(config: &mut ImageFormatConfig) {
    compute_stride_align(config, crate::regs::OUTPUT_MAX_ALIGN, false);
}

/// Byte offsets of pixel `(x, y)` for the first plane and the chroma
/// plane(s). Interleaved layouts report zero for the second offset.
///
/// Wallpaper layouts organise storage in 128-byte rolls; a 10-bit wallpaper
/// column that is not a multiple of 3 pixels into its roll cannot be
/// addressed and is an error.
pub fn compute_addr_offset(config: &ImageFormatConfig, x: i32, y: i32) -> Result<(u32, u32)> {
    let format = config.format;

    if format.is_wallpaper() {
        let pixels_in_roll = if format.is_bps_8() {
            WALLPAPER_WIDTH as i32
        } else if format.is_bps_16() {
            WALLPAPER_WIDTH as i32 / 2
        } else {
            WALLPAPER_WIDTH as i32 / 4 * 3
        };
        let pixel_offset_in_roll = x % pixels_in_roll;

        let pixel_offset_in_bytes = if format.is_bps_8() {
            pixel_offset_in_roll
        } else if format.is_bps_16() {
            pixel_offset_in_roll * 2
        } else {
            // 10-bit format packs 3 samples in 4 bytes within the roll
            if pixel_offset_in_roll % 3 != 0 {
                return Err(PlanError::Format(format!(
                    "10-bit wallpaper x offset {pixel_offset_in_roll} not a multiple of 3 pixels into the roll"
                )));
            }
            pixel_offset_in_roll / 3 * 4
        };

        let num_rolls = x / pixels_in_roll;
        let addr = num_rolls * config.stride + y * WALLPAPER_WIDTH as i32 + pixel_offset_in_bytes;
        let addr2 = if format.sampling_420() {
            num_rolls * config.stride2 + y / 2 * WALLPAPER_WIDTH as i32 + pixel_offset_in_bytes
        } else {
            addr
        };
        return Ok((addr as u32, addr2 as u32));
    }

    let mut x_byte_offset = compute_x_offset(format, x);
    let addr = y as i64 * config.stride as i64 + x_byte_offset as i64;
    debug_assert!(addr < (1 << 32));

    let mut addr2 = 0u32;
    if !format.is_interleaved() {
        let mut y = y;
        if format.sampling_420() {
            y /= 2;
        }
        if format.is_planar() && !format.sampling_444() {
            x_byte_offset /= 2;
        }
        let a2 = y as i64 * config.stride2 as i64 + x_byte_offset as i64;
        debug_assert!(a2 < (1 << 32));
        addr2 = a2 as u32;
    }

    Ok((addr as u32, addr2))
}

/// Number of distinct memory planes the format occupies.
pub fn num_planes(format: ImageFormat) -> usize {
    if format.is_three_channel() {
        if format.is_planar() {
            3
        } else if format.is_semi_planar() {
            2
        } else {
            1
        }
    } else {
        1
    }
}

/// Size in bytes of plane `plane`, or 0 when the plane would reach 2^32 or
/// beyond — an overflow return is a validation failure the caller must
/// report, never accept.
pub fn plane_size(config: &ImageFormatConfig, plane: usize) -> u32 {
    let format = config.format;
    let stride = if plane > 0 { config.stride2 } else { config.stride }.unsigned_abs() as u64;

    let size = if format.is_wallpaper() {
        let pixels_in_roll = if format.is_bps_8() {
            WALLPAPER_WIDTH as u64
        } else if format.is_bps_16() {
            WALLPAPER_WIDTH as u64 / 2
        } else {
            WALLPAPER_WIDTH as u64 / 4 * 3
        };
        let num_rolls = (config.width as u64 + pixels_in_roll - 1) / pixels_in_roll;
        num_rolls * stride
    } else {
        let height = if plane > 0 && format.sampling_420() {
            config.height as u64 >> 1
        } else {
            config.height as u64
        };
        height * stride
    };

    if size >= 1 << 32 {
        0
    } else {
        size as u32
    }
}

/// Convert a byte alignment into the pixel alignment it implies for this
/// format, accounting for sample packing and plane subsampling.
pub fn pixel_alignment(format: ImageFormat, byte_alignment: i32) -> i32 {
    let mut alignment_pixels = byte_alignment; // 8bpp formats
    if format.is_bps_16() {
        alignment_pixels = byte_alignment / 2;
    } else if format.is_bps_10() {
        alignment_pixels = byte_alignment * 3 / 4;
    } else if format.is_bpp_32() {
        alignment_pixels = byte_alignment / 4;
    }

    if format.is_planar() && !format.sampling_444() {
        // the UV planes of fully planar 4:2:0/4:2:2 output have half the width
        alignment_pixels *= 2;
    } else if format.is_interleaved() && (format.sampling_422() || format.sampling_420()) {
        // YUYV-type outputs need only 8 pixels to make 16 bytes
        alignment_pixels /= 2;
    }

    alignment_pixels
}

// Alternate names and plane orderings are deliberately not listed so that
// the mapping stays 1:1 in both directions.
const FORMAT_NAMES: &[(&str, u32)] = &[
    (
        "YUV444P",
        ImageFormat::THREE_CHANNEL
            | ImageFormat::BPS_8
            | ImageFormat::SAMPLING_444
            | ImageFormat::PLANARITY_PLANAR,
    ),
    (
        "YUV422P",
        ImageFormat::THREE_CHANNEL
            | ImageFormat::BPS_8
            | ImageFormat::SAMPLING_422
            | ImageFormat::PLANARITY_PLANAR,
    ),
    (
        "YUV420P",
        ImageFormat::THREE_CHANNEL
            | ImageFormat::BPS_8
            | ImageFormat::SAMPLING_420
            | ImageFormat::PLANARITY_PLANAR,
    ),
    (
        "NV12",
        ImageFormat::THREE_CHANNEL
            | ImageFormat::BPS_8
            | ImageFormat::SAMPLING_420
            | ImageFormat::PLANARITY_SEMI_PLANAR,
    ),
    (
        "NV21",
        ImageFormat::THREE_CHANNEL
            | ImageFormat::BPS_8
            | ImageFormat::SAMPLING_420
            | ImageFormat::PLANARITY_SEMI_PLANAR
            | ImageFormat::ORDER_SWAPPED,
    ),
    (
        "YUYV",
        ImageFormat::THREE_CHANNEL
            | ImageFormat::BPS_8
            | ImageFormat::SAMPLING_422
            | ImageFormat::PLANARITY_INTERLEAVED,
    ),
    (
        "UYVY",
        ImageFormat::THREE_CHANNEL
            | ImageFormat::BPS_8
            | ImageFormat::SAMPLING_422
            | ImageFormat::PLANARITY_INTERLEAVED
            | ImageFormat::ORDER_SWAPPED,
    ),
    (
        "NV16",
        ImageFormat::THREE_CHANNEL
            | ImageFormat::BPS_8
            | ImageFormat::SAMPLING_422
            | ImageFormat::PLANARITY_SEMI_PLANAR,
    ),
    (
        "NV61",
        ImageFormat::THREE_CHANNEL
            | ImageFormat::BPS_8
            | ImageFormat::SAMPLING_422
            | ImageFormat::PLANARITY_SEMI_PLANAR
            | ImageFormat::ORDER_SWAPPED,
    ),
    ("RGB888", ImageFormat::THREE_CHANNEL),
    (
        "RGBX8888",
        ImageFormat::THREE_CHANNEL | ImageFormat::BPP_32 | ImageFormat::ORDER_SWAPPED,
    ),
    ("RGB161616", ImageFormat::THREE_CHANNEL | ImageFormat::BPS_16),
    ("BAYER", ImageFormat::BPS_16 | ImageFormat::UNCOMPRESSED),
    ("COMP1", ImageFormat::COMPRESSION_MODE_1),
    ("COMP2", ImageFormat::COMPRESSION_MODE_2),
];

/// Look up a descriptor by name. Returns `None` for unknown names.
pub fn format_from_name(name: &str) -> Option<ImageFormat> {
    FORMAT_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, f)| ImageFormat(f))
}

/// Reverse lookup of a descriptor's name, if it has one.
pub fn format_name(format: ImageFormat) -> Option<&'static str> {
    FORMAT_NAMES.iter().find(|&&(_, f)| f == format.0).map(|&(n, _)| n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> ImageFormat {
        format_from_name(name).unwrap()
    }

    #[test]
    fn test_predicates_per_bit() {
        let f = named("NV12");
        assert!(f.is_three_channel());
        assert!(f.is_bps_8());
        assert!(f.sampling_420());
        assert!(f.is_semi_planar());
        assert!(!f.is_planar());
        assert!(!f.is_interleaved());
        assert!(!f.is_compressed());
        assert!(!f.is_wallpaper());
        assert!(!f.is_order_swapped());

        let f = named("YUYV");
        assert!(f.is_interleaved());
        assert!(f.sampling_422());
        assert!(!f.sampling_420());
        assert!(!f.sampling_444());

        let f = named("RGBX8888");
        assert!(f.is_bpp_32());
        assert!(f.is_order_swapped());

        let f = named("RGB161616");
        assert!(f.is_bps_16());
        assert!(!f.is_bps_8());

        let f = named("COMP1");
        assert!(f.is_compressed());
        assert_eq!(f.compression_mode(), 1);
        assert!(f.is_bps_8()); // compressed implies 8 bps

        let f = ImageFormat(ImageFormat::WALLPAPER_ROLL | ImageFormat::BPS_10);
        assert!(f.is_wallpaper());
        assert!(f.is_bps_10());

        let f = ImageFormat(ImageFormat::HOG_UNSIGNED);
        assert!(f.is_hog());
        assert!(f.is_hog_unsigned());
        let f = ImageFormat(ImageFormat::HOG_SIGNED);
        assert!(f.is_hog());
        assert!(!f.is_hog_unsigned());
    }

    #[test]
    fn test_format_name_round_trip() {
        for &(name, bits) in FORMAT_NAMES {
            assert_eq!(format_from_name(name), Some(ImageFormat(bits)));
            assert_eq!(format_name(ImageFormat(bits)), Some(name));
        }
        assert_eq!(format_from_name("NOPE"), None);
    }

    #[test]
    fn test_x_offset_bps() {
        let bayer16 = named("BAYER");
        assert_eq!(compute_x_offset(bayer16, 10), 20);

        let f12 = ImageFormat(ImageFormat::BPS_12);
        assert_eq!(compute_x_offset(f12, 2), 3);
        assert_eq!(compute_x_offset(f12, 3), 5);

        let f10 = ImageFormat(ImageFormat::BPS_10);
        assert_eq!(compute_x_offset(f10, 3), 4);
        assert_eq!(compute_x_offset(f10, 6), 8);

        // interleaved three-channel multiplies out
        assert_eq!(compute_x_offset(named("RGB888"), 10), 30);
        assert_eq!(compute_x_offset(named("YUYV"), 10), 20);
        assert_eq!(compute_x_offset(named("RGBX8888"), 10), 40);
    }

    #[test]
    fn test_x_offset_hog_cells() {
        let unsigned = ImageFormat(ImageFormat::HOG_UNSIGNED);
        let signed = ImageFormat(ImageFormat::HOG_SIGNED);
        assert_eq!(compute_x_offset(unsigned, 4), 128);
        assert_eq!(compute_x_offset(signed, 4), 192);
    }

    #[test]
    fn test_stride_plain_rgb() {
        let mut cfg = ImageFormatConfig {
            width: 1920,
            height: 1080,
            format: named("RGB888"),
            stride: 0,
            stride2: 0,
        };
        compute_stride(&mut cfg);
        assert_eq!(cfg.stride, 5760); // 1920*3 already 16-byte aligned
        assert_eq!(cfg.stride2, 0);
    }

    #[test]
    fn test_stride_planar_yuv420() {
        let mut cfg = ImageFormatConfig {
            width: 1280,
            height: 720,
            format: named("YUV420P"),
            stride: 0,
            stride2: 0,
        };
        compute_stride(&mut cfg);
        assert_eq!(cfg.stride, 1280);
        assert_eq!(cfg.stride2, 640);
    }

    #[test]
    fn test_stride_semi_planar_matches() {
        let mut cfg = ImageFormatConfig {
            width: 1920,
            height: 1080,
            format: named("NV12"),
            stride: 0,
            stride2: 0,
        };
        compute_optimal_stride(&mut cfg);
        assert_eq!(cfg.stride, 1920);
        assert_eq!(cfg.stride2, cfg.stride);
        assert_eq!(cfg.stride % 64, 0);
    }

    #[test]
    fn test_stride_compressed_rounds_to_blocks() {
        let mut cfg = ImageFormatConfig {
            width: 1001,
            height: 750,
            format: named("COMP1"),
            stride: 0,
            stride2: 0,
        };
        compute_stride(&mut cfg);
        // 1001 -> 1008 samples, 8bpp, then 16-byte alignment
        assert_eq!(cfg.stride, 1008);
    }

    #[test]
    fn test_stride_wallpaper() {
        let mut cfg = ImageFormatConfig {
            width: 640,
            height: 480,
            format: ImageFormat(
                ImageFormat::THREE_CHANNEL
                    | ImageFormat::SAMPLING_420
                    | ImageFormat::PLANARITY_SEMI_PLANAR
                    | ImageFormat::WALLPAPER_ROLL,
            ),
            stride: 0,
            stride2: 0,
        };
        compute_stride(&mut cfg);
        assert_eq!(cfg.stride, 480 * 128);
        assert_eq!(cfg.stride2, 480 * 128 / 2);
        assert_eq!(cfg.stride % 128, 0);
    }

    #[test]
    fn test_stride_idempotent() {
        let mut cfg = ImageFormatConfig {
            width: 1923,
            height: 1081,
            format: named("YUV422P"),
            stride: 0,
            stride2: 0,
        };
        compute_stride(&mut cfg);
        let once = cfg;
        compute_stride(&mut cfg);
        assert_eq!(cfg, once);
    }

    #[test]
    fn test_preserve_subsample_ratio() {
        let mut cfg = ImageFormatConfig {
            width: 1000,
            height: 600,
            format: named("YUV420P"),
            stride: 0,
            stride2: 0,
        };
        compute_stride_align(&mut cfg, 16, true);
        assert_eq!(cfg.stride, 2 * cfg.stride2);
    }

    #[test]
    fn test_addr_offset_planar_chroma() {
        let mut cfg = ImageFormatConfig {
            width: 1280,
            height: 720,
            format: named("YUV420P"),
            stride: 0,
            stride2: 0,
        };
        compute_stride(&mut cfg);
        let (addr, addr2) = compute_addr_offset(&cfg, 64, 32).unwrap();
        assert_eq!(addr, 32 * 1280 + 64);
        // chroma: y halved, x halved, stride2
        assert_eq!(addr2, 16 * 640 + 32);
    }

    #[test]
    fn test_addr_offset_interleaved_no_second_plane() {
        let mut cfg = ImageFormatConfig {
            width: 640,
            height: 480,
            format: named("RGB888"),
            stride: 0,
            stride2: 0,
        };
        compute_stride(&mut cfg);
        let (addr, addr2) = compute_addr_offset(&cfg, 10, 2).unwrap();
        assert_eq!(addr, 2 * cfg.stride as u32 + 30);
        assert_eq!(addr2, 0);
    }

    #[test]
    fn test_addr_offset_wallpaper_10bit_misaligned_fails() {
        let cfg = ImageFormatConfig {
            width: 640,
            height: 480,
            format: ImageFormat(ImageFormat::WALLPAPER_ROLL | ImageFormat::BPS_10),
            stride: 480 * 128,
            stride2: 480 * 128,
        };
        assert!(compute_addr_offset(&cfg, 96, 0).is_ok());
        assert!(compute_addr_offset(&cfg, 97, 0).is_err());
    }

    #[test]
    fn test_plane_size() {
        let mut cfg = ImageFormatConfig {
            width: 1280,
            height: 720,
            format: named("YUV420P"),
            stride: 0,
            stride2: 0,
        };
        compute_stride(&mut cfg);
        assert_eq!(plane_size(&cfg, 0), 720 * 1280);
        assert_eq!(plane_size(&cfg, 1), 360 * 640);
        assert_eq!(plane_size(&cfg, 2), 360 * 640);
    }

    #[test]
    fn test_plane_size_overflow_reports_zero() {
        let cfg = ImageFormatConfig {
            width: 65535,
            height: 65535,
            format: named("RGB161616"),
            stride: i32::MAX,
            stride2: 0,
        };
        assert_eq!(plane_size(&cfg, 0), 0);
    }

    #[test]
    fn test_num_planes() {
        assert_eq!(num_planes(named("RGB888")), 1);
        assert_eq!(num_planes(named("NV12")), 2);
        assert_eq!(num_planes(named("YUV420P")), 3);
        assert_eq!(num_planes(named("BAYER")), 1);
    }

    #[test]
    fn test_pixel_alignment() {
        // 8bpp three-channel planar 4:2:0: chroma width halving doubles it
        assert_eq!(pixel_alignment(named("YUV420P"), 16), 32);
        // interleaved 4:2:2 needs half the pixels for the same bytes
        assert_eq!(pixel_alignment(named("YUYV"), 16), 8);
        // 16-bit single channel
        assert_eq!(pixel_alignment(named("BAYER"), 16), 8);
        // 32bpp
        assert_eq!(pixel_alignment(named("RGBX8888"), 16), 4);
        // 10-bit packs 3 pixels in 4 bytes
        assert_eq!(pixel_alignment(ImageFormat(ImageFormat::BPS_10), 16), 12);
    }
}
