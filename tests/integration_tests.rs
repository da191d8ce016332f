//! Integration tests for the back-end preparer and tile planner

use tilepipe::regs::*;
use tilepipe::variant::BCM2712_C0;
use tilepipe::{
    compute_addr_offset, compute_stride, format_from_name, BackEnd, BackEndOptions, ImageFormat,
    ImageFormatConfig, TilesConfig,
};

/// Helper to build a back end on the standard variant.
fn backend() -> BackEnd {
    BackEnd::new(BackEndOptions::default(), BCM2712_C0).unwrap()
}

/// Helper to build an input/output image format with a computed stride.
fn image_format(name: &str, width: u16, height: u16) -> ImageFormatConfig {
    let mut cfg = ImageFormatConfig {
        width,
        height,
        format: format_from_name(name).unwrap(),
        stride: 0,
        stride2: 0,
    };
    compute_stride(&mut cfg);
    cfg
}

fn prepare(be: &mut BackEnd) -> Box<TilesConfig> {
    let mut out = Box::new(TilesConfig::default());
    be.prepare(Some(&mut out)).unwrap();
    out
}

fn grid_size(out: &TilesConfig) -> (usize, usize) {
    let tiles = &out.tiles[..out.num_tiles as usize];
    let nx = tiles.iter().filter(|t| t.edge & TOP_EDGE != 0).count();
    let ny = tiles.iter().filter(|t| t.edge & LEFT_EDGE != 0).count();
    (nx, ny)
}

/// 1920x1080 RGB888 in, resampled to 1280x720 YUV420P on branch 0.
fn rgb_to_yuv720_backend() -> BackEnd {
    let mut be = backend();
    be.set_input_format(image_format("RGB888", 1920, 1080));

    let resample = be.initialise_resample("lanczos3");
    let resample_extra = ResampleExtra {
        scaled_width: 1280,
        scaled_height: 720,
        ..Default::default()
    };
    be.set_resample(0, resample, resample_extra);

    be.set_output_format(
        0,
        OutputFormatConfig {
            image: ImageFormatConfig {
                width: 0,
                height: 0,
                format: format_from_name("YUV420P").unwrap(),
                stride: 0,
                stride2: 0,
            },
            ..Default::default()
        },
    );

    let mut global = be.global();
    global.rgb_enables = RGB_ENABLE_INPUT
        | RGB_ENABLE_YCBCR
        | RGB_ENABLE_GAMMA
        | RGB_ENABLE_RESAMPLE0
        | RGB_ENABLE_OUTPUT0;
    be.set_global(global);
    be
}

#[test]
fn test_rgb_to_yuv420_resample() {
    let mut be = rgb_to_yuv720_backend();
    let out = prepare(&mut be);

    // The YCbCr matrix was enabled and carries the default encoding.
    assert_ne!(out.config.global.rgb_enables & RGB_ENABLE_YCBCR, 0);
    assert_ne!(out.config.ycbcr.coeffs[0], 0);

    // Resample scale is about 1.5x in both directions.
    let scale_h = out.config.resample[0].scale_factor_h as u32;
    let scale_v = out.config.resample[0].scale_factor_v as u32;
    assert!((6100..6200).contains(&scale_h), "scale_h {scale_h}");
    assert!((6100..6200).contains(&scale_v), "scale_v {scale_v}");

    // A 1920-wide input with 640-pixel tiles needs at least 3 tiles in x.
    let (nx, ny) = grid_size(&out);
    assert!(nx >= 3, "expected >= 3 x tiles, got {nx}");
    assert_eq!(nx * ny, out.num_tiles as usize);

    // Planar 4:2:0 output: the chroma stride is exactly half the luma
    // stride, and every chroma address offset follows from it.
    let image = &out.config.output_format[0].image;
    assert_eq!(image.stride, 2 * image.stride2);
    for t in &out.tiles[..out.num_tiles as usize] {
        if t.output_width[0] == 0 {
            continue;
        }
        let (addr, addr2) =
            compute_addr_offset(image, t.output_offset_x[0] as i32, t.output_offset_y[0] as i32).unwrap();
        assert_eq!(t.output_addr_offset[0], addr);
        assert_eq!(t.output_addr_offset2[0], addr2);
    }
}

#[test]
fn test_tiles_abut_and_cover() {
    let mut be = rgb_to_yuv720_backend();
    let out = prepare(&mut be);
    let (nx, ny) = grid_size(&out);
    let tiles = &out.tiles[..out.num_tiles as usize];

    // Inputs along the first row abut (allowing context overlap) and reach
    // both image edges.
    assert_eq!(tiles[0].input_offset_x, 0);
    assert_eq!(tiles[ny - 1].edge & BOTTOM_EDGE, BOTTOM_EDGE);
    let last = &tiles[nx - 1];
    assert_eq!(last.input_offset_x as i32 + last.input_width as i32, 1920);
    for w in tiles[..nx].windows(2) {
        assert!(w[0].input_offset_x as i32 + w[0].input_width as i32 >= w[1].input_offset_x as i32);
    }

    // Branch outputs tile the output image exactly: no gaps, no overlaps.
    let mut covered = 0u32;
    for t in &tiles[..nx] {
        assert_eq!(t.output_offset_x[0] as u32, covered);
        covered += t.output_width[0] as u32;
    }
    assert_eq!(covered, 1280);

    let mut covered = 0u32;
    for j in 0..ny {
        let t = &tiles[j * nx];
        assert_eq!(t.output_offset_y[0] as u32, covered);
        covered += t.output_height[0] as u32;
    }
    assert_eq!(covered, 720);
}

#[test]
fn test_min_tile_sizes_respected() {
    let mut be = rgb_to_yuv720_backend();
    let out = prepare(&mut be);
    let tiles = &out.tiles[..out.num_tiles as usize];

    for t in tiles {
        assert!(t.input_width >= 16 && t.input_height >= 16);
        if t.output_width[0] == 0 {
            continue;
        }
        if t.edge & RIGHT_EDGE == 0 {
            assert!(t.output_width[0] >= 16);
        } else {
            assert!(t.output_width[0] >= 1);
        }
        assert!(t.output_height[0] >= 16 || t.edge & BOTTOM_EDGE != 0);
    }
}

/// 4096x2160 in, integer 4x downscale to 1024x540 on branch 1 (the branch
/// with the downscaler), resample off.
#[test]
fn test_exact_downscale() {
    let mut be = backend();
    be.set_input_format(image_format("RGB888", 4096, 2160));

    be.set_downscale(
        1,
        DownscaleConfig::default(),
        DownscaleExtra {
            scaled_width: 1024,
            scaled_height: 540,
        },
    );
    be.set_output_format(
        1,
        OutputFormatConfig {
            image: ImageFormatConfig {
                width: 0,
                height: 0,
                format: format_from_name("RGB888").unwrap(),
                stride: 0,
                stride2: 0,
            },
            ..Default::default()
        },
    );

    let mut global = be.global();
    global.rgb_enables = RGB_ENABLE_INPUT | RGB_ENABLE_DOWNSCALE1 | RGB_ENABLE_OUTPUT1;
    be.set_global(global);

    let out = prepare(&mut be);

    // Exactly 4x in both axes, with the matching reciprocal.
    assert_eq!(out.config.downscale[1].scale_factor_h, 4 * 4096);
    assert_eq!(out.config.downscale[1].scale_factor_v, 4 * 4096);
    assert_eq!(out.config.downscale[1].scale_recip_h, 4096 / 4);
    assert_eq!(out.config.downscale[1].scale_recip_v, 4096 / 4);

    // The finalised output stride satisfies the preferred 64-byte alignment.
    assert_eq!(out.config.output_format[1].image.width, 1024);
    assert_eq!(out.config.output_format[1].image.stride % 64, 0);
}

/// 1920x1080 in, 960x540 out with a horizontal flip. Tile offsets must
/// mirror the unflipped plan, with identical resample phases.
#[test]
fn test_horizontal_flip_mirrors_offsets() {
    let build = |transform: u8| {
        let mut be = backend();
        be.set_input_format(image_format("RGB888", 1920, 1080));
        let resample = be.initialise_resample("lanczos3");
        let resample_extra = ResampleExtra {
            scaled_width: 960,
            scaled_height: 540,
            ..Default::default()
        };
        be.set_resample(0, resample, resample_extra);
        be.set_output_format(
            0,
            OutputFormatConfig {
                image: ImageFormatConfig {
                    width: 0,
                    height: 0,
                    format: format_from_name("RGB888").unwrap(),
                    stride: 0,
                    stride2: 0,
                },
                transform,
                ..Default::default()
            },
        );
        let mut global = be.global();
        global.rgb_enables = RGB_ENABLE_INPUT | RGB_ENABLE_RESAMPLE0 | RGB_ENABLE_OUTPUT0;
        be.set_global(global);
        prepare(&mut be)
    };

    let plain = build(TRANSFORM_NONE);
    let flipped = build(TRANSFORM_HFLIP);
    assert_eq!(plain.num_tiles, flipped.num_tiles);

    for (p, f) in plain.tiles[..plain.num_tiles as usize]
        .iter()
        .zip(&flipped.tiles[..flipped.num_tiles as usize])
    {
        assert_eq!(p.output_width[0], f.output_width[0]);
        // flipped offset = image_width - unflipped offset - width
        assert_eq!(
            f.output_offset_x[0] as i32 + f.output_width[0] as i32,
            960 - p.output_offset_x[0] as i32
        );
        // phases are computed in the unflipped frame and must match
        assert_eq!(p.resample_phase_x, f.resample_phase_x);
        assert_eq!(p.resample_phase_y, f.resample_phase_y);
    }
}

/// Dual-branch smart resize from 4056x3040: the small branch must engage
/// the downscaler, the large one must not, and every tile makes progress on
/// at least one branch.
#[test]
fn test_dual_branch_smart_resize() {
    let mut be = backend();
    be.set_input_format(image_format("RGB888", 4056, 3040));

    be.set_output_format(
        0,
        OutputFormatConfig {
            image: ImageFormatConfig {
                width: 0,
                height: 0,
                format: format_from_name("RGB888").unwrap(),
                stride: 0,
                stride2: 0,
            },
            ..Default::default()
        },
    );
    be.set_output_format(
        1,
        OutputFormatConfig {
            image: ImageFormatConfig {
                width: 0,
                height: 0,
                format: format_from_name("RGB888").unwrap(),
                stride: 0,
                stride2: 0,
            },
            ..Default::default()
        },
    );
    be.set_smart_resize(0, tilepipe::SmartResize { width: 1920, height: 1080 });
    be.set_smart_resize(1, tilepipe::SmartResize { width: 320, height: 240 });

    let mut global = be.global();
    global.rgb_enables = RGB_ENABLE_INPUT | RGB_ENABLE_OUTPUT0 | RGB_ENABLE_OUTPUT1;
    be.set_global(global);

    let out = prepare(&mut be);

    // Branch 0 has no downscaler on this variant; branch 1 needs one.
    assert_eq!(out.config.global.rgb_enables & RGB_ENABLE_DOWNSCALE0, 0);
    assert_ne!(out.config.global.rgb_enables & RGB_ENABLE_DOWNSCALE1, 0);
    assert_ne!(out.config.global.rgb_enables & RGB_ENABLE_RESAMPLE0, 0);
    assert_ne!(out.config.global.rgb_enables & RGB_ENABLE_RESAMPLE1, 0);

    // The downscaler takes 2x-8x and leaves about 2x for the resampler.
    let ds = out.config.downscale[1];
    assert!(ds.scale_factor_h >= 2 * 4096 && ds.scale_factor_h <= 8 * 4096);
    assert!(ds.scale_factor_v >= 2 * 4096 && ds.scale_factor_v <= 8 * 4096);

    assert_eq!(out.config.output_format[0].image.width, 1920);
    assert_eq!(out.config.output_format[0].image.height, 1080);
    assert_eq!(out.config.output_format[1].image.width, 320);
    assert_eq!(out.config.output_format[1].image.height, 240);

    // One grid serves both branches, and no tile is dead on both at once.
    for t in &out.tiles[..out.num_tiles as usize] {
        let b0 = t.output_width[0] as u32 * t.output_height[0] as u32;
        let b1 = t.output_width[1] as u32 * t.output_height[1] as u32;
        assert!(b0 > 0 || b1 > 0);
    }

    // Each branch's outputs cover its full image.
    let (nx, _) = grid_size(&out);
    for branch in 0..2 {
        let total: u32 = out.tiles[..nx].iter().map(|t| t.output_width[branch] as u32).sum();
        assert_eq!(total, out.config.output_format[branch].image.width as u32);
    }
}

/// TDN with reset: the temporal feedback input must be off, and no tile
/// carries a TDN input address.
#[test]
fn test_tdn_reset() {
    let mut be = backend();
    be.set_input_format(image_format("BAYER", 1920, 1080));

    be.set_tdn(TdnConfig {
        reset: 1,
        ..Default::default()
    });
    be.set_tdn_output_format(ImageFormatConfig {
        width: 0,
        height: 0,
        format: format_from_name("BAYER").unwrap(),
        stride: 0,
        stride2: 0,
    });
    be.set_output_format(
        0,
        OutputFormatConfig {
            image: ImageFormatConfig {
                width: 0,
                height: 0,
                format: format_from_name("RGB888").unwrap(),
                stride: 0,
                stride2: 0,
            },
            ..Default::default()
        },
    );

    let mut global = be.global();
    global.bayer_enables = BAYER_ENABLE_INPUT
        | BAYER_ENABLE_TDN
        | BAYER_ENABLE_TDN_OUTPUT
        | BAYER_ENABLE_DEMOSAIC;
    global.rgb_enables = RGB_ENABLE_OUTPUT0;
    be.set_global(global);

    let out = prepare(&mut be);

    // The TDN output format picked up the input dimensions and a stride.
    assert_eq!(out.config.tdn_output_format.width, 1920);
    assert_eq!(out.config.tdn_output_format.height, 1080);
    assert_ne!(out.config.tdn_output_format.stride, 0);

    for t in &out.tiles[..out.num_tiles as usize] {
        assert_eq!(t.tdn_input_addr_offset, 0);
        let (addr, _) = compute_addr_offset(
            &out.config.tdn_output_format,
            t.input_offset_x as i32,
            t.input_offset_y as i32,
        )
        .unwrap();
        assert_eq!(t.tdn_output_addr_offset, addr);
    }
}

#[test]
fn test_tdn_reset_with_input_rejected() {
    let mut be = backend();
    be.set_input_format(image_format("BAYER", 1920, 1080));
    be.set_tdn(TdnConfig {
        reset: 1,
        ..Default::default()
    });
    be.set_output_format(
        0,
        OutputFormatConfig {
            image: ImageFormatConfig {
                width: 0,
                height: 0,
                format: format_from_name("RGB888").unwrap(),
                stride: 0,
                stride2: 0,
            },
            ..Default::default()
        },
    );

    let mut global = be.global();
    global.bayer_enables = BAYER_ENABLE_INPUT
        | BAYER_ENABLE_TDN
        | BAYER_ENABLE_TDN_INPUT
        | BAYER_ENABLE_TDN_OUTPUT;
    global.rgb_enables = RGB_ENABLE_OUTPUT0;
    be.set_global(global);

    assert!(be.prepare(None).is_err());
}

/// Compressed bayer input: strides and tile widths follow 8-sample
/// compression blocks, except at the right image edge.
#[test]
fn test_compressed_bayer_input() {
    let mut be = backend();

    let mut input = ImageFormatConfig {
        width: 2028,
        height: 1522,
        format: ImageFormat(ImageFormat::COMPRESSION_MODE_1),
        stride: 0,
        stride2: 0,
    };
    compute_stride(&mut input);
    // 2028 samples round up to 2032 for 8-sample compression blocks.
    assert_eq!(input.stride, 2032);
    be.set_input_format(input);

    be.set_decompress(DecompressConfig::default());
    be.set_output_format(
        0,
        OutputFormatConfig {
            image: ImageFormatConfig {
                width: 0,
                height: 0,
                format: format_from_name("RGB888").unwrap(),
                stride: 0,
                stride2: 0,
            },
            ..Default::default()
        },
    );

    let mut global = be.global();
    global.bayer_enables = BAYER_ENABLE_INPUT | BAYER_ENABLE_DECOMPRESS | BAYER_ENABLE_DEMOSAIC;
    global.rgb_enables = RGB_ENABLE_OUTPUT0;
    be.set_global(global);

    let out = prepare(&mut be);

    for t in &out.tiles[..out.num_tiles as usize] {
        if t.edge & RIGHT_EDGE == 0 {
            assert_eq!(t.input_width % 8, 0, "tile width {} not in 8-pixel blocks", t.input_width);
        }
        assert_eq!(t.input_offset_x % 8, 0);
    }
}

#[test]
fn test_lsc_grid_offsets_follow_tiles() {
    let mut be = rgb_to_yuv720_backend();
    // Move the pipeline to bayer input so LSC applies.
    be.set_input_format(image_format("BAYER", 1920, 1080));
    be.set_lsc(LscConfig::default(), LscExtra::default());
    let mut global = be.global();
    global.bayer_enables = BAYER_ENABLE_INPUT | BAYER_ENABLE_LSC | BAYER_ENABLE_DEMOSAIC;
    global.rgb_enables &= !RGB_ENABLE_INPUT;
    be.set_global(global);

    let out = prepare(&mut be);
    let step_x = out.config.lsc.grid_step_x as u32;
    let step_y = out.config.lsc.grid_step_y as u32;
    assert_ne!(step_x, 0);

    for t in &out.tiles[..out.num_tiles as usize] {
        assert_eq!(t.lsc_grid_offset_x, t.input_offset_x as u32 * step_x);
        assert_eq!(t.lsc_grid_offset_y, t.input_offset_y as u32 * step_y);
    }
}

#[test]
fn test_neither_input_rejected() {
    let mut be = backend();
    assert!(be.prepare(None).is_err());
}

#[test]
fn test_no_output_rejected() {
    let mut be = backend();
    be.set_input_format(image_format("RGB888", 1920, 1080));
    let mut global = be.global();
    global.rgb_enables = RGB_ENABLE_INPUT;
    be.set_global(global);
    assert!(be.prepare(None).is_err());
}

#[test]
fn test_json_round_trip() {
    let mut be = rgb_to_yuv720_backend();
    let out = prepare(&mut be);

    let dump = be.get_json_config(&out).unwrap();

    // Load into a fresh instance: every catalogue field must survive
    // unchanged.
    let mut be2 = backend();
    be2.set_json_config(&dump).unwrap();

    let mut loaded = Box::new(TilesConfig::default());
    loaded.config = *be2.config();
    let dump2 = be2.get_json_config(&loaded).unwrap();

    let v1: serde_json::Value = serde_json::from_str(&dump).unwrap();
    let v2: serde_json::Value = serde_json::from_str(&dump2).unwrap();
    assert_eq!(v1["config"], v2["config"]);
}

#[test]
fn test_prepare_is_stable_across_calls() {
    let mut be = rgb_to_yuv720_backend();
    let first = prepare(&mut be);
    // Nothing changed: the second prepare must reuse the tile plan.
    let second = prepare(&mut be);
    assert_eq!(first.num_tiles, second.num_tiles);
    assert_eq!(
        &first.tiles[..first.num_tiles as usize],
        &second.tiles[..second.num_tiles as usize]
    );
}
