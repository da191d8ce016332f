//! Tiling engine
//!
//! Builds a stage graph mirroring the configured pipeline and sweeps it one
//! axis at a time to produce a rectangular grid of tiles. The X pass tiles
//! along the first row, the Y pass down the first column, and every grid
//! tile is then assembled from the X results of its column and the Y
//! results of its row. Each stage only ever records per-axis state, so the
//! two passes are independent.

use tracing::debug;

use crate::error::{PlanError, Result};
use crate::geometry::{Crop, Crop2, Dir, Interval2, Length2};
use crate::regs::NUM_OUTPUT_BRANCHES;
use crate::stages::{
    ContextConfig, CropConfig, InputConfig, OutputConfig, PipelineLimits, RegionSlot, RescaleConfig,
    RescalerType, StageArena, TileRegions,
};

// Context and alignment required by the bayer/demosaic part of the pipeline.
const PIPELINE_CONTEXT_X: i32 = 16;
const PIPELINE_CONTEXT_Y: i32 = 16;
const PIPELINE_ALIGN_X: i32 = 2;
const PIPELINE_ALIGN_Y: i32 = 2;
const COMPRESSION_ALIGN: i32 = 8;

// Resampling parameters.
const START_CONTEXT: i32 = 2;
const END_CONTEXT: i32 = 3;
const SCALE_PRECISION: u32 = 12;
const ROUND_UP: i32 = (1 << SCALE_PRECISION) - 1;

/// Everything the tiling engine needs to know about the configured
/// pipeline, distilled from the register file by the preparer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TilingConfig {
    pub input_image_size: Length2,
    pub crop: [Interval2; NUM_OUTPUT_BRANCHES],
    pub downscale_image_size: [Length2; NUM_OUTPUT_BRANCHES],
    pub output_image_size: [Length2; NUM_OUTPUT_BRANCHES],
    pub max_tile_size: Length2,
    pub min_tile_size: Length2,
    pub downscale_factor: [Length2; NUM_OUTPUT_BRANCHES],
    pub resample_factor: [Length2; NUM_OUTPUT_BRANCHES],
    pub output_h_mirror: [bool; NUM_OUTPUT_BRANCHES],
    pub resample_enables: u32,
    pub downscale_enables: u32,
    pub compressed_input: bool,
    pub input_alignment: Length2,
    /// "preferred" alignment
    pub output_max_alignment: [Length2; NUM_OUTPUT_BRANCHES],
    /// "required" minimum alignment
    pub output_min_alignment: [Length2; NUM_OUTPUT_BRANCHES],
}

fn build_pipeline(config: &TilingConfig) -> StageArena {
    let limits = PipelineLimits {
        max_tile_size: config.max_tile_size,
        min_tile_size: config.min_tile_size,
    };
    let mut arena = StageArena::new(limits);

    let input = arena.add_input(
        "input",
        InputConfig {
            input_image_size: config.input_image_size,
            alignment: config.input_alignment,
            compression_alignment: if config.compressed_input { COMPRESSION_ALIGN } else { 0 },
        },
        RegionSlot::Input,
    );

    let context = arena.add_context(
        "context",
        input,
        ContextConfig {
            context: Crop2::new(Crop::splat(PIPELINE_CONTEXT_X), Crop::splat(PIPELINE_CONTEXT_Y)),
            alignment: Length2::new(PIPELINE_ALIGN_X, PIPELINE_ALIGN_Y),
        },
        RegionSlot::Context,
    );

    let split = arena.add_split("split", context);

    for i in 0..NUM_OUTPUT_BRANCHES {
        let output_image_size = config.output_image_size[i];
        // A zero-dimension output disables the branch.
        if output_image_size.dx == 0 || output_image_size.dy == 0 {
            continue;
        }

        let crop = arena.add_crop(
            &format!("crop{i}"),
            split,
            CropConfig { crop: config.crop[i] },
            RegionSlot::Crop(i),
        );
        let mut prev = crop;

        // A disabled resize block must stay out of the calculation entirely:
        // even 1-to-1 scaling changes the tile size, because it loses
        // context.
        if config.downscale_enables & (1 << i) != 0 {
            // The downscaler has no left context; its right context is the
            // scale factor rounded up.
            let factor = config.downscale_factor[i];
            let context_right = Length2::new(
                ((factor.dx + ROUND_UP) >> SCALE_PRECISION) - 1,
                ((factor.dy + ROUND_UP) >> SCALE_PRECISION) - 1,
            );
            prev = arena.add_rescale(
                &format!("downscale{i}"),
                prev,
                RescaleConfig {
                    output_image_size: config.downscale_image_size[i],
                    scale: factor,
                    start_context: Length2::default(),
                    end_context: context_right,
                    precision: SCALE_PRECISION,
                    rescaler_type: RescalerType::Downscaler,
                },
                RegionSlot::Downscale(i),
            );
        }
        if config.resample_enables & (1 << i) != 0 {
            prev = arena.add_rescale(
                &format!("resample{i}"),
                prev,
                RescaleConfig {
                    output_image_size,
                    scale: config.resample_factor[i],
                    start_context: Length2::splat(START_CONTEXT),
                    end_context: Length2::splat(END_CONTEXT),
                    precision: SCALE_PRECISION,
                    rescaler_type: RescalerType::Resampler,
                },
                RegionSlot::Resample(i),
            );
        }

        arena.add_output(
            &format!("output{i}"),
            prev,
            OutputConfig {
                max_alignment: config.output_max_alignment[i],
                min_alignment: config.output_min_alignment[i],
                x_mirrored: config.output_h_mirror[i],
            },
            RegionSlot::Output(i),
        );
    }

    arena
}

fn tile_direction(arena: &mut StageArena, dir: Dir, max_tiles: usize) -> Result<Vec<TileRegions>> {
    debug!("tiling direction {dir}");
    arena.reset();

    let mut tiles = Vec::new();
    loop {
        if tiles.len() == max_tiles {
            return Err(PlanError::Tiling(format!("too many tiles in direction {dir}")));
        }

        for i in 0..arena.outputs.len() {
            let out = arena.outputs[i];
            let start = arena.node(out).output_interval.end();
            arena.push_start_up(out, start, dir)?;
        }
        for i in 0..arena.inputs.len() {
            let inp = arena.inputs[i];
            let end = arena.node(inp).input_interval.offset + arena.limits.max_tile_size[dir];
            arena.push_end_down(inp, end, dir)?;
        }
        for i in 0..arena.inputs.len() {
            let inp = arena.inputs[i];
            let interval = arena.node(inp).input_interval;
            arena.push_crop_down(inp, interval, dir)?;
        }

        let mut regions = TileRegions::default();
        arena.copy_out_all(&mut regions, dir);
        tiles.push(regions);

        if arena.outputs.iter().all(|&out| arena.done(out, dir)) {
            break;
        }
    }

    debug!("made {} tiles in direction {dir}", tiles.len());
    Ok(tiles)
}

fn merge_one(dest: &mut crate::geometry::Region, y_src: &crate::geometry::Region) {
    dest.input.y = y_src.input.y;
    dest.crop.y = y_src.crop.y;
    dest.output.y = y_src.output.y;
}

/// Combine the X-pass results of one column with the Y-pass results of one
/// row into a full grid tile.
fn merge_regions(x_src: &TileRegions, y_src: &TileRegions) -> TileRegions {
    let mut dest = *x_src;
    merge_one(&mut dest.input, &y_src.input);
    merge_one(&mut dest.context, &y_src.context);
    for i in 0..NUM_OUTPUT_BRANCHES {
        merge_one(&mut dest.crop[i], &y_src.crop[i]);
        merge_one(&mut dest.downscale[i], &y_src.downscale[i]);
        merge_one(&mut dest.resample[i], &y_src.resample[i]);
        merge_one(&mut dest.output[i], &y_src.output[i]);
    }
    dest
}

/// Tile the configured pipeline. Returns one `TileRegions` per grid tile in
/// row-major order, plus the grid dimensions.
pub fn tile_pipeline(config: &TilingConfig, max_tiles: usize) -> Result<(Vec<TileRegions>, Length2)> {
    debug!(
        "tiling {}x{} input, max tile {}x{}",
        config.input_image_size.dx, config.input_image_size.dy, config.max_tile_size.dx, config.max_tile_size.dy
    );

    let mut arena = build_pipeline(config);
    if arena.outputs.is_empty() {
        return Err(PlanError::Tiling("no output branches enabled".to_string()));
    }

    let x_tiles = tile_direction(&mut arena, Dir::X, max_tiles)?;
    let y_tiles = tile_direction(&mut arena, Dir::Y, max_tiles / x_tiles.len())?;

    let grid = Length2::new(x_tiles.len() as i32, y_tiles.len() as i32);
    let mut tiles = Vec::with_capacity(x_tiles.len() * y_tiles.len());
    for y in &y_tiles {
        for x in &x_tiles {
            tiles.push(merge_regions(x, y));
        }
    }

    debug!("made {}x{} tiles", grid.dx, grid.dy);
    Ok((tiles, grid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Interval;

    fn simple_config(width: i32, height: i32, out_w: i32, out_h: i32) -> TilingConfig {
        let mut config = TilingConfig {
            input_image_size: Length2::new(width, height),
            max_tile_size: Length2::new(640, 3072),
            min_tile_size: Length2::new(16, 16),
            input_alignment: Length2::new(2, 2),
            ..Default::default()
        };
        config.crop[0] = Interval2::new(Interval::new(0, width), Interval::new(0, height));
        config.output_image_size[0] = Length2::new(out_w, out_h);
        config.output_max_alignment[0] = Length2::new(64, 1);
        config.output_min_alignment[0] = Length2::new(16, 1);
        config
    }

    #[test]
    fn test_single_branch_passthrough_grid() {
        let config = simple_config(1920, 1080, 1920, 1080);
        let (tiles, grid) = tile_pipeline(&config, 64).unwrap();
        assert_eq!(tiles.len(), (grid.dx * grid.dy) as usize);
        assert!(grid.dx >= 3); // 1920 wide with 640 tiles

        // Tiles must abut without gaps along X at the input.
        let row: Vec<_> = tiles[..grid.dx as usize].to_vec();
        assert_eq!(row[0].input.input.x.offset, 0);
        for w in row.windows(2) {
            assert!(w[0].input.input.x.end() >= w[1].input.input.x.offset);
        }
        // Output intervals must cover the image exactly.
        assert_eq!(row[0].output[0].output.x.offset, 0);
        assert_eq!(row[grid.dx as usize - 1].output[0].output.x.end(), 1920);
    }

    #[test]
    fn test_output_union_covers_image() {
        let config = simple_config(1280, 720, 1280, 720);
        let (tiles, grid) = tile_pipeline(&config, 64).unwrap();

        let nx = grid.dx as usize;
        let mut covered = 0;
        for i in 0..nx {
            let out = tiles[i].output[0].output.x;
            assert_eq!(out.offset, covered);
            covered = out.end();
        }
        assert_eq!(covered, 1280);
    }

    #[test]
    fn test_no_branch_fails() {
        let mut config = simple_config(1920, 1080, 1920, 1080);
        config.output_image_size[0] = Length2::default();
        assert!(tile_pipeline(&config, 64).is_err());
    }

    #[test]
    fn test_wide_image_grid() {
        // A 4096-wide input needs at least 7 tiles of 640.
        let config = simple_config(4096, 2160, 4096, 2160);
        let (tiles, grid) = tile_pipeline(&config, 64).unwrap();
        assert!(grid.dx >= 7);
        assert_eq!(tiles.len(), (grid.dx * grid.dy) as usize);
    }
}
