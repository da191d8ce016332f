//! Stage graph for the tile planner
//!
//! The pipeline is modelled as a small DAG of stages: one input, a context
//! stage for neighbourhood filters, a split, and per-branch crop, rescale
//! and output stages. Tiling sweeps one axis at a time; during a sweep each
//! stage tracks the interval of samples it reads, the crop it applies and
//! the interval it produces.
//!
//! Stages live in an arena and refer to each other by index, so the
//! recursive push operations (`push_start_up`, `push_end_down`,
//! `push_end_up`, `push_crop_down`) are plain functions over the arena
//! rather than virtual calls through pointers.
//!
//! Coordinate conventions: interval ends are exclusive. A `_p` suffix marks
//! a fixed-point value shifted left by the scale precision. For rescale
//! stages, "context" refers to the extra pixels the filter kernel needs on
//! each side of the nominal span.

use tracing::{debug, warn};

use crate::error::{PlanError, Result};
use crate::geometry::{Crop, Crop2, Dir, Interval, Interval2, Length2, Region};

/// Limits shared by every stage in one tiling run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineLimits {
    pub max_tile_size: Length2,
    pub min_tile_size: Length2,
}

#[derive(Debug, Clone, Copy)]
pub struct InputConfig {
    pub input_image_size: Length2,
    pub alignment: Length2,
    /// extra X alignment for compressed inputs (0 = uncompressed)
    pub compression_alignment: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextConfig {
    pub context: Crop2,
    pub alignment: Length2,
}

#[derive(Debug, Clone, Copy)]
pub struct CropConfig {
    /// absolute crop rectangle in input coordinates
    pub crop: Interval2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescalerType {
    /// integer-ratio trapezoidal downscaler, variable-sized kernel
    Downscaler,
    /// six-tap polyphase resampler, fixed-sized context
    Resampler,
}

#[derive(Debug, Clone, Copy)]
pub struct RescaleConfig {
    pub output_image_size: Length2,
    /// per-axis scale factors, fixed point
    pub scale: Length2,
    pub start_context: Length2,
    pub end_context: Length2,
    pub precision: u32,
    pub rescaler_type: RescalerType,
}

#[derive(Debug, Clone, Copy)]
pub struct OutputConfig {
    /// preferred alignment
    pub max_alignment: Length2,
    /// mandatory alignment
    pub min_alignment: Length2,
    pub x_mirrored: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum StageKind {
    Input(InputConfig),
    Context(ContextConfig),
    Crop(CropConfig),
    Rescale(RescaleConfig),
    Split,
    Output(OutputConfig),
}

/// Which slot of the emitted tile record this stage writes via `copy_out`.
#[derive(Debug, Clone, Copy)]
pub enum RegionSlot {
    Input,
    Context,
    Crop(usize),
    Downscale(usize),
    Resample(usize),
    Output(usize),
}

#[derive(Debug, Clone)]
enum Link {
    None,
    One(usize),
    Many(Vec<usize>),
}

pub struct StageNode {
    name: String,
    kind: StageKind,
    upstream: Option<usize>,
    downstream: Link,
    pub input_interval: Interval,
    pub crop: Crop,
    pub output_interval: Interval,
    /// crop stages: whether this branch has begun producing output
    started: bool,
    /// split stages: branches heard from so far in `push_start_up`
    pending: usize,
    slot: Option<RegionSlot>,
}

/// X and Y results for every slot-carrying stage, for one tile.
#[derive(Debug, Clone, Copy, Default)]
pub struct TileRegions {
    pub input: Region,
    pub context: Region,
    pub crop: [Region; crate::regs::NUM_OUTPUT_BRANCHES],
    pub downscale: [Region; crate::regs::NUM_OUTPUT_BRANCHES],
    pub resample: [Region; crate::regs::NUM_OUTPUT_BRANCHES],
    pub output: [Region; crate::regs::NUM_OUTPUT_BRANCHES],
}

impl TileRegions {
    fn slot_mut(&mut self, slot: RegionSlot) -> &mut Region {
        match slot {
            RegionSlot::Input => &mut self.input,
            RegionSlot::Context => &mut self.context,
            RegionSlot::Crop(i) => &mut self.crop[i],
            RegionSlot::Downscale(i) => &mut self.downscale[i],
            RegionSlot::Resample(i) => &mut self.resample[i],
            RegionSlot::Output(i) => &mut self.output[i],
        }
    }
}

pub struct StageArena {
    pub limits: PipelineLimits,
    nodes: Vec<StageNode>,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

impl StageArena {
    pub fn new(limits: PipelineLimits) -> Self {
        StageArena {
            limits,
            nodes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn node(&self, id: usize) -> &StageNode {
        &self.nodes[id]
    }

    fn add(&mut self, name: &str, kind: StageKind, upstream: Option<usize>, slot: Option<RegionSlot>) -> usize {
        let id = self.nodes.len();
        self.nodes.push(StageNode {
            name: name.to_string(),
            kind,
            upstream,
            downstream: Link::None,
            input_interval: Interval::default(),
            crop: Crop::default(),
            output_interval: Interval::default(),
            started: false,
            pending: 0,
            slot,
        });

        if let Some(up) = upstream {
            let up_is_split = matches!(self.nodes[up].kind, StageKind::Split);
            match &mut self.nodes[up].downstream {
                link @ Link::None => {
                    *link = if up_is_split { Link::Many(vec![id]) } else { Link::One(id) };
                }
                Link::Many(v) => v.push(id),
                Link::One(_) => panic!("stage already has a downstream"),
            }
        }

        match kind {
            StageKind::Input(mut cfg) => {
                // If the compression needs more alignment than the basic X
                // alignment, just bump the X alignment up. One must be a
                // multiple of the other.
                debug_assert!(
                    cfg.compression_alignment == 0
                        || cfg.alignment.dx % cfg.compression_alignment == 0
                        || cfg.compression_alignment % cfg.alignment.dx == 0
                );
                cfg.alignment.dx = cfg.alignment.dx.max(cfg.compression_alignment);
                self.nodes[id].kind = StageKind::Input(cfg);
                self.inputs.push(id);
            }
            StageKind::Output(_) => self.outputs.push(id),
            _ => {}
        }

        id
    }

    pub fn add_input(&mut self, name: &str, config: InputConfig, slot: RegionSlot) -> usize {
        self.add(name, StageKind::Input(config), None, Some(slot))
    }

    pub fn add_context(&mut self, name: &str, upstream: usize, config: ContextConfig, slot: RegionSlot) -> usize {
        self.add(name, StageKind::Context(config), Some(upstream), Some(slot))
    }

    pub fn add_crop(&mut self, name: &str, upstream: usize, config: CropConfig, slot: RegionSlot) -> usize {
        self.add(name, StageKind::Crop(config), Some(upstream), Some(slot))
    }

    pub fn add_rescale(&mut self, name: &str, upstream: usize, config: RescaleConfig, slot: RegionSlot) -> usize {
        self.add(name, StageKind::Rescale(config), Some(upstream), Some(slot))
    }

    pub fn add_split(&mut self, name: &str, upstream: usize) -> usize {
        self.add(name, StageKind::Split, Some(upstream), None)
    }

    pub fn add_output(&mut self, name: &str, upstream: usize, config: OutputConfig, slot: RegionSlot) -> usize {
        self.add(name, StageKind::Output(config), Some(upstream), Some(slot))
    }

    fn downstream_one(&self, id: usize) -> usize {
        match &self.nodes[id].downstream {
            Link::One(d) => *d,
            _ => panic!("stage {} has no single downstream", self.nodes[id].name),
        }
    }

    fn downstream_many(&self, id: usize) -> Vec<usize> {
        match &self.nodes[id].downstream {
            Link::Many(v) => v.clone(),
            _ => panic!("stage {} has no branch downstreams", self.nodes[id].name),
        }
    }

    /// The full-image size presented to this stage's input.
    pub fn input_image_size(&self, id: usize) -> Length2 {
        match self.nodes[id].kind {
            StageKind::Input(cfg) => cfg.input_image_size,
            _ => self.output_image_size(self.nodes[id].upstream.expect("stage has an upstream")),
        }
    }

    /// The full-image size this stage produces.
    pub fn output_image_size(&self, id: usize) -> Length2 {
        match self.nodes[id].kind {
            StageKind::Crop(cfg) => Length2::new(cfg.crop.x.length, cfg.crop.y.length),
            StageKind::Rescale(cfg) => cfg.output_image_size,
            _ => self.input_image_size(id),
        }
    }

    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.input_interval = Interval::default();
            node.crop = Crop::default();
            node.output_interval = Interval::default();
            node.started = false;
            node.pending = 0;
        }
    }

    pub fn done(&self, id: usize, dir: Dir) -> bool {
        self.nodes[id].output_interval.end() >= self.output_image_size(id)[dir]
    }

    pub fn copy_out(&self, id: usize, regions: &mut TileRegions, dir: Dir) {
        let node = &self.nodes[id];
        if let Some(slot) = node.slot {
            let region = regions.slot_mut(slot);
            region.input[dir] = node.input_interval;
            region.crop[dir] = node.crop;
            region.output[dir] = node.output_interval;
        }
    }

    pub fn copy_out_all(&self, regions: &mut TileRegions, dir: Dir) {
        for id in 0..self.nodes.len() {
            self.copy_out(id, regions, dir);
        }
    }

    /// Propagate a downstream start position up towards the input, aligning
    /// and adding context on the way.
    pub fn push_start_up(&mut self, id: usize, output_start: i32, dir: Dir) -> Result<()> {
        match self.nodes[id].kind {
            StageKind::Input(cfg) => {
                // We may have to read a more aligned value than we were given.
                self.nodes[id].output_interval.offset = output_start;
                self.nodes[id].input_interval.offset = output_start - output_start % cfg.alignment[dir];
                debug!(
                    "({}) start {} -> input start {}",
                    self.nodes[id].name, output_start, self.nodes[id].input_interval.offset
                );
                Ok(())
            }
            StageKind::Context(cfg) => {
                let mut input_start = output_start - cfg.context[dir].start;
                if input_start < 0 {
                    input_start = 0;
                }
                input_start -= input_start % cfg.alignment[dir];
                self.nodes[id].output_interval.offset = output_start;
                self.nodes[id].input_interval.offset = input_start;
                let up = self.nodes[id].upstream.unwrap();
                self.push_start_up(up, input_start, dir)
            }
            StageKind::Crop(cfg) => {
                let input_start = output_start + cfg.crop[dir].offset;
                // output_start can legitimately be negative when a branch
                // starts producing output mid-row and the resampler needs
                // left context; input_start never can.
                if input_start < 0 {
                    return Err(PlanError::Tiling(format!(
                        "({}) input start is negative: {input_start}",
                        self.nodes[id].name
                    )));
                }
                self.nodes[id].output_interval.offset = output_start;
                self.nodes[id].input_interval.offset = input_start;
                let up = self.nodes[id].upstream.unwrap();
                self.push_start_up(up, input_start, dir)
            }
            StageKind::Rescale(cfg) => {
                let input_start_p = output_start * cfg.scale[dir];
                let input_start = input_start_p >> cfg.precision;
                let input_start_w_context = (input_start - cfg.start_context[dir]).max(0);
                self.nodes[id].output_interval.offset = output_start;
                self.nodes[id].input_interval.offset = input_start_w_context;
                let up = self.nodes[id].upstream.unwrap();
                self.push_start_up(up, input_start_w_context, dir)
            }
            StageKind::Split => {
                // Wait until every branch has contributed, then forward the
                // earliest start up the pipeline.
                let num_branches = self.downstream_many(id).len();
                self.nodes[id].pending += 1;
                if self.nodes[id].pending == 1 {
                    self.nodes[id].input_interval = Interval::at(output_start);
                } else {
                    self.nodes[id].input_interval.include(output_start);
                }
                if self.nodes[id].pending == num_branches {
                    self.nodes[id].pending = 0;
                    let start = self.nodes[id].input_interval.offset;
                    let up = self.nodes[id].upstream.unwrap();
                    self.push_start_up(up, start, dir)
                } else {
                    Ok(())
                }
            }
            StageKind::Output(_) => {
                self.nodes[id].output_interval.offset = output_start;
                self.nodes[id].input_interval.offset = output_start;
                let up = self.nodes[id].upstream.unwrap();
                self.push_start_up(up, output_start, dir)
            }
        }
    }

    /// Offer this stage an input end position; it propagates the resulting
    /// output end downstream, reconciles via `push_end_up`, and returns the
    /// input end it settled on.
    pub fn push_end_down(&mut self, id: usize, input_end: i32, dir: Dir) -> Result<i32> {
        match self.nodes[id].kind {
            StageKind::Input(cfg) => {
                let image_size = cfg.input_image_size[dir];
                let mut input_end = input_end;
                if input_end >= image_size {
                    input_end = image_size;
                } else {
                    // No sense reading pixels the alignment forces us to
                    // drop; trim the interval directly. At the image edge we
                    // must take whatever is left.
                    input_end -= input_end % cfg.alignment[dir];
                }
                self.nodes[id].input_interval.set_end(input_end);
                self.nodes[id].output_interval.set_end(input_end);
                let down = self.downstream_one(id);
                let result = self.push_end_down(down, input_end, dir)?;
                self.push_end_up(id, result, dir);
                Ok(self.nodes[id].input_interval.end())
            }
            StageKind::Context(cfg) => {
                // We must send a value downstream that, when it comes back
                // (possibly modified) in push_end_up, won't make us demand a
                // larger input than we were offered here.
                let image_size = self.input_image_size(id)[dir];
                let mut output_end = input_end;
                if input_end < image_size {
                    output_end -= output_end % cfg.alignment[dir];
                    output_end -= cfg.context[dir].end;
                }
                self.nodes[id].input_interval.set_end(input_end);
                self.nodes[id].output_interval.set_end(output_end);
                let down = self.downstream_one(id);
                let result = self.push_end_down(down, output_end, dir)?;
                self.push_end_up(id, result, dir);
                Ok(self.nodes[id].input_interval.end())
            }
            StageKind::Crop(cfg) => {
                let mut output_end = input_end - cfg.crop[dir].offset;
                // Nothing producible yet: terminate the iteration here and
                // don't go further downstream.
                if output_end < 0 {
                    debug!("({}) branch not started, terminating", self.nodes[id].name);
                    return Ok(0);
                }
                self.nodes[id].started = true;
                if output_end > cfg.crop[dir].length {
                    output_end = cfg.crop[dir].length;
                }
                self.nodes[id].input_interval.set_end(input_end);
                self.nodes[id].output_interval.set_end(output_end);
                let down = self.downstream_one(id);
                let result = self.push_end_down(down, output_end, dir)?;
                self.push_end_up(id, result, dir);
                Ok(self.nodes[id].input_interval.end())
            }
            StageKind::Rescale(cfg) => {
                let round_up = (1 << cfg.precision) - 1;
                let input_image_size = self.input_image_size(id)[dir];
                self.nodes[id].input_interval.set_end(input_end);

                let mut output_end_exc = if cfg.rescaler_type == RescalerType::Downscaler {
                    // The trapezoidal downscaler has a variable-sized kernel.
                    // Round its end position down to the number of complete
                    // output samples it can generate.
                    (input_end << cfg.precision) / cfg.scale[dir]
                } else {
                    // Resampler: find the last inclusive sample that can be
                    // generated. Take off context plus 2 pixels for an
                    // initial phase, except at the bottom of the image where
                    // no more context exists.
                    let input_end_inc = input_end - 1;
                    let input_end_inc_no_context = if input_end < input_image_size {
                        input_end_inc - cfg.end_context[dir] - 2
                    } else {
                        input_end_inc
                    };
                    let input_end_inc_no_context_p = input_end_inc_no_context << cfg.precision;
                    let output_end_inc = (input_end_inc_no_context_p + round_up) / cfg.scale[dir];
                    output_end_inc + 1
                };

                if output_end_exc > cfg.output_image_size[dir] {
                    output_end_exc = cfg.output_image_size[dir];
                }

                // Upscaling could generate larger output tiles than we can
                // handle, so avoid doing that.
                let max_tile = self.limits.max_tile_size[dir];
                let out_offset = self.nodes[id].output_interval.offset;
                if output_end_exc > out_offset + max_tile {
                    output_end_exc = out_offset + max_tile;
                }

                self.nodes[id].output_interval.set_end(output_end_exc);
                let down = self.downstream_one(id);
                let result = self.push_end_down(down, output_end_exc, dir)?;
                self.push_end_up(id, result, dir);

                // If the output isn't finished but our input is nearly at
                // the image edge, the next tile would be infeasibly small.
                // Pull our input end back and try again.
                let min_tile = self.limits.min_tile_size[dir];
                if self.nodes[id].output_interval.end() < cfg.output_image_size[dir]
                    && self.nodes[id].input_interval.end() > input_image_size - min_tile
                {
                    debug!("({}) too close to input image edge - try again", self.nodes[id].name);
                    self.push_end_down(id, input_image_size - min_tile, dir)?;
                }

                Ok(self.nodes[id].input_interval.end())
            }
            StageKind::Split => {
                // First offer every branch the same end so we learn what
                // each can do with it, and remember the furthest-on end any
                // of them reaches. This avoids over-reading when one branch
                // accepts far fewer pixels than another.
                let branches = self.downstream_many(id);
                let offset = self.nodes[id].input_interval.offset;
                self.nodes[id].input_interval.set_end(0);
                for &d in &branches {
                    let branch_end = self.push_end_down(d, input_end, dir)?;
                    // A branch making no progress is fine, so long as another does.
                    if branch_end > self.nodes[id].input_interval.end() {
                        self.nodes[id].input_interval.set_end(branch_end);
                    }
                }

                if self.nodes[id].input_interval.length == 0 {
                    return Err(PlanError::Tiling(format!(
                        "({}) no branch can make progress at offset {offset}",
                        self.nodes[id].name
                    )));
                }

                // Now tell every branch what it will really get.
                let end = self.nodes[id].input_interval.end();
                debug!("({}) split settles on input_end {}", self.nodes[id].name, end);
                for &d in &branches {
                    self.push_end_down(d, end, dir)?;
                }
                self.push_end_up(id, end, dir);
                Ok(end)
            }
            StageKind::Output(cfg) => {
                let image_size = self.input_image_size(id)[dir];
                let mirrored = dir == Dir::X && cfg.x_mirrored;
                let mut output_end = input_end;
                let out_offset = self.nodes[id].output_interval.offset;

                let aligned = align_end(input_end, image_size, cfg.max_alignment[dir], mirrored);
                if aligned >= out_offset + cfg.max_alignment[dir] {
                    output_end = aligned;
                } else {
                    let aligned = align_end(input_end, image_size, cfg.min_alignment[dir], mirrored);
                    if aligned > out_offset {
                        output_end = aligned;
                        debug!(
                            "({}) unable to achieve optimal alignment {}",
                            self.nodes[id].name, cfg.max_alignment[dir]
                        );
                    } else if self.nodes[id].input_interval.offset < image_size {
                        // (test against size in case this branch already finished)
                        warn!(
                            "({}) unable to achieve mandatory alignment {}",
                            self.nodes[id].name, cfg.min_alignment[dir]
                        );
                        output_end = aligned;
                        // No progress here need not be fatal: the other
                        // branch may advance, after which this one can
                        // succeed again. The split stage decides.
                    }
                }

                self.nodes[id].input_interval.set_end(input_end);
                self.nodes[id].output_interval.set_end(output_end);
                self.push_end_up(id, output_end, dir);
                Ok(self.nodes[id].input_interval.end())
            }
        }
    }

    /// The downstream stage has settled on an output end; recompute what
    /// that means for our input end.
    fn push_end_up(&mut self, id: usize, output_end: i32, dir: Dir) {
        match self.nodes[id].kind {
            StageKind::Input(cfg) => {
                let align = cfg.alignment[dir];
                let mut input_end = ((output_end + align - 1) / align) * align;
                let image_size = cfg.input_image_size[dir];
                if input_end > image_size {
                    input_end = image_size;
                    // When compressed we must always read a whole block,
                    // even if it extends beyond the nominal image width.
                    if dir == Dir::X && cfg.compression_alignment != 0 {
                        let calign = cfg.compression_alignment;
                        input_end = ((input_end + calign - 1) / calign) * calign;
                    }
                }
                self.nodes[id].output_interval.set_end(output_end);
                self.nodes[id].input_interval.set_end(input_end);
            }
            StageKind::Context(cfg) => {
                debug_assert!(output_end <= self.nodes[id].output_interval.end());
                let align = cfg.alignment[dir];
                let mut input_end = output_end + cfg.context[dir].end;
                input_end = ((input_end + align - 1) / align) * align;
                let image_size = self.input_image_size(id)[dir];
                if input_end > image_size {
                    input_end = image_size;
                }
                self.nodes[id].input_interval.set_end(input_end);
                self.nodes[id].output_interval.set_end(output_end);
            }
            StageKind::Crop(cfg) => {
                let input_end = output_end + cfg.crop[dir].offset;
                self.nodes[id].input_interval.set_end(input_end);
                self.nodes[id].output_interval.set_end(output_end);
            }
            StageKind::Rescale(cfg) => {
                let round_up = (1 << cfg.precision) - 1;
                let input_end_w_context_exc = if cfg.rescaler_type == RescalerType::Downscaler {
                    // Variable-sized kernel: round its fractional end
                    // position up.
                    let input_end_exc_p = output_end * cfg.scale[dir];
                    (input_end_exc_p + round_up) >> cfg.precision
                } else {
                    // Fixed-sized context: compute from the start position
                    // of the final (inclusive) output sample, plus 2 pixels
                    // for an initial phase that can use up to 2 extra
                    // samples on the right.
                    let output_end_inc = output_end - 1;
                    let input_end_p = output_end_inc * cfg.scale[dir];
                    let input_end = input_end_p >> cfg.precision;
                    let input_end_w_context = input_end + cfg.end_context[dir] + 2;
                    input_end_w_context + 1
                };

                let image_size = self.input_image_size(id)[dir];
                let input_end = input_end_w_context_exc.min(image_size);
                self.nodes[id].output_interval.set_end(output_end);
                self.nodes[id].input_interval.set_end(input_end);
            }
            StageKind::Split => {
                // Nothing to reconcile; the branches were told directly.
            }
            StageKind::Output(_) => {
                // We get given back our own output value.
                debug_assert!(output_end == self.nodes[id].output_interval.end());
                self.nodes[id].input_interval.set_end(output_end);
            }
        }
    }

    /// Distribute the final (possibly grown) input interval downstream so
    /// each stage records the crop between what it receives and what it
    /// produces.
    pub fn push_crop_down(&mut self, id: usize, interval: Interval, dir: Dir) -> Result<()> {
        match self.nodes[id].kind {
            StageKind::Input(_) => {
                // At the head of the pipeline no one can hand us extra pixels.
                debug_assert!(interval == self.nodes[id].input_interval);
                self.nodes[id].crop = Crop::default();
                self.nodes[id].output_interval = interval;
                let down = self.downstream_one(id);
                self.push_crop_down(down, interval, dir)
            }
            StageKind::Context(cfg) => {
                debug_assert!(interval.contains(&self.nodes[id].input_interval));
                let align = cfg.alignment[dir];
                let image_size = self.input_image_size(id)[dir];
                if interval.offset % align != 0
                    || (interval.end() % align != 0 && interval.end() != image_size)
                {
                    // A misaligned interval would need cropping we can't
                    // express here; fall back to the former input tile. In
                    // practice bayer stages are all 2-pixel aligned so this
                    // should not pop out.
                    warn!("({}) receiving misaligned input - cropping will be required", self.nodes[id].name);
                    self.nodes[id].output_interval = self.nodes[id].input_interval;
                } else {
                    self.nodes[id].output_interval = interval;
                }
                self.nodes[id].input_interval = interval;
                self.nodes[id].crop = self.nodes[id]
                    .input_interval
                    .crop_to(&self.nodes[id].output_interval);
                let out = self.nodes[id].output_interval;
                let down = self.downstream_one(id);
                self.push_crop_down(down, out, dir)
            }
            StageKind::Crop(cfg) => {
                // A branch that never started producing output terminates
                // the walk here.
                if !self.nodes[id].started {
                    debug!("({}) branch not started, terminating", self.nodes[id].name);
                    return Ok(());
                }
                debug_assert!(interval.contains(&self.nodes[id].input_interval));
                self.nodes[id].input_interval = interval;
                let mut shifted = interval;
                shifted.offset -= cfg.crop[dir].offset;
                self.nodes[id].crop = shifted.crop_to(&self.nodes[id].output_interval);
                let out = self.nodes[id].output_interval;
                let down = self.downstream_one(id);
                self.push_crop_down(down, out, dir)
            }
            StageKind::Rescale(_) => {
                debug_assert!(interval.contains(&self.nodes[id].input_interval));
                self.nodes[id].crop = interval.crop_to(&self.nodes[id].input_interval);
                self.nodes[id].input_interval = interval;
                let out = self.nodes[id].output_interval;
                let down = self.downstream_one(id);
                self.push_crop_down(down, out, dir)
            }
            StageKind::Split => {
                // Whatever we get goes down every branch; a branch that
                // can't use it all crops it off itself.
                debug_assert!(interval.contains(&self.nodes[id].input_interval));
                self.nodes[id].input_interval = interval;
                for d in self.downstream_many(id) {
                    self.push_crop_down(d, interval, dir)?;
                }
                Ok(())
            }
            StageKind::Output(_) => {
                // Crop can't go any further down; it gets trimmed here.
                self.nodes[id].input_interval = interval;
                self.nodes[id].crop = interval.crop_to(&self.nodes[id].output_interval);
                debug_assert!(self.nodes[id].crop.start >= 0 && self.nodes[id].crop.end >= 0);
                // The output interval is not flipped for mirrored outputs;
                // the caller applies the coordinate fix-up at emit time.
                Ok(())
            }
        }
    }
}

// When the output image is flipped we describe it in a coordinate system
// starting from the right-hand edge travelling left: tile coordinates don't
// change, the coordinate system does. Alignment then applies not to the
// tile offsets themselves but to their distance from the image width.
fn align_end(input_end: i32, image_size: i32, align: i32, mirrored: bool) -> i32 {
    if mirrored {
        // It's the end in the unflipped coordinate space that must align.
        let mut unflipped_end = image_size - input_end;
        unflipped_end = ((unflipped_end + align - 1) / align) * align;
        image_size - unflipped_end
    } else if input_end < image_size {
        input_end - (input_end % align)
    } else {
        input_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_end_plain() {
        assert_eq!(align_end(100, 1920, 64, false), 64);
        assert_eq!(align_end(128, 1920, 64, false), 128);
        // at the image edge no alignment applies
        assert_eq!(align_end(1920, 1920, 64, false), 1920);
    }

    #[test]
    fn test_align_end_mirrored() {
        // 1000-pixel image: an end of 900 leaves 100 unflipped pixels,
        // which round up to 128, so the aligned end is 872.
        assert_eq!(align_end(900, 1000, 64, true), 1000 - 128);
        // exactly aligned in the unflipped frame
        assert_eq!(align_end(1000 - 128, 1000, 64, true), 1000 - 128);
    }
}
