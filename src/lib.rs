//! # tilepipe - ISP back-end configuration preparer and tile planner
//!
//! Generates the run-time configuration for a fixed-function image signal
//! processor back-end. From a description of a frame (input format, enabled
//! processing blocks, output formats, crops, scale targets) it produces the
//! finalised register file the hardware consumes and a plan of tiles that
//! partitions the frame within the hardware's internal line-buffer budget,
//! honouring every block's alignment, context and ordering requirements.
//!
//! ## Features
//!
//! - **Format calculus**: strides, per-plane address offsets and plane
//!   sizes for bayer, 8/10/12/16-bit, YUV 4:4:4/4:2:2/4:2:0, planar/semi-
//!   planar/interleaved, wallpaper-tiled and compressed layouts
//! - **Tile planner**: two-axis sweep over a stage graph (input, context,
//!   split, per-branch crop/downscale/resample/output) with alignment,
//!   minimum-size and progress guarantees
//! - **Preparer**: validation, smart-resize resolution, per-block
//!   finalisation and per-tile address/phase composition
//! - **Config plumbing**: dirty-flag partial merge and a JSON debug dump
//!   and load of the whole register file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tilepipe::{BackEnd, BackEndOptions, TilesConfig, variant::BCM2712_C0};
//!
//! # fn main() -> tilepipe::Result<()> {
//! let mut be = BackEnd::new(BackEndOptions::default(), BCM2712_C0)?;
//!
//! // ... populate the input format, enables and output formats ...
//!
//! let mut out = Box::new(TilesConfig::default());
//! be.prepare(Some(&mut out))?;
//! // hand `out` to the device driver
//! # Ok(())
//! # }
//! ```
//!
//! The planner performs no I/O and allocates no image memory: it is a pure
//! planning and validation layer over plain-data configuration records,
//! which stay byte-compatible with the kernel driver's expectations.

pub mod backend;
pub mod catalog;
pub mod defaults;
pub mod error;
pub mod format;
pub mod geometry;
pub mod regs;
pub mod stages;
pub mod tiling;
pub mod variant;

mod introspect;
mod prepare;

pub use backend::{BackEnd, BackEndOptions, ConfigUpdate, SmartResize};
pub use error::{PlanError, Result};

pub use format::{
    compute_addr_offset, compute_optimal_stride, compute_stride, compute_stride_align,
    compute_x_offset, format_from_name, format_name, num_planes, pixel_alignment, plane_size,
    ImageFormat, ImageFormatConfig,
};

pub use regs::{BackendConfig, Tile, TilesConfig};

pub use tiling::{tile_pipeline, TilingConfig};
