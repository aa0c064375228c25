//! apptest core: the `fn render` pipeline.
//!
//! [`Renderer`] takes one input file (or stdin), sends its resources through
//! a single function and delivers the result through the output router.
//! User-facing output goes through an explicit [`Printer`].

pub mod error;
pub mod pathutil;
pub mod printer;
pub mod render;
pub mod telemetry;

pub use error::{RenderError, RenderResult};
pub use pathutil::{resolve_symlink, ResolvedPath};
pub use printer::{truncate_output, Printer, SharedBuffer};
pub use render::{RenderConfig, RenderOutcome, RenderState, Renderer, STDIN_PATH};
