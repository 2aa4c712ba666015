//! fragforge: a node-graph fragment-shader engine.
//!
//! Users author small WGSL fragment snippets ("assets") that are chained
//! through up to four declared input slots into a render graph. Edits are
//! recompiled incrementally on a worker thread with diagnostics mapped back
//! to user-source lines; each frame the graph is resolved from a designated
//! root, backing render targets are (re)allocated as needed, and the nodes
//! are drawn in dependency order with the correct inputs bound.
//!
//! The host application supplies windowing, the text editor and
//! presentation; the engine hands back the final node's render target.

pub mod assets;
pub mod compiler;
pub mod engine;
pub mod executor;
pub mod gpu;
pub mod graph;
pub mod project;
pub mod targets;

pub use assets::{Asset, AssetId, AssetKind, AssetStore, MAX_PARAMS, SLOT_COUNT};
pub use compiler::{CompileError, CompileService, CompiledShader, Severity, ShaderParam, ValidatedShader};
pub use engine::Engine;
pub use executor::FrameExecutor;
pub use gpu::GpuContext;
pub use project::{ProjectDoc, load_json, save_json};
pub use targets::{RenderTarget, RenderTargetCache, TargetMode, PREVIEW_SIZE};
