//! The engine context: owns the GPU context, asset store, compile service,
//! render target cache and frame executor, and exposes the operations the
//! host editor drives (edit, compile, render, persist).
//!
//! Every operation takes the relevant asset id explicitly; there is no
//! implicit "current asset" in the core. All methods must be called from
//! the thread that owns the GPU context; compile work itself runs on the
//! service's worker thread and is re-applied here when the results are
//! pumped.

use anyhow::{Context, Result};

use crate::assets::{Asset, AssetId, AssetKind, AssetStore};
use crate::compiler::{CompileError, CompileRequest, CompileService};
use crate::executor::FrameExecutor;
use crate::gpu::GpuContext;
use crate::project;
use crate::targets::{RenderTargetCache, TargetMode};

pub struct Engine {
    pub gpu: GpuContext,
    pub store: AssetStore,
    pub targets: RenderTargetCache,
    executor: FrameExecutor,
    compiler: CompileService,
}

impl Engine {
    /// Engine on a fresh headless GPU context.
    pub fn new() -> Result<Self> {
        Self::with_gpu(GpuContext::new_headless()?)
    }

    pub fn with_gpu(gpu: GpuContext) -> Result<Self> {
        let targets = RenderTargetCache::new(&gpu);
        let executor = FrameExecutor::new(&gpu);
        let compiler = CompileService::spawn()?;
        Ok(Self {
            gpu,
            store: AssetStore::new(),
            targets,
            executor,
            compiler,
        })
    }

    /// Replace a shader's source and queue a recompile. The previous
    /// pipeline keeps rendering until the new one lands; diagnostics arrive
    /// through [`Self::pump_compile_results`].
    pub fn edit_source(&mut self, id: AssetId, source: impl Into<String>) -> Result<()> {
        self.store.set_source(id, source)?;
        self.request_compile(id)
    }

    /// Queue an asynchronous compile of the asset's current source.
    pub fn request_compile(&self, id: AssetId) -> Result<()> {
        let asset = self
            .store
            .get_kind(id, AssetKind::Shader)
            .with_context(|| format!("request_compile: {id:?} is not a live shader"))?;
        self.compiler.submit(CompileRequest {
            asset: id,
            generation: asset.compile_generation,
            source: asset.source.clone(),
        })
    }

    /// Queue compiles for every shader asset (used after project load).
    pub fn compile_all(&self) -> Result<()> {
        for id in self.store.ids() {
            if self.store.get_kind(id, AssetKind::Shader).is_some() {
                self.request_compile(id)?;
            }
        }
        Ok(())
    }

    /// Apply finished compiles on the GPU thread. Stale responses (the
    /// source changed again since the request) are discarded. On success the
    /// asset gets a fresh pipeline; on failure the previous pipeline stays
    /// and only the diagnostics are replaced. Returns per-asset diagnostics
    /// for editor annotation.
    pub fn pump_compile_results(&mut self) -> Vec<(AssetId, Vec<CompileError>)> {
        let mut out = Vec::new();
        for response in self.compiler.try_drain() {
            let Some(asset) = self.store.get_mut(response.asset) else {
                // Removed while compiling; nothing to apply.
                continue;
            };
            if response.generation != asset.compile_generation {
                log::debug!(
                    "discarding stale compile for '{}' (generation {} != {})",
                    asset.name,
                    response.generation,
                    asset.compile_generation
                );
                continue;
            }
            match response.result {
                Ok(validated) => {
                    let compiled = self.executor.create_pipeline(&self.gpu, &validated);
                    // Seed declared defaults for parameters that have never
                    // been touched; edited/persisted values win.
                    for p in &compiled.params {
                        if asset.param_values[p.index] == [0.0; 4] {
                            asset.param_values[p.index] = p.default;
                        }
                    }
                    asset.errors = validated.warnings;
                    asset.shader = Some(compiled);
                }
                Err(errors) => {
                    asset.errors = errors;
                }
            }
            out.push((response.asset, asset.errors.clone()));
        }
        out
    }

    /// Render one frame rooted at `root` and return the id of the node
    /// holding the visible result (query its texture via
    /// [`Self::target_view`]).
    pub fn render_frame(
        &mut self,
        root: AssetId,
        resolution: (u32, u32),
        time: f32,
        frame: u32,
        mode: TargetMode,
    ) -> Option<AssetId> {
        self.executor.render_frame(
            &self.gpu,
            &self.store,
            &mut self.targets,
            root,
            resolution,
            time,
            frame,
            mode,
        )
    }

    pub fn target_view(&self, id: AssetId, mode: TargetMode) -> Option<&wgpu::TextureView> {
        self.targets.get(id, mode).map(|t| &t.view)
    }

    /// One-shot: did the full-mode output resolution change since the last
    /// query?
    pub fn resolution_changed(&mut self) -> bool {
        self.targets.take_resolution_changed()
    }

    /// Remove an asset, scrub references to it, and drop its cached GPU
    /// textures.
    pub fn remove_asset(&mut self, id: AssetId) -> Option<Asset> {
        let removed = self.store.remove(id);
        if removed.is_some() {
            self.targets.purge(id);
        }
        removed
    }

    pub fn save_project(&self) -> Result<String> {
        project::save_json(&self.store)
    }

    /// Replace the current store with a loaded project. Pipelines are gone
    /// until the host calls [`Self::compile_all`] and pumps the results.
    pub fn load_project(&mut self, json: &str) -> Result<()> {
        self.store = project::load_json(json)?;
        Ok(())
    }
}
