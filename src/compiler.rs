//! Shader compilation: wraps user fragment source in the fixed WGSL
//! preamble, substitutes `ParamFloat<...>` / `ParamInput<...>` directives,
//! validates the result through naga, and remaps diagnostics back to
//! user-source line numbers.
//!
//! Validation runs on a dedicated worker thread ([`CompileService`]); the
//! GPU-facing half (building the actual `wgpu::RenderPipeline` from a
//! [`ValidatedShader`]) stays on the thread that owns the device. Compile
//! diagnostics are data, never errors: the render loop is unaffected by a
//! failed compile.

use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::assets::{AssetId, MAX_PARAMS, SLOT_COUNT};

/// Fixed WGSL preamble prepended to every user shader.
///
/// The `ShaderData` layout, the slot/sampler bindings and the `main_image`
/// trampoline are the stable contract between the engine and every user
/// shader; changing field order or names breaks all existing assets.
pub const SHADER_HEADER: &str = "\
struct FrameData {
    resolution: vec2f,
    time: f32,
    frame: u32,
}

struct ShaderData {
    uv: vec2f,
    size: vec2f,
    time: f32,
    frame: u32,
    out_color: vec4f,
}

@group(0) @binding(0) var<uniform> u_frame: FrameData;
@group(0) @binding(1) var<uniform> u_params: array<vec4f, 10>;

@group(1) @binding(0) var slot0: texture_2d<f32>;
@group(1) @binding(1) var slot1: texture_2d<f32>;
@group(1) @binding(2) var slot2: texture_2d<f32>;
@group(1) @binding(3) var slot3: texture_2d<f32>;
@group(1) @binding(4) var slot_sampler: sampler;

struct VertexInput {
    @location(0) position: vec2f,
    @location(1) tex_coord: vec2f,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4f,
    @location(0) uv: vec2f,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4f(in.position, 0.0, 1.0);
    out.uv = in.tex_coord;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4f {
    var data: ShaderData;
    data.uv = in.uv;
    data.size = u_frame.resolution;
    data.time = u_frame.time;
    data.frame = u_frame.frame;
    data.out_color = vec4f(0.0, 0.0, 0.0, 1.0);
    main_image(&data);
    return data.out_color;
}
";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// One diagnostic, line/column relative to the user's own source (1-based;
/// 0 when the backend could not attribute a location).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompileError {
    pub line: u32,
    pub column: u32,
    pub message: String,
    pub severity: Severity,
}

impl CompileError {
    fn error(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

/// A UI-exposed scalar parameter declared with `ParamFloat<...>`.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderParam {
    pub name: String,
    /// Position in the vec4 parameter buffer.
    pub index: usize,
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: [f32; 4],
}

/// Output of the CPU-side compile stage: preprocessed + naga-validated WGSL
/// plus the declared inputs/parameters. Turned into a [`CompiledShader`] on
/// the GPU thread.
#[derive(Clone, Debug)]
pub struct ValidatedShader {
    /// Full module text (preamble + processed user source).
    pub wgsl: String,
    /// Declared input names, in slot order.
    pub inputs: Vec<String>,
    pub params: Vec<ShaderParam>,
    pub warnings: Vec<CompileError>,
}

/// GPU-ready form of a shader asset. Owned by the asset; dropping it
/// releases the pipeline and the parameter buffer.
#[derive(Debug)]
pub struct CompiledShader {
    pub pipeline: wgpu::RenderPipeline,
    /// Positional vec4 parameter buffer, refreshed from the asset's values
    /// each frame.
    pub param_buffer: wgpu::Buffer,
    pub inputs: Vec<String>,
    pub params: Vec<ShaderParam>,
}

#[derive(Debug)]
struct Preprocessed {
    body: String,
    inputs: Vec<String>,
    params: Vec<ShaderParam>,
}

/// Split `name: "A", min: 0.5` style directive arguments into lowercase
/// key/value pairs. Quotes around values are stripped.
fn split_directive_args(args: &str) -> Vec<(String, String)> {
    args.split(',')
        .filter_map(|pair| {
            let mut it = pair.splitn(2, ':');
            let key = it.next()?.trim().to_lowercase();
            let value = it.next()?.trim().trim_matches('"').to_string();
            if key.is_empty() { None } else { Some((key, value)) }
        })
        .collect()
}

fn arg<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn line_of_offset(text: &str, offset: usize) -> u32 {
    text[..offset].bytes().filter(|b| *b == b'\n').count() as u32 + 1
}

/// Replace every `ParamInput<...>` / `ParamFloat<...>` directive in-line
/// with the slot global / parameter buffer access it stands for.
/// Substitutions never add or remove lines, so downstream diagnostics keep
/// their line numbers.
fn substitute_directives(source: &str) -> std::result::Result<Preprocessed, Vec<CompileError>> {
    let mut body = source.to_string();
    let mut inputs: Vec<String> = Vec::new();
    let mut params: Vec<ShaderParam> = Vec::new();
    let mut errors: Vec<CompileError> = Vec::new();

    for directive in ["ParamInput<", "ParamFloat<"] {
        while let Some(start) = body.find(directive) {
            let line = line_of_offset(&body, start);
            let args_start = start + directive.len();
            let rel_end = body[args_start..].find(['>', '\n']);
            let end = match rel_end {
                Some(rel) if body.as_bytes()[args_start + rel] == b'>' => args_start + rel,
                _ => {
                    errors.push(CompileError::error(
                        line,
                        0,
                        format!("unterminated {} directive", directive.trim_end_matches('<')),
                    ));
                    break;
                }
            };
            let pairs = split_directive_args(&body[args_start..end]);
            let Some(name) = arg(&pairs, "name").map(str::to_string) else {
                errors.push(CompileError::error(
                    line,
                    0,
                    format!("{} directive is missing a name", directive.trim_end_matches('<')),
                ));
                break;
            };

            let replacement = if directive == "ParamInput<" {
                if inputs.len() >= SLOT_COUNT {
                    errors.push(CompileError::error(
                        line,
                        0,
                        format!("at most {SLOT_COUNT} ParamInput directives are supported"),
                    ));
                    break;
                }
                let text = format!("slot{}", inputs.len());
                inputs.push(name);
                text
            } else {
                if params.len() >= MAX_PARAMS {
                    errors.push(CompileError::error(
                        line,
                        0,
                        format!("at most {MAX_PARAMS} ParamFloat directives are supported"),
                    ));
                    break;
                }
                let index = params.len();
                let parse_f32 = |key: &str, fallback: f32| {
                    arg(&pairs, key)
                        .and_then(|v| v.parse::<f32>().ok())
                        .unwrap_or(fallback)
                };
                let default = parse_f32("default", 0.0);
                params.push(ShaderParam {
                    name,
                    index,
                    min: parse_f32("min", 0.0),
                    max: parse_f32("max", 1.0),
                    step: parse_f32("step", 0.1),
                    default: [default, 0.0, 0.0, 0.0],
                });
                format!("u_params[{index}].x")
            };
            body.replace_range(start..end + 1, &replacement);
        }
    }

    if errors.is_empty() {
        Ok(Preprocessed { body, inputs, params })
    } else {
        Err(errors)
    }
}

fn header_line_count() -> u32 {
    SHADER_HEADER.lines().count() as u32
}

fn map_line(backend_line: u32) -> u32 {
    backend_line.saturating_sub(header_line_count())
}

/// CPU-side compile: preprocess directives, prepend the preamble, run the
/// naga front end and validator. Diagnostics come back with user-relative
/// line numbers; unattributable ones are reported at line 0 rather than
/// dropped.
pub fn validate_source(source: &str) -> std::result::Result<ValidatedShader, Vec<CompileError>> {
    if !source.contains("fn main_image") {
        return Err(vec![CompileError::error(
            1,
            1,
            "shader must define fn main_image(data: ptr<function, ShaderData>)",
        )]);
    }

    let pre = substitute_directives(source)?;
    let wgsl = format!("{SHADER_HEADER}{}", pre.body);

    let module = match naga::front::wgsl::parse_str(&wgsl) {
        Ok(module) => module,
        Err(err) => {
            let (line, column) = err
                .location(&wgsl)
                .map(|loc| (map_line(loc.line_number), loc.line_position))
                .unwrap_or((0, 0));
            return Err(vec![CompileError::error(line, column, err.message())]);
        }
    };

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    if let Err(err) = validator.validate(&module) {
        let (line, column) = err
            .spans()
            .next()
            .map(|(span, _)| {
                let loc = span.location(&wgsl);
                (map_line(loc.line_number), loc.line_position)
            })
            .unwrap_or((0, 0));
        return Err(vec![CompileError::error(
            line,
            column,
            err.as_inner().to_string(),
        )]);
    }

    Ok(ValidatedShader {
        wgsl,
        inputs: pre.inputs,
        params: pre.params,
        warnings: Vec::new(),
    })
}

/// A compile request keyed to the asset's compile generation; responses with
/// a stale generation are dropped by the engine.
#[derive(Debug)]
pub struct CompileRequest {
    pub asset: AssetId,
    pub generation: u64,
    pub source: String,
}

#[derive(Debug)]
pub struct CompileResponse {
    pub asset: AssetId,
    pub generation: u64,
    pub result: std::result::Result<ValidatedShader, Vec<CompileError>>,
}

/// Owns the compile worker thread. Requests go in from the engine thread,
/// responses are drained back on the engine thread each frame; compilation
/// never blocks the render loop.
pub struct CompileService {
    tx: Option<Sender<CompileRequest>>,
    rx: Receiver<CompileResponse>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CompileService {
    pub fn spawn() -> Result<Self> {
        let (req_tx, req_rx) = crossbeam_channel::unbounded::<CompileRequest>();
        let (res_tx, res_rx) = crossbeam_channel::unbounded::<CompileResponse>();
        let worker = thread::Builder::new()
            .name("fragforge-compile".into())
            .spawn(move || {
                for req in req_rx.iter() {
                    log::debug!("compiling asset {:?} (generation {})", req.asset, req.generation);
                    let result = validate_source(&req.source);
                    let response = CompileResponse {
                        asset: req.asset,
                        generation: req.generation,
                        result,
                    };
                    if res_tx.send(response).is_err() {
                        break;
                    }
                }
            })
            .context("failed to spawn compile worker thread")?;
        Ok(Self {
            tx: Some(req_tx),
            rx: res_rx,
            worker: Some(worker),
        })
    }

    pub fn submit(&self, request: CompileRequest) -> Result<()> {
        self.tx
            .as_ref()
            .context("compile service is shut down")?
            .send(request)
            .context("compile worker is gone")
    }

    /// Non-blocking drain of finished compiles. Called on the thread that
    /// owns GPU state.
    pub fn try_drain(&self) -> Vec<CompileResponse> {
        self.rx.try_iter().collect()
    }
}

impl Drop for CompileService {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TRIVIAL: &str = "fn main_image(data: ptr<function, ShaderData>) {\n    (*data).out_color = vec4f((*data).uv, 0.0, 1.0);\n}\n";

    #[test]
    fn header_declares_the_full_parameter_array() {
        assert!(SHADER_HEADER.contains(&format!("array<vec4f, {MAX_PARAMS}>")));
        for slot in 0..SLOT_COUNT {
            assert!(SHADER_HEADER.contains(&format!("var slot{slot}: texture_2d<f32>")));
        }
    }

    #[test]
    fn trivial_shader_validates() {
        let v = validate_source(TRIVIAL).expect("trivial shader should validate");
        assert!(v.inputs.is_empty());
        assert!(v.params.is_empty());
        assert!(v.wgsl.starts_with(SHADER_HEADER));
    }

    #[test]
    fn syntax_error_on_first_user_line_reports_line_one() {
        // One-line source; the preamble length must be subtracted away.
        let errors = validate_source("fn main_image garbage").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 1, "{:?}", errors[0]);
        assert_eq!(errors[0].severity, Severity::Error);
    }

    #[test]
    fn error_line_tracks_position_in_user_source() {
        let source = "\n\nfn main_image(data: ptr<function, ShaderData>) {\n    nonsense!\n}\n";
        let errors = validate_source(source).unwrap_err();
        assert_eq!(errors[0].line, 4, "{:?}", errors[0]);
    }

    #[test]
    fn missing_main_image_is_reported_up_front() {
        let errors = validate_source("fn other() {}").unwrap_err();
        assert!(errors[0].message.contains("main_image"));
        assert_eq!(errors[0].line, 1);
    }

    #[test]
    fn param_input_substitution_assigns_slots_in_order() {
        let source = "let a = ParamInput<name: \"First\">;\nlet b = ParamInput<name: \"Second\">;\n";
        let pre = substitute_directives(source).unwrap();
        assert_eq!(pre.inputs, vec!["First", "Second"]);
        assert!(pre.body.contains("let a = slot0;"));
        assert!(pre.body.contains("let b = slot1;"));
    }

    #[test]
    fn param_float_substitution_records_metadata() {
        let source = "let r = ParamFloat<name: \"Radius\", default: 0.25, min: 0.1, max: 2, step: 0.05>;";
        let pre = substitute_directives(source).unwrap();
        assert_eq!(pre.params.len(), 1);
        let p = &pre.params[0];
        assert_eq!(p.name, "Radius");
        assert_eq!(p.index, 0);
        assert_eq!(p.default[0], 0.25);
        assert_eq!(p.min, 0.1);
        assert_eq!(p.max, 2.0);
        assert_eq!(p.step, 0.05);
        assert!(pre.body.contains("u_params[0].x"));
    }

    #[test]
    fn substitution_preserves_line_count() {
        let source = "line1\nlet x = ParamFloat<name: \"X\">;\nline3\n";
        let pre = substitute_directives(source).unwrap();
        assert_eq!(pre.body.lines().count(), source.lines().count());
    }

    #[test]
    fn unterminated_directive_reports_its_line() {
        let source = "ok\nlet x = ParamFloat<name: \"X\"\n";
        let errors = substitute_directives(source).unwrap_err();
        assert_eq!(errors[0].line, 2);
        assert!(errors[0].message.contains("unterminated"));
    }

    #[test]
    fn directive_without_name_is_an_error() {
        let errors = substitute_directives("ParamInput<min: 1>").unwrap_err();
        assert!(errors[0].message.contains("missing a name"));
    }

    #[test]
    fn shader_using_inputs_and_params_validates() {
        let source = "fn main_image(data: ptr<function, ShaderData>) {\n    let brightness = ParamFloat<name: \"Brightness\", default: 1>;\n    let tex = textureSample(ParamInput<name: \"Source\">, slot_sampler, (*data).uv);\n    (*data).out_color = tex * brightness;\n}\n";
        let v = validate_source(source).expect("shader should validate");
        assert_eq!(v.inputs, vec!["Source"]);
        assert_eq!(v.params[0].name, "Brightness");
    }

    #[test]
    fn compile_service_round_trips_a_request() {
        let service = CompileService::spawn().unwrap();
        let id = crate::assets::AssetId { index: 0, generation: 0 };
        service
            .submit(CompileRequest {
                asset: id,
                generation: 7,
                source: TRIVIAL.to_string(),
            })
            .unwrap();
        let response = service
            .rx
            .recv_timeout(Duration::from_secs(30))
            .expect("worker should respond");
        assert_eq!(response.asset, id);
        assert_eq!(response.generation, 7);
        assert!(response.result.is_ok());
    }
}
