//! In-process stand-ins for the external collaborators

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

use crate::config::HarnessConfig;
use crate::process::{CommandSpec, Invocation, Invoke};

type Handler = Box<dyn Fn(&CommandSpec) -> Invocation>;

/// Invoker that answers every call with a closure and records the calls
pub struct ScriptedInvoker {
    handler: Handler,
    calls: RefCell<Vec<CommandSpec>>,
}

impl ScriptedInvoker {
    pub fn new(handler: impl Fn(&CommandSpec) -> Invocation + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Well-behaved collaborators for `config`
    pub fn collaborators(config: &HarnessConfig) -> Self {
        let config = config.clone();
        Self::new(move |spec| fake_collaborator(&config, spec))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Number of calls made to `program`
    pub fn calls_to(&self, program: &Path) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.program == program)
            .count()
    }
}

impl Invoke for ScriptedInvoker {
    fn run(&self, spec: &CommandSpec) -> Invocation {
        self.calls.borrow_mut().push(spec.clone());
        (self.handler)(spec)
    }
}

/// Deterministic test image keyed by `seed`
pub fn pattern(seed: u32) -> RgbImage {
    RgbImage::from_fn(48, 32, |x, y| {
        Rgb([
            ((x * 5 + seed * 37) % 256) as u8,
            ((y * 7 + seed * 11) % 256) as u8,
            (((x + y) * 3 + seed * 53) % 256) as u8,
        ])
    })
}

/// Case description content understood by the fake renderers
pub fn scene_seed(path: &Path) -> u32 {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Write a case description whose rendering is `pattern(seed)`
pub fn write_case(dir: &Path, id: &str, seed: u32) -> PathBuf {
    let path = dir.join(format!("{}.cfg", id));
    fs::write(&path, seed.to_string()).unwrap();
    path
}

fn arg(spec: &CommandSpec, index: usize) -> PathBuf {
    PathBuf::from(&spec.args[index])
}

/// Mimics the renderer, reference renderer and converter contracts.
///
/// - `renderer -generate-ref <cfg>` writes `<id>.pbrt` (the seed) into cwd
/// - `renderer -test <cfg>` writes `<id>_test_out.tga` into cwd
/// - `reference <scene> --outfile <out>` writes a PNG-encoded render to `out`
/// - `converter convert --outfile <out> <in>` copies `in` to `out`
pub fn fake_collaborator(config: &HarnessConfig, spec: &CommandSpec) -> Invocation {
    if spec.program == config.primary_renderer {
        let directive = spec.args[0].to_string_lossy().into_owned();
        let cfg = arg(spec, 1);
        let id = cfg.file_stem().unwrap().to_string_lossy().into_owned();
        let seed = scene_seed(&cfg);
        match directive.as_str() {
            "-generate-ref" => {
                fs::write(spec.cwd.join(format!("{}.pbrt", id)), seed.to_string()).unwrap();
            }
            "-test" => {
                pattern(seed)
                    .save(spec.cwd.join(format!("{}_test_out.tga", id)))
                    .unwrap();
            }
            other => return Invocation::failure(format!("unknown directive {}", other)),
        }
        Invocation::success("")
    } else if spec.program == config.reference_renderer {
        let seed = scene_seed(&arg(spec, 0));
        let out = arg(spec, 2);
        pattern(seed)
            .save_with_format(&out, image::ImageFormat::Png)
            .unwrap();
        Invocation::success("")
    } else if spec.program == config.converter {
        fs::copy(arg(spec, 3), arg(spec, 2)).unwrap();
        Invocation::success("")
    } else {
        Invocation::failure(format!("failed to launch {}", spec.program.display()))
    }
}

/// Config rooted in `root`, with a case directory already created
pub fn config_in(root: &Path) -> HarnessConfig {
    let config = HarnessConfig::default().resolved_against(root);
    fs::create_dir_all(&config.case_dir).unwrap();
    config
}
