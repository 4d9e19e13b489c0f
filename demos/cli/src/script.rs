//! Model scripts
//!
//! A model is a Rhai script defining `field(x, y, z)`, and optionally
//! `normal`, `color`, and `texcoord` functions of the same arguments that
//! return 3-element arrays, plus a `clip(x, y, z)` function.
use std::{cell::Cell, path::Path, rc::Rc};

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use log::warn;
use nalgebra::Vector3;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST};

use meteor::{Format, Mesh};

/// Models shipped with the binary
#[derive(Copy, Clone, Debug, ValueEnum, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Sphere,
    Torus,
    Cube,
    Earth,
}

impl Builtin {
    fn source(self) -> &'static str {
        match self {
            Builtin::Sphere => include_str!("../models/sphere.rhai"),
            Builtin::Torus => include_str!("../models/torus.rhai"),
            Builtin::Cube => include_str!("../models/cube.rhai"),
            Builtin::Earth => include_str!("../models/earth.rhai"),
        }
    }
}

/// Compiled script, with functions called by name
pub struct Script {
    engine: Engine,
    ast: AST,
    name: String,
    /// Set once an evaluation error has been reported
    failed: Cell<bool>,
}

impl Script {
    /// Compiles a script from source
    pub fn new(name: &str, source: &str) -> Result<Self> {
        let engine = Engine::new();
        let ast = engine
            .compile(source)
            .with_context(|| format!("could not compile {name}"))?;
        Ok(Self {
            engine,
            ast,
            name: name.to_owned(),
            failed: Cell::new(false),
        })
    }

    /// Compiles one of the built-in models
    pub fn builtin(b: Builtin) -> Result<Self> {
        Self::new(b.into(), b.source())
    }

    /// Loads and compiles a script file
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        Self::new(&path.display().to_string(), &source)
    }

    /// Wraps an expression in `x`, `y`, and `z` into a function `name`
    pub fn expression(name: &str, expr: &str) -> Result<Self> {
        Self::new(
            &format!("`{expr}`"),
            &format!("fn {name}(x, y, z) {{\n{expr}\n}}"),
        )
    }

    /// Checks whether the script defines `name(x, y, z)`
    pub fn defines(&self, name: &str) -> bool {
        self.ast
            .iter_functions()
            .any(|f| f.name == name && f.params.len() == 3)
    }

    fn call(
        &self,
        name: &str,
        p: Vector3<f64>,
    ) -> Result<Dynamic, Box<EvalAltResult>> {
        // Top-level statements were run (if at all) when the script loaded
        let options = CallFnOptions::new().eval_ast(false);
        self.engine.call_fn_with_options(
            options,
            &mut Scope::new(),
            &self.ast,
            name,
            (p.x, p.y, p.z),
        )
    }

    fn report(&self, name: &str, p: Vector3<f64>, err: &str) {
        if !self.failed.replace(true) {
            warn!(
                "{}: {name}({}, {}, {}) failed: {err} \
                 (further errors are not reported)",
                self.name, p.x, p.y, p.z
            );
        }
    }

    /// Calls a scalar function, returning NaN if evaluation fails
    pub fn scalar(&self, name: &str, p: Vector3<f64>) -> f64 {
        match self.call(name, p) {
            Ok(v) => match to_float(&v) {
                Some(f) => f,
                None => {
                    self.report(name, p, "expected a number");
                    f64::NAN
                }
            },
            Err(e) => {
                self.report(name, p, &e.to_string());
                f64::NAN
            }
        }
    }

    /// Calls a function returning a 3-element array
    ///
    /// Failed evaluations produce a vector of NaN.
    pub fn vector(&self, name: &str, p: Vector3<f64>) -> Vector3<f64> {
        let out = self.call(name, p).map_err(|e| e.to_string()).and_then(|v| {
            let array = v.into_array().map_err(|ty| {
                format!("expected an array, got {ty}")
            })?;
            match array.as_slice() {
                [a, b, c] => match (to_float(a), to_float(b), to_float(c)) {
                    (Some(a), Some(b), Some(c)) => Ok(Vector3::new(a, b, c)),
                    _ => Err("expected an array of numbers".to_owned()),
                },
                _ => Err(format!("expected 3 values, got {}", array.len())),
            }
        });
        out.unwrap_or_else(|e| {
            self.report(name, p, &e);
            Vector3::repeat(f64::NAN)
        })
    }
}

fn to_float(d: &Dynamic) -> Option<f64> {
    d.as_float()
        .ok()
        .or_else(|| d.as_int().ok().map(|i| i as f64))
}

/// Central-difference gradient of the script's field
fn gradient(script: &Script, p: Vector3<f64>, h: f64) -> Vector3<f64> {
    let mut g = Vector3::zeros();
    for i in 0..3 {
        let mut d = Vector3::zeros();
        d[i] = h;
        g[i] = script.scalar("field", p + d) - script.scalar("field", p - d);
    }
    g.normalize()
}

/// Fields a mesh built from this script will store
pub fn format(script: &Script, normals: bool) -> Format {
    let mut format = Format::COORDS;
    if normals {
        format = format | Format::NORMALS;
    }
    if script.defines("color") {
        format = format | Format::COLORS;
    }
    if script.defines("texcoord") {
        format = format | Format::TEXCOORDS;
    }
    format
}

/// Installs the script's functions as mesh callbacks
///
/// Without a `normal` function, normals come from the field's gradient,
/// sampled `h` away from each point.
pub fn install(script: &Rc<Script>, mesh: &mut Mesh, h: f64) -> Result<()> {
    if !script.defines("field") {
        bail!("{} does not define field(x, y, z)", script.name);
    }
    let s = script.clone();
    mesh.set_field(move |x, y, z| s.scalar("field", Vector3::new(x, y, z)));

    let s = script.clone();
    if script.defines("normal") {
        mesh.set_normal_fn(move |p| s.vector("normal", p));
    } else {
        mesh.set_normal_fn(move |p| gradient(&s, p, h));
    }
    if script.defines("color") {
        let s = script.clone();
        mesh.set_color_fn(move |p| s.vector("color", p));
    }
    if script.defines("texcoord") {
        let s = script.clone();
        mesh.set_texcoord_fn(move |p| s.vector("texcoord", p));
    }
    Ok(())
}
