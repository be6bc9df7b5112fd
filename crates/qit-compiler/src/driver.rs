//! The `Qit` runner: ties the declaration/emission pass to an external C++
//! toolchain and to the generated binary's own invocation (§6 "Host
//! configuration", "Build boundary").
//!
//! Grounded in `original_source/src/qit/base/qit.py`'s `Qit` class: the
//! `source_dir`/`build_dir`/`verbose`/`create_files`/`debug` constructor
//! arguments, the `verbose` → logging-level mapping, and the three entry
//! points (`run`, `declarations`, `create_files`) all carry over; the
//! Python class delegates the actual build/run machinery to a `CppEnv` that
//! was not part of the retrieved source, so the process-spawning below is
//! authored fresh in the style of `typhon-compiler::driver::Driver`
//! (a `*Config` struct plus a thin coordinating type).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use qit_ast::collection::Collection;
use qit_ast::types::HostValue;
use qit_runtime::reader::{self, Value};

use crate::builder;
use crate::error::{QitError, QitResult};

/// Maps `verbose` (0/1/2) onto `log` levels the way `Qit.__init__` maps it
/// onto `logging` levels. `Off` suppresses the driver's own `info`/`debug`
/// lines (library code still logs at whatever level the global logger is
/// configured for — this only controls what `Qit` itself emits around
/// compilation and execution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerboseLevel {
    Off,
    Info,
    Debug,
}

impl VerboseLevel {
    fn log_level(self) -> log::Level {
        match self {
            VerboseLevel::Off => log::Level::Error,
            VerboseLevel::Info => log::Level::Info,
            VerboseLevel::Debug => log::Level::Debug,
        }
    }
}

/// Configuration for a [`Qit`] runner (§6 "Host configuration").
#[derive(Debug, Clone)]
pub struct QitConfig {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub verbose: VerboseLevel,
    pub create_files: bool,
    pub debug: bool,
}

impl Default for QitConfig {
    fn default() -> QitConfig {
        QitConfig {
            source_dir: PathBuf::from("."),
            build_dir: PathBuf::from("./qit-build"),
            verbose: VerboseLevel::Off,
            create_files: false,
            debug: false,
        }
    }
}

/// Coordinates declaring an expression, emitting its C++ translation unit,
/// invoking the native compiler, running the resulting binary, and
/// reconstructing its output stream.
pub struct Qit {
    config: QitConfig,
}

impl Qit {
    pub fn new(config: QitConfig) -> Qit {
        if log::max_level() < config.verbose.log_level().to_level_filter() {
            log::warn!("requested verbosity exceeds the configured log filter; some lines will be dropped");
        }
        Qit { config }
    }

    /// Declares and emits `expr`'s C++ translation unit without compiling
    /// or running it (`qit.py`'s `Qit.declarations`).
    pub fn declarations(&self, expr: &Collection) -> QitResult<String> {
        builder::compile(expr, &HashMap::new())
    }

    /// Writes the generated source (and the runtime header) under
    /// `build_dir`, for inspection or manual compilation (`Qit.create_files`).
    pub fn create_files(&self, expr: &Collection, args: &HashMap<String, HostValue>) -> QitResult<PathBuf> {
        let source = builder::compile(expr, args)?;
        fs::create_dir_all(&self.config.build_dir)?;
        self.write_sources(&source)
    }

    /// Compiles and runs `expr`, collecting every element it writes to its
    /// output stream (`Qit.run`).
    pub fn run(&self, expr: &Collection, args: HashMap<String, HostValue>) -> QitResult<Vec<Value>> {
        let mut free_vars = Vec::new();
        expr.free_variables(&mut free_vars);
        for var in &free_vars {
            if !args.contains_key(&var.name) {
                return Err(QitError::UnboundVariable(var.name.clone()));
            }
        }
        let bound: std::collections::HashSet<&str> = free_vars.iter().map(|v| v.name.as_str()).collect();
        for name in args.keys() {
            if !bound.contains(name.as_str()) {
                return Err(QitError::SuperfluousArgument(name.clone()));
            }
        }

        let source = builder::compile(expr, &args)?;
        fs::create_dir_all(&self.config.build_dir)?;
        let source_path = self.write_sources(&source)?;

        log::info!("compiling {}", source_path.display());
        let binary_path = self.config.build_dir.join("qit_program");
        self.invoke_compiler(&source_path, &binary_path)?;

        let output_path = self.config.build_dir.join("qit_output.bin");
        log::info!("running {} -> {}", binary_path.display(), output_path.display());
        self.invoke_program(&binary_path, &output_path)?;

        let elem_ty = expr.element_type();
        let bytes = fs::read(&output_path)?;
        let mut cursor: &[u8] = &bytes;
        let mut results = Vec::new();
        while let Some(value) = reader::read_value(&mut cursor, &elem_ty)? {
            results.push(value);
        }
        log::debug!("collected {} elements", results.len());
        Ok(results)
    }

    fn write_sources(&self, source: &str) -> QitResult<PathBuf> {
        let header_path = self.config.build_dir.join("qit.h");
        fs::write(&header_path, qit_runtime::RUNTIME_HEADER)?;
        let source_path = self.config.build_dir.join("qit_program.cpp");
        fs::write(&source_path, source)?;
        Ok(source_path)
    }

    fn invoke_compiler(&self, source_path: &Path, binary_path: &Path) -> QitResult<()> {
        let cxx = std::env::var("CXX").unwrap_or_else(|_| "c++".to_string());
        let mut cmd = Command::new(&cxx);
        cmd.arg("-std=c++17")
            .arg("-I")
            .arg(&self.config.build_dir)
            .arg(source_path)
            .arg("-o")
            .arg(binary_path);
        if self.config.debug {
            cmd.arg("-O0").arg("-g");
        } else {
            cmd.arg("-O2");
        }
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(QitError::CompileFailure {
                status: output.status.code().unwrap_or(-1),
                source_path: source_path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    fn invoke_program(&self, binary_path: &Path, output_path: &Path) -> QitResult<()> {
        let output = Command::new(binary_path).arg(output_path).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if stderr.contains("Assertion") {
                return Err(QitError::Assertion(stderr));
            }
            return Err(QitError::RunFailure {
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_documented_defaults() {
        let config = QitConfig::default();
        assert_eq!(config.source_dir, PathBuf::from("."));
        assert_eq!(config.build_dir, PathBuf::from("./qit-build"));
        assert_eq!(config.verbose, VerboseLevel::Off);
        assert!(!config.create_files);
        assert!(!config.debug);
    }

    #[test]
    fn declarations_rejects_nothing_and_emits_a_translation_unit() {
        let expr = Collection::range_iterate(4);
        let qit = Qit::new(QitConfig::default());
        let source = qit.declarations(&expr).unwrap();
        assert!(source.contains("int main"));
        assert!(source.contains("qit::RangeIterator"));
    }

    #[test]
    fn run_rejects_unbound_free_variables() {
        let ty = qit_ast::types::Type::range(10);
        let var = qit_ast::Expr::variable("n", ty);
        let expr = Collection::range_iterate(var);
        let qit = Qit::new(QitConfig::default());
        let err = qit.run(&expr, HashMap::new()).unwrap_err();
        assert!(matches!(err, QitError::UnboundVariable(name) if name == "n"));
    }

    #[test]
    fn run_rejects_superfluous_arguments() {
        let expr = Collection::range_iterate(4);
        let qit = Qit::new(QitConfig::default());
        let mut args = HashMap::new();
        args.insert("unused".to_string(), HostValue::Int(1));
        let err = qit.run(&expr, args).unwrap_err();
        assert!(matches!(err, QitError::SuperfluousArgument(name) if name == "unused"));
    }
}
