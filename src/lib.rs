pub mod cli;
pub mod codegen;
pub mod error;
pub mod expr;
pub mod ir;
pub mod names;
pub mod opt;
pub mod project;
pub mod stmt;
pub mod types;

use anyhow::{Context, Result};
use names::Names;
use project::Project;
use std::path::Path;
use stmt::IrBuilder;

pub use error::CompileError;

/// Compiler switches. The defaults favour output size and speed over
/// bit-for-bit Scratch fidelity in the places where the difference is
/// unobservable in practice.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Omit the newline between emitted statements.
    pub minify: bool,
    /// Use `|0` instead of `Math.floor` where the operand is known to
    /// stay inside int32 range.
    pub unsafe_floor: bool,
    /// Round sin/cos results to 10 decimal places, matching Scratch.
    pub accurate_trig: bool,
    /// Fold constant expressions at compile time.
    pub precompute: bool,
    /// Value reported by the username block.
    pub username: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            minify: true,
            unsafe_floor: true,
            accurate_trig: true,
            precompute: true,
            username: String::new(),
        }
    }
}

/// Compile a parsed project to a JavaScript program.
pub fn compile(project: &Project, settings: &Settings) -> Result<String, CompileError> {
    let mut names = Names::new();
    let mut init = String::new();
    let mut res = String::new();
    for (index, target) in project.targets.iter().enumerate() {
        let ir = IrBuilder::build_sprite(settings, &mut names, target)?;
        let out = codegen::emit_target(settings, &mut names, index, target, &ir);
        init.push_str(&out.globals);
        res.push_str(&out.code);
    }
    res.push_str("flag()");
    init.push_str(&res);
    Ok(init)
}

/// Compile an `.sb3` archive or bare `project.json` file.
pub fn compile_file(input: &Path, settings: &Settings) -> Result<String> {
    let project = Project::load(input)?;
    compile(&project, settings)
        .with_context(|| format!("Failed to compile '{}'.", input.display()))
}

pub fn run_cli(args: &cli::Args) -> Result<()> {
    let settings = Settings {
        minify: !args.no_minify,
        unsafe_floor: !args.safe_floor,
        accurate_trig: !args.fast_trig,
        precompute: !args.no_precompute,
        username: args.username.clone(),
    };
    let js = compile_file(&args.input, &settings)?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension("js"));
    std::fs::write(&output, js)
        .with_context(|| format!("Failed to write '{}'.", output.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_project_compiles_to_a_runnable_skeleton() {
        let project = Project::from_value(&json!({
            "targets": [
                {"name": "Stage", "isStage": true, "blocks": {}},
                {"name": "Cat", "isStage": false, "blocks": {}, "x": 10, "y": -20}
            ]
        }))
        .unwrap();
        let js = compile(&project, &Settings::default()).unwrap();
        assert!(js.starts_with("sprites[0]=new (spriteDefs[0]=function(){"));
        assert!(js.contains("sprites[1]=new (spriteDefs[1]=function(){"));
        assert!(js.contains("self.c=10;self.d=-20;"));
        assert!(js.ends_with("flag()"));
    }

    #[test]
    fn stage_variables_declare_ahead_of_all_sprites() {
        let project = Project::from_value(&json!({
            "targets": [
                {
                    "name": "Stage",
                    "isStage": true,
                    "variables": {"g": ["global", "hi"]},
                    "blocks": {}
                },
                {
                    "name": "Cat",
                    "isStage": false,
                    "variables": {"l": ["local", 5]},
                    "blocks": {}
                }
            ]
        }))
        .unwrap();
        let js = compile(&project, &Settings::default()).unwrap();
        assert!(js.starts_with("let v0=\"hi\";"));
        // The sprite's own variable stays inside its closure.
        assert!(js.contains("let v1=5;self.c="));
    }

    #[test]
    fn bare_project_json_compiles_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!({
                "targets": [{"name": "Stage", "isStage": true, "blocks": {}}]
            }))
            .unwrap(),
        )
        .unwrap();
        let js = compile_file(&path, &Settings::default()).unwrap();
        assert!(js.ends_with("flag()"));
    }
}
