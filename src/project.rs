//! Loading of Scratch project files.
//!
//! A `.sb3` file is a zip archive whose `project.json` holds everything
//! the compiler needs; a bare `project.json` is accepted too. Only the
//! block graph, variable declarations and sprite transforms are kept,
//! assets are ignored.

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use zip::ZipArchive;

#[derive(Debug, Clone)]
pub struct Project {
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub is_stage: bool,
    /// Blocks by id, with `order` preserving the file's key order so
    /// script emission stays deterministic.
    pub blocks: HashMap<String, Block>,
    pub order: Vec<String>,
    /// Variable declarations as (id, name, initial value).
    pub variables: Vec<(String, String, Value)>,
    pub lists: Vec<(String, String, Value)>,
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub visible: bool,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub opcode: String,
    pub inputs: Map<String, Value>,
    pub fields: Map<String, Value>,
    pub next: Option<String>,
    pub top_level: bool,
    pub mutation: Option<Mutation>,
}

impl Block {
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    /// First element of a field entry, the selected menu value.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name)?.get(0)?.as_str()
    }

    /// Second element of a field entry, the id of the selected item.
    pub fn field_id(&self, name: &str) -> Option<&str> {
        self.fields.get(name)?.get(1)?.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct Mutation {
    pub proccode: String,
    pub argument_ids: Vec<String>,
    pub argument_names: Vec<String>,
    pub warp: bool,
}

impl Project {
    /// Read a project from an `.sb3` archive or a bare `project.json`.
    pub fn load(input: &Path) -> Result<Self> {
        let bytes = fs::read(input)
            .with_context(|| format!("Failed to open '{}'.", input.display()))?;

        let json = if bytes.starts_with(b"PK") {
            let mut zip = ZipArchive::new(std::io::Cursor::new(bytes))
                .with_context(|| format!("'{}' is not a valid zip/.sb3 file.", input.display()))?;
            let mut entry = zip
                .by_name("project.json")
                .map_err(|_| anyhow!("project.json not found in '{}'.", input.display()))?;
            let mut text = String::new();
            use std::io::Read;
            entry.read_to_string(&mut text)?;
            text
        } else {
            String::from_utf8(bytes)
                .with_context(|| format!("'{}' is not UTF-8 JSON.", input.display()))?
        };

        let value: Value = serde_json::from_str(&json)
            .with_context(|| format!("Invalid project.json in '{}'.", input.display()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let targets = value
            .get("targets")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("Invalid project.json: missing 'targets' array."))?;

        let mut parsed: Vec<Target> = targets.iter().map(parse_target).collect::<Result<_>>()?;
        // The stage always compiles first; sprites keep their file order.
        parsed.sort_by_key(|t| !t.is_stage);
        if !parsed.first().map(|t| t.is_stage).unwrap_or(false) {
            return Err(anyhow!("Project has no stage target."));
        }
        Ok(Self { targets: parsed })
    }
}

fn parse_target(target: &Value) -> Result<Target> {
    let name = target
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Target missing 'name'."))?
        .to_string();
    let is_stage = target
        .get("isStage")
        .and_then(Value::as_bool)
        .ok_or_else(|| anyhow!("Target '{}' missing isStage.", name))?;

    let mut blocks = HashMap::new();
    let mut order = Vec::new();
    if let Some(obj) = target.get("blocks").and_then(Value::as_object) {
        for (id, block) in obj {
            // Floating reporter blocks serialize as bare arrays; they
            // have no effect and are skipped.
            if !block.is_object() {
                continue;
            }
            blocks.insert(id.clone(), parse_block(block)?);
            order.push(id.clone());
        }
    }

    Ok(Target {
        is_stage,
        blocks,
        order,
        variables: read_decls(target.get("variables")),
        lists: read_decls(target.get("lists")),
        x: num_or(target.get("x"), 0.0),
        y: num_or(target.get("y"), 0.0),
        direction: num_or(target.get("direction"), 90.0),
        visible: target
            .get("visible")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        name,
    })
}

fn parse_block(block: &Value) -> Result<Block> {
    let opcode = block
        .get("opcode")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Block missing 'opcode'."))?
        .to_string();

    Ok(Block {
        opcode,
        inputs: block
            .get("inputs")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        fields: block
            .get("fields")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        next: block
            .get("next")
            .and_then(Value::as_str)
            .map(str::to_string),
        top_level: block
            .get("topLevel")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        mutation: block.get("mutation").map(parse_mutation),
    })
}

fn parse_mutation(mutation: &Value) -> Mutation {
    Mutation {
        proccode: mutation
            .get("proccode")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        argument_ids: string_list(mutation.get("argumentids")),
        argument_names: string_list(mutation.get("argumentnames")),
        warp: match mutation.get("warp") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        },
    }
}

/// Mutation argument lists are JSON arrays encoded as strings.
fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .unwrap_or_default()
}

fn read_decls(value: Option<&Value>) -> Vec<(String, String, Value)> {
    let mut res = Vec::new();
    if let Some(obj) = value.and_then(Value::as_object) {
        for (id, decl) in obj {
            let name = decl
                .get(0)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let initial = decl.get(1).cloned().unwrap_or(Value::Null);
            res.push((id.clone(), name, initial));
        }
    }
    res
}

fn num_or(value: Option<&Value>, default: f64) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(default)
}
