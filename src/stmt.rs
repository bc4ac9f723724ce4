//! Script lowering: hat blocks and statement stacks become [`Script`]s.
//!
//! This is where the variable type environment lives. Straight-line
//! code narrows variable types on assignment; loops run a fixed-point
//! pass (compile, compare, recompile at most once) so a type believed
//! inside a loop body holds on every iteration. Any operation that can
//! suspend the script drops all beliefs, since other scripts may write
//! variables while this one is parked.

use crate::error::CompileError;
use crate::ir::{Expr, ExprKind, HatKind, PenParam, ProcInfo, Script, Stmt};
use crate::names::Names;
use crate::opt::push_not;
use crate::project::{Block, Target};
use crate::types::{js_round, Type};
use crate::Settings;
use log::warn;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Everything compiled out of one target.
pub struct SpriteIr {
    pub scripts: Vec<Script>,
    pub procs: HashMap<String, ProcInfo>,
    /// Procedures with an empty body. They are not emitted and calls to
    /// them are elided.
    pub comment_procs: HashSet<String>,
}

pub struct IrBuilder<'a> {
    pub(crate) settings: &'a Settings,
    pub(crate) names: &'a mut Names,
    pub(crate) blocks: &'a HashMap<String, Block>,
    pub(crate) is_stage: bool,
    /// Believed type per variable token.
    pub(crate) env: HashMap<String, Type>,
    /// Argument indices of the procedure being compiled, by name.
    pub(crate) args: HashMap<String, usize>,
    procs: HashMap<String, ProcInfo>,
    comment_procs: HashSet<String>,
    suspends: bool,
}

/// Remove every variable whose believed type differs between the two
/// maps, leaving both equal to their agreeing intersection. `keep` is
/// exempted (the loop counter of a for-each, pinned by the loop
/// itself). Returns whether anything was evicted.
fn evict_disagreements(
    env: &mut HashMap<String, Type>,
    snapshot: &mut HashMap<String, Type>,
    keep: Option<&str>,
) -> bool {
    let mut changed = false;
    let keys: Vec<String> = env.keys().cloned().collect();
    for k in keys {
        if keep == Some(k.as_str()) {
            continue;
        }
        if snapshot.get(&k) != env.get(&k) {
            env.remove(&k);
            changed = true;
        }
    }
    let keys: Vec<String> = snapshot.keys().cloned().collect();
    for k in keys {
        if keep == Some(k.as_str()) {
            continue;
        }
        if env.get(&k) != snapshot.get(&k) {
            snapshot.remove(&k);
            changed = true;
        }
    }
    changed
}

fn substack_id(block: &Block, name: &str) -> Option<String> {
    block
        .input(name)?
        .get(1)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Argument conventions of a proccode: one entry per `%s`/`%n`/`%b`
/// hole. Only booleans get a forced conversion at the call site.
fn proccode_arg_types(proccode: &str) -> Result<Vec<Type>, CompileError> {
    let re = Regex::new(r"%[sbn]").map_err(|e| CompileError::new(e.to_string()))?;
    Ok(re
        .find_iter(proccode)
        .map(|m| {
            if m.as_str() == "%b" {
                Type::Boolean
            } else {
                Type::Any
            }
        })
        .collect())
}

impl<'a> IrBuilder<'a> {
    pub fn build_sprite(
        settings: &'a Settings,
        names: &'a mut Names,
        target: &'a Target,
    ) -> Result<SpriteIr, CompileError> {
        names.begin_sprite(target.is_stage);
        let mut builder = IrBuilder {
            settings,
            names,
            blocks: &target.blocks,
            is_stage: target.is_stage,
            env: HashMap::new(),
            args: HashMap::new(),
            procs: HashMap::new(),
            comment_procs: HashSet::new(),
            suspends: false,
        };

        let mut scripts = Vec::new();
        for id in &target.order {
            let block = &target.blocks[id];
            if !block.top_level {
                continue;
            }
            if let Some(script) = builder.script(block)? {
                scripts.push(script);
            }
        }

        Ok(SpriteIr {
            scripts,
            procs: builder.procs,
            comment_procs: builder.comment_procs,
        })
    }

    fn script(&mut self, block: &Block) -> Result<Option<Script>, CompileError> {
        let mut yields = true;
        self.args.clear();

        let hat = match block.opcode.as_str() {
            "event_whenflagclicked" => HatKind::FlagClicked,
            "event_whenkeypressed" => {
                HatKind::KeyPressed(require_field(block, "KEY_OPTION")?.to_string())
            }
            "event_whenbroadcastreceived" => HatKind::BroadcastReceived(
                require_field(block, "BROADCAST_OPTION")?.to_string(),
            ),
            "control_start_as_clone" => HatKind::StartAsClone,
            "procedures_definition" => {
                let proto_id = block
                    .input("custom_block")
                    .and_then(|v| v.get(1))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        CompileError::new("Procedure definition missing its prototype.")
                    })?;
                let proto = self.blocks.get(proto_id).ok_or_else(|| {
                    CompileError::new("Procedure definition missing its prototype.")
                })?;
                let mutation = proto.mutation.clone().ok_or_else(|| {
                    CompileError::new("Procedure prototype missing mutation data.")
                })?;

                for (idx, name) in mutation.argument_names.iter().enumerate() {
                    self.args.insert(name.clone(), idx);
                }

                // A proccode can be defined twice; the first wins.
                if self.procs.contains_key(&mutation.proccode) {
                    return Ok(None);
                }
                self.names.procedure(&mutation.proccode);
                let info = ProcInfo {
                    proccode: mutation.proccode.clone(),
                    warp: mutation.warp,
                    arg_names: mutation.argument_names.clone(),
                    arg_ids: mutation.argument_ids.clone(),
                    arg_types: proccode_arg_types(&mutation.proccode)?,
                };
                self.procs.insert(mutation.proccode.clone(), info.clone());
                yields = !mutation.warp;

                if block.next.is_none() {
                    self.comment_procs.insert(mutation.proccode.clone());
                }
                HatKind::ProcedureDefinition(info)
            }
            other => {
                warn!("Unknown hat block '{}'", other);
                return Ok(None);
            }
        };

        self.env.clear();
        self.suspends = false;
        let body = self.stack(block.next.clone(), yields)?;

        if body.is_empty() {
            if let HatKind::ProcedureDefinition(info) = &hat {
                self.comment_procs.insert(info.proccode.clone());
            }
        }

        Ok(Some(Script {
            hat,
            body,
            suspends: self.suspends,
        }))
    }

    fn sub(
        &mut self,
        block: &Block,
        name: &str,
        yields: bool,
    ) -> Result<Vec<Stmt>, CompileError> {
        self.stack(substack_id(block, name), yields)
    }

    /// Lower a chain of statement blocks.
    fn stack(
        &mut self,
        start: Option<String>,
        yields: bool,
    ) -> Result<Vec<Stmt>, CompileError> {
        let mut res = Vec::new();
        let mut next = start;

        while let Some(id) = next {
            let block = self
                .blocks
                .get(&id)
                .cloned()
                .ok_or_else(|| CompileError::new(format!("Unknown block id '{}'.", id)))?;

            match block.opcode.as_str() {
                "control_forever" => {
                    if yields {
                        self.env.clear();
                    }
                    let mut snapshot = self.env.clone();
                    let mut body = self.sub(&block, "SUBSTACK", yields)?;
                    if evict_disagreements(&mut self.env, &mut snapshot, None) {
                        body = self.sub(&block, "SUBSTACK", yields)?;
                    }
                    self.env = snapshot;
                    if yields {
                        self.env.clear();
                    }
                    res.push(Stmt::Forever(body));
                }

                "control_wait" => {
                    self.env.clear();
                    self.suspends = true;
                    let dur = self.value(block.input("DURATION"), Type::Number)?;
                    res.push(Stmt::Wait(dur));
                }

                "control_wait_until" => {
                    self.env.clear();
                    self.suspends = true;
                    let cond = self.value(block.input("CONDITION"), Type::Boolean)?;
                    res.push(Stmt::WaitUntil(cond));
                }

                "control_if" | "control_while" => {
                    let is_while = block.opcode == "control_while";
                    let mut cond = self.value(block.input("CONDITION"), Type::Boolean)?;

                    if let (false, Some(c)) = (is_while, cond.as_const()) {
                        // A constant if either inlines or disappears.
                        if c.truthy() {
                            res.extend(self.sub(&block, "SUBSTACK", yields)?);
                        }
                    } else if !cond.is_const()
                        || cond.as_const().map(|c| c.truthy()) == Some(true)
                    {
                        if is_while && yields {
                            self.env.clear();
                        }
                        let mut snapshot = self.env.clone();
                        let mut body = self.sub(&block, "SUBSTACK", yields)?;
                        let changed =
                            evict_disagreements(&mut self.env, &mut snapshot, None);
                        if is_while && changed {
                            body = self.sub(&block, "SUBSTACK", yields)?;
                            cond = self.value(block.input("CONDITION"), Type::Boolean)?;
                        }
                        self.env = snapshot;

                        if is_while {
                            if cond.as_const().map(|c| c.truthy()) == Some(true) {
                                res.push(Stmt::Forever(body));
                            } else {
                                res.push(Stmt::While { cond, body });
                            }
                            if yields {
                                self.env.clear();
                            }
                        } else {
                            res.push(Stmt::If { cond, then: body });
                        }
                    }
                }

                "control_repeat_until" => {
                    let raw = self.value(block.input("CONDITION"), Type::Boolean)?;
                    let mut cond = push_not(raw, self.settings.precompute);

                    if !cond.is_const()
                        || cond.as_const().map(|c| c.truthy()) == Some(true)
                    {
                        let mut snapshot = self.env.clone();
                        let mut body = self.sub(&block, "SUBSTACK", yields)?;
                        if evict_disagreements(&mut self.env, &mut snapshot, None) {
                            body = self.sub(&block, "SUBSTACK", yields)?;
                            let raw =
                                self.value(block.input("CONDITION"), Type::Boolean)?;
                            cond = push_not(raw, self.settings.precompute);
                        }
                        self.env = snapshot;

                        let pushed = match cond.as_const() {
                            Some(c) if c.truthy() => {
                                res.push(Stmt::Forever(body));
                                true
                            }
                            Some(_) => false,
                            None => {
                                res.push(Stmt::While { cond, body });
                                true
                            }
                        };
                        if pushed && yields {
                            self.env.clear();
                        }
                    }
                }

                "control_if_else" => {
                    let cond = self.value(block.input("CONDITION"), Type::Boolean)?;
                    if let Some(c) = cond.as_const() {
                        let branch = if c.truthy() { "SUBSTACK" } else { "SUBSTACK2" };
                        res.extend(self.sub(&block, branch, yields)?);
                    } else {
                        let before = self.env.clone();
                        let then = self.sub(&block, "SUBSTACK", yields)?;
                        let mut post_then = self.env.clone();
                        self.env = before;
                        let otherwise = self.sub(&block, "SUBSTACK2", yields)?;
                        // Keep only beliefs both branches agree on.
                        evict_disagreements(&mut self.env, &mut post_then, None);
                        res.push(Stmt::IfElse {
                            cond,
                            then,
                            otherwise,
                        });
                    }
                }

                "control_for_each" => {
                    let mut times = self.value(block.input("VALUE"), Type::Number)?;
                    if yields {
                        self.env.clear();
                    }
                    let var_id = require_field_id(&block, "VARIABLE")?;
                    let var = self.names.variable(&var_id);
                    // The counter is written by the loop itself, so it
                    // stays an int against eviction.
                    self.env.insert(var.clone(), Type::Int);
                    let mut snapshot = self.env.clone();
                    let mut body = self.sub(&block, "SUBSTACK", yields)?;
                    if evict_disagreements(&mut self.env, &mut snapshot, Some(&var)) {
                        body = self.sub(&block, "SUBSTACK", yields)?;
                        // The bound is re-read every iteration, so it
                        // follows the narrowed types too.
                        times = self.value(block.input("VALUE"), Type::Number)?;
                    }
                    self.env = snapshot;
                    if yields {
                        self.env.clear();
                    }
                    res.push(Stmt::ForEach { var, times, body });
                }

                "control_repeat" => {
                    let mut times = self.value(block.input("TIMES"), Type::Number)?;
                    let runs = match times.as_const() {
                        Some(c) => js_round(c.as_number()) > 0.0,
                        None => true,
                    };
                    if runs {
                        let mut snapshot = self.env.clone();
                        let mut body = self.sub(&block, "SUBSTACK", yields)?;
                        if evict_disagreements(&mut self.env, &mut snapshot, None) {
                            body = self.sub(&block, "SUBSTACK", yields)?;
                            times = self.value(block.input("TIMES"), Type::Number)?;
                        }
                        self.env = snapshot;
                        if yields {
                            self.env.clear();
                        }
                        res.push(Stmt::Repeat { times, body });
                    }
                }

                "control_stop" => match require_field(&block, "STOP_OPTION")? {
                    "all" => res.push(Stmt::StopAll),
                    "this script" => res.push(Stmt::StopScript),
                    other => warn!("Unsupported stop option '{}'", other),
                },

                "control_create_clone_of" => {
                    let target = self.value(block.input("CLONE_OPTION"), Type::Any)?;
                    res.push(Stmt::CreateClone(target));
                }
                "control_delete_this_clone" => res.push(Stmt::DeleteThisClone),
                "control_clear_counter" => res.push(Stmt::ClearCounter),
                "control_incr_counter" => res.push(Stmt::IncrCounter),

                "event_broadcast" => {
                    let broad = self.value(block.input("BROADCAST_INPUT"), Type::Str)?;
                    res.push(Stmt::Broadcast(broad));
                }
                "event_broadcastandwait" => {
                    self.env.clear();
                    self.suspends = true;
                    let broad = self.value(block.input("BROADCAST_INPUT"), Type::Str)?;
                    res.push(Stmt::BroadcastWait(broad));
                }

                "motion_goto" => {
                    if !self.is_stage {
                        let to = self.value(block.input("TO"), Type::Str)?;
                        res.push(Stmt::GoTo(to));
                    }
                }
                "motion_glidesecstoxy" => {
                    if !self.is_stage {
                        let x = self.value(block.input("X"), Type::Number)?;
                        let y = self.value(block.input("Y"), Type::Number)?;
                        let secs = self.value(block.input("SECS"), Type::Number)?;
                        // Gliding parks the script across frames, so
                        // other scripts may rewrite any variable.
                        self.env.clear();
                        self.suspends = true;
                        res.push(Stmt::Glide { secs, x, y });
                    }
                }
                "motion_gotoxy" => {
                    if !self.is_stage {
                        let x = self.value(block.input("X"), Type::Number)?;
                        let y = self.value(block.input("Y"), Type::Number)?;
                        res.push(Stmt::GoToXY { x, y });
                    }
                }
                "motion_setx" => {
                    if !self.is_stage {
                        let v = self.value(block.input("X"), Type::Number)?;
                        res.push(Stmt::SetX(v));
                    }
                }
                "motion_changexby" => {
                    if !self.is_stage {
                        let v = self.value(block.input("DX"), Type::Number)?;
                        res.push(Stmt::ChangeX(v));
                    }
                }
                "motion_sety" => {
                    if !self.is_stage {
                        let v = self.value(block.input("Y"), Type::Number)?;
                        res.push(Stmt::SetY(v));
                    }
                }
                "motion_changeyby" => {
                    if !self.is_stage {
                        let v = self.value(block.input("DY"), Type::Number)?;
                        res.push(Stmt::ChangeY(v));
                    }
                }
                "motion_movesteps" => {
                    if !self.is_stage {
                        let v = self.value(block.input("STEPS"), Type::Number)?;
                        res.push(Stmt::MoveSteps(v));
                    }
                }
                "motion_pointtowards" => {
                    if !self.is_stage {
                        let dir = self.value(block.input("TOWARDS"), Type::Str)?;
                        res.push(Stmt::PointTowards(dir));
                    }
                }
                "motion_pointindirection" => {
                    if !self.is_stage {
                        let dir = self.value(block.input("DIRECTION"), Type::Number)?;
                        res.push(Stmt::PointInDirection(dir));
                    }
                }
                "motion_turnright" => {
                    if !self.is_stage {
                        let v = self.value(block.input("DEGREES"), Type::Number)?;
                        res.push(Stmt::TurnRight(v));
                    }
                }
                "motion_turnleft" => {
                    if !self.is_stage {
                        let v = self.value(block.input("DEGREES"), Type::Number)?;
                        res.push(Stmt::TurnLeft(v));
                    }
                }
                // No rendering side exists for rotation styles.
                "motion_setrotationstyle" => {}

                "looks_show" => res.push(Stmt::Show),
                "looks_hide" => res.push(Stmt::Hide),
                "looks_say" => {
                    let msg = self.value(block.input("MESSAGE"), Type::Str)?;
                    res.push(Stmt::Say(msg));
                }
                "looks_sayforsecs" => {
                    let secs = self.value(block.input("SECS"), Type::Number)?;
                    self.suspends = true;
                    self.env.clear();
                    let message = self.value(block.input("MESSAGE"), Type::Str)?;
                    res.push(Stmt::SayForSecs { message, secs });
                }
                "looks_switchbackdropto" => {
                    let v = self.value(block.input("BACKDROP"), Type::IntStr)?;
                    res.push(Stmt::SwitchBackdrop(v));
                }
                "looks_switchbackdroptoandwait" => {
                    self.env.clear();
                    self.suspends = true;
                    let v = self.value(block.input("BACKDROP"), Type::IntStr)?;
                    res.push(Stmt::SwitchBackdropWait(v));
                }
                // Costume and effect state has no runtime counterpart.
                "looks_switchcostumeto"
                | "looks_setsizeto"
                | "looks_changesizeby"
                | "looks_seteffectto"
                | "looks_changeeffectby"
                | "looks_cleargraphiceffects"
                | "looks_gotofrontback"
                | "looks_goforwardbackwardlayers" => {}

                "sound_setvolumeto" => {
                    self.suspends = true;
                    self.env.clear();
                    let v = self.value(block.input("VOLUME"), Type::Int)?;
                    res.push(Stmt::SetVolume(v));
                }
                "sound_changevolumeby" => {
                    self.suspends = true;
                    self.env.clear();
                    let v = self.value(block.input("VOLUME"), Type::Int)?;
                    res.push(Stmt::ChangeVolume(v));
                }
                // Sound playback can suspend scripts even though no
                // audio backend exists yet.
                "sound_play" | "sound_playuntildone" | "sound_stopallsounds"
                | "sound_seteffectto" => {
                    self.suspends = true;
                    self.env.clear();
                }

                "sensing_resettimer" => res.push(Stmt::ResetTimer),
                "sensing_askandwait" => {
                    self.suspends = true;
                    self.env.clear();
                    let q = self.value(block.input("QUESTION"), Type::Str)?;
                    res.push(Stmt::AskAndWait(q));
                }

                "pen_penDown" => res.push(Stmt::PenDown),
                "pen_penUp" => res.push(Stmt::PenUp),
                "pen_clear" => res.push(Stmt::PenClear),
                "pen_stamp" => res.push(Stmt::PenStamp),
                "pen_setPenSizeTo" => {
                    let v = self.value(block.input("SIZE"), Type::Number)?;
                    res.push(Stmt::SetPenSize(v));
                }
                "pen_changePenSizeBy" => {
                    let v = self.value(block.input("SIZE"), Type::Number)?;
                    res.push(Stmt::ChangePenSize(v));
                }
                "pen_setPenColorParamTo" | "pen_changePenColorParamBy" => {
                    let param = self.value(block.input("COLOR_PARAM"), Type::Str)?;
                    let value = self.value(block.input("VALUE"), Type::IntStr)?;
                    let param = param.as_const().and_then(|c| {
                        match c.to_display().as_str() {
                            "color" => Some(PenParam::Color),
                            "saturation" => Some(PenParam::Saturation),
                            "brightness" => Some(PenParam::Brightness),
                            "transparency" => Some(PenParam::Transparency),
                            _ => None,
                        }
                    });
                    if let Some(param) = param {
                        if block.opcode == "pen_setPenColorParamTo" {
                            res.push(Stmt::SetPenParam { param, value });
                        } else {
                            res.push(Stmt::ChangePenParam { param, value });
                        }
                    }
                }
                "pen_setPenHueToNumber" => {
                    let v = self.value(block.input("HUE"), Type::Int)?;
                    res.push(Stmt::SetPenHue(v));
                }
                "pen_changePenHueBy" => {
                    let v = self.value(block.input("HUE"), Type::Int)?;
                    res.push(Stmt::ChangePenHue(v));
                }
                // The legacy shade formula has no implementation.
                "pen_setPenShadeToNumber" | "pen_changePenShadeBy" => {}
                "pen_setPenColorToColor" => {
                    let v = self.value(block.input("COLOR"), Type::IntStr)?;
                    res.push(Stmt::SetPenColor(v));
                }

                "data_showvariable" => {
                    let var = self.names.variable(&require_field_id(&block, "VARIABLE")?);
                    res.push(Stmt::ShowVar(var));
                }
                "data_hidevariable" => {
                    let var = self.names.variable(&require_field_id(&block, "VARIABLE")?);
                    res.push(Stmt::HideVar(var));
                }
                "data_setvariableto" => {
                    let value = self.value(block.input("VALUE"), Type::Any)?;
                    let var = self.names.variable(&require_field_id(&block, "VARIABLE")?);
                    self.env.insert(var.clone(), value.ty);
                    res.push(Stmt::SetVar { var, value });
                }
                "data_changevariableby" => {
                    let delta = self.value(block.input("VALUE"), Type::Number)?;
                    let var = self.names.variable(&require_field_id(&block, "VARIABLE")?);
                    let believed = self.env.get(&var).copied();

                    if matches!(
                        believed,
                        Some(Type::Int) | Some(Type::Boolean) | Some(Type::Number)
                    ) {
                        res.push(Stmt::ChangeVar {
                            var: var.clone(),
                            delta: delta.clone(),
                        });
                    } else {
                        // The variable may hold a string; read it back
                        // through a numeric conversion first.
                        let current = Expr::new(
                            believed.unwrap_or(Type::Any),
                            ExprKind::Var(var.clone()),
                        );
                        let current = self.coerce(current, Type::Number);
                        let sum = Expr::new(
                            Type::Number,
                            ExprKind::Add(Box::new(current), Box::new(delta.clone())),
                        );
                        res.push(Stmt::SetVar {
                            var: var.clone(),
                            value: sum,
                        });
                    }

                    let int_like = |t: Option<Type>| {
                        matches!(t, Some(Type::Int) | Some(Type::Boolean))
                    };
                    if int_like(believed) && int_like(Some(delta.ty)) {
                        self.env.insert(var, Type::Int);
                    } else {
                        self.env.insert(var, Type::Number);
                    }
                }

                "data_addtolist" => {
                    let list = self.list_token(&block)?;
                    let item = self.value(block.input("ITEM"), Type::Any)?;
                    res.push(Stmt::AddToList { list, item });
                }
                "data_deleteoflist" => {
                    let list = self.list_token(&block)?;
                    let index = self.value(block.input("INDEX"), Type::IntStr)?;
                    res.push(Stmt::DeleteOfList { list, index });
                }
                "data_deletealloflist" => {
                    let list = self.list_token(&block)?;
                    res.push(Stmt::DeleteAllOfList(list));
                }
                "data_insertatlist" => {
                    let list = self.list_token(&block)?;
                    let item = self.value(block.input("ITEM"), Type::Any)?;
                    let index = self.value(block.input("INDEX"), Type::IntStr)?;
                    res.push(Stmt::InsertAtList { list, index, item });
                }
                "data_replaceitemoflist" => {
                    let list = self.list_token(&block)?;
                    let item = self.value(block.input("ITEM"), Type::Any)?;
                    let index = self.value(block.input("INDEX"), Type::IntStr)?;
                    res.push(Stmt::ReplaceItemOfList { list, index, item });
                }
                "data_showlist" => {
                    let list = self.list_token(&block)?;
                    res.push(Stmt::ShowList {
                        list,
                        name: require_field(&block, "LIST")?.to_string(),
                    });
                }
                "data_hidelist" => {
                    res.push(Stmt::HideList {
                        name: require_field(&block, "LIST")?.to_string(),
                    });
                }

                "procedures_call" => {
                    let mutation = block.mutation.clone().ok_or_else(|| {
                        CompileError::new("Procedure call missing mutation data.")
                    })?;
                    let types = proccode_arg_types(&mutation.proccode)?;
                    let mut call_args = Vec::new();
                    for (i, arg_id) in mutation.argument_ids.iter().enumerate() {
                        let want = types.get(i).copied().unwrap_or(Type::Any);
                        call_args.push(self.value(block.input(arg_id), want)?);
                    }
                    res.push(Stmt::CallProcedure {
                        proccode: mutation.proccode,
                        args: call_args,
                    });
                    // The callee can do anything to the variables.
                    self.env.clear();
                }

                other => {
                    return Err(CompileError::new(format!(
                        "Unknown block '{}'.",
                        other
                    )))
                }
            }

            next = block.next.clone();
        }

        Ok(res)
    }
}

fn require_field<'b>(block: &'b Block, name: &str) -> Result<&'b str, CompileError> {
    block.field(name).ok_or_else(|| {
        CompileError::new(format!(
            "Block '{}' missing field '{}'.",
            block.opcode, name
        ))
    })
}

fn require_field_id(block: &Block, name: &str) -> Result<String, CompileError> {
    block
        .field_id(name)
        .map(str::to_string)
        .ok_or_else(|| {
            CompileError::new(format!(
                "Block '{}' missing field '{}'.",
                block.opcode, name
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::Names;
    use crate::project::Project;
    use serde_json::json;

    fn build(blocks: serde_json::Value) -> SpriteIr {
        let project = Project::from_value(&json!({
            "targets": [{
                "name": "Stage",
                "isStage": true,
                "variables": {"vid": ["score", 0]},
                "blocks": blocks
            }]
        }))
        .unwrap();
        let settings = Settings::default();
        let mut names = Names::default();
        IrBuilder::build_sprite(&settings, &mut names, &project.targets[0]).unwrap()
    }

    fn flag(next: &str) -> serde_json::Value {
        json!({"opcode": "event_whenflagclicked", "next": next, "topLevel": true})
    }

    #[test]
    fn repeat_keeps_integer_belief() {
        let ir = build(json!({
            "hat": flag("set"),
            "set": {
                "opcode": "data_setvariableto",
                "inputs": {"VALUE": [1, [10, "1"]]},
                "fields": {"VARIABLE": ["score", "vid"]},
                "next": "rep"
            },
            "rep": {
                "opcode": "control_repeat",
                "inputs": {"TIMES": [1, [6, "3"]], "SUBSTACK": [2, "chg"]}
            },
            "chg": {
                "opcode": "data_changevariableby",
                "inputs": {"VALUE": [1, [4, "1"]]},
                "fields": {"VARIABLE": ["score", "vid"]}
            }
        }));
        let body = &ir.scripts[0].body;
        let Stmt::Repeat { body: inner, .. } = &body[1] else {
            panic!("expected repeat, got {:?}", body[1]);
        };
        assert!(matches!(inner[0], Stmt::ChangeVar { .. }));
        assert!(!ir.scripts[0].suspends);
    }

    #[test]
    fn loop_belief_is_revoked_on_disagreement() {
        let ir = build(json!({
            "hat": flag("set"),
            "set": {
                "opcode": "data_setvariableto",
                "inputs": {"VALUE": [1, [10, "1"]]},
                "fields": {"VARIABLE": ["score", "vid"]},
                "next": "rep"
            },
            "rep": {
                "opcode": "control_repeat",
                "inputs": {"TIMES": [1, [6, "3"]], "SUBSTACK": [2, "chg"]}
            },
            "chg": {
                "opcode": "data_changevariableby",
                "inputs": {"VALUE": [1, [4, "1"]]},
                "fields": {"VARIABLE": ["score", "vid"]},
                "next": "str"
            },
            "str": {
                "opcode": "data_setvariableto",
                "inputs": {"VALUE": [1, [10, "hi"]]},
                "fields": {"VARIABLE": ["score", "vid"]}
            }
        }));
        let body = &ir.scripts[0].body;
        let Stmt::Repeat { body: inner, .. } = &body[1] else {
            panic!("expected repeat, got {:?}", body[1]);
        };
        // The string assignment invalidates the integer belief, so the
        // recompiled increment reads the variable back through a
        // numeric conversion.
        let Stmt::SetVar { value, .. } = &inner[0] else {
            panic!("expected numeric rebuild, got {:?}", inner[0]);
        };
        assert!(matches!(value.kind, ExprKind::Add(..)));
    }

    #[test]
    fn zero_iteration_repeat_is_dropped() {
        for (times, kept) in [("0", false), ("0.4", false), ("0.5", true)] {
            let ir = build(json!({
                "hat": flag("rep"),
                "rep": {
                    "opcode": "control_repeat",
                    "inputs": {"TIMES": [1, [6, times]], "SUBSTACK": [2, "s"]}
                },
                "s": {"opcode": "control_incr_counter"}
            }));
            assert_eq!(ir.scripts[0].body.is_empty(), !kept, "times={}", times);
        }
    }

    #[test]
    fn branches_must_agree_for_a_belief_to_survive() {
        let ir = build(json!({
            "hat": flag("if"),
            "if": {
                "opcode": "control_if_else",
                "inputs": {
                    "CONDITION": [2, "md"],
                    "SUBSTACK": [2, "a"],
                    "SUBSTACK2": [2, "b"]
                },
                "next": "chg"
            },
            "md": {"opcode": "sensing_mousedown"},
            "a": {
                "opcode": "data_setvariableto",
                "inputs": {"VALUE": [1, [10, "word"]]},
                "fields": {"VARIABLE": ["score", "vid"]}
            },
            "b": {
                "opcode": "data_setvariableto",
                "inputs": {"VALUE": [1, [4, "5"]]},
                "fields": {"VARIABLE": ["score", "vid"]}
            },
            "chg": {
                "opcode": "data_changevariableby",
                "inputs": {"VALUE": [1, [4, "1"]]},
                "fields": {"VARIABLE": ["score", "vid"]}
            }
        }));
        let body = &ir.scripts[0].body;
        assert!(matches!(body[0], Stmt::IfElse { .. }));
        // One branch wrote a string, so the increment may not assume a
        // numeric value.
        assert!(matches!(body[1], Stmt::SetVar { .. }));
    }

    #[test]
    fn waiting_forgets_beliefs_and_marks_suspension() {
        let ir = build(json!({
            "hat": flag("set"),
            "set": {
                "opcode": "data_setvariableto",
                "inputs": {"VALUE": [1, [4, "5"]]},
                "fields": {"VARIABLE": ["score", "vid"]},
                "next": "w"
            },
            "w": {
                "opcode": "control_wait",
                "inputs": {"DURATION": [1, [4, "1"]]},
                "next": "chg"
            },
            "chg": {
                "opcode": "data_changevariableby",
                "inputs": {"VALUE": [1, [4, "1"]]},
                "fields": {"VARIABLE": ["score", "vid"]}
            }
        }));
        assert!(ir.scripts[0].suspends);
        assert!(matches!(ir.scripts[0].body[2], Stmt::SetVar { .. }));
    }

    #[test]
    fn gliding_forgets_beliefs_and_marks_suspension() {
        let project = Project::from_value(&json!({
            "targets": [
                {
                    "name": "Stage",
                    "isStage": true,
                    "variables": {"vid": ["score", 0]},
                    "blocks": {}
                },
                {
                    "name": "Cat",
                    "isStage": false,
                    "blocks": {
                        "hat": flag("set"),
                        "set": {
                            "opcode": "data_setvariableto",
                            "inputs": {"VALUE": [1, [4, "5"]]},
                            "fields": {"VARIABLE": ["score", "vid"]},
                            "next": "gl"
                        },
                        "gl": {
                            "opcode": "motion_glidesecstoxy",
                            "inputs": {
                                "SECS": [1, [4, "1"]],
                                "X": [1, [4, "0"]],
                                "Y": [1, [4, "0"]]
                            },
                            "next": "chg"
                        },
                        "chg": {
                            "opcode": "data_changevariableby",
                            "inputs": {"VALUE": [1, [4, "1"]]},
                            "fields": {"VARIABLE": ["score", "vid"]}
                        }
                    }
                }
            ]
        }))
        .unwrap();
        let settings = Settings::default();
        let mut names = Names::default();
        let ir =
            IrBuilder::build_sprite(&settings, &mut names, &project.targets[1]).unwrap();
        assert!(ir.scripts[0].suspends);
        // The glide parks the script across frames, so the increment may
        // not assume the earlier numeric assignment still holds.
        assert!(matches!(ir.scripts[0].body[2], Stmt::SetVar { .. }));
    }

    #[test]
    fn repeat_until_with_a_constant_condition_degenerates() {
        // An empty "not" operand reads as false, so the until-condition
        // is already satisfied and the loop compiles to nothing.
        let ir = build(json!({
            "hat": flag("ru"),
            "ru": {
                "opcode": "control_repeat_until",
                "inputs": {"CONDITION": [2, "not"], "SUBSTACK": [2, "s"]}
            },
            "not": {"opcode": "operator_not", "inputs": {}},
            "s": {"opcode": "control_incr_counter"}
        }));
        assert!(ir.scripts[0].body.is_empty());

        // A missing condition reads as false and never flips, so the
        // loop runs forever.
        let ir = build(json!({
            "hat": flag("ru"),
            "ru": {
                "opcode": "control_repeat_until",
                "inputs": {"SUBSTACK": [2, "s"]}
            },
            "s": {"opcode": "control_incr_counter"}
        }));
        let Stmt::Forever(inner) = &ir.scripts[0].body[0] else {
            panic!("expected forever, got {:?}", ir.scripts[0].body[0]);
        };
        assert_eq!(*inner, vec![Stmt::IncrCounter]);
    }

    #[test]
    fn warp_procedure_keeps_beliefs_across_forever() {
        let blocks = |warp: &str| {
            json!({
                "def": {
                    "opcode": "procedures_definition",
                    "inputs": {"custom_block": [1, "proto"]},
                    "next": "set",
                    "topLevel": true
                },
                "proto": {
                    "opcode": "procedures_prototype",
                    "mutation": {
                        "proccode": "go",
                        "argumentids": "[]",
                        "argumentnames": "[]",
                        "warp": warp
                    }
                },
                "set": {
                    "opcode": "data_setvariableto",
                    "inputs": {"VALUE": [1, [4, "5"]]},
                    "fields": {"VARIABLE": ["score", "vid"]},
                    "next": "fv"
                },
                "fv": {
                    "opcode": "control_forever",
                    "inputs": {"SUBSTACK": [2, "chg"]}
                },
                "chg": {
                    "opcode": "data_changevariableby",
                    "inputs": {"VALUE": [1, [4, "1"]]},
                    "fields": {"VARIABLE": ["score", "vid"]}
                }
            })
        };

        let warped = build(blocks("true"));
        let Stmt::Forever(inner) = &warped.scripts[0].body[1] else {
            panic!("expected forever");
        };
        assert!(matches!(inner[0], Stmt::ChangeVar { .. }));

        // A yielding loop clears beliefs before every iteration.
        let plain = build(blocks("false"));
        let Stmt::Forever(inner) = &plain.scripts[0].body[1] else {
            panic!("expected forever");
        };
        assert!(matches!(inner[0], Stmt::SetVar { .. }));
    }

    #[test]
    fn empty_procedures_are_commented_out() {
        let ir = build(json!({
            "def": {
                "opcode": "procedures_definition",
                "inputs": {"custom_block": [1, "proto"]},
                "next": null,
                "topLevel": true
            },
            "proto": {
                "opcode": "procedures_prototype",
                "mutation": {
                    "proccode": "noop",
                    "argumentids": "[]",
                    "argumentnames": "[]",
                    "warp": "false"
                }
            }
        }));
        assert!(ir.comment_procs.contains("noop"));
        assert!(ir.procs.contains_key("noop"));
    }

    #[test]
    fn constant_conditions_inline_a_single_branch() {
        let ir = build(json!({
            "hat": flag("if"),
            "if": {
                "opcode": "control_if_else",
                "inputs": {
                    "CONDITION": [2, "not"],
                    "SUBSTACK": [2, "a"],
                    "SUBSTACK2": [2, "b"]
                }
            },
            "not": {"opcode": "operator_not", "inputs": {}},
            "a": {"opcode": "control_incr_counter"},
            "b": {"opcode": "control_clear_counter"}
        }));
        // An empty "not" operand reads as false, so only the true
        // branch survives.
        assert_eq!(ir.scripts[0].body, vec![Stmt::IncrCounter]);
    }
}
