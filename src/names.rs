//! Compact identifier allocation for the generated JavaScript.
//!
//! Sprite member fields get single-character ids from a fixed alphabet,
//! variables and lists get `v{n}`, procedures `p{n}` and procedure
//! arguments `a{n}`. Generated ids never collide with the names of the
//! runtime support library.

use crate::error::CompileError;
use std::collections::{HashMap, HashSet};

const ID_HEAD: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ$_";
const ID_TAIL: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ$_0123456789";

/// Names the generated code may not shadow: the runtime helper ABI plus
/// the lexical names every sprite closure binds.
pub const RESERVED: &[&str] = &[
    "self", "stage", "id", "render", "engine", "init", "broadcast",
    "broadcastWait", "createClone", "deleteClone", "askWait", "answer",
    "start", "toBool", "modulo", "tan", "equals", "notEqual", "lessThan",
    "lessThanEqual", "greaterThan", "greaterThanEqual", "hideVar", "showVar",
    "hideList", "showList", "listStr", "listIdx", "listInsert", "listReplace",
    "listDelete", "randInt", "randFloat", "randNum", "sprites", "spriteDefs",
    "iterators", "gotoXY", "playFull", "penColInt", "penCol", "rgbHSV",
    "keys", "keyPressed", "mouseX", "mouseY", "mouseDown", "counter",
    "penClear", "drawPen", "flag",
];

/// Turn a counter into a short identifier over the base alphabet.
pub fn compact_id(mut id: usize) -> String {
    let head: Vec<char> = ID_HEAD.chars().collect();
    let tail: Vec<char> = ID_TAIL.chars().collect();
    let mut res = String::new();
    while id >= head.len() {
        res.insert(0, tail[id % tail.len()]);
        id /= tail.len();
    }
    res.insert(0, head[id]);
    res
}

/// Per-sprite member fields of the generated sprite object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Member {
    Broadcasts,
    FlagScripts,
    X,
    Y,
    Direction,
    Showing,
    Volume,
    PenDown,
    PenColor,
    PenAlpha,
    PenSize,
    KeyScripts,
}

const MEMBERS: [Member; 12] = [
    Member::Broadcasts,
    Member::FlagScripts,
    Member::X,
    Member::Y,
    Member::Direction,
    Member::Showing,
    Member::Volume,
    Member::PenDown,
    Member::PenColor,
    Member::PenAlpha,
    Member::PenSize,
    Member::KeyScripts,
];

#[derive(Debug)]
pub struct Names {
    reserved: HashSet<&'static str>,
    members: HashMap<Member, String>,
    global_vars: HashMap<String, String>,
    sprite_vars: HashMap<String, String>,
    var_token: usize,
    start_var_token: usize,
    proc_names: HashMap<String, String>,
    proc_token: usize,
    is_stage: bool,
}

impl Names {
    pub fn new() -> Self {
        let reserved: HashSet<&'static str> = RESERVED.iter().copied().collect();
        let mut members = HashMap::new();
        let mut counter = 0usize;
        for member in MEMBERS {
            let mut id = compact_id(counter);
            counter += 1;
            while reserved.contains(id.as_str()) {
                id = compact_id(counter);
                counter += 1;
            }
            members.insert(member, id);
        }
        Self {
            reserved,
            members,
            global_vars: HashMap::new(),
            sprite_vars: HashMap::new(),
            var_token: 0,
            start_var_token: 0,
            proc_names: HashMap::new(),
            proc_token: 0,
            is_stage: true,
        }
    }

    pub fn member(&self, member: Member) -> &str {
        &self.members[&member]
    }

    /// Reset the per-sprite tables. The stage must come first; its
    /// variables form the global namespace every later sprite consults.
    pub fn begin_sprite(&mut self, is_stage: bool) {
        if self.is_stage && !is_stage {
            // Sprite-local tokens continue after the globals so the two
            // never alias inside a sprite closure.
            self.start_var_token = self.var_token;
        }
        self.is_stage = is_stage;
        self.sprite_vars.clear();
        self.var_token = self.start_var_token;
        self.proc_names.clear();
        self.proc_token = 0;
    }

    /// Resolve a variable or list id to its generated name, allocating
    /// on first sight. Lookup is sprite-local first, then the stage.
    pub fn variable(&mut self, id: &str) -> String {
        if self.is_stage {
            if let Some(name) = self.global_vars.get(id) {
                return name.clone();
            }
            let name = format!("v{}", self.var_token);
            self.var_token += 1;
            self.global_vars.insert(id.to_string(), name.clone());
            return name;
        }
        if let Some(name) = self.sprite_vars.get(id) {
            return name.clone();
        }
        if let Some(name) = self.global_vars.get(id) {
            return name.clone();
        }
        let name = format!("v{}", self.var_token);
        self.var_token += 1;
        self.sprite_vars.insert(id.to_string(), name.clone());
        name
    }

    /// Variables of other sprites cannot be read from here.
    pub fn foreign_variable(&self, owner: &str, name: &str) -> CompileError {
        CompileError::new(format!(
            "Reading variable '{}' of sprite '{}' is not supported.",
            name, owner
        ))
    }

    pub fn procedure(&mut self, proccode: &str) -> String {
        if let Some(name) = self.proc_names.get(proccode) {
            return name.clone();
        }
        let name = format!("p{}", self.proc_token);
        self.proc_token += 1;
        self.proc_names.insert(proccode.to_string(), name.clone());
        name
    }

    pub fn procedure_name(&self, proccode: &str) -> Option<&str> {
        self.proc_names.get(proccode).map(String::as_str)
    }

    pub fn argument(index: usize) -> String {
        format!("a{}", index)
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(name)
    }
}

impl Default for Names {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_ids_walk_the_alphabet() {
        assert_eq!(compact_id(0), "a");
        assert_eq!(compact_id(1), "b");
        assert_eq!(compact_id(11), "l");
        assert_eq!(compact_id(53), "_");
        // Two-character ids start once the head alphabet runs out.
        assert_eq!(compact_id(54), "a0");
    }

    #[test]
    fn member_tokens_are_stable_and_unreserved() {
        let names = Names::new();
        assert_eq!(names.member(Member::Broadcasts), "a");
        assert_eq!(names.member(Member::FlagScripts), "b");
        assert_eq!(names.member(Member::X), "c");
        assert_eq!(names.member(Member::Y), "d");
        assert_eq!(names.member(Member::KeyScripts), "l");
        for member in MEMBERS {
            assert!(!names.is_reserved(names.member(member)));
        }
    }

    #[test]
    fn stage_variables_shared_with_sprites() {
        let mut names = Names::new();
        names.begin_sprite(true);
        let global = names.variable("score");
        assert_eq!(global, "v0");

        names.begin_sprite(false);
        let local = names.variable("hp");
        assert_eq!(local, "v1");
        // The stage variable resolves to its global token.
        assert_eq!(names.variable("score"), "v0");

        // A second sprite re-uses local numbering.
        names.begin_sprite(false);
        assert_eq!(names.variable("other"), "v1");
    }

    #[test]
    fn procedures_count_up_per_sprite() {
        let mut names = Names::new();
        names.begin_sprite(false);
        assert_eq!(names.procedure("do thing %s"), "p0");
        assert_eq!(names.procedure("other"), "p1");
        assert_eq!(names.procedure("do thing %s"), "p0");
        names.begin_sprite(false);
        assert_eq!(names.procedure("third"), "p0");
    }
}
