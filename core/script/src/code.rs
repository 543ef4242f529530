//! Compiled code blocks and loaded modules.
//!
//! A [`CodeBlock`] is produced for the module body and for every `def` and
//! `lambda`. Its instrumentable lines are the lines of the statements it executes
//! itself: a `def` header line belongs to the enclosing block, the body lines to the
//! new block, and a lambda line to both the enclosing block (the assignment) and the
//! lambda (its body).

use crate::syntax::{Expr, FunctionDef, Program, Stmt, StmtKind};
use rustc_hash::FxHashMap;
use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};
use waypoint_engine::{Bindings, Namespace, Routine, RoutineId, RoutineRef, Value};

/// What produced a code block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// The top level of a module.
    Module,
    /// A `def`.
    Function,
    /// A `lambda`.
    Lambda,
}

/// Executable part of a code block.
#[derive(Debug, Clone)]
pub(crate) enum Body {
    Block(Vec<Stmt>),
    Lambda(Expr),
}

/// A compiled routine.
pub struct CodeBlock {
    id: RoutineId,
    name: String,
    kind: BlockKind,
    params: Vec<String>,
    first_line: u32,
    defined_at: u32,
    source: Arc<[String]>,
    lines: Vec<u32>,
    body: Body,
    nested: Vec<Arc<CodeBlock>>,
}

impl CodeBlock {
    /// Routine name; `<module>` and `<lambda>` for the anonymous kinds.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What produced the block.
    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Declared parameters.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Line of the statement that defines the block: the `def` header or the
    /// lambda assignment. `1` for modules.
    #[must_use]
    pub const fn defined_at(&self) -> u32 {
        self.defined_at
    }

    /// Blocks defined directly inside this one.
    #[must_use]
    pub fn children(&self) -> &[Arc<CodeBlock>] {
        &self.nested
    }

    /// The block defined by the statement on `line`.
    #[must_use]
    pub fn child_at(&self, line: u32) -> Option<&Arc<CodeBlock>> {
        self.nested.iter().find(|child| child.defined_at == line)
    }

    pub(crate) const fn body(&self) -> &Body {
        &self.body
    }

    fn module(name: &str, source: Arc<[String]>, program: &Program) -> Self {
        let (lines, nested) = scan(&program.body, &source);
        Self {
            id: RoutineId::fresh(),
            name: name.to_owned(),
            kind: BlockKind::Module,
            params: Vec::new(),
            first_line: 1,
            defined_at: 1,
            source,
            lines,
            body: Body::Block(program.body.clone()),
            nested,
        }
    }

    fn function(def: &FunctionDef, all: &[String]) -> Self {
        let (lines, nested) = scan(&def.body, all);
        Self {
            id: RoutineId::fresh(),
            name: def.name.clone(),
            kind: BlockKind::Function,
            params: def.params.clone(),
            first_line: def.first_line,
            defined_at: def.header_line,
            source: slice(all, def.first_line, def.last_line),
            lines,
            body: Body::Block(def.body.clone()),
            nested,
        }
    }

    fn lambda(line: u32, params: &[String], body: &Expr, all: &[String]) -> Self {
        Self {
            id: RoutineId::fresh(),
            name: "<lambda>".to_owned(),
            kind: BlockKind::Lambda,
            params: params.to_vec(),
            first_line: line,
            defined_at: line,
            source: slice(all, line, line),
            lines: vec![line],
            body: Body::Lambda(body.clone()),
            nested: Vec::new(),
        }
    }
}

/// Statement lines executed directly by `body`, and the blocks it defines.
fn scan(body: &[Stmt], all: &[String]) -> (Vec<u32>, Vec<Arc<CodeBlock>>) {
    let mut lines: Vec<u32> = body.iter().map(|stmt| stmt.line).collect();
    lines.sort_unstable();
    lines.dedup();

    let nested = body
        .iter()
        .filter_map(|stmt| match &stmt.kind {
            StmtKind::Def(def) => Some(Arc::new(CodeBlock::function(def, all))),
            StmtKind::Lambda { params, body, .. } => {
                Some(Arc::new(CodeBlock::lambda(stmt.line, params, body, all)))
            }
            _ => None,
        })
        .collect();
    (lines, nested)
}

fn slice(all: &[String], first: u32, last: u32) -> Arc<[String]> {
    let start = first.saturating_sub(1) as usize;
    let end = last as usize;
    all.get(start..end).map(Arc::from).unwrap_or_default()
}

impl Routine for CodeBlock {
    fn id(&self) -> RoutineId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn first_line(&self) -> u32 {
        self.first_line
    }

    fn source_lines(&self) -> Option<Arc<[String]>> {
        Some(Arc::clone(&self.source))
    }

    fn lines(&self) -> &[u32] {
        &self.lines
    }

    fn nested(&self) -> Vec<RoutineRef> {
        self.nested
            .iter()
            .map(|child| Arc::clone(child) as RoutineRef)
            .collect()
    }
}

impl fmt::Debug for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeBlock")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("first_line", &self.first_line)
            .field("lines", &self.lines)
            .field("nested", &self.nested.len())
            .finish_non_exhaustive()
    }
}

/// A loaded script: its top-level code, globals and defined routines.
pub struct Module {
    name: String,
    code: Arc<CodeBlock>,
    globals: RwLock<Bindings>,
    functions: RwLock<FxHashMap<String, Arc<CodeBlock>>>,
}

impl Module {
    pub(crate) fn compile(name: &str, source: &str, program: &Program) -> Self {
        let lines: Arc<[String]> = source.lines().map(str::to_owned).collect();
        Self {
            name: name.to_owned(),
            code: Arc::new(CodeBlock::module(name, lines, program)),
            globals: RwLock::default(),
            functions: RwLock::default(),
        }
    }

    /// The module's top-level code block.
    #[must_use]
    pub const fn code(&self) -> &Arc<CodeBlock> {
        &self.code
    }

    /// The routine bound to `name` at the top level.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<Arc<CodeBlock>> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// [`Module::function`] as a routine handle for anchoring triggers.
    #[must_use]
    pub fn routine(&self, name: &str) -> Option<RoutineRef> {
        self.function(name).map(|code| code as RoutineRef)
    }

    /// A global binding.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of all global bindings.
    #[must_use]
    pub fn global_names(&self) -> Vec<String> {
        self.globals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn set_global(&self, name: &str, value: Value) {
        self.globals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), value);
    }

    pub(crate) fn set_function(&self, name: &str, code: Arc<CodeBlock>) {
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), code);
    }
}

impl Namespace for Module {
    fn name(&self) -> &str {
        &self.name
    }

    fn first_line(&self) -> u32 {
        1
    }

    fn source_lines(&self) -> Option<Arc<[String]>> {
        Some(Arc::clone(&self.code.source))
    }

    fn members(&self) -> Vec<RoutineRef> {
        self.code
            .nested
            .iter()
            .filter(|child| child.kind == BlockKind::Function)
            .map(|child| Arc::clone(child) as RoutineRef)
            .collect()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}
