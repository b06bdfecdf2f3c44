//! Static validation and deterministic repair of generated scene source.
//!
//! `validate` is pure and synchronous: parse, analyse, rewrite, print. It knows
//! a fixed set of generation fault categories and applies a deterministic fix
//! for each; anything else is reported as a remaining issue and left alone.
//! Running `validate` on its own output applies no further fixes.

use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    ast::{BindKind, Block, Expr, FunctionDecl, Item, Program, Stmt, print_program},
    parser::parse,
    registry::{is_accessor_primitive, is_host_primitive},
};

/// Defaults injected by the fixable-fault rewrites. A policy table rather than
/// hard-coded numbers; the shipped defaults are tuned for 30 fps scenes.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RepairPolicy {
    /// Frames injected for a missing DURATION export.
    pub duration_frames: u64,
    /// Placeholder-identifier defaults, keyed by name suffix.
    pub placeholder_defaults: BTreeMap<String, f64>,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        let placeholder_defaults = [
            ("X", 0.0),
            ("Y", 0.0),
            ("Rotation", 0.0),
            ("Delay", 0.0),
            ("Opacity", 1.0),
            ("Scale", 1.0),
            ("Width", 120.0),
            ("Height", 120.0),
            ("Size", 48.0),
            ("Duration", 30.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            duration_frames: 150,
            placeholder_defaults,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FixKind {
    DuplicateDeclaration,
    AccessorShadowRename,
    MissingAcquisition,
    PlaceholderDefault,
    MissingDurationExport,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AppliedFix {
    pub kind: FixKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IssueKind {
    Syntax,
    Unresolved,
    MissingEntry,
    InvalidDuration,
    Compile,
    Generation,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(IssueKind::Syntax, message)
    }

    pub fn unresolved(message: impl Into<String>) -> Self {
        Self::new(IssueKind::Unresolved, message)
    }

    pub fn missing_entry(message: impl Into<String>) -> Self {
        Self::new(IssueKind::MissingEntry, message)
    }

    pub fn invalid_duration(message: impl Into<String>) -> Self {
        Self::new(IssueKind::InvalidDuration, message)
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(IssueKind::Compile, message)
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::new(IssueKind::Generation, message)
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ValidationResult {
    pub fixes_applied: Vec<AppliedFix>,
    pub remaining_issues: Vec<Issue>,
    pub valid: bool,
    /// Source after rewrites, printed canonically. Equal in meaning to the
    /// input when no fix applied.
    pub source: String,
}

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][A-Za-z0-9]*(X|Y|Width|Height|Size|Opacity|Scale|Rotation|Delay|Duration)$")
        .expect("placeholder pattern compiles")
});

/// Suffix of a placeholder-style identifier, if the name matches the pattern.
fn placeholder_suffix(name: &str) -> Option<&str> {
    PLACEHOLDER_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn validate(source: &str, policy: &RepairPolicy) -> ValidationResult {
    let mut program = match parse(source) {
        Ok(p) => p,
        Err(e) => {
            return ValidationResult {
                fixes_applied: Vec::new(),
                remaining_issues: vec![Issue::syntax(e.to_string())],
                valid: false,
                source: source.to_string(),
            };
        }
    };

    let mut fixes = Vec::new();
    let mut issues = Vec::new();

    dedup_declarations(&mut program, &mut fixes);
    rename_shadowed_accessors(&mut program, &mut fixes);
    resolve_references(&mut program, policy, &mut fixes, &mut issues);
    check_duration(&mut program, policy, &mut fixes, &mut issues);
    check_entry(&program, &mut issues);

    let valid = issues.is_empty();
    ValidationResult {
        fixes_applied: fixes,
        remaining_issues: issues,
        valid,
        source: print_program(&program),
    }
}

// --- fault category 1: duplicate top-level declarations ---

fn dedup_declarations(program: &mut Program, fixes: &mut Vec<AppliedFix>) {
    let mut seen_names: HashSet<String> = HashSet::new();
    let mut seen_default = false;
    let mut kept = Vec::with_capacity(program.items.len());
    for item in program.items.drain(..) {
        match &item {
            Item::ExportDefault { name } => {
                if seen_default {
                    fixes.push(AppliedFix {
                        kind: FixKind::DuplicateDeclaration,
                        detail: format!("dropped duplicate export default '{name}'"),
                    });
                    continue;
                }
                seen_default = true;
            }
            _ => {
                if let Some(name) = item.declared_name() {
                    if !seen_names.insert(name.to_string()) {
                        fixes.push(AppliedFix {
                            kind: FixKind::DuplicateDeclaration,
                            detail: format!("dropped duplicate declaration of '{name}'"),
                        });
                        continue;
                    }
                }
            }
        }
        kept.push(item);
    }
    program.items = kept;
}

// --- fault category 5: declarations shadowing host accessors ---

fn rename_shadowed_accessors(program: &mut Program, fixes: &mut Vec<AppliedFix>) {
    let mut shadowed: Vec<String> = Vec::new();
    let record = |name: &str, shadowed: &mut Vec<String>| {
        if is_accessor_primitive(name) && !shadowed.iter().any(|n| n == name) {
            shadowed.push(name.to_string());
        }
    };

    for item in &program.items {
        if let Some(name) = item.declared_name() {
            record(name, &mut shadowed);
        }
        if let Item::Function(f) = item {
            for p in &f.params {
                record(p, &mut shadowed);
            }
            collect_let_names(&f.body, &mut |name| record(name, &mut shadowed));
        }
    }

    if shadowed.is_empty() {
        return;
    }

    let used = collect_all_idents(program);
    let mut rename_map: HashMap<String, String> = HashMap::new();
    for name in &shadowed {
        let target = fresh_name(name, &used, &rename_map);
        rename_map.insert(name.clone(), target);
    }

    apply_rename(program, &rename_map);

    for name in shadowed {
        let target = &rename_map[&name];
        fixes.push(AppliedFix {
            kind: FixKind::AccessorShadowRename,
            detail: format!("renamed '{name}' to '{target}' (shadows a host accessor)"),
        });
    }
}

fn fresh_name(name: &str, used: &HashSet<String>, taken: &HashMap<String, String>) -> String {
    let mut upper = name.to_string();
    if let Some(first) = upper.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    let base = format!("scene{upper}");
    let mut candidate = base.clone();
    let mut n = 2;
    while used.contains(&candidate) || taken.values().any(|v| v == &candidate) {
        candidate = format!("{base}{n}");
        n += 1;
    }
    candidate
}

fn collect_let_names(block: &Block, f: &mut impl FnMut(&str)) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Let { name, .. } => f(name),
            Stmt::If {
                then_block,
                else_block,
                ..
            } => {
                collect_let_names(then_block, f);
                if let Some(b) = else_block {
                    collect_let_names(b, f);
                }
            }
            _ => {}
        }
    }
}

fn collect_all_idents(program: &Program) -> HashSet<String> {
    let mut out = HashSet::new();
    for item in &program.items {
        if let Some(name) = item.declared_name() {
            out.insert(name.to_string());
        }
        match item {
            Item::Binding { value, .. } => collect_expr_idents(value, &mut out),
            Item::Function(f) => {
                out.extend(f.params.iter().cloned());
                collect_block_idents(&f.body, &mut out);
            }
            _ => {}
        }
    }
    out
}

fn collect_block_idents(block: &Block, out: &mut HashSet<String>) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Let { name, value } => {
                out.insert(name.clone());
                collect_expr_idents(value, out);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                collect_expr_idents(cond, out);
                collect_block_idents(then_block, out);
                if let Some(b) = else_block {
                    collect_block_idents(b, out);
                }
            }
            Stmt::Return(Some(e)) | Stmt::Expr(e) => collect_expr_idents(e, out),
            Stmt::Return(None) => {}
        }
    }
}

fn collect_expr_idents(expr: &Expr, out: &mut HashSet<String>) {
    walk_expr(expr, &mut |e| {
        if let Expr::Ident(name) = e {
            out.insert(name.clone());
        }
    });
}

fn walk_expr(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    f(expr);
    match expr {
        Expr::Array(items) => {
            for e in items {
                walk_expr(e, f);
            }
        }
        Expr::Object(fields) => {
            for (_, e) in fields {
                walk_expr(e, f);
            }
        }
        Expr::Unary { expr, .. } => walk_expr(expr, f),
        Expr::Binary { lhs, rhs, .. } => {
            walk_expr(lhs, f);
            walk_expr(rhs, f);
        }
        Expr::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            walk_expr(cond, f);
            walk_expr(then_expr, f);
            walk_expr(else_expr, f);
        }
        Expr::Call { callee, args } => {
            walk_expr(callee, f);
            for a in args {
                walk_expr(a, f);
            }
        }
        Expr::Member { object, .. } => walk_expr(object, f),
        Expr::Index { object, index } => {
            walk_expr(object, f);
            walk_expr(index, f);
        }
        Expr::Null | Expr::Bool(_) | Expr::Num(_) | Expr::Str(_) | Expr::Ident(_) => {}
    }
}

/// Scope-aware rename: a reference is rewritten only when it resolves to a
/// declared binding carrying the old name; bare references to the host
/// primitive itself stay untouched.
fn apply_rename(program: &mut Program, map: &HashMap<String, String>) {
    let globals: HashSet<String> = program
        .items
        .iter()
        .filter_map(|i| i.declared_name().map(str::to_string))
        .collect();

    let mut items = std::mem::take(&mut program.items);
    for item in &mut items {
        match item {
            Item::Binding { name, value, .. } => {
                rename_expr(value, map, &globals, &[]);
                if let Some(new) = map.get(name) {
                    *name = new.clone();
                }
            }
            Item::Function(f) => {
                let mut local: Vec<String> = Vec::new();
                for p in &f.params {
                    local.push(p.clone());
                }
                rename_block(&mut f.body, map, &globals, &mut local);
                for p in &mut f.params {
                    if let Some(new) = map.get(p) {
                        *p = new.clone();
                    }
                }
            }
            Item::ExportDefault { name } => {
                if let Some(new) = map.get(name) {
                    *name = new.clone();
                }
            }
            Item::Use { .. } => {}
        }
    }
    program.items = items;
}

fn rename_block(
    block: &mut Block,
    map: &HashMap<String, String>,
    globals: &HashSet<String>,
    local: &mut Vec<String>,
) {
    for stmt in &mut block.stmts {
        match stmt {
            Stmt::Let { name, value } => {
                rename_expr(value, map, globals, local);
                local.push(name.clone());
                if let Some(new) = map.get(name) {
                    *name = new.clone();
                }
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                rename_expr(cond, map, globals, local);
                rename_block(then_block, map, globals, local);
                if let Some(b) = else_block {
                    rename_block(b, map, globals, local);
                }
            }
            Stmt::Return(Some(e)) | Stmt::Expr(e) => rename_expr(e, map, globals, local),
            Stmt::Return(None) => {}
        }
    }
}

fn rename_expr(
    expr: &mut Expr,
    map: &HashMap<String, String>,
    globals: &HashSet<String>,
    local: &[String],
) {
    match expr {
        Expr::Ident(name) => {
            let declared = local.iter().any(|n| n == name) || globals.contains(name);
            if declared {
                if let Some(new) = map.get(name) {
                    *name = new.clone();
                }
            }
        }
        Expr::Array(items) => {
            for e in items {
                rename_expr(e, map, globals, local);
            }
        }
        Expr::Object(fields) => {
            for (_, e) in fields {
                rename_expr(e, map, globals, local);
            }
        }
        Expr::Unary { expr, .. } => rename_expr(expr, map, globals, local),
        Expr::Binary { lhs, rhs, .. } => {
            rename_expr(lhs, map, globals, local);
            rename_expr(rhs, map, globals, local);
        }
        Expr::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            rename_expr(cond, map, globals, local);
            rename_expr(then_expr, map, globals, local);
            rename_expr(else_expr, map, globals, local);
        }
        Expr::Call { callee, args } => {
            rename_expr(callee, map, globals, local);
            for a in args {
                rename_expr(a, map, globals, local);
            }
        }
        Expr::Member { object, .. } => rename_expr(object, map, globals, local),
        Expr::Index { object, index } => {
            rename_expr(object, map, globals, local);
            rename_expr(index, map, globals, local);
        }
        Expr::Null | Expr::Bool(_) | Expr::Num(_) | Expr::Str(_) => {}
    }
}

// --- fault categories 2 and 3: missing acquisitions, placeholder identifiers ---

fn resolve_references(
    program: &mut Program,
    policy: &RepairPolicy,
    fixes: &mut Vec<AppliedFix>,
    issues: &mut Vec<Issue>,
) {
    let globals: HashSet<String> = program
        .items
        .iter()
        .filter_map(|i| i.declared_name().map(str::to_string))
        .collect();
    let acquired: HashSet<String> = program
        .items
        .iter()
        .filter_map(|i| match i {
            Item::Use { names } => Some(names.iter().cloned()),
            _ => None,
        })
        .flatten()
        .collect();

    for name in &acquired {
        if !is_host_primitive(name) {
            issues.push(Issue::unresolved(format!(
                "use declaration names unknown primitive '{name}'"
            )));
        }
    }

    // unresolved references in first-occurrence order
    let mut unresolved: Vec<String> = Vec::new();
    {
        let mut push = |name: &str, local: &[String]| {
            if globals.contains(name)
                || acquired.contains(name)
                || local.iter().any(|n| n == name)
                || unresolved.iter().any(|n| n == name)
            {
                return;
            }
            unresolved.push(name.to_string());
        };
        for item in &program.items {
            match item {
                Item::Binding { value, .. } => visit_refs(value, &mut Vec::new(), &mut push),
                Item::Function(f) => {
                    let mut local: Vec<String> = f.params.clone();
                    visit_block_refs(&f.body, &mut local, &mut push);
                }
                _ => {}
            }
        }
    }

    let mut inject_use: Vec<String> = Vec::new();
    let mut inject_lets: Vec<(String, f64)> = Vec::new();
    for name in unresolved {
        if is_host_primitive(&name) {
            fixes.push(AppliedFix {
                kind: FixKind::MissingAcquisition,
                detail: format!("acquired host primitive '{name}'"),
            });
            inject_use.push(name);
        } else if let Some(suffix) = placeholder_suffix(&name) {
            if let Some(default) = policy.placeholder_defaults.get(suffix) {
                fixes.push(AppliedFix {
                    kind: FixKind::PlaceholderDefault,
                    detail: format!("bound placeholder '{name}' to {default}"),
                });
                inject_lets.push((name, *default));
            } else {
                issues.push(Issue::unresolved(format!(
                    "undeclared identifier '{name}'"
                )));
            }
        } else {
            issues.push(Issue::unresolved(format!(
                "undeclared identifier '{name}'"
            )));
        }
    }

    if !inject_use.is_empty() {
        match program.items.iter_mut().find_map(|i| match i {
            Item::Use { names } => Some(names),
            _ => None,
        }) {
            Some(names) => names.extend(inject_use),
            None => program.items.insert(
                0,
                Item::Use { names: inject_use },
            ),
        }
    }

    if !inject_lets.is_empty() {
        let at = program
            .items
            .iter()
            .position(|i| !matches!(i, Item::Use { .. }))
            .unwrap_or(program.items.len());
        for (offset, (name, default)) in inject_lets.into_iter().enumerate() {
            program.items.insert(
                at + offset,
                Item::Binding {
                    exported: false,
                    kind: BindKind::Let,
                    name,
                    value: Expr::Num(default),
                },
            );
        }
    }
}

fn visit_block_refs(block: &Block, local: &mut Vec<String>, push: &mut impl FnMut(&str, &[String])) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Let { name, value } => {
                visit_refs(value, local, push);
                local.push(name.clone());
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                visit_refs(cond, local, push);
                visit_block_refs(then_block, local, push);
                if let Some(b) = else_block {
                    visit_block_refs(b, local, push);
                }
            }
            Stmt::Return(Some(e)) | Stmt::Expr(e) => visit_refs(e, local, push),
            Stmt::Return(None) => {}
        }
    }
}

fn visit_refs(expr: &Expr, local: &mut Vec<String>, push: &mut impl FnMut(&str, &[String])) {
    match expr {
        Expr::Ident(name) => push(name, local),
        Expr::Array(items) => {
            for e in items {
                visit_refs(e, local, push);
            }
        }
        Expr::Object(fields) => {
            for (_, e) in fields {
                visit_refs(e, local, push);
            }
        }
        Expr::Unary { expr, .. } => visit_refs(expr, local, push),
        Expr::Binary { lhs, rhs, .. } => {
            visit_refs(lhs, local, push);
            visit_refs(rhs, local, push);
        }
        Expr::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            visit_refs(cond, local, push);
            visit_refs(then_expr, local, push);
            visit_refs(else_expr, local, push);
        }
        Expr::Call { callee, args } => {
            visit_refs(callee, local, push);
            for a in args {
                visit_refs(a, local, push);
            }
        }
        Expr::Member { object, .. } => visit_refs(object, local, push),
        Expr::Index { object, index } => {
            visit_refs(object, local, push);
            visit_refs(index, local, push);
        }
        Expr::Null | Expr::Bool(_) | Expr::Num(_) | Expr::Str(_) => {}
    }
}

// --- fault category 4: missing DURATION export ---

fn check_duration(
    program: &mut Program,
    policy: &RepairPolicy,
    fixes: &mut Vec<AppliedFix>,
    issues: &mut Vec<Issue>,
) {
    let existing = program.items.iter_mut().find_map(|i| match i {
        Item::Binding {
            exported,
            name,
            value,
            ..
        } if name == "DURATION" => Some((exported, value)),
        _ => None,
    });

    match existing {
        Some((exported, value)) => {
            match value {
                Expr::Num(v) if *v >= 1.0 && v.fract() == 0.0 => {}
                Expr::Num(v) => {
                    issues.push(Issue::invalid_duration(format!(
                        "DURATION must be a positive whole number of frames, got {v}"
                    )));
                    return;
                }
                _ => {
                    issues.push(Issue::invalid_duration(
                        "DURATION must be a numeric literal",
                    ));
                    return;
                }
            }
            if !*exported {
                *exported = true;
                fixes.push(AppliedFix {
                    kind: FixKind::MissingDurationExport,
                    detail: "exported the existing DURATION binding".to_string(),
                });
            }
        }
        None => {
            let at = program
                .items
                .iter()
                .position(|i| !matches!(i, Item::Use { .. }))
                .unwrap_or(program.items.len());
            program.items.insert(
                at,
                Item::Binding {
                    exported: true,
                    kind: BindKind::Const,
                    name: "DURATION".to_string(),
                    value: Expr::Num(policy.duration_frames as f64),
                },
            );
            fixes.push(AppliedFix {
                kind: FixKind::MissingDurationExport,
                detail: format!(
                    "injected 'export const DURATION = {}'",
                    policy.duration_frames
                ),
            });
        }
    }
}

// --- entry point ---

fn check_entry(program: &Program, issues: &mut Vec<Issue>) {
    let Some(entry) = program.items.iter().find_map(|i| match i {
        Item::ExportDefault { name } => Some(name.as_str()),
        _ => None,
    }) else {
        issues.push(Issue::missing_entry(
            "scene has no 'export default <function>' entry point",
        ));
        return;
    };

    let is_function = program
        .items
        .iter()
        .any(|i| matches!(i, Item::Function(FunctionDecl { name, .. }) if name == entry));
    if !is_function {
        issues.push(Issue::missing_entry(format!(
            "export default references '{entry}', which is not a declared function"
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RepairPolicy {
        RepairPolicy::default()
    }

    const MINIMAL: &str = r##"
use container, image, frame, interpolate;
export const DURATION = 90;
function scene() {
  return container({ fill: "#000" }, [
    image("a.png", { x: interpolate(frame(), [0, 30], [0, 100]), width: 10, height: 10 }),
  ]);
}
export default scene;
"##;

    #[test]
    fn clean_source_passes_with_no_fixes() {
        let result = validate(MINIMAL, &policy());
        assert!(result.valid, "{:?}", result.remaining_issues);
        assert!(result.fixes_applied.is_empty());
    }

    #[test]
    fn duplicate_functions_dedup_to_first() {
        let src = "function foo() {} function foo() {} export const DURATION = 10; \
                   function scene() { return group([]); } export default scene; use group;";
        let result = validate(src, &policy());
        assert!(result.valid, "{:?}", result.remaining_issues);
        assert!(
            result
                .fixes_applied
                .iter()
                .any(|f| f.kind == FixKind::DuplicateDeclaration)
        );
        assert_eq!(result.source.matches("function foo").count(), 1);
    }

    #[test]
    fn missing_acquisition_is_injected() {
        let src = "export const DURATION = 10; function scene() { return container({}, []); } \
                   export default scene;";
        let result = validate(src, &policy());
        assert!(result.valid, "{:?}", result.remaining_issues);
        assert!(
            result
                .fixes_applied
                .iter()
                .any(|f| f.kind == FixKind::MissingAcquisition)
        );
        assert!(result.source.contains("use container;"));
    }

    #[test]
    fn placeholder_identifier_gets_policy_default() {
        let src = "use image; export const DURATION = 10; \
                   function scene() { return image(\"a.png\", { x: cardX, width: 10, height: 10 }); } \
                   export default scene;";
        let result = validate(src, &policy());
        assert!(result.valid, "{:?}", result.remaining_issues);
        assert!(
            result
                .fixes_applied
                .iter()
                .any(|f| f.kind == FixKind::PlaceholderDefault)
        );
        assert!(result.source.contains("let cardX = 0;"));
    }

    #[test]
    fn placeholder_suffix_picks_the_right_default() {
        let src = "use image; export const DURATION = 10; \
                   function scene() { return image(\"a.png\", { opacity: logoOpacity, width: badgeSize, height: 10 }); } \
                   export default scene;";
        let result = validate(src, &policy());
        assert!(result.valid, "{:?}", result.remaining_issues);
        assert!(result.source.contains("let logoOpacity = 1;"));
        assert!(result.source.contains("let badgeSize = 48;"));
    }

    #[test]
    fn missing_duration_is_injected() {
        let src = "use group; function scene() { return group([]); } export default scene;";
        let result = validate(src, &policy());
        assert!(result.valid, "{:?}", result.remaining_issues);
        assert!(result.source.contains("export const DURATION = 150;"));
    }

    #[test]
    fn unexported_duration_is_exported() {
        let src = "use group; const DURATION = 60; function scene() { return group([]); } \
                   export default scene;";
        let result = validate(src, &policy());
        assert!(result.valid, "{:?}", result.remaining_issues);
        assert!(result.source.contains("export const DURATION = 60;"));
        assert!(
            result
                .fixes_applied
                .iter()
                .any(|f| f.kind == FixKind::MissingDurationExport)
        );
    }

    #[test]
    fn shadowed_accessor_is_renamed_consistently() {
        let src = "use group, image; export const DURATION = 10; \
                   function scene() { let frame = 3; return image(\"a.png\", { x: frame, width: 10, height: 10 }); } \
                   export default scene;";
        let result = validate(src, &policy());
        assert!(result.valid, "{:?}", result.remaining_issues);
        assert!(
            result
                .fixes_applied
                .iter()
                .any(|f| f.kind == FixKind::AccessorShadowRename)
        );
        assert!(result.source.contains("let sceneFrame = 3;"));
        assert!(result.source.contains("x: sceneFrame"));
        assert!(!result.source.contains("let frame ="));
    }

    #[test]
    fn rename_leaves_host_references_alone() {
        // `frame` shadowed in one function; a second function still calls the host accessor
        let src = "use frame, image; export const DURATION = 10; \
                   function a() { let frame = 1; return frame; } \
                   function scene() { return image(\"x.png\", { x: frame(), width: 1, height: 1 }); } \
                   export default scene;";
        let result = validate(src, &policy());
        assert!(result.valid, "{:?}", result.remaining_issues);
        assert!(result.source.contains("x: frame()"));
        assert!(result.source.contains("let sceneFrame = 1;"));
    }

    #[test]
    fn syntax_error_is_surfaced_not_fixed() {
        let result = validate("function scene( {", &policy());
        assert!(!result.valid);
        assert!(result.fixes_applied.is_empty());
        assert_eq!(result.remaining_issues[0].kind, IssueKind::Syntax);
    }

    #[test]
    fn unknown_identifier_is_an_issue() {
        let src = "use group; export const DURATION = 10; \
                   function scene() { return group([somethingElse]); } export default scene;";
        let result = validate(src, &policy());
        assert!(!result.valid);
        assert!(
            result
                .remaining_issues
                .iter()
                .any(|i| i.kind == IssueKind::Unresolved)
        );
    }

    #[test]
    fn missing_entry_is_an_issue() {
        let src = "use group; export const DURATION = 10; function scene() { return group([]); }";
        let result = validate(src, &policy());
        assert!(!result.valid);
        assert!(
            result
                .remaining_issues
                .iter()
                .any(|i| i.kind == IssueKind::MissingEntry)
        );
    }

    #[test]
    fn every_fix_category_is_idempotent() {
        let faulty = [
            "function foo() {} function foo() {} use group; export const DURATION = 10; \
             function scene() { return group([]); } export default scene;",
            "export const DURATION = 10; function scene() { return container({}, []); } \
             export default scene;",
            "use image; export const DURATION = 10; \
             function scene() { return image(\"a.png\", { x: cardX, width: 1, height: 1 }); } \
             export default scene;",
            "use group; function scene() { return group([]); } export default scene;",
            "use group, image; export const DURATION = 10; \
             function scene() { let frame = 3; return image(\"a.png\", { x: frame, width: 1, height: 1 }); } \
             export default scene;",
        ];
        for src in faulty {
            let first = validate(src, &policy());
            assert!(first.valid, "{src}: {:?}", first.remaining_issues);
            assert!(!first.fixes_applied.is_empty(), "{src}");
            let second = validate(&first.source, &policy());
            assert!(second.valid);
            assert!(
                second.fixes_applied.is_empty(),
                "{src} second pass applied {:?}",
                second.fixes_applied
            );
            assert_eq!(first.source, second.source);
        }
    }

    #[test]
    fn policy_table_is_pluggable() {
        let mut custom = RepairPolicy::default();
        custom.duration_frames = 42;
        custom
            .placeholder_defaults
            .insert("X".to_string(), 7.0);
        let src = "use image; function scene() { return image(\"a.png\", { x: cardX, width: 1, height: 1 }); } \
                   export default scene;";
        let result = validate(src, &custom);
        assert!(result.valid, "{:?}", result.remaining_issues);
        assert!(result.source.contains("export const DURATION = 42;"));
        assert!(result.source.contains("let cardX = 7;"));
    }
}
