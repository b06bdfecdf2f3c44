//! Dual-target compilation of validated scene source.
//!
//! The module pass keeps host primitives as named external references so every
//! scene in a session shares one runtime instance of the heavy primitives.
//! The sandbox pass flattens the same parse into a self-contained script: no
//! module syntax, icon assets inlined, one callable factory. Both passes are
//! deterministic over the same input, which is what makes the structural
//! parity property testable.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::{
    artifact::{CompiledArtifact, ModuleArtifact, SandboxScript},
    assets,
    ast::{Expr, Item, Program},
    error::{VignetteError, VignetteResult},
    parser::parse,
    registry::DependencyRegistry,
};

/// Version of the module artifact format; part of the loader cache key.
pub const MODULE_FORMAT_VERSION: u32 = 1;

#[tracing::instrument(skip(validated, registry), fields(artifact = %source_artifact_id))]
pub fn compile(
    source_artifact_id: Uuid,
    validated: &str,
    registry: &DependencyRegistry,
) -> VignetteResult<CompiledArtifact> {
    let program = parse(validated).map_err(|e| VignetteError::compile(e.to_string()))?;

    let entry = entry_point(&program)?;
    let duration_frames = duration_frames(&program)?;
    let externals = collect_externals(&program, registry)?;

    let module = ModuleArtifact {
        program: program.clone(),
        entry: entry.clone(),
        externals: externals.iter().cloned().collect(),
        version: MODULE_FORMAT_VERSION,
    };

    let sandbox = SandboxScript {
        text: flatten_for_sandbox(&program),
        entry,
        duration_frames,
    };

    let manifest = registry.manifest_for(externals.iter().map(String::as_str));

    tracing::debug!(
        externals = module.externals.len(),
        duration_frames,
        "compiled scene artifact"
    );

    Ok(CompiledArtifact {
        id: Uuid::new_v4(),
        source_artifact_id,
        module,
        sandbox,
        manifest,
        compiled_at: chrono::Utc::now(),
    })
}

fn entry_point(program: &Program) -> VignetteResult<String> {
    let Some(entry) = program.items.iter().find_map(|i| match i {
        Item::ExportDefault { name } => Some(name.clone()),
        _ => None,
    }) else {
        return Err(VignetteError::compile("scene has no default export"));
    };
    let declared = program
        .items
        .iter()
        .any(|i| matches!(i, Item::Function(f) if f.name == entry));
    if !declared {
        return Err(VignetteError::compile(format!(
            "default export '{entry}' is not a declared function"
        )));
    }
    Ok(entry)
}

fn duration_frames(program: &Program) -> VignetteResult<u64> {
    let value = program.items.iter().find_map(|i| match i {
        Item::Binding {
            exported: true,
            name,
            value,
            ..
        } if name == "DURATION" => Some(value),
        _ => None,
    });
    match value {
        Some(Expr::Num(v)) if *v >= 1.0 && v.fract() == 0.0 => Ok(*v as u64),
        Some(_) => Err(VignetteError::compile(
            "DURATION export must be a positive whole number of frames",
        )),
        None => Err(VignetteError::compile("scene has no DURATION export")),
    }
}

fn collect_externals(
    program: &Program,
    registry: &DependencyRegistry,
) -> VignetteResult<BTreeSet<String>> {
    let mut externals = BTreeSet::new();
    for item in &program.items {
        if let Item::Use { names } = item {
            for name in names {
                if registry.resolve(name).is_none() {
                    return Err(VignetteError::compile(format!(
                        "unknown host primitive '{name}'"
                    )));
                }
                externals.insert(name.clone());
            }
        }
    }
    Ok(externals)
}

/// Sandbox flattening: strip `use` and `export` syntax, inline icon references,
/// keep everything else byte-deterministic via the canonical printer.
fn flatten_for_sandbox(program: &Program) -> String {
    let mut flat = program.clone();
    flat.items
        .retain(|i| !matches!(i, Item::Use { .. } | Item::ExportDefault { .. }));
    for item in &mut flat.items {
        match item {
            Item::Binding {
                exported, value, ..
            } => {
                *exported = false;
                inline_icons(value);
            }
            Item::Function(f) => {
                for stmt in &mut f.body.stmts {
                    inline_icons_stmt(stmt);
                }
            }
            _ => {}
        }
    }
    crate::ast::print_program(&flat)
}

fn inline_icons_stmt(stmt: &mut crate::ast::Stmt) {
    use crate::ast::Stmt;
    match stmt {
        Stmt::Let { value, .. } => inline_icons(value),
        Stmt::If {
            cond,
            then_block,
            else_block,
        } => {
            inline_icons(cond);
            for s in &mut then_block.stmts {
                inline_icons_stmt(s);
            }
            if let Some(b) = else_block {
                for s in &mut b.stmts {
                    inline_icons_stmt(s);
                }
            }
        }
        Stmt::Return(Some(e)) | Stmt::Expr(e) => inline_icons(e),
        Stmt::Return(None) => {}
    }
}

fn inline_icons(expr: &mut Expr) {
    if let Expr::Str(s) = expr {
        if let Some(name) = assets::icon_ref(s) {
            if let Some(inlined) = assets::inline_icon(name) {
                *s = inlined;
            }
        }
        return;
    }
    match expr {
        Expr::Array(items) => {
            for e in items {
                inline_icons(e);
            }
        }
        Expr::Object(fields) => {
            for (_, e) in fields {
                inline_icons(e);
            }
        }
        Expr::Unary { expr, .. } => inline_icons(expr),
        Expr::Binary { lhs, rhs, .. } => {
            inline_icons(lhs);
            inline_icons(rhs);
        }
        Expr::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            inline_icons(cond);
            inline_icons(then_expr);
            inline_icons(else_expr);
        }
        Expr::Call { callee, args } => {
            inline_icons(callee);
            for a in args {
                inline_icons(a);
            }
        }
        Expr::Member { object, .. } => inline_icons(object),
        Expr::Index { object, index } => {
            inline_icons(object);
            inline_icons(index);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r##"
use container, image, frame, interpolate;
export const DURATION = 90;
function scene() {
  let x = interpolate(frame(), [0, 30], [0, 100]);
  return container({ fill: "#000" }, [
    image("icon:play", { x: x, width: 24, height: 24 }),
  ]);
}
export default scene;
"##;

    fn registry() -> DependencyRegistry {
        DependencyRegistry::builtin()
    }

    #[test]
    fn compiles_both_artifact_forms() {
        let artifact = compile(Uuid::new_v4(), VALID, &registry()).unwrap();
        assert_eq!(artifact.module.entry, "scene");
        assert_eq!(artifact.sandbox.entry, "scene");
        assert_eq!(artifact.duration_frames(), 90);
        assert_eq!(
            artifact.module.externals,
            vec!["container", "frame", "image", "interpolate"]
        );
    }

    #[test]
    fn manifest_pins_only_referenced_primitives() {
        let artifact = compile(Uuid::new_v4(), VALID, &registry()).unwrap();
        assert_eq!(artifact.manifest.primitives.len(), 4);
        assert!(artifact.manifest.primitives.contains_key("interpolate"));
        assert!(!artifact.manifest.primitives.contains_key("spring"));
        assert!(registry().is_compatible(&artifact.manifest));
    }

    #[test]
    fn sandbox_text_has_no_module_syntax() {
        let artifact = compile(Uuid::new_v4(), VALID, &registry()).unwrap();
        let text = &artifact.sandbox.text;
        assert!(!text.contains("use "));
        assert!(!text.contains("export "));
        // still parseable and still declares the factory
        let flat = parse(text).unwrap();
        assert!(
            flat.items
                .iter()
                .any(|i| matches!(i, Item::Function(f) if f.name == "scene"))
        );
    }

    #[test]
    fn sandbox_pass_inlines_icon_references() {
        let artifact = compile(Uuid::new_v4(), VALID, &registry()).unwrap();
        assert!(artifact.sandbox.text.contains("data:image/svg+xml,"));
        assert!(!artifact.sandbox.text.contains("icon:play"));
        // the module form keeps the fetchable reference
        let module_printed = crate::ast::print_program(&artifact.module.program);
        assert!(module_printed.contains("icon:play"));
    }

    #[test]
    fn recompile_is_deterministic_in_content() {
        let a = compile(Uuid::new_v4(), VALID, &registry()).unwrap();
        let b = compile(Uuid::new_v4(), VALID, &registry()).unwrap();
        assert_eq!(a.sandbox.text, b.sandbox.text);
        assert_eq!(a.module.externals, b.module.externals);
        assert_eq!(a.module.program, b.module.program);
        assert_eq!(a.manifest, b.manifest);
    }

    #[test]
    fn rejects_unparseable_source() {
        let err = compile(Uuid::new_v4(), "function scene( {", &registry()).unwrap_err();
        assert!(err.to_string().contains("compile error:"));
    }

    #[test]
    fn rejects_missing_entry_or_duration() {
        let no_entry =
            "use group; export const DURATION = 10; function scene() { return group([]); }";
        assert!(compile(Uuid::new_v4(), no_entry, &registry()).is_err());

        let no_duration =
            "use group; function scene() { return group([]); } export default scene;";
        assert!(compile(Uuid::new_v4(), no_duration, &registry()).is_err());
    }

    #[test]
    fn rejects_unknown_primitive_acquisition() {
        let src = "use documents; export const DURATION = 10; \
                   function scene() { return null; } export default scene;";
        let err = compile(Uuid::new_v4(), src, &registry()).unwrap_err();
        assert!(err.to_string().contains("unknown host primitive"));
    }
}
