//! AST for the scene dialect, plus the canonical printer.
//!
//! The printer is deterministic: printing a program and re-parsing it yields the
//! same AST, which is what makes the validator's rewrite pass a fixpoint.

use std::fmt::Write as _;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Program {
    pub items: Vec<Item>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BindKind {
    Const,
    Let,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Item {
    Use {
        names: Vec<String>,
    },
    Binding {
        exported: bool,
        kind: BindKind,
        name: String,
        value: Expr,
    },
    Function(FunctionDecl),
    ExportDefault {
        name: String,
    },
}

impl Item {
    /// Name this item declares at the top level, if any.
    pub fn declared_name(&self) -> Option<&str> {
        match self {
            Item::Binding { name, .. } => Some(name),
            Item::Function(f) => Some(&f.name),
            Item::Use { .. } | Item::ExportDefault { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Stmt {
    Let { name: String, value: Expr },
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    Return(Option<Expr>),
    Expr(Expr),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Ne => 3,
            Self::Lt | Self::Gt | Self::Le | Self::Ge => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Rem => 6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
}

impl Expr {
    fn precedence(&self) -> u8 {
        match self {
            Expr::Ternary { .. } => 0,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { .. } => 7,
            Expr::Call { .. } | Expr::Member { .. } | Expr::Index { .. } => 8,
            _ => 9,
        }
    }
}

/// Print a program in the canonical form the validator and the sandbox pass emit.
pub fn print_program(program: &Program) -> String {
    let mut out = String::new();
    for (i, item) in program.items.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        print_item(&mut out, item);
    }
    out
}

fn print_item(out: &mut String, item: &Item) {
    match item {
        Item::Use { names } => {
            let _ = writeln!(out, "use {};", names.join(", "));
        }
        Item::Binding {
            exported,
            kind,
            name,
            value,
        } => {
            if *exported {
                out.push_str("export ");
            }
            out.push_str(match kind {
                BindKind::Const => "const ",
                BindKind::Let => "let ",
            });
            out.push_str(name);
            out.push_str(" = ");
            print_expr(out, value, 0);
            out.push_str(";\n");
        }
        Item::Function(f) => {
            let _ = write!(out, "function {}({}) ", f.name, f.params.join(", "));
            print_block(out, &f.body, 0);
            out.push('\n');
        }
        Item::ExportDefault { name } => {
            let _ = writeln!(out, "export default {name};");
        }
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn print_block(out: &mut String, block: &Block, depth: usize) {
    out.push_str("{\n");
    for stmt in &block.stmts {
        indent(out, depth + 1);
        print_stmt(out, stmt, depth + 1);
    }
    indent(out, depth);
    out.push('}');
}

fn print_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    match stmt {
        Stmt::Let { name, value } => {
            out.push_str("let ");
            out.push_str(name);
            out.push_str(" = ");
            print_expr(out, value, 0);
            out.push_str(";\n");
        }
        Stmt::If {
            cond,
            then_block,
            else_block,
        } => {
            out.push_str("if (");
            print_expr(out, cond, 0);
            out.push_str(") ");
            print_block(out, then_block, depth);
            if let Some(else_block) = else_block {
                out.push_str(" else ");
                print_block(out, else_block, depth);
            }
            out.push('\n');
        }
        Stmt::Return(expr) => {
            out.push_str("return");
            if let Some(e) = expr {
                out.push(' ');
                print_expr(out, e, 0);
            }
            out.push_str(";\n");
        }
        Stmt::Expr(e) => {
            print_expr(out, e, 0);
            out.push_str(";\n");
        }
    }
}

fn print_num(out: &mut String, v: f64) {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        let _ = write!(out, "{}", v as i64);
    } else {
        let _ = write!(out, "{v}");
    }
}

fn print_str(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
}

fn is_bare_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        && !key.as_bytes()[0].is_ascii_digit()
}

fn print_expr(out: &mut String, expr: &Expr, min_prec: u8) {
    let needs_parens = expr.precedence() < min_prec;
    if needs_parens {
        out.push('(');
    }
    match expr {
        Expr::Null => out.push_str("null"),
        Expr::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Expr::Num(v) => print_num(out, *v),
        Expr::Str(s) => print_str(out, s),
        Expr::Ident(name) => out.push_str(name),
        Expr::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expr(out, item, 0);
            }
            out.push(']');
        }
        Expr::Object(fields) => {
            if fields.is_empty() {
                out.push_str("{}");
            } else {
                out.push_str("{ ");
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    if is_bare_key(key) {
                        out.push_str(key);
                    } else {
                        print_str(out, key);
                    }
                    out.push_str(": ");
                    print_expr(out, value, 0);
                }
                out.push_str(" }");
            }
        }
        Expr::Unary { op, expr } => {
            out.push_str(match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
            });
            print_expr(out, expr, 7);
        }
        Expr::Binary { op, lhs, rhs } => {
            let prec = op.precedence();
            print_expr(out, lhs, prec);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            print_expr(out, rhs, prec + 1);
        }
        Expr::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            print_expr(out, cond, 1);
            out.push_str(" ? ");
            print_expr(out, then_expr, 1);
            out.push_str(" : ");
            print_expr(out, else_expr, 0);
        }
        Expr::Call { callee, args } => {
            print_expr(out, callee, 8);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expr(out, arg, 0);
            }
            out.push(')');
        }
        Expr::Member { object, property } => {
            print_expr(out, object, 8);
            out.push('.');
            out.push_str(property);
        }
        Expr::Index { object, index } => {
            print_expr(out, object, 8);
            out.push('[');
            print_expr(out, index, 0);
            out.push(']');
        }
    }
    if needs_parens {
        out.push(')');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_use_and_binding() {
        let program = Program {
            items: vec![
                Item::Use {
                    names: vec!["frame".into(), "container".into()],
                },
                Item::Binding {
                    exported: true,
                    kind: BindKind::Const,
                    name: "DURATION".into(),
                    value: Expr::Num(150.0),
                },
            ],
        };
        let s = print_program(&program);
        assert!(s.contains("use frame, container;"));
        assert!(s.contains("export const DURATION = 150;"));
    }

    #[test]
    fn parenthesizes_by_precedence() {
        // (1 + 2) * 3
        let e = Expr::Binary {
            op: BinaryOp::Mul,
            lhs: Box::new(Expr::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Expr::Num(1.0)),
                rhs: Box::new(Expr::Num(2.0)),
            }),
            rhs: Box::new(Expr::Num(3.0)),
        };
        let mut out = String::new();
        print_expr(&mut out, &e, 0);
        assert_eq!(out, "(1 + 2) * 3");

        // 1 - (2 - 3): right operand of a same-precedence op keeps parens
        let e = Expr::Binary {
            op: BinaryOp::Sub,
            lhs: Box::new(Expr::Num(1.0)),
            rhs: Box::new(Expr::Binary {
                op: BinaryOp::Sub,
                lhs: Box::new(Expr::Num(2.0)),
                rhs: Box::new(Expr::Num(3.0)),
            }),
        };
        let mut out = String::new();
        print_expr(&mut out, &e, 0);
        assert_eq!(out, "1 - (2 - 3)");
    }

    #[test]
    fn prints_numbers_canonically() {
        let mut out = String::new();
        print_num(&mut out, 42.0);
        out.push(' ');
        print_num(&mut out, 0.5);
        assert_eq!(out, "42 0.5");
    }

    #[test]
    fn quotes_non_bare_object_keys() {
        let e = Expr::Object(vec![
            ("x".into(), Expr::Num(1.0)),
            ("not-bare".into(), Expr::Num(2.0)),
        ]);
        let mut out = String::new();
        print_expr(&mut out, &e, 0);
        assert_eq!(out, "{ x: 1, \"not-bare\": 2 }");
    }
}
