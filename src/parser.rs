//! Recursive-descent parser for the scene dialect.

use crate::{
    ast::{BinaryOp, BindKind, Block, Expr, FunctionDecl, Item, Program, Stmt, UnaryOp},
    error::{VignetteError, VignetteResult},
    lexer::{Span, Token, TokenKind, tokenize},
};

pub fn parse(source: &str) -> VignetteResult<Program> {
    let tokens = tokenize(source)?;
    Parser { tokens, pos: 0 }.program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn bump(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> VignetteResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.err(format!("expected {what}")))
        }
    }

    fn err(&self, msg: impl Into<String>) -> VignetteError {
        let span = self.span();
        VignetteError::validation(format!("{}:{}: {}", span.line, span.col, msg.into()))
    }

    fn ident(&mut self, what: &str) -> VignetteResult<String> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.err(format!("expected {what}"))),
        }
    }

    fn program(mut self) -> VignetteResult<Program> {
        let mut items = Vec::new();
        while !matches!(self.peek(), TokenKind::Eof) {
            items.push(self.item()?);
        }
        Ok(Program { items })
    }

    fn item(&mut self) -> VignetteResult<Item> {
        match self.peek() {
            TokenKind::Use => self.use_item(),
            TokenKind::Export => {
                self.bump();
                match self.peek() {
                    TokenKind::Default => {
                        self.bump();
                        let name = self.ident("exported function name")?;
                        self.expect(&TokenKind::Semi, "';' after export default")?;
                        Ok(Item::ExportDefault { name })
                    }
                    TokenKind::Const | TokenKind::Let => self.binding_item(true),
                    _ => Err(self.err("expected 'default', 'const' or 'let' after 'export'")),
                }
            }
            TokenKind::Const | TokenKind::Let => self.binding_item(false),
            TokenKind::Function => Ok(Item::Function(self.function()?)),
            _ => Err(self.err("expected a top-level declaration")),
        }
    }

    fn use_item(&mut self) -> VignetteResult<Item> {
        self.expect(&TokenKind::Use, "'use'")?;
        let mut names = vec![self.ident("primitive name")?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.ident("primitive name")?);
        }
        self.expect(&TokenKind::Semi, "';' after use declaration")?;
        Ok(Item::Use { names })
    }

    fn binding_item(&mut self, exported: bool) -> VignetteResult<Item> {
        let kind = match self.bump() {
            TokenKind::Const => BindKind::Const,
            TokenKind::Let => BindKind::Let,
            _ => return Err(self.err("expected 'const' or 'let'")),
        };
        let name = self.ident("binding name")?;
        self.expect(&TokenKind::Assign, "'=' in binding")?;
        let value = self.expr()?;
        self.expect(&TokenKind::Semi, "';' after binding")?;
        Ok(Item::Binding {
            exported,
            kind,
            name,
            value,
        })
    }

    fn function(&mut self) -> VignetteResult<FunctionDecl> {
        self.expect(&TokenKind::Function, "'function'")?;
        let name = self.ident("function name")?;
        self.expect(&TokenKind::LParen, "'(' after function name")?;
        let mut params = Vec::new();
        if !matches!(self.peek(), TokenKind::RParen) {
            params.push(self.ident("parameter name")?);
            while self.eat(&TokenKind::Comma) {
                params.push(self.ident("parameter name")?);
            }
        }
        self.expect(&TokenKind::RParen, "')' after parameters")?;
        let body = self.block()?;
        Ok(FunctionDecl { name, params, body })
    }

    fn block(&mut self) -> VignetteResult<Block> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) {
            stmts.push(self.stmt()?);
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Block { stmts })
    }

    fn stmt(&mut self) -> VignetteResult<Stmt> {
        match self.peek() {
            TokenKind::Let | TokenKind::Const => {
                self.bump();
                let name = self.ident("binding name")?;
                self.expect(&TokenKind::Assign, "'=' in let statement")?;
                let value = self.expr()?;
                self.expect(&TokenKind::Semi, "';' after let statement")?;
                Ok(Stmt::Let { name, value })
            }
            TokenKind::If => {
                self.bump();
                self.expect(&TokenKind::LParen, "'(' after 'if'")?;
                let cond = self.expr()?;
                self.expect(&TokenKind::RParen, "')' after condition")?;
                let then_block = self.block()?;
                let else_block = if self.eat(&TokenKind::Else) {
                    if matches!(self.peek(), TokenKind::If) {
                        // else-if: wrap the nested if in a synthetic block
                        let nested = self.stmt()?;
                        Some(Block { stmts: vec![nested] })
                    } else {
                        Some(self.block()?)
                    }
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then_block,
                    else_block,
                })
            }
            TokenKind::Return => {
                self.bump();
                let value = if matches!(self.peek(), TokenKind::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&TokenKind::Semi, "';' after return")?;
                Ok(Stmt::Return(value))
            }
            _ => {
                let e = self.expr()?;
                self.expect(&TokenKind::Semi, "';' after expression")?;
                Ok(Stmt::Expr(e))
            }
        }
    }

    fn expr(&mut self) -> VignetteResult<Expr> {
        self.ternary()
    }

    fn ternary(&mut self) -> VignetteResult<Expr> {
        let cond = self.binary(1)?;
        if self.eat(&TokenKind::Question) {
            let then_expr = self.ternary()?;
            self.expect(&TokenKind::Colon, "':' in ternary")?;
            let else_expr = self.ternary()?;
            Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            })
        } else {
            Ok(cond)
        }
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        Some(match self.peek() {
            TokenKind::OrOr => BinaryOp::Or,
            TokenKind::AndAnd => BinaryOp::And,
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Rem,
            _ => return None,
        })
    }

    fn binary(&mut self, min_prec: u8) -> VignetteResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.binary_op() {
            let prec = match op {
                BinaryOp::Or => 1,
                BinaryOp::And => 2,
                BinaryOp::Eq | BinaryOp::Ne => 3,
                BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => 4,
                BinaryOp::Add | BinaryOp::Sub => 5,
                BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
            };
            if prec < min_prec {
                break;
            }
            self.bump();
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> VignetteResult<Expr> {
        match self.peek() {
            TokenKind::Minus => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(self.unary()?),
                })
            }
            TokenKind::Bang => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(self.unary()?),
                })
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> VignetteResult<Expr> {
        let mut e = self.primary()?;
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    self.bump();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), TokenKind::RParen) {
                        args.push(self.expr()?);
                        while self.eat(&TokenKind::Comma) {
                            args.push(self.expr()?);
                        }
                    }
                    self.expect(&TokenKind::RParen, "')' after arguments")?;
                    e = Expr::Call {
                        callee: Box::new(e),
                        args,
                    };
                }
                TokenKind::Dot => {
                    self.bump();
                    let property = self.ident("property name")?;
                    e = Expr::Member {
                        object: Box::new(e),
                        property,
                    };
                }
                TokenKind::LBracket => {
                    self.bump();
                    let index = self.expr()?;
                    self.expect(&TokenKind::RBracket, "']' after index")?;
                    e = Expr::Index {
                        object: Box::new(e),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(e),
            }
        }
    }

    fn primary(&mut self) -> VignetteResult<Expr> {
        match self.peek().clone() {
            TokenKind::Null => {
                self.bump();
                Ok(Expr::Null)
            }
            TokenKind::True => {
                self.bump();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.bump();
                Ok(Expr::Bool(false))
            }
            TokenKind::Num(v) => {
                self.bump();
                Ok(Expr::Num(v))
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Expr::Str(s))
            }
            TokenKind::Ident(name) => {
                self.bump();
                Ok(Expr::Ident(name))
            }
            TokenKind::LParen => {
                self.bump();
                let e = self.expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(e)
            }
            TokenKind::LBracket => {
                self.bump();
                let mut items = Vec::new();
                if !matches!(self.peek(), TokenKind::RBracket) {
                    items.push(self.expr()?);
                    while self.eat(&TokenKind::Comma) {
                        if matches!(self.peek(), TokenKind::RBracket) {
                            break; // trailing comma
                        }
                        items.push(self.expr()?);
                    }
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(Expr::Array(items))
            }
            TokenKind::LBrace => {
                self.bump();
                let mut fields = Vec::new();
                if !matches!(self.peek(), TokenKind::RBrace) {
                    fields.push(self.object_field()?);
                    while self.eat(&TokenKind::Comma) {
                        if matches!(self.peek(), TokenKind::RBrace) {
                            break; // trailing comma
                        }
                        fields.push(self.object_field()?);
                    }
                }
                self.expect(&TokenKind::RBrace, "'}'")?;
                Ok(Expr::Object(fields))
            }
            _ => Err(self.err("expected an expression")),
        }
    }

    fn object_field(&mut self) -> VignetteResult<(String, Expr)> {
        let key = match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                name
            }
            TokenKind::Str(s) => {
                self.bump();
                s
            }
            // keyword-shaped keys appear in generated objects (`default`, `if`)
            TokenKind::Default => {
                self.bump();
                "default".to_string()
            }
            _ => return Err(self.err("expected an object key")),
        };
        self.expect(&TokenKind::Colon, "':' after object key")?;
        let value = self.expr()?;
        Ok((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::print_program;

    const SCENE: &str = r##"
use frame, duration, interpolate, container, image;

export const DURATION = 90;

function intro() {
  let x = interpolate(frame(), [0, 30], [-200, 40]);
  return image("logo.svg", { x: x, y: 80, width: 120, height: 120 });
}

function scene() {
  return container({ fill: "#101018" }, [intro()]);
}

export default scene;
"##;

    #[test]
    fn parses_a_full_scene() {
        let program = parse(SCENE).unwrap();
        assert_eq!(program.items.len(), 5);
        assert!(matches!(&program.items[0], Item::Use { names } if names.len() == 5));
        assert!(matches!(
            &program.items[1],
            Item::Binding { exported: true, name, .. } if name == "DURATION"
        ));
        assert!(matches!(
            &program.items[4],
            Item::ExportDefault { name } if name == "scene"
        ));
    }

    #[test]
    fn print_parse_roundtrip_is_stable() {
        let program = parse(SCENE).unwrap();
        let printed = print_program(&program);
        let reparsed = parse(&printed).unwrap();
        assert_eq!(program, reparsed);
        // and printing again is byte-identical
        assert_eq!(printed, print_program(&reparsed));
    }

    #[test]
    fn parses_operator_precedence() {
        let program = parse("const A = 1 + 2 * 3 < 10 && true;").unwrap();
        let Item::Binding { value, .. } = &program.items[0] else {
            panic!("expected binding");
        };
        // && binds loosest
        assert!(matches!(
            value,
            Expr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn parses_ternary_and_member_chains() {
        let program = parse("const A = cfg.items[0].x > 0 ? cfg.items[0].x : -1;").unwrap();
        let Item::Binding { value, .. } = &program.items[0] else {
            panic!("expected binding");
        };
        assert!(matches!(value, Expr::Ternary { .. }));
    }

    #[test]
    fn parses_else_if_chain() {
        let src = "function f(a) { if (a > 1) { return 1; } else if (a > 0) { return 0; } else { return -1; } }";
        let program = parse(src).unwrap();
        assert_eq!(program.items.len(), 1);
    }

    #[test]
    fn rejects_garbage_at_top_level() {
        assert!(parse("42;").is_err());
        assert!(parse("function () {}").is_err());
        assert!(parse("use ;").is_err());
    }

    #[test]
    fn duplicate_declarations_still_parse() {
        // the validator, not the parser, owns the dedup rewrite
        let program = parse("function foo() {} function foo() {}").unwrap();
        assert_eq!(program.items.len(), 2);
    }
}
