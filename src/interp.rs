//! Tree-walking evaluator for the scene dialect.
//!
//! Both execution contexts run scene code through this evaluator; they differ
//! only in which artifact form they start from and which primitives they inject.
//! The environment is the explicit whitelist passed by the caller; there is no
//! ambient capability of any kind. Runaway scripts are cut off by an operation
//! budget and a call-depth cap; exceeding either is an evaluation error that the
//! execution boundary turns into a placeholder.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    ast::{BinaryOp, Block, Expr, FunctionDecl, Item, Program, Stmt, UnaryOp},
    error::{VignetteError, VignetteResult},
    scene::{FrameCtx, MediaLayout, SceneNode},
};

#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub max_ops: u64,
    pub max_depth: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_ops: 100_000,
            max_depth: 64,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Node(SceneNode),
    Func(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "object",
            Value::Node(_) => "node",
            Value::Func(_) => "function",
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }
}

/// Evaluate `entry()` for one frame and return the resulting node tree.
///
/// `allowed` is the set of host primitives visible to the program; the loader
/// passes the artifact's acquired externals, the sandbox host passes the full
/// whitelist.
pub fn run_scene(
    program: &Program,
    entry: &str,
    allowed: &BTreeSet<String>,
    ctx: &FrameCtx,
    limits: Limits,
) -> VignetteResult<SceneNode> {
    let mut interp = Interpreter::new(program, allowed, ctx, limits);
    let result = interp.call_entry(entry)?;
    value_to_scene(result)
}

fn value_to_scene(value: Value) -> VignetteResult<SceneNode> {
    match value {
        Value::Node(node) => Ok(node),
        Value::List(items) => {
            let mut children = Vec::with_capacity(items.len());
            for item in items {
                children.extend(value_to_nodes(item)?);
            }
            Ok(SceneNode::Group { children })
        }
        other => Err(VignetteError::evaluation(format!(
            "scene factory must return a node, got {}",
            other.type_name()
        ))),
    }
}

fn value_to_nodes(value: Value) -> VignetteResult<Vec<SceneNode>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Node(node) => Ok(vec![node]),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.extend(value_to_nodes(item)?);
            }
            Ok(out)
        }
        other => Err(VignetteError::evaluation(format!(
            "expected a node or a list of nodes, got {}",
            other.type_name()
        ))),
    }
}

enum Flow {
    Normal,
    Return(Value),
}

struct Interpreter<'a> {
    functions: HashMap<&'a str, &'a FunctionDecl>,
    globals: HashMap<String, Value>,
    global_items: &'a [Item],
    allowed: &'a BTreeSet<String>,
    ctx: &'a FrameCtx,
    limits: Limits,
    ops: u64,
    depth: u32,
}

impl<'a> Interpreter<'a> {
    fn new(
        program: &'a Program,
        allowed: &'a BTreeSet<String>,
        ctx: &'a FrameCtx,
        limits: Limits,
    ) -> Self {
        let mut functions = HashMap::new();
        for item in &program.items {
            if let Item::Function(f) = item {
                functions.entry(f.name.as_str()).or_insert(f);
            }
        }
        Self {
            functions,
            globals: HashMap::new(),
            global_items: &program.items,
            allowed,
            ctx,
            limits,
            ops: 0,
            depth: 0,
        }
    }

    fn call_entry(&mut self, entry: &str) -> VignetteResult<Value> {
        // top-level bindings evaluate in declaration order before the entry call
        let items = self.global_items;
        for item in items {
            if let Item::Binding { name, value, .. } = item {
                let v = self.eval_expr(value, &mut Vec::new())?;
                self.globals.insert(name.clone(), v);
            }
        }
        let Some(func) = self.functions.get(entry).copied() else {
            return Err(VignetteError::evaluation(format!(
                "entry function '{entry}' is not declared"
            )));
        };
        self.call_function(func, Vec::new())
    }

    fn charge(&mut self) -> VignetteResult<()> {
        self.ops += 1;
        if self.ops > self.limits.max_ops {
            return Err(VignetteError::evaluation(format!(
                "operation budget exhausted ({} ops)",
                self.limits.max_ops
            )));
        }
        Ok(())
    }

    fn call_function(&mut self, func: &'a FunctionDecl, args: Vec<Value>) -> VignetteResult<Value> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            self.depth -= 1;
            return Err(VignetteError::evaluation(format!(
                "call depth limit exceeded ({})",
                self.limits.max_depth
            )));
        }

        let mut scope: HashMap<String, Value> = HashMap::new();
        for (i, param) in func.params.iter().enumerate() {
            scope.insert(
                param.clone(),
                args.get(i).cloned().unwrap_or(Value::Null),
            );
        }
        let mut scopes = vec![scope];
        let result = self.exec_block(&func.body, &mut scopes);
        self.depth -= 1;
        match result? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::Null),
        }
    }

    fn exec_block(
        &mut self,
        block: &'a Block,
        scopes: &mut Vec<HashMap<String, Value>>,
    ) -> VignetteResult<Flow> {
        for stmt in &block.stmts {
            self.charge()?;
            match stmt {
                Stmt::Let { name, value } => {
                    let v = self.eval_expr(value, scopes)?;
                    if let Some(scope) = scopes.last_mut() {
                        scope.insert(name.clone(), v);
                    }
                }
                Stmt::If {
                    cond,
                    then_block,
                    else_block,
                } => {
                    let c = self.eval_expr(cond, scopes)?;
                    let flow = if c.truthy() {
                        self.exec_block(then_block, scopes)?
                    } else if let Some(else_block) = else_block {
                        self.exec_block(else_block, scopes)?
                    } else {
                        Flow::Normal
                    };
                    if let Flow::Return(v) = flow {
                        return Ok(Flow::Return(v));
                    }
                }
                Stmt::Return(expr) => {
                    let v = match expr {
                        Some(e) => self.eval_expr(e, scopes)?,
                        None => Value::Null,
                    };
                    return Ok(Flow::Return(v));
                }
                Stmt::Expr(e) => {
                    self.eval_expr(e, scopes)?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn lookup(&self, name: &str, scopes: &[HashMap<String, Value>]) -> Option<Value> {
        for scope in scopes.iter().rev() {
            if let Some(v) = scope.get(name) {
                return Some(v.clone());
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Some(v.clone());
        }
        if self.functions.contains_key(name) {
            return Some(Value::Func(name.to_string()));
        }
        if self.allowed.contains(name) {
            return Some(Value::Func(name.to_string()));
        }
        None
    }

    fn eval_expr(
        &mut self,
        expr: &'a Expr,
        scopes: &mut Vec<HashMap<String, Value>>,
    ) -> VignetteResult<Value> {
        self.charge()?;
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Num(v) => Ok(Value::Num(*v)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Ident(name) => self.lookup(name, scopes).ok_or_else(|| {
                VignetteError::evaluation(format!("undefined identifier '{name}'"))
            }),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_expr(item, scopes)?);
                }
                Ok(Value::List(out))
            }
            Expr::Object(fields) => {
                let mut map = BTreeMap::new();
                for (key, value) in fields {
                    let v = self.eval_expr(value, scopes)?;
                    map.insert(key.clone(), v);
                }
                Ok(Value::Map(map))
            }
            Expr::Unary { op, expr } => {
                let v = self.eval_expr(expr, scopes)?;
                match op {
                    UnaryOp::Neg => match v {
                        Value::Num(n) => Ok(Value::Num(-n)),
                        other => Err(VignetteError::evaluation(format!(
                            "cannot negate {}",
                            other.type_name()
                        ))),
                    },
                    UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                // short-circuit before evaluating the right side
                if matches!(op, BinaryOp::And | BinaryOp::Or) {
                    let l = self.eval_expr(lhs, scopes)?;
                    return match op {
                        BinaryOp::And if !l.truthy() => Ok(l),
                        BinaryOp::Or if l.truthy() => Ok(l),
                        _ => self.eval_expr(rhs, scopes),
                    };
                }
                let l = self.eval_expr(lhs, scopes)?;
                let r = self.eval_expr(rhs, scopes)?;
                self.binary(*op, l, r)
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let c = self.eval_expr(cond, scopes)?;
                if c.truthy() {
                    self.eval_expr(then_expr, scopes)
                } else {
                    self.eval_expr(else_expr, scopes)
                }
            }
            Expr::Call { callee, args } => {
                let callee_v = self.eval_expr(callee, scopes)?;
                let Value::Func(name) = callee_v else {
                    return Err(VignetteError::evaluation(format!(
                        "cannot call a {}",
                        callee_v.type_name()
                    )));
                };
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval_expr(arg, scopes)?);
                }
                if let Some(func) = self.functions.get(name.as_str()).copied() {
                    return self.call_function(func, arg_values);
                }
                if self.allowed.contains(&name) {
                    return self.host_call(&name, arg_values);
                }
                Err(VignetteError::evaluation(format!(
                    "undefined function '{name}'"
                )))
            }
            Expr::Member { object, property } => {
                let obj = self.eval_expr(object, scopes)?;
                match obj {
                    Value::Map(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
                    other => Err(VignetteError::evaluation(format!(
                        "cannot access property '{property}' on {}",
                        other.type_name()
                    ))),
                }
            }
            Expr::Index { object, index } => {
                let obj = self.eval_expr(object, scopes)?;
                let idx = self.eval_expr(index, scopes)?;
                match (obj, idx) {
                    (Value::List(items), Value::Num(i)) => {
                        let i = i.floor();
                        if i < 0.0 || i >= items.len() as f64 {
                            Ok(Value::Null)
                        } else {
                            Ok(items[i as usize].clone())
                        }
                    }
                    (Value::Map(map), Value::Str(key)) => {
                        Ok(map.get(&key).cloned().unwrap_or(Value::Null))
                    }
                    (obj, idx) => Err(VignetteError::evaluation(format!(
                        "cannot index {} with {}",
                        obj.type_name(),
                        idx.type_name()
                    ))),
                }
            }
        }
    }

    fn binary(&self, op: BinaryOp, l: Value, r: Value) -> VignetteResult<Value> {
        use BinaryOp::*;
        match op {
            Add => match (l, r) {
                (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a + b)),
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
                (Value::Str(a), Value::Num(b)) => {
                    let mut s = a;
                    push_num(&mut s, b);
                    Ok(Value::Str(s))
                }
                (Value::Num(a), Value::Str(b)) => {
                    let mut s = String::new();
                    push_num(&mut s, a);
                    s.push_str(&b);
                    Ok(Value::Str(s))
                }
                (l, r) => Err(type_error("+", &l, &r)),
            },
            Sub | Mul | Div | Rem => match (l, r) {
                (Value::Num(a), Value::Num(b)) => Ok(Value::Num(match op {
                    Sub => a - b,
                    Mul => a * b,
                    Div => a / b,
                    Rem => a % b,
                    _ => unreachable!(),
                })),
                (l, r) => Err(type_error(op.symbol(), &l, &r)),
            },
            Lt | Gt | Le | Ge => match (l, r) {
                (Value::Num(a), Value::Num(b)) => Ok(Value::Bool(match op {
                    Lt => a < b,
                    Gt => a > b,
                    Le => a <= b,
                    Ge => a >= b,
                    _ => unreachable!(),
                })),
                (l, r) => Err(type_error(op.symbol(), &l, &r)),
            },
            Eq | Ne => {
                let eq = values_equal(&l, &r);
                Ok(Value::Bool(if matches!(op, Eq) { eq } else { !eq }))
            }
            And | Or => unreachable!("short-circuit ops handled in eval_expr"),
        }
    }

    // --- host primitives ---

    fn host_call(&mut self, name: &str, args: Vec<Value>) -> VignetteResult<Value> {
        match name {
            "frame" => Ok(Value::Num(self.ctx.frame.0 as f64)),
            "duration" => Ok(Value::Num(self.ctx.duration.0 as f64)),
            "fps" => Ok(Value::Num(self.ctx.fps.as_f64())),
            "width" => Ok(Value::Num(f64::from(self.ctx.canvas.width))),
            "height" => Ok(Value::Num(f64::from(self.ctx.canvas.height))),
            "interpolate" => self.host_interpolate(args),
            "spring" => self.host_spring(args),
            "container" => self.host_container(args),
            "group" => {
                let children = match args.into_iter().next() {
                    Some(v) => value_to_nodes(v)?,
                    None => Vec::new(),
                };
                Ok(Value::Node(SceneNode::Group { children }))
            }
            "sequence" => self.host_sequence(args),
            "image" => self.host_media(name, args),
            "video" => self.host_media(name, args),
            "audio" => self.host_audio(args),
            other => Err(VignetteError::evaluation(format!(
                "'{other}' is not a host primitive"
            ))),
        }
    }

    fn host_interpolate(&self, args: Vec<Value>) -> VignetteResult<Value> {
        let mut it = args.into_iter();
        let t = num_arg(it.next(), "interpolate input")?;
        let input = range_arg(it.next(), "interpolate input range")?;
        let output = range_arg(it.next(), "interpolate output range")?;
        let clamp = match it.next() {
            Some(Value::Map(opts)) => !matches!(opts.get("clamp"), Some(Value::Bool(false))),
            _ => true,
        };

        let (a, b) = input;
        let (c, d) = output;
        let mut u = if b == a { 0.0 } else { (t - a) / (b - a) };
        if clamp {
            u = u.clamp(0.0, 1.0);
        }
        Ok(Value::Num(c + (d - c) * u))
    }

    fn host_spring(&self, args: Vec<Value>) -> VignetteResult<Value> {
        let mut it = args.into_iter();
        let t_frames = num_arg(it.next(), "spring input")?;
        let (stiffness, damping) = match it.next() {
            Some(Value::Map(cfg)) => (
                map_num(&cfg, "stiffness").unwrap_or(100.0),
                map_num(&cfg, "damping").unwrap_or(10.0),
            ),
            Some(other) => {
                return Err(VignetteError::evaluation(format!(
                    "spring config must be an object, got {}",
                    other.type_name()
                )));
            }
            None => (100.0, 10.0),
        };

        let secs = self.ctx.fps.frames_to_secs(t_frames.max(0.0) as u64);
        let rate = (stiffness.max(0.0) / (1.0 + damping.max(0.0))).max(1e-6);
        let e = (-rate * secs).exp();
        // critically-damped-like response toward 1.0
        let v = 1.0 - e * (1.0 + rate * secs);
        Ok(Value::Num(v.clamp(0.0, 1.0)))
    }

    fn host_container(&mut self, args: Vec<Value>) -> VignetteResult<Value> {
        let mut it = args.into_iter();
        let props = match it.next() {
            Some(Value::Map(m)) => m,
            Some(Value::Null) | None => BTreeMap::new(),
            Some(other) => {
                return Err(VignetteError::evaluation(format!(
                    "container props must be an object, got {}",
                    other.type_name()
                )));
            }
        };
        let children = match it.next() {
            Some(v) => value_to_nodes(v)?,
            None => match props.get("children") {
                Some(v) => value_to_nodes(v.clone())?,
                None => Vec::new(),
            },
        };
        let fill = match props.get("fill") {
            Some(Value::Str(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(VignetteError::evaluation(format!(
                    "container fill must be a string, got {}",
                    other.type_name()
                )));
            }
        };
        let opacity = map_num(&props, "opacity").unwrap_or(1.0).clamp(0.0, 1.0);
        Ok(Value::Node(SceneNode::Container {
            fill,
            opacity,
            children,
        }))
    }

    fn host_sequence(&mut self, args: Vec<Value>) -> VignetteResult<Value> {
        let Some(Value::List(items)) = args.into_iter().next() else {
            return Err(VignetteError::evaluation(
                "sequence takes a list of { at, node } entries",
            ));
        };
        let now = self.ctx.frame.0 as f64;
        let mut children = Vec::new();
        for item in items {
            let Value::Map(entry) = item else {
                return Err(VignetteError::evaluation(
                    "sequence entries must be { at, node } objects",
                ));
            };
            let at = map_num(&entry, "at").unwrap_or(0.0);
            if now >= at {
                if let Some(v) = entry.get("node") {
                    children.extend(value_to_nodes(v.clone())?);
                }
            }
        }
        Ok(Value::Node(SceneNode::Group { children }))
    }

    fn host_media(&self, which: &str, args: Vec<Value>) -> VignetteResult<Value> {
        let mut it = args.into_iter();
        let source = match it.next() {
            Some(Value::Str(s)) => s,
            other => {
                return Err(VignetteError::evaluation(format!(
                    "{which} source must be a string, got {}",
                    other.map_or("nothing", |v| v.type_name())
                )));
            }
        };
        let layout = match it.next() {
            Some(Value::Map(props)) => layout_from_props(&props),
            Some(Value::Null) | None => MediaLayout::default(),
            Some(other) => {
                return Err(VignetteError::evaluation(format!(
                    "{which} props must be an object, got {}",
                    other.type_name()
                )));
            }
        };
        Ok(Value::Node(match which {
            "image" => SceneNode::Image { source, layout },
            _ => SceneNode::Video { source, layout },
        }))
    }

    fn host_audio(&self, args: Vec<Value>) -> VignetteResult<Value> {
        let mut it = args.into_iter();
        let source = match it.next() {
            Some(Value::Str(s)) => s,
            other => {
                return Err(VignetteError::evaluation(format!(
                    "audio source must be a string, got {}",
                    other.map_or("nothing", |v| v.type_name())
                )));
            }
        };
        let volume = match it.next() {
            Some(Value::Map(props)) => map_num(&props, "volume").unwrap_or(1.0),
            _ => 1.0,
        };
        Ok(Value::Node(SceneNode::Audio {
            source,
            volume: volume.clamp(0.0, 1.0),
        }))
    }
}

fn layout_from_props(props: &BTreeMap<String, Value>) -> MediaLayout {
    MediaLayout {
        x: map_num(props, "x").unwrap_or(0.0),
        y: map_num(props, "y").unwrap_or(0.0),
        width: map_num(props, "width").unwrap_or(0.0),
        height: map_num(props, "height").unwrap_or(0.0),
        opacity: map_num(props, "opacity").unwrap_or(1.0).clamp(0.0, 1.0),
        rotation_rad: map_num(props, "rotation").unwrap_or(0.0).to_radians(),
        scale: map_num(props, "scale").unwrap_or(1.0),
    }
}

fn map_num(map: &BTreeMap<String, Value>, key: &str) -> Option<f64> {
    match map.get(key) {
        Some(Value::Num(v)) => Some(*v),
        _ => None,
    }
}

fn num_arg(v: Option<Value>, what: &str) -> VignetteResult<f64> {
    match v {
        Some(Value::Num(n)) => Ok(n),
        other => Err(VignetteError::evaluation(format!(
            "{what} must be a number, got {}",
            other.map_or("nothing", |v| v.type_name())
        ))),
    }
}

fn range_arg(v: Option<Value>, what: &str) -> VignetteResult<(f64, f64)> {
    match v {
        Some(Value::List(items)) if items.len() == 2 => {
            match (&items[0], &items[1]) {
                (Value::Num(a), Value::Num(b)) => Ok((*a, *b)),
                _ => Err(VignetteError::evaluation(format!(
                    "{what} must be a [number, number] pair"
                ))),
            }
        }
        _ => Err(VignetteError::evaluation(format!(
            "{what} must be a [number, number] pair"
        ))),
    }
}

fn push_num(out: &mut String, v: f64) {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        out.push_str(&(v as i64).to_string());
    } else {
        out.push_str(&v.to_string());
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Num(a), Value::Num(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => false,
    }
}

fn type_error(op: &str, l: &Value, r: &Value) -> VignetteError {
    VignetteError::evaluation(format!(
        "invalid operands for '{op}': {} and {}",
        l.type_name(),
        r.type_name()
    ))
}
