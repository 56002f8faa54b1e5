//! Symbolic kernel IR and its lowering into fused callables.
//!
//! Compilable modules describe their outputs as [`Expr`] trees over their
//! inputs, parameters and shared state. A run of such modules is fused by
//! evaluating every member's expressions into one frame of slots: external
//! inputs occupy the first slots, each member output appends one more.

use crate::core::error::{FlowError, FlowResult};
use crate::core::types::ModuleId;
use crate::core::values::{ParamValue, Parameters, SharedArray, Value};
use std::collections::BTreeMap;
use std::ops::{Add, Div, Mul, Neg, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Exp,
    Log,
    Tanh,
    Abs,
    Sigmoid,
    Relu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

/// Symbolic expression produced by a build function
#[derive(Debug, Clone)]
pub enum Expr {
    /// Slot of the fused frame
    Slot(usize),
    /// Scalar constant, broadcast against arrays
    Const(f64),
    /// Constant array
    Array(Vec<f64>),
    /// Aliased shared state; read at call time
    Shared(SharedArray),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Pack arrays into a list value
    Pack(Vec<Expr>),
    /// Element-wise sum over the items of a list
    SumList(Box<Expr>),
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    pub fn pack(items: Vec<Expr>) -> Self {
        Expr::Pack(items)
    }

    pub fn sum_list(self) -> Self {
        Expr::SumList(Box::new(self))
    }

    pub fn exp(self) -> Self {
        Expr::Unary(UnaryOp::Exp, Box::new(self))
    }

    pub fn ln(self) -> Self {
        Expr::Unary(UnaryOp::Log, Box::new(self))
    }

    pub fn tanh(self) -> Self {
        Expr::Unary(UnaryOp::Tanh, Box::new(self))
    }

    pub fn abs(self) -> Self {
        Expr::Unary(UnaryOp::Abs, Box::new(self))
    }

    pub fn sigmoid(self) -> Self {
        Expr::Unary(UnaryOp::Sigmoid, Box::new(self))
    }

    pub fn relu(self) -> Self {
        Expr::Unary(UnaryOp::Relu, Box::new(self))
    }

    pub fn max(self, other: impl Into<Expr>) -> Self {
        Expr::Binary(BinaryOp::Max, Box::new(self), Box::new(other.into()))
    }

    pub fn min(self, other: impl Into<Expr>) -> Self {
        Expr::Binary(BinaryOp::Min, Box::new(self), Box::new(other.into()))
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl From<SharedArray> for Expr {
    fn from(array: SharedArray) -> Self {
        Expr::Shared(array)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::Binary($op, Box::new(self), Box::new(rhs.into()))
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Unary(UnaryOp::Neg, Box::new(self))
    }
}

/// Context handed to a compilable module's build function
pub struct BuildContext<'a> {
    pub module_id: ModuleId,
    pub(crate) inputs: &'a BTreeMap<String, Expr>,
    pub parameters: &'a Parameters,
    pub(crate) shared_state: &'a BTreeMap<String, Expr>,
}

impl<'a> BuildContext<'a> {
    /// Symbolic value of the named input port
    pub fn input(&self, port: &str) -> FlowResult<Expr> {
        self.inputs
            .get(port)
            .cloned()
            .ok_or_else(|| FlowError::UnresolvedInput {
                module: self.module_id,
                port: port.to_string(),
            })
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    /// Numeric parameter with a fallback; baked into the kernel as a constant
    pub fn param_f64(&self, name: &str, default: f64) -> f64 {
        self.parameter(name).and_then(ParamValue::as_f64).unwrap_or(default)
    }

    pub fn param_bool(&self, name: &str) -> bool {
        self.parameter(name).map_or(false, ParamValue::as_bool)
    }

    /// Symbolic handle on a shared-state array
    pub fn shared(&self, name: &str) -> FlowResult<Expr> {
        self.shared_state
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::UnknownSharedState {
                module: self.module_id,
                name: name.to_string(),
            })
    }
}

type CompiledExpr = Box<dyn Fn(&[Value]) -> FlowResult<Value>>;

fn unary(op: UnaryOp) -> fn(f64) -> f64 {
    match op {
        UnaryOp::Neg => |x| -x,
        UnaryOp::Exp => f64::exp,
        UnaryOp::Log => f64::ln,
        UnaryOp::Tanh => f64::tanh,
        UnaryOp::Abs => f64::abs,
        UnaryOp::Sigmoid => |x| 1.0 / (1.0 + (-x).exp()),
        UnaryOp::Relu => |x| x.max(0.0),
    }
}

fn binary(op: BinaryOp) -> fn(f64, f64) -> f64 {
    match op {
        BinaryOp::Add => |a, b| a + b,
        BinaryOp::Sub => |a, b| a - b,
        BinaryOp::Mul => |a, b| a * b,
        BinaryOp::Div => |a, b| a / b,
        BinaryOp::Max => f64::max,
        BinaryOp::Min => f64::min,
    }
}

/// Lower an expression into a closure over the frame.
fn lower(expr: Expr) -> CompiledExpr {
    match expr {
        Expr::Slot(idx) => Box::new(move |frame| {
            frame
                .get(idx)
                .cloned()
                .ok_or_else(|| FlowError::Evaluation(format!("slot {} is not populated", idx)))
        }),
        Expr::Const(c) => Box::new(move |_| Ok(Value::scalar(c))),
        Expr::Array(values) => Box::new(move |_| Ok(Value::Array(values.clone()))),
        Expr::Shared(array) => Box::new(move |_| Ok(Value::Array(array.to_vec()))),
        Expr::Unary(op, inner) => {
            let inner = lower(*inner);
            let f = unary(op);
            Box::new(move |frame| inner(frame)?.map(f))
        }
        Expr::Binary(op, lhs, rhs) => {
            let (lhs, rhs) = (lower(*lhs), lower(*rhs));
            let f = binary(op);
            Box::new(move |frame| lhs(frame)?.zip_with(&rhs(frame)?, f))
        }
        Expr::Pack(items) => {
            let items: Vec<CompiledExpr> = items.into_iter().map(lower).collect();
            Box::new(move |frame| {
                let mut packed = Vec::with_capacity(items.len());
                for item in &items {
                    packed.push(item(frame)?.into_array()?);
                }
                Ok(Value::List(packed))
            })
        }
        Expr::SumList(inner) => {
            let inner = lower(*inner);
            Box::new(move |frame| {
                let value = inner(frame)?;
                let items = value.as_list()?;
                let mut acc = Value::scalar(0.0);
                for item in items {
                    acc = acc.zip_with(&Value::Array(item.clone()), |a, b| a + b)?;
                }
                Ok(acc)
            })
        }
    }
}

/// Incrementally assembles a fused kernel
pub struct KernelBuilder {
    arity: usize,
    program: Vec<CompiledExpr>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            arity: 0,
            program: Vec::new(),
        }
    }

    /// Reserve the next argument slot. All arguments must be allocated
    /// before the first expression is pushed.
    pub fn argument(&mut self) -> Expr {
        debug_assert!(self.program.is_empty());
        let slot = self.arity;
        self.arity += 1;
        Expr::Slot(slot)
    }

    /// Append an expression; returns a reference to its result slot
    pub fn push(&mut self, expr: Expr) -> Expr {
        let slot = self.arity + self.program.len();
        self.program.push(lower(expr));
        Expr::Slot(slot)
    }

    /// Seal the program; `outputs` must be references returned by
    /// [`KernelBuilder::argument`] or [`KernelBuilder::push`]
    pub fn finish(self, outputs: &[Expr]) -> FlowResult<FusedKernel> {
        let slots = self.arity + self.program.len();
        let outputs = outputs
            .iter()
            .map(|expr| match expr {
                Expr::Slot(idx) if *idx < slots => Ok(*idx),
                other => Err(FlowError::Evaluation(format!(
                    "kernel output {:?} is not a slot reference",
                    other
                ))),
            })
            .collect::<FlowResult<Vec<usize>>>()?;
        Ok(FusedKernel {
            arity: self.arity,
            program: self.program,
            outputs,
        })
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One callable built from a whole run of compilable modules
pub struct FusedKernel {
    arity: usize,
    program: Vec<CompiledExpr>,
    outputs: Vec<usize>,
}

impl FusedKernel {
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Number of expressions evaluated per call
    pub fn len(&self) -> usize {
        self.program.len()
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    pub fn call(&self, args: &[Value]) -> FlowResult<Vec<Value>> {
        if args.len() != self.arity {
            return Err(FlowError::InvalidArguments(format!(
                "kernel expects {} arguments, got {}",
                self.arity,
                args.len()
            )));
        }
        let mut frame = Vec::with_capacity(self.arity + self.program.len());
        frame.extend_from_slice(args);
        for step in &self.program {
            let value = step(&frame)?;
            frame.push(value);
        }
        Ok(self.outputs.iter().map(|&slot| frame[slot].clone()).collect())
    }
}

impl std::fmt::Debug for FusedKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusedKernel")
            .field("arity", &self.arity)
            .field("steps", &self.program.len())
            .field("outputs", &self.outputs)
            .finish()
    }
}
