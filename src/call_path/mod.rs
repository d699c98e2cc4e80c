use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use crate::expr::{ConstraintSet, Expr};

pub mod functions;
pub mod parser;

pub use parser::{parse_call, parse_call_path, read_call_path};

/// A single argument of an external call. Pointer arguments carry the pointee
/// value before (`input`) and after (`output`) the call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Arg {
    pub expr: Option<Expr>,
    pub fn_ptr_name: Option<String>,
    pub input: Option<Expr>,
    pub output: Option<Expr>,
}

impl Arg {
    pub fn value(expr: Expr) -> Self {
        Self {
            expr: Some(expr),
            ..Default::default()
        }
    }

    pub fn pointer(expr: Expr, input: Option<Expr>, output: Option<Expr>) -> Self {
        Self {
            expr: Some(expr),
            input,
            output,
            ..Default::default()
        }
    }

    pub fn fn_ptr(expr: Expr, name: &str) -> Self {
        Self {
            expr: Some(expr),
            fn_ptr_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// The value a reader of this argument observes: the pointee if known,
    /// else the argument itself.
    pub fn observed(&self) -> Option<&Expr> {
        self.input.as_ref().or(self.expr.as_ref())
    }

    fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.expr
            .iter()
            .chain(self.input.iter())
            .chain(self.output.iter())
    }

    fn rename_arrays(&self, map: &BTreeMap<String, String>) -> Self {
        Self {
            expr: self.expr.as_ref().map(|e| e.rename_arrays(map)),
            fn_ptr_name: self.fn_ptr_name.clone(),
            input: self.input.as_ref().map(|e| e.rename_arrays(map)),
            output: self.output.as_ref().map(|e| e.rename_arrays(map)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExtraVar {
    pub input: Option<Expr>,
    pub output: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Call {
    pub function_name: String,
    pub args: BTreeMap<String, Arg>,
    pub extra_vars: BTreeMap<String, ExtraVar>,
    pub ret: Option<Expr>,
}

impl Call {
    pub fn new(function_name: &str) -> Self {
        Self {
            function_name: function_name.to_string(),
            args: BTreeMap::new(),
            extra_vars: BTreeMap::new(),
            ret: None,
        }
    }

    pub fn with_arg(mut self, name: &str, arg: Arg) -> Self {
        self.args.insert(name.to_string(), arg);
        self
    }

    pub fn with_extra(mut self, name: &str, input: Option<Expr>, output: Option<Expr>) -> Self {
        self.extra_vars
            .insert(name.to_string(), ExtraVar { input, output });
        self
    }

    pub fn with_ret(mut self, ret: Expr) -> Self {
        self.ret = Some(ret);
        self
    }

    pub fn arg(&self, name: &str) -> Option<&Arg> {
        self.args.get(name)
    }

    pub fn arg_expr(&self, name: &str) -> Option<&Expr> {
        self.args.get(name).and_then(|a| a.expr.as_ref())
    }

    pub fn arg_in(&self, name: &str) -> Option<&Expr> {
        self.args.get(name).and_then(|a| a.input.as_ref())
    }

    pub fn arg_out(&self, name: &str) -> Option<&Expr> {
        self.args.get(name).and_then(|a| a.output.as_ref())
    }

    pub fn extra_out(&self, name: &str) -> Option<&Expr> {
        self.extra_vars.get(name).and_then(|v| v.output.as_ref())
    }

    pub fn is(&self, function_name: &str) -> bool {
        self.function_name == function_name
    }

    /// Every expression mentioned anywhere in the call.
    pub fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.args
            .values()
            .flat_map(|a| a.exprs())
            .chain(
                self.extra_vars
                    .values()
                    .flat_map(|v| v.input.iter().chain(v.output.iter())),
            )
            .chain(self.ret.iter())
    }

    /// Expressions the call consumes: argument values and input pointees.
    pub fn read_exprs(&self) -> impl Iterator<Item = &Expr> {
        self.args
            .values()
            .flat_map(|a| a.expr.iter().chain(a.input.iter()))
            .chain(self.extra_vars.values().flat_map(|v| v.input.iter()))
    }

    pub fn arrays(&self) -> BTreeSet<String> {
        self.exprs().flat_map(|e| e.arrays()).collect()
    }

    pub fn rename_arrays(&self, map: &BTreeMap<String, String>) -> Self {
        if map.is_empty() {
            return self.clone();
        }
        Self {
            function_name: self.function_name.clone(),
            args: self
                .args
                .iter()
                .map(|(k, a)| (k.clone(), a.rename_arrays(map)))
                .collect(),
            extra_vars: self
                .extra_vars
                .iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        ExtraVar {
                            input: v.input.as_ref().map(|e| e.rename_arrays(map)),
                            output: v.output.as_ref().map(|e| e.rename_arrays(map)),
                        },
                    )
                })
                .collect(),
            ret: self.ret.as_ref().map(|e| e.rename_arrays(map)),
        }
    }
}

fn write_opt(f: &mut Formatter<'_>, e: &Option<Expr>) -> std::fmt::Result {
    match e {
        Some(e) => write!(f, "{e}"),
        None => Ok(()),
    }
}

impl Display for Call {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.function_name)?;
        for (i, (name, arg)) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{name}:")?;
            write_opt(f, &arg.expr)?;
            if let Some(fp) = &arg.fn_ptr_name {
                write!(f, "&{fp}")?;
            } else if arg.input.is_some() || arg.output.is_some() {
                write!(f, "&[")?;
                write_opt(f, &arg.input)?;
                write!(f, "->")?;
                write_opt(f, &arg.output)?;
                write!(f, "]")?;
            }
        }
        write!(f, ")")?;
        if !self.extra_vars.is_empty() {
            write!(f, "{{")?;
            for (i, (name, v)) in self.extra_vars.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{name}:[")?;
                write_opt(f, &v.input)?;
                write!(f, "->")?;
                write_opt(f, &v.output)?;
                write!(f, "]")?;
            }
            write!(f, "}}")?;
        }
        match &self.ret {
            Some(r) => write!(f, "->{r}"),
            None => write!(f, "->[]"),
        }
    }
}

/// One linear trace produced by the symbolic executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallPath {
    pub filename: String,
    pub constraints: ConstraintSet,
    pub calls: Vec<Call>,
}

impl Display for CallPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, ";;-- Constraints --")?;
        for c in &self.constraints {
            writeln!(f, "{c}")?;
        }
        writeln!(f, ";;-- Calls --")?;
        for c in &self.calls {
            writeln!(f, "{c}")?;
        }
        Ok(())
    }
}
