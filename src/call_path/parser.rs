use std::fs;
use std::path::Path;

use crate::call_path::{Arg, Call, CallPath, ExtraVar};
use crate::error::SynapseError;
use crate::expr::parser::{ExprParseError, ExprParser};
use crate::expr::{ConstraintSet, Expr};

pub const CONSTRAINTS_HEADER: &str = ";;-- Constraints --";
pub const CALLS_HEADER: &str = ";;-- Calls --";

struct CallParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> CallParser<'a> {
    fn peek(&mut self) -> Option<char> {
        while let Some(c) = self.input[self.pos..].chars().next() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                return Some(c);
            }
        }
        None
    }

    fn unexpected(&mut self) -> ExprParseError {
        match self.peek() {
            Some(c) => ExprParseError::UnexpectedToken {
                offset: self.pos,
                found: c.to_string(),
            },
            None => ExprParseError::UnexpectedEnd,
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.peek();
        if self.input[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), ExprParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn name(&mut self) -> Result<&'a str, ExprParseError> {
        self.peek();
        let rest = &self.input[self.pos..];
        let len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '.'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.unexpected());
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.input[start..start + len])
    }

    fn expr(&mut self) -> Result<Expr, ExprParseError> {
        let mut p = ExprParser::new(&self.input[self.pos..]);
        let e = p.parse()?;
        self.pos += p.position();
        Ok(e)
    }

    fn opt_expr(&mut self, terminators: &[char]) -> Result<Option<Expr>, ExprParseError> {
        match self.peek() {
            Some(c) if terminators.contains(&c) => Ok(None),
            None => Err(ExprParseError::UnexpectedEnd),
            _ => self.expr().map(Some),
        }
    }

    /// `[in->out]`, either side may be empty.
    fn in_out(&mut self) -> Result<(Option<Expr>, Option<Expr>), ExprParseError> {
        self.expect("[")?;
        let input = self.opt_expr(&['-'])?;
        self.expect("->")?;
        let output = self.opt_expr(&[']'])?;
        self.expect("]")?;
        Ok((input, output))
    }

    fn arg(&mut self) -> Result<(String, Arg), ExprParseError> {
        let name = self.name()?.to_string();
        self.expect(":")?;
        let mut arg = Arg {
            expr: self.opt_expr(&['&', ',', ')'])?,
            ..Default::default()
        };
        if self.eat("&") {
            if self.peek() == Some('[') {
                let (input, output) = self.in_out()?;
                arg.input = input;
                arg.output = output;
            } else {
                arg.fn_ptr_name = Some(self.name()?.to_string());
            }
        }
        Ok((name, arg))
    }

    fn call(&mut self) -> Result<Call, ExprParseError> {
        let mut call = Call::new(self.name()?);
        self.expect("(")?;
        if !self.eat(")") {
            loop {
                let (name, arg) = self.arg()?;
                call.args.insert(name, arg);
                if self.eat(")") {
                    break;
                }
                self.expect(",")?;
            }
        }
        if self.eat("{") && !self.eat("}") {
            loop {
                let name = self.name()?.to_string();
                self.expect(":")?;
                let (input, output) = self.in_out()?;
                call.extra_vars.insert(name, ExtraVar { input, output });
                if self.eat("}") {
                    break;
                }
                self.expect(",")?;
            }
        }
        self.expect("->")?;
        if !self.eat("[]") {
            call.ret = Some(self.expr()?);
        }
        match self.peek() {
            None => Ok(call),
            Some(_) => Err(self.unexpected()),
        }
    }
}

/// Parses the textual call form `fn(arg:expr&[in->out],...){extra:[in->out]}->ret`.
pub fn parse_call(s: &str) -> Result<Call, ExprParseError> {
    CallParser { input: s, pos: 0 }.call()
}

enum Section {
    Preamble,
    Constraints,
    Calls,
}

/// Parses a call-path file's contents. `filename` is recorded on the result.
pub fn parse_call_path(filename: &str, contents: &str) -> Result<CallPath, SynapseError> {
    let mut section = Section::Preamble;
    let mut constraints = vec![];
    let mut calls = vec![];
    for (i, line) in contents.lines().enumerate() {
        let line_no = i + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == CONSTRAINTS_HEADER {
            section = Section::Constraints;
            continue;
        }
        if line == CALLS_HEADER {
            section = Section::Calls;
            continue;
        }
        if line.starts_with(";;") {
            continue;
        }
        match section {
            Section::Preamble => {
                return Err(SynapseError::malformed(
                    line_no,
                    "content before the constraints section",
                ));
            }
            Section::Constraints => {
                let e: Expr = line
                    .parse()
                    .map_err(|e| SynapseError::from_parse(line_no, e))?;
                constraints.push(e);
            }
            Section::Calls => {
                calls.push(parse_call(line).map_err(|e| SynapseError::from_parse(line_no, e))?);
            }
        }
    }
    Ok(CallPath {
        filename: filename.to_string(),
        constraints: ConstraintSet::new(constraints),
        calls,
    })
}

pub fn read_call_path<P: AsRef<Path>>(path: P) -> Result<CallPath, SynapseError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    parse_call_path(&filename, &contents)
}

#[cfg(test)]
mod tests {
    use crate::call_path::{Arg, Call, parse_call, parse_call_path};
    use crate::expr::Expr;

    fn map_get() -> Call {
        Call::new("map_get")
            .with_arg("map", Arg::value(Expr::constant(0x1000, 64)))
            .with_arg(
                "key",
                Arg::pointer(
                    Expr::constant(0x2000, 64),
                    Some(Expr::read_lsb("packet_chunks", 26, 4)),
                    None,
                ),
            )
            .with_arg(
                "value_out",
                Arg::pointer(
                    Expr::constant(0x3000, 64),
                    None,
                    Some(Expr::read_lsb("allocated_index", 0, 4)),
                ),
            )
            .with_ret(Expr::read_lsb("map_has_this_key", 0, 4))
    }

    #[test]
    fn test_call_text_form() {
        let call = map_get();
        let text = call.to_string();
        assert!(text.starts_with("map_get(key:(w64 8192)&["));
        assert_eq!(parse_call(&text).unwrap(), call);
    }

    #[test]
    fn test_extra_vars_and_fn_ptr() {
        let call = Call::new("packet_borrow_next_chunk")
            .with_arg("length", Arg::value(Expr::constant(14, 32)))
            .with_arg("chunk", Arg::pointer(Expr::constant(1, 64), None, Some(Expr::constant(7, 64))))
            .with_arg("f", Arg::fn_ptr(Expr::constant(9, 64), "flow_eq"))
            .with_extra("the_chunk", None, Some(Expr::read_lsb("packet_chunks", 0, 14)));
        let text = call.to_string();
        assert!(text.ends_with("->[]"));
        assert_eq!(parse_call(&text).unwrap(), call);
    }

    #[test]
    fn test_call_path_file() {
        let contents = format!(
            ";;-- Constraints --\n(Eq (w8 0) (Read w8 0 x))\n\n;;-- Calls --\n{}\ncurrent_time()->(w64 5)\n",
            map_get()
        );
        let cp = parse_call_path("cp1.call_path", &contents).unwrap();
        assert_eq!(cp.filename, "cp1.call_path");
        assert_eq!(cp.calls.len(), 2);
        assert_eq!(cp.constraints.len(), 1);
        assert_eq!(parse_call_path("x", &cp.to_string()).unwrap().calls, cp.calls);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let err = parse_call_path("x", ";;-- Calls --\nmap_get(\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
