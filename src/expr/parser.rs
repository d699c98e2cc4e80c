use std::str::FromStr;

use thiserror::Error;

use crate::expr::{BinaryOp, CmpOp, Expr, Width};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprParseError {
    #[error("Unexpected end of expression")]
    UnexpectedEnd,
    #[error("Unexpected token '{found}' at offset {offset}")]
    UnexpectedToken { offset: usize, found: String },
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),
    #[error("Invalid width: {0}")]
    InvalidWidth(String),
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Width mismatch in {op}: expected {expected}, found {found}")]
    WidthMismatch {
        op: String,
        expected: Width,
        found: Width,
    },
}

fn is_atom_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '@'
}

/// Cursor over the textual expression syntax produced by `Display for Expr`.
pub struct ExprParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Byte offset just past the last consumed token.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.input[self.pos..].chars().next() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.input[self.pos..].chars().next()
    }

    fn expect(&mut self, expected: char) -> Result<(), ExprParseError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(c) => Err(ExprParseError::UnexpectedToken {
                offset: self.pos,
                found: c.to_string(),
            }),
            None => Err(ExprParseError::UnexpectedEnd),
        }
    }

    fn atom(&mut self) -> Result<&'a str, ExprParseError> {
        self.skip_ws();
        let start = self.pos;
        let rest = &self.input[start..];
        let len = rest
            .char_indices()
            .find(|(_, c)| !is_atom_char(*c))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if len == 0 {
            return match rest.chars().next() {
                Some(c) => Err(ExprParseError::UnexpectedToken {
                    offset: start,
                    found: c.to_string(),
                }),
                None => Err(ExprParseError::UnexpectedEnd),
            };
        }
        self.pos += len;
        Ok(&self.input[start..start + len])
    }

    fn width(&mut self) -> Result<Width, ExprParseError> {
        let tok = self.atom()?;
        tok.strip_prefix('w')
            .and_then(|w| w.parse::<Width>().ok())
            .filter(|w| *w > 0)
            .ok_or_else(|| ExprParseError::InvalidWidth(tok.to_string()))
    }

    fn number<T: FromStr>(&mut self) -> Result<T, ExprParseError> {
        let tok = self.atom()?;
        tok.parse::<T>()
            .map_err(|_| ExprParseError::InvalidNumber(tok.to_string()))
    }

    fn check_width(op: &str, expected: Width, found: Width) -> Result<(), ExprParseError> {
        if expected == found {
            Ok(())
        } else {
            Err(ExprParseError::WidthMismatch {
                op: op.to_string(),
                expected,
                found,
            })
        }
    }

    /// Parses one expression starting at the cursor.
    pub fn parse(&mut self) -> Result<Expr, ExprParseError> {
        match self.peek() {
            None => Err(ExprParseError::UnexpectedEnd),
            Some('(') => {
                self.expect('(')?;
                let e = self.parse_compound()?;
                self.expect(')')?;
                Ok(e)
            }
            Some(_) => {
                let tok = self.atom()?;
                match tok {
                    "true" => Ok(Expr::bool(true)),
                    "false" => Ok(Expr::bool(false)),
                    _ => Err(ExprParseError::UnexpectedToken {
                        offset: self.pos - tok.len(),
                        found: tok.to_string(),
                    }),
                }
            }
        }
    }

    fn parse_compound(&mut self) -> Result<Expr, ExprParseError> {
        let op = self.atom()?;
        if let Some(w) = op.strip_prefix('w') {
            let width = w
                .parse::<Width>()
                .map_err(|_| ExprParseError::InvalidWidth(op.to_string()))?;
            let value = self.number::<u64>()?;
            return Ok(Expr::constant(value, width));
        }
        match op {
            "Read" => {
                let width = self.width()?;
                Self::check_width(op, 8, width)?;
                let index = self.number::<u32>()?;
                let array = self.atom()?;
                Ok(Expr::read(array, index))
            }
            "Concat" => {
                let width = self.width()?;
                let msb = self.parse()?;
                let lsb = self.parse()?;
                Self::check_width(op, width, msb.width() + lsb.width())?;
                Ok(msb.concat(&lsb))
            }
            "Extract" => {
                let width = self.width()?;
                let offset = self.number::<u32>()?;
                let inner = self.parse()?;
                if offset + width > inner.width() {
                    return Err(ExprParseError::WidthMismatch {
                        op: op.to_string(),
                        expected: inner.width(),
                        found: offset + width,
                    });
                }
                Ok(inner.extract(offset, width))
            }
            "ZExt" | "SExt" => {
                let width = self.width()?;
                let inner = self.parse()?;
                if inner.width() > width {
                    return Err(ExprParseError::WidthMismatch {
                        op: op.to_string(),
                        expected: width,
                        found: inner.width(),
                    });
                }
                Ok(if op == "ZExt" {
                    inner.zext(width)
                } else {
                    inner.sext(width)
                })
            }
            "Not" => Ok(self.parse()?.not()),
            "Select" => {
                let width = self.width()?;
                let cond = self.parse()?;
                let on_true = self.parse()?;
                let on_false = self.parse()?;
                Self::check_width(op, 1, cond.width())?;
                Self::check_width(op, width, on_true.width())?;
                Self::check_width(op, width, on_false.width())?;
                Ok(Expr::select(&cond, &on_true, &on_false))
            }
            _ => {
                if let Some(cmp) = cmp_op(op) {
                    let lhs = self.parse()?;
                    let rhs = self.parse()?;
                    Self::check_width(op, lhs.width(), rhs.width())?;
                    Ok(Expr::compare(cmp, &lhs, &rhs))
                } else if let Some(bin) = binary_op(op) {
                    let width = self.width()?;
                    let lhs = self.parse()?;
                    let rhs = self.parse()?;
                    Self::check_width(op, width, lhs.width())?;
                    Self::check_width(op, width, rhs.width())?;
                    Ok(Expr::binary(bin, &lhs, &rhs))
                } else {
                    Err(ExprParseError::UnknownOperator(op.to_string()))
                }
            }
        }
    }
}

fn cmp_op(s: &str) -> Option<CmpOp> {
    Some(match s {
        "Eq" => CmpOp::Eq,
        "Ne" => CmpOp::Ne,
        "Ult" => CmpOp::Ult,
        "Ule" => CmpOp::Ule,
        "Ugt" => CmpOp::Ugt,
        "Uge" => CmpOp::Uge,
        "Slt" => CmpOp::Slt,
        "Sle" => CmpOp::Sle,
        "Sgt" => CmpOp::Sgt,
        "Sge" => CmpOp::Sge,
        _ => return None,
    })
}

fn binary_op(s: &str) -> Option<BinaryOp> {
    Some(match s {
        "Add" => BinaryOp::Add,
        "Sub" => BinaryOp::Sub,
        "Mul" => BinaryOp::Mul,
        "UDiv" => BinaryOp::UDiv,
        "SDiv" => BinaryOp::SDiv,
        "URem" => BinaryOp::URem,
        "SRem" => BinaryOp::SRem,
        "And" => BinaryOp::And,
        "Or" => BinaryOp::Or,
        "Xor" => BinaryOp::Xor,
        "Shl" => BinaryOp::Shl,
        "LShr" => BinaryOp::LShr,
        "AShr" => BinaryOp::AShr,
        _ => return None,
    })
}

impl FromStr for Expr {
    type Err = ExprParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = ExprParser::new(s);
        let e = parser.parse()?;
        match parser.peek() {
            None => Ok(e),
            Some(c) => Err(ExprParseError::UnexpectedToken {
                offset: parser.position(),
                found: c.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::Expr;
    use crate::expr::parser::{ExprParseError, ExprParser};

    #[test]
    fn test_parse_printed() {
        let e = Expr::read_lsb("packet_chunks", 12, 2)
            .zext(32)
            .eq(&Expr::constant(0x0800, 32));
        let text = e.to_string();
        assert_eq!(
            text,
            "(Eq (ZExt w32 (Concat w16 (Read w8 13 packet_chunks) (Read w8 12 packet_chunks))) (w32 2048))"
        );
        let parsed: Expr = text.parse().unwrap();
        assert_eq!(parsed, e);
    }

    #[test]
    fn test_parse_booleans_and_prefix() {
        let mut p = ExprParser::new("true&rest");
        assert_eq!(p.parse().unwrap(), Expr::bool(true));
        assert_eq!(p.position(), 4);
        assert!("false".parse::<Expr>().unwrap().is_false());
    }

    #[test]
    fn test_width_mismatch() {
        let r = "(Add w32 (w32 1) (w8 1))".parse::<Expr>();
        assert!(matches!(r, Err(ExprParseError::WidthMismatch { .. })));
        let r = "(Frob w32 (w32 1))".parse::<Expr>();
        assert_eq!(r, Err(ExprParseError::UnknownOperator("Frob".to_string())));
        assert_eq!("(w32".parse::<Expr>(), Err(ExprParseError::UnexpectedEnd));
    }
}
