//! Parser for the static textual form.
//!
//! This is the mirror of `gantry_ir::write`: it accepts exactly the grammar
//! the printer produces and rebuilds a [`StaticFunction`] from it. Variable
//! names are interned into fresh ids in order of first appearance; their
//! types are not part of the textual form and come back as `any`. Printing
//! the parsed function reproduces the input text.
//!
//! Two spellings are ambiguous in the textual form and resolved by
//! convention: a trailing digit run on a value reference is always the def
//! number (`x12` is def 12 of `x`, never a variable named `x12`), and `>>`
//! always reads back as the arithmetic right shift.

use crate::error::{Location, ParseError, ParseResult};
use crate::lexer::{tokenize_line, Token};
use gantry_ir::entities::DefNum;
use gantry_ir::static_ir::{
    BlockId, StaticBlock, StaticDef, StaticFunction, StaticInstruction, StaticOperand, StaticUse,
    VarId,
};
use gantry_ir::{types, Constant, Opcode};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Parse the printed form of a function back into a [`StaticFunction`].
///
/// The function name is not part of the textual form; the caller supplies
/// it (tests usually pass the name of the function they printed).
pub fn parse_function(name: &str, text: &str) -> ParseResult<StaticFunction> {
    let mut parser = Parser::new(name);
    for (index, line) in text.lines().enumerate() {
        let location = Location {
            line_number: index + 1,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let tokens = tokenize_line(line, location.line_number)?;
        parser.line(tokens, location)?;
    }
    parser.finish()
}

struct Parser {
    func: StaticFunction,
    vars: HashMap<String, VarId>,
    current: Option<StaticBlock>,
}

impl Parser {
    fn new(name: &str) -> Self {
        Self {
            func: StaticFunction::new(name.to_string()),
            vars: HashMap::new(),
            current: None,
        }
    }

    fn finish(mut self) -> ParseResult<StaticFunction> {
        if let Some(block) = self.current.take() {
            self.func.blocks.push(block);
        }
        Ok(self.func)
    }

    fn line(&mut self, tokens: Vec<Token>, location: Location) -> ParseResult<()> {
        // A block header is `BLOCKn:` on a line of its own.
        if let [Token::Ident(name), Token::Colon] = tokens.as_slice() {
            if block_number(name).is_some() {
                if let Some(done) = self.current.take() {
                    self.func.blocks.push(done);
                }
                self.current = Some(StaticBlock::new(name.clone()));
                return Ok(());
            }
        }
        let inst = {
            let mut cursor = Cursor {
                tokens,
                pos: 0,
                location,
                parser: &mut *self,
            };
            cursor.instruction()?
        };
        match &mut self.current {
            Some(block) => {
                block.push(inst);
                Ok(())
            }
            None => err!(location, "instruction outside of a block"),
        }
    }

    /// Intern a variable name, growing the variable table on first sight.
    fn intern(&mut self, name: &str) -> VarId {
        if let Some(&var) = self.vars.get(name) {
            return var;
        }
        let var = self.func.variables.push(gantry_ir::StaticVariable {
            name: name.to_string(),
            ty: types::ANY,
            num_defs: 0,
        });
        self.vars.insert(name.to_string(), var);
        var
    }

    /// Record that def `num` of `var` exists.
    fn saw_def(&mut self, var: VarId, num: DefNum) {
        let entry = &mut self.func.variables[var];
        entry.num_defs = entry.num_defs.max(num.as_u32() + 1);
    }
}

/// `BLOCKn` -> `n`, or `None` if the name is not a block reference.
fn block_number(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("BLOCK")?;
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// `x12` -> `("x", 12)`: the trailing digit run is the def number.
fn split_value_ref(name: &str) -> Option<(&str, u32)> {
    let cut = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if cut.len() == name.len() || cut.is_empty() {
        return None;
    }
    let num = name[cut.len()..].parse().ok()?;
    Some((cut, num))
}

fn binary_opcode(op: &str) -> Option<Opcode> {
    Some(match op {
        "==" => Opcode::Eq,
        "!=" => Opcode::Ne,
        "<" => Opcode::Lt,
        "<=" => Opcode::Le,
        ">" => Opcode::Gt,
        ">=" => Opcode::Ge,
        "+" => Opcode::Add,
        "-" => Opcode::Sub,
        "*" => Opcode::Mul,
        "/" => Opcode::Div,
        "%" => Opcode::Mod,
        "&&" => Opcode::Land,
        "||" => Opcode::Lor,
        "&" => Opcode::Band,
        "|" => Opcode::Bor,
        "^" => Opcode::Bxor,
        "<<" => Opcode::Bshiftl,
        ">>" => Opcode::Bashiftr,
        _ => return None,
    })
}

struct Cursor<'a> {
    tokens: Vec<Token>,
    pos: usize,
    location: Location,
    parser: &'a mut Parser,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token, what: &str) -> ParseResult<()> {
        match self.next() {
            Some(found) if found == token => Ok(()),
            _ => err!(self.location, "expected {}", what),
        }
    }

    fn done(&self) -> bool {
        self.pos == self.tokens.len()
    }

    fn instruction(&mut self) -> ParseResult<StaticInstruction> {
        let first = match self.next() {
            Some(token) => token,
            None => return err!(self.location, "empty instruction"),
        };
        match first {
            Token::Ident(word) => match word.as_str() {
                "br" => self.cbranch(),
                "ubr" => {
                    let target = self.operand()?;
                    Ok(StaticInstruction::new(
                        Opcode::Ucbranch,
                        None,
                        smallvec::smallvec![target],
                    ))
                }
                "return" => {
                    let mut operands: SmallVec<[StaticOperand; 2]> = SmallVec::new();
                    while !self.done() {
                        operands.push(self.operand()?);
                    }
                    Ok(StaticInstruction::new(Opcode::Ret, None, operands))
                }
                "terminate" => Ok(StaticInstruction::new(
                    Opcode::Terminate,
                    None,
                    SmallVec::new(),
                )),
                "unreachable" => Ok(StaticInstruction::new(
                    Opcode::Unreachable,
                    None,
                    SmallVec::new(),
                )),
                _ => {
                    if self.peek() == Some(&Token::LParen) {
                        // A void call: `fname (args)`.
                        self.next();
                        let operands = self.call_operands(&word)?;
                        return Ok(StaticInstruction::new(Opcode::Call, None, operands));
                    }
                    // Otherwise this must be `def = rhs`.
                    let def = self.value_def(&word)?;
                    self.expect(Token::Equal, "`=` after def")?;
                    self.rhs(def)
                }
            },
            other => err!(self.location, "unexpected token {:?}", other),
        }
    }

    fn cbranch(&mut self) -> ParseResult<StaticInstruction> {
        let cond = self.operand()?;
        self.expect(Token::Question, "`?` in conditional branch")?;
        let then_target = self.operand()?;
        self.expect(Token::Colon, "`:` in conditional branch")?;
        let else_target = self.operand()?;
        Ok(StaticInstruction::new(
            Opcode::Cbranch,
            None,
            smallvec::smallvec![cond, then_target, else_target],
        ))
    }

    fn value_def(&mut self, name: &str) -> ParseResult<StaticDef> {
        match split_value_ref(name) {
            Some((base, num)) => {
                let var = self.parser.intern(base);
                let num = DefNum::from_u32(num);
                self.parser.saw_def(var, num);
                Ok(StaticDef { var, num })
            }
            None => err!(self.location, "`{}` is not a def reference", name),
        }
    }

    fn rhs(&mut self, def: StaticDef) -> ParseResult<StaticInstruction> {
        match self.next() {
            Some(Token::Ident(word)) => match word.as_str() {
                "phi" => self.phi(def),
                "convert" => {
                    let operand = self.operand()?;
                    Ok(StaticInstruction::new(
                        Opcode::Convert,
                        Some(def),
                        smallvec::smallvec![operand],
                    ))
                }
                "fetch" => {
                    let operand = self.operand()?;
                    Ok(StaticInstruction::new(
                        Opcode::Fetch,
                        Some(def),
                        smallvec::smallvec![operand],
                    ))
                }
                _ => {
                    if self.peek() == Some(&Token::LParen) {
                        self.next();
                        let operands = self.call_operands(&word)?;
                        return Ok(StaticInstruction::new(Opcode::Call, Some(def), operands));
                    }
                    // A plain value reference: back up and read it as the
                    // first operand of an assign or a binary instruction.
                    self.pos -= 1;
                    self.assign_or_binary(def)
                }
            },
            Some(Token::Op(op)) => {
                // Unary sigils glue to their operand: `-a`, `!a`, `~a`.
                let opcode = match op {
                    "-" => Opcode::Neg,
                    "!" => Opcode::Lnot,
                    "~" => Opcode::Bnot,
                    _ => return err!(self.location, "`{}` cannot start an instruction", op),
                };
                let operand = self.operand()?;
                Ok(StaticInstruction::new(
                    opcode,
                    Some(def),
                    smallvec::smallvec![operand],
                ))
            }
            Some(_) => {
                self.pos -= 1;
                self.assign_or_binary(def)
            }
            None => err!(self.location, "missing right-hand side"),
        }
    }

    fn assign_or_binary(&mut self, def: StaticDef) -> ParseResult<StaticInstruction> {
        let lhs = self.operand()?;
        if self.done() {
            return Ok(StaticInstruction::new(
                Opcode::Assign,
                Some(def),
                smallvec::smallvec![lhs],
            ));
        }
        let opcode = match self.next() {
            Some(Token::Op(op)) => match binary_opcode(op) {
                Some(opcode) => opcode,
                None => return err!(self.location, "unknown operator `{}`", op),
            },
            // `rem` is the one word-spelled binary operator.
            Some(Token::Ident(word)) if word == "rem" => Opcode::Rem,
            _ => return err!(self.location, "expected a binary operator"),
        };
        let rhs = self.operand()?;
        Ok(StaticInstruction::new(
            opcode,
            Some(def),
            smallvec::smallvec![lhs, rhs],
        ))
    }

    fn phi(&mut self, def: StaticDef) -> ParseResult<StaticInstruction> {
        self.expect(Token::LParen, "`(` after phi")?;
        let mut operands: SmallVec<[StaticOperand; 2]> = SmallVec::new();
        loop {
            let value = self.operand()?;
            self.expect(Token::Colon, "`:` in phi pair")?;
            let block = self.operand()?;
            if block.as_block().is_none() {
                return err!(self.location, "phi pair needs a block reference");
            }
            // Storage order is block first, value second.
            operands.push(block);
            operands.push(value);
            match self.next() {
                Some(Token::Op("|")) => continue,
                Some(Token::RParen) => break,
                _ => return err!(self.location, "expected `|` or `)` in phi"),
            }
        }
        Ok(StaticInstruction::new(Opcode::Phi, Some(def), operands))
    }

    fn call_operands(&mut self, fname: &str) -> ParseResult<SmallVec<[StaticOperand; 2]>> {
        let mut operands: SmallVec<[StaticOperand; 2]> = SmallVec::new();
        operands.push(Constant::Str(fname.to_string()).into());
        if self.peek() == Some(&Token::RParen) {
            self.next();
            return Ok(operands);
        }
        loop {
            operands.push(self.operand()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => return err!(self.location, "expected `,` or `)` in call"),
            }
        }
        Ok(operands)
    }

    fn operand(&mut self) -> ParseResult<StaticOperand> {
        match self.next() {
            Some(Token::Int(value)) => Ok(Constant::Int(value).into()),
            Some(Token::Float(value)) => Ok(Constant::Float(value).into()),
            Some(Token::Str(value)) => Ok(Constant::Str(value).into()),
            Some(Token::Char(value)) => Ok(Constant::Char(value).into()),
            Some(Token::Undef(name)) => {
                let var = self.parser.intern(&name);
                Ok(StaticUse::undefined(var).into())
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Constant::Bool(true).into()),
                "false" => Ok(Constant::Bool(false).into()),
                _ => {
                    if let Some(number) = block_number(&name) {
                        return Ok(BlockId::from_u32(number).into());
                    }
                    match split_value_ref(&name) {
                        Some((base, num)) => {
                            let var = self.parser.intern(base);
                            let num = DefNum::from_u32(num);
                            self.parser.saw_def(var, num);
                            Ok(StaticUse::defined(var, num).into())
                        }
                        None => err!(self.location, "`{}` is not an operand", name),
                    }
                }
            },
            _ => err!(self.location, "expected an operand"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = "BLOCK0:\n  \
           cond0 = true\n  \
           br cond0 ? BLOCK1 : BLOCK2\n\
         BLOCK1:\n  \
           x0 = 1\n  \
           ubr BLOCK3\n\
         BLOCK2:\n  \
           x1 = 2\n  \
           ubr BLOCK3\n\
         BLOCK3:\n  \
           x2 = phi (x0 : BLOCK1 | x1 : BLOCK2)\n  \
           return x2\n";

    #[test]
    fn parse_and_reprint() {
        let func = parse_function("f", PROGRAM).unwrap();
        assert_eq!(func.blocks.len(), 4);
        assert_eq!(func.to_string(), PROGRAM);
    }

    #[test]
    fn def_counts_are_recovered() {
        let func = parse_function("f", PROGRAM).unwrap();
        let x = func
            .variables
            .keys()
            .find(|&v| func.variable(v).name == "x")
            .unwrap();
        assert_eq!(func.variable(x).num_defs, 3);
    }

    #[test]
    fn undefined_uses_reprint() {
        let text = "BLOCK0:\n  x0 = phi (x?? : BLOCK1 | x1 : BLOCK2)\n  terminate\n";
        let func = parse_function("f", text).unwrap();
        assert_eq!(func.to_string(), text);
    }

    #[test]
    fn traps_reprint() {
        let text = "BLOCK5:\n  \
            print_error (\"The variable `x` was uninitialized at this time.\")\n  \
            unreachable\n";
        let func = parse_function("f", text).unwrap();
        assert_eq!(func.to_string(), text);
    }

    #[test]
    fn unary_and_binary_spellings() {
        let text = "BLOCK0:\n  \
            y0 = -x0\n  \
            y1 = !c0\n  \
            y2 = ~m0\n  \
            y3 = x0 rem x1\n  \
            y4 = x0 >> x1\n  \
            terminate\n";
        let func = parse_function("f", text).unwrap();
        assert_eq!(func.to_string(), text);
        assert_eq!(func.blocks.values().next().unwrap().insts[3].opcode, Opcode::Rem);
        assert_eq!(
            func.blocks.values().next().unwrap().insts[4].opcode,
            Opcode::Bashiftr
        );
    }

    #[test]
    fn instruction_outside_block_is_rejected() {
        let err = parse_function("f", "x0 = 1\n").unwrap_err();
        assert_eq!(err.location.line_number, 1);
    }

    #[test]
    fn malformed_phi_is_rejected() {
        let err = parse_function("f", "BLOCK0:\n  x0 = phi (x1 : y2)\n").unwrap_err();
        assert_eq!(err.location.line_number, 2);
    }
}
