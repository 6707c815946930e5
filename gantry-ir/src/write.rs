//! Converting the static IR to text.
//!
//! Each block prints as `BLOCKn:` followed by its instructions, one per
//! line, indented by two spaces. The per-category instruction formats are
//! fixed and the mirror parser in `gantry-reader` accepts exactly this
//! grammar, so printing must stay deterministic.

use crate::instructions::{Arity, Opcode};
use crate::static_ir::{StaticFunction, StaticInstruction, StaticOperand, StaticUse};
use core::fmt::{self, Write};

/// Write `func` in the textual static form.
pub fn write_function(w: &mut dyn Write, func: &StaticFunction) -> fmt::Result {
    for (_, block) in func.blocks.iter() {
        writeln!(w, "{}:", block.name)?;
        for inst in &block.insts {
            write!(w, "  ")?;
            write_instruction(w, func, inst)?;
            writeln!(w)?;
        }
    }
    Ok(())
}

fn write_use(w: &mut dyn Write, func: &StaticFunction, u: &StaticUse) -> fmt::Result {
    write!(w, "{}", func.variable(u.var).name)?;
    match u.num.expand() {
        Some(num) => write!(w, "{num}"),
        None => write!(w, "??"),
    }
}

fn write_operand(w: &mut dyn Write, func: &StaticFunction, operand: &StaticOperand) -> fmt::Result {
    match operand {
        StaticOperand::Constant(constant) => write!(w, "{constant}"),
        StaticOperand::Use(u) => write_use(w, func, u),
        StaticOperand::Block(block) => write!(w, "{block}"),
    }
}

fn write_def_prefix(
    w: &mut dyn Write,
    func: &StaticFunction,
    inst: &StaticInstruction,
) -> fmt::Result {
    if let Some(def) = &inst.def {
        write!(w, "{}{} = ", func.variable(def.var).name, def.num)?;
    }
    Ok(())
}

/// Write one instruction in its per-category format.
pub fn write_instruction(
    w: &mut dyn Write,
    func: &StaticFunction,
    inst: &StaticInstruction,
) -> fmt::Result {
    match inst.opcode {
        Opcode::Phi => {
            write_def_prefix(w, func, inst)?;
            write!(w, "phi (")?;
            for (i, pair) in inst.operands.chunks(2).enumerate() {
                if i > 0 {
                    write!(w, " | ")?;
                }
                write_operand(w, func, &pair[1])?;
                write!(w, " : ")?;
                write_operand(w, func, &pair[0])?;
            }
            write!(w, ")")
        }
        Opcode::Assign => {
            write_def_prefix(w, func, inst)?;
            write_operand(w, func, &inst.operands[0])
        }
        Opcode::Call => {
            write_def_prefix(w, func, inst)?;
            let name = inst.operands[0]
                .as_constant()
                .expect("call names its function with a constant first operand");
            match name {
                crate::constant::Constant::Str(s) => write!(w, "{s}")?,
                other => write!(w, "{other}")?,
            }
            write!(w, " (")?;
            for (i, operand) in inst.operands[1..].iter().enumerate() {
                if i > 0 {
                    write!(w, ", ")?;
                }
                write_operand(w, func, operand)?;
            }
            write!(w, ")")
        }
        Opcode::Cbranch => {
            write!(w, "br ")?;
            write_operand(w, func, &inst.operands[0])?;
            write!(w, " ? ")?;
            write_operand(w, func, &inst.operands[1])?;
            write!(w, " : ")?;
            write_operand(w, func, &inst.operands[2])
        }
        Opcode::Ucbranch => {
            write!(w, "ubr ")?;
            write_operand(w, func, &inst.operands[0])
        }
        Opcode::Ret => {
            write!(w, "return")?;
            for operand in &inst.operands {
                write!(w, " ")?;
                write_operand(w, func, operand)?;
            }
            Ok(())
        }
        opcode => match (opcode.has_def(), opcode.arity()) {
            (false, Arity::Nullary) => write!(w, "{}", opcode.name()),
            (true, Arity::Nullary) => {
                // `name d`: the def trails the name in this category.
                let def = inst.def.as_ref().expect("metadata says this opcode defines");
                write!(w, "{} {}{}", opcode.name(), func.variable(def.var).name, def.num)
            }
            (true, Arity::Unary) => {
                write_def_prefix(w, func, inst)?;
                write!(w, "{}", opcode.name())?;
                // The sigil operators glue to their operand; the named ones
                // take a space.
                if !matches!(opcode, Opcode::Neg | Opcode::Lnot | Opcode::Bnot) {
                    write!(w, " ")?;
                }
                write_operand(w, func, &inst.operands[0])
            }
            (true, Arity::Binary) => {
                write_def_prefix(w, func, inst)?;
                write_operand(w, func, &inst.operands[0])?;
                write!(w, " {} ", opcode.name())?;
                write_operand(w, func, &inst.operands[1])
            }
            _ => {
                debug_assert!(false, "no printed form for opcode {}", opcode.name());
                Ok(())
            }
        },
    }
}

impl fmt::Display for StaticFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_function(f, self)
    }
}

impl fmt::Debug for StaticFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_function(f, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::Constant;
    use crate::entities::DefNum;
    use crate::static_ir::{BlockId, StaticBlock, StaticDef, StaticVariable, VarId};
    use crate::types;
    use smallvec::smallvec;

    fn var(func: &mut StaticFunction, name: &str, num_defs: u32) -> VarId {
        func.variables.push(StaticVariable {
            name: name.to_string(),
            ty: types::INT,
            num_defs,
        })
    }

    fn def(var: VarId, num: u32) -> Option<StaticDef> {
        Some(StaticDef {
            var,
            num: DefNum::from_u32(num),
        })
    }

    fn print(func: &StaticFunction, inst: StaticInstruction) -> String {
        let mut out = String::new();
        write_instruction(&mut out, func, &inst).unwrap();
        out
    }

    #[test]
    fn formats() {
        let mut func = StaticFunction::new("f".to_string());
        let x = var(&mut func, "x", 3);
        let y = var(&mut func, "y", 1);

        let x0 = StaticUse::defined(x, DefNum::from_u32(0));
        let y0 = StaticUse::defined(y, DefNum::from_u32(0));

        assert_eq!(
            print(
                &func,
                StaticInstruction::new(
                    Opcode::Assign,
                    def(x, 0),
                    smallvec![Constant::Int(1).into()]
                )
            ),
            "x0 = 1"
        );
        assert_eq!(
            print(
                &func,
                StaticInstruction::new(
                    Opcode::Add,
                    def(x, 1),
                    smallvec![x0.into(), y0.into()]
                )
            ),
            "x1 = x0 + y0"
        );
        assert_eq!(
            print(
                &func,
                StaticInstruction::new(Opcode::Neg, def(x, 2), smallvec![x0.into()])
            ),
            "x2 = -x0"
        );
        assert_eq!(
            print(
                &func,
                StaticInstruction::new(Opcode::Convert, def(x, 2), smallvec![x0.into()])
            ),
            "x2 = convert x0"
        );
        assert_eq!(
            print(
                &func,
                StaticInstruction::new(
                    Opcode::Phi,
                    def(x, 2),
                    smallvec![
                        BlockId::from_u32(1).into(),
                        x0.into(),
                        BlockId::from_u32(2).into(),
                        StaticUse::undefined(x).into(),
                    ]
                )
            ),
            "x2 = phi (x0 : BLOCK1 | x?? : BLOCK2)"
        );
        assert_eq!(
            print(
                &func,
                StaticInstruction::new(
                    Opcode::Cbranch,
                    None,
                    smallvec![
                        y0.into(),
                        BlockId::from_u32(1).into(),
                        BlockId::from_u32(2).into(),
                    ]
                )
            ),
            "br y0 ? BLOCK1 : BLOCK2"
        );
        assert_eq!(
            print(
                &func,
                StaticInstruction::new(Opcode::Ret, None, smallvec![x0.into()])
            ),
            "return x0"
        );
        assert_eq!(
            print(
                &func,
                StaticInstruction::new(
                    Opcode::Call,
                    None,
                    smallvec![
                        Constant::from("print_error").into(),
                        Constant::from("boom").into(),
                    ]
                )
            ),
            "print_error (\"boom\")"
        );
        assert_eq!(
            print(&func, StaticInstruction::new(Opcode::Unreachable, None, smallvec![])),
            "unreachable"
        );
    }

    #[test]
    fn block_layout() {
        let mut func = StaticFunction::new("f".to_string());
        let x = var(&mut func, "x", 1);
        let mut block = StaticBlock::new("BLOCK0".to_string());
        block.push(StaticInstruction::new(
            Opcode::Assign,
            def(x, 0),
            smallvec![Constant::Int(1).into()],
        ));
        block.push(StaticInstruction::new(
            Opcode::Ret,
            None,
            smallvec![StaticUse::defined(x, DefNum::from_u32(0)).into()],
        ));
        func.blocks.push(block);

        assert_eq!(func.to_string(), "BLOCK0:\n  x0 = 1\n  return x0\n");
    }
}
