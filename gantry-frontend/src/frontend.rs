//! A builder for constructing dynamic-IR functions from a front end.
//!
//! The builder hides the arena plumbing of [`Function`]: it creates blocks
//! together with their leaf components, assembles sequences, forks and
//! loops, and appends instructions to the current block with one
//! convenience method per opcode. Reads of variables are resolved lazily —
//! inserting `x + 1` records a use of `x` against the block's use-timeline
//! and leaves finding the reaching def to the resolution engine at lowering
//! time.

use gantry_ir::instructions::{InstructionData, Opcode};
use gantry_ir::packed_option::PackedOption;
use gantry_ir::types;
use gantry_ir::{
    Block, Component, Constant, Def, Function, Inst, IrResult, Operand, Type, Variable,
};
use smallvec::SmallVec;

/// A value handed to the instruction builder: a variable read or an
/// immediate constant.
#[derive(Debug, Clone)]
pub enum BuilderValue {
    /// Read the variable's reaching def.
    Var(Variable),
    /// An immediate.
    Const(Constant),
}

impl From<Variable> for BuilderValue {
    fn from(var: Variable) -> Self {
        Self::Var(var)
    }
}

impl From<Constant> for BuilderValue {
    fn from(constant: Constant) -> Self {
        Self::Const(constant)
    }
}

impl From<i64> for BuilderValue {
    fn from(value: i64) -> Self {
        Self::Const(Constant::Int(value))
    }
}

impl From<f64> for BuilderValue {
    fn from(value: f64) -> Self {
        Self::Const(Constant::Float(value))
    }
}

impl From<bool> for BuilderValue {
    fn from(value: bool) -> Self {
        Self::Const(Constant::Bool(value))
    }
}

impl From<&str> for BuilderValue {
    fn from(value: &str) -> Self {
        Self::Const(Constant::Str(value.to_string()))
    }
}

/// Structure used for translating a function into the dynamic IR.
pub struct FunctionBuilder<'a> {
    /// The function being built. Public so the caller can re-borrow it.
    pub func: &'a mut Function,
    position: PackedOption<Block>,
}

impl<'a> FunctionBuilder<'a> {
    /// Create a builder over `func`.
    pub fn new(func: &'a mut Function) -> Self {
        Self {
            func,
            position: None.into(),
        }
    }

    /// Create a variable scoped to the whole function.
    pub fn declare_var(&mut self, name: &str, ty: Type) -> Variable {
        self.func.create_variable(name, ty)
    }

    /// Declare a function argument.
    pub fn declare_arg(&mut self, var: Variable) {
        self.func.declare_arg(var);
    }

    /// Declare a function return value.
    pub fn declare_ret(&mut self, var: Variable) {
        self.func.declare_ret(var);
    }

    /// Create a block (with its leaf component).
    pub fn create_block(&mut self) -> Block {
        self.func.make_block()
    }

    /// The component wrapping `block`.
    pub fn component(&self, block: Block) -> Component {
        self.func.block_component(block)
    }

    /// Assemble a sequence component.
    pub fn make_sequence(&mut self, parts: &[Component]) -> Component {
        self.func.make_sequence(parts.to_vec())
    }

    /// Assemble a fork component.
    pub fn make_fork(&mut self, condition: Component, cases: &[Component]) -> Component {
        self.func.make_fork(condition, cases.to_vec())
    }

    /// Assemble a loop component.
    pub fn make_loop(
        &mut self,
        start: Component,
        condition: Component,
        body: Component,
        update: Component,
    ) -> Component {
        self.func.make_loop(start, condition, body, update)
    }

    /// Install the function body component.
    pub fn set_body(&mut self, component: Component) {
        self.func.set_body(component);
    }

    /// Mark `var` as the conditional-branch condition of `block`.
    pub fn set_condition(&mut self, block: Block, var: Variable) {
        self.func.blocks[block].condition = var.into();
    }

    /// After this call, new instructions are appended to `block`.
    pub fn switch_to_block(&mut self, block: Block) {
        self.position = block.into();
    }

    /// Returns an object with one convenience method per instruction that
    /// appends to the current block.
    pub fn ins(&mut self) -> FuncInstBuilder<'_, 'a> {
        let block = self
            .position
            .expect("call switch_to_block before inserting instructions");
        FuncInstBuilder {
            builder: self,
            block,
        }
    }
}

/// Implementation of the per-opcode instruction methods for appending to a
/// block through a [`FunctionBuilder`].
pub struct FuncInstBuilder<'short, 'long: 'short> {
    builder: &'short mut FunctionBuilder<'long>,
    block: Block,
}

macro_rules! binary_ops {
    ($($name:ident => $opcode:ident;)*) => {
        $(
            #[doc = concat!("Append a `", stringify!($name), "` instruction defining `var`.")]
            pub fn $name(
                &mut self,
                var: Variable,
                lhs: impl Into<BuilderValue>,
                rhs: impl Into<BuilderValue>,
            ) -> IrResult<Def> {
                self.binary(Opcode::$opcode, var, lhs.into(), rhs.into())
            }
        )*
    }
}

macro_rules! unary_ops {
    ($($name:ident => $opcode:ident;)*) => {
        $(
            #[doc = concat!("Append a `", stringify!($name), "` instruction defining `var`.")]
            pub fn $name(
                &mut self,
                var: Variable,
                value: impl Into<BuilderValue>,
            ) -> IrResult<Def> {
                self.unary(Opcode::$opcode, var, value.into())
            }
        )*
    }
}

impl<'short, 'long> FuncInstBuilder<'short, 'long> {
    fn func(&mut self) -> &mut Function {
        self.builder.func
    }

    /// The type a `BuilderValue` contributes to result-type computation.
    fn value_ty(&self, value: &BuilderValue) -> Type {
        match value {
            BuilderValue::Var(var) => self.builder.func.variable_type(*var),
            BuilderValue::Const(constant) => constant.ty().unwrap_or(types::ANY),
        }
    }

    /// Turn a `BuilderValue` into an instruction operand, registering the
    /// use for variable reads.
    fn operand(&mut self, value: BuilderValue) -> IrResult<Operand> {
        let block = self.block;
        Ok(match value {
            BuilderValue::Var(var) => self.func().make_use(var, block)?.into(),
            BuilderValue::Const(constant) => constant.into(),
        })
    }

    fn append(
        &mut self,
        opcode: Opcode,
        def: Option<Def>,
        operands: SmallVec<[Operand; 2]>,
    ) -> IrResult<Inst> {
        let block = self.block;
        let data = InstructionData::new(opcode, def, operands)?;
        Ok(self.func().append_inst(block, data))
    }

    fn binary(
        &mut self,
        opcode: Opcode,
        var: Variable,
        lhs: BuilderValue,
        rhs: BuilderValue,
    ) -> IrResult<Def> {
        let ty = if opcode.is_a(Opcode::Relation) || opcode.is_a(Opcode::Logical) {
            types::BOOL
        } else {
            let meet = self
                .builder
                .func
                .types
                .lca(self.value_ty(&lhs), self.value_ty(&rhs));
            if meet == types::VOID {
                types::ANY
            } else {
                meet
            }
        };
        let lhs = self.operand(lhs)?;
        let rhs = self.operand(rhs)?;
        let def = self.func().create_def(var, ty);
        self.append(opcode, Some(def), smallvec::smallvec![lhs, rhs])?;
        Ok(def)
    }

    fn unary(&mut self, opcode: Opcode, var: Variable, value: BuilderValue) -> IrResult<Def> {
        let ty = match opcode {
            Opcode::Lnot => types::BOOL,
            _ => self.value_ty(&value),
        };
        let operand = self.operand(value)?;
        let def = self.func().create_def(var, ty);
        self.append(opcode, Some(def), smallvec::smallvec![operand])?;
        Ok(def)
    }

    binary_ops! {
        eq => Eq;
        ne => Ne;
        lt => Lt;
        le => Le;
        gt => Gt;
        ge => Ge;
        add => Add;
        sub => Sub;
        mul => Mul;
        div => Div;
        modulo => Mod;
        rem => Rem;
        land => Land;
        lor => Lor;
        band => Band;
        bor => Bor;
        bxor => Bxor;
        bshiftl => Bshiftl;
        bashiftr => Bashiftr;
        blshiftr => Blshiftr;
    }

    unary_ops! {
        neg => Neg;
        lnot => Lnot;
        bnot => Bnot;
    }

    /// Append an `assign` copying `value` into `var`.
    pub fn assign(&mut self, var: Variable, value: impl Into<BuilderValue>) -> IrResult<Def> {
        let value = value.into();
        let ty = self.value_ty(&value);
        let operand = self.operand(value)?;
        let def = self.func().create_def(var, ty);
        self.append(Opcode::Assign, Some(def), smallvec::smallvec![operand])?;
        Ok(def)
    }

    /// Append a `convert` raising `value` to `ty`.
    pub fn convert(
        &mut self,
        var: Variable,
        ty: Type,
        value: impl Into<BuilderValue>,
    ) -> IrResult<Def> {
        let operand = self.operand(value.into())?;
        let def = self.func().create_def(var, ty);
        self.append(Opcode::Convert, Some(def), smallvec::smallvec![operand])?;
        Ok(def)
    }

    /// Append a `fetch` loading the externally defined variable `name`.
    pub fn fetch(&mut self, var: Variable, name: &str) -> IrResult<Def> {
        let def = self.func().create_def(var, types::ANY);
        self.append(
            Opcode::Fetch,
            Some(def),
            smallvec::smallvec![Constant::from(name).into()],
        )?;
        Ok(def)
    }

    /// Append a `call` to the external function `name`. A `None` result
    /// variable makes it a void call.
    pub fn call(
        &mut self,
        result: Option<Variable>,
        name: &str,
        args: Vec<BuilderValue>,
    ) -> IrResult<Option<Def>> {
        let mut operands: SmallVec<[Operand; 2]> = SmallVec::new();
        operands.push(Constant::from(name).into());
        for arg in args {
            let operand = self.operand(arg)?;
            operands.push(operand);
        }
        let def = match result {
            Some(var) => {
                let ty = self.builder.func.variable_type(var);
                Some(self.func().create_def(var, ty))
            }
            None => None,
        };
        self.append(Opcode::Call, def, operands)?;
        Ok(def)
    }

    /// Append an explicit `return`. Lowering checks the operand count
    /// against the declared return list.
    pub fn ret(&mut self, values: Vec<BuilderValue>) -> IrResult<Inst> {
        let mut operands: SmallVec<[Operand; 2]> = SmallVec::new();
        for value in values {
            let operand = self.operand(value)?;
            operands.push(operand);
        }
        self.append(Opcode::Ret, None, operands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower_function;
    use gantry_ir::types;

    /// Straight-line code: defs and uses resolve inside one block.
    #[test]
    fn straight_line() {
        let mut func = Function::new("straight_line");
        {
            let mut builder = FunctionBuilder::new(&mut func);
            let entry = builder.create_block();
            let entry_c = builder.component(entry);
            let seq = builder.make_sequence(&[entry_c]);
            builder.set_body(seq);

            let x = builder.declare_var("x", types::INT);
            let y = builder.declare_var("y", types::INT);
            let z = builder.declare_var("z", types::INT);
            builder.declare_ret(z);

            builder.switch_to_block(entry);
            builder.ins().assign(x, 1).unwrap();
            builder.ins().assign(y, 2).unwrap();
            builder.ins().add(z, x, y).unwrap();
        }
        let lowered = lower_function(&mut func).unwrap();
        assert_eq!(
            lowered.to_string(),
            "BLOCK0:\n  \
               x0 = 1\n  \
               y0 = 2\n  \
               z0 = x0 + y0\n  \
               return z0\n"
        );
    }

    /// Build the `entry -> (then | else) -> join` diamond used by several
    /// tests, returning `(entry, then, else, join)`.
    fn build_diamond(builder: &mut FunctionBuilder) -> (Block, Block, Block, Block) {
        let entry = builder.create_block();
        let then_block = builder.create_block();
        let else_block = builder.create_block();
        let join = builder.create_block();
        let entry_c = builder.component(entry);
        let then_c = builder.component(then_block);
        let else_c = builder.component(else_block);
        let join_c = builder.component(join);
        let fork = builder.make_fork(entry_c, &[then_c, else_c]);
        let seq = builder.make_sequence(&[fork, join_c]);
        builder.set_body(seq);
        (entry, then_block, else_block, join)
    }

    /// Build the `start -> cond -> body -> update -> cond, cond -> exit`
    /// loop shape, returning `(start, cond, body, update, exit)`.
    fn build_loop(builder: &mut FunctionBuilder) -> (Block, Block, Block, Block, Block) {
        let start = builder.create_block();
        let cond = builder.create_block();
        let body = builder.create_block();
        let update = builder.create_block();
        let exit = builder.create_block();
        let start_c = builder.component(start);
        let cond_c = builder.component(cond);
        let body_c = builder.component(body);
        let update_c = builder.component(update);
        let exit_c = builder.component(exit);
        let lp = builder.make_loop(start_c, cond_c, body_c, update_c);
        let seq = builder.make_sequence(&[lp, exit_c]);
        builder.set_body(seq);
        (start, cond, body, update, exit)
    }

    /// Both fork cases assign the variable, so the join materializes a phi
    /// over the two defs.
    #[test]
    fn if_else_merge() {
        let mut func = Function::new("if_else_merge");
        {
            let mut builder = FunctionBuilder::new(&mut func);
            let (entry, then_block, else_block, _) = build_diamond(&mut builder);

            let cond = builder.declare_var("cond", types::BOOL);
            let x = builder.declare_var("x", types::INT);
            builder.declare_ret(x);

            builder.switch_to_block(entry);
            builder.ins().assign(cond, true).unwrap();
            builder.set_condition(entry, cond);

            builder.switch_to_block(then_block);
            builder.ins().assign(x, 1).unwrap();

            builder.switch_to_block(else_block);
            builder.ins().assign(x, 2).unwrap();
        }
        let lowered = lower_function(&mut func).unwrap();
        assert_eq!(
            lowered.to_string(),
            "BLOCK0:\n  \
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
               return x2\n"
        );
    }

    /// A loop-carried induction variable: the condition block gets the phi
    /// over the initial and the updated def.
    #[test]
    fn loop_carried_value() {
        let mut func = Function::new("loop_carried_value");
        {
            let mut builder = FunctionBuilder::new(&mut func);
            let (start, cond, body, _, _) = build_loop(&mut builder);

            let i = builder.declare_var("i", types::INT);
            let c = builder.declare_var("c", types::BOOL);
            builder.declare_ret(i);

            builder.switch_to_block(start);
            builder.ins().assign(i, 0).unwrap();

            builder.switch_to_block(cond);
            builder.ins().lt(c, i, 10).unwrap();
            builder.set_condition(cond, c);

            builder.switch_to_block(body);
            builder.ins().add(i, i, 1).unwrap();
        }
        let lowered = lower_function(&mut func).unwrap();
        assert_eq!(
            lowered.to_string(),
            "BLOCK0:\n  \
               i0 = 0\n  \
               ubr BLOCK1\n\
             BLOCK1:\n  \
               i2 = phi (i0 : BLOCK0 | i1 : BLOCK3)\n  \
               c0 = i2 < 10\n  \
               br c0 ? BLOCK2 : BLOCK4\n\
             BLOCK2:\n  \
               i1 = i2 + 1\n  \
               ubr BLOCK3\n\
             BLOCK3:\n  \
               ubr BLOCK1\n\
             BLOCK4:\n  \
               return i2\n"
        );
    }

    /// Only the then-case assigns: the join phi has an undefined input, so
    /// the variable gets a determinator and the use a guarded branch into a
    /// trap block.
    #[test]
    fn uninitialized_on_one_branch() {
        let mut func = Function::new("uninitialized_on_one_branch");
        {
            let mut builder = FunctionBuilder::new(&mut func);
            let (entry, then_block, _, _) = build_diamond(&mut builder);

            let cond = builder.declare_var("cond", types::BOOL);
            let x = builder.declare_var("x", types::INT);
            builder.declare_ret(x);

            builder.switch_to_block(entry);
            builder.ins().assign(cond, true).unwrap();
            builder.set_condition(entry, cond);

            builder.switch_to_block(then_block);
            builder.ins().assign(x, 1).unwrap();
        }
        let lowered = lower_function(&mut func).unwrap();
        assert_eq!(
            lowered.to_string(),
            "BLOCK0:\n  \
               .det.x0 = false\n  \
               cond0 = true\n  \
               br cond0 ? BLOCK1 : BLOCK2\n\
             BLOCK1:\n  \
               x0 = 1\n  \
               .det.x1 = true\n  \
               ubr BLOCK3\n\
             BLOCK2:\n  \
               ubr BLOCK3\n\
             BLOCK3:\n  \
               x1 = phi (x0 : BLOCK1 | x?? : BLOCK2)\n  \
               .det.x2 = phi (.det.x1 : BLOCK1 | .det.x0 : BLOCK2)\n  \
               br .det.x2 ? BLOCK4 : BLOCK5\n\
             BLOCK4:\n  \
               return x1\n\
             BLOCK5:\n  \
               print_error (\"The variable `x` was uninitialized at this time.\")\n  \
               unreachable\n"
        );
        gantry_ir::verifier::verify_function(&func).unwrap();
    }

    /// Mixed int/float defs meet at the join: the int side gets a convert
    /// in its predecessor block and the phi comes out float.
    #[test]
    fn type_coalescing_at_phi() {
        let mut func = Function::new("type_coalescing_at_phi");
        {
            let mut builder = FunctionBuilder::new(&mut func);
            let (entry, then_block, else_block, _) = build_diamond(&mut builder);

            let cond = builder.declare_var("cond", types::BOOL);
            let x = builder.declare_var("x", types::ANY);
            builder.declare_ret(x);

            builder.switch_to_block(entry);
            builder.ins().assign(cond, true).unwrap();
            builder.set_condition(entry, cond);

            builder.switch_to_block(then_block);
            builder.ins().assign(x, 1).unwrap();

            builder.switch_to_block(else_block);
            builder.ins().assign(x, 2.0).unwrap();
        }
        let lowered = lower_function(&mut func).unwrap();
        assert_eq!(
            lowered.to_string(),
            "BLOCK0:\n  \
               cond0 = true\n  \
               br cond0 ? BLOCK1 : BLOCK2\n\
             BLOCK1:\n  \
               x0 = 1\n  \
               x2 = convert x0\n  \
               ubr BLOCK3\n\
             BLOCK2:\n  \
               x1 = 2\n  \
               ubr BLOCK3\n\
             BLOCK3:\n  \
               x3 = phi (x2 : BLOCK1 | x1 : BLOCK2)\n  \
               return x3\n"
        );
        // The reconciled variable type, and therefore the returned value,
        // is float.
        let x_id = lowered.rets[0];
        assert_eq!(lowered.variable(x_id).ty, types::FLOAT);
    }

    /// Two nested loops: each condition block carries exactly the phi for
    /// its loop-carried variable, and the outer induction variable crosses
    /// the inner loop without growing a phi there.
    #[test]
    fn nested_loops() {
        let mut func = Function::new("nested_loops");
        {
            let mut builder = FunctionBuilder::new(&mut func);
            let outer_start = builder.create_block();
            let outer_cond = builder.create_block();
            let inner_start = builder.create_block();
            let inner_cond = builder.create_block();
            let inner_body = builder.create_block();
            let inner_update = builder.create_block();
            let outer_update = builder.create_block();
            let exit = builder.create_block();

            let inner_start_c = builder.component(inner_start);
            let inner_cond_c = builder.component(inner_cond);
            let inner_body_c = builder.component(inner_body);
            let inner_update_c = builder.component(inner_update);
            let inner = builder.make_loop(inner_start_c, inner_cond_c, inner_body_c, inner_update_c);

            let outer_start_c = builder.component(outer_start);
            let outer_cond_c = builder.component(outer_cond);
            let outer_update_c = builder.component(outer_update);
            let outer = builder.make_loop(outer_start_c, outer_cond_c, inner, outer_update_c);

            let exit_c = builder.component(exit);
            let seq = builder.make_sequence(&[outer, exit_c]);
            builder.set_body(seq);

            let i = builder.declare_var("i", types::INT);
            let j = builder.declare_var("j", types::INT);
            let s = builder.declare_var("s", types::INT);
            let oc = builder.declare_var("oc", types::BOOL);
            let ic = builder.declare_var("ic", types::BOOL);
            builder.declare_ret(s);

            builder.switch_to_block(outer_start);
            builder.ins().assign(i, 0).unwrap();
            builder.ins().assign(j, 0).unwrap();

            builder.switch_to_block(outer_cond);
            builder.ins().lt(oc, i, 10).unwrap();
            builder.set_condition(outer_cond, oc);

            builder.switch_to_block(inner_cond);
            builder.ins().lt(ic, j, 5).unwrap();
            builder.set_condition(inner_cond, ic);

            builder.switch_to_block(inner_body);
            builder.ins().add(j, j, 1).unwrap();

            builder.switch_to_block(outer_update);
            builder.ins().add(i, i, 1).unwrap();

            builder.switch_to_block(exit);
            builder.ins().add(s, i, j).unwrap();
        }
        let lowered = lower_function(&mut func).unwrap();
        assert_eq!(
            lowered.to_string(),
            "BLOCK0:\n  \
               i0 = 0\n  \
               j0 = 0\n  \
               ubr BLOCK1\n\
             BLOCK1:\n  \
               i2 = phi (i0 : BLOCK0 | i1 : BLOCK6)\n  \
               j3 = phi (j0 : BLOCK0 | j2 : BLOCK6)\n  \
               oc0 = i2 < 10\n  \
               br oc0 ? BLOCK2 : BLOCK7\n\
             BLOCK2:\n  \
               ubr BLOCK3\n\
             BLOCK3:\n  \
               j2 = phi (j3 : BLOCK2 | j1 : BLOCK5)\n  \
               ic0 = j2 < 5\n  \
               br ic0 ? BLOCK4 : BLOCK6\n\
             BLOCK4:\n  \
               j1 = j2 + 1\n  \
               ubr BLOCK5\n\
             BLOCK5:\n  \
               ubr BLOCK3\n\
             BLOCK6:\n  \
               i1 = i2 + 1\n  \
               ubr BLOCK1\n\
             BLOCK7:\n  \
               s0 = i2 + j3\n  \
               return s0\n"
        );
        // `i` crosses the inner loop without growing a phi there: its defs
        // are the initializer, the increment, and the outer-condition phi.
        let i_id = lowered
            .variables
            .keys()
            .find(|&v| lowered.variable(v).name == "i")
            .unwrap();
        assert_eq!(lowered.variable(i_id).num_defs, 3);
        gantry_ir::verifier::verify_function(&func).unwrap();
    }

    /// An explicit `return` with the wrong operand count is rejected at
    /// lowering.
    #[test]
    fn explicit_return_arity_is_checked() {
        let mut func = Function::new("bad_return");
        {
            let mut builder = FunctionBuilder::new(&mut func);
            let entry = builder.create_block();
            let entry_c = builder.component(entry);
            let seq = builder.make_sequence(&[entry_c]);
            builder.set_body(seq);

            let x = builder.declare_var("x", types::INT);
            builder.declare_ret(x);

            builder.switch_to_block(entry);
            builder.ins().assign(x, 1).unwrap();
            builder.ins().ret(vec![x.into(), x.into()]).unwrap();
        }
        let err = lower_function(&mut func).unwrap_err();
        assert!(matches!(err, gantry_ir::IrError::TypeMismatch { .. }));
    }

    /// Lowering twice produces the same program: resolution and the
    /// determinator pass reach a fixed point after the first run.
    #[test]
    fn lowering_is_idempotent() {
        let mut func = Function::new("idempotent");
        {
            let mut builder = FunctionBuilder::new(&mut func);
            let (entry, then_block, _, _) = build_diamond(&mut builder);

            let cond = builder.declare_var("cond", types::BOOL);
            let x = builder.declare_var("x", types::INT);
            builder.declare_ret(x);

            builder.switch_to_block(entry);
            builder.ins().assign(cond, true).unwrap();
            builder.set_condition(entry, cond);

            builder.switch_to_block(then_block);
            builder.ins().assign(x, 1).unwrap();
        }
        let first = lower_function(&mut func).unwrap();
        let second = lower_function(&mut func).unwrap();
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(first, second);
    }
}
