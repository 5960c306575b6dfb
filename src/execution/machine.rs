use super::{CallTrace, Trap, Watchdog};
use crate::ir::{BinaryOp, CmpPredicate, Reg};
use crate::toolchain::{Image, Inst, LinkedFunction};

/// Default call depth limit.
pub const DEFAULT_MAX_DEPTH: usize = 512;

const WATCHDOG_INTERVAL: u64 = 1024;

/// Interpreter for a linked [`Image`].
///
/// The mutant selector, coverage trace and watchdog are all per execution;
/// the image itself is never modified and can be shared between threads.
pub struct Machine<'a> {
    image: &'a Image,
    selector: Option<&'a str>,
    trace: Option<&'a CallTrace>,
    watchdog: Option<&'a Watchdog>,
    max_depth: usize,
    steps: u64,
    stdout: String,
}

impl<'a> Machine<'a> {
    /// Machine over `image` with no selector, trace or watchdog.
    pub fn new(image: &'a Image) -> Self {
        Self {
            image,
            selector: None,
            trace: None,
            watchdog: None,
            max_depth: DEFAULT_MAX_DEPTH,
            steps: 0,
            stdout: String::new(),
        }
    }

    /// Activate the mutant with id `selector` in every trampoline.
    pub fn with_selector(mut self, selector: Option<&'a str>) -> Self {
        self.selector = selector;
        self
    }

    /// Record coverage probe hits into `trace`.
    pub fn with_trace(mut self, trace: Option<&'a CallTrace>) -> Self {
        self.trace = trace;
        self
    }

    /// Stop with [`Trap::Timeout`] once `watchdog` expires.
    pub fn with_watchdog(mut self, watchdog: &'a Watchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Override the call depth limit.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Output printed so far.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Call a function by symbol.
    pub fn call_symbol(&mut self, symbol: &str, args: &[i64]) -> Result<i64, Trap> {
        let index = self
            .image
            .symbol(symbol)
            .ok_or_else(|| Trap::UndefinedSymbol(symbol.to_string()))?;
        self.call(index, args)
    }

    /// Call the function at `index`. Its frame is depth 0.
    ///
    /// Frames live on an explicit stack, so call depth is bounded only by
    /// the configured limit and never by the host thread's stack.
    pub fn call(&mut self, index: usize, args: &[i64]) -> Result<i64, Trap> {
        let image = self.image;
        let mut stack = Vec::new();
        self.push_frame(&mut stack, index, args, None)?;

        while let Some(frame) = stack.last_mut() {
            self.tick()?;
            let function = linked(image, frame.function)?;
            let inst = function
                .code
                .get(frame.pc)
                .ok_or_else(|| malformed(function, format!("fell off the end at {}", frame.pc)))?;
            frame.pc += 1;
            let regs = &mut frame.regs;
            match inst {
                Inst::Const { dst, value } => set(regs, function, *dst, *value)?,
                Inst::Binary {
                    dst,
                    kind,
                    lhs,
                    rhs,
                } => {
                    let a = get(regs, function, *lhs)?;
                    let b = get(regs, function, *rhs)?;
                    set(regs, function, *dst, binary(*kind, a, b, function)?)?;
                }
                Inst::Compare {
                    dst,
                    pred,
                    lhs,
                    rhs,
                } => {
                    let a = get(regs, function, *lhs)?;
                    let b = get(regs, function, *rhs)?;
                    set(regs, function, *dst, compare(*pred, a, b) as i64)?;
                }
                Inst::Call { dst, callee, args } => {
                    let values = args
                        .iter()
                        .map(|r| get(regs, function, *r))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.push_frame(&mut stack, *callee, &values, *dst)?;
                }
                Inst::Jump(target) => frame.pc = *target,
                Inst::Branch {
                    cond,
                    then_target,
                    else_target,
                } => {
                    frame.pc = if get(regs, function, *cond)? != 0 {
                        *then_target
                    } else {
                        *else_target
                    };
                }
                Inst::Return(value) => {
                    let value = match value {
                        Some(reg) => get(regs, function, *reg)?,
                        None => 0,
                    };
                    let result_reg = frame.result_reg;
                    stack.pop();
                    let Some(caller) = stack.last_mut() else {
                        return Ok(value);
                    };
                    if let Some(dst) = result_reg {
                        set(&mut caller.regs, linked(image, caller.function)?, dst, value)?;
                    }
                }
                Inst::Print(value) => {
                    let v = get(regs, function, *value)?;
                    self.stdout.push_str(&v.to_string());
                    self.stdout.push('\n');
                }
                Inst::Trap(message) => {
                    return Err(Trap::Explicit {
                        function: function.symbol.clone(),
                        message: message.clone(),
                    });
                }
                Inst::Nop => {}
                Inst::Dispatch { pristine, targets } => {
                    let body = self
                        .selector
                        .and_then(|selected| {
                            targets
                                .iter()
                                .find(|(mutation_id, _)| mutation_id == selected)
                        })
                        .map(|(_, body)| *body)
                        .unwrap_or(*pristine);
                    let forwarded = regs[..function.params as usize].to_vec();
                    let result_reg = frame.result_reg;
                    // The selected body replaces the trampoline frame, so a
                    // mutated function costs no extra call depth.
                    stack.pop();
                    self.push_frame(&mut stack, body, &forwarded, result_reg)?;
                }
            }
        }
        Err(Trap::Malformed {
            function: format!("#{index}"),
            detail: "call stack emptied without a return".to_string(),
        })
    }

    fn push_frame(
        &self,
        stack: &mut Vec<Frame>,
        index: usize,
        args: &[i64],
        result_reg: Option<Reg>,
    ) -> Result<(), Trap> {
        let function = linked(self.image, index)?;
        let depth = stack.len();
        if depth >= self.max_depth {
            return Err(Trap::StackOverflow(self.max_depth));
        }
        if args.len() != function.params as usize {
            return Err(Trap::ArityMismatch {
                symbol: function.symbol.clone(),
                expected: function.params,
                given: args.len(),
            });
        }
        if let (Some(trace), Some(probe)) = (self.trace, function.probe) {
            trace.record(probe, depth as u32);
        }

        let mut regs = vec![0i64; (function.registers as usize).max(args.len())];
        regs[..args.len()].copy_from_slice(args);
        stack.push(Frame {
            function: index,
            regs,
            pc: 0,
            result_reg,
        });
        Ok(())
    }

    fn tick(&mut self) -> Result<(), Trap> {
        self.steps += 1;
        if self.steps % WATCHDOG_INTERVAL == 0 {
            if let Some(watchdog) = self.watchdog {
                if watchdog.is_expired() {
                    return Err(Trap::Timeout);
                }
            }
        }
        Ok(())
    }
}

/// One activation on the interpreter's call stack.
#[derive(Debug)]
struct Frame {
    function: usize,
    regs: Vec<i64>,
    pc: usize,
    // Caller register receiving the return value.
    result_reg: Option<Reg>,
}

fn linked(image: &Image, index: usize) -> Result<&LinkedFunction, Trap> {
    image
        .function(index)
        .ok_or_else(|| Trap::UndefinedSymbol(format!("#{index}")))
}

fn malformed(function: &LinkedFunction, detail: String) -> Trap {
    Trap::Malformed {
        function: function.symbol.clone(),
        detail,
    }
}

fn get(regs: &[i64], function: &LinkedFunction, reg: Reg) -> Result<i64, Trap> {
    regs.get(reg as usize)
        .copied()
        .ok_or_else(|| malformed(function, format!("register r{reg} out of range")))
}

fn set(regs: &mut [i64], function: &LinkedFunction, reg: Reg, value: i64) -> Result<(), Trap> {
    match regs.get_mut(reg as usize) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(malformed(function, format!("register r{reg} out of range"))),
    }
}

fn binary(kind: BinaryOp, a: i64, b: i64, function: &LinkedFunction) -> Result<i64, Trap> {
    let shift = (b & 63) as u32;
    Ok(match kind {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::SDiv | BinaryOp::SRem if b == 0 => {
            return Err(Trap::DivisionByZero(function.symbol.clone()));
        }
        BinaryOp::SDiv => a.wrapping_div(b),
        BinaryOp::SRem => a.wrapping_rem(b),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl(shift),
        BinaryOp::LShr => ((a as u64) >> shift) as i64,
        BinaryOp::AShr => a >> shift,
    })
}

fn compare(pred: CmpPredicate, a: i64, b: i64) -> bool {
    match pred {
        CmpPredicate::Eq => a == b,
        CmpPredicate::Ne => a != b,
        CmpPredicate::Slt => a < b,
        CmpPredicate::Sle => a <= b,
        CmpPredicate::Sgt => a > b,
        CmpPredicate::Sge => a >= b,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ir::{FunctionBuilder, Module};
    use crate::program::Program;
    use crate::toolchain::{Compiler, Mangler};

    fn image_of(functions: Vec<crate::ir::Function>) -> Image {
        let module = functions
            .into_iter()
            .fold(Module::new("m.c"), |m, f| m.with_function(f));
        let program = Program::new(vec![module]);
        let object = Compiler::new(Mangler::with_prefix(""))
            .compile(&program.bitcode()[0], None)
            .expect("module should compile");
        Image::link(&[&object]).expect("image should link")
    }

    fn binary_fn(name: &str, kind: BinaryOp) -> crate::ir::Function {
        let mut f = FunctionBuilder::new(name, 2);
        let r = f.binary(kind, f.param(0), f.param(1));
        f.ret(r);
        f.finish().expect("function should build")
    }

    #[test]
    fn arithmetic_wraps_and_shifts_mask() {
        let image = image_of(vec![
            binary_fn("add", BinaryOp::Add),
            binary_fn("shl", BinaryOp::Shl),
            binary_fn("lshr", BinaryOp::LShr),
            binary_fn("ashr", BinaryOp::AShr),
        ]);
        let mut m = Machine::new(&image);
        assert_eq!(m.call_symbol("add", &[i64::MAX, 1]), Ok(i64::MIN));
        assert_eq!(m.call_symbol("shl", &[1, 65]), Ok(2));
        assert_eq!(m.call_symbol("lshr", &[-1, 60]), Ok(15));
        assert_eq!(m.call_symbol("ashr", &[-16, 2]), Ok(-4));
    }

    #[test]
    fn division_by_zero_traps() {
        let image = image_of(vec![binary_fn("div", BinaryOp::SDiv)]);
        let mut m = Machine::new(&image);
        assert_eq!(m.call_symbol("div", &[7, 2]), Ok(3));
        assert_eq!(
            m.call_symbol("div", &[7, 0]),
            Err(Trap::DivisionByZero("div".to_string()))
        );
    }

    #[test]
    fn unbounded_recursion_overflows() {
        let mut f = FunctionBuilder::new("forever", 0);
        let r = f.call("forever", &[]);
        f.ret(r);
        let image = image_of(vec![f.finish().expect("function should build")]);
        let mut m = Machine::new(&image).with_max_depth(64);
        assert_eq!(m.call_symbol("forever", &[]), Err(Trap::StackOverflow(64)));
    }

    #[test]
    fn expired_watchdog_stops_infinite_loop() {
        let mut f = FunctionBuilder::new("spin", 0);
        let head = f.label();
        f.bind(head).expect("bind head");
        f.jump(head);
        let image = image_of(vec![f.finish().expect("function should build")]);
        let watchdog = Watchdog::new(Duration::ZERO);
        let mut m = Machine::new(&image).with_watchdog(&watchdog);
        assert_eq!(m.call_symbol("spin", &[]), Err(Trap::Timeout));
        assert_eq!(m.steps(), WATCHDOG_INTERVAL);
    }

    #[test]
    fn print_and_trace_are_recorded() {
        let mut leaf = FunctionBuilder::new("leaf", 0);
        let v = leaf.constant(7);
        leaf.print(v);
        leaf.ret(v);
        let mut root = FunctionBuilder::new("root", 0);
        let r = root.call("leaf", &[]);
        root.ret(r);

        let program = Program::new(vec![
            Module::new("m.c")
                .with_function(leaf.finish().expect("leaf builds"))
                .with_function(root.finish().expect("root builds")),
        ]);
        let instrumentation = crate::execution::Instrumentation::record_functions(&program);
        let object = Compiler::new(Mangler::with_prefix(""))
            .compile(&program.bitcode()[0], Some(&instrumentation))
            .expect("module should compile");
        let image = Image::link(&[&object]).expect("image should link");

        let trace = CallTrace::new();
        let mut m = Machine::new(&image).with_trace(Some(&trace));
        assert_eq!(m.call_symbol("root", &[]), Ok(7));
        assert_eq!(m.stdout(), "7\n");

        let leaf_probe = instrumentation
            .probe_for(crate::program::ModuleId(0), "leaf")
            .expect("leaf probe");
        let root_probe = instrumentation
            .probe_for(crate::program::ModuleId(0), "root")
            .expect("root probe");
        assert_eq!(trace.hits(), vec![(leaf_probe, 1), (root_probe, 0)]);
    }
}

#[cfg(test)]
mod tests_sandbox {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::execution::{InlineSandbox, ProcessSandbox};
    use crate::ir::{DispatchTarget, Function, FunctionBuilder, Instruction, Module, Op};
    use crate::program::Program;
    use crate::result::{ExecutionResult, ExecutionStatus};
    use crate::toolchain::{Compiler, Mangler};

    /// `name(n) = n == 0 ? 0 : callee(n - 1) * 1`
    fn down(name: &str, callee: &str) -> Function {
        let mut f = FunctionBuilder::new(name, 1);
        let base = f.label();
        let recurse = f.label();
        let zero = f.constant(0);
        let done = f.compare(CmpPredicate::Eq, f.param(0), zero);
        f.branch(done, base, recurse);
        f.bind(base).expect("base should bind");
        f.ret(zero);
        f.bind(recurse).expect("recurse should bind");
        let one = f.constant(1);
        let next = f.binary(BinaryOp::Sub, f.param(0), one);
        let inner = f.call(callee, &[next]);
        let product = f.binary(BinaryOp::Mul, inner, one);
        f.ret(product);
        f.finish().expect("down should build")
    }

    fn link(module: Module) -> Image {
        let program = Program::new(vec![module]);
        let object = Compiler::new(Mangler::with_prefix(""))
            .compile(&program.bitcode()[0], None)
            .expect("module should compile");
        Image::link(&[&object]).expect("module should link")
    }

    fn outcome(result: Result<i64, Trap>) -> ExecutionResult {
        match result {
            Ok(0) => ExecutionResult::new(ExecutionStatus::Passed),
            Ok(_) => ExecutionResult::new(ExecutionStatus::Failed),
            Err(trap) => ExecutionResult::crashed(trap.to_string()),
        }
    }

    #[test]
    fn deep_recursion_does_not_consume_the_host_stack() {
        let image = link(Module::new("down.c").with_function(down("down", "down")));

        // A thread stack far smaller than 500 host frames of an interpreter.
        let result = thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(move || {
                InlineSandbox.run(
                    &|watchdog| {
                        outcome(
                            Machine::new(&image)
                                .with_watchdog(watchdog)
                                .call_symbol("down", &[500]),
                        )
                    },
                    Duration::from_secs(10),
                )
            })
            .expect("thread should spawn")
            .join()
            .expect("interpreter should not take the thread down");
        assert_eq!(result.status, ExecutionStatus::Passed);
    }

    #[test]
    fn depth_limit_surfaces_as_trap() {
        let image = link(Module::new("down.c").with_function(down("down", "down")));
        assert_eq!(
            Machine::new(&image).call_symbol("down", &[600]),
            Err(Trap::StackOverflow(DEFAULT_MAX_DEPTH))
        );
        assert_eq!(
            Machine::new(&image)
                .with_max_depth(4)
                .call_symbol("down", &[3]),
            Ok(0)
        );
        assert_eq!(
            Machine::new(&image)
                .with_max_depth(4)
                .call_symbol("down", &[4]),
            Err(Trap::StackOverflow(4))
        );
    }

    #[test]
    fn trampoline_hops_cost_no_call_depth() {
        let trampoline = Function {
            name: "down".to_string(),
            params: 1,
            body: vec![Instruction::new(Op::Dispatch {
                pristine: "down_pristine".to_string(),
                targets: vec![DispatchTarget {
                    mutation_id: "m".to_string(),
                    callee: "down_mutant".to_string(),
                }],
            })],
            location: None,
        };
        let image = link(
            Module::new("down.c")
                .with_function(trampoline)
                .with_function(down("down_pristine", "down"))
                .with_function(down("down_mutant", "down")),
        );

        for selector in [None, Some("m")] {
            let mut machine = Machine::new(&image)
                .with_selector(selector)
                .with_max_depth(DEFAULT_MAX_DEPTH);
            assert_eq!(machine.call_symbol("down", &[400]), Ok(0));
        }
        assert_eq!(
            Machine::new(&image)
                .with_max_depth(4)
                .call_symbol("down", &[3]),
            Ok(0)
        );
    }

    #[test]
    fn calls_write_results_into_the_caller() {
        let mut callee = FunctionBuilder::new("seven", 0);
        let seven = callee.constant(7);
        callee.print(seven);
        callee.ret(seven);

        let mut caller = FunctionBuilder::new("main", 0);
        let got = caller.call("seven", &[]);
        let two = caller.constant(2);
        let sum = caller.binary(BinaryOp::Add, got, two);
        caller.ret(sum);

        let image = link(
            Module::new("m.c")
                .with_function(callee.finish().expect("seven should build"))
                .with_function(caller.finish().expect("main should build")),
        );
        let mut machine = Machine::new(&image);
        assert_eq!(machine.call_symbol("main", &[]), Ok(9));
        assert_eq!(machine.stdout(), "7\n");
    }
}
