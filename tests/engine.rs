use rvequiv::model::builder::FormulaBuilder;
use rvequiv::model::emulate::{Environment, Evaluator};
use rvequiv::model::executor::{execute_program, ExecutionState, ModelOptions, Policy};
use rvequiv::model::register::Register;
use rvequiv::model::ModelError;
use utils::{init, program};

mod utils;

const SAMPLES: [u32; 6] = [0, 1, 7, 0x8000_0000, 0xffff_fff9, 0x1234_5678];

struct Run {
    last: ExecutionState,
}

fn run_with(source: &str, options: &ModelOptions) -> Result<Run, ModelError> {
    let mut builder = FormulaBuilder::new();
    let initial = ExecutionState::symbolic(&mut builder, "init_");
    let last = execute_program(&mut builder, &initial, "p1_", &program(source), options)?;
    Ok(Run { last })
}

fn run(source: &str) -> Run {
    run_with(source, &ModelOptions::default()).unwrap()
}

fn environment(values: &[(usize, u32)]) -> Environment {
    let mut environment = Environment::new();
    for (index, value) in values {
        environment.set_word(&format!("init_x{}", index), *value);
    }
    environment
}

fn reg(state: &ExecutionState, index: usize) -> rvequiv::model::NodeRef {
    state.registers.read(Register::from_index(index).unwrap())
}

#[test]
fn zero_register_stays_zero() {
    init();
    let run = run("(seq (addi x0 x1 5) (add zero x1 x2) (lw x0 0(x1)) (jal x0 5) (lui x0 1))");

    for value in SAMPLES {
        let environment = environment(&[(1, value), (2, value ^ 3)]);
        let mut evaluator = Evaluator::new(&environment);
        assert_eq!(evaluator.word(&reg(&run.last, 0)), 0);
    }
}

#[test]
fn division_by_zero_yields_zero() {
    init();
    let run = run("(seq (div x3 x1 x2) (rem x4 x1 x2))");

    for value in SAMPLES {
        let environment = environment(&[(1, value), (2, 0)]);
        let mut evaluator = Evaluator::new(&environment);
        assert_eq!(evaluator.word(&reg(&run.last, 3)), 0);
        assert_eq!(evaluator.word(&reg(&run.last, 4)), 0);
    }
}

#[test]
fn division_is_signed() {
    init();
    let run = run("(seq (div x3 x1 x2) (rem x4 x1 x2))");
    let environment = environment(&[(1, -7i32 as u32), (2, 2)]);
    let mut evaluator = Evaluator::new(&environment);

    assert_eq!(evaluator.word(&reg(&run.last, 3)), -3i32 as u32);
    assert_eq!(evaluator.word(&reg(&run.last, 4)), -1i32 as u32);
}

#[test]
fn memory_keeps_stored_values() {
    init();
    let run = run(
        "(seq (sw x1 0(x2)) (sw x3 4(x2)) (lw x4 0(x2)) (sw x5 0(x2)) (lw x6 0(x2)) (lw x7 4(x2)))",
    );

    for value in SAMPLES {
        let environment = environment(&[(1, value), (2, 100), (3, 33), (5, 55)]);
        let mut evaluator = Evaluator::new(&environment);
        assert_eq!(evaluator.word(&reg(&run.last, 4)), value);
        assert_eq!(evaluator.word(&reg(&run.last, 6)), 55);
        assert_eq!(evaluator.word(&reg(&run.last, 7)), 33);
    }
    assert_eq!(run.last.memory.version(), 3);
}

#[test]
fn unwritten_addresses_read_initial_memory() {
    init();
    let run = run("(seq (sw x1 0(x2)) (lw x3 4(x2)) (lw x4 0(x5)))");

    for value in SAMPLES {
        let mut environment = environment(&[(1, value), (2, 100), (5, 200)]);
        environment.set_memory("init_mem", 104, value ^ 0xff);
        environment.set_memory("init_mem", 100, 13);
        environment.set_memory("init_mem", 200, 21);
        let mut evaluator = Evaluator::new(&environment);

        assert_eq!(evaluator.word(&reg(&run.last, 3)), value ^ 0xff);
        assert_eq!(evaluator.word(&reg(&run.last, 4)), 21);
        assert_eq!(evaluator.cell(run.last.memory.current(), 100), value);
        assert_eq!(evaluator.cell(run.last.memory.current(), 104), value ^ 0xff);
    }
}

#[test]
fn both_programs_read_the_same_initial_memory() {
    init();
    let mut builder = FormulaBuilder::new();
    let initial = ExecutionState::symbolic(&mut builder, "init_");
    let options = ModelOptions::default();
    let first = program("(seq (sw x1 0(x2)) (lw x3 8(x2)))");
    let second = program("(seq (lw x3 8(x2)) (sw x1 0(x2)))");
    let first = execute_program(&mut builder, &initial, "p1_", &first, &options).unwrap();
    let second = execute_program(&mut builder, &initial, "p2_", &second, &options).unwrap();

    for value in SAMPLES {
        let mut environment = environment(&[(1, value), (2, 64)]);
        environment.set_memory("init_mem", 72, value.rotate_left(3));
        let mut evaluator = Evaluator::new(&environment);

        let loaded = evaluator.word(&reg(&first, 3));
        assert_eq!(loaded, value.rotate_left(3));
        assert_eq!(evaluator.word(&reg(&second, 3)), loaded);
        assert_eq!(
            evaluator.cell(first.memory.current(), 64),
            evaluator.cell(second.memory.current(), 64)
        );
    }
}

#[test]
fn earlier_values_are_unaffected_by_later_writes() {
    init();
    let mut builder = FormulaBuilder::new();
    let initial = ExecutionState::symbolic(&mut builder, "init_");
    let options = ModelOptions::default();
    let increment = program("(addi x1 x1 1)");
    let first = execute_program(&mut builder, &initial, "p1_", &increment, &options).unwrap();
    let before = reg(&first, 1);
    let derived = {
        let copy = program("(addi x2 x1 0)");
        let second = execute_program(&mut builder, &first, "p2_", &copy, &options).unwrap();
        reg(&second, 2)
    };
    let overwrite = program("(addi x1 x0 9)");
    let last = execute_program(&mut builder, &first, "p3_", &overwrite, &options).unwrap();

    let environment = environment(&[(1, 41)]);
    let mut evaluator = Evaluator::new(&environment);
    assert_eq!(evaluator.word(&before), 42);
    assert_eq!(evaluator.word(&derived), 42);
    assert_eq!(evaluator.word(&reg(&last, 1)), 9);
    assert_eq!(evaluator.word(&reg(&initial, 1)), 41);
}

#[test]
fn branches_select_next_position() {
    init();
    let run = run("(seq (beq x1 x2 3) (addi x3 x0 1))");

    let taken = environment(&[(1, 4), (2, 4)]);
    assert_eq!(Evaluator::new(&taken).word(&run.last.pc), 4);
    let not_taken = environment(&[(1, 4), (2, 5)]);
    assert_eq!(Evaluator::new(&not_taken).word(&run.last.pc), 3);
}

#[test]
fn unsigned_and_signed_branches_differ() {
    init();
    let signed = run("(blt x1 x2 9)");
    let unsigned = run("(bltu x1 x2 9)");
    let environment = environment(&[(1, -1i32 as u32), (2, 1)]);

    assert_eq!(Evaluator::new(&environment).word(&signed.last.pc), 9);
    assert_eq!(Evaluator::new(&environment).word(&unsigned.last.pc), 2);
}

#[test]
fn jalr_targets_register_plus_offset() {
    init();
    let run = run("(seq (addi x2 x2 0) (jalr ra 3(x5)))");

    let environment = environment(&[(5, 10)]);
    let mut evaluator = Evaluator::new(&environment);
    assert_eq!(evaluator.word(&run.last.pc), 13);
    assert_eq!(evaluator.word(&reg(&run.last, 1)), 3);
}

#[test]
fn set_less_than_immediate() {
    init();
    let run = run("(seq (slti x3 x1 -1) (sltiu x4 x1 -1))");
    let environment = environment(&[(1, -2i32 as u32)]);
    let mut evaluator = Evaluator::new(&environment);

    assert_eq!(evaluator.word(&reg(&run.last, 3)), 1);
    assert_eq!(evaluator.word(&reg(&run.last, 4)), 1);
}

#[test]
fn strength_reduction_agrees_on_samples() {
    init();
    let original = run("(mul x3 x1 2)");
    let shifted = run("(sll x3 x1 1)");
    let added = run("(add x3 x1 x1)");

    for value in SAMPLES {
        let environment = environment(&[(1, value)]);
        let mut evaluator = Evaluator::new(&environment);
        let expected = evaluator.word(&reg(&original.last, 3));
        assert_eq!(evaluator.word(&reg(&shifted.last, 3)), expected);
        assert_eq!(evaluator.word(&reg(&added.last, 3)), expected);
    }
}

#[test]
fn unmodeled_instructions_fall_through_unless_strict() {
    init();
    let run = run("(seq (ecall) (beq x1 x2 later) (addi x3 x0 1))");
    let environment = Environment::new();
    let mut evaluator = Evaluator::new(&environment);
    assert_eq!(evaluator.word(&run.last.pc), 4);
    assert_eq!(evaluator.word(&reg(&run.last, 3)), 1);

    let strict = ModelOptions {
        policy: Policy::Strict,
    };
    let result = run_with("(seq (ecall) (addi x3 x0 1))", &strict);
    assert!(matches!(result, Err(ModelError::UnsupportedOpcode { position: 1, .. })));
}
