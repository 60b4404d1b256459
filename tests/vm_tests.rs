//! Interpreter integration tests: arithmetic, control flow, memory,
//! tables, globals, traps, and gas accounting.

mod common;

use common::*;

use mwasm::error::ErrorKind;
use mwasm::gas::{Gas, GasMeter, Unmetered};
use mwasm::runtime::{Registry, Value, VirtualMachine};

fn instantiate(bytes: Vec<u8>) -> VirtualMachine {
    Registry::new()
        .instantiate(bytes, Box::new(Unmetered))
        .expect("instantiation failed")
}

#[test]
fn add_two_i32() {
    let mut vm = instantiate(add_module());
    assert_eq!(
        vm.invoke("add", &[Value::I32(2), Value::I32(3)]).unwrap(),
        vec![Value::I32(5)]
    );
    assert_eq!(
        vm.invoke("add", &[Value::I32(-1), Value::I32(1)]).unwrap(),
        vec![Value::I32(0)]
    );
}

#[test]
fn factorial_via_loop() {
    let mut vm = instantiate(fact_module());
    for (n, expected) in [(0, 1), (1, 1), (5, 120), (10, 3628800)] {
        assert_eq!(
            vm.invoke("fact", &[Value::I32(n)]).unwrap(),
            vec![Value::I32(expected)],
            "fact({n})"
        );
    }
}

#[test]
fn memory_roundtrip() {
    let mut vm = instantiate(memory_module());
    let value = 0xDEADBEEFu32 as i32;
    assert_eq!(
        vm.invoke("roundtrip", &[Value::I32(value)]).unwrap(),
        vec![Value::I32(value)]
    );

    // bytes at 16..19 are little-endian
    let memory = vm.instance().memory.clone().unwrap();
    assert_eq!(
        memory.borrow().read_bytes(16, 4).unwrap(),
        vec![0xef, 0xbe, 0xad, 0xde]
    );
}

#[test]
fn out_of_bounds_load_traps_without_growing() {
    let mut vm = instantiate(memory_module());
    let trap = vm.invoke("peek", &[Value::I32(65536)]).unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::MemoryOutOfBounds);

    // memory is still exactly one page
    let memory = vm.instance().memory.clone().unwrap();
    assert_eq!(memory.borrow().size(), 1);
}

#[test]
fn indirect_call_dispatches_and_checks_types() {
    let mut vm = instantiate(indirect_module());

    // slot 0 holds a function of the expected type
    assert_eq!(
        vm.invoke("dispatch", &[Value::I32(0)]).unwrap(),
        vec![Value::I32(42)]
    );

    // slot 1 holds a function of a different signature
    let trap = vm.invoke("dispatch", &[Value::I32(1)]).unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::IndirectCallTypeMismatch);

    // slot index past the table
    let trap = vm.invoke("dispatch", &[Value::I32(2)]).unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::TableOutOfBounds);
}

#[test]
fn nested_calls() {
    // func 0 doubles, exported func 1 calls it twice
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[I32], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00], vec![0x00]])),
        section(SEC_EXPORT, &vector(&[export("quad", 0x00, 1)])),
        section(
            SEC_CODE,
            &vector(&[
                func_body(&[], &[0x20, 0x00, 0x20, 0x00, 0x6a]),
                func_body(&[], &[0x20, 0x00, 0x10, 0x00, 0x10, 0x00]),
            ]),
        ),
    ]);
    let mut vm = instantiate(bytes);
    assert_eq!(
        vm.invoke("quad", &[Value::I32(3)]).unwrap(),
        vec![Value::I32(12)]
    );
}

#[test]
fn br_table_saturates_to_default() {
    #[rustfmt::skip]
    let body = [
        0x02, 0x40,                   // block (outer)
        0x02, 0x40,                   //   block (middle)
        0x02, 0x40,                   //     block (inner)
        0x20, 0x00,                   //       local.get 0
        0x0e, 0x02, 0x00, 0x01, 0x02, //       br_table [0 1] default 2
        0x0b,                         //     end
        0x41, 0x0a,                   //     i32.const 10
        0x0f,                         //     return
        0x0b,                         //   end
        0x41, 0x14,                   //   i32.const 20
        0x0f,                         //   return
        0x0b,                         // end
        0x41, 0x1e,                   // i32.const 30
    ];
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[I32], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_EXPORT, &vector(&[export("select_branch", 0x00, 0)])),
        section(SEC_CODE, &vector(&[func_body(&[], &body)])),
    ]);
    let mut vm = instantiate(bytes);

    for (input, expected) in [(0, 10), (1, 20), (2, 30), (7, 30), (-1, 30)] {
        assert_eq!(
            vm.invoke("select_branch", &[Value::I32(input)]).unwrap(),
            vec![Value::I32(expected)],
            "select_branch({input})"
        );
    }
}

#[test]
fn if_else_branches() {
    #[rustfmt::skip]
    let body = [
        0x20, 0x00,       // local.get 0
        0x04, 0x7f,       // if (result i32)
        0x41, 0x01,       //   i32.const 1
        0x05,             // else
        0x41, 0x02,       //   i32.const 2
        0x0b,             // end
    ];
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[I32], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_EXPORT, &vector(&[export("pick", 0x00, 0)])),
        section(SEC_CODE, &vector(&[func_body(&[], &body)])),
    ]);
    let mut vm = instantiate(bytes);
    assert_eq!(
        vm.invoke("pick", &[Value::I32(5)]).unwrap(),
        vec![Value::I32(1)]
    );
    assert_eq!(
        vm.invoke("pick", &[Value::I32(0)]).unwrap(),
        vec![Value::I32(2)]
    );
}

#[test]
fn select_and_drop() {
    #[rustfmt::skip]
    let body = [
        0x41, 0x63,       // i32.const 99
        0x1a,             // drop
        0x41, 0x0a,       // i32.const 10
        0x41, 0x14,       // i32.const 20
        0x20, 0x00,       // local.get 0
        0x1b,             // select
    ];
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[I32], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_EXPORT, &vector(&[export("choose", 0x00, 0)])),
        section(SEC_CODE, &vector(&[func_body(&[], &body)])),
    ]);
    let mut vm = instantiate(bytes);
    assert_eq!(
        vm.invoke("choose", &[Value::I32(1)]).unwrap(),
        vec![Value::I32(10)]
    );
    assert_eq!(
        vm.invoke("choose", &[Value::I32(0)]).unwrap(),
        vec![Value::I32(20)]
    );
}

fn div_module() -> Vec<u8> {
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[I32, I32], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00], vec![0x00]])),
        section(
            SEC_EXPORT,
            &vector(&[export("div_s", 0x00, 0), export("rem_s", 0x00, 1)]),
        ),
        section(
            SEC_CODE,
            &vector(&[
                func_body(&[], &[0x20, 0x00, 0x20, 0x01, 0x6d]),
                func_body(&[], &[0x20, 0x00, 0x20, 0x01, 0x6f]),
            ]),
        ),
    ]);
    bytes
}

#[test]
fn integer_division_traps() {
    let mut vm = instantiate(div_module());

    assert_eq!(
        vm.invoke("div_s", &[Value::I32(7), Value::I32(-2)]).unwrap(),
        vec![Value::I32(-3)]
    );

    let trap = vm
        .invoke("div_s", &[Value::I32(1), Value::I32(0)])
        .unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::IntegerDivideByZero);

    let trap = vm
        .invoke("div_s", &[Value::I32(i32::MIN), Value::I32(-1)])
        .unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::IntegerOverflow);

    let trap = vm
        .invoke("rem_s", &[Value::I32(i32::MIN), Value::I32(-1)])
        .unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::IntegerOverflow);
}

#[test]
fn unreachable_traps() {
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[], &[])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_EXPORT, &vector(&[export("boom", 0x00, 0)])),
        section(SEC_CODE, &vector(&[func_body(&[], &[0x00])])),
    ]);
    let mut vm = instantiate(bytes);
    let trap = vm.invoke("boom", &[]).unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::UnreachableExecuted);
}

#[test]
fn float_truncation_traps() {
    // to_int(f64) -> i32 via i32.trunc_f64_s
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[F64], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_EXPORT, &vector(&[export("to_int", 0x00, 0)])),
        section(SEC_CODE, &vector(&[func_body(&[], &[0x20, 0x00, 0xaa])])),
    ]);
    let mut vm = instantiate(bytes);

    assert_eq!(
        vm.invoke("to_int", &[Value::F64(-3.7)]).unwrap(),
        vec![Value::I32(-3)]
    );

    for bad in [f64::NAN, f64::INFINITY, 2147483648.0, -2147483649.0] {
        let trap = vm.invoke("to_int", &[Value::F64(bad)]).unwrap_err();
        assert_eq!(trap.kind(), ErrorKind::InvalidConversionToInteger);
    }
}

#[test]
fn float_arithmetic() {
    // hyp(x, y) = sqrt(x*x + y*y)
    #[rustfmt::skip]
    let body = [
        0x20, 0x00, 0x20, 0x00, 0xa2, // x * x
        0x20, 0x01, 0x20, 0x01, 0xa2, // y * y
        0xa0,                         // f64.add
        0x9f,                         // f64.sqrt
    ];
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[F64, F64], &[F64])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_EXPORT, &vector(&[export("hyp", 0x00, 0)])),
        section(SEC_CODE, &vector(&[func_body(&[], &body)])),
    ]);
    let mut vm = instantiate(bytes);
    assert_eq!(
        vm.invoke("hyp", &[Value::F64(3.0), Value::F64(4.0)]).unwrap(),
        vec![Value::F64(5.0)]
    );
}

#[test]
fn memory_grow_and_size() {
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[I32], &[I32]), func_type(&[], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00], vec![0x01]])),
        section(SEC_MEMORY, &vector(&[vec![0x01, 0x01, 0x02]])), // min 1 max 2
        section(
            SEC_EXPORT,
            &vector(&[export("grow", 0x00, 0), export("size", 0x00, 1)]),
        ),
        section(
            SEC_CODE,
            &vector(&[
                func_body(&[], &[0x20, 0x00, 0x40, 0x00]),
                func_body(&[], &[0x3f, 0x00]),
            ]),
        ),
    ]);
    let mut vm = instantiate(bytes);

    assert_eq!(vm.invoke("size", &[]).unwrap(), vec![Value::I32(1)]);
    assert_eq!(
        vm.invoke("grow", &[Value::I32(1)]).unwrap(),
        vec![Value::I32(1)]
    );
    assert_eq!(vm.invoke("size", &[]).unwrap(), vec![Value::I32(2)]);
    // past the maximum: -1 and no change
    assert_eq!(
        vm.invoke("grow", &[Value::I32(1)]).unwrap(),
        vec![Value::I32(-1)]
    );
    assert_eq!(vm.invoke("size", &[]).unwrap(), vec![Value::I32(2)]);
}

fn global_module(mutable: bool) -> Vec<u8> {
    module(&[
        section(SEC_TYPE, &vector(&[func_type(&[], &[I32]), func_type(&[I32], &[])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00], vec![0x01]])),
        section(SEC_GLOBAL, &vector(&[{
            let mut seg = vec![I32, if mutable { 0x01 } else { 0x00 }];
            seg.extend(i32_const_expr(10));
            seg
        }])),
        section(
            SEC_EXPORT,
            &vector(&[export("get", 0x00, 0), export("set", 0x00, 1)]),
        ),
        section(
            SEC_CODE,
            &vector(&[
                func_body(&[], &[0x23, 0x00]),
                func_body(&[], &[0x20, 0x00, 0x24, 0x00]),
            ]),
        ),
    ])
}

#[test]
fn mutable_globals() {
    let mut vm = instantiate(global_module(true));
    assert_eq!(vm.invoke("get", &[]).unwrap(), vec![Value::I32(10)]);
    vm.invoke("set", &[Value::I32(77)]).unwrap();
    assert_eq!(vm.invoke("get", &[]).unwrap(), vec![Value::I32(77)]);
}

#[test]
fn immutable_global_set_traps() {
    let mut vm = instantiate(global_module(false));
    let trap = vm.invoke("set", &[Value::I32(77)]).unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::TypeMismatch);
    assert_eq!(vm.invoke("get", &[]).unwrap(), vec![Value::I32(10)]);
}

#[test]
fn data_segments_initialise_memory() {
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[I32], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_MEMORY, &vector(&[vec![0x00, 0x01]])),
        section(SEC_EXPORT, &vector(&[export("byte_at", 0x00, 0)])),
        section(SEC_CODE, &vector(&[func_body(&[], &[0x20, 0x00, 0x2d, 0x00, 0x00])])),
        section(SEC_DATA, &vector(&[{
            let mut seg = leb(0);
            seg.extend(i32_const_expr(8));
            seg.extend(leb(2));
            seg.extend_from_slice(b"hi");
            seg
        }])),
    ]);
    let mut vm = instantiate(bytes);
    assert_eq!(
        vm.invoke("byte_at", &[Value::I32(8)]).unwrap(),
        vec![Value::I32(b'h' as i32)]
    );
    assert_eq!(
        vm.invoke("byte_at", &[Value::I32(9)]).unwrap(),
        vec![Value::I32(b'i' as i32)]
    );
    assert_eq!(
        vm.invoke("byte_at", &[Value::I32(10)]).unwrap(),
        vec![Value::I32(0)]
    );
}

#[test]
fn data_segment_out_of_range_fails_instantiation() {
    let bytes = module(&[
        section(SEC_MEMORY, &vector(&[vec![0x00, 0x01]])),
        section(SEC_DATA, &vector(&[{
            let mut seg = leb(0);
            seg.extend(i32_const_expr(65530));
            seg.extend(leb(10));
            seg.extend_from_slice(&[0xaa; 10]);
            seg
        }])),
    ]);
    let err = Registry::new()
        .instantiate(bytes, Box::new(Unmetered))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MemoryOutOfBounds);
}

#[test]
fn start_function_runs_at_instantiation() {
    // start function writes 7 into the mutable global
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[], &[]), func_type(&[], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00], vec![0x01]])),
        section(SEC_GLOBAL, &vector(&[{
            let mut seg = vec![I32, 0x01];
            seg.extend(i32_const_expr(0));
            seg
        }])),
        section(SEC_EXPORT, &vector(&[export("get", 0x00, 1)])),
        section(SEC_START, &{
            let mut p = leb(1);
            p.extend(leb(0));
            p
        }),
        section(
            SEC_CODE,
            &vector(&[
                func_body(&[], &[0x41, 0x07, 0x24, 0x00]),
                func_body(&[], &[0x23, 0x00]),
            ]),
        ),
    ]);
    let mut vm = instantiate(bytes);
    assert_eq!(vm.invoke("get", &[]).unwrap(), vec![Value::I32(7)]);
}

#[test]
fn runaway_recursion_is_bounded() {
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[], &[])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_EXPORT, &vector(&[export("spin", 0x00, 0)])),
        section(SEC_CODE, &vector(&[func_body(&[], &[0x10, 0x00])])),
    ]);
    let mut vm = instantiate(bytes);
    let trap = vm.invoke("spin", &[]).unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::StackUnderflow);
}

#[test]
fn unknown_export_and_argument_checks() {
    let mut vm = instantiate(add_module());

    let trap = vm.invoke("missing", &[]).unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::UnknownImport);

    let trap = vm.invoke("add", &[Value::I32(1)]).unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::TypeMismatch);

    let trap = vm
        .invoke("add", &[Value::I32(1), Value::I64(2)])
        .unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::TypeMismatch);
}

#[test]
fn execution_traps_on_gas_exhaustion() {
    let vm = Registry::new().instantiate(fact_module(), Box::new(Gas::new(200)));
    let mut vm = vm.expect("decode and instantiation fit the budget");

    let trap = vm.invoke("fact", &[Value::I32(100)]).unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::OutOfGas);
    assert!(vm.gas().exceeded());
}

#[test]
fn gas_is_deterministic() {
    // the minimal budget that lets fact(5) finish is stable across runs
    let minimal_budget = |_: ()| -> i64 {
        for limit in 1..10_000 {
            let vm = Registry::new().instantiate(fact_module(), Box::new(Gas::new(limit)));
            let Ok(mut vm) = vm else { continue };
            if vm.invoke("fact", &[Value::I32(5)]).is_ok() {
                return limit;
            }
        }
        panic!("no budget under 10000 sufficed");
    };

    let first = minimal_budget(());
    let second = minimal_budget(());
    assert_eq!(first, second);

    // one unit less must trap out-of-gas at the same point
    let mut vm = Registry::new()
        .instantiate(fact_module(), Box::new(Gas::new(first - 1)))
        .unwrap();
    let trap = vm.invoke("fact", &[Value::I32(5)]).unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::OutOfGas);
}

#[test]
fn vm_is_reusable_after_trap() {
    let mut vm = instantiate(div_module());

    let trap = vm
        .invoke("div_s", &[Value::I32(1), Value::I32(0)])
        .unwrap_err();
    assert_eq!(trap.kind(), ErrorKind::IntegerDivideByZero);

    // operand and call stacks were unwound; the next call is clean
    assert_eq!(
        vm.invoke("div_s", &[Value::I32(6), Value::I32(2)]).unwrap(),
        vec![Value::I32(3)]
    );
}
