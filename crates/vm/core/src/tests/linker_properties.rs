use proptest::prelude::*;

use crate::jit::analyzer::analyze_bytecode;
use crate::linker::link;
use crate::machine_code::CompiledCode;
use crate::opcodes::Opcode;
use crate::program::{LinkedProgram, Word};
use crate::value::{MethodId, Value};

/// Literal pool shared by generated programs: an integer at 0, a symbol at 1.
fn literals() -> Vec<Value> {
    vec![Value::Integer(5), Value::symbol("go")]
}

fn instruction() -> impl Strategy<Value = Vec<i64>> {
    let op = |opcode: Opcode| i64::from(opcode);
    prop_oneof![
        Just(vec![op(Opcode::Noop)]),
        Just(vec![op(Opcode::PushNil)]),
        any::<i32>().prop_map(move |n| vec![op(Opcode::PushInt), i64::from(n)]),
        Just(vec![op(Opcode::PushLiteral), 0]),
        (0..4i64).prop_map(move |r| vec![op(Opcode::RLoadLiteral), r, 0]),
        Just(vec![op(Opcode::SendMethod), 1]),
        (0..3i64).prop_map(move |argc| vec![op(Opcode::SendStack), 1, argc]),
        Just(vec![op(Opcode::PushConst), 1]),
        Just(vec![op(Opcode::SetupUnwind), 0, 1]),
        Just(vec![op(Opcode::Unwind), 1]),
        Just(vec![op(Opcode::MCounter)]),
        (0..4i64, 0..4i64, 0..4i64)
            .prop_map(move |(d, a, b)| vec![op(Opcode::NIadd), d, a, b]),
        (0..4i64).prop_map(move |r| vec![op(Opcode::RLoad1), r]),
    ]
}

fn program() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(instruction(), 1..40).prop_map(|parts| parts.concat())
}

/// Offsets that carry an entry in each side table.
fn side_table_keys(program: &LinkedProgram) -> [Vec<usize>; 4] {
    let ips = 0..program.len();
    [
        ips.clone().filter(|&ip| program.call_site(ip).is_some()).collect(),
        ips.clone().filter(|&ip| program.constant_cache(ip).is_some()).collect(),
        ips.clone().filter(|&ip| program.unwind_site(ip).is_some()).collect(),
        ips.filter(|&ip| program.measurement(ip).is_some()).collect(),
    ]
}

proptest! {
    #[test]
    fn relinking_a_fresh_copy_is_deterministic(iseq in program()) {
        let first = CompiledCode::new("generated", iseq.clone(), literals()).with_registers(4);
        let second = CompiledCode::new("generated", iseq, literals()).with_registers(4);
        let a = link(&first, MethodId(7)).unwrap();
        let b = link(&second, MethodId(7)).unwrap();

        prop_assert_eq!(a.words(), b.words());
        prop_assert_eq!(a.references(), b.references());
        prop_assert_eq!(side_table_keys(&a), side_table_keys(&b));
    }

    #[test]
    fn linked_objects_match_the_analysis(iseq in program()) {
        let analysis = analyze_bytecode(&iseq).unwrap();
        let code = CompiledCode::new("generated", iseq, literals()).with_registers(4);
        let linked = link(&code, MethodId(7)).unwrap();

        prop_assert_eq!(linked.call_site_count(), analysis.call_sites);
        prop_assert_eq!(linked.constant_cache_count(), analysis.constant_caches);
        prop_assert_eq!(linked.unwind_site_count(), analysis.unwind_sites);
        prop_assert_eq!(linked.measurement_count(), analysis.measurements);
        prop_assert_eq!(linked.references().len(), analysis.reference_count());
        prop_assert_eq!(linked.len(), code.iseq().len());
    }

    #[test]
    fn register_operands_are_offset(iseq in program(), stack_size in 1usize..64) {
        let code = CompiledCode::new("generated", iseq.clone(), literals())
            .with_stack_size(stack_size)
            .with_registers(4);
        let linked = link(&code, MethodId(7)).unwrap();
        let offset = i64::try_from(stack_size).unwrap();

        let analysis = analyze_bytecode(&iseq).unwrap();
        for &ip in &analysis.instruction_starts {
            let operands: &[usize] = match Opcode::try_from(iseq[ip]).unwrap() {
                Opcode::NIadd => &[1, 2, 3],
                Opcode::RLoad1 | Opcode::RLoadLiteral => &[1],
                _ => &[],
            };
            for &at in operands {
                prop_assert_eq!(
                    linked.word(ip + at),
                    Some(&Word::Imm(iseq[ip + at] + offset))
                );
            }
        }
    }
}
