//! Decoder integration tests: header checks, section ordering, error
//! kinds, and the gas charges taken while reading.

mod common;

use common::*;
use rstest::rstest;

use mwasm::error::ErrorKind;
use mwasm::gas::{Gas, GasMeter, Unmetered};
use mwasm::parser::{self, module::ExternalKind, types::ConstExpr, types::ValueType};

fn decode(bytes: Vec<u8>) -> Result<parser::module::Module, parser::DecodeError> {
    parser::decode(bytes, &mut Unmetered)
}

#[test]
fn decodes_add_module() {
    let unit = decode(add_module()).unwrap();

    assert_eq!(unit.magic, 0x6d736100);
    assert_eq!(unit.version, 1);
    assert_eq!(unit.types.len(), 1);
    assert_eq!(
        unit.types[0].parameters,
        vec![ValueType::I32, ValueType::I32]
    );
    assert_eq!(unit.types[0].return_types, vec![ValueType::I32]);
    assert_eq!(unit.functions, vec![0]);

    let export = unit.export("add").unwrap();
    assert_eq!(export.kind, ExternalKind::Function);
    assert_eq!(export.index, 0);

    // the trailing end byte is stripped from the stored body
    assert_eq!(unit.code.len(), 1);
    assert_eq!(&*unit.code[0].body, &[0x20, 0x00, 0x20, 0x01, 0x6a]);
    assert!(unit.code[0].locals.is_empty());
}

#[test]
fn decodes_locals_expanded() {
    let unit = decode(fact_module()).unwrap();
    assert_eq!(unit.code[0].locals, vec![ValueType::I32]);
}

#[test]
fn decodes_segments() {
    let bytes = module(&[
        section(SEC_MEMORY, &vector(&[vec![0x01, 0x01, 0x02]])),
        section(SEC_DATA, &vector(&[{
            let mut seg = leb(0);
            seg.extend(i32_const_expr(8));
            seg.extend(leb(2));
            seg.extend_from_slice(b"hi");
            seg
        }])),
    ]);
    let unit = decode(bytes).unwrap();

    assert_eq!(unit.memories[0].min, 1);
    assert_eq!(unit.memories[0].max, Some(2));
    assert_eq!(unit.data.len(), 1);
    assert_eq!(unit.data[0].offset, ConstExpr::I32(8));
    assert_eq!(unit.data[0].init, b"hi");
}

#[test]
fn custom_sections_are_skipped() {
    let mut custom = name_bytes("notes");
    custom.extend_from_slice(&[1, 2, 3, 4]);

    let bytes = module(&[
        section(0, &custom),
        section(SEC_TYPE, &vector(&[func_type(&[], &[])])),
        section(0, &custom),
    ]);
    let unit = decode(bytes).unwrap();
    assert_eq!(unit.types.len(), 1);
}

#[rstest]
#[case::bad_magic(
    vec![0x00, 0x61, 0x73, 0x6e, 0x01, 0x00, 0x00, 0x00],
    ErrorKind::MalformedBinary
)]
#[case::bad_version(
    vec![0x00, 0x61, 0x73, 0x6d, 0x02, 0x00, 0x00, 0x00],
    ErrorKind::UnsupportedVersion
)]
#[case::truncated_header(vec![0x00, 0x61, 0x73], ErrorKind::MalformedBinary)]
#[case::unknown_section_id(
    module(&[section(12, &[])]),
    ErrorKind::InvalidSection
)]
#[case::import_kind(
    module(&[section(SEC_IMPORT, &vector(&[import("env", "x", &[0x04, 0x00])]))]),
    ErrorKind::InvalidImportKind
)]
#[case::multiple_starts(
    module(&[section(SEC_START, &{ let mut p = leb(2); p.extend(leb(0)); p.extend(leb(1)); p })]),
    ErrorKind::InvalidSection
)]
fn decode_error_kinds(#[case] bytes: Vec<u8>, #[case] kind: ErrorKind) {
    let err = decode(bytes).unwrap_err();
    assert_eq!(err.kind(), kind);
}

#[test]
fn sections_out_of_order_rejected() {
    // table section after memory section
    let bytes = module(&[
        section(SEC_MEMORY, &vector(&[vec![0x00, 0x01]])),
        section(SEC_TABLE, &vector(&[vec![0x70, 0x00, 0x01]])),
    ]);
    let err = decode(bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSection);
    assert!(err.to_string().contains("out of order"));
}

#[test]
fn duplicate_section_rejected() {
    let type_section = section(SEC_TYPE, &vector(&[func_type(&[], &[])]));
    let bytes = module(&[type_section.clone(), type_section]);
    let err = decode(bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSection);
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn custom_sections_exempt_from_ordering() {
    let mut custom = name_bytes("x");
    custom.push(0xff);
    let bytes = module(&[
        section(SEC_EXPORT, &vector(&[])),
        section(0, &custom),
        section(SEC_CODE, &vector(&[])),
    ]);
    assert!(decode(bytes).is_ok());
}

#[test]
fn section_size_must_match_content() {
    // a type section with a stray trailing byte inside its payload
    let mut payload = vector(&[func_type(&[], &[])]);
    payload.push(0x00);
    let bytes = module(&[section(SEC_TYPE, &payload)]);
    let err = decode(bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSection);
}

#[test]
fn section_payload_longer_than_stream() {
    let mut bytes = module(&[]);
    bytes.extend_from_slice(&[SEC_TYPE, 0x20, 0x00]); // declares 32 bytes, has 1
    let err = decode(bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedBinary);
}

#[test]
fn code_and_function_counts_must_agree() {
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[], &[])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_CODE, &vector(&[])),
    ]);
    let err = decode(bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSection);
}

#[test]
fn function_type_index_out_of_range() {
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[], &[])])),
        section(SEC_FUNCTION, &vector(&[vec![0x07]])),
    ]);
    let err = decode(bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSection);
}

#[test]
fn code_body_must_end_with_end() {
    let mut body = leb(0); // no locals
    body.extend_from_slice(&[0x41, 0x00]); // i32.const 0, no end
    let mut entry = leb(body.len() as u32);
    entry.extend(body);

    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[], &[])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_CODE, &vector(&[entry])),
    ]);
    let err = decode(bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedBinary);
}

#[test]
fn data_segment_memory_index_must_be_zero() {
    let bytes = module(&[
        section(SEC_MEMORY, &vector(&[vec![0x00, 0x01]])),
        section(SEC_DATA, &vector(&[{
            let mut seg = leb(1);
            seg.extend(i32_const_expr(0));
            seg.extend(leb(0));
            seg
        }])),
    ]);
    let err = decode(bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSection);
}

#[test]
fn errors_carry_a_path_tag() {
    let bytes = module(&[
        section(SEC_TYPE, &vector(&[func_type(&[], &[])])),
        section(SEC_FUNCTION, &vector(&[vec![0x07]])),
    ]);
    let err = decode(bytes).unwrap_err();
    assert!(err.to_string().contains("function"), "got: {err}");
}

#[test]
fn decoding_charges_gas() {
    let bytes = add_module();

    let mut gas = Gas::new(1_000_000);
    parser::decode(bytes.clone(), &mut gas).unwrap();
    assert!(gas.remaining() < 1_000_000);

    // the same module always consumes the same amount
    let mut again = Gas::new(1_000_000);
    parser::decode(bytes, &mut again).unwrap();
    assert_eq!(gas.remaining(), again.remaining());
}

#[test]
fn decoding_traps_on_gas_exhaustion() {
    let mut gas = Gas::new(10);
    let err = parser::decode(add_module(), &mut gas).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfGas);
    assert!(gas.exceeded());
}

#[test]
fn larger_modules_cost_more_gas() {
    let small = {
        let mut gas = Gas::new(1_000_000);
        parser::decode(add_module(), &mut gas).unwrap();
        1_000_000 - gas.remaining()
    };
    let large = {
        let mut gas = Gas::new(1_000_000);
        parser::decode(fact_module(), &mut gas).unwrap();
        1_000_000 - gas.remaining()
    };
    assert!(large > small);
}
