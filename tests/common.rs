//! Shared helpers for assembling binary modules byte-by-byte in tests.
#![allow(dead_code)]

pub const I32: u8 = 0x7f;
pub const I64: u8 = 0x7e;
pub const F32: u8 = 0x7d;
pub const F64: u8 = 0x7c;

pub const SEC_TYPE: u8 = 1;
pub const SEC_IMPORT: u8 = 2;
pub const SEC_FUNCTION: u8 = 3;
pub const SEC_TABLE: u8 = 4;
pub const SEC_MEMORY: u8 = 5;
pub const SEC_GLOBAL: u8 = 6;
pub const SEC_EXPORT: u8 = 7;
pub const SEC_START: u8 = 8;
pub const SEC_ELEMENT: u8 = 9;
pub const SEC_CODE: u8 = 10;
pub const SEC_DATA: u8 = 11;

/// Unsigned LEB128.
pub fn leb(value: u32) -> Vec<u8> {
    let mut out = Vec::new();
    let mut v = value;
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if v == 0 {
            break;
        }
    }
    out
}

/// Signed LEB128, for const immediates.
pub fn sleb(mut value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        out.push(if done { byte } else { byte | 0x80 });
        if done {
            break;
        }
    }
    out
}

/// Magic + version header followed by the given sections.
pub fn module(sections: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
    for section in sections {
        out.extend_from_slice(section);
    }
    out
}

/// `(id, size, payload)` framing.
pub fn section(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![id];
    out.extend(leb(payload.len() as u32));
    out.extend_from_slice(payload);
    out
}

/// Count-prefixed concatenation of elements.
pub fn vector(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = leb(items.len() as u32);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

pub fn func_type(params: &[u8], results: &[u8]) -> Vec<u8> {
    let mut out = vec![0x60];
    out.extend(leb(params.len() as u32));
    out.extend_from_slice(params);
    out.extend(leb(results.len() as u32));
    out.extend_from_slice(results);
    out
}

pub fn name_bytes(name: &str) -> Vec<u8> {
    let mut out = leb(name.len() as u32);
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn export(name: &str, kind: u8, index: u32) -> Vec<u8> {
    let mut out = name_bytes(name);
    out.push(kind);
    out.extend(leb(index));
    out
}

pub fn import(module: &str, field: &str, desc: &[u8]) -> Vec<u8> {
    let mut out = name_bytes(module);
    out.extend(name_bytes(field));
    out.extend_from_slice(desc);
    out
}

/// A size-prefixed code-section entry: local groups, body, trailing end.
pub fn func_body(locals: &[(u32, u8)], code: &[u8]) -> Vec<u8> {
    let mut body = leb(locals.len() as u32);
    for (count, value_type) in locals {
        body.extend(leb(*count));
        body.push(*value_type);
    }
    body.extend_from_slice(code);
    body.push(0x0b);

    let mut out = leb(body.len() as u32);
    out.extend(body);
    out
}

/// `i32.const v; end` constant expression.
pub fn i32_const_expr(value: i32) -> Vec<u8> {
    let mut out = vec![0x41];
    out.extend(sleb(value as i64));
    out.push(0x0b);
    out
}

/// Module exporting `add(i32, i32) -> i32`.
pub fn add_module() -> Vec<u8> {
    module(&[
        section(SEC_TYPE, &vector(&[func_type(&[I32, I32], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_EXPORT, &vector(&[export("add", 0x00, 0)])),
        section(
            SEC_CODE,
            &vector(&[func_body(&[], &[0x20, 0x00, 0x20, 0x01, 0x6a])]),
        ),
    ])
}

/// Module exporting `fact(i32) -> i32` computed with a branching loop.
pub fn fact_module() -> Vec<u8> {
    #[rustfmt::skip]
    let body = [
        0x41, 0x01,             // i32.const 1
        0x21, 0x01,             // local.set 1 (result)
        0x02, 0x40,             // block
        0x03, 0x40,             //   loop
        0x20, 0x00,             //     local.get 0
        0x45,                   //     i32.eqz
        0x0d, 0x01,             //     br_if 1 (done)
        0x20, 0x00,             //     local.get 0
        0x20, 0x01,             //     local.get 1
        0x6c,                   //     i32.mul
        0x21, 0x01,             //     local.set 1
        0x20, 0x00,             //     local.get 0
        0x41, 0x01,             //     i32.const 1
        0x6b,                   //     i32.sub
        0x21, 0x00,             //     local.set 0
        0x0c, 0x00,             //     br 0 (continue)
        0x0b,                   //   end
        0x0b,                   // end
        0x20, 0x01,             // local.get 1
    ];
    module(&[
        section(SEC_TYPE, &vector(&[func_type(&[I32], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00]])),
        section(SEC_EXPORT, &vector(&[export("fact", 0x00, 0)])),
        section(SEC_CODE, &vector(&[func_body(&[(1, I32)], &body)])),
    ])
}

/// Module with one page of memory exporting `roundtrip(i32) -> i32`
/// (stores at 16, loads back) and `peek(i32) -> i32`.
pub fn memory_module() -> Vec<u8> {
    module(&[
        section(SEC_TYPE, &vector(&[func_type(&[I32], &[I32])])),
        section(SEC_FUNCTION, &vector(&[vec![0x00], vec![0x00]])),
        section(SEC_MEMORY, &vector(&[vec![0x00, 0x01]])),
        section(
            SEC_EXPORT,
            &vector(&[export("roundtrip", 0x00, 0), export("peek", 0x00, 1)]),
        ),
        section(
            SEC_CODE,
            &vector(&[
                func_body(
                    &[],
                    &[
                        0x41, 0x10, // i32.const 16
                        0x20, 0x00, // local.get 0
                        0x36, 0x02, 0x00, // i32.store align=2 offset=0
                        0x41, 0x10, // i32.const 16
                        0x28, 0x02, 0x00, // i32.load
                    ],
                ),
                func_body(&[], &[0x20, 0x00, 0x28, 0x02, 0x00]),
            ]),
        ),
    ])
}

/// Module with a two-slot funcref table holding functions of different
/// signatures, exporting `dispatch(i32) -> i32` that `call_indirect`s
/// with type 0.
pub fn indirect_module() -> Vec<u8> {
    module(&[
        section(
            SEC_TYPE,
            &vector(&[func_type(&[], &[I32]), func_type(&[I32], &[I32])]),
        ),
        section(
            SEC_FUNCTION,
            &vector(&[vec![0x00], vec![0x01], vec![0x01]]),
        ),
        section(SEC_TABLE, &vector(&[vec![0x70, 0x00, 0x02]])),
        section(SEC_EXPORT, &vector(&[export("dispatch", 0x00, 2)])),
        section(
            SEC_ELEMENT,
            &vector(&[{
                let mut seg = leb(0); // table index
                seg.extend(i32_const_expr(0));
                seg.extend(vector(&[leb(0), leb(1)]));
                seg
            }]),
        ),
        section(
            SEC_CODE,
            &vector(&[
                func_body(&[], &[0x41, 0x2a]), // () -> 42
                func_body(&[], &[0x20, 0x00]), // identity
                func_body(&[], &[0x20, 0x00, 0x11, 0x00, 0x00]),
            ]),
        ),
    ])
}
