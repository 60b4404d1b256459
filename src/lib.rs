//! A gas-metered WebAssembly MVP runtime written in Rust.
//!
//! mwasm decodes the standard binary module format and executes it on a
//! stack-machine interpreter whose work is bounded by a gas meter. Native
//! functions can be reflected into a module's function index space through
//! a host-function bridge, including an out-pointer adaptation for native
//! multi-return signatures.
//!
//! # Modules
//!
//! - [`parser`] -- Binary format decoder. Reads `.wasm` bytes into a
//!   [`parser::module::Module`].
//! - [`runtime`] -- Interpreter, linear memory, tables, globals, and the
//!   host-function bridge.
//! - [`gas`] -- The [`gas::GasMeter`] trait with metered and unmetered
//!   implementations.
//! - [`error`] -- The closed set of failure kinds shared by decoding and
//!   execution.
//!
//! # Example
//!
//! Instantiate a module exporting `add(i32, i32) -> i32` and call it:
//!
//! ```
//! use mwasm::gas::Unmetered;
//! use mwasm::runtime::instance::Registry;
//! use mwasm::runtime::Value;
//!
//! let bytes = vec![
//!     0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // magic + version
//!     0x01, 0x07, 0x01, 0x60, 0x02, 0x7f, 0x7f, 0x01, 0x7f, // type (i32, i32) -> i32
//!     0x03, 0x02, 0x01, 0x00, // function 0 has type 0
//!     0x07, 0x07, 0x01, 0x03, 0x61, 0x64, 0x64, 0x00, 0x00, // export "add"
//!     0x0a, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b, // code
//! ];
//!
//! let registry = Registry::new();
//! let mut vm = registry.instantiate(bytes, Box::new(Unmetered)).unwrap();
//! let results = vm.invoke("add", &[Value::I32(2), Value::I32(3)]).unwrap();
//! assert_eq!(results, vec![Value::I32(5)]);
//! ```

pub mod error;
pub mod gas;
pub mod parser;
pub mod runtime;
