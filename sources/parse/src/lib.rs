pub mod annotations;
pub mod attributes;
pub mod classfile;
pub mod codec;
pub mod constants;
pub mod flags;
pub mod insn;
pub mod opcodes;
pub mod parser;
pub mod pool;
pub mod result;
pub mod writer;

extern crate anyhow;
extern crate bytes;
extern crate enum_as_inner;
extern crate support;
