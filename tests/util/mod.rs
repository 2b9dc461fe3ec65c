pub mod builder;

use anyhow::{anyhow, Result};
use parse::attributes::CodeAttribute;
use parse::classfile::ClassFile;
use parse::codec::{decode_body, MethodBody};
use parse::insn::Insn;
use parse::parser::Parser;
use weaver::{Outcome, Weaver};

/// Run a transform that must produce a rewritten image.
pub fn weave(weaver: &Weaver, bytes: &[u8]) -> Result<Vec<u8>> {
    match weaver.transform(bytes).map_err(|e| anyhow!("{}", e))? {
        Outcome::Transformed(output) => Ok(output),
        other => Err(anyhow!("expected Transformed, got {:?}", other)),
    }
}

/// Parse an emitted class and decode one method's body.
pub fn decoded_method(bytes: &[u8], name: &str) -> Result<(ClassFile, MethodBody)> {
    let class = Parser::new(bytes).parse()?;
    let method = class
        .methods
        .values
        .iter()
        .find(|m| m.name_string().map(|n| n == name).unwrap_or(false))
        .ok_or(anyhow!("no method named {}", name))?;

    let attribute: CodeAttribute = method.attributes.known_attribute(&class.constant_pool)?;
    let body = decode_body(&attribute, &class.constant_pool)?;
    Ok((class, body))
}

/// The instruction stream of a body, labels and line markers included.
pub fn instructions(body: &MethodBody) -> Vec<Insn> {
    body.code.iter().map(|(_, insn)| insn.clone()).collect()
}

/// Positions of every invocation of a frame-protocol method with this name.
pub fn protocol_calls(insns: &[Insn], method: &str) -> Vec<usize> {
    insns
        .iter()
        .enumerate()
        .filter_map(|(at, insn)| match insn {
            Insn::Invoke { owner, name, .. }
                if owner == weaver::protocol::FRAME_CLASS && name == method =>
            {
                Some(at)
            }
            _ => None,
        })
        .collect()
}
