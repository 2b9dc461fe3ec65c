//! The idempotence guard. A woven class carries a reserved zero-length
//! attribute; seeing it means the whole inspection can stop before any
//! dataflow work. The `manual = true` option on a method's flow annotation is
//! the second, method-granularity signal.

use parse::classfile::ClassFile;

use crate::error::{WeaveError, WeaveResult};
use crate::protocol;
use crate::resolver::FlowResolver;
use crate::summary::ClassSummary;

/// The three-way pre-transform decision.
#[derive(Debug)]
pub enum Inspection {
    /// No flow methods anywhere; the bytes pass through untouched.
    NoFlowMethods,
    /// The sentinel attribute (or only manual-marked flow methods) found.
    AlreadyTransformed,
    /// Method indices that need rewriting.
    Transform(Vec<usize>),
}

pub fn inspect(class: &ClassFile, resolver: &FlowResolver) -> WeaveResult<Inspection> {
    if class.attributes.has(protocol::WOVEN_ATTRIBUTE) {
        return Ok(Inspection::AlreadyTransformed);
    }

    let summary = ClassSummary::of(class).map_err(WeaveError::Input)?;

    let mut candidates = Vec::new();
    let mut manual_seen = false;

    for (index, method) in summary.methods.iter().enumerate() {
        let definition = &class.methods.values[index];
        if definition.is_abstract() || definition.is_native() || method.name.starts_with('<') {
            continue;
        }

        if method.carries_flow_annotation() {
            if method.flow_manual {
                manual_seen = true;
            } else {
                candidates.push(index);
            }
            continue;
        }

        // Not annotated here; a declaration up the overridable chain may
        // still make this an override of a flow method
        let mut parents: Vec<String> = Vec::new();
        if let Some(super_name) = &summary.super_name {
            parents.push(super_name.clone());
        }
        parents.extend(summary.interfaces.iter().cloned());

        for parent in parents {
            match resolver.annotated_in_hierarchy(&parent, &method.name, &method.descriptor)? {
                Some(true) => {
                    candidates.push(index);
                    break;
                }
                // The carrier opted out; so does the override
                Some(false) => break,
                None => {}
            }
        }
    }

    if !candidates.is_empty() {
        Ok(Inspection::Transform(candidates))
    } else if manual_seen {
        Ok(Inspection::AlreadyTransformed)
    } else {
        Ok(Inspection::NoFlowMethods)
    }
}

/// Stamp the sentinel attribute; emitted classes answer AlreadyTransformed
/// from then on.
pub fn mark(class: &mut ClassFile) {
    let mut pool = class.constant_pool.clone();
    class
        .attributes
        .put(&mut pool, protocol::WOVEN_ATTRIBUTE, vec![]);
}
