//! The entry protocol and resume-point dispatch. A pure function of the
//! resume descriptors and the reserved frame local: enter the frame, and if
//! any invocation was decorated, branch through a dense table switch to the
//! matching trampoline, which restores the live locals and jumps back to its
//! before-invocation label. Ids are assigned densely from 1, so the switch
//! needs no gaps.

use parse::codec::MethodBody;
use parse::insn::{Insn, InvokeKind, LocalKind, PushValue};
use parse::opcodes as op;

use crate::decorate::{frame_call, load_frame, narrowing_cast};
use crate::protocol;
use crate::rewrite::ResumeDescriptor;

fn local_kind(ty: &crate::analysis::AbstractType) -> LocalKind {
    use crate::analysis::AbstractType;
    match ty {
        AbstractType::Int => LocalKind::Int,
        AbstractType::Long => LocalKind::Long,
        AbstractType::Float => LocalKind::Float,
        AbstractType::Double => LocalKind::Double,
        _ => LocalKind::Reference,
    }
}

fn restore_call(ty: &crate::analysis::AbstractType) -> Insn {
    use crate::analysis::AbstractType;
    frame_call(match ty {
        AbstractType::Int => protocol::RESTORE_INT,
        AbstractType::Long => protocol::RESTORE_LONG,
        AbstractType::Float => protocol::RESTORE_FLOAT,
        AbstractType::Double => protocol::RESTORE_DOUBLE,
        _ => protocol::RESTORE_REFERENCE,
    })
}

/// Prepend the dispatch prologue. `descriptors` must be sorted by id and
/// dense from 1.
pub fn build_prologue(
    body: &mut MethodBody,
    descriptors: &[ResumeDescriptor],
    frame_local: u16,
    class_name: &str,
    method_name: &str,
    method_descriptor: &str,
    is_static: bool,
) {
    let first = match body.code.first() {
        Some(first) => first,
        None => return,
    };

    let mut sequence = Vec::new();

    // Owner, name, descriptor -> enter
    if is_static {
        sequence.push(Insn::Push(PushValue::Class(class_name.to_string())));
    } else {
        sequence.push(Insn::Load {
            kind: LocalKind::Reference,
            index: 0,
        });
    }
    sequence.push(Insn::Push(PushValue::String(method_name.to_string())));
    sequence.push(Insn::Push(PushValue::String(method_descriptor.to_string())));
    sequence.push(Insn::Invoke {
        kind: InvokeKind::Static,
        owner_interface: false,
        owner: protocol::FRAME_CLASS.to_string(),
        name: protocol::ENTER.0.to_string(),
        descriptor: protocol::ENTER.1.to_string(),
    });

    if !descriptors.is_empty() {
        sequence.push(Insn::Op(op::DUP));
    }
    sequence.push(Insn::Store {
        kind: LocalKind::Reference,
        index: frame_local,
    });

    if !descriptors.is_empty() {
        let fall_through = body.code.new_label();
        let trampolines: Vec<_> = descriptors.iter().map(|_| body.code.new_label()).collect();

        sequence.push(frame_call(protocol::RESUME_POINT));
        sequence.push(Insn::TableSwitch {
            low: 1,
            high: descriptors.len() as i32,
            default: fall_through,
            targets: trampolines.clone(),
        });

        for (descriptor, label) in descriptors.iter().zip(trampolines) {
            sequence.push(Insn::Label(label));
            sequence.push(load_frame(frame_local));
            sequence.push(Insn::Push(PushValue::Int(descriptor.local_prims as i32)));
            sequence.push(Insn::Push(PushValue::Int(descriptor.local_refs as i32)));
            sequence.push(frame_call(protocol::PREPARE));

            // Locals come back out of the buffers in reverse save order
            for (slot, ty) in descriptor.locals.iter().rev() {
                sequence.push(Insn::Op(op::DUP));
                sequence.push(restore_call(ty));
                if let Some(cast) = narrowing_cast(ty) {
                    sequence.push(cast);
                }
                sequence.push(Insn::Store {
                    kind: local_kind(ty),
                    index: *slot,
                });
            }

            if descriptor.stack_prims + descriptor.stack_refs > 0 {
                // Advance the cursors over the stack image; the call site
                // consumes the frame reference while restoring it
                sequence.push(Insn::Push(PushValue::Int(
                    (descriptor.local_prims + descriptor.stack_prims) as i32,
                )));
                sequence.push(Insn::Push(PushValue::Int(
                    (descriptor.local_refs + descriptor.stack_refs) as i32,
                )));
                sequence.push(frame_call(protocol::PREPARE));
            } else {
                sequence.push(Insn::Op(op::POP));
            }

            sequence.push(Insn::Jump {
                op: op::GOTO,
                target: descriptor.label,
            });
        }

        sequence.push(Insn::Label(fall_through));
    }

    body.code.insert_all_before(first, sequence);
}
