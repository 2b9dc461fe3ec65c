//! Stateless emission helpers: the catch-all/return tail, monitor
//! decoration, and the save/notify/restore choreography around a decorated
//! invocation. Everything here inserts around existing instructions and
//! never reorders them.

use anyhow::{anyhow, Result};
use parse::codec::MethodBody;
use parse::insn::{Insn, InsnId, InvokeKind, LabelId, LocalKind, PushValue};
use parse::opcodes as op;
use support::descriptor::{FieldType, MethodType};

use crate::analysis::{AbstractFrame, AbstractType};
use crate::protocol::{self, ProtocolMethod};
use crate::rewrite::ResumeDescriptor;

/// An invokevirtual on the frame protocol class.
pub fn frame_call(method: ProtocolMethod) -> Insn {
    Insn::Invoke {
        kind: InvokeKind::Virtual,
        owner_interface: false,
        owner: protocol::FRAME_CLASS.to_string(),
        name: method.0.to_string(),
        descriptor: method.1.to_string(),
    }
}

pub fn load_frame(frame_local: u16) -> Insn {
    Insn::Load {
        kind: LocalKind::Reference,
        index: frame_local,
    }
}

fn local_kind(ty: &AbstractType) -> LocalKind {
    match ty {
        AbstractType::Int => LocalKind::Int,
        AbstractType::Long => LocalKind::Long,
        AbstractType::Float => LocalKind::Float,
        AbstractType::Double => LocalKind::Double,
        _ => LocalKind::Reference,
    }
}

fn save_call(ty: &AbstractType) -> Insn {
    frame_call(match ty {
        AbstractType::Int => protocol::SAVE_INT,
        AbstractType::Long => protocol::SAVE_LONG,
        AbstractType::Float => protocol::SAVE_FLOAT,
        AbstractType::Double => protocol::SAVE_DOUBLE,
        _ => protocol::SAVE_REFERENCE,
    })
}

fn restore_call(ty: &AbstractType) -> Insn {
    frame_call(match ty {
        AbstractType::Int => protocol::RESTORE_INT,
        AbstractType::Long => protocol::RESTORE_LONG,
        AbstractType::Float => protocol::RESTORE_FLOAT,
        AbstractType::Double => protocol::RESTORE_DOUBLE,
        _ => protocol::RESTORE_REFERENCE,
    })
}

/// A checkcast narrowing a restored reference back to its analysed type.
/// Null and Object need no cast.
pub fn narrowing_cast(ty: &AbstractType) -> Option<Insn> {
    let name = ty.internal_name()?;
    if name == protocol::OBJECT_CLASS {
        return None;
    }
    Some(Insn::TypeOp {
        op: op::CHECKCAST,
        class_name: name,
    })
}

pub fn return_opcode(return_type: &FieldType) -> u8 {
    use support::descriptor::BaseType;
    match return_type {
        FieldType::Base(BaseType::Void) => op::RETURN,
        FieldType::Base(BaseType::Long) => op::LRETURN,
        FieldType::Base(BaseType::Float) => op::FRETURN,
        FieldType::Base(BaseType::Double) => op::DRETURN,
        FieldType::Base(_) => op::IRETURN,
        _ => op::ARETURN,
    }
}

fn result_getter(return_type: &FieldType) -> ProtocolMethod {
    use support::descriptor::BaseType;
    match return_type {
        FieldType::Base(BaseType::Long) => protocol::GET_RESULT_LONG,
        FieldType::Base(BaseType::Float) => protocol::GET_RESULT_FLOAT,
        FieldType::Base(BaseType::Double) => protocol::GET_RESULT_DOUBLE,
        FieldType::Base(_) => protocol::GET_RESULT_INT,
        _ => protocol::GET_RESULT_REFERENCE,
    }
}

fn pop_of(width: usize) -> Insn {
    if width == 2 {
        Insn::Op(op::POP2)
    } else {
        Insn::Op(op::POP)
    }
}

/// Append the shared tail: the catch-all landing that reports the throwable
/// to the frame and rethrows, and the normal return landing that exits the
/// frame and returns. Returns (catch label, return label).
pub fn append_tail(
    body: &mut MethodBody,
    frame_local: u16,
    return_type: &FieldType,
) -> (LabelId, LabelId) {
    let catch_label = body.code.new_label();
    let return_label = body.code.new_label();

    body.code.push_back(Insn::Label(catch_label));
    body.code.push_back(Insn::Op(op::DUP));
    body.code.push_back(load_frame(frame_local));
    body.code.push_back(Insn::Op(op::SWAP));
    body.code.push_back(frame_call(protocol::EXIT_THROWING));
    body.code.push_back(Insn::Op(op::ATHROW));

    body.code.push_back(Insn::Label(return_label));
    body.code.push_back(load_frame(frame_local));
    body.code.push_back(frame_call(protocol::EXIT));
    body.code.push_back(Insn::Op(return_opcode(return_type)));

    (catch_label, return_label)
}

/// Replace a return opcode: clear everything below the returned value with
/// width-shaped shuffles, then jump to the shared return landing with the
/// value (if any) left on top.
pub fn rewrite_return(
    body: &mut MethodBody,
    at: InsnId,
    frame: &AbstractFrame,
    return_label: LabelId,
) -> Result<()> {
    let opcode = match body.code.get(at) {
        Insn::Op(opcode) => *opcode,
        other => return Err(anyhow!("{:?} is not a return", other)),
    };

    let value_width = match opcode {
        op::RETURN => 0,
        op::LRETURN | op::DRETURN => 2,
        _ => 1,
    };

    let junk_count = frame.stack.len() - usize::from(value_width > 0);
    let mut sequence = Vec::new();

    for junk in frame.stack[..junk_count].iter().rev() {
        match (value_width, junk.width()) {
            (0, 1) => sequence.push(Insn::Op(op::POP)),
            (0, 2) => sequence.push(Insn::Op(op::POP2)),
            (1, 1) => sequence.extend([Insn::Op(op::SWAP), Insn::Op(op::POP)]),
            (1, 2) => sequence.extend([
                Insn::Op(op::DUP_X2),
                Insn::Op(op::POP),
                Insn::Op(op::POP2),
            ]),
            (2, 1) => sequence.extend([
                Insn::Op(op::DUP2_X1),
                Insn::Op(op::POP2),
                Insn::Op(op::POP),
            ]),
            _ => sequence.extend([
                Insn::Op(op::DUP2_X2),
                Insn::Op(op::POP2),
                Insn::Op(op::POP2),
            ]),
        }
    }

    body.code.insert_all_before(at, sequence);
    body.code.replace(
        at,
        Insn::Jump {
            op: op::GOTO,
            target: return_label,
        },
    );
    Ok(())
}

/// Mirror a native monitor operation onto the frame's balance: duplicate the
/// monitor object before the opcode, report it to the frame after.
pub fn decorate_monitor(body: &mut MethodBody, at: InsnId, frame_local: u16, enter: bool) {
    let call = if enter {
        protocol::MONITOR_ENTER
    } else {
        protocol::MONITOR_EXIT
    };

    body.code.insert_before(at, Insn::Op(op::DUP));
    body.code.insert_all_after(
        at,
        vec![load_frame(frame_local), Insn::Op(op::SWAP), frame_call(call)],
    );
}

/// The live locals at a call site: slots holding a defined value, wide
/// fillers skipped.
fn live_locals(frame: &AbstractFrame) -> Vec<(u16, AbstractType)> {
    let mut lives = Vec::new();
    let mut slot = 0;
    while slot < frame.locals.len() {
        let ty = &frame.locals[slot];
        if ty.is_defined() && !ty.is_uninitialised() {
            lives.push((slot as u16, ty.clone()));
            slot += ty.width();
        } else {
            slot += 1;
        }
    }
    lives
}

fn split_counts(types: impl Iterator<Item = AbstractType>) -> (usize, usize) {
    let mut prims = 0;
    let mut refs = 0;
    for ty in types {
        if ty.is_reference_like() {
            refs += 1;
        } else {
            prims += ty.width();
        }
    }
    (prims, refs)
}

/// Turn one invocation of a flow callee into a save-suspend-restore point.
/// Emits the notify/save/restore choreography before the invocation and the
/// isLeaving check after it, and returns the resume descriptor the dispatch
/// prologue consumes.
#[allow(clippy::too_many_arguments)]
pub fn decorate_call_site(
    body: &mut MethodBody,
    at: InsnId,
    frame: &AbstractFrame,
    frame_local: u16,
    invocation_id: u32,
    return_label: LabelId,
    method_descriptor: &MethodType,
    callee_descriptor: &MethodType,
    callee_static: bool,
) -> Result<ResumeDescriptor> {
    for ty in frame.stack.iter().chain(frame.locals.iter()) {
        if ty.is_uninitialised() {
            return Err(anyhow!(
                "an uninitialised value is live across a suspension point"
            ));
        }
    }

    let lives = live_locals(frame);
    let (local_prims, local_refs) = split_counts(lives.iter().map(|(_, ty)| ty.clone()));
    let (stack_prims, stack_refs) = split_counts(frame.stack.iter().cloned());

    let before_label = body.code.new_label();

    // Everything leading up to the invocation
    let mut sequence = vec![
        load_frame(frame_local),
        Insn::Push(PushValue::Int(invocation_id as i32)),
        Insn::Push(PushValue::Int((local_prims + stack_prims) as i32)),
        Insn::Push(PushValue::Int((local_refs + stack_refs) as i32)),
        frame_call(protocol::NOTIFY_INVOKE),
    ];

    for (slot, ty) in lives.iter() {
        sequence.push(Insn::Load {
            kind: local_kind(ty),
            index: *slot,
        });
        sequence.push(save_call(ty));
    }

    // Operand stack values, topmost first, rotated above the frame reference
    for ty in frame.stack.iter().rev() {
        if ty.width() == 1 {
            sequence.push(Insn::Op(op::SWAP));
        } else {
            sequence.push(Insn::Op(op::DUP_X2));
            sequence.push(Insn::Op(op::POP));
        }
        sequence.push(save_call(ty));
    }

    if frame.stack.is_empty() {
        sequence.push(Insn::Op(op::POP));
        sequence.push(Insn::Label(before_label));
    } else {
        sequence.push(Insn::Label(before_label));

        // Rebuild the stack in original order; the last restore consumes the
        // frame reference
        for (position, ty) in frame.stack.iter().enumerate() {
            let last = position == frame.stack.len() - 1;
            if !last {
                sequence.push(Insn::Op(op::DUP));
            }
            sequence.push(restore_call(ty));
            if let Some(cast) = narrowing_cast(ty) {
                sequence.push(cast);
            }
            if !last {
                if ty.width() == 1 {
                    sequence.push(Insn::Op(op::SWAP));
                } else {
                    sequence.push(Insn::Op(op::DUP2_X1));
                    sequence.push(Insn::Op(op::POP2));
                }
            }
        }
    }

    body.code.insert_all_before(at, sequence);

    // The leave check after the invocation
    let continue_label = body.code.new_label();
    let mut after = vec![
        load_frame(frame_local),
        frame_call(protocol::IS_LEAVING),
        Insn::Jump {
            op: op::IFEQ,
            target: continue_label,
        },
    ];

    // Clear what the invocation left behind: its result plus whatever sat
    // under the arguments
    if !callee_descriptor.return_type.is_void() {
        after.push(pop_of(callee_descriptor.return_type.width()));
    }
    let consumed = callee_descriptor.parameters.len() + usize::from(!callee_static);
    let below = &frame.stack[..frame.stack.len() - consumed];
    for ty in below.iter().rev() {
        after.push(pop_of(ty.width()));
    }

    if !method_descriptor.return_type.is_void() {
        after.push(load_frame(frame_local));
        after.push(frame_call(result_getter(&method_descriptor.return_type)));
        if let FieldType::Object(object) = &method_descriptor.return_type {
            if object.class_name != protocol::OBJECT_CLASS {
                after.push(Insn::TypeOp {
                    op: op::CHECKCAST,
                    class_name: object.class_name.clone(),
                });
            }
        }
        if let FieldType::Array(array) = &method_descriptor.return_type {
            after.push(Insn::TypeOp {
                op: op::CHECKCAST,
                class_name: format!("[{}", array.field_type.to_string()),
            });
        }
    }

    after.push(Insn::Jump {
        op: op::GOTO,
        target: return_label,
    });
    after.push(Insn::Label(continue_label));

    body.code.insert_all_after(at, after);

    Ok(ResumeDescriptor {
        id: invocation_id,
        label: before_label,
        locals: lives,
        local_prims,
        local_refs,
        stack_prims,
        stack_refs,
    })
}
