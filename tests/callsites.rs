mod util;

use anyhow::Result;
use parse::insn::{Insn, InvokeKind, LocalKind, PushValue};
use parse::opcodes as op;
use util::builder::{ClassBuilder, MethodSpec};
use parse::flags::MethodAccessFlags;
use weaver::{protocol, MemoryProvider, Weaver};

fn static_flags() -> MethodAccessFlags {
    MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC
}

fn invoke_static(owner: &str, name: &str, descriptor: &str) -> Insn {
    Insn::Invoke {
        kind: InvokeKind::Static,
        owner_interface: false,
        owner: owner.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    }
}

fn weaver_with(classes: &[(&str, &[u8])]) -> Weaver {
    let mut provider = MemoryProvider::new();
    for (name, bytes) in classes {
        provider.insert(*name, bytes.to_vec());
    }
    Weaver::new(Box::new(provider))
}

/// One decorated invocation: m(I)I saves its int local and the int already
/// on the stack, notifies (1, 2, 0), and routes the leave path through the
/// typed result slot.
#[test]
fn it_decorates_a_single_invocation() -> Result<()> {
    let bytes = ClassBuilder::new("demo/Calc")
        .method(
            MethodSpec::new("n", "(I)I")
                .flags(static_flags())
                .flow()
                .body(1, 1, |code| {
                    code.push_back(Insn::Load {
                        kind: LocalKind::Int,
                        index: 0,
                    });
                    code.push_back(Insn::Op(op::IRETURN));
                }),
        )
        .method(
            MethodSpec::new("m", "(I)I")
                .flags(static_flags())
                .flow()
                .body(2, 1, |code| {
                    code.push_back(Insn::Load {
                        kind: LocalKind::Int,
                        index: 0,
                    });
                    code.push_back(invoke_static("demo/Calc", "n", "(I)I"));
                    code.push_back(Insn::Push(PushValue::Int(1)));
                    code.push_back(Insn::Op(op::IADD));
                    code.push_back(Insn::Op(op::IRETURN));
                }),
        )
        .build()?;

    let weaver = weaver_with(&[("demo/Calc", &bytes)]);
    let woven = util::weave(&weaver, &bytes)?;
    let (_, body) = util::decoded_method(&woven, "m")?;
    let insns = util::instructions(&body);

    // Entry protocol: class token (static method), name, descriptor, enter
    let plain: Vec<&Insn> = insns
        .iter()
        .filter(|i| !matches!(i, Insn::Label(_) | Insn::Line(_)))
        .collect();
    assert!(matches!(plain[0], Insn::Push(PushValue::Class(c)) if c == "demo/Calc"));
    assert!(matches!(plain[1], Insn::Push(PushValue::String(s)) if s == "m"));
    assert!(matches!(plain[2], Insn::Push(PushValue::String(s)) if s == "(I)I"));
    assert!(matches!(
        plain[3],
        Insn::Invoke { kind: InvokeKind::Static, owner, .. } if owner == protocol::FRAME_CLASS
    ));

    // Dense switch over exactly one resume id
    assert!(insns
        .iter()
        .any(|i| matches!(i, Insn::TableSwitch { low: 1, high: 1, .. })));

    // notifyInvoke(1, 2, 0): one primitive local plus one primitive stack
    // value, no references
    let notifies = util::protocol_calls(&insns, protocol::NOTIFY_INVOKE.0);
    assert_eq!(notifies.len(), 1);
    let at = notifies[0];
    assert_eq!(insns[at - 3], Insn::Push(PushValue::Int(1)));
    assert_eq!(insns[at - 2], Insn::Push(PushValue::Int(2)));
    assert_eq!(insns[at - 1], Insn::Push(PushValue::Int(0)));

    // One local save, one rotated stack save
    assert_eq!(util::protocol_calls(&insns, "save").len(), 2);
    assert_eq!(insns[at + 3], Insn::Op(op::SWAP));

    // Two restores: the trampoline's local and the call site's stack value
    assert_eq!(util::protocol_calls(&insns, "restoreInt").len(), 2);

    // Trampoline prepares twice: locals first, then over the stack image
    assert_eq!(util::protocol_calls(&insns, "prepare").len(), 2);

    // The leave path fetches the typed result
    assert_eq!(util::protocol_calls(&insns, "isLeaving").len(), 1);
    assert_eq!(util::protocol_calls(&insns, "getResultInt").len(), 1);

    Ok(())
}

/// Two decorated self-recursive sites get dense ids 1 and 2 and distinct
/// trampolines.
#[test]
fn it_numbers_sites_densely_and_builds_one_trampoline_each() -> Result<()> {
    let bytes = ClassBuilder::new("demo/Rec")
        .method(
            MethodSpec::new("r", "()V")
                .flow()
                .body(1, 1, |code| {
                    code.push_back(Insn::Load {
                        kind: LocalKind::Reference,
                        index: 0,
                    });
                    code.push_back(Insn::Invoke {
                        kind: InvokeKind::Virtual,
                        owner_interface: false,
                        owner: "demo/Rec".to_string(),
                        name: "r".to_string(),
                        descriptor: "()V".to_string(),
                    });
                    code.push_back(Insn::Load {
                        kind: LocalKind::Reference,
                        index: 0,
                    });
                    code.push_back(Insn::Invoke {
                        kind: InvokeKind::Virtual,
                        owner_interface: false,
                        owner: "demo/Rec".to_string(),
                        name: "r".to_string(),
                        descriptor: "()V".to_string(),
                    });
                    code.push_back(Insn::Op(op::RETURN));
                }),
        )
        .build()?;

    let weaver = weaver_with(&[("demo/Rec", &bytes)]);
    let woven = util::weave(&weaver, &bytes)?;
    let (_, body) = util::decoded_method(&woven, "r")?;
    let insns = util::instructions(&body);

    let notifies = util::protocol_calls(&insns, protocol::NOTIFY_INVOKE.0);
    assert_eq!(notifies.len(), 2);

    let mut ids: Vec<i32> = notifies
        .iter()
        .map(|at| match &insns[at - 3] {
            Insn::Push(PushValue::Int(id)) => *id,
            other => panic!("expected an id push, found {:?}", other),
        })
        .collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);

    let (targets, default) = insns
        .iter()
        .find_map(|i| match i {
            Insn::TableSwitch {
                low: 1,
                high: 2,
                targets,
                default,
            } => Some((targets.clone(), *default)),
            _ => None,
        })
        .expect("a dense two-case switch");
    assert_ne!(targets[0], targets[1]);
    assert!(!targets.contains(&default));

    Ok(())
}

/// A 64 bit value on the operand stack crosses the frame reference with the
/// dup_x2/pop shape, both saving and restoring.
#[test]
fn it_rotates_wide_values_with_dup_x2() -> Result<()> {
    let bytes = ClassBuilder::new("demo/Wide")
        .method(
            MethodSpec::new("e", "(J)J")
                .flags(static_flags())
                .flow()
                .body(2, 2, |code| {
                    code.push_back(Insn::Load {
                        kind: LocalKind::Long,
                        index: 0,
                    });
                    code.push_back(Insn::Op(op::LRETURN));
                }),
        )
        .method(
            MethodSpec::new("w", "(J)J")
                .flags(static_flags())
                .flow()
                .body(4, 2, |code| {
                    code.push_back(Insn::Load {
                        kind: LocalKind::Long,
                        index: 0,
                    });
                    code.push_back(invoke_static("demo/Wide", "e", "(J)J"));
                    code.push_back(Insn::Op(op::LRETURN));
                }),
        )
        .build()?;

    let weaver = weaver_with(&[("demo/Wide", &bytes)]);
    let woven = util::weave(&weaver, &bytes)?;
    let (_, body) = util::decoded_method(&woven, "w")?;
    let insns = util::instructions(&body);

    let wide_saves: Vec<usize> = insns
        .iter()
        .enumerate()
        .filter_map(|(at, i)| match i {
            Insn::Invoke {
                owner, descriptor, ..
            } if owner == protocol::FRAME_CLASS
                && descriptor == protocol::SAVE_LONG.1 =>
            {
                Some(at)
            }
            _ => None,
        })
        .collect();
    assert_eq!(wide_saves.len(), 2);

    // The stack save (the second one emitted) is fed by the rotation
    let stack_save = wide_saves[1];
    assert_eq!(insns[stack_save - 2], Insn::Op(op::DUP_X2));
    assert_eq!(insns[stack_save - 1], Insn::Op(op::POP));

    // The long comes back through restoreLong on both paths
    assert_eq!(util::protocol_calls(&insns, "restoreLong").len(), 2);
    assert_eq!(util::protocol_calls(&insns, "getResultLong").len(), 1);

    Ok(())
}

/// A reference result from the frame is narrowed back to the static return
/// type before the landing returns it.
#[test]
fn it_narrows_reference_results() -> Result<()> {
    let bytes = ClassBuilder::new("demo/Names")
        .method(
            MethodSpec::new("t", "()Ljava/lang/String;")
                .flags(static_flags())
                .flow()
                .body(1, 0, |code| {
                    code.push_back(Insn::Push(PushValue::String("weft".to_string())));
                    code.push_back(Insn::Op(op::ARETURN));
                }),
        )
        .method(
            MethodSpec::new("s", "()Ljava/lang/String;")
                .flags(static_flags())
                .flow()
                .body(3, 0, |code| {
                    code.push_back(invoke_static("demo/Names", "t", "()Ljava/lang/String;"));
                    code.push_back(Insn::Op(op::ARETURN));
                }),
        )
        .build()?;

    let weaver = weaver_with(&[("demo/Names", &bytes)]);
    let woven = util::weave(&weaver, &bytes)?;
    let (_, body) = util::decoded_method(&woven, "s")?;
    let insns = util::instructions(&body);

    let getters = util::protocol_calls(&insns, "getResultObject");
    assert_eq!(getters.len(), 1);
    assert_eq!(
        insns[getters[0] + 1],
        Insn::TypeOp {
            op: op::CHECKCAST,
            class_name: "java/lang/String".to_string()
        }
    );

    // No stack values at the site: the frame reference is popped before the
    // resume label rather than consumed by a restore
    assert!(util::protocol_calls(&insns, "restoreObject").is_empty());

    Ok(())
}
