mod util;

use anyhow::Result;
use parse::annotations::VisibleAnnotations;
use parse::attributes::Attributes;
use parse::codec::{MethodBody, Region};
use parse::flags::MethodAccessFlags;
use parse::insn::{Insn, InsnList, InvokeKind, LocalKind};
use parse::opcodes as op;
use parse::parser::Parser;
use util::builder::{ClassBuilder, MethodSpec};
use weaver::{protocol, MemoryProvider, Outcome, Weaver};

fn fresh_weaver() -> Weaver {
    Weaver::new(Box::new(MemoryProvider::new()))
}

#[test]
fn it_weaves_a_flow_method_and_stamps_the_sentinel() -> Result<()> {
    let bytes = ClassBuilder::new("demo/Task")
        .method(
            MethodSpec::new("run", "()V")
                .flow()
                .body(0, 1, |code| {
                    code.push_back(Insn::Op(op::RETURN));
                }),
        )
        .build()?;

    let weaver = fresh_weaver();
    let woven = util::weave(&weaver, &bytes)?;

    let (class, body) = util::decoded_method(&woven, "run")?;
    assert!(class.attributes.has(protocol::WOVEN_ATTRIBUTE));

    // The method-level marker flipped to manual = true
    let method = class.methods.locate("run", "()V").expect("run survives");
    let annotations: VisibleAnnotations =
        method.attributes.known_attribute(&class.constant_pool)?;
    let flow = annotations
        .annotations
        .iter()
        .find(|a| a.type_descriptor == protocol::FLOW_ANNOTATION)
        .expect("flow annotation kept");
    assert_eq!(
        flow.bool_element(&class.constant_pool, protocol::MANUAL_ELEMENT)?,
        Some(true)
    );

    // The body now opens with the frame entry protocol
    let insns: Vec<Insn> = util::instructions(&body)
        .into_iter()
        .filter(|i| !matches!(i, Insn::Label(_) | Insn::Line(_)))
        .collect();
    assert_eq!(
        insns[0],
        Insn::Load {
            kind: LocalKind::Reference,
            index: 0
        }
    );
    assert!(matches!(&insns[1], Insn::Push(parse::insn::PushValue::String(s)) if s == "run"));
    assert!(matches!(&insns[2], Insn::Push(parse::insn::PushValue::String(s)) if s == "()V"));
    assert!(matches!(
        &insns[3],
        Insn::Invoke { kind: InvokeKind::Static, owner, name, .. }
            if owner == protocol::FRAME_CLASS && name == protocol::ENTER.0
    ));

    // And it ends through the shared landings
    assert_eq!(util::protocol_calls(&util::instructions(&body), "exit").len(), 2);

    Ok(())
}

#[test]
fn it_detects_idempotence_on_the_second_pass() -> Result<()> {
    let bytes = ClassBuilder::new("demo/Task")
        .method(
            MethodSpec::new("run", "()V")
                .flow()
                .body(0, 1, |code| {
                    code.push_back(Insn::Op(op::RETURN));
                }),
        )
        .build()?;

    let weaver = fresh_weaver();
    let woven = util::weave(&weaver, &bytes)?;

    assert_eq!(
        weaver.transform(&woven).unwrap(),
        Outcome::AlreadyTransformed
    );

    Ok(())
}

#[test]
fn it_passes_through_classes_without_flow_methods() -> Result<()> {
    let bytes = ClassBuilder::new("demo/Plain")
        .method(MethodSpec::new("a", "()V").body(0, 1, |code| {
            code.push_back(Insn::Op(op::RETURN));
        }))
        .method(MethodSpec::new("b", "()V").body(0, 1, |code| {
            code.push_back(Insn::Op(op::RETURN));
        }))
        .build()?;

    let weaver = fresh_weaver();
    assert_eq!(weaver.transform(&bytes).unwrap(), Outcome::NoFlowMethods);

    Ok(())
}

#[test]
fn it_treats_manual_marked_methods_as_already_woven() -> Result<()> {
    let bytes = ClassBuilder::new("demo/Handwoven")
        .method(
            MethodSpec::new("run", "()V")
                .flow()
                .manual(true)
                .body(0, 1, |code| {
                    code.push_back(Insn::Op(op::RETURN));
                }),
        )
        .build()?;

    let weaver = fresh_weaver();
    assert_eq!(
        weaver.transform(&bytes).unwrap(),
        Outcome::AlreadyTransformed
    );

    Ok(())
}

#[test]
fn it_rejects_malformed_input() {
    let weaver = fresh_weaver();
    assert!(matches!(
        weaver.transform(&[0xde, 0xad, 0xbe, 0xef]),
        Err(weaver::WeaveError::Input(_))
    ));
}

/// The compiler-produced synchronized shape: a finally region whose handler
/// is its own start. The rewrite must drop the self-loop and keep the rest.
#[test]
fn it_drops_self_looping_any_regions() -> Result<()> {
    let mut code = InsnList::new();
    let guarded = code.new_label();
    let guarded_end = code.new_label();
    let handler = code.new_label();
    let handler_end = code.new_label();
    let done = code.new_label();

    code.push_back(Insn::Load {
        kind: LocalKind::Reference,
        index: 0,
    });
    code.push_back(Insn::Op(op::DUP));
    code.push_back(Insn::Store {
        kind: LocalKind::Reference,
        index: 1,
    });
    code.push_back(Insn::Op(op::MONITORENTER));

    code.push_back(Insn::Label(guarded));
    code.push_back(Insn::Load {
        kind: LocalKind::Reference,
        index: 1,
    });
    code.push_back(Insn::Op(op::MONITOREXIT));
    code.push_back(Insn::Jump {
        op: op::GOTO,
        target: done,
    });
    code.push_back(Insn::Label(guarded_end));

    code.push_back(Insn::Label(handler));
    code.push_back(Insn::Store {
        kind: LocalKind::Reference,
        index: 2,
    });
    code.push_back(Insn::Load {
        kind: LocalKind::Reference,
        index: 1,
    });
    code.push_back(Insn::Op(op::MONITOREXIT));
    code.push_back(Insn::Load {
        kind: LocalKind::Reference,
        index: 2,
    });
    code.push_back(Insn::Op(op::ATHROW));
    code.push_back(Insn::Label(handler_end));

    code.push_back(Insn::Label(done));
    code.push_back(Insn::Op(op::RETURN));

    let mut spec = MethodSpec::new("locked", "()V").flow();
    spec.body = Some(MethodBody {
        max_stack: 2,
        max_locals: 3,
        code,
        regions: vec![
            Region {
                start: guarded,
                end: guarded_end,
                handler,
                catch_type: None,
            },
            // The degenerate self-loop
            Region {
                start: handler,
                end: handler_end,
                handler,
                catch_type: None,
            },
        ],
        extra_attributes: Attributes::empty(),
    });

    let bytes = ClassBuilder::new("demo/Sync").method(spec).build()?;

    let weaver = fresh_weaver();
    let woven = util::weave(&weaver, &bytes)?;
    let (_, body) = util::decoded_method(&woven, "locked")?;

    assert!(body
        .regions
        .iter()
        .all(|r| !(r.start == r.handler && r.catch_type.is_none())));
    // The real guarded region survives alongside the new catch-all
    assert_eq!(body.regions.len(), 2);

    // Both native monitor operations are mirrored onto the frame
    let insns = util::instructions(&body);
    assert_eq!(util::protocol_calls(&insns, "monitorEnter").len(), 1);
    assert_eq!(util::protocol_calls(&insns, "monitorExit").len(), 2);

    Ok(())
}

#[test]
fn it_only_writes_back_on_transformed() -> Result<()> {
    let bytes = ClassBuilder::new("demo/Task")
        .method(
            MethodSpec::new("run", "()V")
                .flow()
                .body(0, 1, |code| {
                    code.push_back(Insn::Op(op::RETURN));
                }),
        )
        .build()?;

    let dir = std::env::temp_dir().join(format!("weft-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("Task.class");
    std::fs::write(&path, &bytes)?;

    let weaver = fresh_weaver();

    assert!(matches!(
        weaver.transform_path(&path).unwrap(),
        Outcome::Transformed(_)
    ));
    let woven = std::fs::read(&path)?;
    assert_ne!(woven, bytes);
    assert!(Parser::new(&woven)
        .parse()?
        .attributes
        .has(protocol::WOVEN_ATTRIBUTE));

    // Second run detects the sentinel and leaves the file alone
    assert_eq!(
        weaver.transform_path(&path).unwrap(),
        Outcome::AlreadyTransformed
    );
    assert_eq!(std::fs::read(&path)?, woven);

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn it_skips_abstract_and_initialiser_methods() -> Result<()> {
    let bytes = ClassBuilder::new("demo/Edge")
        .method(
            MethodSpec::new("gone", "()V")
                .flags(MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT)
                .flow(),
        )
        .method(MethodSpec::new("<init>", "()V").flow().body(0, 1, |code| {
            code.push_back(Insn::Op(op::RETURN));
        }))
        .build()?;

    let weaver = fresh_weaver();
    assert_eq!(weaver.transform(&bytes).unwrap(), Outcome::NoFlowMethods);

    Ok(())
}
