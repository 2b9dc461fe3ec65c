//! Drives the frame runtime through the exact call sequences the weaver
//! emits, so the two halves of the wire contract are exercised against each
//! other without a host VM.

use runtime::{Flow, FrameState, Owner, ProtocolResult};

type Ref = String;

fn class_owner() -> Owner<Ref> {
    Owner::Class("demo/Calc".to_string())
}

/// The emitted shape of `m(I)I` calling the flow method `n(I)I` when nothing
/// suspends: notify, save the int local and the int stack value, restore the
/// stack value, run the callee, observe isLeaving() == false.
#[test]
fn it_runs_a_decorated_invocation_synchronously() -> ProtocolResult<()> {
    let mut flow: Flow<Ref> = Flow::new();

    let m = flow.enter(class_owner(), "m", "(I)I")?;
    assert_eq!(flow.resume_point(m), 0);

    // notifyInvoke(1, 2, 0)
    flow.notify_invoke(m, 1, 2, 0)?;
    flow.save_int(m, 7)?; // local 0
    flow.save_int(m, 7)?; // the argument already on the stack
    assert_eq!(flow.restore_int(m)?, 7); // stack restoration before the call

    let n = flow.enter(class_owner(), "n", "(I)I")?;
    assert_eq!(flow.resume_point(n), 0);
    // n returns its value natively; its landing exits the frame
    flow.exit(n)?;

    assert!(!flow.is_leaving(m)?);
    flow.exit(m)?;
    assert_eq!(flow.current(), None);

    Ok(())
}

/// The same shape across a suspension: the callee leaves the thread, every
/// frame unwinds preserving its image, and the resume walk lands back at the
/// invocation with locals and stack bit-identical.
#[test]
fn it_suspends_and_resumes_across_the_call() -> ProtocolResult<()> {
    let mut flow: Flow<Ref> = Flow::new();

    let m = flow.enter(class_owner(), "m", "(I)I")?;
    flow.notify_invoke(m, 1, 2, 0)?;
    flow.save_int(m, 7)?;
    flow.save_int(m, 7)?;
    assert_eq!(flow.restore_int(m)?, 7);

    let n = flow.enter(class_owner(), "n", "(I)I")?;
    // Inside n the scheduling layer decides to leave the host thread
    flow.leave_thread()?;
    flow.exit(n)?;

    // m observes the leave, fetches a placeholder result and unwinds
    assert!(flow.is_leaving(m)?);
    flow.get_result_int(m)?;
    flow.exit(m)?; // the landing's exit, a no-op by then
    assert_eq!(flow.current(), None);

    // Handoff; the new thread re-invokes the root method
    flow.resume()?;
    let again = flow.enter(class_owner(), "m", "(I)I")?;
    assert_eq!(again, m);
    assert_eq!(flow.resume_point(m), 1);

    // Trampoline: prepare(1, 0) over the local image, restore local 0
    flow.prepare(m, 1, 0)?;
    assert_eq!(flow.restore_int(m)?, 7);
    // Second prepare over the stack image, then the call site restores it
    flow.prepare(m, 2, 0)?;
    assert_eq!(flow.restore_int(m)?, 7);

    // The invocation re-fires; this time n completes and leaves a result
    let n_again = flow.enter(class_owner(), "n", "(I)I")?;
    assert_eq!(n_again, n);
    assert_eq!(flow.resume_point(n), 0);
    flow.exit(n)?;

    assert!(!flow.is_leaving(m)?);
    assert_eq!(flow.frame(m).state(), FrameState::Active);
    flow.exit(m)?;

    Ok(())
}

/// Three frames deep: the middle caller's buffers hold a reference that must
/// survive the unwind and come back narrowable on resume.
#[test]
fn it_preserves_reference_images_through_a_deep_unwind() -> ProtocolResult<()> {
    let mut flow: Flow<Ref> = Flow::new();

    let a = flow.enter(class_owner(), "a", "()V")?;
    flow.notify_invoke(a, 1, 0, 1)?;
    flow.save_reference(a, "held-by-a".to_string())?;

    let b = flow.enter(class_owner(), "b", "()V")?;
    flow.notify_invoke(b, 2, 0, 1)?;
    flow.save_reference(b, "held-by-b".to_string())?;

    let c = flow.enter(class_owner(), "c", "()V")?;
    flow.leave_thread()?;
    flow.exit(c)?;

    assert!(flow.is_leaving(b)?);
    assert!(flow.is_leaving(a)?);
    assert_eq!(flow.current(), None);

    flow.resume()?;
    let root = flow.enter(class_owner(), "a", "()V")?;
    assert_eq!(root, a);
    assert_eq!(flow.resume_point(a), 1);
    flow.prepare(a, 0, 1)?;
    assert_eq!(flow.restore_reference(a)?, "held-by-a");

    let middle = flow.enter(class_owner(), "b", "()V")?;
    assert_eq!(middle, b);
    assert_eq!(flow.resume_point(b), 2);
    flow.prepare(b, 0, 1)?;
    assert_eq!(flow.restore_reference(b)?, "held-by-b");

    let inner = flow.enter(class_owner(), "c", "()V")?;
    assert_eq!(inner, c);
    assert_eq!(flow.resume_point(c), 0);

    flow.exit(c)?;
    assert!(!flow.is_leaving(b)?);
    flow.exit(b)?;
    assert!(!flow.is_leaving(a)?);
    flow.exit(a)?;
    assert_eq!(flow.current(), None);

    Ok(())
}
