use crate::error::ContractError;
use crate::frame::{FrameState, MethodFrame, Owner};
use crate::ProtocolResult;
use tracing::debug;

/// Index of a frame in its flow's arena. Frames are never moved or freed
/// individually; the whole arena goes away when the flow ends, so an id stays
/// valid for the flow's lifetime and the prior/next links cannot dangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

/// One logical execution. The flow owns every frame it ever created and a
/// `top` cursor for the chain currently mounted on the host thread.
///
/// `R` is the embedder's reference representation; the protocol only clones
/// and compares it.
#[derive(Debug, Default)]
pub struct Flow<R> {
    frames: Vec<MethodFrame<R>>,
    top: Option<FrameId>,
    /// Deepest frame of a chain that left the thread; resume starts here.
    suspended: Option<FrameId>,
    /// Root frame handed out by the next `enter` after a resume handoff.
    pending_resume: Option<FrameId>,
}

impl<R: Clone + PartialEq> Flow<R> {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            top: None,
            suspended: None,
            pending_resume: None,
        }
    }

    pub fn current(&self) -> Option<FrameId> {
        self.top
    }

    pub fn frame(&self, id: FrameId) -> &MethodFrame<R> {
        &self.frames[id.0]
    }

    fn frame_mut(&mut self, id: FrameId) -> &mut MethodFrame<R> {
        &mut self.frames[id.0]
    }

    fn push_frame(&mut self, owner: Owner<R>, name: &str, descriptor: &str) -> FrameId {
        let id = FrameId(self.frames.len());
        self.frames
            .push(MethodFrame::new(owner, name, descriptor, self.top));
        self.top = Some(id);
        id
    }

    fn check_identity(
        &self,
        id: FrameId,
        owner: &Owner<R>,
        name: &str,
        descriptor: &str,
    ) -> ProtocolResult<()> {
        let frame = self.frame(id);
        if frame.name != name || frame.descriptor != descriptor || &frame.owner != owner {
            return Err(ContractError::ResumeMismatch {
                expected: format!("{}", frame),
                found: format!(".{}{}", name, descriptor),
            });
        }
        Ok(())
    }

    /// The prologue of every woven method. Creates a fresh frame on the
    /// ordinary call path; during a resume walk it hands back the preserved
    /// frame instead, validated against the caller's identity.
    pub fn enter(
        &mut self,
        owner: Owner<R>,
        name: &str,
        descriptor: &str,
    ) -> ProtocolResult<FrameId> {
        if let Some(root) = self.pending_resume.take() {
            self.check_identity(root, &owner, name, descriptor)?;
            self.top = Some(root);
            debug!("re-entered root frame {}", self.frame(root));
            return Ok(root);
        }

        let Some(top) = self.top else {
            return Ok(self.push_frame(owner, name, descriptor));
        };

        match self.frame(top).state {
            FrameState::Active | FrameState::Invoking => {
                Ok(self.push_frame(owner, name, descriptor))
            }
            FrameState::Restoring => match self.frame(top).next {
                Some(next) => {
                    self.check_identity(next, &owner, name, descriptor)?;
                    self.frame_mut(top).state = FrameState::Invoking;
                    self.frame_mut(top).next = None;
                    self.top = Some(next);
                    debug!("resume walk advanced to {}", self.frame(next));
                    Ok(next)
                }
                // The walk reached the suspension frontier; from here on the
                // callee is materialised fresh
                None => {
                    self.frame_mut(top).state = FrameState::Invoking;
                    Ok(self.push_frame(owner, name, descriptor))
                }
            },
            state => Err(ContractError::CorruptedFrame(format!(
                "enter below a frame in {:?} state",
                state
            ))),
        }
    }

    /// The saved resume point of the frame just entered; 0 means no pending
    /// resume and the dispatch switch falls through to the method start.
    pub fn resume_point(&mut self, id: FrameId) -> u32 {
        let frame = self.frame_mut(id);
        let point = frame.resume_point;
        if point == 0 && frame.state == FrameState::Restoring {
            frame.state = FrameState::Active;
        }
        point
    }

    /// Position the cursors without touching storage. The trampoline uses
    /// this twice: once for local restoration, once to skip forward over the
    /// stack slots the call site will restore.
    pub fn prepare(&mut self, id: FrameId, prim_top: usize, ref_top: usize) -> ProtocolResult<()> {
        let frame = self.frame_mut(id);
        if prim_top > frame.prims.len() || ref_top > frame.objs.len() {
            return Err(ContractError::CorruptedFrame(format!(
                "prepare({}, {}) beyond buffers of {}/{}",
                prim_top,
                ref_top,
                frame.prims.len(),
                frame.objs.len()
            )));
        }
        frame.prim_index = prim_top;
        frame.obj_index = ref_top;
        Ok(())
    }

    /// Opens a suspension point: records the resume id, sizes the buffers for
    /// the saves that follow and moves the frame to INVOKING. The monitor
    /// balance must be settled here; a structured lock held across a
    /// suspension point cannot be preserved.
    pub fn notify_invoke(
        &mut self,
        id: FrameId,
        invocation: u32,
        total_prim: usize,
        total_ref: usize,
    ) -> ProtocolResult<()> {
        let frame = self.frame_mut(id);
        if frame.monitors != 0 {
            return Err(ContractError::IllegalMonitorState {
                held: frame.monitors,
            });
        }
        if invocation == 0 {
            return Err(ContractError::CorruptedFrame(
                "invocation ids start at 1".to_string(),
            ));
        }

        frame.state = FrameState::Invoking;
        frame.resume_point = invocation;
        frame.alloc_buffers(total_prim, total_ref);
        Ok(())
    }

    pub fn save_int(&mut self, id: FrameId, value: i32) -> ProtocolResult<()> {
        self.frame_mut(id).save_word(value as u32)
    }

    pub fn save_float(&mut self, id: FrameId, value: f32) -> ProtocolResult<()> {
        self.frame_mut(id).save_word(value.to_bits())
    }

    pub fn save_long(&mut self, id: FrameId, value: i64) -> ProtocolResult<()> {
        self.frame_mut(id).save_dword(value as u64)
    }

    pub fn save_double(&mut self, id: FrameId, value: f64) -> ProtocolResult<()> {
        self.frame_mut(id).save_dword(value.to_bits())
    }

    pub fn save_reference(&mut self, id: FrameId, value: R) -> ProtocolResult<()> {
        self.frame_mut(id).save_reference(value)
    }

    pub fn restore_int(&mut self, id: FrameId) -> ProtocolResult<i32> {
        Ok(self.frame_mut(id).restore_word()? as i32)
    }

    pub fn restore_float(&mut self, id: FrameId) -> ProtocolResult<f32> {
        Ok(f32::from_bits(self.frame_mut(id).restore_word()?))
    }

    pub fn restore_long(&mut self, id: FrameId) -> ProtocolResult<i64> {
        Ok(self.frame_mut(id).restore_dword()? as i64)
    }

    pub fn restore_double(&mut self, id: FrameId) -> ProtocolResult<f64> {
        Ok(f64::from_bits(self.frame_mut(id).restore_dword()?))
    }

    pub fn restore_reference(&mut self, id: FrameId) -> ProtocolResult<R> {
        self.frame_mut(id).restore_reference()
    }

    /// Observed by the caller right after a decorated invocation. On the
    /// ordinary path the buffers are dropped (the call completed; they would
    /// only pin garbage) and false comes back. On the leaving path the
    /// buffers are the resume image and stay; the frame is popped here, which
    /// makes the second exit from the shared return landing a no-op.
    pub fn is_leaving(&mut self, id: FrameId) -> ProtocolResult<bool> {
        let leaving = self.frame(id).is_leaving_state();
        if leaving {
            self.exit(id)?;
        } else {
            self.frame_mut(id).drop_buffers();
        }
        Ok(leaving)
    }

    /// Pop a settled frame. Exiting a frame that is no longer mounted (the
    /// landing after an `is_leaving` unwind) is a no-op.
    pub fn exit(&mut self, id: FrameId) -> ProtocolResult<()> {
        if self.top != Some(id) || self.frame(id).state == FrameState::Dead {
            return Ok(());
        }

        let state = self.frame(id).state;
        let prior = self.frame(id).prior;
        self.top = prior;

        match state {
            FrameState::LeavingThread => {
                // The chain stays intact: state, resume point and buffers are
                // the suspension image the resume walk will consume
                if let Some(prior) = prior {
                    self.frame_mut(prior).state = FrameState::LeavingThread;
                }
                debug!("frame {} left the thread", self.frame(id));
            }
            FrameState::Restoring => {
                return Err(ContractError::CorruptedFrame(
                    "exit during a resume walk".to_string(),
                ));
            }
            _ => {
                let frame = self.frame_mut(id);
                frame.state = FrameState::Dead;
                frame.drop_buffers();
                frame.next = None;
                if let Some(prior) = prior {
                    let prior = self.frame_mut(prior);
                    prior.state = FrameState::Active;
                    prior.resume_point = 0;
                }
            }
        }

        Ok(())
    }

    /// The abnormal-path exit driven by the catch-all tail. The throwable
    /// itself propagates through the host throw mechanism; only the
    /// bookkeeping happens here. An exception ends this frame for good, even
    /// mid-unwind.
    pub fn exit_throwing(&mut self, id: FrameId) -> ProtocolResult<()> {
        if self.top != Some(id) || self.frame(id).state == FrameState::Dead {
            return Ok(());
        }

        let prior = self.frame(id).prior;
        self.top = prior;

        let frame = self.frame_mut(id);
        frame.state = FrameState::Dead;
        frame.drop_buffers();
        frame.next = None;

        if let Some(prior) = prior {
            let prior = self.frame_mut(prior);
            prior.state = FrameState::Active;
            prior.resume_point = 0;
        }

        if self.suspended == Some(id) {
            self.suspended = None;
        }

        Ok(())
    }

    pub fn monitor_enter(&mut self, id: FrameId, _object: &R) -> ProtocolResult<()> {
        self.frame_mut(id).monitors += 1;
        Ok(())
    }

    pub fn monitor_exit(&mut self, id: FrameId, _object: &R) -> ProtocolResult<()> {
        let frame = self.frame_mut(id);
        frame.monitors -= 1;
        if frame.monitors < 0 {
            return Err(ContractError::IllegalMonitorState {
                held: frame.monitors,
            });
        }
        Ok(())
    }

    /// Scheduling-layer entry: mark the mounted frame as leaving the thread.
    /// Every caller up the chain observes it through `is_leaving` and
    /// unwinds; the chain itself is preserved for `resume`.
    pub fn leave_thread(&mut self) -> ProtocolResult<FrameId> {
        let top = self.top.ok_or(ContractError::NoActiveFrame)?;
        let frame = self.frame_mut(top);
        if frame.monitors != 0 {
            return Err(ContractError::IllegalMonitorState {
                held: frame.monitors,
            });
        }
        frame.state = FrameState::LeavingThread;
        self.suspended = Some(top);
        Ok(top)
    }

    /// Scheduling-layer entry: turn a suspended chain into a resume walk.
    /// Links each parent to its child with the transient `next` pointer,
    /// marks the chain RESTORING and arms the next `enter` to hand out the
    /// root. The caller then re-invokes the root method; the woven prologues
    /// do the rest.
    pub fn resume(&mut self) -> ProtocolResult<FrameId> {
        let deepest = self.suspended.take().ok_or(ContractError::NoActiveFrame)?;

        let mut cursor = deepest;
        self.frame_mut(cursor).state = FrameState::Restoring;
        while let Some(prior) = self.frame(cursor).prior {
            self.frame_mut(prior).next = Some(cursor);
            self.frame_mut(prior).state = FrameState::Restoring;
            cursor = prior;
        }

        self.pending_resume = Some(cursor);
        Ok(cursor)
    }

    // --- result plumbing ---

    fn check_return(&self, id: FrameId, given: char) -> ProtocolResult<()> {
        let expected = self.frame(id).return_char();
        let expected_class = match expected {
            'Z' | 'B' | 'S' | 'C' | 'I' => 'I',
            'L' | '[' => 'L',
            other => other,
        };
        if expected_class != given {
            return Err(ContractError::IllegalReturnValue { expected, given });
        }
        Ok(())
    }

    fn leave_method(&mut self, id: FrameId) -> ProtocolResult<()> {
        let frame = self.frame_mut(id);
        if frame.monitors != 0 {
            return Err(ContractError::IllegalMonitorState {
                held: frame.monitors,
            });
        }
        frame.state = FrameState::LeavingMethod;
        Ok(())
    }

    pub fn result_int(&mut self, id: FrameId, value: i32) -> ProtocolResult<()> {
        self.check_return(id, 'I')?;
        self.frame_mut(id).result_word = value as u32;
        self.leave_method(id)
    }

    pub fn result_float(&mut self, id: FrameId, value: f32) -> ProtocolResult<()> {
        self.check_return(id, 'F')?;
        self.frame_mut(id).result_word = value.to_bits();
        self.leave_method(id)
    }

    pub fn result_long(&mut self, id: FrameId, value: i64) -> ProtocolResult<()> {
        self.check_return(id, 'J')?;
        let frame = self.frame_mut(id);
        frame.result_high = ((value as u64) >> 32) as u32;
        frame.result_word = value as u32;
        self.leave_method(id)
    }

    pub fn result_double(&mut self, id: FrameId, value: f64) -> ProtocolResult<()> {
        self.check_return(id, 'D')?;
        let frame = self.frame_mut(id);
        frame.result_high = (value.to_bits() >> 32) as u32;
        frame.result_word = value.to_bits() as u32;
        self.leave_method(id)
    }

    pub fn result_reference(&mut self, id: FrameId, value: R) -> ProtocolResult<()> {
        self.check_return(id, 'L')?;
        self.frame_mut(id).result_obj = Some(value);
        self.leave_method(id)
    }

    pub fn get_result_int(&self, id: FrameId) -> ProtocolResult<i32> {
        self.check_return(id, 'I')?;
        Ok(self.frame(id).result_word as i32)
    }

    pub fn get_result_float(&self, id: FrameId) -> ProtocolResult<f32> {
        self.check_return(id, 'F')?;
        Ok(f32::from_bits(self.frame(id).result_word))
    }

    pub fn get_result_long(&self, id: FrameId) -> ProtocolResult<i64> {
        self.check_return(id, 'J')?;
        let frame = self.frame(id);
        Ok((((frame.result_high as u64) << 32) | frame.result_word as u64) as i64)
    }

    pub fn get_result_double(&self, id: FrameId) -> ProtocolResult<f64> {
        self.check_return(id, 'D')?;
        let frame = self.frame(id);
        Ok(f64::from_bits(
            ((frame.result_high as u64) << 32) | frame.result_word as u64,
        ))
    }

    pub fn get_result_reference(&self, id: FrameId) -> ProtocolResult<R> {
        self.check_return(id, 'L')?;
        self.frame(id)
            .result_obj
            .clone()
            .ok_or(ContractError::CorruptedFrame(
                "reference result slot is empty".to_string(),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visit::FrameVisitor;

    type Ref = String;

    fn owner() -> Owner<Ref> {
        Owner::Class("demo/Worker".to_string())
    }

    #[derive(Default)]
    struct Capture {
        prims: Vec<u32>,
        prim_cursor: usize,
        refs: Vec<Option<Ref>>,
        ref_cursor: usize,
        state: Option<FrameState>,
        resume_point: u32,
    }

    impl FrameVisitor<Ref> for Capture {
        fn visit_identity(&mut self, _owner: &Owner<Ref>, _name: &str, _descriptor: &str) {}
        fn visit_state(&mut self, state: FrameState, resume_point: u32) {
            self.state = Some(state);
            self.resume_point = resume_point;
        }
        fn visit_primitives(&mut self, words: &[u32], cursor: usize) {
            self.prims = words.to_vec();
            self.prim_cursor = cursor;
        }
        fn visit_references(&mut self, slots: &[Option<Ref>], cursor: usize) {
            self.refs = slots.to_vec();
            self.ref_cursor = cursor;
        }
        fn visit_result(&mut self, _word: u32, _high: u32, _reference: Option<&Ref>) {}
        fn visit_prior(&mut self, _prior: Option<FrameId>) {}
    }

    #[test]
    fn it_enters_and_exits_a_root_frame() -> ProtocolResult<()> {
        let mut flow: Flow<Ref> = Flow::new();

        let frame = flow.enter(owner(), "work", "()V")?;
        assert_eq!(flow.frame(frame).state(), FrameState::Active);
        assert_eq!(flow.resume_point(frame), 0);

        flow.exit(frame)?;
        assert_eq!(flow.frame(frame).state(), FrameState::Dead);
        assert_eq!(flow.current(), None);

        Ok(())
    }

    #[test]
    fn it_saves_each_width_and_restores_in_reverse() -> ProtocolResult<()> {
        let mut flow: Flow<Ref> = Flow::new();
        let frame = flow.enter(owner(), "work", "()V")?;

        // one int + one long + one double = 5 words, one reference
        flow.notify_invoke(frame, 1, 5, 1)?;
        flow.save_int(frame, -7)?;
        flow.save_long(frame, 0x0102030405060708)?;
        flow.save_double(frame, 2.5)?;
        flow.save_reference(frame, "payload".to_string())?;

        let mut capture = Capture::default();
        flow.visit_frame(frame, &mut capture)?;
        assert_eq!(capture.prim_cursor, 5);
        assert_eq!(capture.ref_cursor, 1);
        // 64 bit values land high word first
        assert_eq!(capture.prims[1], 0x01020304);
        assert_eq!(capture.prims[2], 0x05060708);

        assert_eq!(flow.restore_reference(frame)?, "payload");
        assert_eq!(flow.restore_double(frame)?, 2.5);
        assert_eq!(flow.restore_long(frame)?, 0x0102030405060708);
        assert_eq!(flow.restore_int(frame)?, -7);

        Ok(())
    }

    #[test]
    fn it_repositions_cursors_with_prepare() -> ProtocolResult<()> {
        let mut flow: Flow<Ref> = Flow::new();
        let frame = flow.enter(owner(), "work", "()V")?;

        flow.notify_invoke(frame, 1, 2, 0)?;
        flow.save_int(frame, 1)?;
        flow.save_int(frame, 2)?;
        assert_eq!(flow.restore_int(frame)?, 2);
        assert_eq!(flow.restore_int(frame)?, 1);

        // A resume repositions and reads the same image again
        flow.prepare(frame, 2, 0)?;
        assert_eq!(flow.restore_int(frame)?, 2);
        assert_eq!(flow.restore_int(frame)?, 1);

        assert!(flow.prepare(frame, 3, 0).is_err());

        Ok(())
    }

    #[test]
    fn it_rejects_held_monitors_at_a_suspension_point() -> ProtocolResult<()> {
        let mut flow: Flow<Ref> = Flow::new();
        let frame = flow.enter(owner(), "work", "()V")?;
        let lock = "lock".to_string();

        flow.monitor_enter(frame, &lock)?;
        assert_eq!(
            flow.notify_invoke(frame, 1, 0, 0),
            Err(ContractError::IllegalMonitorState { held: 1 })
        );

        flow.monitor_exit(frame, &lock)?;
        flow.notify_invoke(frame, 1, 0, 0)?;

        Ok(())
    }

    #[test]
    fn it_rejects_unbalanced_monitor_exits() -> ProtocolResult<()> {
        let mut flow: Flow<Ref> = Flow::new();
        let frame = flow.enter(owner(), "work", "()V")?;
        let lock = "lock".to_string();

        assert!(flow.monitor_exit(frame, &lock).is_err());

        Ok(())
    }

    #[test]
    fn it_checks_typed_results_against_the_descriptor() -> ProtocolResult<()> {
        let mut flow: Flow<Ref> = Flow::new();
        let frame = flow.enter(owner(), "count", "()I")?;

        assert_eq!(
            flow.result_long(frame, 9),
            Err(ContractError::IllegalReturnValue {
                expected: 'I',
                given: 'J'
            })
        );

        flow.result_int(frame, 9)?;
        assert_eq!(flow.frame(frame).state(), FrameState::LeavingMethod);
        assert_eq!(flow.get_result_int(frame)?, 9);
        assert!(flow.get_result_reference(frame).is_err());

        Ok(())
    }

    #[test]
    fn it_accepts_boolean_results_as_ints() -> ProtocolResult<()> {
        let mut flow: Flow<Ref> = Flow::new();
        let frame = flow.enter(owner(), "check", "()Z")?;

        flow.result_int(frame, 1)?;
        assert_eq!(flow.get_result_int(frame)?, 1);

        Ok(())
    }

    #[test]
    fn it_drops_buffers_after_a_completed_call() -> ProtocolResult<()> {
        let mut flow: Flow<Ref> = Flow::new();
        let frame = flow.enter(owner(), "work", "()V")?;

        flow.notify_invoke(frame, 1, 1, 1)?;
        flow.save_int(frame, 5)?;
        flow.save_reference(frame, "pinned".to_string())?;

        let child = flow.enter(owner(), "step", "()V")?;
        flow.exit(child)?;

        assert!(!flow.is_leaving(frame)?);

        let mut capture = Capture::default();
        flow.visit_frame(frame, &mut capture)?;
        assert!(capture.prims.is_empty());
        assert!(capture.refs.is_empty());
        // The child's exit rearmed the caller
        assert_eq!(capture.state, Some(FrameState::Active));
        assert_eq!(capture.resume_point, 0);

        Ok(())
    }

    #[test]
    fn it_unwinds_and_resumes_a_two_frame_chain() -> ProtocolResult<()> {
        let mut flow: Flow<Ref> = Flow::new();

        // First pass: outer calls inner, inner leaves the thread
        let outer = flow.enter(owner(), "outer", "()V")?;
        flow.notify_invoke(outer, 1, 1, 0)?;
        flow.save_int(outer, 42)?;

        let inner = flow.enter(owner(), "inner", "()V")?;
        flow.leave_thread()?;
        flow.exit(inner)?;
        assert_eq!(flow.frame(outer).state(), FrameState::LeavingThread);

        assert!(flow.is_leaving(outer)?);
        // The shared landing exits again; that must be a no-op
        flow.exit(outer)?;
        assert_eq!(flow.current(), None);
        assert_eq!(flow.frame(outer).state(), FrameState::LeavingThread);

        // Handoff: possibly on another thread now
        let root = flow.resume()?;
        assert_eq!(root, outer);

        // The woven prologue re-enters the root
        let reentered = flow.enter(owner(), "outer", "()V")?;
        assert_eq!(reentered, outer);
        assert_eq!(flow.resume_point(outer), 1);

        // Trampoline: restore the saved local, jump before the invocation
        flow.prepare(outer, 1, 0)?;
        assert_eq!(flow.restore_int(outer)?, 42);

        // The invocation re-fires; enter consumes the preserved child
        let again = flow.enter(owner(), "inner", "()V")?;
        assert_eq!(again, inner);
        assert_eq!(flow.frame(outer).state(), FrameState::Invoking);
        assert_eq!(flow.resume_point(inner), 0);
        assert_eq!(flow.frame(inner).state(), FrameState::Active);

        // This time the inner method completes
        flow.exit(inner)?;
        assert!(!flow.is_leaving(outer)?);
        flow.exit(outer)?;
        assert_eq!(flow.current(), None);

        Ok(())
    }

    #[test]
    fn it_validates_identity_on_resume() -> ProtocolResult<()> {
        let mut flow: Flow<Ref> = Flow::new();

        let frame = flow.enter(owner(), "outer", "()V")?;
        flow.leave_thread()?;
        flow.exit(frame)?;

        flow.resume()?;
        assert!(matches!(
            flow.enter(owner(), "other", "()V"),
            Err(ContractError::ResumeMismatch { .. })
        ));

        Ok(())
    }

    #[test]
    fn it_ends_a_frame_on_a_thrown_exception() -> ProtocolResult<()> {
        let mut flow: Flow<Ref> = Flow::new();

        let outer = flow.enter(owner(), "outer", "()V")?;
        flow.notify_invoke(outer, 1, 0, 0)?;
        let inner = flow.enter(owner(), "inner", "()V")?;

        flow.exit_throwing(inner)?;
        assert_eq!(flow.frame(inner).state(), FrameState::Dead);
        assert_eq!(flow.frame(outer).state(), FrameState::Active);
        assert_eq!(flow.frame(outer).resume_point(), 0);

        flow.exit_throwing(outer)?;
        assert_eq!(flow.current(), None);

        Ok(())
    }
}
