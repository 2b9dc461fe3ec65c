use crate::error::ContractError;
use crate::flow::{Flow, FrameId};
use crate::frame::{FrameState, Owner};
use crate::ProtocolResult;

/// Read-only walk over a frame's typed slots. Persisting frames is an
/// external concern; this is the surface a serializer consumes, one callback
/// per slot group the frame record holds.
pub trait FrameVisitor<R> {
    fn visit_identity(&mut self, owner: &Owner<R>, name: &str, descriptor: &str);
    fn visit_state(&mut self, state: FrameState, resume_point: u32);
    fn visit_primitives(&mut self, words: &[u32], cursor: usize);
    fn visit_references(&mut self, slots: &[Option<R>], cursor: usize);
    fn visit_result(&mut self, word: u32, high: u32, reference: Option<&R>);
    fn visit_prior(&mut self, prior: Option<FrameId>);
}

impl<R: Clone + PartialEq> Flow<R> {
    /// Drive a visitor over one frame. A frame holding monitors cannot be
    /// persisted; the balance must be settled before a flow is moved off its
    /// host, so a non-zero count here is a contract violation.
    pub fn visit_frame<V: FrameVisitor<R>>(
        &self,
        id: FrameId,
        visitor: &mut V,
    ) -> ProtocolResult<()> {
        let frame = self.frame(id);
        if frame.monitors() != 0 {
            return Err(ContractError::IllegalMonitorState {
                held: frame.monitors(),
            });
        }

        visitor.visit_identity(frame.owner(), frame.name(), frame.descriptor());
        visitor.visit_state(frame.state(), frame.resume_point());
        visitor.visit_primitives(&frame.prims, frame.prim_index);
        visitor.visit_references(&frame.objs, frame.obj_index);
        visitor.visit_result(
            frame.result_word,
            frame.result_high,
            frame.result_obj.as_ref(),
        );
        visitor.visit_prior(frame.prior());

        Ok(())
    }
}
