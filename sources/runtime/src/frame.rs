use crate::error::ContractError;
use crate::flow::FrameId;
use crate::ProtocolResult;
use enum_as_inner::EnumAsInner;
use std::fmt;
use support::descriptor::MethodType;

/// Lifecycle of one method frame. A frame is ACTIVE while its method runs,
/// INVOKING between notifyInvoke and the callee settling, RESTORING only
/// during a resume walk, and LEAVING_* while an early exit unwinds the host
/// stack. DEAD frames are done and never revived.
#[derive(EnumAsInner, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Active,
    Invoking,
    Restoring,
    Dead,
    LeavingMethod,
    LeavingThread,
}

/// The receiver a frame was entered with: an instance for virtual flow
/// methods, a class token for static ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner<R> {
    Instance(R),
    Class(String),
}

/// The heap record behind one activation of a flow method: identity, state,
/// the typed save buffers, the result slot, monitor balance and the parent
/// link. 64 bit primitives occupy two 32 bit words, high word first.
#[derive(Debug, Clone)]
pub struct MethodFrame<R> {
    pub(crate) owner: Owner<R>,
    pub(crate) name: String,
    pub(crate) descriptor: String,

    pub(crate) state: FrameState,
    pub(crate) resume_point: u32,

    pub(crate) prims: Vec<u32>,
    pub(crate) prim_index: usize,
    pub(crate) objs: Vec<Option<R>>,
    pub(crate) obj_index: usize,

    pub(crate) result_word: u32,
    pub(crate) result_high: u32,
    pub(crate) result_obj: Option<R>,

    pub(crate) monitors: i32,

    pub(crate) prior: Option<FrameId>,
    pub(crate) next: Option<FrameId>,
}

impl<R: Clone> MethodFrame<R> {
    pub(crate) fn new(owner: Owner<R>, name: &str, descriptor: &str, prior: Option<FrameId>) -> Self {
        Self {
            owner,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            state: FrameState::Active,
            resume_point: 0,
            prims: Vec::new(),
            prim_index: 0,
            objs: Vec::new(),
            obj_index: 0,
            result_word: 0,
            result_high: 0,
            result_obj: None,
            monitors: 0,
            prior,
            next: None,
        }
    }

    pub fn owner(&self) -> &Owner<R> {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn resume_point(&self) -> u32 {
        self.resume_point
    }

    pub fn monitors(&self) -> i32 {
        self.monitors
    }

    pub fn prior(&self) -> Option<FrameId> {
        self.prior
    }

    pub fn is_leaving_state(&self) -> bool {
        matches!(
            self.state,
            FrameState::LeavingMethod | FrameState::LeavingThread
        )
    }

    /// The leading character of the method's return type; 'V' when the
    /// descriptor does not parse (the identity came from woven code, so it
    /// always should).
    pub(crate) fn return_char(&self) -> char {
        MethodType::parse(self.descriptor.clone())
            .map(|d| d.return_char())
            .unwrap_or('V')
    }

    pub(crate) fn alloc_buffers(&mut self, prim_capacity: usize, obj_capacity: usize) {
        self.prims = vec![0; prim_capacity];
        self.objs = vec![None; obj_capacity];
        self.prim_index = 0;
        self.obj_index = 0;
    }

    pub(crate) fn drop_buffers(&mut self) {
        self.prims = Vec::new();
        self.objs = Vec::new();
        self.prim_index = 0;
        self.obj_index = 0;
    }

    fn push_word(&mut self, word: u32) -> ProtocolResult<()> {
        if self.prim_index >= self.prims.len() {
            return Err(ContractError::CorruptedFrame(format!(
                "primitive save overruns the {} word buffer",
                self.prims.len()
            )));
        }
        self.prims[self.prim_index] = word;
        self.prim_index += 1;
        Ok(())
    }

    fn pop_word(&mut self) -> ProtocolResult<u32> {
        if self.prim_index == 0 {
            return Err(ContractError::CorruptedFrame(
                "primitive restore underruns the buffer".to_string(),
            ));
        }
        self.prim_index -= 1;
        Ok(self.prims[self.prim_index])
    }

    pub(crate) fn save_word(&mut self, word: u32) -> ProtocolResult<()> {
        self.push_word(word)
    }

    pub(crate) fn save_dword(&mut self, value: u64) -> ProtocolResult<()> {
        self.push_word((value >> 32) as u32)?;
        self.push_word(value as u32)
    }

    pub(crate) fn restore_word(&mut self) -> ProtocolResult<u32> {
        self.pop_word()
    }

    pub(crate) fn restore_dword(&mut self) -> ProtocolResult<u64> {
        let low = self.pop_word()?;
        let high = self.pop_word()?;
        Ok(((high as u64) << 32) | low as u64)
    }

    pub(crate) fn save_reference(&mut self, value: R) -> ProtocolResult<()> {
        if self.obj_index >= self.objs.len() {
            return Err(ContractError::CorruptedFrame(format!(
                "reference save overruns the {} slot buffer",
                self.objs.len()
            )));
        }
        self.objs[self.obj_index] = Some(value);
        self.obj_index += 1;
        Ok(())
    }

    pub(crate) fn restore_reference(&mut self) -> ProtocolResult<R> {
        if self.obj_index == 0 {
            return Err(ContractError::CorruptedFrame(
                "reference restore underruns the buffer".to_string(),
            ));
        }
        self.obj_index -= 1;
        self.objs[self.obj_index]
            .clone()
            .ok_or(ContractError::CorruptedFrame(
                "reference slot was never written".to_string(),
            ))
    }
}

impl<R> fmt::Display for MethodFrame<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = match &self.owner {
            Owner::Instance(_) => "<instance>",
            Owner::Class(name) => name.as_str(),
        };
        write!(f, "{}.{}{}", owner, self.name, self.descriptor)
    }
}
