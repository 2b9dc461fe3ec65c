//! The method-frame protocol consumed by woven bytecode. A [`Flow`] owns an
//! arena of [`frame::MethodFrame`]s linked by index, one logical execution per
//! flow; the emitted code drives the protocol through the operations on
//! [`Flow`]. Frames are confined to one host thread at a time; handing a flow
//! to another thread is the scheduling layer's publication problem, not ours.

pub mod error;
pub mod flow;
pub mod frame;
pub mod visit;

pub use error::ContractError;
pub use flow::{Flow, FrameId};
pub use frame::{FrameState, MethodFrame, Owner};

pub type ProtocolResult<T> = std::result::Result<T, ContractError>;
