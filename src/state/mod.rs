//! Sans-I/O state machines for the COPY sub-protocols.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! [`Session`] produces [`Action`] values that tell the caller what to do next.

pub mod action;
pub mod completion;
pub mod copy_both;
pub mod copy_in;
pub mod copy_out;
mod decoder;
pub mod operation;
pub mod session;

pub use action::{Action, AsyncMessage};
pub use completion::Completion;
pub use copy_both::CopyBothStateMachine;
pub use copy_in::{CopyInStateMachine, WriteStatus};
pub use copy_out::CopyOutStateMachine;
pub use operation::{CopyCodec, CopyOperation};
pub use session::{Session, SessionTransport};
