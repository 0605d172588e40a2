//! Session orchestration for Deckhand.
//!
//! An inbound chat message flows through:
//!
//! 1. **Intake** ([`Assistant`]): commands, uploads and text routing
//! 2. **Reassembly** ([`Reassembler`]): large JSON pastes split across messages
//! 3. **Confirmation** ([`ConfirmationGate`]): replies to a staged action
//! 4. **Turn loop** ([`TurnLoop`]): reasoning calls and operation execution
//!    until the reasoning service answers
//!
//! All per-conversation state lives in a [`Session`] behind its own lock.

pub mod assistant;
pub mod confirm;
pub mod executor;
pub mod loop_runner;
pub mod prompt;
pub mod reassembler;
pub mod session;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assistant::Assistant;
pub use confirm::{ConfirmationGate, Reply, Resolution, classify};
pub use executor::ToolGateway;
pub use loop_runner::{FALLBACK_ANSWER, TerminalOutcome, TurnLoop};
pub use reassembler::{FragmentBuffer, Intake, Reassembler, ReassemblyRules, TimeoutReporter};
pub use session::{Session, SessionHandle, SessionStore};
pub use snapshot::{PayloadProcessor, PayloadReport, SnapshotError};
