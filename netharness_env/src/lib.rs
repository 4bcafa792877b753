//! NetHarness Environment Abstraction Layer
//!
//! This crate lets the harness run drivers execute against either the
//! **wall clock** (tokio) or a **simulated clock** that tests advance by hand.
//!
//! # Core Concept: Controlled Non-Determinism
//!
//! A run driver intercepts every source of non-determinism:
//! - Time (`now()`, `sleep()`)
//! - Randomness (`derive_rng()`)
//! - Cross-task requests (`ControlHandle` / `ControlInbox`)
//!
//! By deriving all entropy from a single 64-bit seed, any run can be replayed
//! from its seed number.
//!
//! # Example
//!
//! ```ignore
//! use netharness_env::{HarnessContext, ControlInbox, ControlMessage};
//!
//! async fn drive<Ctx: HarnessContext>(ctx: &Ctx, inbox: &mut ControlInbox<()>) {
//!     loop {
//!         if inbox.drain().contains(&ControlMessage::Stop) {
//!             break;
//!         }
//!         tick();
//!         ctx.sleep(Duration::from_millis(100)).await;
//!     }
//! }
//! ```

mod context;
mod control;
mod error;
mod tokio_impl;
mod types;

pub use context::{mix_seed, HarnessContext};
pub use control::{control_channel, ControlHandle, ControlInbox, ControlMessage};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use types::RunId;
