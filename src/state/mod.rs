//! State Management Module
//!
//! In-memory state owned by the primary: who the secondaries and writer
//! connections are, and how far each in-flight message got.

mod membership;
mod acks;

pub use membership::{
    ClientHandle, Endpoint, MembershipRegistry, MembershipSnapshot, Registration,
    SecondaryState, SecondaryStatus,
};
pub use acks::{AckOutcome, AckRecord, AckTracker, RetryState};
