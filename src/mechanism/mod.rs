//! Password authentication mechanisms
//!
//! SCRAM challenge-response between a claimed identity and the credential store.

pub mod negotiator;
pub mod scram;

pub use negotiator::{ChallengeMaterial, Negotiator};
pub use scram::{
    ClientFinal, ClientFirst, IterationBounds, Mechanism, ScramClient, ScramVerifier, ServerFirst,
};
