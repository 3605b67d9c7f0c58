//! Assembly policy definitions.

pub mod v1;

pub use v1::{AssemblyPolicyV1, PolicyError, VerificationSettings};
