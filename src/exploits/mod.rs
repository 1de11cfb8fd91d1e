//! Exploit step generation: target profiles and the five CAMRO generators.

pub mod generators;
pub mod profiles;

pub use generators::generate;
pub use profiles::{get_profile, profile_names, AuthMechanism, Credentials, TargetProfile};
