//! Enrollment of hosts with an Ansible control plane.
//!
//! A freshly provisioned host is prepared for remote management over SSH and registered with the
//! enrollment service of the control plane.
//! See [`enrollment::Enrollment`] for the sequence of steps.

pub mod cli;
pub mod client;
pub mod enrollment;
pub mod error;
pub mod keys;
pub mod mode;
pub mod settings;
pub mod sshd;
pub mod target;
pub mod utils;

pub use enrollment::{Enrollment, Outcome, State};
pub use error::{Error, ErrorExitCode};
pub use settings::Settings;
