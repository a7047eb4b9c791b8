pub mod error;
pub mod operator;
pub mod runner;
pub mod status;

pub use error::VcsError;
pub use operator::{CommitOptions, ResetMode, ResetOptions, VcsOperator};
pub use runner::{Git, GitOutput};
