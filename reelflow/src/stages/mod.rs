//! Stage policies and the runner that applies them.
//!
//! Every remote stage (fetch, generate-script, produce-media, publish) is a
//! named operation with a declared [`StagePolicy`], executed through a
//! [`StageRunner`].

mod policy;
mod runner;

pub use policy::StagePolicy;
pub use runner::{StageOutcome, StageRunner};
