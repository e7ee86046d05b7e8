//! taskvault - shared project and task store with canonical ids

pub mod cli;
pub mod output;
