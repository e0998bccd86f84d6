//! Subcommand implementations.

mod matrix;
mod merge;
mod release;
mod tag;

pub use matrix::print_matrix;
pub use merge::merge_local;
pub use release::run_release;
pub use tag::print_previous_tag;
