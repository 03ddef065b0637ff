pub mod archive;
pub mod global_variables;
pub mod pdok;
