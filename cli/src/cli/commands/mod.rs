pub mod process;
pub mod start;
pub mod status;
