pub mod agent;
pub mod cli;
pub mod operator;

pub use agent::*;
pub use cli::*;
pub use operator::*;
