pub mod logger;
pub mod probe;
