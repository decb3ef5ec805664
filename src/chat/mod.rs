pub mod formatter;
pub mod processor;
