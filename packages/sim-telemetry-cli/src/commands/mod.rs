pub mod check;
pub mod codecs;
pub mod monitor;
pub mod synthetic;
