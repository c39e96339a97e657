pub mod encoder;
pub mod env;
pub mod telemetry;
