// Domain layer - Plain data shared by every layer
pub mod history;
pub mod range;
pub mod telemetry;
