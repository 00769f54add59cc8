pub mod json;
pub mod money;
