pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigurationError, load_config, load_config_or_default};
pub use models::*;
pub use validation::{
    ValidationError, ValidationResult, descriptor_from_entry, validate_gateway_settings,
};
