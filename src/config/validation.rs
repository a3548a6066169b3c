use std::{net::SocketAddr, path::PathBuf};

use url::Url;

use crate::{
    config::models::{ChildServerEntry, GatewayConfig},
    core::descriptor::{BearerAuth, ChildServerDescriptor, ChildTarget, ModuleSpec},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid field '{field}': {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("Duplicate {field} '{value}'")]
    Duplicate { field: &'static str, value: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> ValidationResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField { field }),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Prefixes become a single path segment, so only URL-safe word characters.
fn validate_prefix(prefix: &str) -> ValidationResult<()> {
    if prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err(ValidationError::InvalidField {
            field: "prefix",
            message: format!(
                "'{prefix}' must only contain ASCII letters, digits, '-' or '_'"
            ),
        })
    }
}

fn validate_url(url: &str, field: &'static str) -> ValidationResult<()> {
    let parsed = Url::parse(url).map_err(|e| ValidationError::InvalidField {
        field,
        message: format!("'{url}' is not a valid URL: {e}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ValidationError::InvalidField {
            field,
            message: format!("scheme '{other}' is not supported, use http or https"),
        }),
    }
}

/// Validate one raw entry and turn it into a descriptor.
///
/// Uniqueness of `name` and `prefix` is not checked here; it depends on what
/// has already been registered and is enforced by
/// [`GatewayState::register`](crate::core::GatewayState::register).
pub fn descriptor_from_entry(entry: &ChildServerEntry) -> ValidationResult<ChildServerDescriptor> {
    let name = required(&entry.name, "name")?;
    let kind = required(&entry.kind, "type")?;
    let prefix = required(&entry.prefix, "prefix")?;
    validate_prefix(prefix)?;

    let target = match kind {
        "proxy" => {
            let url = required(&entry.url, "url")?;
            validate_url(url, "url")?;

            let health_endpoint = non_empty(&entry.health_endpoint);
            if let Some(endpoint) = &health_endpoint {
                if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                    validate_url(endpoint, "health_endpoint")?;
                }
            }

            let auth = match &entry.auth {
                None => None,
                Some(auth) => {
                    let auth_kind = required(&auth.kind, "auth.type")?;
                    if !auth_kind.eq_ignore_ascii_case("bearer") {
                        return Err(ValidationError::InvalidField {
                            field: "auth.type",
                            message: format!("'{auth_kind}' is not supported, only 'bearer'"),
                        });
                    }
                    Some(BearerAuth::new(required(&auth.token, "auth.token")?))
                }
            };

            ChildTarget::Proxy {
                url: url.to_string(),
                health_endpoint,
                auth,
            }
        }
        "module" => ChildTarget::Module(ModuleSpec {
            module_path: non_empty(&entry.module_path).map(PathBuf::from),
            module_name: non_empty(&entry.module_name),
            init_function: non_empty(&entry.init_function)
                .unwrap_or_else(|| ModuleSpec::DEFAULT_INIT_FUNCTION.to_string()),
            envvars: entry
                .module_envvars
                .iter()
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }),
        other => {
            return Err(ValidationError::InvalidField {
                field: "type",
                message: format!("'{other}' is not one of 'proxy', 'module'"),
            });
        }
    };

    Ok(ChildServerDescriptor::new(name, prefix, target))
}

/// Gateway-level settings checks (everything except the child list).
pub fn validate_gateway_settings(config: &GatewayConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Err(e) = config.listen_addr.parse::<SocketAddr>() {
        errors.push(ValidationError::InvalidListenAddress {
            address: config.listen_addr.clone(),
            reason: e.to_string(),
        });
    }

    let ingress = &config.ingress_path;
    if !ingress.starts_with('/') || ingress == "/" || ingress.ends_with('/') {
        errors.push(ValidationError::InvalidField {
            field: "ingress_path",
            message: format!("'{ingress}' must start with '/', not end with '/' and not be '/'"),
        });
    }

    let health = &config.health_check;
    if health.interval_secs == 0 {
        errors.push(ValidationError::InvalidField {
            field: "health_check.interval_secs",
            message: "must be greater than 0".to_string(),
        });
    }
    if health.timeout_secs == 0 || health.on_demand_timeout_secs == 0 {
        errors.push(ValidationError::InvalidField {
            field: "health_check.timeout_secs",
            message: "probe timeouts must be greater than 0".to_string(),
        });
    }
    if health.max_concurrent_probes == 0 {
        errors.push(ValidationError::InvalidField {
            field: "health_check.max_concurrent_probes",
            message: "must be greater than 0".to_string(),
        });
    }
    if !health.default_path.starts_with('/') {
        errors.push(ValidationError::InvalidField {
            field: "health_check.default_path",
            message: "must start with '/'".to_string(),
        });
    }
    if config.connections.max_tracked == 0 {
        errors.push(ValidationError::InvalidField {
            field: "connections.max_tracked",
            message: "must be greater than 0".to_string(),
        });
    }

    errors
}
