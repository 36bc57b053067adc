use crate::agent::ToolRegistry;
use crate::config::Config;
use crate::traits::ToolArgs;
use std::sync::Arc;

pub mod location;
pub mod weather;

pub use location::LocationTool;
pub use weather::WeatherTool;

pub fn extract_f64_arg(args: &ToolArgs, key: &str) -> anyhow::Result<f64> {
    args.get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' parameter", key))
}

pub fn extract_u64_arg_opt(args: &ToolArgs, key: &str, default: u64) -> u64 {
    args.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

/// The process-wide tool table for the configured built-in tools.
pub fn builtin_registry(config: &Config) -> anyhow::Result<ToolRegistry> {
    let registry = ToolRegistry::builder()
        .declare(Arc::new(LocationTool::from_config(&config.location)))?
        .declare(Arc::new(WeatherTool::new(&config.weather_base_url)))?
        .build();
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_registry_declares_weather_tools() {
        let registry = builtin_registry(&Config::default()).unwrap();
        let names: Vec<_> = registry.describe().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["getLocation", "getCurrentWeather"]);
        assert_eq!(registry.label("getCurrentWeather"), "Fetching weather");
    }

    #[test]
    fn arg_helpers() {
        let args = json!({"lat": 1.5, "days": 3})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(extract_f64_arg(&args, "lat").unwrap(), 1.5);
        assert!(extract_f64_arg(&args, "lon").is_err());
        assert_eq!(extract_u64_arg_opt(&args, "days", 1), 3);
        assert_eq!(extract_u64_arg_opt(&args, "hours", 1), 1);
    }
}
