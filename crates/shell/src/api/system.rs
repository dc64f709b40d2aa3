//! `system.*` functions

use serde_json::{json, Value};
use tracing::info;

use longday_core::{Error, Result};

use super::{string_arg, ApiRegistry};

pub fn register(registry: &mut ApiRegistry) {
    registry.register("system", "getSystemInfo", |_args| async { Ok(system_info()) });
    registry.register("system", "greet", |args: Vec<Value>| async move { greet(&args) });
}

fn system_info() -> Value {
    info!("system.getSystemInfo called");
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let host_name = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    json!({
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpus": cpus,
        "hostName": host_name,
    })
}

fn greet(args: &[Value]) -> Result<Value> {
    match string_arg(args, 0).map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => Ok(json!(format!(
            "Hello, {}! This message was generated on the server.",
            name
        ))),
        None => Err(Error::InvalidInput("No name was provided!".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greet() {
        let greeting = greet(&[json!("Ada")]).unwrap();
        assert!(greeting.as_str().unwrap().starts_with("Hello, Ada!"));
        assert!(greet(&[]).is_err());
        assert!(greet(&[json!("  ")]).is_err());
        assert!(greet(&[json!(7)]).is_err());
    }

    #[test]
    fn test_system_info_shape() {
        let info = system_info();
        assert_eq!(info["platform"], std::env::consts::OS);
        assert!(info["cpus"].as_u64().unwrap() >= 1);
    }
}
