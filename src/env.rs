use std::path::Path;

use tracing::{debug, info};

/// Layered env loading: shared defaults, then the profile file, then local
/// secrets. Later files override earlier ones.
pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let profile_file = if is_production {
        "config/prod.env"
    } else {
        "config/dev.env"
    };

    for env_file in ["config/common.env", profile_file, ".secrets.env"] {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        debug!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}
