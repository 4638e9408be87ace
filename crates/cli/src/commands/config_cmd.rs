//! `repolens config`: Show the default configuration.

use repolens_config::AppConfig;

pub fn run(path_only: bool) -> anyhow::Result<()> {
    if path_only {
        println!("{}", AppConfig::config_dir().join("config.toml").display());
    } else {
        print!("{}", AppConfig::default_toml());
    }
    Ok(())
}
