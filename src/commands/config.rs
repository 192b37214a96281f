use crate::config::Config;

/// Show the effective configuration.
pub fn config(config: &Config) -> anyhow::Result<()> {
    println!(
        "data_dir: {}\nlock_backoff: {:?}\noperation_timeout: {:?}",
        config.data_dir.display(),
        config.lock_backoff,
        config.operation_timeout
    );
    Ok(())
}
