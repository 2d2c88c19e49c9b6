//! Collaborator implementations selected by configuration

#[cfg(feature = "mock")]
pub mod mock;
pub mod sysfs;

use crate::config::AppConfig;
use crate::core::{InputProvider, StatusProvider};
use crate::error::{Error, Result};

/// Input provider named by `[input] source`
pub fn create_input(config: &AppConfig) -> Result<Box<dyn InputProvider>> {
    match config.input.source.as_str() {
        #[cfg(feature = "mock")]
        "mock" => Ok(Box::new(mock::MockInput::new(config.input.random_seed))),
        other => Err(Error::UnknownSource(format!("input source '{}'", other))),
    }
}

/// Status provider named by `[status] source`
pub fn create_status(config: &AppConfig) -> Result<Box<dyn StatusProvider>> {
    match config.status.source.as_str() {
        "sysfs" => Ok(Box::new(sysfs::SysfsStatus::new())),
        #[cfg(feature = "mock")]
        "mock" => Ok(Box::new(mock::MockStatus::new(config.input.random_seed))),
        other => Err(Error::UnknownSource(format!("status source '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_sources_rejected() {
        let mut config = AppConfig::default();
        config.input.source = "gamepad".to_string();
        config.status.source = "acpi".to_string();
        assert!(matches!(create_input(&config), Err(Error::UnknownSource(_))));
        assert!(matches!(create_status(&config), Err(Error::UnknownSource(_))));
    }

    #[cfg(feature = "mock")]
    #[test]
    fn test_mock_sources() {
        let mut config = AppConfig::default();
        config.status.source = "mock".to_string();
        let mut input = create_input(&config).unwrap();
        let mut status = create_status(&config).unwrap();
        let _ = input.sample();
        assert!((0..=100).contains(&status.battery_percent()));
    }
}
