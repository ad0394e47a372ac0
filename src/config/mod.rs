//! Configuration.
//!
//! Settings resolve in layers: built-in defaults, then environment variables
//! (a `.env` file in the working directory is loaded first when present),
//! then CLI flags applied by the command handlers.

mod container;
mod device;
mod endpoint;
pub(crate) mod helpers;

pub use self::container::ContainerSettings;
pub use self::device::{
    AvailableModes, ColorResolution, DepthMode, DeviceConfiguration, FrameRate,
    create_default_config, validate_config,
};
pub use self::endpoint::EndpointSettings;

use crate::error::ConfigError;

/// Process-wide settings resolved from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub container: ContainerSettings,
    pub endpoint: EndpointSettings,
}

impl Config {
    /// Load `.env` (if any) and resolve every settings group.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Ok(Self {
            container: ContainerSettings::resolve()?,
            endpoint: EndpointSettings::resolve()?,
        })
    }
}
