//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Name of the device config document inside the stack project directory.
/// `docker compose` reads it from there to interpolate the stack's variables.
pub const DEVICE_CONFIG_FILE_NAME: &str = ".env";

/// Storage layout for the wizard
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Directory holding the wizard's own settings and logs
    pub base_dir: PathBuf,

    /// Container stack project directory (compose file, `.env`, runtime data)
    pub stack_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>, stack_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            stack_dir: stack_dir.into(),
        }
    }

    /// Same base directory, different stack project directory
    pub fn with_stack_dir(mut self, stack_dir: impl Into<PathBuf>) -> Self {
        self.stack_dir = stack_dir.into();
        self
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Get the stack project directory
    pub fn stack_dir(&self) -> Dir {
        Dir::new(self.stack_dir.clone())
    }

    /// Get the device config file path
    pub fn device_config_file(&self) -> File {
        self.stack_dir().file(DEVICE_CONFIG_FILE_NAME)
    }

    /// Get the directory the stack writes its runtime data into
    pub fn data_dir(&self) -> Dir {
        self.stack_dir().subdir("data")
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/etc/molly", "/opt/molly")
    }
}
