//! Configuration loading.
//!
//! Configuration files may be YAML, TOML or JSON; the format is picked from
//! the file extension. Types implement [`Validatable`] to reject bad values
//! after loading and [`Configurable`] to accept environment overrides.
//!
//! ```rust,ignore
//! use cellstream_core::config::ConfigLoader;
//!
//! let config: ServerConfig = ConfigLoader::new()
//!     .with_env_prefix("CELLSTREAM")
//!     .load_file("cellstream.yaml")?;
//! ```

mod loader;
mod traits;

pub use loader::{ConfigFormat, ConfigLoader};
pub use traits::{Configurable, Validatable};
