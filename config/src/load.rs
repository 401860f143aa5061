use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory containing configuration files relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Supported extensions for base and environment configuration files.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Separator for list elements in environment variables.
const LIST_SEPARATOR: &str = ",";

/// Trait implemented by configuration structures loadable through [`load_config`].
pub trait Config {
    /// Keys whose values should be parsed as lists when read from environment variables.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Layer of the configuration stack a file belongs to.
#[derive(Debug, Clone, Copy)]
enum Layer {
    Base,
    Environment(Environment),
}

impl Layer {
    fn stem(self) -> &'static str {
        match self {
            Layer::Base => "base",
            Layer::Environment(env) => env.as_str(),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Base => f.write_str("base configuration"),
            Layer::Environment(env) => write!(f, "{env} environment configuration"),
        }
    }
}

/// Errors that can occur while loading configuration files and overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("could not locate {kind_description} in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        kind_description: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("failed to load {kind_description} from `{path}`: {source}")]
    ConfigurationFileLoad {
        kind_description: String,
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("failed to initialize configuration builder: {0}")]
    Builder(#[source] rust_cli_config::ConfigError),
}

/// Loads configuration from `./configuration` for the environment named by `APP_ENVIRONMENT`.
///
/// Files are read from `configuration/base.(yaml|yml)` and
/// `configuration/{environment}.(yaml|yml)`, then overridden by `APP_`-prefixed environment
/// variables. Nested keys use double underscores (`APP_LOCK__LONG_QUERY__RETRIES`).
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load()?;

    load_config_from(&base_path, environment)
}

/// Loads configuration from `<base_path>/configuration` for an explicit environment.
pub fn load_config_from<T>(base_path: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let layers = [Layer::Base, Layer::Environment(environment)];
    let files = ConfigFiles::resolve(&base_path.join(CONFIGURATION_DIR), &layers)?;

    let mut builder: ConfigBuilder<DefaultState> = rust_cli_config::Config::builder();
    for (layer, path) in files.iter() {
        builder = builder.add_source(rust_cli_config::File::from(path.to_path_buf()));

        // Building after each file attributes parse errors to the file that caused them.
        builder
            .clone()
            .build()
            .map_err(|source| LoadConfigError::ConfigurationFileLoad {
                kind_description: layer.to_string(),
                path: path.to_path_buf(),
                source,
            })?;
    }

    builder
        .add_source(environment_overrides::<T>())
        .build()
        .map_err(LoadConfigError::Builder)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

/// Configuration files found for each layer, lowest precedence first.
#[derive(Debug)]
struct ConfigFiles(Vec<(Layer, PathBuf)>);

impl ConfigFiles {
    fn resolve(directory: &Path, layers: &[Layer]) -> Result<Self, LoadConfigError> {
        if !directory.is_dir() {
            return Err(LoadConfigError::MissingConfigurationDirectory(
                directory.to_path_buf(),
            ));
        }

        layers
            .iter()
            .map(|layer| Ok((*layer, find_layer_file(directory, *layer)?)))
            .collect::<Result<Vec<_>, LoadConfigError>>()
            .map(ConfigFiles)
    }

    fn iter(&self) -> impl Iterator<Item = (Layer, &Path)> {
        self.0.iter().map(|(layer, path)| (*layer, path.as_path()))
    }
}

fn find_layer_file(directory: &Path, layer: Layer) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{}.{extension}", layer.stem())))
        .collect();

    if let Some(found) = candidates.iter().find(|path| path.is_file()) {
        return Ok(found.clone());
    }

    Err(LoadConfigError::ConfigurationFileMissing {
        kind_description: layer.to_string(),
        directory: directory.to_path_buf(),
        attempted: candidates
            .iter()
            .map(|path| format!("`{}`", path.display()))
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// `APP_`-prefixed environment variables, with list parsing for the keys `T` declares.
fn environment_overrides<T: Config>() -> rust_cli_config::Environment {
    let source = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    if T::LIST_PARSE_KEYS.is_empty() {
        return source;
    }

    T::LIST_PARSE_KEYS
        .iter()
        .fold(source.list_separator(LIST_SEPARATOR), |source, key| {
            source.with_list_parse_key(key)
        })
}
