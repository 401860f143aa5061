use std::fmt;
use std::io::Error;

/// Name of the environment variable selecting which environment file to load.
const ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

/// Name used for local, operator-driven runs.
const DEV_ENV_NAME: &str = "dev";

/// Name used for scheduled runs (daemon mode, cron jobs, backup hosts).
const PROD_ENV_NAME: &str = "prod";

/// Environment a dump run is configured for.
///
/// The environment only selects which `configuration/<env>.*` file overrides the base file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Local runs.
    Dev,
    /// Scheduled runs.
    Prod,
}

impl Environment {
    /// Loads the environment from `APP_ENVIRONMENT`, falling back to [`Environment::Dev`].
    pub fn load() -> Result<Environment, Error> {
        Self::from_value(std::env::var(ENVIRONMENT_ENV_NAME).ok())
    }

    /// Resolves an environment from an optional raw value.
    pub fn from_value(value: Option<String>) -> Result<Environment, Error> {
        value.unwrap_or_else(|| DEV_ENV_NAME.into()).try_into()
    }

    /// Returns the file stem used for this environment's configuration file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => DEV_ENV_NAME,
            Environment::Prod => PROD_ENV_NAME,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.trim().to_lowercase().as_str() {
            DEV_ENV_NAME => Ok(Self::Dev),
            PROD_ENV_NAME => Ok(Self::Prod),
            other => Err(Error::other(format!(
                "{other} is not a supported environment. Use either `{DEV_ENV_NAME}` or `{PROD_ENV_NAME}`.",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_value_defaults_to_dev() {
        assert_eq!(Environment::from_value(None).unwrap(), Environment::Dev);
    }

    #[test]
    fn value_is_case_insensitive() {
        assert_eq!(
            Environment::from_value(Some(" PROD ".into())).unwrap(),
            Environment::Prod
        );
    }

    #[test]
    fn unknown_value_is_rejected() {
        assert!(Environment::from_value(Some("staging".into())).is_err());
    }
}
