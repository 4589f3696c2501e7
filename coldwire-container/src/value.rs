//! Configuration value resolution for `${name}` expressions.
//!
//! Fields whose descriptor denotes a primitive or `String` are injected from
//! configuration rather than from the component graph. The generated program
//! carries the literal placeholder expression; the resolver evaluates it at
//! bootstrap against layered property sources, with explicit overrides taking
//! precedence for tests.

use crate::error::ContainerError;
use config::{Config, Environment, File, FileFormat};
use fxhash::FxHashMap;
#[cfg(test)]
use mockall::automock;
use parking_lot::RwLock;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, warn};

/// Base name of the optional configuration file, resolved relative to the
/// working directory.
pub const CONFIG_FILE_NAME: &str = "coldwire";

/// Prefix of environment variables considered as properties.
pub const ENV_PREFIX: &str = "COLDWIRE";

/// One layer of named configuration properties.
#[cfg_attr(test, automock)]
pub trait PropertySource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

struct ConfigSource {
    config: Config,
}

impl PropertySource for ConfigSource {
    fn get(&self, name: &str) -> Option<String> {
        self.config.get_string(name).ok()
    }
}

/// Resolves `${name}` and `${name:default}` expressions against an ordered
/// list of property sources. Expressions without the placeholder syntax
/// evaluate to themselves.
pub struct PropertyResolver {
    sources: Vec<Box<dyn PropertySource>>,
    overrides: RwLock<FxHashMap<String, String>>,
}

impl PropertyResolver {
    pub fn new(sources: Vec<Box<dyn PropertySource>>) -> Self {
        Self {
            sources,
            overrides: RwLock::default(),
        }
    }

    /// Creates a resolver backed by the optional `coldwire.json` file and
    /// `COLDWIRE_`-prefixed environment variables, environment taking
    /// precedence.
    pub fn from_environment() -> Self {
        let config = Config::builder()
            .add_source(File::with_name(CONFIG_FILE_NAME).format(FileFormat::Json).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build();

        match config {
            Ok(config) => Self::new(vec![Box::new(ConfigSource { config })]),
            Err(error) => {
                warn!(%error, "Cannot load configuration; resolving defaults only");
                Self::new(vec![])
            }
        }
    }

    /// Sets an override visible to subsequent resolutions; intended for
    /// tests and programmatic configuration.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.overrides.write().insert(name.into(), value.into());
    }

    /// Drops all overrides.
    pub fn clear(&self) {
        self.overrides.write().clear();
    }

    /// Evaluates a property expression. A missing property without a default
    /// is an error; defaults make resolution infallible.
    pub fn resolve(&self, expression: &str) -> Result<String, ContainerError> {
        let Some(placeholder) = expression
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
        else {
            return Ok(expression.to_string());
        };

        let (name, default) = match placeholder.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (placeholder, None),
        };

        if let Some(value) = self.overrides.read().get(name) {
            return Ok(value.clone());
        }

        for source in &self.sources {
            if let Some(value) = source.get(name) {
                debug!(property = name, "Resolved property");
                return Ok(value);
            }
        }

        default
            .map(str::to_string)
            .ok_or_else(|| ContainerError::UnresolvedProperty(expression.to_string()))
    }

    /// Resolves a property expression and parses it into a typed value.
    pub fn resolve_as<T>(&self, expression: &str) -> Result<T, ContainerError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.resolve(expression)?.parse().map_err(|error| {
            ContainerError::UnresolvedProperty(format!("{expression} ({error})"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_resolve_from_source_in_order() {
        let mut first = MockPropertySource::new();
        first.expect_get().returning(|name| {
            (name == "timeout").then(|| "10".to_string())
        });
        let mut second = MockPropertySource::new();
        second.expect_get().returning(|_| Some("fallback".to_string()));

        let resolver = PropertyResolver::new(vec![Box::new(first), Box::new(second)]);

        assert_eq!(resolver.resolve("${timeout}").unwrap(), "10");
        assert_eq!(resolver.resolve("${anything}").unwrap(), "fallback");
    }

    #[test]
    fn should_fall_back_to_default() {
        let resolver = PropertyResolver::new(vec![]);

        assert_eq!(resolver.resolve("${timeout:30}").unwrap(), "30");
        assert!(matches!(
            resolver.resolve("${timeout}").unwrap_err(),
            ContainerError::UnresolvedProperty(_)
        ));
    }

    #[test]
    fn should_prefer_overrides_and_reset_them() {
        let mut source = MockPropertySource::new();
        source.expect_get().returning(|_| Some("from-source".to_string()));
        let resolver = PropertyResolver::new(vec![Box::new(source)]);

        resolver.set("timeout", "99");
        assert_eq!(resolver.resolve("${timeout}").unwrap(), "99");

        resolver.clear();
        assert_eq!(resolver.resolve("${timeout}").unwrap(), "from-source");
    }

    #[test]
    fn should_resolve_typed_values() {
        let resolver = PropertyResolver::new(vec![]);
        resolver.set("timeout", "45");

        assert_eq!(resolver.resolve_as::<u64>("${timeout}").unwrap(), 45);
        assert!(resolver.resolve_as::<bool>("${flag:true}").unwrap());
        assert!(matches!(
            resolver.resolve_as::<u64>("${count:not-a-number}").unwrap_err(),
            ContainerError::UnresolvedProperty(_)
        ));
    }

    #[test]
    fn should_pass_through_plain_expressions() {
        let resolver = PropertyResolver::new(vec![]);
        assert_eq!(resolver.resolve("literal").unwrap(), "literal");
        assert_eq!(resolver.resolve("${unclosed").unwrap(), "${unclosed");
    }
}
