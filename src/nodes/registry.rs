//! Name to constructor lookup for filters

use std::fmt;

use hashbrown::HashMap;
use tracing::debug;

use crate::error::FilterError;
use crate::graph::FilterInstance;
use crate::nodes::{Biquad, BiquadKind, BufferSink, BufferSource, FilterArgs, Null, Tempo, Volume};

type Constructor = Box<dyn Fn(&str) -> Result<FilterInstance, FilterError> + Send + Sync>;

/// Creates filters by name from an argument string.
///
/// [`FilterRegistry::default`] knows the built-in filters (`abuffer`,
/// `abuffersink`, `anull`, `volume`, `atempo`, `lowpass`, `highpass`).
/// Custom [`FilterNode`](crate::FilterNode)s are added with
/// [`register`](Self::register).
pub struct FilterRegistry {
    constructors: HashMap<String, Constructor>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FilterRegistry").field("filters", &names).finish()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FilterRegistry {
    /// A registry without any filters.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("abuffer", |args| {
            BufferSource::from_args(FilterArgs::parse("abuffer", args, &[])?).map(FilterInstance::source)
        });
        registry.register("abuffersink", |args| {
            BufferSink::from_args(FilterArgs::parse("abuffersink", args, &[])?).map(FilterInstance::sink)
        });
        registry.register("anull", |args| {
            FilterArgs::parse("anull", args, &[])?.finish()?;
            Ok(FilterInstance::filter(Null))
        });
        registry.register("volume", |args| {
            Volume::from_args(FilterArgs::parse("volume", args, &["volume"])?).map(FilterInstance::filter)
        });
        registry.register("atempo", |args| {
            Tempo::from_args(FilterArgs::parse("atempo", args, &["tempo"])?).map(FilterInstance::filter)
        });
        registry.register("lowpass", |args| {
            Biquad::from_args(BiquadKind::LowPass, FilterArgs::parse("lowpass", args, &["f", "w"])?)
                .map(FilterInstance::filter)
        });
        registry.register("highpass", |args| {
            Biquad::from_args(BiquadKind::HighPass, FilterArgs::parse("highpass", args, &["f", "w"])?)
                .map(FilterInstance::filter)
        });
        registry
    }

    /// Register (or replace) a filter constructor under `name`.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&str) -> Result<FilterInstance, FilterError> + Send + Sync + 'static,
    {
        if self.constructors.insert(name.to_string(), Box::new(constructor)).is_some() {
            debug!("Replaced filter constructor {}", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Whether graphs can be built at all: the source, sink and tempo filters
    /// must all be available.
    pub fn supports_filtering(&self) -> bool {
        ["abuffer", "abuffersink", "atempo"].iter().all(|name| self.contains(name))
    }

    /// Instantiate the filter `name` with `args`.
    pub fn create(&self, name: &str, args: &str) -> Result<FilterInstance, FilterError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| FilterError::NotFound(name.to_string()))?;
        constructor(args)
    }
}
