//! Application identity, descriptors and the directory used to resolve them.
//!
//! The application registry itself (manifest parsing, installation) lives
//! outside the orchestration core. Everything here only needs to answer
//! "which application is this id" and "which capabilities does it hold".

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::value::{ParameterMap, Value};

/// Identifier of the system UI, which may request and handle intents without
/// being a packaged application.
pub const SYSTEM_UI: &str = ":sysui:";

/// Requester id substituted into broadcast requests before they reach
/// handlers.
pub const BROADCAST_REQUESTER: &str = ":broadcast:";

const MAX_ID_LEN: usize = 150;

/// Reverse-DNS application identifier (e.g. `com.example.music`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ApplicationId(String);

impl<'de> Deserialize<'de> for ApplicationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            SYSTEM_UI => Ok(Self::system_ui()),
            BROADCAST_REQUESTER => Ok(Self::broadcast()),
            _ => Self::new(s).map_err(serde::de::Error::custom),
        }
    }
}

impl ApplicationId {
    /// Create a validated application id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidApplicationId`] if the id is empty, too
    /// long, or contains characters outside `[A-Za-z0-9._-]`.
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create an id without validation. Intended for constants and tests.
    #[must_use]
    pub fn from_static(id: &str) -> Self {
        Self(id.to_string())
    }

    /// The system UI pseudo-application.
    #[must_use]
    pub fn system_ui() -> Self {
        Self(SYSTEM_UI.to_string())
    }

    /// The requester placeholder used for broadcasts.
    #[must_use]
    pub fn broadcast() -> Self {
        Self(BROADCAST_REQUESTER.to_string())
    }

    /// Whether this id names the system UI.
    #[must_use]
    pub fn is_system_ui(&self) -> bool {
        self.0 == SYSTEM_UI
    }

    /// Whether this id is the broadcast requester placeholder.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_REQUESTER
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> CoreResult<()> {
        let reject = |reason: &str| {
            Err(CoreError::InvalidApplicationId {
                id: id.to_string(),
                reason: reason.to_string(),
            })
        };

        if id.is_empty() {
            return reject("must not be empty");
        }
        if id.len() > MAX_ID_LEN {
            return reject("too long");
        }
        if id.starts_with('.') || id.ends_with('.') || id.contains("..") {
            return reject("empty reverse-DNS segment");
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return reject("only ASCII alphanumerics, '.', '-' and '_' are allowed");
        }
        Ok(())
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ApplicationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Descriptor of an installed application, as far as the orchestration core
/// needs to know it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Unique id.
    pub id: ApplicationId,
    /// Name of the runtime backend that executes this application.
    pub runtime_name: String,
    /// Capabilities granted to this application.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Directory holding the application's code.
    #[serde(default)]
    pub code_dir: PathBuf,
    /// Entry point relative to `code_dir`.
    #[serde(default)]
    pub main_file: String,
    /// Free-form parameters passed through to the runtime.
    #[serde(default)]
    pub runtime_parameters: ParameterMap,
}

impl Application {
    /// Create a descriptor with no capabilities and no code location.
    #[must_use]
    pub fn new(id: ApplicationId, runtime_name: impl Into<String>) -> Self {
        Self {
            id,
            runtime_name: runtime_name.into(),
            capabilities: BTreeSet::new(),
            code_dir: PathBuf::new(),
            main_file: String::new(),
            runtime_parameters: ParameterMap::new(),
        }
    }

    /// Grant capabilities.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Set the code directory.
    #[must_use]
    pub fn with_code_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.code_dir = dir.into();
        self
    }

    /// Set the entry point.
    #[must_use]
    pub fn with_main_file(mut self, main_file: impl Into<String>) -> Self {
        self.main_file = main_file.into();
        self
    }

    /// Add a runtime parameter.
    #[must_use]
    pub fn with_runtime_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.runtime_parameters.insert(key.into(), value);
        self
    }

    /// Whether this application holds every capability in `required`.
    #[must_use]
    pub fn has_capabilities(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

/// Read access to the application registry.
pub trait ApplicationDirectory: Send + Sync {
    /// Look up an application by id.
    fn application(&self, id: &ApplicationId) -> Option<Application>;

    /// All known applications.
    fn applications(&self) -> Vec<Application>;

    /// Capabilities held by an application. Unknown ids hold none.
    fn capabilities(&self, id: &ApplicationId) -> BTreeSet<String> {
        self.application(id)
            .map(|app| app.capabilities)
            .unwrap_or_default()
    }
}

/// Directory backed by an in-memory map.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    apps: RwLock<HashMap<ApplicationId, Application>>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an application. Returns the previous descriptor.
    pub fn insert(&self, app: Application) -> Option<Application> {
        self.apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app.id.clone(), app)
    }

    /// Remove an application.
    pub fn remove(&self, id: &ApplicationId) -> Option<Application> {
        self.apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

impl FromIterator<Application> for InMemoryDirectory {
    fn from_iter<T: IntoIterator<Item = Application>>(iter: T) -> Self {
        let dir = Self::new();
        for app in iter {
            dir.insert(app);
        }
        dir
    }
}

impl ApplicationDirectory for InMemoryDirectory {
    fn application(&self, id: &ApplicationId) -> Option<Application> {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn applications(&self) -> Vec<Application> {
        let mut apps: Vec<_> = self
            .apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        apps.sort_by(|a, b| a.id.cmp(&b.id));
        apps
    }
}
