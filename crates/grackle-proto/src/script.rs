//! The caller-facing unit of work submitted over a connection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters bound into a script on the server side.
pub type Bindings = serde_json::Map<String, Value>;

/// Server-side variable aliases, mapping the name used in a script to a
/// traversal source configured on the server.
pub type Aliases = BTreeMap<String, String>;

/// A script to evaluate on the graph server.
///
/// Language and aliases left unset are filled from the connection's defaults
/// when the script is submitted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Script {
    /// Script text.
    pub gremlin: String,
    /// Parameter bindings referenced by the script.
    #[serde(default)]
    pub bindings: Bindings,
    /// Script language tag (e.g. `gremlin-groovy`).
    #[serde(default)]
    pub language: Option<String>,
    /// Traversal-source aliases for this request.
    #[serde(default)]
    pub aliases: Option<Aliases>,
    /// Session id; when set, the request runs in a server-side session.
    #[serde(default)]
    pub session: Option<String>,
}

impl Script {
    /// Create a script with no bindings.
    pub fn new(gremlin: impl Into<String>) -> Self {
        Self {
            gremlin: gremlin.into(),
            ..Self::default()
        }
    }

    /// Bind a single parameter.
    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    /// Replace all bindings.
    pub fn with_bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    /// Set the script language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the traversal-source aliases.
    pub fn with_aliases(mut self, aliases: Aliases) -> Self {
        self.aliases = Some(aliases);
        self
    }

    /// Run the script in a server-side session.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}

impl From<&str> for Script {
    fn from(gremlin: &str) -> Self {
        Self::new(gremlin)
    }
}

impl From<String> for Script {
    fn from(gremlin: String) -> Self {
        Self::new(gremlin)
    }
}
