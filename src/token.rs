use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use uuid::Uuid;

/// Opaque identifier for a component in the dependency graph.
///
/// Identity is the generated uuid, not the description: two tokens created
/// with the same description are distinct. Tokens are cheap to clone and
/// immutable for the life of the process.
#[derive(Clone)]
pub struct Token {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    id: Uuid,
    description: String,
}

impl Token {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id: Uuid::new_v4(),
                description: description.into(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.inner.description)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.description)
    }
}
