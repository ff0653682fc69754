use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashSet;

/// Tokens a caller holds for the duration of one request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Authorizations {
    tokens: FxHashSet<Box<str>>,
}

impl Authorizations {
    /// Builds a token set. Empty tokens are ignored.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = tokens
            .into_iter()
            .filter(|t| !t.as_ref().is_empty())
            .map(|t| Box::<str>::from(t.as_ref()))
            .collect();
        Self { tokens }
    }

    /// A caller holding no tokens; only empty visibilities are readable.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns `true` when `token` is held.
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// Returns a copy with one more token.
    pub fn with_token(&self, token: &str) -> Self {
        let mut next = self.clone();
        if !token.is_empty() {
            next.tokens.insert(token.into());
        }
        next
    }

    /// Number of tokens held.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` when no token is held.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens in sorted order.
    pub fn sorted(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.tokens.iter().map(|t| &**t).collect();
        out.sort_unstable();
        out
    }
}

impl fmt::Display for Authorizations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sorted().join(","))
    }
}

/// Parses a comma-separated token list such as `a,b,c`.
impl FromStr for Authorizations {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Authorizations::new(s.split(',').map(str::trim)))
    }
}

/// The principal issuing a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    name: String,
    authorizations: Authorizations,
}

impl User {
    /// Creates a named user holding `authorizations`.
    pub fn new(name: impl Into<String>, authorizations: Authorizations) -> Self {
        Self {
            name: name.into(),
            authorizations,
        }
    }

    /// A user with no tokens.
    pub fn anonymous() -> Self {
        Self::new("anonymous", Authorizations::empty())
    }

    /// Name used in logs and security errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tokens held by the user.
    pub fn authorizations(&self) -> &Authorizations {
        &self.authorizations
    }
}
