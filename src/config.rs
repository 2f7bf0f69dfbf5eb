//! Connection configuration.

/// Default character set applied to every connection.
///
/// `utf8mb4` is the full 4-byte Unicode encoding; the server-side `utf8`
/// alias is the legacy 3-byte subset and is never used here.
pub const DEFAULT_CHARSET: &str = "utf8mb4";

/// Arguments for one connection attempt.
///
/// A fresh `ConnectArgs` is requested from the provider on *every*
/// (re)connect attempt, so callers may rotate credentials between attempts.
///
/// # Example
///
/// ```rust
/// use maria_client::ConnectArgs;
///
/// let args = ConnectArgs::new("db.internal", "app")
///     .password("s3cret")
///     .database("inventory")
///     .port(3307);
/// assert_eq!(args.charset, "utf8mb4");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectArgs {
    /// Server host name or address.
    pub host: String,
    /// User name.
    pub user: String,
    /// Password; `None` authenticates without one.
    pub password: Option<String>,
    /// Initial database; `None` connects without selecting one.
    pub database: Option<String>,
    /// Character set name (default [`DEFAULT_CHARSET`]).
    pub charset: String,
    /// TCP port; `None` uses the protocol default.
    pub port: Option<u16>,
}

impl ConnectArgs {
    /// Create connection arguments for a host and user, with defaults for
    /// everything else.
    #[must_use]
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: None,
            database: None,
            charset: DEFAULT_CHARSET.to_string(),
            port: None,
        }
    }

    /// Set the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the character set.
    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Set the TCP port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Provider of connection arguments, re-invoked on every connect attempt.
pub type ArgSource = Box<dyn FnMut() -> ConnectArgs + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = ConnectArgs::new("localhost", "root");
        assert_eq!(args.host, "localhost");
        assert_eq!(args.user, "root");
        assert_eq!(args.password, None);
        assert_eq!(args.database, None);
        assert_eq!(args.charset, DEFAULT_CHARSET);
        assert_eq!(args.port, None);
    }

    #[test]
    fn builder_chain() {
        let args = ConnectArgs::new("h", "u")
            .password("p")
            .database("d")
            .charset("latin1")
            .port(3307);
        assert_eq!(args.password.as_deref(), Some("p"));
        assert_eq!(args.database.as_deref(), Some("d"));
        assert_eq!(args.charset, "latin1");
        assert_eq!(args.port, Some(3307));
    }
}
