//! Mutable URIs.

use core::fmt;

/// Errors raised while parsing a URI string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    /// The input cannot be parsed as a URI.
    Invalid(String),
}

impl fmt::Display for UriError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(reason) => write!(f, "invalid URI: {reason}"),
        }
    }
}

impl std::error::Error for UriError {}

/// A URI with independently mutable components.
///
/// General syntax: `scheme://user@host:port/path?query#fragment`, with the
/// reduced forms `/absolute/path` and `relative/path` also accepted. Query
/// parameters are an ordered, key-unique mapping; a parameter with an
/// empty value emits a bare `name` in the query string.
///
/// The user component is stored decoded and percent-encoded on emission
/// (`@` becomes `%40`), so account names that are themselves addresses
/// round-trip through the wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    scheme: String,
    user: String,
    host: String,
    port: Option<u16>,
    path: String,
    parameters: Vec<(String, String)>,
    fragment: String,
}

impl Uri {
    /// Parses a URI string.
    pub fn parse(input: &str) -> Result<Self, UriError> {
        if input.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(UriError::Invalid("whitespace in URI".into()));
        }
        let (rest, fragment) = match input.split_once('#') {
            Some((rest, fragment)) => (rest, fragment.to_owned()),
            None => (input, String::new()),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, query),
            None => (rest, ""),
        };

        let mut uri = Self {
            scheme: String::new(),
            user: String::new(),
            host: String::new(),
            port: None,
            path: String::new(),
            parameters: parse_query(query),
            fragment,
        };

        match rest.split_once("://") {
            Some((scheme, after)) => {
                if scheme.is_empty() {
                    return Err(UriError::Invalid("empty scheme".into()));
                }
                uri.scheme = scheme.to_owned();
                let (authority, path) = match after.find('/') {
                    Some(index) => (&after[..index], &after[index..]),
                    None => (after, ""),
                };
                let host_port = match authority.rsplit_once('@') {
                    Some((user, host_port)) => {
                        uri.user = percent_decode(user);
                        host_port
                    }
                    None => authority,
                };
                match host_port.rsplit_once(':') {
                    Some((host, port)) if !port.is_empty() => {
                        uri.host = host.to_owned();
                        uri.port = Some(port.parse().map_err(|_| {
                            UriError::Invalid(format!("bad port: {port}"))
                        })?);
                    }
                    Some((host, _)) => uri.host = host.to_owned(),
                    None => uri.host = host_port.to_owned(),
                }
                uri.path = path.to_owned();
            }
            None => uri.path = rest.to_owned(),
        }
        Ok(uri)
    }

    /// Builds a URI from a scheme, host and absolute path. The host may
    /// carry a `:port` suffix. Scheme and host must be both empty or both
    /// non-empty.
    pub fn from_parts(scheme: &str, host: &str, path: &str) -> Result<Self, UriError> {
        if scheme.is_empty() != host.is_empty() {
            return Err(UriError::Invalid(
                "scheme and host must be both empty or both non-empty".into(),
            ));
        }
        let mut uri = Self {
            scheme: scheme.to_owned(),
            user: String::new(),
            host: String::new(),
            port: None,
            path: String::new(),
            parameters: Vec::new(),
            fragment: String::new(),
        };
        match host.rsplit_once(':') {
            Some((name, port)) if !port.is_empty() => {
                uri.host = name.to_owned();
                uri.port = Some(
                    port.parse()
                        .map_err(|_| UriError::Invalid(format!("bad port: {port}")))?,
                );
            }
            Some((name, _)) => uri.host = name.to_owned(),
            None => uri.host = host.to_owned(),
        }
        uri.set_path(path);
        Ok(uri)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn set_scheme(&mut self, scheme: impl Into<String>) {
        self.scheme = scheme.into();
    }

    /// The user component, decoded.
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = user.into();
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    /// The port, or `None` for the scheme default.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn set_port(&mut self, port: Option<u16>) {
        self.port = port;
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Sets the path. While a host is present the path is forced absolute.
    pub fn set_path(&mut self, path: &str) {
        if !self.host.is_empty() && !path.starts_with('/') {
            self.path = format!("/{path}");
        } else {
            self.path = path.to_owned();
        }
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn set_fragment(&mut self, fragment: impl Into<String>) {
        self.fragment = fragment.into();
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.iter().any(|(n, _)| n == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value.as_str())
    }

    /// Adds a query parameter or overrides the value of an existing one,
    /// keeping its position.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.parameters.push((name, value)),
        }
    }

    pub fn remove_parameter(&mut self, name: &str) {
        self.parameters.retain(|(n, _)| n != name);
    }

    /// All query parameters, in order.
    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    /// Removes dot segments from the path.
    pub fn normalize(&mut self) {
        self.path = normalize_path(&self.path);
    }

    /// The query string assembled from the current parameters, or an empty
    /// string when there are none.
    pub fn query_string(&self) -> String {
        let mut query = String::new();
        for (name, value) in &self.parameters {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(name);
            if !value.is_empty() {
                query.push('=');
                query.push_str(value);
            }
        }
        query
    }
}

impl fmt::Display for Uri {
    /// Canonical form: empty components are omitted; the user component is
    /// percent-encoded.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}://", self.scheme)?;
        }
        if !self.host.is_empty() {
            if !self.user.is_empty() {
                write!(f, "{}@", percent_encode(&self.user))?;
            }
            write!(f, "{}", self.host)?;
            if let Some(port) = self.port {
                write!(f, ":{port}")?;
            }
        }
        write!(f, "{}", self.path)?;
        let query = self.query_string();
        if !query.is_empty() {
            write!(f, "?{query}")?;
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    let mut parameters: Vec<(String, String)> = Vec::new();
    for pair in query.split('&') {
        let (name, value) = match pair.split_once('=') {
            Some((name, value)) => (name, value),
            None => (pair, ""),
        };
        if name.is_empty() || parameters.iter().any(|(n, _)| n == name) {
            continue;
        }
        parameters.push((name.to_owned(), value.to_owned()));
    }
    parameters
}

/// Percent-encodes the characters that would be ambiguous inside the user
/// component of an authority.
fn percent_encode(user: &str) -> String {
    let mut encoded = String::with_capacity(user.len());
    for c in user.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            '@' => encoded.push_str("%40"),
            ':' => encoded.push_str("%3A"),
            '/' => encoded.push_str("%2F"),
            _ => encoded.push(c),
        }
    }
    encoded
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// RFC 3986 dot-segment removal, restricted to what directory paths need.
fn normalize_path(path: &str) -> String {
    if !path.contains('.') {
        return path.to_owned();
    }
    let absolute = path.starts_with('/');
    let mut output: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." => {}
            ".." => {
                output.pop();
            }
            other => output.push(other),
        }
    }
    let joined = output.join("/");
    if absolute && !joined.starts_with('/') {
        format!("/{}", joined.trim_start_matches('/'))
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_uri_round_trips() {
        let uri = Uri::parse("wamp://user@host.zz:9100/a/b?x=1&flag#frag").unwrap();
        assert_eq!(uri.scheme(), "wamp");
        assert_eq!(uri.user(), "user");
        assert_eq!(uri.host(), "host.zz");
        assert_eq!(uri.port(), Some(9100));
        assert_eq!(uri.path(), "/a/b");
        assert_eq!(uri.parameter("x"), Some("1"));
        assert_eq!(uri.parameter("flag"), Some(""));
        assert_eq!(uri.fragment(), "frag");
        assert_eq!(
            uri.to_string(),
            "wamp://user@host.zz:9100/a/b?x=1&flag#frag"
        );
    }

    #[test]
    fn user_with_address_is_percent_encoded() {
        let uri = Uri::parse("wamp://caller%40domain.zz@general.ai/rpc/m1").unwrap();
        assert_eq!(uri.user(), "caller@domain.zz");
        assert_eq!(
            uri.to_string(),
            "wamp://caller%40domain.zz@general.ai/rpc/m1"
        );
    }

    #[test]
    fn path_only_forms() {
        let absolute = Uri::parse("/a/b").unwrap();
        assert_eq!(absolute.path(), "/a/b");
        assert_eq!(absolute.scheme(), "");
        assert_eq!(absolute.to_string(), "/a/b");

        let relative = Uri::parse("a/b").unwrap();
        assert_eq!(relative.path(), "a/b");
    }

    #[test]
    fn empty_components_are_omitted() {
        let mut uri = Uri::from_parts("wamp", "host", "/p").unwrap();
        assert_eq!(uri.to_string(), "wamp://host/p");
        uri.set_user("u");
        assert_eq!(uri.to_string(), "wamp://u@host/p");
        uri.set_fragment("f");
        assert_eq!(uri.to_string(), "wamp://u@host/p#f");
    }

    #[test]
    fn from_parts_splits_host_port() {
        let uri = Uri::from_parts("ws", "host:8080", "/x").unwrap();
        assert_eq!(uri.host(), "host");
        assert_eq!(uri.port(), Some(8080));
        assert!(Uri::from_parts("", "host", "/x").is_err());
        assert!(Uri::from_parts("ws", "", "/x").is_err());
    }

    #[test]
    fn set_path_enforces_leading_slash_with_host() {
        let mut uri = Uri::from_parts("ws", "host", "p").unwrap();
        assert_eq!(uri.path(), "/p");
        uri.set_path("q/r");
        assert_eq!(uri.path(), "/q/r");

        let mut bare = Uri::parse("x").unwrap();
        bare.set_path("y");
        assert_eq!(bare.path(), "y");
    }

    #[test]
    fn parameters_are_ordered_and_unique() {
        let mut uri = Uri::parse("/p?b=2&a=1").unwrap();
        uri.set_parameter("c", "3");
        uri.set_parameter("b", "20");
        assert_eq!(uri.query_string(), "b=20&a=1&c=3");
        uri.remove_parameter("a");
        assert!(!uri.has_parameter("a"));
        assert_eq!(uri.query_string(), "b=20&c=3");
    }

    #[test]
    fn empty_parameter_value_emits_bare_name() {
        let mut uri = Uri::parse("/p").unwrap();
        uri.set_parameter("exclude", "");
        assert_eq!(uri.to_string(), "/p?exclude");
    }

    #[test]
    fn normalize_removes_dot_segments() {
        let mut uri = Uri::parse("wamp://host/a/./b/../c").unwrap();
        uri.normalize();
        assert_eq!(uri.path(), "/a/c");

        let mut plain = Uri::parse("wamp://host/a/b").unwrap();
        plain.normalize();
        assert_eq!(plain.path(), "/a/b");
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(Uri::parse("wamp://host:not-a-port/x").is_err());
        assert!(Uri::parse("a b").is_err());
        assert!(Uri::parse("://host/x").is_err());
    }

    #[test]
    fn clone_deep_copies_parameters() {
        let mut original = Uri::parse("/p?a=1").unwrap();
        let copy = original.clone();
        original.set_parameter("a", "2");
        assert_eq!(copy.parameter("a"), Some("1"));
    }
}
