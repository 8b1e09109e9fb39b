//! Requests directed at directory nodes and their results.

use serde_json::Value;

/// URI query parameter carrying the request kind.
pub const KIND_PARAMETER: &str = "type";

const KIND_CALL: &str = "call";
const KIND_PUBLISH: &str = "publish";

/// The action requested of the target node's handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestKind {
    /// Unknown or unspecified action.
    #[default]
    Unspecified,
    /// Execute a method and return the result. The caller expects a reply.
    Call,
    /// Publish data. Fire and forget; nothing is returned.
    Publish,
}

impl RequestKind {
    /// Parses the value of the `type=` query parameter. Unknown values map
    /// to `Unspecified`.
    pub fn from_parameter(value: &str) -> Self {
        match value {
            KIND_CALL => Self::Call,
            KIND_PUBLISH => Self::Publish,
            _ => Self::Unspecified,
        }
    }

    /// The `name=value` query parameter for this kind, or an empty string
    /// for `Unspecified`.
    pub fn query_parameter(self) -> String {
        match self {
            Self::Call => format!("{KIND_PARAMETER}={KIND_CALL}"),
            Self::Publish => format!("{KIND_PARAMETER}={KIND_PUBLISH}"),
            Self::Unspecified => String::new(),
        }
    }
}

impl core::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::Call => write!(f, "call"),
            Self::Publish => write!(f, "publish"),
        }
    }
}

/// An error recorded while processing a request.
///
/// The description is mandatory; details are opaque JSON shipped verbatim
/// to the remote caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestError {
    pub description: String,
    pub details: Option<Value>,
}

impl RequestError {
    pub fn new(description: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            description: description.into(),
            details,
        }
    }
}

/// The accumulated result of processing a request.
///
/// Handlers append values and errors in the order they run. The protocol
/// layer returns only the first error to a remote caller; additional
/// errors are informational.
#[derive(Debug, Default)]
pub struct RequestResult {
    values: Vec<Value>,
    errors: Vec<RequestError>,
}

impl RequestResult {
    pub fn add_value(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn add_error(&mut self, error: RequestError) {
        self.errors.push(error);
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn errors(&self) -> &[RequestError] {
        &self.errors
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn error(&self, index: usize) -> Option<&RequestError> {
        self.errors.get(index)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn num_errors(&self) -> usize {
        self.errors.len()
    }
}

/// A request directed at the resource behind a directory path.
///
/// The request path is carried by a URI which may also hold query
/// parameters consulted by handlers (request kind, publish routing).
/// tannoy-core does not interpret the URI beyond its path; the generic
/// parameterised form lives in the protocol crate. Here the URI surface is
/// reduced to what traversal needs: the path string and the parameter map.
#[derive(Debug)]
pub struct Request {
    path: String,
    parameters: Vec<(String, String)>,
    kind: RequestKind,
    arguments: Vec<Value>,
    result: RequestResult,
}

impl Request {
    /// Creates a request for `path` with an explicit kind.
    pub fn new(path: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            path: path.into(),
            parameters: Vec::new(),
            kind,
            arguments: Vec::new(),
            result: RequestResult::default(),
        }
    }

    /// Creates a request whose kind is read from the `type=` parameter in
    /// `parameters`, defaulting to `Unspecified`.
    pub fn with_parameters(
        path: impl Into<String>,
        parameters: Vec<(String, String)>,
    ) -> Self {
        let kind = parameters
            .iter()
            .find(|(name, _)| name == KIND_PARAMETER)
            .map(|(_, value)| RequestKind::from_parameter(value))
            .unwrap_or_default();
        Self {
            path: path.into(),
            parameters,
            kind,
            arguments: Vec::new(),
            result: RequestResult::default(),
        }
    }

    /// The directory path targeted by this request.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The value of a URI query parameter, if present.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value.as_str())
    }

    /// True if the request URI carries the named query parameter.
    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.iter().any(|(n, _)| n == name)
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Overrides the request kind.
    pub fn set_kind(&mut self, kind: RequestKind) {
        self.kind = kind;
    }

    /// Appends a single argument.
    pub fn add_argument(&mut self, argument: Value) {
        self.arguments.push(argument);
    }

    /// Appends a batch of arguments, each as a separate argument.
    pub fn add_arguments(&mut self, arguments: impl IntoIterator<Item = Value>) {
        self.arguments.extend(arguments);
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// The argument at `index`, if present.
    pub fn argument(&self, index: usize) -> Option<&Value> {
        self.arguments.get(index)
    }

    pub fn num_arguments(&self) -> usize {
        self.arguments.len()
    }

    pub fn result(&self) -> &RequestResult {
        &self.result
    }

    pub fn result_mut(&mut self) -> &mut RequestResult {
        &mut self.result
    }
}
