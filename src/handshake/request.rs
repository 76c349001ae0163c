use std::fmt;

use super::HandshakeError;

/// First line of a handshake: `METHOD URI VERSION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: String,
    uri: String,
    version: String,
}

impl RequestLine {
    pub fn new(method: impl Into<String>, uri: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            version: version.into(),
        }
    }

    /// Splits `line` on its first two spaces. Anything after the second space
    /// belongs to the version.
    ///
    /// ```
    /// use framelane::RequestLine;
    ///
    /// let line = RequestLine::parse("GET /chat HTTP/1.1").unwrap();
    /// assert_eq!(line.method(), "GET");
    /// assert_eq!(line.uri(), "/chat");
    /// assert_eq!(line.version(), "HTTP/1.1");
    /// assert!(RequestLine::parse("GET /chat").is_err());
    /// ```
    pub fn parse(line: &str) -> Result<Self, HandshakeError> {
        let mut parts = line.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(uri), Some(version)) => Ok(Self::new(method, uri, version)),
            _ => Err(HandshakeError::MalformedRequestLine { line: line.to_owned() }),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.uri, self.version)
    }
}

/// Header fields in the order their names were first seen.
///
/// Names compare ASCII case-insensitively and keep the spelling of their first
/// occurrence. A repeated name collects all its values in arrival order.
///
/// ```
/// use framelane::HeaderFields;
///
/// let mut headers = HeaderFields::new();
/// headers.append("Accept", "text/plain");
/// headers.append("Host", "example.com");
/// headers.append("accept", "text/html");
///
/// assert_eq!(headers.len(), 2);
/// assert_eq!(headers.get("ACCEPT"), Some("text/plain"));
/// assert_eq!(headers.get_all("accept"), ["text/plain", "text/html"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    fields: Vec<(String, Vec<String>)>,
}

impl HeaderFields {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.fields[i].1.push(value.into()),
            None => self.fields.push((name, vec![value.into()])),
        }
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|i| self.fields[i].1.first())
            .map(String::as_str)
    }

    /// Every value of `name`, empty if absent.
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(i) => self.fields[i].1.as_slice(),
            None => &[],
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    // Parses a `name: value` line.
    pub(crate) fn append_line(&mut self, line: &str) -> Result<(), HandshakeError> {
        let Some((name, value)) = line.split_once(':') else {
            return Err(HandshakeError::MalformedHeader { line: line.to_owned() });
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(HandshakeError::MalformedHeader { line: line.to_owned() });
        }
        self.append(name, value.trim());
        Ok(())
    }
}

/// A completed handshake: the request line and every header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    request_line: RequestLine,
    headers: HeaderFields,
}

impl Handshake {
    pub fn new(request_line: RequestLine, headers: HeaderFields) -> Self {
        Self { request_line, headers }
    }

    pub fn request_line(&self) -> &RequestLine {
        &self.request_line
    }

    pub fn headers(&self) -> &HeaderFields {
        &self.headers
    }

    pub fn into_parts(self) -> (RequestLine, HeaderFields) {
        (self.request_line, self.headers)
    }
}
