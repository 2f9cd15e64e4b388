//! Well-known namespace URIs.

/// Namespace bound to the reserved `xml` prefix in every element scope.
pub const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespace for W3C error codes (`err:` prefix).
pub const ERR_NS: &str = "http://www.w3.org/2005/xqt-errors";
