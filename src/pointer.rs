//! JSON Pointer (RFC 6901) parsing, escaping and traversal.

use std::fmt;

use serde_json::Value;

/// A parsed JSON Pointer: a sequence of unescaped reference tokens.
///
/// `Display` renders the pointer form (`/a/b~1c`); [`JsonPointer::to_fragment`]
/// renders a URI fragment (`#/a/b~1c`) with characters that would break
/// fragment parsing percent-encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsonPointer(Vec<String>);

impl JsonPointer {
    /// The empty pointer, addressing the whole document.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    /// Parse a pointer string (`""` or `/a/b`).
    pub fn parse(pointer: &str) -> Result<Self, String> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = pointer.strip_prefix('/') else {
            return Err(format!("pointer \"{}\" must start with '/'", pointer));
        };
        Ok(Self(rest.split('/').map(unescape_token).collect()))
    }

    /// Parse a URI fragment (with or without the leading `#`).
    ///
    /// The fragment is percent-decoded before being split into tokens.
    pub fn from_fragment(fragment: &str) -> Result<Self, String> {
        let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
        let decoded = urlencoding::decode(fragment)
            .map_err(|e| format!("invalid percent-encoding in \"{}\": {}", fragment, e))?;
        Self::parse(&decoded)
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A new pointer one level deeper.
    pub fn child(&self, token: impl Into<String>) -> Self {
        let mut tokens = self.0.clone();
        tokens.push(token.into());
        Self(tokens)
    }

    /// Append all tokens of `other`.
    pub fn join(&self, other: &JsonPointer) -> Self {
        let mut tokens = self.0.clone();
        tokens.extend(other.0.iter().cloned());
        Self(tokens)
    }

    pub fn starts_with(&self, prefix: &JsonPointer) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Render as a `$ref` fragment, e.g. `#/definitions/a%20b`.
    pub fn to_fragment(&self) -> String {
        let mut out = String::from("#");
        for token in &self.0 {
            out.push('/');
            for c in escape_token(token).chars() {
                match c {
                    '%' => out.push_str("%25"),
                    '#' => out.push_str("%23"),
                    ' ' => out.push_str("%20"),
                    '"' => out.push_str("%22"),
                    c if c.is_control() => {
                        let mut buf = [0u8; 4];
                        for byte in c.encode_utf8(&mut buf).bytes() {
                            out.push_str(&format!("%{:02X}", byte));
                        }
                    }
                    c => out.push(c),
                }
            }
        }
        out
    }

    /// Look up the value this pointer addresses, without following `$ref`s.
    pub fn get<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        self.0
            .iter()
            .try_fold(value, |current, token| step(current, token).ok())
    }
}

impl fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.0 {
            write!(f, "/{}", escape_token(token))?;
        }
        Ok(())
    }
}

/// Unescape a single reference token (`~1` = `/`, `~0` = `~`).
pub fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Escape a single reference token (`~` = `~0`, `/` = `~1`).
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Take one pointer step into `value`.
///
/// Array tokens must be canonical indices (`0`, `1`, ... without leading
/// zeros). The error message explains why the step failed.
pub fn step<'v>(value: &'v Value, token: &str) -> Result<&'v Value, String> {
    match value {
        Value::Object(map) => map
            .get(token)
            .ok_or_else(|| format!("key \"{}\" not found", token)),
        Value::Array(items) => {
            let index = parse_index(token)
                .ok_or_else(|| format!("\"{}\" is not a valid array index", token))?;
            items.get(index).ok_or_else(|| {
                format!(
                    "index {} out of range for array of length {}",
                    index,
                    items.len()
                )
            })
        }
        other => Err(format!(
            "cannot step into {} with \"{}\"",
            crate::types::json_type_name(other),
            token
        )),
    }
}

fn parse_index(token: &str) -> Option<usize> {
    if token.is_empty() || (token.len() > 1 && token.starts_with('0')) {
        return None;
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}
