//! Address-list parsing and formatting (RFC 5322 §3.4).
//!
//! Records store From/To/Cc as one formatted string per header; this module
//! turns a decoded header value into that canonical form.

/// One mailbox from an address header.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `name = "Juan García"`, `email = "juan@ejemplo.com"`
/// - `"user@example.com"` → `name = ""`, `email = "user@example.com"`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    /// Display name (may be empty).
    pub name: String,
    /// The bare address (`user@domain`), or the raw text when unparseable.
    pub email: String,
}

impl Address {
    /// Parse a single mailbox.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    /// - `"user@domain.com (Display Name)"`
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    name: strip_quotes(&trimmed[..open]),
                    email: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        // Old-style comment form: "user@domain (Name)"
        if let (Some(open), true) = (trimmed.find('('), trimmed.ends_with(')')) {
            let email = trimmed[..open].trim();
            if email.contains('@') {
                return Self {
                    name: trimmed[open + 1..trimmed.len() - 1].trim().to_string(),
                    email: email.to_string(),
                };
            }
        }

        Self {
            name: String::new(),
            email: trimmed.to_string(),
        }
    }

    /// Parse a comma-separated list, respecting quotes and angle brackets.
    ///
    /// Group syntax (`team: a@b, c@d;`) is flattened to its members.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        let mut flush = |current: &mut String| {
            let addr = Self::parse(current);
            if !addr.email.is_empty() {
                results.push(addr);
            }
            current.clear();
        };

        for ch in raw.chars() {
            match ch {
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(ch);
                }
                '<' if !in_quotes => {
                    in_angle = true;
                    current.push(ch);
                }
                '>' if !in_quotes => {
                    in_angle = false;
                    current.push(ch);
                }
                ',' | ';' if !in_quotes && !in_angle => flush(&mut current),
                ':' if !in_quotes && !in_angle && !current.contains('@') => current.clear(),
                _ => current.push(ch),
            }
        }
        flush(&mut current);

        results
    }

    /// Canonical form: `Name <email>`, quoting names that need it.
    pub fn format(&self) -> String {
        if self.name.is_empty() {
            return self.email.clone();
        }
        if self.name.contains([',', ';', '"', '<', '>', '@', ':']) {
            let escaped = self.name.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\" <{}>", self.email)
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }
}

/// Format a list of addresses the way records store them.
pub fn format_list(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(Address::format)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1]
            .replace("\\\"", "\"")
            .trim()
            .to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}
