//! Sender and recipient addresses (RFC 5322 §3.4).

/// A parsed email address.
///
/// `"Ana Pérez <ana@example.org>"` → `display_name = "Ana Pérez"`, `address = "ana@example.org"`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`), or the raw text if unparsable.
    pub address: String,
}

impl EmailAddress {
    /// Parse one address from an already-decoded header value.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    display_name: strip_quotes(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// Parse a comma-separated list, honoring quoted commas
    /// (`"Doe, Jane" <j@d.org>, k@d.org`).
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut start = 0;
        let mut in_quotes = false;
        let mut in_angle = false;

        for (i, ch) in raw.char_indices() {
            match ch {
                '"' => in_quotes = !in_quotes,
                '<' if !in_quotes => in_angle = true,
                '>' if !in_quotes => in_angle = false,
                ',' if !in_quotes && !in_angle => {
                    results.push(Self::parse(&raw[start..i]));
                    start = i + 1;
                }
                _ => {}
            }
        }
        results.push(Self::parse(&raw[start..]));

        results.retain(|a| !a.address.is_empty());
        results
    }

    /// Name to show in listings: the display name, else the address.
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.address
        } else {
            &self.display_name
        }
    }
}

fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(s)
        .trim()
        .to_string()
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} <{}>", self.display_name, self.address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_and_address() {
        let addr = EmailAddress::parse("\"Doe, Jane\" <jane@example.org>");
        assert_eq!(addr.display_name, "Doe, Jane");
        assert_eq!(addr.address, "jane@example.org");
        assert_eq!(addr.name(), "Doe, Jane");
    }

    #[test]
    fn test_bare_address_name_falls_back() {
        let addr = EmailAddress::parse("  bob@example.org ");
        assert_eq!(addr.address, "bob@example.org");
        assert_eq!(addr.name(), "bob@example.org");
        assert_eq!(addr.to_string(), "bob@example.org");
    }

    #[test]
    fn test_parse_list_with_quoted_comma() {
        let list = EmailAddress::parse_list("\"Doe, Jane\" <j@d.org>, k@d.org,");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].display_name, "Doe, Jane");
        assert_eq!(list[1].address, "k@d.org");
    }
}
