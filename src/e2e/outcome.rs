//! Marker extraction from client output
//!
//! The only place that knows the client's text format. Everything else in
//! the harness works on [`Outcome`].

/// Structured result of one client run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Code from the first `status(<n>):` marker
    pub status: Option<u16>,
    /// Digits from the first `GET value[<n>]=<digits>` marker
    pub value: Option<String>,
}

/// Scan free-form output for the status and value markers.
pub fn parse_outcome(output: &str) -> Outcome {
    Outcome {
        status: find_status(output),
        value: find_value(output),
    }
}

fn leading_digits(s: &str) -> &str {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    &s[..end]
}

fn find_status(output: &str) -> Option<u16> {
    output.match_indices("status(").find_map(|(pos, marker)| {
        let rest = &output[pos + marker.len()..];
        let digits = leading_digits(rest);
        if digits.is_empty() || !rest[digits.len()..].starts_with("):") {
            return None;
        }
        digits.parse().ok()
    })
}

fn find_value(output: &str) -> Option<String> {
    output.match_indices("GET").find_map(|(pos, marker)| {
        let rest = &output[pos + marker.len()..];
        let trimmed = rest.trim_start_matches(char::is_whitespace);
        if trimmed.len() == rest.len() {
            return None;
        }
        let rest = trimmed.strip_prefix("value[")?;
        let len = leading_digits(rest);
        if len.is_empty() {
            return None;
        }
        let rest = rest[len.len()..].strip_prefix("]=")?;
        let value = leading_digits(rest);
        (!value.is_empty()).then(|| value.to_string())
    })
}
