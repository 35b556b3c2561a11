//! Caller allow-list.

use serde::Deserialize;

/// Ordered set of caller emails, matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<String>")]
pub struct AllowList {
    emails: Vec<String>,
}

impl AllowList {
    /// Build an allow-list, dropping blanks and duplicates but keeping order.
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Vec::new();
        for email in emails {
            let email = email.as_ref().trim().to_lowercase();
            if !email.is_empty() && !list.contains(&email) {
                list.push(email);
            }
        }
        Self { emails: list }
    }

    /// Parse a comma-separated list such as `a@example.com,b@example.com`.
    #[must_use]
    pub fn from_csv(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    /// Whether `email` is on the list, ignoring case. The candidate is not
    /// trimmed.
    #[must_use]
    pub fn contains(&self, email: &str) -> bool {
        let email = email.to_lowercase();
        self.emails.iter().any(|allowed| *allowed == email)
    }

    /// The normalized emails, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.emails.iter().map(String::as_str)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.emails.len()
    }

    /// Whether the list is empty. An empty list authorizes nobody.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

impl From<Vec<String>> for AllowList {
    fn from(emails: Vec<String>) -> Self {
        Self::new(emails)
    }
}
