use serde::{Deserialize, Serialize};

/// A Host is a degenerate Checkable: same identity shape, empty short name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckableKind {
    Host,
    Service,
}

/// Identity of one checkable object: `(host_name, short_name?)`.
///
/// `short_name` is `None` for a Host. The canonical string form used for
/// hashing and logging is `host_name` alone for a Host, or
/// `host_name!short_name` for a Service (matching the source's legacy
/// `host!service` naming).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckableRef {
    pub host_name: String,
    pub short_name: Option<String>,
}

impl CheckableRef {
    pub fn host(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            short_name: None,
        }
    }

    pub fn service(host_name: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            short_name: Some(short_name.into()),
        }
    }

    pub fn kind(&self) -> CheckableKind {
        match self.short_name {
            Some(_) => CheckableKind::Service,
            None => CheckableKind::Host,
        }
    }

    /// Canonical name used for hashing, log lines, and wire messages.
    pub fn canonical_name(&self) -> String {
        match &self.short_name {
            Some(short) => format!("{}!{}", self.host_name, short),
            None => self.host_name.clone(),
        }
    }
}

impl std::fmt::Display for CheckableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_canonical_name_has_no_bang() {
        let r = CheckableRef::host("web1");
        assert_eq!(r.canonical_name(), "web1");
        assert_eq!(r.kind(), CheckableKind::Host);
    }

    #[test]
    fn service_canonical_name_matches_legacy_format() {
        let r = CheckableRef::service("host", "http");
        assert_eq!(r.canonical_name(), "host!http");
        assert_eq!(r.kind(), CheckableKind::Service);
    }
}
