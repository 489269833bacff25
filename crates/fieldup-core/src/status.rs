use serde::Serialize;

/// Probation state of a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Bad,
    Untried,
    Good,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bad => "bad",
            Self::Untried => "untried",
            Self::Good => "good",
        }
    }
}

/// Kind of in-flight operation recorded by a journal marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Upgrade,
    Removal,
}

impl MarkerKind {
    pub const ALL: [MarkerKind; 2] = [MarkerKind::Upgrade, MarkerKind::Removal];

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Upgrade => ".new.",
            Self::Removal => ".del.",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::Removal => "removal",
        }
    }

    pub fn marker_name(self, app_name: &str) -> String {
        format!("{}{app_name}", self.prefix())
    }

    /// Splits a directory entry name into marker kind and app name.
    pub fn parse_marker_name(file_name: &str) -> Option<(Self, &str)> {
        Self::ALL.into_iter().find_map(|kind| {
            file_name
                .strip_prefix(kind.prefix())
                .filter(|rest| !rest.is_empty())
                .map(|rest| (kind, rest))
        })
    }
}
