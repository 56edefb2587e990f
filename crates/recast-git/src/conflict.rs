use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    Content,
    AddAdd,
    ModifyDelete,
    DeleteDelete,
}

/// What the prefer-destination fallback does with a conflicted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepDestination,
    KeepDestinationIfPresent,
    Remove,
}

impl ConflictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::AddAdd => "add/add",
            Self::ModifyDelete => "modify/delete",
            Self::DeleteDelete => "delete/delete",
        }
    }

    pub fn from_status_code(code: &str) -> Option<Self> {
        match code {
            "UU" => Some(Self::Content),
            "AA" | "AU" | "UA" => Some(Self::AddAdd),
            "UD" | "DU" => Some(Self::ModifyDelete),
            "DD" => Some(Self::DeleteDelete),
            _ => None,
        }
    }

    pub fn resolution(self) -> Resolution {
        match self {
            Self::Content => Resolution::KeepDestination,
            Self::AddAdd | Self::ModifyDelete => Resolution::KeepDestinationIfPresent,
            Self::DeleteDelete => Resolution::Remove,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictEntry {
    pub path: String,
    pub kind: ConflictKind,
}

/// Extracts unmerged paths from `git status --porcelain -z` output.
pub fn parse_unmerged(porcelain_z: &str) -> Vec<ConflictEntry> {
    let mut entries = Vec::new();
    let mut fields = porcelain_z.split('\0').filter(|field| !field.is_empty());

    while let Some(field) = fields.next() {
        let Some((code, path)) = field.split_at_checked(2) else {
            continue;
        };
        let path = path.strip_prefix(' ').unwrap_or(path);

        // renames and copies carry the source path as the next field
        if code.contains('R') || code.contains('C') {
            fields.next();
        }

        if let Some(kind) = ConflictKind::from_status_code(code) {
            entries.push(ConflictEntry {
                path: path.to_owned(),
                kind,
            });
        }
    }

    entries
}
