//! Status dispatcher: maps `S <name>` lines to status codes via a
//! compile-time sorted table and a binary search.

/// A decoded status event: one of the names the helper may emit on an
/// `S` line, or the adapter's own synthetic [`StatusCode::Eof`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum StatusCode {
    DecryptionOkay,
    DecryptionFailed,
    EncryptionOkay,
    EncryptionFailed,
    GoodSig,
    BadSig,
    ErrSig,
    ValidSig,
    TrustUndefined,
    TrustNever,
    TrustMarginal,
    TrustFully,
    TrustUltimate,
    SigExpired,
    KeyExpired,
    KeyRevoked,
    NoPubkey,
    NoSeckey,
    ImportOk,
    ImportRes,
    ImportProblem,
    InvRecp,
    InvSgnr,
    NoRecp,
    NoSgnr,
    KeyCreated,
    Progress,
    Newsig,
    Unexpected,
    /// Synthetic: the control channel reached a terminal `OK`/`ERR`/EOF.
    Eof,
}

struct TableEntry {
    name: &'static str,
    code: StatusCode,
}

/// Sorted (ASCII-betically, by `name`) so [`lookup`] can binary search.
/// Keep sorted when adding entries; the table is not re-sorted at
/// runtime.
const STATUS_TABLE: &[TableEntry] = &[
    TableEntry {
        name: "BADSIG",
        code: StatusCode::BadSig,
    },
    TableEntry {
        name: "DECRYPTION_FAILED",
        code: StatusCode::DecryptionFailed,
    },
    TableEntry {
        name: "DECRYPTION_OKAY",
        code: StatusCode::DecryptionOkay,
    },
    TableEntry {
        name: "ENCRYPTION_FAILED",
        code: StatusCode::EncryptionFailed,
    },
    TableEntry {
        name: "ENCRYPTION_OKAY",
        code: StatusCode::EncryptionOkay,
    },
    TableEntry {
        name: "ERRSIG",
        code: StatusCode::ErrSig,
    },
    TableEntry {
        name: "GOODSIG",
        code: StatusCode::GoodSig,
    },
    TableEntry {
        name: "IMPORTED",
        code: StatusCode::ImportOk,
    },
    TableEntry {
        name: "IMPORT_PROBLEM",
        code: StatusCode::ImportProblem,
    },
    TableEntry {
        name: "IMPORT_RES",
        code: StatusCode::ImportRes,
    },
    TableEntry {
        name: "INV_RECP",
        code: StatusCode::InvRecp,
    },
    TableEntry {
        name: "INV_SGNR",
        code: StatusCode::InvSgnr,
    },
    TableEntry {
        name: "KEYEXPIRED",
        code: StatusCode::KeyExpired,
    },
    TableEntry {
        name: "KEYREVOKED",
        code: StatusCode::KeyRevoked,
    },
    TableEntry {
        name: "KEY_CREATED",
        code: StatusCode::KeyCreated,
    },
    TableEntry {
        name: "NEWSIG",
        code: StatusCode::Newsig,
    },
    TableEntry {
        name: "NODATA",
        code: StatusCode::Unexpected,
    },
    TableEntry {
        name: "NO_PUBKEY",
        code: StatusCode::NoPubkey,
    },
    TableEntry {
        name: "NO_RECP",
        code: StatusCode::NoRecp,
    },
    TableEntry {
        name: "NO_SECKEY",
        code: StatusCode::NoSeckey,
    },
    TableEntry {
        name: "NO_SGNR",
        code: StatusCode::NoSgnr,
    },
    TableEntry {
        name: "PROGRESS",
        code: StatusCode::Progress,
    },
    TableEntry {
        name: "SIGEXPIRED",
        code: StatusCode::SigExpired,
    },
    TableEntry {
        name: "TRUST_FULLY",
        code: StatusCode::TrustFully,
    },
    TableEntry {
        name: "TRUST_MARGINAL",
        code: StatusCode::TrustMarginal,
    },
    TableEntry {
        name: "TRUST_NEVER",
        code: StatusCode::TrustNever,
    },
    TableEntry {
        name: "TRUST_ULTIMATE",
        code: StatusCode::TrustUltimate,
    },
    TableEntry {
        name: "TRUST_UNDEFINED",
        code: StatusCode::TrustUndefined,
    },
    TableEntry {
        name: "VALIDSIG",
        code: StatusCode::ValidSig,
    },
];

/// Look up `name` in the compile-time status table via binary search.
/// Returns `None` for unrecognized names (callers should log and ignore).
pub fn lookup(name: &str) -> Option<StatusCode> {
    STATUS_TABLE
        .binary_search_by(|entry| entry.name.cmp(name))
        .ok()
        .map(|idx| STATUS_TABLE[idx].code)
}

/// A handler receiving dispatched status events: `(code, rest)` where
/// `rest` is the text after the first space on the `S` line, or empty.
pub type StatusHandler<'a> = dyn FnMut(StatusCode, &str) + 'a;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted() {
        let names: Vec<&str> = STATUS_TABLE.iter().map(|e| e.name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted, "STATUS_TABLE must stay ASCII-sorted");
    }

    #[test]
    fn finds_known_names() {
        assert_eq!(lookup("DECRYPTION_OKAY"), Some(StatusCode::DecryptionOkay));
        assert_eq!(lookup("INV_RECP"), Some(StatusCode::InvRecp));
        assert_eq!(lookup("NO_RECP"), Some(StatusCode::NoRecp));
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(lookup("TOTALLY_MADE_UP"), None);
    }
}
