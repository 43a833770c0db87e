//! Operation façade: pure command formatting. Each function stages channel
//! bindings and synchronous pre-command `OPTION`s, then sets the session's
//! primary command, without dispatching it; `Session::start` does that.

use crate::channel::ChannelKind;
use crate::data::{DataHandle, Mode};
use crate::error::{EngineError, ErrorKind, Result};
use crate::session::Session;
use crate::status::StatusCode;

fn bind_and_announce(
    session: &mut Session,
    kind: ChannelKind,
    data: DataHandle,
    verb: &str,
    use_armor: bool,
) -> Result<()> {
    let fd = session
        .server_fd(kind)
        .ok_or_else(|| EngineError::with_detail(ErrorKind::GeneralError, "channel has no fd"))?;
    // INPUT carries the data source's own encoding hint. OUTPUT has no
    // producer of its own to ask, so its `--armor` flag comes from the
    // caller instead, passed down as `use_armor`.
    let suffix = if kind == ChannelKind::Input {
        data.encoding().input_flag().map(|f| format!(" {}", f))
    } else if use_armor {
        Some(" --armor".to_string())
    } else {
        None
    };
    session.bind(kind, data);
    let cmd = format!("{} FD={}{}", verb, fd, suffix.unwrap_or_default());
    session.simple(&cmd)
}

/// `DECRYPT`: ciphertext on INPUT, plaintext on OUTPUT, MESSAGE unused.
pub fn decrypt(session: &mut Session, ciphertext: DataHandle, plaintext: DataHandle) -> Result<()> {
    bind_and_announce(session, ChannelKind::Input, ciphertext, "INPUT", false)?;
    bind_and_announce(session, ChannelKind::Output, plaintext, "OUTPUT", false)?;
    session.close_unused(ChannelKind::Message);
    session.stage_command("DECRYPT");
    Ok(())
}

/// `ENCRYPT`: plaintext on INPUT, ciphertext on OUTPUT, MESSAGE unused,
/// plus the recipient submission loop. `use_armor` propagates to the
/// OUTPUT announce line, asking the helper to armor the ciphertext it
/// writes back.
pub fn encrypt(
    session: &mut Session,
    plaintext: DataHandle,
    ciphertext: DataHandle,
    recipients: &[String],
    use_armor: bool,
) -> Result<()> {
    bind_and_announce(session, ChannelKind::Input, plaintext, "INPUT", false)?;
    bind_and_announce(session, ChannelKind::Output, ciphertext, "OUTPUT", use_armor)?;
    session.close_unused(ChannelKind::Message);
    submit_recipients(session, recipients)?;
    session.stage_command("ENCRYPT");
    Ok(())
}

/// Send one `RECIPIENT <name>` per entry, translating `Invalid_Key`
/// failures into `INV_RECP` status events instead of propagating, and
/// emitting `NO_RECP` if none were accepted.
fn submit_recipients(session: &mut Session, recipients: &[String]) -> Result<()> {
    let mut any_valid = false;
    for name in recipients {
        match session.simple(&format!("RECIPIENT {}", name)) {
            Ok(()) => any_valid = true,
            Err(e) if e.kind() == ErrorKind::InvalidKey => {
                session.emit_status(StatusCode::InvRecp, &format!("0 {}", name));
            }
            Err(e) => return Err(e),
        }
    }
    if !any_valid {
        session.emit_status(StatusCode::NoRecp, "");
    }
    Ok(())
}

/// `SIGN` / `SIGN --detached`: INPUT = text to sign, OUTPUT = signature,
/// `OPTION include-certs` sent first.
pub fn sign(
    session: &mut Session,
    text: DataHandle,
    signature: DataHandle,
    include_certs: i32,
    detached: bool,
) -> Result<()> {
    session.simple(&format!("OPTION include-certs {}", include_certs))?;
    bind_and_announce(session, ChannelKind::Input, text, "INPUT", false)?;
    bind_and_announce(session, ChannelKind::Output, signature, "OUTPUT", false)?;
    session.close_unused(ChannelKind::Message);
    let command = if detached { "SIGN --detached" } else { "SIGN" };
    session.stage_command(command);
    Ok(())
}

/// `VERIFY`: the signature object always goes on INPUT; the signed text
/// goes on OUTPUT when it is a producer (inline signature) or on MESSAGE
/// when it is a consumer (detached signature), per the text handle's mode.
pub fn verify(session: &mut Session, signature: DataHandle, text: DataHandle) -> Result<()> {
    bind_and_announce(session, ChannelKind::Input, signature, "INPUT", false)?;
    let text_kind = match text.mode() {
        Mode::Read => ChannelKind::Output,
        Mode::Write => ChannelKind::Message,
    };
    let verb = if text_kind == ChannelKind::Output {
        "OUTPUT"
    } else {
        "MESSAGE"
    };
    bind_and_announce(session, text_kind, text, verb, false)?;
    let unused = if text_kind == ChannelKind::Output {
        ChannelKind::Message
    } else {
        ChannelKind::Output
    };
    session.close_unused(unused);
    session.stage_command("VERIFY");
    Ok(())
}

/// `IMPORT`: INPUT = key material; OUTPUT and MESSAGE unused.
pub fn import(session: &mut Session, key_material: DataHandle) -> Result<()> {
    bind_and_announce(session, ChannelKind::Input, key_material, "INPUT", false)?;
    session.close_unused(ChannelKind::Output);
    session.close_unused(ChannelKind::Message);
    session.stage_command("IMPORT");
    Ok(())
}

/// `GENKEY`: INPUT = parameter document, OUTPUT = public key. The helper
/// always stores the secret key itself, so a non-null `seckey` handle is
/// rejected up front. `use_armor` propagates to the OUTPUT announce line.
pub fn genkey(
    session: &mut Session,
    params: DataHandle,
    pubkey: DataHandle,
    seckey: Option<DataHandle>,
    use_armor: bool,
) -> Result<()> {
    if seckey.is_some() {
        return Err(EngineError::with_detail(
            ErrorKind::InvalidValue,
            "genkey secret-key output is not supported by this helper",
        ));
    }
    bind_and_announce(session, ChannelKind::Input, params, "INPUT", false)?;
    bind_and_announce(session, ChannelKind::Output, pubkey, "OUTPUT", use_armor)?;
    session.close_unused(ChannelKind::Message);
    session.stage_command("GENKEY");
    Ok(())
}

/// `LISTKEYS` / `LISTSECRETKEYS <pattern>`; all three data channels are
/// unused, key material flows on STATUS via `D` lines instead.
pub fn keylist(session: &mut Session, pattern: &str, secret_only: bool, list_mode: u32) -> Result<()> {
    session.simple(&format!("OPTION list-mode={}", list_mode & 3))?;
    session.close_unused(ChannelKind::Input);
    session.close_unused(ChannelKind::Output);
    session.close_unused(ChannelKind::Message);
    let verb = if secret_only { "LISTSECRETKEYS" } else { "LISTKEYS" };
    let command = if pattern.is_empty() {
        verb.to_string()
    } else {
        format!("{} {}", verb, pattern)
    };
    session.stage_command(command);
    Ok(())
}

/// Percent-encode the three bytes the extended list command treats
/// specially (`%` → `%25`, space → `%20`, `+` → `%2B`); everything else
/// passes through unchanged.
pub fn percent_encode_pattern(pattern: &str) -> String {
    let mut out = Vec::with_capacity(pattern.len());
    for b in pattern.bytes() {
        match b {
            b'%' => out.extend_from_slice(b"%25"),
            b' ' => out.extend_from_slice(b"%20"),
            b'+' => out.extend_from_slice(b"%2B"),
            _ => out.push(b),
        }
    }
    // Safe: every replaced byte is ASCII and every untouched byte (ASCII
    // or a UTF-8 continuation/lead byte) passes through unmodified, so
    // the multi-byte structure of the original `&str` is preserved.
    String::from_utf8(out).expect("percent-encoding preserves UTF-8 validity")
}

/// Extended list variant: concatenate multiple percent-escaped patterns
/// joined by spaces.
pub fn keylist_ext(
    session: &mut Session,
    patterns: &[String],
    secret_only: bool,
    list_mode: u32,
) -> Result<()> {
    session.simple(&format!("OPTION list-mode={}", list_mode & 3))?;
    session.close_unused(ChannelKind::Input);
    session.close_unused(ChannelKind::Output);
    session.close_unused(ChannelKind::Message);
    let verb = if secret_only { "LISTSECRETKEYS" } else { "LISTKEYS" };
    let joined = patterns
        .iter()
        .map(|p| percent_encode_pattern(p))
        .collect::<Vec<_>>()
        .join(" ");
    let command = if joined.is_empty() {
        verb.to_string()
    } else {
        format!("{} {}", verb, joined)
    };
    session.stage_command(command);
    Ok(())
}

/// Stub operations the helper does not support in this adapter; the
/// original engine compiles these out entirely when gpgsm support is
/// disabled (`ENABLE_GPGSM`), surfacing `Invalid_Engine`. Here they are
/// always present but always fail, matching that fallback branch's
/// observable behaviour.
pub fn delete(_session: &mut Session) -> Result<()> {
    Err(EngineError::new(ErrorKind::NotImplemented))
}

/// See [`delete`].
pub fn export(_session: &mut Session) -> Result<()> {
    Err(EngineError::new(ErrorKind::NotImplemented))
}

/// See [`delete`].
pub fn trustlist(_session: &mut Session) -> Result<()> {
    Err(EngineError::new(ErrorKind::NotImplemented))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encode_is_identity_without_special_bytes() {
        assert_eq!(percent_encode_pattern("alice@example.com"), "alice@example.com");
    }

    #[test]
    fn percent_encode_escapes_all_three_bytes() {
        assert_eq!(percent_encode_pattern("a b"), "a%20b");
        assert_eq!(percent_encode_pattern("c+d"), "c%2Bd");
        assert_eq!(percent_encode_pattern("e%f"), "e%25f");
    }

    #[test]
    fn percent_encode_bijection_roundtrips_plain_bytes() {
        let input = "plain-pattern_1";
        let encoded = percent_encode_pattern(input);
        assert_eq!(encoded, input);
    }
}
