//! Process command construction
//!
//! Commands are argument vectors handed straight to the PTY spawner; nothing
//! is ever interpolated into a shell string.

use tg_core::ResolvedIdentity;

use crate::validate::{AuthMethod, SshTarget, ValidatedParams};

/// SSH client binary
pub const SSH_PROGRAM: &str = "ssh";

/// Remote user when neither the client nor the resolver picked one
pub const FALLBACK_SSH_USER: &str = "root";

/// Build the argument vector for a validated session
///
/// Local sessions run `default_shell` verbatim.
pub fn build_command(
    params: &ValidatedParams,
    identity: &ResolvedIdentity,
    default_shell: &[String],
) -> Vec<String> {
    match params {
        ValidatedParams::Local => default_shell.to_vec(),
        ValidatedParams::Ssh(target) => ssh_command(target, identity),
    }
}

/// Explicit user, else the resolved user, else `root`
pub fn effective_user<'a>(target: &'a SshTarget, identity: &'a ResolvedIdentity) -> &'a str {
    target
        .user
        .as_deref()
        .filter(|u| !u.is_empty())
        .or_else(|| identity.user.as_deref().filter(|u| !u.is_empty()))
        .unwrap_or(FALLBACK_SSH_USER)
}

fn ssh_command(target: &SshTarget, identity: &ResolvedIdentity) -> Vec<String> {
    let mut argv: Vec<String> = vec![
        SSH_PROGRAM.into(),
        "-tt".into(),
        "-o".into(),
        "StrictHostKeyChecking=accept-new".into(),
        "-o".into(),
        "ConnectTimeout=10".into(),
        "-p".into(),
        target.port.to_string(),
    ];

    if let Some(key) = identity.identity.as_deref().filter(|k| !k.is_empty()) {
        argv.extend([
            "-o".into(),
            "IdentitiesOnly=yes".into(),
            "-i".into(),
            key.to_string(),
        ]);
    }

    argv.push(format!("{}@{}", effective_user(target, identity), target.host));

    if target.auth_method == AuthMethod::Password {
        argv.splice(
            1..1,
            ["-o".to_string(), "PreferredAuthentications=password".to_string()],
        );
    }

    argv
}
