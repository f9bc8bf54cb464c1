use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Safe wrapper around libc::geteuid().
#[allow(unsafe_code)]
pub fn is_root() -> bool {
    // SAFETY: geteuid() takes no arguments, has no side effects and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

static SYSTEM_TOOLS: &[MissingPrereq] = &[
    MissingPrereq {
        name: "useradd",
        purpose: "creating local card users",
        install_hint: "dnf install shadow-utils",
    },
    MissingPrereq {
        name: "userdel",
        purpose: "removing card users on cleanup",
        install_hint: "dnf install shadow-utils",
    },
    MissingPrereq {
        name: "chpasswd",
        purpose: "setting local user passwords",
        install_hint: "dnf install shadow-utils",
    },
    MissingPrereq {
        name: "getent",
        purpose: "looking up existing accounts",
        install_hint: "dnf install glibc-common",
    },
    MissingPrereq {
        name: "openssl",
        purpose: "keys and certificate signing requests",
        install_hint: "dnf install openssl",
    },
    MissingPrereq {
        name: "semodule",
        purpose: "installing the virtual card SELinux module",
        install_hint: "dnf install policycoreutils",
    },
    MissingPrereq {
        name: "systemctl",
        purpose: "restarting pcscd and card services",
        install_hint: "systemd is required",
    },
];

/// Check the tools local provisioning and cleanup shell out to.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_system_prereqs() -> Vec<&'static MissingPrereq> {
    SYSTEM_TOOLS
        .iter()
        .filter(|p| !command_exists(p.name))
        .collect()
}

static IPA_TOOL: MissingPrereq = MissingPrereq {
    name: "ipa",
    purpose: "directory user enrollment and certificate requests",
    install_hint: "dnf install ipa-client",
};

/// Check prerequisites for enrolling users on an IPA server.
pub fn check_ipa_prereqs() -> Vec<&'static MissingPrereq> {
    if command_exists(IPA_TOOL.name) {
        Vec::new()
    } else {
        vec![&IPA_TOOL]
    }
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[&MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nscprep requires these tools to provision and clean up the host.");
    msg
}
