//! Rendered configuration for the smart-card test stack.

use crate::ini::IniDocument;
use std::path::{Path, PathBuf};

const SSSD_DOMAIN: &str = "shadowutils";

/// Baseline `sssd.conf`: a files-backed domain with certificate
/// authentication enabled for PAM.
pub fn sssd_conf() -> IniDocument {
    let mut doc = IniDocument::new();
    doc.set("sssd", "debug_level", "9");
    doc.set("sssd", "services", "nss, pam");
    doc.set("sssd", "domains", SSSD_DOMAIN);
    doc.set("nss", "debug_level", "9");
    doc.set("pam", "debug_level", "9");
    doc.set("pam", "pam_cert_auth", "True");
    let domain = format!("domain/{SSSD_DOMAIN}");
    doc.set(&domain, "debug_level", "9");
    doc.set(&domain, "id_provider", "files");
    doc
}

pub fn certmap_section(user: &str) -> String {
    format!("certmap/{SSSD_DOMAIN}/{user}")
}

/// Map certificates whose subject CN is `user` onto the local account.
pub fn add_certmap_rule(doc: &mut IniDocument, user: &str) {
    doc.set(
        &certmap_section(user),
        "matchrule",
        format!("<SUBJECT>.*CN={user}.*"),
    );
}

pub fn softhsm2_conf(card_dir: &Path) -> String {
    format!(
        "directories.tokendir = {}/tokens/\n\
         slots.removable = true\n\
         objectstore.backend = file\n\
         log.level = INFO\n",
        card_dir.display()
    )
}

pub fn virt_card_service_path(systemd_dir: &Path, user: &str) -> PathBuf {
    systemd_dir.join(format!("virt_cacard_{user}.service"))
}

pub fn virt_card_service(user: &str, card_dir: &Path) -> String {
    let conf = card_dir.join("conf").join("softhsm2.conf");
    let mut doc = IniDocument::new();
    doc.set("Unit", "Description", format!("virtual card for {user}"));
    doc.set("Unit", "Requires", "pcscd.service");
    doc.set(
        "Service",
        "Environment",
        format!("SOFTHSM2_CONF=\"{}\"", conf.display()),
    );
    doc.set("Service", "WorkingDirectory", card_dir.display().to_string());
    doc.set(
        "Service",
        "ExecStart",
        "/usr/bin/virt_cacard >> /var/log/virt_cacard.debug 2>&1",
    );
    doc.set("Service", "KillMode", "process");
    doc.set("Install", "WantedBy", "multi-user.target");
    doc.to_string()
}

/// OpenSSL config for the local test CA rooted at `ca_dir`.
pub fn ca_cnf(ca_dir: &Path) -> String {
    format!(
        r"[ ca ]
default_ca = CA_default

[ CA_default ]
dir              = {dir}
database         = $dir/index.txt
new_certs_dir    = $dir/newcerts

certificate      = $dir/rootCA.crt
serial           = $dir/serial
private_key      = $dir/rootCA.key
RANDFILE         = $dir/rand

default_days     = 365
default_crl_hours = 1
default_md       = sha256

policy           = policy_any
email_in_dn      = no

name_opt         = ca_default
cert_opt         = ca_default
copy_extensions  = copy

[ usr_cert ]
authorityKeyIdentifier = keyid, issuer

[ v3_ca ]
subjectKeyIdentifier   = hash
authorityKeyIdentifier = keyid:always,issuer:always
basicConstraints       = CA:true
keyUsage               = critical, digitalSignature, cRLSign, keyCertSign

[ policy_any ]
organizationName       = supplied
organizationalUnitName = supplied
commonName             = supplied
emailAddress           = optional

[ req ]
distinguished_name = req_distinguished_name
prompt             = no

[ req_distinguished_name ]
O  = Example
OU = Example Test
CN = Example Test CA
",
        dir = ca_dir.display()
    )
}

/// CSR config for a card holder certificate usable for smart-card logon.
pub fn user_req_cnf(user: &str, realm: &str, domain: &str) -> String {
    format!(
        r#"[ req ]
distinguished_name = req_distinguished_name
prompt = no

[ req_distinguished_name ]
O = Example
OU = Example Test
CN = {user}

[ req_exts ]
basicConstraints = CA:FALSE
nsCertType = client, email
nsComment = "{user}"
subjectKeyIdentifier = hash
keyUsage = critical, nonRepudiation, digitalSignature
extendedKeyUsage = clientAuth, emailProtection, msSmartcardLogin
subjectAltName = otherName:msUPN;UTF8:{user}@{realm}, email:{user}@{domain}
"#
    )
}

/// SELinux CIL module letting pcscd bind the virtual card socket and
/// `p11_child` read the soft HSM cache.
pub const VIRTCACARD_CIL: &str = "(allow pcscd_t node_t(tcp_socket(node_bind)))

; allow p11_child to read softhsm cache - not present in RHEL by default
(allow sssd_t named_cache_t(dir(read search)))
";
