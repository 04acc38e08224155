//! Synthetic KDD-style traffic for demos, benches and tests.
//!
//! Rows follow the `kdd99` raw layout; values are drawn from the ranges and
//! levels seen in the KDD Cup 99 data. Files are written under a dot-name and
//! renamed into place so the ingestion loop never picks up a partial file.

use crate::schema::{KDD99_CATEGORICAL, KDD99_COLUMNS};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const PROTOCOLS: &[&str] = &["tcp", "udp", "icmp"];

pub const SERVICES: &[&str] = &[
    "private", "domain_u", "http", "smtp", "ftp_data", "ftp", "eco_i", "other", "auth", "ecr_i",
    "IRC", "X11", "finger", "time", "domain", "telnet", "pop_3", "ldap", "login", "name", "ntp_u",
    "http_443", "sunrpc", "printer", "systat", "tim_i", "netstat", "remote_job", "link", "urp_i",
    "sql_net", "bgp", "pop_2", "tftp_u", "uucp", "imap4", "pm_dump", "nnsp", "courier", "daytime",
    "iso_tsap", "echo", "discard", "ssh", "whois", "mtp", "gopher", "rje", "ctf", "supdup",
    "hostnames", "csnet_ns", "uucp_path", "nntp", "netbios_ns", "netbios_dgm", "netbios_ssn",
    "vmnet", "Z39_50", "exec", "shell", "efs", "klogin", "kshell", "icmp",
];

pub const FLAGS: &[&str] = &[
    "SF", "RSTR", "S1", "REJ", "S3", "RSTO", "S0", "S2", "RSTOS0", "SH", "OTH",
];

pub const LABELS: &[&str] = &[
    "normal.", "smurf.", "neptune.", "ipsweep.", "portsweep.", "satan.", "back.", "teardrop.",
    "pod.", "nmap.", "guess_passwd.", "warezmaster.", "buffer_overflow.", "rootkit.",
];

enum Values {
    /// Uniform float in [lo, hi)
    Real(f64, f64),
    /// Uniform integer in [lo, hi]
    Int(i64, i64),
    Choice(&'static [&'static str]),
}

fn values_for(column: &str) -> Values {
    use Values::*;
    match column {
        "protocol_type" => Choice(PROTOCOLS),
        "service" => Choice(SERVICES),
        "flag" => Choice(FLAGS),
        "label" => Choice(LABELS),
        "duration" => Int(0, 57_715),
        "src_bytes" => Int(0, 62_825_648),
        "dst_bytes" => Int(0, 5_203_179),
        "land" | "logged_in" | "root_shell" | "is_host_login" | "is_guest_login" => Int(0, 1),
        "wrong_fragment" => Choice(&["0", "1", "3"]),
        "urgent" => Int(0, 3),
        "hot" => Int(0, 101),
        "num_failed_logins" => Int(0, 4),
        "num_compromised" => Int(0, 796),
        "su_attempted" => Int(0, 2),
        "num_root" => Int(0, 878),
        "num_file_creations" => Choice(&["0", "1", "2", "3", "4", "5", "6", "7", "12", "13", "30", "100"]),
        "num_shells" => Choice(&["0", "1", "2", "5"]),
        "num_access_files" => Int(0, 4),
        "num_outbound_cmds" => Int(0, 0),
        "count" | "srv_count" => Int(0, 511),
        "dst_host_count" | "dst_host_srv_count" => Int(0, 255),
        _ => Real(0.0, 1.0),
    }
}

/// One raw row in `kdd99` column order.
pub fn generate_row<R: Rng + ?Sized>(rng: &mut R) -> Vec<String> {
    KDD99_COLUMNS
        .iter()
        .map(|column| match values_for(column) {
            Values::Real(lo, hi) => format!("{:.2}", rng.gen_range(lo..hi)),
            Values::Int(lo, hi) => rng.gen_range(lo..=hi).to_string(),
            Values::Choice(levels) => levels.choose(rng).copied().unwrap_or_default().to_string(),
        })
        .collect()
}

pub fn generate_rows<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<Vec<String>> {
    (0..n).map(|_| generate_row(rng)).collect()
}

/// Write rows as one headerless file into `dir`, atomically. Returns the final path.
pub fn write_batch(dir: &Path, rows: &[Vec<String>], delimiter: char) -> std::io::Result<PathBuf> {
    let name = format!(
        "batch_{}_{}.csv",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%3f"),
        &Uuid::new_v4().simple().to_string()[..8]
    );
    let tmp = dir.join(format!(".{name}.tmp"));
    let sep = delimiter.to_string();
    let mut body = String::new();
    for row in rows {
        body.push_str(&row.join(&sep));
        body.push('\n');
    }
    std::fs::write(&tmp, body)?;
    let path = dir.join(name);
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}

/// Reference feature list matching what a classifier trained on one-hot
/// encoded KDD data expects: continuous columns in raw order, then one
/// indicator per protocol, service and flag level. The label is not a feature.
pub fn reference_features() -> Vec<String> {
    let mut names: Vec<String> = KDD99_COLUMNS
        .iter()
        .filter(|c| !KDD99_CATEGORICAL.contains(*c))
        .map(|c| c.to_string())
        .collect();
    for (column, levels) in [("protocol_type", PROTOCOLS), ("service", SERVICES), ("flag", FLAGS)] {
        names.extend(levels.iter().map(|l| format!("{column}_{l}")));
    }
    names
}
