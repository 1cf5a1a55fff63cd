//! Hosts file entries for cluster services
//!
//! Every line ktctl writes ends with [`HOSTS_MARKER`], so removal only ever
//! touches lines this tool added for the recorded names.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use crate::Result;

/// Trailing marker on managed hosts lines
pub const HOSTS_MARKER: &str = "# ktctl";

/// Default system hosts file
#[cfg(unix)]
pub const DEFAULT_HOSTS_FILE: &str = "/etc/hosts";

/// Default system hosts file
#[cfg(windows)]
pub const DEFAULT_HOSTS_FILE: &str = r"C:\Windows\System32\drivers\etc\hosts";

fn managed_name(line: &str) -> Option<&str> {
    let entry = line.trim_end().strip_suffix(HOSTS_MARKER)?;
    let mut fields = entry.split_whitespace();
    let _ip = fields.next()?;
    fields.next()
}

/// Append `ip name # ktctl` lines for every entry in `hosts`.
///
/// Lines already managed for the same names are replaced.
pub fn dump_hosts(path: &Path, hosts: &BTreeMap<String, String>) -> Result<()> {
    if hosts.is_empty() {
        return Ok(());
    }
    let existing = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut lines: Vec<String> = existing
        .lines()
        .filter(|line| !managed_name(line).is_some_and(|n| hosts.contains_key(n)))
        .map(str::to_string)
        .collect();
    for (name, ip) in hosts {
        lines.push(format!("{} {} {}", ip, name, HOSTS_MARKER));
    }

    std::fs::write(path, lines.join("\n") + "\n")?;
    info!(path = %path.display(), count = hosts.len(), "Dumped service hosts");
    Ok(())
}

/// Remove managed lines for the given names; everything else is kept as is.
pub fn drop_hosts<'a>(path: &Path, names: impl IntoIterator<Item = &'a String>) -> Result<()> {
    let names: Vec<&String> = names.into_iter().collect();
    if names.is_empty() {
        return Ok(());
    }
    let existing = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Hosts file missing, nothing to drop");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0usize;
    let kept: Vec<&str> = existing
        .lines()
        .filter(|line| match managed_name(line) {
            Some(name) if names.iter().any(|n| n.as_str() == name) => {
                removed += 1;
                false
            }
            _ => true,
        })
        .collect();

    if removed > 0 {
        let mut content = kept.join("\n");
        if existing.ends_with('\n') {
            content.push('\n');
        }
        std::fs::write(path, content)?;
        info!(path = %path.display(), removed, "Dropped service hosts");
    }
    Ok(())
}
