//! Device discovery and wildcard path resolution.

use std::fs;
use std::path::{Component, Path, PathBuf};

use super::models::PortInfo;
use super::{PortError, Result};

/// Directory of stable device symlinks maintained by udev.
pub const SERIAL_BY_ID_DIR: &str = "/dev/serial/by-id";

/// Lists serial devices by scanning the by-id symlink directory.
///
/// Each entry resolves to its `/dev` target. An absent directory simply
/// means no devices are attached and yields an empty list.
pub fn list_ports() -> Vec<PortInfo> {
    list_ports_in(Path::new(SERIAL_BY_ID_DIR))
}

fn list_ports_in(dir: &Path) -> Vec<PortInfo> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::debug!("no serial devices: {} ({})", dir.display(), err);
            return Vec::new();
        }
    };

    let mut ports = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let target = match fs::read_link(entry.path()) {
            Ok(target) => target,
            Err(err) => {
                log::debug!("skipping {}: {}", name, err);
                continue;
            }
        };
        // Targets are relative, e.g. "../../ttyUSB0".
        let resolved = normalize(&dir.join(target));
        ports.push(PortInfo {
            name,
            path: resolved.to_string_lossy().into_owned(),
        });
    }

    ports.sort_by(|a, b| a.name.cmp(&b.name));
    ports
}

/// Resolves a device path that may contain shell-style wildcards (`*`,
/// `?`) in its final component.
///
/// Matching entries are ordered lexicographically and the first one wins,
/// so `/dev/ttyUSB*` deterministically selects `/dev/ttyUSB0` over
/// `/dev/ttyUSB1`. A pattern that matches nothing fails with
/// [`PortError::DeviceNotFound`].
pub fn resolve_port_path(pattern: &str) -> Result<String> {
    if !pattern.contains('*') && !pattern.contains('?') {
        return Ok(pattern.to_string());
    }

    let path = Path::new(pattern);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let file_pattern = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PortError::DeviceNotFound(pattern.to_string()))?;
    let dir = dir.ok_or_else(|| PortError::DeviceNotFound(pattern.to_string()))?;

    let entries =
        fs::read_dir(dir).map_err(|_| PortError::DeviceNotFound(pattern.to_string()))?;

    let mut matches: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            wildcard_match(&file_pattern, &name).then(|| name)
        })
        .collect();
    matches.sort();

    match matches.first() {
        Some(name) => Ok(dir.join(name).to_string_lossy().into_owned()),
        None => Err(PortError::DeviceNotFound(pattern.to_string())),
    }
}

/// Minimal glob matcher: `*` matches any run of characters, `?` matches
/// exactly one.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = name.chars().collect();

    // Iterative backtracking over the last-seen star.
    let (mut p, mut t) = (0usize, 0usize);
    let (mut star, mut star_t) = (None, 0usize);

    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(sp) = star {
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

/// Collapses `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("ttyUSB*", "ttyUSB0"));
        assert!(wildcard_match("ttyUSB*", "ttyUSB"));
        assert!(wildcard_match("tty*0", "ttyACM0"));
        assert!(wildcard_match("ttyUSB?", "ttyUSB1"));
        assert!(!wildcard_match("ttyUSB?", "ttyUSB10"));
        assert!(!wildcard_match("ttyUSB*", "ttyACM0"));
        assert!(wildcard_match("*", "anything"));
    }

    #[test]
    fn plain_paths_resolve_to_themselves() {
        let resolved = resolve_port_path("/dev/ttyUSB0").unwrap();
        assert_eq!(resolved, "/dev/ttyUSB0");
    }

    #[test]
    fn wildcard_selects_lexicographically_first_match() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("ttyUSB1")).unwrap();
        File::create(dir.path().join("ttyUSB0")).unwrap();
        File::create(dir.path().join("ttyACM0")).unwrap();

        let pattern = dir.path().join("ttyUSB*");
        let resolved = resolve_port_path(pattern.to_str().unwrap()).unwrap();
        assert_eq!(resolved, dir.path().join("ttyUSB0").to_string_lossy());
    }

    #[test]
    fn unmatched_wildcard_is_device_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("ttyUSB*");
        let err = resolve_port_path(pattern.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, PortError::DeviceNotFound(_)));
    }

    #[test]
    fn missing_by_id_directory_yields_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("serial").join("by-id");
        assert!(list_ports_in(&missing).is_empty());
    }

    #[test]
    fn by_id_links_resolve_to_dev_paths() {
        let root = tempfile::tempdir().unwrap();
        let dev = root.path().join("dev");
        let by_id = dev.join("serial").join("by-id");
        std::fs::create_dir_all(&by_id).unwrap();
        File::create(dev.join("ttyUSB0")).unwrap();

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(
                "../../ttyUSB0",
                by_id.join("usb-FTDI_FT232R-if00-port0"),
            )
            .unwrap();

            let ports = list_ports_in(&by_id);
            assert_eq!(ports.len(), 1);
            assert_eq!(ports[0].name, "usb-FTDI_FT232R-if00-port0");
            assert_eq!(
                ports[0].path,
                dev.join("ttyUSB0").to_string_lossy().into_owned()
            );
        }
    }
}
