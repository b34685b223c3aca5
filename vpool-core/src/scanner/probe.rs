//! ISO-9660 media detection.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Offset of the primary volume descriptor (system area is 16 sectors).
const DESCRIPTOR_OFFSET: u64 = 16 * 2048;
/// Standard identifier, right after the descriptor type byte.
const MAGIC: &[u8; 5] = b"CD001";
const VOLUME_ID_OFFSET: usize = 40;
const VOLUME_ID_LEN: usize = 32;
const DESCRIPTOR_PREFIX: usize = VOLUME_ID_OFFSET + VOLUME_ID_LEN;

/// An installable image found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoImage {
    /// Volume label, trimmed; empty when unset
    pub volume_id: String,
}

/// Whether `path` has the extension of an image worth probing.
pub fn has_iso_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("iso"))
        .unwrap_or(false)
}

/// Read the primary volume descriptor of `path`.
///
/// Returns `Ok(None)` for files too short to hold one or without the
/// ISO-9660 magic.
pub fn probe_iso(path: &Path) -> io::Result<Option<IsoImage>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < DESCRIPTOR_OFFSET + DESCRIPTOR_PREFIX as u64 {
        return Ok(None);
    }

    let mut descriptor = [0u8; DESCRIPTOR_PREFIX];
    file.seek(SeekFrom::Start(DESCRIPTOR_OFFSET))?;
    file.read_exact(&mut descriptor)?;

    if &descriptor[1..6] != MAGIC {
        return Ok(None);
    }

    let volume_id = String::from_utf8_lossy(&descriptor[VOLUME_ID_OFFSET..DESCRIPTOR_PREFIX])
        .trim_end_matches(|c: char| c == ' ' || c == '\0')
        .to_string();
    Ok(Some(IsoImage { volume_id }))
}

/// Write a minimal image carrying a primary volume descriptor.
#[cfg(test)]
pub(crate) fn write_test_iso(path: &Path, volume_id: &str) -> io::Result<()> {
    let mut data = vec![0u8; DESCRIPTOR_OFFSET as usize + 2048];
    let pvd = DESCRIPTOR_OFFSET as usize;
    data[pvd] = 1;
    data[pvd + 1..pvd + 6].copy_from_slice(MAGIC);
    data[pvd + 6] = 1;
    let label = format!("{:<32}", volume_id);
    data[pvd + VOLUME_ID_OFFSET..pvd + DESCRIPTOR_PREFIX]
        .copy_from_slice(&label.as_bytes()[..VOLUME_ID_LEN]);
    std::fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extension_check() {
        assert!(has_iso_extension(Path::new("/srv/fedora.iso")));
        assert!(has_iso_extension(Path::new("/srv/DEBIAN.ISO")));
        assert!(!has_iso_extension(Path::new("/srv/disk.img")));
        assert!(!has_iso_extension(Path::new("/srv/iso")));
    }

    #[test]
    fn test_probe_reads_volume_label() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fedora.iso");
        write_test_iso(&path, "Fedora-Live").unwrap();

        let image = probe_iso(&path).unwrap().unwrap();
        assert_eq!(image.volume_id, "Fedora-Live");
    }

    #[test]
    fn test_probe_rejects_non_images() {
        let temp = TempDir::new().unwrap();

        let short = temp.path().join("short.iso");
        std::fs::write(&short, b"CD001").unwrap();
        assert_eq!(probe_iso(&short).unwrap(), None);

        let zeros = temp.path().join("zeros.iso");
        std::fs::write(&zeros, vec![0u8; 40 * 1024]).unwrap();
        assert_eq!(probe_iso(&zeros).unwrap(), None);
    }
}
