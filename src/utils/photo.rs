use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

pub const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// Lowercased extension of `filename` when it is on the allowlist.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();

    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// MIME type from the leading bytes, for the image formats browsers sniff.
pub fn sniff_image_mime(data: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"\x89PNG\r\n\x1A\n", "image/png"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"BM", "image/bmp"),
        (b"\x00\x00\x01\x00", "image/x-icon"),
        (b"\x00\x00\x02\x00", "image/x-icon"),
    ];

    if data.len() >= 14 && &data[0..4] == b"RIFF" && &data[8..14] == b"WEBPVP" {
        return Some("image/webp");
    }

    SIGNATURES
        .iter()
        .find(|(magic, _)| data.starts_with(magic))
        .map(|(_, mime)| *mime)
}

/// Photos live flat in one directory; names are generated, never user supplied.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    dir: PathBuf,
}

impl PhotoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// `{unix_nanos}_{user_id}.{ext}`
    pub fn generate_name(user_id: u64, ext: &str) -> String {
        let nanos = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| Utc::now().timestamp_micros() * 1000);
        format!("{}_{}.{}", nanos, user_id, ext)
    }

    /// Writes `data` under a fresh name. Fails rather than overwrite an existing file.
    pub fn save(&self, user_id: u64, ext: &str, data: &[u8]) -> io::Result<String> {
        self.ensure_dir()?;

        let name = Self::generate_name(user_id, ext);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.dir.join(&name))?;
        file.write_all(data)?;
        file.sync_all()?;

        Ok(name)
    }

    /// Full path of a stored photo, or `None` when the name could escape the directory.
    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        let is_plain = !name.is_empty()
            && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
            && name != ".."
            && name != ".";
        is_plain.then(|| self.dir.join(name))
    }

    pub fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        match self.path_of(name) {
            Some(path) => fs::read(path),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "invalid photo name")),
        }
    }

    /// Best effort; a missing file is not an error.
    pub fn remove(&self, name: &str) {
        if let Some(path) = self.path_of(name) {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(error = %e, photo = %name, "Failed to remove photo file");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = b"\x89PNG\r\n\x1A\n\x00\x00\x00\rIHDR";

    #[test]
    fn extension_allowlist_is_case_insensitive() {
        assert_eq!(allowed_extension("cat.JPG").as_deref(), Some("jpg"));
        assert_eq!(allowed_extension("a.b.webp").as_deref(), Some("webp"));
        assert_eq!(allowed_extension("evil.php"), None);
        assert_eq!(allowed_extension("photo.svg"), None);
        assert_eq!(allowed_extension("noext"), None);
    }

    #[test]
    fn sniffs_common_image_formats() {
        assert_eq!(sniff_image_mime(b"\xFF\xD8\xFF\xE0\x00\x10JFIF"), Some("image/jpeg"));
        assert_eq!(sniff_image_mime(PNG), Some("image/png"));
        assert_eq!(sniff_image_mime(b"GIF89a\x01\x00"), Some("image/gif"));
        assert_eq!(sniff_image_mime(b"RIFF\x24\x00\x00\x00WEBPVP8 "), Some("image/webp"));
    }

    #[test]
    fn non_images_are_not_sniffed_as_images() {
        assert_eq!(sniff_image_mime(b"<?php echo 1; ?>"), None);
        assert_eq!(sniff_image_mime(b"<svg xmlns=\"http://www.w3.org/2000/svg\">"), None);
        assert_eq!(sniff_image_mime(b"RIFF\x24\x00\x00\x00WAVEfmt "), None);
        assert_eq!(sniff_image_mime(b""), None);
    }

    #[test]
    fn saved_photo_reads_back_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhotoStore::new(dir.path().join("uploads"));

        let name = store.save(7, "png", PNG).unwrap();

        assert!(name.ends_with("_7.png"));
        assert_eq!(store.read(&name).unwrap(), PNG);
    }

    #[test]
    fn consecutive_saves_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhotoStore::new(dir.path());

        let a = store.save(1, "jpg", b"a").unwrap();
        let b = store.save(1, "jpg", b"b").unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn remove_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhotoStore::new(dir.path());
        let name = store.save(2, "gif", b"GIF89a").unwrap();

        store.remove(&name);
        assert!(store.read(&name).is_err());

        // Already gone, and a name that is not a plain file name.
        store.remove(&name);
        store.remove("../outside.jpg");
    }

    #[test]
    fn names_with_separators_are_rejected() {
        let store = PhotoStore::new("/srv/uploads");

        assert!(store.path_of("../etc/passwd").is_none());
        assert!(store.path_of("a/b.jpg").is_none());
        assert!(store.path_of("").is_none());
        assert!(store.path_of("..").is_none());
        assert_eq!(
            store.path_of("1_1.jpg"),
            Some(PathBuf::from("/srv/uploads/1_1.jpg"))
        );
    }
}
