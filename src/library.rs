//! Persistent stem library: one canonical directory per song identifier,
//! holding `meta.json` plus the normalized stem files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// Errors that can occur on library operations.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("song not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid metadata: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Metadata document stored as `meta.json` inside a song's directory.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SongMeta {
    pub id: String,
    pub title: String,
    pub safe_title: String,
    pub source_url: String,
}

/// A catalogued song with its stem file names.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SongEntry {
    pub id: String,
    pub title: String,
    pub stems: Vec<String>,
}

const ILLEGAL_TITLE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Raw separator channel name fragment -> canonical stem label, matched
/// first-hit-wins in this order.
const STEM_LABELS: [(&str, &str); 6] = [
    ("vocals", "Vocals"),
    ("drums", "Drums"),
    ("bass", "Bass"),
    ("other", "Other"),
    ("guitar", "Guitar"),
    ("piano", "Piano"),
];

/// Strip filesystem-hostile characters and collapse whitespace.
pub fn safe_title(title: &str) -> String {
    let stripped: String = title
        .chars()
        .filter(|c| !ILLEGAL_TITLE_CHARS.contains(c))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The persistent catalog rooted at `<separated_dir>/<model>/`.
#[derive(Clone, Debug)]
pub struct Library {
    separated_dir: PathBuf,
    model: String,
}

impl Library {
    pub fn new(separated_dir: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            separated_dir: separated_dir.into(),
            model: model.into(),
        }
    }

    pub fn separated_dir(&self) -> &Path {
        &self.separated_dir
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Root directory holding one subdirectory per catalogued song.
    pub fn root(&self) -> PathBuf {
        self.separated_dir.join(&self.model)
    }

    /// Canonical directory for a song identifier.
    pub fn song_dir(&self, id: &str) -> PathBuf {
        self.root().join(id)
    }

    /// Derived archive path, sibling to the song directory.
    pub fn zip_path(&self, id: &str) -> PathBuf {
        self.root().join(format!("{}.zip", id))
    }

    /// Write the song's `meta.json`, creating the canonical directory.
    /// Overwrites any previous metadata for the same identifier.
    pub fn write_meta(&self, id: &str, title: &str, source_url: &str) -> Result<(), LibraryError> {
        let meta = SongMeta {
            id: id.to_string(),
            title: title.to_string(),
            safe_title: safe_title(title),
            source_url: source_url.to_string(),
        };
        let dir = self.song_dir(id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("meta.json"), serde_json::to_string_pretty(&meta)?)?;
        Ok(())
    }

    /// Read a song directory's `meta.json`. An absent file surfaces as `Io`,
    /// a corrupt one as `Parse`; callers decide whether to fall back.
    pub fn read_meta(&self, dir: &Path) -> Result<SongMeta, LibraryError> {
        let raw = fs::read_to_string(dir.join("meta.json"))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Rename raw separator output files to canonical `<Label>.wav` names.
    ///
    /// Matching is a lower-cased substring search over `STEM_LABELS` in
    /// declared order, first match wins. Files matching no label are left
    /// untouched. If the canonical target already exists the source is left
    /// as-is, which makes a re-run a no-op rather than an overwrite.
    pub fn normalize_stems(&self, dir: &Path) -> Result<(), LibraryError> {
        for name in wav_files(dir)? {
            let stem = name.trim_end_matches(".wav").to_lowercase();
            let label = STEM_LABELS
                .iter()
                .find(|(key, _)| stem.contains(key))
                .map(|(_, label)| *label);
            let label = match label {
                Some(label) => label,
                None => continue,
            };

            let target_name = format!("{}.wav", label);
            if name == target_name {
                continue;
            }
            let target = dir.join(&target_name);
            if target.exists() {
                debug!("Stem {:?} already present, leaving {} alone", target, name);
                continue;
            }
            fs::rename(dir.join(&name), target)?;
        }
        Ok(())
    }

    /// All catalogued songs in lexicographic directory order. Unreadable or
    /// corrupt metadata falls back to the directory name as title.
    pub fn list(&self) -> Vec<SongEntry> {
        let root = self.root();
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        dirs.iter().map(|dir| self.entry_for(dir)).collect()
    }

    /// Look up a single song by identifier.
    pub fn get(&self, id: &str) -> Result<SongEntry, LibraryError> {
        let dir = self.song_dir(id);
        if !dir.is_dir() {
            return Err(LibraryError::NotFound(id.to_string()));
        }
        Ok(self.entry_for(&dir))
    }

    fn entry_for(&self, dir: &Path) -> SongEntry {
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let title = self
            .read_meta(dir)
            .map(|meta| meta.title)
            .unwrap_or_else(|_| id.clone());
        let stems = wav_files(dir).unwrap_or_default();
        SongEntry { id, title, stems }
    }

    /// (Re)build the song's zip archive containing every current stem plus
    /// `meta.json` if present. A previous archive is overwritten.
    pub fn archive(&self, id: &str) -> Result<PathBuf, LibraryError> {
        let dir = self.song_dir(id);
        if !dir.is_dir() {
            return Err(LibraryError::NotFound(id.to_string()));
        }

        let zip_path = self.zip_path(id);
        let file = fs::File::create(&zip_path)?;
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for name in wav_files(&dir)? {
            writer.start_file(name.as_str(), options)?;
            let mut src = fs::File::open(dir.join(&name))?;
            io::copy(&mut src, &mut writer)?;
        }
        let meta_path = dir.join("meta.json");
        if meta_path.is_file() {
            writer.start_file("meta.json", options)?;
            let mut src = fs::File::open(&meta_path)?;
            io::copy(&mut src, &mut writer)?;
        }
        writer.finish()?;

        debug!("Wrote archive {:?}", zip_path);
        Ok(zip_path)
    }

    /// Resolve a file inside a song's canonical directory for serving.
    ///
    /// Every failure mode collapses to `NotFound`: missing song, missing
    /// file, and any `name` that resolves outside the song directory.
    pub fn resolve_file(&self, id: &str, name: &str) -> Result<PathBuf, LibraryError> {
        let dir = self
            .song_dir(id)
            .canonicalize()
            .map_err(|_| LibraryError::NotFound(id.to_string()))?;
        let path = dir
            .join(name)
            .canonicalize()
            .map_err(|_| LibraryError::NotFound(id.to_string()))?;
        if path == dir || !path.starts_with(&dir) || !path.is_file() {
            return Err(LibraryError::NotFound(id.to_string()));
        }
        Ok(path)
    }
}

/// Sorted `.wav` file names directly inside `dir`.
fn wav_files(dir: &Path) -> Result<Vec<String>, LibraryError> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".wav"))
        .collect();
    names.sort();
    Ok(names)
}
