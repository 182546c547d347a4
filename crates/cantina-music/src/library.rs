use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use cantina_core::{CantinaError, Result, Track};

const MUSIC_EXTENSIONS: [&str; 3] = ["mp3", "wav", "m4a"];

/// Reads a track's duration without playing it.
pub trait DurationProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Option<f32>;
}

/// Name-addressed track collection built from a filesystem scan.
///
/// Insertion order is the sorted filename order of the scan, which gives
/// 1-based CLI indices a stable meaning across restarts.
pub struct MusicLibrary {
    directory: PathBuf,
    tracks: Vec<Track>,
}

fn has_music_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MUSIC_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn track_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

impl MusicLibrary {
    /// Scan `directory` (or the first fallback that has music) and build
    /// the library.
    pub fn scan(
        directory: &Path,
        fallback_dirs: &[PathBuf],
        probe: &dyn DurationProbe,
    ) -> Result<Self> {
        let mut chosen = directory.to_path_buf();
        let mut tracks = Self::scan_dir(&chosen, probe);

        if tracks.is_empty() {
            for fallback in fallback_dirs {
                debug!(dir = %fallback.display(), "primary library empty, trying fallback");
                let found = Self::scan_dir(fallback, probe);
                if !found.is_empty() {
                    chosen = fallback.clone();
                    tracks = found;
                    break;
                }
            }
        }

        if tracks.is_empty() {
            warn!(dir = %directory.display(), "no music files found in any library path");
        } else {
            info!(count = tracks.len(), dir = %chosen.display(), "music library loaded");
        }

        Ok(Self {
            directory: chosen,
            tracks,
        })
    }

    fn scan_dir(directory: &Path, probe: &dyn DurationProbe) -> Vec<Track> {
        let Ok(entries) = std::fs::read_dir(directory) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_music_extension(path))
            .collect();
        paths.sort();

        paths
            .into_iter()
            .map(|path| Track {
                name: track_name(&path),
                duration_seconds: probe.probe(&path).unwrap_or(0.0),
                path,
            })
            .collect()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Resolve a user query: a 1-based index into the library order, an
    /// exact name (case-insensitive), or a substring match.
    pub fn resolve(&self, query: &str) -> Option<&Track> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        if let Ok(index) = query.parse::<usize>() {
            return index.checked_sub(1).and_then(|i| self.tracks.get(i));
        }

        let lower = query.to_lowercase();
        self.tracks
            .iter()
            .find(|t| t.name.to_lowercase() == lower)
            .or_else(|| {
                self.tracks
                    .iter()
                    .find(|t| t.name.to_lowercase().contains(&lower))
            })
    }

    /// Pick a random track, avoiding `exclude` when the library has more
    /// than one entry. Used by DJ mode transitions.
    pub fn random_track(&self, exclude: Option<&str>) -> Option<&Track> {
        use rand::seq::SliceRandom;
        let candidates: Vec<&Track> = match exclude {
            Some(name) if self.tracks.len() > 1 => {
                self.tracks.iter().filter(|t| t.name != name).collect()
            }
            _ => self.tracks.iter().collect(),
        };
        candidates.choose(&mut rand::thread_rng()).copied()
    }

    /// Copy unknown music files from `source_dir` into the library
    /// directory. Returns how many files were installed.
    pub fn install_from(&self, source_dir: &Path) -> Result<usize> {
        let entries = std::fs::read_dir(source_dir).map_err(|e| {
            CantinaError::ResourceUnavailable(format!(
                "cannot read install source {}: {e}",
                source_dir.display()
            ))
        })?;

        std::fs::create_dir_all(&self.directory)?;
        let mut installed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || !has_music_extension(&path) {
                continue;
            }
            let Some(file_name) = path.file_name() else {
                continue;
            };
            let destination = self.directory.join(file_name);
            if destination.exists() {
                continue;
            }
            std::fs::copy(&path, &destination)?;
            installed += 1;
        }
        info!(installed, source = %source_dir.display(), "installed music files");
        Ok(installed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(f32);

    impl DurationProbe for FixedProbe {
        fn probe(&self, _path: &Path) -> Option<f32> {
            Some(self.0)
        }
    }

    fn make_dir(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), b"data").unwrap();
        }
        dir
    }

    #[test]
    fn scan_filters_by_extension_and_sorts() {
        let dir = make_dir(&["b_song.mp3", "a_song.wav", "notes.txt", "c_song.m4a"]);
        let lib = MusicLibrary::scan(dir.path(), &[], &FixedProbe(120.0)).unwrap();
        let names: Vec<&str> = lib.tracks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a_song", "b_song", "c_song"]);
        assert!((lib.tracks()[0].duration_seconds - 120.0).abs() < f32::EPSILON);
    }

    #[test]
    fn fallback_dirs_are_used_when_primary_is_empty() {
        let empty = tempfile::tempdir().unwrap();
        let fallback = make_dir(&["cantina_band.mp3"]);
        let lib = MusicLibrary::scan(
            empty.path(),
            &[fallback.path().to_path_buf()],
            &FixedProbe(60.0),
        )
        .unwrap();
        assert_eq!(lib.len(), 1);
        assert_eq!(lib.directory(), fallback.path());
    }

    #[test]
    fn resolve_by_one_based_index() {
        let dir = make_dir(&["alpha.mp3", "beta.mp3"]);
        let lib = MusicLibrary::scan(dir.path(), &[], &FixedProbe(1.0)).unwrap();
        assert_eq!(lib.resolve("1").unwrap().name, "alpha");
        assert_eq!(lib.resolve("2").unwrap().name, "beta");
        assert!(lib.resolve("0").is_none());
        assert!(lib.resolve("3").is_none());
    }

    #[test]
    fn resolve_by_name_prefers_exact_then_substring() {
        let dir = make_dir(&["Cantina Band.mp3", "Cantina Band Remix.mp3"]);
        let lib = MusicLibrary::scan(dir.path(), &[], &FixedProbe(1.0)).unwrap();
        assert_eq!(lib.resolve("cantina band").unwrap().name, "Cantina Band");
        assert_eq!(lib.resolve("remix").unwrap().name, "Cantina Band Remix");
        assert!(lib.resolve("jizz wail").is_none());
    }

    #[test]
    fn install_copies_only_unknown_music_files() {
        let library_dir = make_dir(&["existing.mp3"]);
        let source = make_dir(&["existing.mp3", "fresh.wav", "readme.md"]);
        let lib = MusicLibrary::scan(library_dir.path(), &[], &FixedProbe(1.0)).unwrap();

        let installed = lib.install_from(source.path()).unwrap();
        assert_eq!(installed, 1);
        assert!(library_dir.path().join("fresh.wav").exists());

        let rescanned = MusicLibrary::scan(library_dir.path(), &[], &FixedProbe(1.0)).unwrap();
        assert_eq!(rescanned.len(), 2);
    }

    #[test]
    fn random_track_avoids_current_when_possible() {
        let dir = make_dir(&["one.mp3", "two.mp3"]);
        let lib = MusicLibrary::scan(dir.path(), &[], &FixedProbe(1.0)).unwrap();
        for _ in 0..10 {
            assert_eq!(lib.random_track(Some("one")).unwrap().name, "two");
        }
    }
}
