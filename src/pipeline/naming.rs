use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::Result;

/// Render a frame rate for a directory name: `15.0` -> `15`, `14.5` -> `14.5`
pub fn fps_label(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{}", fps as u64)
    } else {
        format!("{}", fps)
    }
}

/// `{root}/{fps}fps/{action}/{prefix}_{action}_{id}.{ext}`
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    target_fps: f64,
    extension: String,
}

impl OutputLayout {
    pub fn new<P: Into<PathBuf>>(root: P, target_fps: f64, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            target_fps,
            extension: extension.into(),
        }
    }

    pub fn action_dir(&self, action: &str) -> PathBuf {
        self.root.join(format!("{}fps", fps_label(self.target_fps))).join(action)
    }

    /// File for clip `id`; an empty or missing prefix is left out of the name
    pub fn clip_path(&self, action: &str, prefix: Option<&str>, id: u64) -> PathBuf {
        let stem = match prefix.filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{}_{}_{}", prefix, action, id),
            None => format!("{}_{}", action, id),
        };
        self.action_dir(action).join(format!("{}.{}", stem, self.extension))
    }
}

/// Hands out clip ids from one in-process authority.
///
/// Seeding from a folder starts one past the highest trailing `_N` already
/// present, so restarting a session does not reuse ids. Two processes
/// sharing a folder can still collide; the writer reports that as an
/// output conflict rather than overwriting.
#[derive(Debug)]
pub struct SequenceAllocator {
    next: AtomicU64,
}

impl SequenceAllocator {
    pub fn starting_at(first: u64) -> Self {
        Self { next: AtomicU64::new(first) }
    }

    pub fn seeded_from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Ok(Self::starting_at(0));
        }

        let mut highest: Option<u64> = None;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(id) = trailing_id(&path) {
                highest = Some(highest.map_or(id, |h| h.max(id)));
            }
        }

        let first = highest.map_or(0, |h| h + 1);
        debug!("Clip ids in {} start at {}", dir.display(), first);
        Ok(Self::starting_at(first))
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

fn trailing_id(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let (_, digits) = stem.rsplit_once('_')?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fps_label() {
        assert_eq!(fps_label(15.0), "15");
        assert_eq!(fps_label(14.5), "14.5");
    }

    #[test]
    fn test_clip_path_layout() {
        let layout = OutputLayout::new("out", 15.0, "mp4");
        assert_eq!(
            layout.clip_path("fall", Some("alice"), 3),
            PathBuf::from("out/15fps/fall/alice_fall_3.mp4")
        );
        assert_eq!(layout.clip_path("sit", None, 0), PathBuf::from("out/15fps/sit/sit_0.mp4"));
        assert_eq!(layout.clip_path("sit", Some(""), 1), PathBuf::from("out/15fps/sit/sit_1.mp4"));
    }

    #[test]
    fn test_allocator_seeds_past_existing_ids() {
        let dir = tempdir().unwrap();
        for name in ["bob_fall_0.mp4", "bob_fall_7.mp4", "fall_2.mp4", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let ids = SequenceAllocator::seeded_from_dir(dir.path()).unwrap();
        assert_eq!(ids.next_id(), 8);
        assert_eq!(ids.next_id(), 9);
    }

    #[test]
    fn test_allocator_for_missing_dir_starts_at_zero() {
        let dir = tempdir().unwrap();
        let ids = SequenceAllocator::seeded_from_dir(dir.path().join("missing")).unwrap();
        assert_eq!(ids.next_id(), 0);
    }

    #[test]
    fn test_allocator_is_unique_across_threads() {
        let ids = std::sync::Arc::new(SequenceAllocator::starting_at(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = std::sync::Arc::clone(&ids);
                std::thread::spawn(move || (0..100).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
    }
}
