//! Output path derivation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::{CollisionPolicy, Settings};
use crate::orchestrator::{JobError, JobResult};

/// Highest `_<n>` tried by the rename policy.
const MAX_RENAME_ATTEMPTS: u32 = 9_999;

/// Derive the output path for `source`.
///
/// The base name is `<stem><suffix>.<ext>` in the source directory, or in
/// `paths.output_folder` when set. `taken` holds every queued source path
/// plus outputs already reserved by other jobs; those are never returned.
pub fn output_path_for(
    source: &Path,
    settings: &Settings,
    taken: &HashSet<PathBuf>,
) -> JobResult<PathBuf> {
    let dir = match settings.paths.output_folder.trim() {
        "" => source.parent().map(Path::to_path_buf).unwrap_or_default(),
        folder => PathBuf::from(folder),
    };
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = source.extension().map(|e| e.to_string_lossy().into_owned());
    let suffix = &settings.processing.output_suffix;

    let candidate = |counter: Option<u32>| {
        let mut name = format!("{}{}", stem, suffix);
        if let Some(n) = counter {
            name.push_str(&format!("_{}", n));
        }
        if let Some(ref ext) = ext {
            name.push('.');
            name.push_str(ext);
        }
        dir.join(name)
    };

    let base = candidate(None);
    match settings.processing.collision {
        CollisionPolicy::Overwrite => {
            if taken.contains(&base) {
                return Err(JobError::source_collision(source, base));
            }
            Ok(base)
        }
        CollisionPolicy::Fail => {
            if taken.contains(&base) {
                return Err(JobError::source_collision(source, base));
            }
            if base.exists() {
                return Err(JobError::output_exists(base));
            }
            Ok(base)
        }
        CollisionPolicy::Rename => {
            if !taken.contains(&base) && !base.exists() {
                return Ok(base);
            }
            for n in 1..=MAX_RENAME_ATTEMPTS {
                let path = candidate(Some(n));
                if !taken.contains(&path) && !path.exists() {
                    return Ok(path);
                }
            }
            Err(JobError::output_exists(base))
        }
    }
}
