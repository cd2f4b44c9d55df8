//! Find the raw files of a configured variable and group them into units of work.
use std::{
    collections::BTreeMap,
    fmt::Display,
    path::{Path, PathBuf},
};

use error_stack::ResultExt;
use itertools::Itertools;

use crate::config::{FilePatterns, VariableSpec};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Input path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("Invalid file pattern '{0}'")]
    BadPattern(String),
    #[error("Error globbing for input files matching '{0}'")]
    Glob(String),
}

/// The files that together produce one output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    /// The file path for single-file groups, the shared year token otherwise.
    pub key: String,
    /// One path per raw variable, in the order the variable lists its raw names.
    pub paths: Vec<PathBuf>,
}

impl Display for FileGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.paths.len() == 1 {
            write!(f, "{}", self.paths[0].display())
        } else {
            write!(f, "{} [{}]", self.key, self.paths.iter().map(|p| p.display()).join(", "))
        }
    }
}

/// Resolve the file groups for one variable.
///
/// With a single pattern, every match is its own group, in sorted order. With
/// several patterns, matches are grouped by the last underscore-separated token
/// of their file stem and returned sorted by that token. Only groups with
/// exactly one file per pattern are kept; groups missing a file or matching
/// one pattern more than once are logged and skipped. Finding no files at all
/// is not an error.
pub fn resolve_file_groups(in_dir: &Path, spec: &VariableSpec) -> error_stack::Result<Vec<FileGroup>, ResolveError> {
    if !in_dir.is_dir() {
        return Err(ResolveError::NotADirectory(in_dir.to_path_buf()).into());
    }

    let groups = match &spec.files {
        FilePatterns::Single(pattern) => glob_sorted(in_dir, pattern)?
            .into_iter()
            .map(|p| FileGroup {
                key: p.display().to_string(),
                paths: vec![p],
            })
            .collect_vec(),
        FilePatterns::Multiple(patterns) => group_by_year(in_dir, &spec.short_name, patterns)?,
    };

    if groups.is_empty() {
        log::info!(
            "No input files found for variable '{}' (patterns: {})",
            spec.name,
            spec.files.patterns().join(", ")
        );
    }
    Ok(groups)
}

fn glob_sorted(in_dir: &Path, pattern: &str) -> error_stack::Result<Vec<PathBuf>, ResolveError> {
    let full_pattern = format!(
        "{}/{pattern}",
        glob::Pattern::escape(&in_dir.to_string_lossy())
    );
    let matches = glob::glob(&full_pattern).change_context_lazy(|| ResolveError::BadPattern(pattern.to_string()))?;

    let mut files = vec![];
    for entry in matches {
        let entry = entry.change_context_lazy(|| ResolveError::Glob(pattern.to_string()))?;
        files.push(entry);
    }
    files.sort();
    Ok(files)
}

fn year_token(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy();
    stem.rsplit('_').next().map(|s| s.to_string())
}

fn group_by_year(
    in_dir: &Path,
    short_name: &str,
    patterns: &[String],
) -> error_stack::Result<Vec<FileGroup>, ResolveError> {
    // BTreeMap gives the groups in key order
    let mut by_year: BTreeMap<String, Vec<Vec<PathBuf>>> = BTreeMap::new();
    for (i, pattern) in patterns.iter().enumerate() {
        for path in glob_sorted(in_dir, pattern)? {
            let Some(year) = year_token(&path) else {
                continue;
            };
            by_year
                .entry(year)
                .or_insert_with(|| vec![vec![]; patterns.len()])[i]
                .push(path);
        }
    }

    let mut groups = vec![];
    for (year, slots) in by_year {
        let found = slots.iter().filter(|s| !s.is_empty()).count();
        if found != patterns.len() {
            log::info!(
                "CMORizing {short_name} at time '{year}' needs {} input files, only found {found}, skipping",
                patterns.len()
            );
            continue;
        }
        if let Some((i, extra)) = slots.iter().enumerate().find(|(_, s)| s.len() > 1) {
            log::info!(
                "CMORizing {short_name} at time '{year}' needs one file matching '{}', found {} ({}), skipping",
                patterns[i],
                extra.len(),
                extra.iter().map(|p| p.display()).join(", ")
            );
            continue;
        }
        groups.push(FileGroup {
            key: year,
            paths: slots.into_iter().flatten().collect(),
        });
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CombineOperator, RawSource};

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), b"").unwrap();
        }
    }

    fn sum_spec(patterns: &[&str]) -> VariableSpec {
        VariableSpec {
            name: "hfds".to_string(),
            short_name: "hfds".to_string(),
            mip: "Omon".to_string(),
            raw: RawSource::Multiple(vec!["ssr".to_string(), "str".to_string()]),
            files: FilePatterns::Multiple(patterns.iter().map(|p| p.to_string()).collect()),
            operator: Some(CombineOperator::Sum),
            select: None,
            climatology: None,
        }
    }

    #[test]
    fn test_single_pattern() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &["ERA-Interim_t2m_monthly_2001.nc", "ERA-Interim_t2m_monthly_2000.nc", "other.nc"],
        );
        let spec = VariableSpec {
            name: "tas".to_string(),
            short_name: "tas".to_string(),
            mip: "Amon".to_string(),
            raw: RawSource::Single("t2m".to_string()),
            files: FilePatterns::Single("ERA-Interim_t2m_monthly_*.nc".to_string()),
            operator: None,
            select: None,
            climatology: None,
        };
        let groups = resolve_file_groups(dir.path(), &spec).unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].paths[0].ends_with("ERA-Interim_t2m_monthly_2000.nc"));
        assert!(groups[1].paths[0].ends_with("ERA-Interim_t2m_monthly_2001.nc"));
        assert_eq!(groups[0].key, groups[0].paths[0].display().to_string());
    }

    #[test]
    fn test_incomplete_groups_dropped() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &[
                "ERA-Interim_ssr_monthly_2000.nc",
                "ERA-Interim_str_monthly_2000.nc",
                "ERA-Interim_ssr_monthly_2001.nc",
            ],
        );
        let spec = sum_spec(&["ERA-Interim_ssr_monthly_*.nc", "ERA-Interim_str_monthly_*.nc"]);
        let groups = resolve_file_groups(dir.path(), &spec).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "2000");
        assert!(groups[0].paths[0].ends_with("ERA-Interim_ssr_monthly_2000.nc"));
        assert!(groups[0].paths[1].ends_with("ERA-Interim_str_monthly_2000.nc"));
    }

    #[test]
    fn test_ambiguous_groups_dropped() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &[
                "ERA-Interim_ssr_monthly_2000.nc",
                "ERA-Interim_ssr_daily_2000.nc",
                "ERA-Interim_str_monthly_2000.nc",
                "ERA-Interim_ssr_monthly_2001.nc",
                "ERA-Interim_str_monthly_2001.nc",
            ],
        );
        // the loose ssr pattern matches both cadences for 2000
        let spec = sum_spec(&["ERA-Interim_ssr_*_*.nc", "ERA-Interim_str_*_*.nc"]);
        let groups = resolve_file_groups(dir.path(), &spec).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "2001");
        assert!(groups[0].paths[0].ends_with("ERA-Interim_ssr_monthly_2001.nc"));
        assert!(groups[0].paths[1].ends_with("ERA-Interim_str_monthly_2001.nc"));
    }

    #[test]
    fn test_groups_follow_pattern_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &[
                "ERA-Interim_ssr_monthly_2001.nc",
                "ERA-Interim_str_monthly_2001.nc",
                "ERA-Interim_ssr_monthly_1999.nc",
                "ERA-Interim_str_monthly_1999.nc",
            ],
        );
        // patterns listed str first, so str files must come first in each group
        let spec = sum_spec(&["ERA-Interim_str_monthly_*.nc", "ERA-Interim_ssr_monthly_*.nc"]);
        let groups = resolve_file_groups(dir.path(), &spec).unwrap();
        assert_eq!(groups.iter().map(|g| g.key.as_str()).collect_vec(), ["1999", "2001"]);
        for g in groups.iter() {
            assert_eq!(g.paths.len(), 2);
            assert!(g.paths[0].to_string_lossy().contains("_str_"));
        }
    }

    #[test]
    fn test_no_matches_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let spec = sum_spec(&["ERA-Interim_ssr_monthly_*.nc", "ERA-Interim_str_monthly_*.nc"]);
        assert!(resolve_file_groups(dir.path(), &spec).unwrap().is_empty());

        let bad = sum_spec(&["ERA-Interim_[ssr_monthly_*.nc", "ERA-Interim_str_monthly_*.nc"]);
        let err = resolve_file_groups(dir.path(), &bad).unwrap_err();
        assert!(matches!(err.current_context(), ResolveError::BadPattern(_)));

        let err = resolve_file_groups(&dir.path().join("missing"), &spec).unwrap_err();
        assert!(matches!(err.current_context(), ResolveError::NotADirectory(_)));
    }
}
