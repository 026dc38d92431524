use std::fs;
use std::path::Path;

use log::{debug, warn};
use snafu::prelude::*;
use text_diff::print_diff;

use crate::prep::*;

/// `<stem>_<period>.<ext>`, or `<stem>.<ext>` for the files shared by all
/// periods.
pub fn artifact_name(stem: &str, period: Option<&str>, ext: &str) -> String {
    match period {
        Some(p) => format!("{}_{}.{}", stem, p, ext),
        None => format!("{}.{}", stem, ext),
    }
}

/// Compares each written file with the file of the same name in the
/// reference directory and prints a line diff for each mismatch.
///
/// Returns the number of files that differ or are missing from the
/// reference.
pub fn compare_with_reference(
    out_dir: &Path,
    reference_dir: &Path,
    written: &[String],
) -> BPrepResult<usize> {
    let mut differing = 0;
    for name in written.iter() {
        let produced_path = out_dir.join(name);
        let produced = fs::read_to_string(&produced_path).context(OpeningFileSnafu {
            path: produced_path.display().to_string(),
        })?;
        let reference_path = reference_dir.join(name);
        let reference = match fs::read_to_string(&reference_path) {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    "compare_with_reference: cannot read {}: {}",
                    reference_path.display(),
                    e
                );
                differing += 1;
                continue;
            }
        };
        if reference == produced {
            debug!("compare_with_reference: {} matches", name);
        } else {
            warn!("Found differences with the reference file {}", name);
            print_diff(reference.as_str(), produced.as_str(), "\n");
            differing += 1;
        }
    }
    Ok(differing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(
            artifact_name("votes_matrix", Some("P2a"), "csv"),
            "votes_matrix_P2a.csv"
        );
        assert_eq!(artifact_name("vote_metadata", None, "csv"), "vote_metadata.csv");
    }

    #[test]
    fn counts_differences() {
        let out = tempfile::tempdir().unwrap();
        let reference = tempfile::tempdir().unwrap();
        fs::write(out.path().join("a.csv"), "x\n1\n").unwrap();
        fs::write(out.path().join("b.csv"), "x\n2\n").unwrap();
        fs::write(out.path().join("c.csv"), "x\n3\n").unwrap();
        fs::write(reference.path().join("a.csv"), "x\n1\n").unwrap();
        fs::write(reference.path().join("b.csv"), "x\n4\n").unwrap();
        let written: Vec<String> = vec!["a.csv".to_string(), "b.csv".to_string()];
        assert_eq!(
            compare_with_reference(out.path(), reference.path(), &written).unwrap(),
            1
        );
        let written: Vec<String> = vec!["a.csv".to_string(), "c.csv".to_string()];
        assert_eq!(
            compare_with_reference(out.path(), reference.path(), &written).unwrap(),
            1
        );
        // A file that was never written is an error.
        let written: Vec<String> = vec!["d.csv".to_string()];
        assert!(compare_with_reference(out.path(), reference.path(), &written).is_err());
    }
}
