//! ui::reporter
//!
//! Pure rendering of run summaries and plugin documentation.
//!
//! # Design
//!
//! Functions here take immutable inputs and write formatted lines; they
//! never decide verbosity or touch global streams. Passing results go to
//! `out`, failures and their errors go to `err`.
//!
//! # Example Output
//!
//! Concise, with a failure:
//!
//! ```text
//! 1 check failed:
//!   checks.verify — Expected file "LICENSE" to exist, but it was not found at /repo/LICENSE.
//! ```
//!
//! Verbose:
//!
//! ```text
//! [PASS] checks.verify — File "README.md" exists. (2ms)
//! [FAIL] checks.verify — Command "cargo test" exited with 101. Expected 0. (1.52s)
//! verify-repo: 1/2 passed, 1 failed in 1.60s
//! ```

use std::io::{self, Write};
use std::path::Path;

use crate::core::types::{RunSummary, TestResult, TestStatus};
use crate::engine::PluginDocumentation;

/// `123ms` below one second, `1.23s` from there on.
///
/// ```
/// use verify_repo::ui::reporter::format_duration;
///
/// assert_eq!(format_duration(42.4), "42ms");
/// assert_eq!(format_duration(1520.0), "1.52s");
/// ```
pub fn format_duration(duration_ms: f64) -> String {
    if duration_ms < 1000.0 {
        format!("{:.0}ms", duration_ms)
    } else {
        format!("{:.2}s", duration_ms / 1000.0)
    }
}

/// `target` relative to `root`; the file name when they are equal, and
/// `target` itself when it lies outside `root`.
pub fn relative_path(root: &Path, target: &Path) -> String {
    match target.strip_prefix(root) {
        Ok(relative) if relative.as_os_str().is_empty() => target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        Ok(relative) => relative.display().to_string(),
        Err(_) => target.display().to_string(),
    }
}

/// Indent every line of `text` by `spaces`.
pub fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.split('\n')
        .map(|line| format!("{}{}", pad, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn headline(result: &TestResult, root: &Path) -> String {
    let text = result.message.as_deref().unwrap_or(&result.description);
    match &result.source {
        Some(source) => format!("{} — {}", relative_path(root, source), text),
        None => text.to_string(),
    }
}

/// Render `summary`.
///
/// `total_ms` is the wall-clock duration to report; the summary's own
/// duration is used when it is `None`.
pub fn write_report(
    summary: &RunSummary,
    root: &Path,
    verbose: bool,
    total_ms: Option<f64>,
    out: &mut impl Write,
    err: &mut impl Write,
) -> io::Result<()> {
    let duration = format_duration(total_ms.unwrap_or(summary.duration_ms));

    if summary.total == 0 {
        return writeln!(out, "verify-repo: no checks were scheduled.");
    }

    if verbose {
        for result in &summary.results {
            let line = format!(
                "{} {} ({})",
                if result.status == TestStatus::Passed { "[PASS]" } else { "[FAIL]" },
                headline(result, root),
                format_duration(result.duration_ms)
            );
            if result.is_passed() {
                writeln!(out, "{}", line)?;
            } else {
                writeln!(err, "{}", line)?;
                if let Some(error) = &result.error {
                    writeln!(err, "{}", indent(error, 2))?;
                }
            }
        }
        return writeln!(
            out,
            "verify-repo: {}/{} passed, {} failed in {}",
            summary.passed, summary.total, summary.failed, duration
        );
    }

    if summary.failed == 0 {
        return writeln!(out, "All checks passed in {}.", duration);
    }

    writeln!(
        err,
        "{} check{} failed:",
        summary.failed,
        if summary.failed == 1 { "" } else { "s" }
    )?;
    for result in summary.failures() {
        writeln!(err, "  {}", headline(result, root))?;
        if let Some(error) = &result.error {
            writeln!(err, "{}", indent(error, 4))?;
        }
    }
    Ok(())
}

/// Render plugin documentation, sorted by plugin name.
pub fn render_docs(docs: &[PluginDocumentation]) -> String {
    if docs.is_empty() {
        return "verify-repo: no plugin documentation is available.\n".to_string();
    }

    let mut sections: Vec<&PluginDocumentation> = docs.iter().collect();
    sections.sort_by(|a, b| a.name.cmp(&b.name));

    let mut lines = vec!["verify-repo: available plugin APIs".to_string(), String::new()];
    for (index, doc) in sections.iter().enumerate() {
        lines.push(match &doc.description {
            Some(description) => format!("{} — {}", doc.name, description),
            None => doc.name.clone(),
        });
        for entry in &doc.entries {
            lines.push(format!("  {}", entry.signature));
            if !entry.description.is_empty() {
                lines.extend(
                    entry
                        .description
                        .split('\n')
                        .map(|line| format!("    {}", line.trim_end())),
                );
            }
        }
        if index + 1 < sections.len() {
            lines.push(String::new());
        }
    }

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PluginDocEntry;
    use std::path::PathBuf;

    fn result(id: u64, status: TestStatus, message: &str) -> TestResult {
        TestResult {
            id,
            description: format!("check {}", id),
            source: Some(PathBuf::from("/repo/pkg/a.verify")),
            status,
            message: Some(message.to_string()),
            error: None,
            duration_ms: 12.0,
        }
    }

    fn render(summary: &RunSummary, verbose: bool) -> (String, String) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        write_report(summary, Path::new("/repo"), verbose, Some(1520.0), &mut out, &mut err).unwrap();
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn empty_run() {
        let (out, err) = render(&RunSummary::empty(), false);
        assert_eq!(out, "verify-repo: no checks were scheduled.\n");
        assert!(err.is_empty());
    }

    #[test]
    fn concise_success() {
        let summary = RunSummary::from_results(vec![result(0, TestStatus::Passed, "ok")], 3.0);
        let (out, _) = render(&summary, false);
        assert_eq!(out, "All checks passed in 1.52s.\n");
    }

    #[test]
    fn concise_failures() {
        let mut failed = result(1, TestStatus::Failed, "boom");
        failed.error = Some("cause\nmore".to_string());
        let summary =
            RunSummary::from_results(vec![result(0, TestStatus::Passed, "ok"), failed], 3.0);

        let (out, err) = render(&summary, false);

        assert!(out.is_empty());
        insta::assert_snapshot!(err, @r"
        1 check failed:
          pkg/a.verify — boom
            cause
            more
        ");
    }

    #[test]
    fn verbose_lists_every_result() {
        let mut failed = result(1, TestStatus::Failed, "boom");
        failed.source = None;
        let summary =
            RunSummary::from_results(vec![result(0, TestStatus::Passed, "ok"), failed], 3.0);

        let (out, err) = render(&summary, true);

        insta::assert_snapshot!(out, @r"
        [PASS] pkg/a.verify — ok (12ms)
        verify-repo: 1/2 passed, 1 failed in 1.52s
        ");
        assert_eq!(err, "[FAIL] boom (12ms)\n");
    }

    #[test]
    fn relative_paths() {
        let root = Path::new("/repo");
        assert_eq!(relative_path(root, Path::new("/repo/a/b.verify")), "a/b.verify");
        assert_eq!(relative_path(root, Path::new("/elsewhere/x")), "/elsewhere/x");
        assert_eq!(relative_path(root, Path::new("/repo")), "repo");
    }

    #[test]
    fn docs_are_sorted_and_indented() {
        let docs = vec![
            PluginDocumentation {
                name: "Git".to_string(),
                description: Some("Repository state.".to_string()),
                entries: vec![PluginDocEntry::new("verify.git.isClean()", "No changes.")],
            },
            PluginDocumentation {
                name: "Custom".to_string(),
                description: None,
                entries: vec![PluginDocEntry::new("verify.custom()", "Line one\nLine two  ")],
            },
        ];

        insta::assert_snapshot!(render_docs(&docs), @r"
        verify-repo: available plugin APIs

        Custom
          verify.custom()
            Line one
            Line two

        Git — Repository state.
          verify.git.isClean()
            No changes.
        ");
    }

    #[test]
    fn no_docs() {
        assert_eq!(
            render_docs(&[]),
            "verify-repo: no plugin documentation is available.\n"
        );
    }
}
