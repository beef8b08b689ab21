//! Project scaffolding for `dih new`.
//!
//! Writes a starter Cargo project from templates embedded at build time.

use anyhow::Result;
use std::path::{Path, PathBuf};

const PROJECT_NAME_PLACEHOLDER: &str = "{{project_name}}";
const ENV_FILE: &str = "DIH_API_KEY=your_api_key_here\n";
const GITIGNORE_FILE: &str = "/target\n.env\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Template {
    Basic,
    Streaming,
    Tools,
}

impl Template {
    fn files(self) -> &'static [TemplateFile] {
        match self {
            Self::Basic => BASIC_FILES,
            Self::Streaming => STREAMING_FILES,
            Self::Tools => TOOLS_FILES,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TemplateFile {
    relative_path: &'static str,
    contents: &'static str,
}

const BASIC_FILES: &[TemplateFile] = &[
    TemplateFile {
        relative_path: "Cargo.toml",
        contents: include_str!("../../project-templates/basic/Cargo.toml.tmpl"),
    },
    TemplateFile {
        relative_path: "src/main.rs",
        contents: include_str!("../../project-templates/basic/src/main.rs"),
    },
];

const STREAMING_FILES: &[TemplateFile] = &[
    TemplateFile {
        relative_path: "Cargo.toml",
        contents: include_str!("../../project-templates/streaming/Cargo.toml.tmpl"),
    },
    TemplateFile {
        relative_path: "src/main.rs",
        contents: include_str!("../../project-templates/streaming/src/main.rs"),
    },
];

const TOOLS_FILES: &[TemplateFile] = &[
    TemplateFile {
        relative_path: "Cargo.toml",
        contents: include_str!("../../project-templates/tools/Cargo.toml.tmpl"),
    },
    TemplateFile {
        relative_path: "src/main.rs",
        contents: include_str!("../../project-templates/tools/src/main.rs"),
    },
];

const SUPPORT_FILES: &[TemplateFile] = &[
    TemplateFile {
        relative_path: ".env",
        contents: ENV_FILE,
    },
    TemplateFile {
        relative_path: ".gitignore",
        contents: GITIGNORE_FILE,
    },
];

#[derive(Debug, Clone)]
pub struct ScaffoldReport {
    pub root: PathBuf,
    pub package_name: String,
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Cargo-friendly package name from a directory name.
pub fn package_name(dir_name: &str) -> String {
    let mut name = String::with_capacity(dir_name.len());
    for c in dir_name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name.trim_matches('-').to_string();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("dih-{name}").trim_end_matches('-').to_string();
    }
    name
}

#[tracing::instrument(level = "info", skip_all, fields(root = %root.display(), template = ?template))]
pub async fn scaffold(root: &Path, template: Template, force: bool) -> Result<ScaffoldReport> {
    prepare_root(root, force).await?;

    let canonical = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| anyhow::anyhow!("resolve project dir {}: {e}", root.display()))?;
    let dir_name = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("dih-app");
    let name = package_name(dir_name);

    let mut report = ScaffoldReport {
        root: root.to_path_buf(),
        package_name: name.clone(),
        created: Vec::new(),
        skipped: Vec::new(),
    };

    for file in template.files() {
        let contents = file.contents.replace(PROJECT_NAME_PLACEHOLDER, &name);
        let target = root.join(file.relative_path);
        write_file(&target, &contents).await?;
        report.created.push(target);
    }

    for file in SUPPORT_FILES {
        let target = root.join(file.relative_path);
        match tokio::fs::metadata(&target).await {
            Ok(_) => report.skipped.push(target),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                write_file(&target, file.contents).await?;
                report.created.push(target);
            }
            Err(err) => {
                return Err(anyhow::anyhow!("inspect {}: {err}", target.display()));
            }
        }
    }

    tracing::info!(
        package = %report.package_name,
        created = report.created.len(),
        "project scaffolded"
    );
    Ok(report)
}

async fn prepare_root(root: &Path, force: bool) -> Result<()> {
    match tokio::fs::metadata(root).await {
        Ok(meta) if !meta.is_dir() => Err(anyhow::anyhow!(
            "{} exists and is not a directory",
            root.display()
        )),
        Ok(_) => {
            let mut entries = tokio::fs::read_dir(root)
                .await
                .map_err(|e| anyhow::anyhow!("read dir {}: {e}", root.display()))?;
            let mut existing = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                existing.push(entry);
            }
            if existing.is_empty() {
                return Ok(());
            }
            if !force {
                return Err(anyhow::anyhow!(
                    "directory {} is not empty; pass --force to overwrite it",
                    root.display()
                ));
            }
            tracing::warn!(root = %root.display(), entries = existing.len(), "emptying directory");
            for entry in existing {
                let path = entry.path();
                let removed = if entry.file_type().await?.is_dir() {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                removed.map_err(|e| anyhow::anyhow!("remove {}: {e}", path.display()))?;
            }
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| anyhow::anyhow!("create project dir {}: {e}", root.display())),
        Err(err) => Err(anyhow::anyhow!("inspect {}: {err}", root.display())),
    }
}

async fn write_file(target: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| anyhow::anyhow!("create dir {}: {e}", parent.display()))?;
    }
    tokio::fs::write(target, contents)
        .await
        .map_err(|e| anyhow::anyhow!("write {}: {e}", target.display()))
}
