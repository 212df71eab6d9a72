//! Report serialization, asset generation and the results folder

use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assets::{AssetGenerator, ImagePrompt};
use crate::error::CatalystError;
use crate::models::{Artifact, AssetRef, Report, RunResult};
use crate::prompts;

pub const REPORT_FILE: &str = "report.json";
pub const PROMPTS_FILE: &str = "prompts.json";
pub const SUMMARY_FILE: &str = "run_summary.json";

/// Everything a run produced for the results folder and the L1 entry.
#[derive(Debug, Clone, Default)]
pub struct RenderedRun {
    pub documents: Vec<Artifact>,
    pub assets: Vec<(ImagePrompt, Artifact)>,
    pub asset_kind: String,
    pub warnings: Vec<String>,
}

impl RenderedRun {
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.documents
            .iter()
            .cloned()
            .chain(self.assets.iter().map(|(_, a)| a.clone()))
            .collect()
    }
}

pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_').to_string();
    if slug.is_empty() {
        "piece".to_string()
    } else {
        slug
    }
}

pub fn image_prompts(report: &Report) -> Vec<ImagePrompt> {
    report
        .key_pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| ImagePrompt {
            key_piece_name: piece.key_piece_name.clone(),
            slug: format!("{:02}_{}", i + 1, slugify(&piece.key_piece_name)),
            prompt: prompts::image(report, piece),
        })
        .collect()
}

/// Key piece an asset file was generated for, matched through its slug.
pub fn asset_section(report: &Report, file_name: &str) -> Option<String> {
    image_prompts(report).into_iter().find_map(|prompt| {
        file_name
            .strip_prefix(&prompt.slug)
            .filter(|rest| rest.starts_with('.'))
            .map(|_| prompt.key_piece_name)
    })
}

/// Serialize the report and its prompts, then generate one asset per key
/// piece, at most `concurrency` at a time. Asset failures are warnings.
pub async fn render(
    report: &Report,
    generator: &dyn AssetGenerator,
    concurrency: usize,
) -> crate::Result<RenderedRun> {
    let prompts = image_prompts(report);

    let documents = vec![
        Artifact::new(REPORT_FILE, serde_json::to_vec_pretty(report)?),
        Artifact::new(PROMPTS_FILE, serde_json::to_vec_pretty(&prompts)?),
    ];

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let results = join_all(prompts.iter().map(|prompt| {
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| CatalystError::Storage(format!("asset pool closed: {}", e)))?;
            generator.generate(prompt).await
        }
    }))
    .await;

    let mut rendered = RenderedRun {
        documents,
        asset_kind: generator.kind().to_string(),
        ..Default::default()
    };
    for (prompt, result) in prompts.into_iter().zip(results) {
        match result {
            Ok(Some(artifact)) => rendered.assets.push((prompt, artifact)),
            Ok(None) => {}
            Err(e) => rendered.warnings.push(format!(
                "asset for '{}' not generated: {}",
                prompt.key_piece_name, e
            )),
        }
    }

    debug!(
        assets = rendered.assets.len(),
        warnings = rendered.warnings.len(),
        "Report rendered"
    );
    Ok(rendered)
}

/// Write the rendered run to `<results_dir>/<run_id>/` and return the
/// folder and the asset references pointing into it.
pub async fn persist(
    results_dir: &Path,
    run_id: Uuid,
    rendered: &RenderedRun,
) -> crate::Result<(PathBuf, Vec<AssetRef>)> {
    let folder = results_dir.join(run_id.to_string());
    tokio::fs::create_dir_all(&folder).await?;

    for artifact in &rendered.documents {
        tokio::fs::write(folder.join(&artifact.name), &artifact.bytes).await?;
    }

    let mut refs = Vec::with_capacity(rendered.assets.len());
    for (prompt, artifact) in &rendered.assets {
        let path = folder.join(&artifact.name);
        tokio::fs::write(&path, &artifact.bytes).await?;
        refs.push(AssetRef {
            section: prompt.key_piece_name.clone(),
            kind: rendered.asset_kind.clone(),
            location: path.display().to_string(),
        });
    }

    info!(folder = %folder.display(), assets = refs.len(), "Run outputs written");
    Ok((folder, refs))
}

pub async fn write_summary(results_dir: &Path, result: &RunResult) -> crate::Result<PathBuf> {
    let folder = results_dir.join(result.run_id().to_string());
    tokio::fs::create_dir_all(&folder).await?;
    let path = folder.join(SUMMARY_FILE);
    tokio::fs::write(&path, serde_json::to_vec_pretty(result)?).await?;
    Ok(path)
}

/// Keep the `keep` most recently modified run folders. Returns how many
/// were removed.
pub async fn prune_results(results_dir: &Path, keep: usize) -> crate::Result<usize> {
    let mut folders: Vec<(SystemTime, PathBuf)> = Vec::new();

    let mut entries = match tokio::fs::read_dir(results_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_dir() {
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            folders.push((modified, entry.path()));
        }
    }

    if folders.len() <= keep {
        return Ok(0);
    }

    folders.sort_by(|a, b| b.0.cmp(&a.0));
    let mut removed = 0;
    for (_, path) in folders.into_iter().skip(keep) {
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), "Could not remove old results: {}", e),
        }
    }
    Ok(removed)
}
