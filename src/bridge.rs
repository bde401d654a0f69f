//! Executes synchronization for configured mappings: walks local files,
//! applies the converter, and pushes/pulls content per the mapping's
//! direction.
//!
//! Bidirectional mode is last-writer-wins on local mtime vs remote
//! `last_edited_time`: the more recently modified side overwrites the other,
//! ties are a logged no-op. The losing side's content is discarded, not
//! merged. Under [`ConflictPolicy::Manual`] divergent content surfaces as a
//! conflict instead.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::client::{ParentRef, RemoteApi, RemotePage};
use crate::config::{ConflictPolicy, RemoteConfig, SyncMapping, SyncMode};
use crate::convert::{
    blocks_to_markdown, blocks_to_remote, markdown_to_blocks, normalize, remote_to_blocks,
};
use crate::error::{SyncError, SyncResult};
use crate::filters::PatternSet;

/// The resolved remote side of a mapping.
pub enum Target {
    Page(RemotePage),
    Database(crate::client::RemoteDatabase),
}

impl Target {
    fn id(&self) -> &str {
        match self {
            Target::Page(p) => &p.id,
            Target::Database(d) => &d.id,
        }
    }
}

#[derive(Debug)]
pub struct SyncReport {
    pub mappings: Vec<MappingReport>,
}

#[derive(Debug)]
pub struct MappingReport {
    pub target_id: String,
    pub status: MappingStatus,
    pub files: Vec<FileReport>,
}

#[derive(Debug, PartialEq)]
pub enum MappingStatus {
    Completed,
    Error(String),
    Conflict(PathBuf),
}

#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: FileOutcome,
}

#[derive(Debug, PartialEq)]
pub enum FileOutcome {
    Uploaded,
    Downloaded,
    Skipped(String),
}

/// Bridge between the local filesystem and the remote workspace.
pub struct SyncBridge<C: RemoteApi> {
    config: RemoteConfig,
    client: C,
}

impl<C: RemoteApi> SyncBridge<C> {
    /// Validates the configuration up front; an invalid mapping aborts
    /// construction rather than the first sync.
    pub fn new(config: RemoteConfig, client: C) -> SyncResult<Self> {
        config.validate()?;
        Ok(SyncBridge { config, client })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Verify remote connectivity; fails fast when the credentials are bad.
    pub async fn initialize(&self) -> SyncResult<()> {
        if !self.client.verify_connection().await? {
            error!("remote connection verification failed");
            return Err(SyncError::Connection(
                "remote connection verification failed".to_string(),
            ));
        }
        info!("remote connection verified");
        Ok(())
    }

    /// Sync every configured mapping. A failing mapping is recorded and the
    /// remaining mappings still run.
    pub async fn sync_all(&self) -> SyncReport {
        let mut mappings = Vec::with_capacity(self.config.mappings.len());
        for mapping in &self.config.mappings {
            let report = match self.sync_mapping(mapping).await {
                Ok(report) => report,
                Err(SyncError::Conflict { path }) => {
                    warn!(
                        target_id = %mapping.target_id,
                        path = %path.display(),
                        "mapping left in conflict, awaiting resolution"
                    );
                    MappingReport {
                        target_id: mapping.target_id.clone(),
                        status: MappingStatus::Conflict(path),
                        files: Vec::new(),
                    }
                }
                Err(e) => {
                    error!(target_id = %mapping.target_id, error = %e, "mapping sync failed");
                    MappingReport {
                        target_id: mapping.target_id.clone(),
                        status: MappingStatus::Error(e.to_string()),
                        files: Vec::new(),
                    }
                }
            };
            mappings.push(report);
        }
        SyncReport { mappings }
    }

    /// Sync one mapping according to its configured direction.
    pub async fn sync_mapping(&self, mapping: &SyncMapping) -> SyncResult<MappingReport> {
        mapping.validate()?;
        let patterns = mapping.patterns()?;
        let files = candidate_files(mapping, &patterns)?;
        info!(
            target_id = %mapping.target_id,
            mode = ?mapping.sync_mode,
            files = files.len(),
            "syncing mapping"
        );
        let target = self.resolve_target(mapping).await?;
        if matches!(target, Target::Page(_)) && files.len() > 1 {
            return Err(SyncError::Configuration(format!(
                "target {} is a single page but {} local files matched; page targets take exactly one document",
                mapping.target_id,
                files.len()
            )));
        }

        let reports = match mapping.sync_mode {
            SyncMode::UploadOnly => self.upload_files(&target, &files).await?,
            SyncMode::DownloadOnly => self.download_target(mapping, &target).await?,
            SyncMode::Bidirectional => self.sync_bidirectional(mapping, &target, &files).await?,
        };

        Ok(MappingReport {
            target_id: mapping.target_id.clone(),
            status: MappingStatus::Completed,
            files: reports,
        })
    }

    /// Sync just the mapping that owns a changed path. Entry point for the
    /// monitor's consumer loop.
    pub async fn sync_path(&self, path: &Path) -> SyncResult<Option<MappingReport>> {
        let Some(mapping) = self
            .config
            .mappings
            .iter()
            .find(|m| path.starts_with(&m.source_path))
        else {
            warn!(path = %path.display(), "changed path is not covered by any mapping");
            return Ok(None);
        };
        self.sync_mapping(mapping).await.map(Some)
    }

    fn mapping_for(&self, path: &Path) -> SyncResult<&SyncMapping> {
        self.config
            .mappings
            .iter()
            .find(|m| path.starts_with(&m.source_path))
            .ok_or_else(|| {
                SyncError::Configuration(format!(
                    "no mapping covers path {}",
                    path.display()
                ))
            })
    }

    /// The remote page paired with a local file, if it exists yet.
    pub async fn remote_counterpart(&self, path: &Path) -> SyncResult<Option<RemotePage>> {
        let mapping = self.mapping_for(path)?;
        match self.resolve_target(mapping).await? {
            Target::Page(page) => Ok(Some(page)),
            Target::Database(db) => self.client.find_page(&db.id, &file_title(path)).await,
        }
    }

    /// Push one local file regardless of timestamps. Used by conflict
    /// resolution when the local side is chosen.
    pub async fn force_upload(&self, path: &Path) -> SyncResult<()> {
        let mapping = self.mapping_for(path)?;
        let target = self.resolve_target(mapping).await?;
        let blocks = self
            .read_blocks(path)
            .map_err(SyncError::ContentParse)?;
        self.push_file(&target, path, blocks).await?;
        info!(path = %path.display(), "forced upload of local side");
        Ok(())
    }

    /// Pull the remote counterpart over the local file regardless of
    /// timestamps. Used by conflict resolution when the remote side is chosen.
    pub async fn force_download(&self, path: &Path) -> SyncResult<()> {
        let mapping = self.mapping_for(path)?;
        let Some(page) = self.remote_counterpart(path).await? else {
            return Err(SyncError::Configuration(format!(
                "no remote counterpart exists for {}",
                path.display()
            )));
        };
        self.pull_page(mapping, &page).await?;
        info!(path = %path.display(), "forced download of remote side");
        Ok(())
    }

    /// Lookup by target id: a page first, then a database; created under the
    /// workspace when absent and the mapping uploads.
    async fn resolve_target(&self, mapping: &SyncMapping) -> SyncResult<Target> {
        match self.client.get_page(&mapping.target_id).await {
            Ok(page) => return Ok(Target::Page(page)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        match self.client.get_database(&mapping.target_id).await {
            Ok(db) => return Ok(Target::Database(db)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        if !mapping.sync_mode.uploads() {
            return Err(SyncError::RemoteApi {
                status: 404,
                body: format!("target {} not found", mapping.target_id),
            });
        }
        let title = mapping
            .metadata
            .get("title")
            .cloned()
            .unwrap_or_else(|| directory_title(&mapping.source_path));
        info!(target_id = %mapping.target_id, title, "target missing, creating page under workspace");
        let page = self
            .client
            .create_page(
                ParentRef::Page(self.config.workspace_id.clone()),
                &title,
                Vec::new(),
            )
            .await?;
        Ok(Target::Page(page))
    }

    async fn upload_files(
        &self,
        target: &Target,
        files: &[PathBuf],
    ) -> SyncResult<Vec<FileReport>> {
        let mut reports = Vec::with_capacity(files.len());
        for path in files {
            let outcome = match self.read_blocks(path) {
                Ok(blocks) => {
                    self.push_file(target, path, blocks).await?;
                    FileOutcome::Uploaded
                }
                Err(reason) => FileOutcome::Skipped(reason),
            };
            reports.push(FileReport {
                path: path.clone(),
                outcome,
            });
        }
        Ok(reports)
    }

    /// Parse a local file into remote block payloads. Parse and read errors
    /// skip the file (reported, never fatal for the mapping).
    fn read_blocks(&self, path: &Path) -> Result<Vec<serde_json::Value>, String> {
        let text = fs::read_to_string(path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "failed to read local file, skipping");
            format!("read failed: {e}")
        })?;
        let blocks = markdown_to_blocks(&text).map_err(|e| {
            warn!(path = %path.display(), error = %e, "content parse failed, skipping file");
            e.to_string()
        })?;
        Ok(blocks_to_remote(&blocks))
    }

    /// Create the remote counterpart if absent, else replace its content.
    async fn push_file(
        &self,
        target: &Target,
        path: &Path,
        blocks: Vec<serde_json::Value>,
    ) -> SyncResult<RemotePage> {
        let title = file_title(path);
        match target {
            Target::Page(page) => self.client.update_page(&page.id, blocks).await,
            Target::Database(db) => match self.client.find_page(&db.id, &title).await? {
                Some(existing) => self.client.update_page(&existing.id, blocks).await,
                None => {
                    self.client
                        .create_page(ParentRef::Database(db.id.clone()), &title, blocks)
                        .await
                }
            },
        }
    }

    async fn download_target(
        &self,
        mapping: &SyncMapping,
        target: &Target,
    ) -> SyncResult<Vec<FileReport>> {
        let pages: Vec<&RemotePage> = match target {
            Target::Page(page) => vec![page],
            Target::Database(db) => db.pages.iter().collect(),
        };
        let mut reports = Vec::with_capacity(pages.len());
        for page in pages {
            let path = self.pull_page(mapping, page).await?;
            reports.push(FileReport {
                path,
                outcome: FileOutcome::Downloaded,
            });
        }
        Ok(reports)
    }

    /// Fetch one remote page and write it as Markdown under the source path.
    async fn pull_page(&self, mapping: &SyncMapping, page: &RemotePage) -> SyncResult<PathBuf> {
        let payloads = self.client.get_page_blocks(&page.id).await?;
        let markdown = blocks_to_markdown(&remote_to_blocks(&payloads));
        let path = mapping
            .source_path
            .join(format!("{}.md", sanitize_title(&page.title)));
        fs::write(&path, markdown)?;
        info!(page_id = %page.id, path = %path.display(), "downloaded remote page");
        Ok(path)
    }

    async fn sync_bidirectional(
        &self,
        mapping: &SyncMapping,
        target: &Target,
        files: &[PathBuf],
    ) -> SyncResult<Vec<FileReport>> {
        let mut reports = Vec::new();
        for path in files {
            let remote = match target {
                Target::Page(page) => Some(page.clone()),
                Target::Database(db) => {
                    self.client.find_page(&db.id, &file_title(path)).await?
                }
            };
            let outcome = self.sync_file_both_ways(target, path, remote).await?;
            reports.push(FileReport {
                path: path.clone(),
                outcome,
            });
        }

        // Remote pages without a local counterpart only exist on one side;
        // bring them down.
        if let Target::Database(db) = target {
            let local_titles: Vec<String> = files.iter().map(|p| file_title(p)).collect();
            for page in &db.pages {
                if !local_titles.contains(&page.title) {
                    let path = self.pull_page(mapping, page).await?;
                    reports.push(FileReport {
                        path,
                        outcome: FileOutcome::Downloaded,
                    });
                }
            }
        }
        Ok(reports)
    }

    /// Last-writer-wins for one file: the more recently modified side wins,
    /// ties are a logged no-op. Manual policy surfaces divergence instead.
    async fn sync_file_both_ways(
        &self,
        target: &Target,
        path: &Path,
        remote: Option<RemotePage>,
    ) -> SyncResult<FileOutcome> {
        let Some(remote) = remote else {
            return match self.read_blocks(path) {
                Ok(blocks) => {
                    self.push_file(target, path, blocks).await?;
                    Ok(FileOutcome::Uploaded)
                }
                Err(reason) => Ok(FileOutcome::Skipped(reason)),
            };
        };

        let local_text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read local file, skipping");
                return Ok(FileOutcome::Skipped(format!("read failed: {e}")));
            }
        };
        let payloads = self.client.get_page_blocks(&remote.id).await?;
        let remote_text = blocks_to_markdown(&remote_to_blocks(&payloads));
        if normalize(&local_text) == normalize(&remote_text) {
            debug!(path = %path.display(), "contents identical, nothing to sync");
            return Ok(FileOutcome::Skipped("unchanged".to_string()));
        }

        if self.config.conflict_policy == ConflictPolicy::Manual {
            return Err(SyncError::Conflict {
                path: path.to_path_buf(),
            });
        }

        let local_time = local_mtime(path)?;
        let remote_time = remote.last_edited_time;
        // Second precision: the remote service does not report finer.
        if local_time.timestamp() == remote_time.timestamp() {
            warn!(
                path = %path.display(),
                page_id = %remote.id,
                "modification times tie with divergent content, not overwriting either side"
            );
            return Ok(FileOutcome::Skipped("modification time tie".to_string()));
        }

        if local_time.timestamp() > remote_time.timestamp() {
            let blocks = match markdown_to_blocks(&local_text) {
                Ok(blocks) => blocks_to_remote(&blocks),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "content parse failed, skipping file");
                    return Ok(FileOutcome::Skipped(e.to_string()));
                }
            };
            self.client.update_page(&remote.id, blocks).await?;
            info!(path = %path.display(), page_id = %remote.id, "local side newer, pushed to remote");
            Ok(FileOutcome::Uploaded)
        } else {
            fs::write(path, remote_text)?;
            info!(path = %path.display(), page_id = %remote.id, "remote side newer, pulled to local");
            Ok(FileOutcome::Downloaded)
        }
    }
}

/// Files under the mapping's source path that pass the pattern set. Patterns
/// are applied to the path relative to the source directory.
fn candidate_files(mapping: &SyncMapping, patterns: &PatternSet) -> SyncResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![mapping.source_path.clone()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let relative = path
                    .strip_prefix(&mapping.source_path)
                    .unwrap_or(&path)
                    .to_path_buf();
                if patterns.allows(&relative) {
                    files.push(path);
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

fn file_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn directory_title(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Documents".to_string())
}

fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

fn local_mtime(path: &Path) -> SyncResult<DateTime<Utc>> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}
