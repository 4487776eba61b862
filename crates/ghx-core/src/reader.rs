//! Bounded repository reader.
//!
//! Every operation has a worst-case output size regardless of how large the
//! remote repository is:
//!
//! - branch pages are capped at [`MAX_PER_PAGE`] entries,
//! - tree listings are capped at [`MAX_TREE_ENTRIES`] entries and, when a
//!   depth is requested, [`MAX_TREE_DEPTH`] path segments,
//! - single files are capped by a per-file byte limit and batches by a
//!   cumulative byte budget.
//!
//! A file that exceeds a byte limit is an error, never a silently truncated
//! result.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ghx_api::{ApiClient, ApiError};
use tracing::{debug, info, instrument, warn};
use typed_builder::TypedBuilder;

use crate::config::ReadLimits;
use crate::error::CoreError;
use crate::repo::{
    BranchInfo, FileContent, RawContent, RawTree, RepositoryInfo, TreeEntry, TreeResult,
};

/// Hard ceiling on branch page size.
pub const MAX_PER_PAGE: u32 = 100;

/// Hard ceiling on tree entries returned by one fetch.
pub const MAX_TREE_ENTRIES: usize = 10_000;

/// Hard ceiling on tree depth filtering.
pub const MAX_TREE_DEPTH: usize = 10;

/// Default per-file cap (1 MiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Default cumulative batch budget (10 MiB).
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 10 * 1024 * 1024;

/// Options for [`RepoReader::list_branches`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct ListBranchesOptions {
    /// Requested page size; anything above [`MAX_PER_PAGE`] is clamped.
    #[builder(default = 30)]
    pub per_page: u32,

    /// 1-based page number.
    #[builder(default = 1)]
    pub page: u32,
}

impl Default for ListBranchesOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Options for [`RepoReader::fetch_tree`].
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct FetchTreeOptions {
    #[builder(default)]
    pub recursive: bool,

    /// Drop entries deeper than this many path segments (clamped to
    /// `1..=MAX_TREE_DEPTH`).
    #[builder(default, setter(strip_option))]
    pub max_depth: Option<usize>,
}

/// Options for [`RepoReader::read_file_content`].
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct ReadFileOptions {
    /// Branch, tag or commit; defaults to the repository's default branch.
    #[builder(default, setter(strip_option, into))]
    pub reference: Option<String>,
}

/// Options for [`RepoReader::batch_read_files`].
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct BatchReadOptions {
    #[builder(default, setter(strip_option, into))]
    pub reference: Option<String>,

    /// Overrides the reader's per-file cap.
    #[builder(default, setter(strip_option))]
    pub max_bytes_per_file: Option<u64>,

    /// Overrides the reader's batch budget.
    #[builder(default, setter(strip_option))]
    pub max_total_bytes: Option<u64>,
}

/// Reads repository data through an [`ApiClient`] under hard limits.
#[derive(Debug)]
pub struct RepoReader {
    client: ApiClient,
    limits: ReadLimits,
}

impl RepoReader {
    pub fn new(client: ApiClient, limits: ReadLimits) -> Self {
        Self { client, limits }
    }

    /// Returns the byte limits applied by this reader.
    pub fn limits(&self) -> ReadLimits {
        self.limits
    }

    /// Look up the repository's default branch.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::RepositoryNotFound` if the service reports the
    /// repository as absent.
    #[instrument(skip(self))]
    pub async fn resolve_default_branch(&self, owner: &str, repo: &str) -> Result<String, CoreError> {
        let path = repo_path(owner, repo);
        let info: RepositoryInfo = self.client.get_json(&path).await.map_err(|e| {
            if e.is_not_found() {
                CoreError::RepositoryNotFound {
                    owner: owner.to_owned(),
                    repo: repo.to_owned(),
                }
            } else {
                CoreError::Api(e)
            }
        })?;

        debug!(default_branch = %info.default_branch, "resolved default branch");
        Ok(info.default_branch)
    }

    /// List one page of branches.
    ///
    /// `per_page` above [`MAX_PER_PAGE`] silently becomes [`MAX_PER_PAGE`].
    #[instrument(skip(self))]
    pub async fn list_branches(
        &self,
        owner: &str,
        repo: &str,
        options: &ListBranchesOptions,
    ) -> Result<Vec<BranchInfo>, CoreError> {
        let per_page = effective_per_page(options.per_page);
        let page = options.page.max(1);
        let path = format!(
            "{}/branches?per_page={per_page}&page={page}",
            repo_path(owner, repo)
        );

        let branches: Vec<BranchInfo> = self.client.get_json(&path).await?;
        debug!(count = branches.len(), "listed branches");
        Ok(branches)
    }

    /// Fetch a tree snapshot.
    ///
    /// Depth filtering happens after the fetch: a recursive request is
    /// unbounded on the wire, the returned result is not.
    #[instrument(skip(self))]
    pub async fn fetch_tree(
        &self,
        owner: &str,
        repo: &str,
        tree_sha: &str,
        options: &FetchTreeOptions,
    ) -> Result<TreeResult, CoreError> {
        let mut path = format!(
            "{}/git/trees/{}",
            repo_path(owner, repo),
            encode_path(tree_sha)
        );
        if options.recursive {
            path.push_str("?recursive=1");
        }

        let raw: RawTree = self.client.get_json(&path).await?;
        let raw_count = raw.tree.len();
        let result = bound_tree(raw, options.max_depth);

        if result.truncated {
            info!(
                raw_count,
                returned = result.entries.len(),
                "tree listing truncated"
            );
        }
        Ok(result)
    }

    /// Read and decode a single file.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotAFile` for directories, symlinks and submodules,
    /// and `CoreError::FileTooLarge` if the decoded size exceeds the per-file
    /// cap. No content is returned in either case.
    #[instrument(skip(self, options))]
    pub async fn read_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        options: &ReadFileOptions,
    ) -> Result<FileContent, CoreError> {
        let reference = match &options.reference {
            Some(reference) => reference.clone(),
            None => self.resolve_default_branch(owner, repo).await?,
        };
        self.read_file_at(owner, repo, path, &reference, self.limits.max_bytes_per_file)
            .await
    }

    /// Read several files, one after another, under a cumulative budget.
    ///
    /// Files that do not qualify (missing, not a file, otherwise rejected)
    /// are skipped. A budget violation aborts the whole batch: either a
    /// single file over the per-file cap, or a file that would push the
    /// running total over the batch budget.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::FileTooLarge` or `CoreError::BatchBudgetExceeded`
    /// on a budget violation; service-level failures (rate limit, transient
    /// errors) propagate as `CoreError::Api`.
    #[instrument(skip(self, paths, options), fields(requested = paths.len()))]
    pub async fn batch_read_files(
        &self,
        owner: &str,
        repo: &str,
        paths: &[String],
        options: &BatchReadOptions,
    ) -> Result<Vec<FileContent>, CoreError> {
        let per_file = options
            .max_bytes_per_file
            .unwrap_or(self.limits.max_bytes_per_file);
        let limit = options
            .max_total_bytes
            .unwrap_or(self.limits.max_total_bytes);
        let reference = match &options.reference {
            Some(reference) => reference.clone(),
            None => self.resolve_default_branch(owner, repo).await?,
        };

        let mut files = Vec::new();
        let mut total: u64 = 0;

        for (index, path) in paths.iter().enumerate() {
            match self.read_file_at(owner, repo, path, &reference, per_file).await {
                Ok(file) => {
                    let attempted = total.saturating_add(file.size);
                    if attempted > limit {
                        warn!(path = %path, attempted, limit, "batch budget exceeded");
                        return Err(CoreError::BatchBudgetExceeded {
                            processed: index,
                            requested: paths.len(),
                            attempted,
                            limit,
                        });
                    }
                    total = attempted;
                    files.push(file);
                }
                Err(e) if e.is_budget_violation() => return Err(e),
                Err(e) if is_skippable(&e) => {
                    warn!(path = %path, error = %e, "skipping file");
                }
                Err(e) => return Err(e),
            }
        }

        debug!(read = files.len(), total_bytes = total, "batch read complete");
        Ok(files)
    }

    async fn read_file_at(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
        max_bytes: u64,
    ) -> Result<FileContent, CoreError> {
        let url = format!(
            "{}/contents/{}?ref={}",
            repo_path(owner, repo),
            encode_path(path),
            urlencoding::encode(reference)
        );

        let value: serde_json::Value = self.client.get_json(&url).await?;
        if value.is_array() {
            return Err(CoreError::NotAFile {
                path: path.to_owned(),
                kind: "dir".to_owned(),
            });
        }

        let raw: RawContent = serde_json::from_value(value)
            .map_err(|e| ApiError::Decode(format!("{url}: {e}")))?;
        decode_content(raw, max_bytes)
    }
}

/// Clamp a requested page size to `1..=MAX_PER_PAGE`.
pub fn effective_per_page(requested: u32) -> u32 {
    requested.clamp(1, MAX_PER_PAGE)
}

/// Apply the entry ceiling and optional depth filter to a raw tree.
fn bound_tree(raw: RawTree, max_depth: Option<usize>) -> TreeResult {
    let truncated = raw.truncated || raw.tree.len() > MAX_TREE_ENTRIES;

    let mut entries: Vec<TreeEntry> = match max_depth {
        Some(depth) => {
            let depth = depth.clamp(1, MAX_TREE_DEPTH);
            raw.tree
                .into_iter()
                .filter(|entry| entry.depth() <= depth)
                .collect()
        }
        None => raw.tree,
    };
    entries.truncate(MAX_TREE_ENTRIES);

    TreeResult {
        sha: raw.sha,
        entries,
        truncated,
    }
}

/// Turn a contents response into a [`FileContent`], enforcing the cap.
fn decode_content(raw: RawContent, max_bytes: u64) -> Result<FileContent, CoreError> {
    if raw.kind != "file" {
        return Err(CoreError::NotAFile {
            path: raw.path,
            kind: raw.kind,
        });
    }

    // The reported size is checked first: large blobs arrive without inline
    // content and must still fail as too large.
    if raw.size > max_bytes {
        return Err(CoreError::FileTooLarge {
            path: raw.path,
            size: raw.size,
            limit: max_bytes,
        });
    }

    let bytes = match (raw.encoding.as_deref(), raw.content) {
        (Some("base64"), Some(content)) => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map_err(|e| ApiError::Decode(format!("{}: invalid base64: {e}", raw.path)))?
        }
        (None | Some("utf-8"), Some(content)) => content.into_bytes(),
        (encoding, _) => {
            return Err(ApiError::Decode(format!(
                "{}: content not inlined (encoding {})",
                raw.path,
                encoding.unwrap_or("missing")
            ))
            .into());
        }
    };

    if bytes.len() as u64 > max_bytes {
        return Err(CoreError::FileTooLarge {
            path: raw.path,
            size: bytes.len() as u64,
            limit: max_bytes,
        });
    }

    let content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };

    // Replacement characters can make the text longer than the blob; the
    // cap and the reported size apply to what is returned.
    let size = content.len() as u64;
    if size > max_bytes {
        return Err(CoreError::FileTooLarge {
            path: raw.path,
            size,
            limit: max_bytes,
        });
    }

    Ok(FileContent {
        path: raw.path,
        content,
        encoding: "utf-8".to_owned(),
        size,
        sha: raw.sha,
    })
}

/// File-level failures a batch read skips over.
fn is_skippable(error: &CoreError) -> bool {
    matches!(
        error,
        CoreError::NotAFile { .. }
            | CoreError::Api(ApiError::PermanentError { .. })
            | CoreError::Api(ApiError::Decode(_))
    )
}

fn repo_path(owner: &str, repo: &str) -> String {
    format!(
        "/repos/{}/{}",
        urlencoding::encode(owner),
        urlencoding::encode(repo)
    )
}

/// Percent-encode each segment of a slash-separated path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
