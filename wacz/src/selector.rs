use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use url::Url;
use webarchive_common::{Error, FileInfo, Result, Settings};

use crate::fetch::build_bucket;
use crate::uri::{file_uri_to_path, is_uri_directory, normalize_file_uri};

/// Picks a file from a resolver's candidate list relative to a target
/// instant.
pub trait LookupStrategy: Send + Sync {
    fn find(&self, files: &[FileInfo], target: OffsetDateTime) -> Option<String>;
}

/// Closest file at or before the target.
pub struct BeforeStrategy;

impl LookupStrategy for BeforeStrategy {
    fn find(&self, files: &[FileInfo], target: OffsetDateTime) -> Option<String> {
        let mut sorted = files.to_vec();
        sorted.sort();

        sorted
            .into_iter()
            .rev()
            .find(|file| file.last_modified <= target.unix_timestamp())
            .map(|file| file.uri)
    }
}

/// Closest file at or after the target. The default.
pub struct AfterStrategy;

impl LookupStrategy for AfterStrategy {
    fn find(&self, files: &[FileInfo], target: OffsetDateTime) -> Option<String> {
        let mut sorted = files.to_vec();
        sorted.sort();

        sorted
            .into_iter()
            .find(|file| file.last_modified >= target.unix_timestamp())
            .map(|file| file.uri)
    }
}

/// Explicit strategy registry: the defaults plus whatever the host registers,
/// passed into the selector by value. No global state.
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Box<dyn LookupStrategy>>,
}

impl StrategyRegistry {
    pub fn with_defaults() -> StrategyRegistry {
        let mut registry = StrategyRegistry {
            strategies: BTreeMap::new(),
        };
        registry.register("before", BeforeStrategy);
        registry.register("after", AfterStrategy);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, strategy: impl LookupStrategy + 'static) {
        self.strategies.insert(name.into(), Box::new(strategy));
    }

    pub fn get(&self, name: &str) -> Result<&dyn LookupStrategy> {
        self.strategies
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| Error::UnknownStrategy(name.to_owned()))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        StrategyRegistry::with_defaults()
    }
}

/// Enumerates candidate archives for a pattern.
pub trait FileResolver {
    fn resolve(&self) -> Result<Vec<FileInfo>>;
}

/// Recursive walk under a base directory, matching each file's relative path
/// against the anchored pattern.
pub struct LocalFileResolver {
    base: PathBuf,
    pattern: Regex,
}

impl LocalFileResolver {
    pub fn new(base: impl AsRef<Path>, pattern: Regex) -> LocalFileResolver {
        LocalFileResolver {
            base: base.as_ref().to_path_buf(),
            pattern,
        }
    }
}

impl FileResolver for LocalFileResolver {
    fn resolve(&self) -> Result<Vec<FileInfo>> {
        let mut paths = Vec::new();
        if self.base.is_dir() {
            walk(&self.base, &mut paths)?;
        }

        let mut files = Vec::new();
        for path in paths {
            let relative = path
                .strip_prefix(&self.base)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if !self.pattern.is_match(&relative) {
                continue;
            }

            let modified = fs::metadata(&path)?.modified()?;
            files.push(FileInfo::new(
                format!("file://{}", path.display()),
                OffsetDateTime::from(modified).unix_timestamp(),
            ));
        }

        Ok(files)
    }
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// ListObjectsV2 under `(bucket, prefix)` filtered by a full-key match.
pub struct S3FileResolver {
    bucket: s3::Bucket,
    bucket_name: String,
    prefix: String,
    pattern: Regex,
}

impl S3FileResolver {
    pub fn new(
        bucket_name: &str,
        prefix: &str,
        pattern: Regex,
        settings: &Settings,
    ) -> Result<S3FileResolver> {
        Ok(S3FileResolver {
            bucket: build_bucket(bucket_name, &settings.s3, settings.wacz_timeout)?,
            bucket_name: bucket_name.to_owned(),
            prefix: prefix.to_owned(),
            pattern,
        })
    }
}

impl FileResolver for S3FileResolver {
    fn resolve(&self) -> Result<Vec<FileInfo>> {
        let pages = self
            .bucket
            .list_blocking(self.prefix.clone(), None)
            .map_err(Error::transport)?;

        let mut files = Vec::new();
        for page in pages {
            for object in page.contents {
                if !self.pattern.is_match(&object.key) {
                    continue;
                }

                let Ok(modified) = OffsetDateTime::parse(&object.last_modified, &Rfc3339) else {
                    tracing::warn!(
                        "skipping s3 object with unparseable mtime: {}",
                        object.key
                    );
                    continue;
                };

                files.push(FileInfo::new(
                    format!("s3://{}/{}", self.bucket_name, object.key),
                    modified.unix_timestamp(),
                ));
            }
        }

        Ok(files)
    }
}

/// Static prefix of a URI template: everything before the first placeholder.
pub fn extract_base(template: &str) -> &str {
    match template.find('{') {
        Some(at) => &template[..at],
        None => template,
    }
}

/// Translates the placeholder tail of a template into an anchored regex.
/// Literal runs are escaped; unknown placeholders are an error.
pub fn build_pattern(tail: &str, spider: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    let mut literal = String::new();
    let mut rest = tail;

    while let Some(open) = rest.find('{') {
        literal.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            Error::UnsupportedUri(format!("unterminated placeholder in pattern: {tail}"))
        })?;
        let name = &after[..close];

        pattern.push_str(&regex::escape(&literal));
        literal.clear();
        pattern.push_str(&placeholder_pattern(name, spider)?);

        rest = &after[close + 1..];
    }
    literal.push_str(rest);
    pattern.push_str(&regex::escape(&literal));
    pattern.push('$');

    Regex::new(&pattern)
        .map_err(|err| Error::UnsupportedUri(format!("invalid pattern from template: {err}")))
}

fn placeholder_pattern(name: &str, spider: &str) -> Result<String> {
    Ok(match name {
        "year" => "[0-9]{4}".to_owned(),
        "month" | "day" => "[0-9]{2}".to_owned(),
        "timestamp" => "[0-9]+".to_owned(),
        "spider" => regex::escape(spider),
        "filename" => r"[^/\\]+\.wacz".to_owned(),
        other => {
            return Err(Error::UnsupportedUri(format!(
                "unknown placeholder: {{{other}}}"
            )))
        }
    })
}

/// Resolves a templated source URI to the concrete archive closest to the
/// target instant under the named strategy. A template without placeholders
/// that is not a directory short-circuits to itself; an empty candidate list
/// yields `None` and the host decides what that means.
pub fn resolve_source(
    template: &str,
    spider: &str,
    target: OffsetDateTime,
    strategy_name: &str,
    registry: &StrategyRegistry,
    settings: &Settings,
) -> Result<Option<String>> {
    if !template.contains('{') && !is_uri_directory(template) {
        return Ok(Some(normalize_file_uri(template)));
    }

    let strategy = registry.get(strategy_name)?;

    // Directories without placeholders take every .wacz underneath.
    let (base, tail) = if template.contains('{') {
        let base = extract_base(template);
        (base, &template[base.len()..])
    } else {
        (template, "{filename}")
    };

    let files = if base.starts_with("s3://") {
        let parsed =
            Url::parse(base).map_err(|_| Error::UnsupportedUri(base.to_owned()))?;
        let bucket = parsed
            .host_str()
            .ok_or_else(|| Error::UnsupportedUri(base.to_owned()))?;
        let prefix = parsed.path().trim_start_matches('/');

        let mut pattern = String::from("^");
        pattern.push_str(&regex::escape(prefix));
        let tail_pattern = build_pattern(tail, spider)?;
        pattern.push_str(tail_pattern.as_str().trim_start_matches('^'));

        let pattern = Regex::new(&pattern)
            .map_err(|err| Error::UnsupportedUri(format!("invalid pattern: {err}")))?;
        S3FileResolver::new(bucket, prefix, pattern, settings)?.resolve()?
    } else if base.starts_with("gs://") || base.starts_with("ftp://") {
        return Err(Error::UnsupportedUri(base.to_owned()));
    } else if base.starts_with("http://") || base.starts_with("https://") {
        return Err(Error::UnsupportedUri(base.to_owned()));
    } else {
        let pattern = build_pattern(tail, spider)?;
        LocalFileResolver::new(file_uri_to_path(base), pattern).resolve()?
    };

    tracing::debug!(candidates = files.len(), template, "resolved archive candidates");

    Ok(strategy.find(&files, target))
}
