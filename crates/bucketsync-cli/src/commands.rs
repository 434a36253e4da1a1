use std::fs::{self, File};
use std::io;
use std::path::{Component, Path};
use std::time::Instant;

use anyhow::{bail, Context};
use bucketsync_store::{
    FileStorage, RemoteBackend, StoreConfig, StoreError, StoreTarget, TreeStore, ROOT_PATH,
};
use bucketsync_types::{FileAttributes, FileEntry, FileEntryList, FileMode};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::cli::*;

const ENDPOINT_VAR: &str = "AWS_ENDPOINT_URL";
const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";
const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let started = Instant::now();
    let result = match &cli.command {
        Command::Ls(args) => cmd_ls(&cli, args),
        Command::Put(args) => cmd_put(&cli, args),
        Command::Rm(args) => cmd_rm(&cli, args),
    };
    info!(elapsed = ?started.elapsed(), ok = result.is_ok(), "finished");
    result
}

fn cmd_ls(cli: &Cli, args: &LsArgs) -> anyhow::Result<()> {
    let mut config = load_config(cli, &args.dest)?;
    config.fetch_metadata |= args.full;
    let mut store = open_store(&config)?;
    let listed = store.list();
    store.close()?;
    let entries = match listed {
        Ok(entries) => entries,
        Err(StoreError::PartialList { entries, source }) => {
            print_entries(&entries, cli.format)?;
            bail!("listing incomplete after {} entries: {source}", entries.len());
        }
        Err(e) => return Err(e).context("listing failed"),
    };
    print_entries(&entries, cli.format)?;
    if cli.format == OutputFormat::Text {
        println!("{} {} entries", "✓".green(), entries.len());
    }
    Ok(())
}

fn cmd_put(cli: &Cli, args: &PutArgs) -> anyhow::Result<()> {
    let config = load_config(cli, &args.dest)?;
    let base = root_path(&args.local, args.as_path.as_deref())?;
    let mut store = open_store(&config)?;
    let mirrored = mirror_path(&store, &args.local, &base);
    store.close()?;
    let stats = mirrored?;
    println!(
        "{} Mirrored {} entries ({} bytes) to {}",
        "✓".green().bold(),
        stats.entries,
        stats.bytes,
        args.dest.bold()
    );
    Ok(())
}

fn cmd_rm(cli: &Cli, args: &RmArgs) -> anyhow::Result<()> {
    let config = load_config(cli, &args.dest)?;
    let mode = if args.dir {
        FileMode::directory(0)
    } else {
        FileMode::regular(0)
    };
    let mut store = open_store(&config)?;
    let removed = store.delete(&args.path, mode);
    store.close()?;
    removed.with_context(|| format!("removing {}", args.path))?;
    println!("{} Removed {}", "✓".green().bold(), args.path.yellow());
    Ok(())
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli, dest: &str) -> anyhow::Result<StoreConfig> {
    let base = match &cli.config {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StoreConfig::default(),
    };
    let target =
        StoreTarget::parse(dest).with_context(|| format!("invalid destination {dest:?}"))?;
    let mut config = apply_env(base, |name| std::env::var(name).ok()).with_target(target);
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if cli.insecure {
        config.secure = false;
    }
    debug!(?config, "resolved configuration");
    Ok(config)
}

/// Environment fills settings the config file leaves empty.
fn apply_env(mut config: StoreConfig, lookup: impl Fn(&str) -> Option<String>) -> StoreConfig {
    let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
    if config.endpoint.is_empty() {
        if let Some(endpoint) = var(ENDPOINT_VAR) {
            config.endpoint = endpoint;
        }
    }
    if config.access_key_id.is_empty() && config.secret_access_key.is_empty() {
        if let (Some(id), Some(secret)) = (var(ACCESS_KEY_VAR), var(SECRET_KEY_VAR)) {
            config.access_key_id = id;
            config.secret_access_key = secret;
        }
    }
    config
}

fn open_store(config: &StoreConfig) -> anyhow::Result<TreeStore<RemoteBackend>> {
    TreeStore::connect(config).with_context(|| format!("connecting to bucket {}", config.bucket))
}

// ---------------------------------------------------------------------------
// Mirroring local trees
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq, Eq)]
struct MirrorStats {
    entries: usize,
    bytes: u64,
}

/// Relative path the local root is stored under.
fn root_path(local: &Path, as_path: Option<&str>) -> anyhow::Result<String> {
    if let Some(path) = as_path {
        return Ok(path.to_string());
    }
    let meta = fs::symlink_metadata(local)
        .with_context(|| format!("reading {}", local.display()))?;
    if meta.is_dir() {
        return Ok(ROOT_PATH.to_string());
    }
    local
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .context("local path has no UTF-8 file name")
}

/// Join `base` and a walk-relative path into a `/` separated tree path.
fn relative_key(base: &str, rel: &Path) -> anyhow::Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    if !base.is_empty() && base != ROOT_PATH {
        parts.push(base);
    }
    for component in rel.components() {
        match component {
            Component::Normal(name) => parts.push(
                name.to_str()
                    .with_context(|| format!("non UTF-8 path {}", rel.display()))?,
            ),
            Component::CurDir => {}
            _ => bail!("unexpected component in {}", rel.display()),
        }
    }
    if parts.is_empty() {
        Ok(ROOT_PATH.to_string())
    } else {
        Ok(parts.join("/"))
    }
}

/// Upload `local` and everything beneath it, parents before children.
fn mirror_path(store: &impl FileStorage, local: &Path, base: &str) -> anyhow::Result<MirrorStats> {
    let mut stats = MirrorStats::default();
    for entry in WalkDir::new(local).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let rel = entry.path().strip_prefix(local)?;
        let path = relative_key(base, rel)?;
        let meta = entry.metadata()?;
        let attrs = local_attributes(&meta);
        let written = if meta.file_type().is_symlink() {
            let target = link_target(entry.path())?;
            store.put(
                path.as_bytes(),
                &mut io::Cursor::new(target.as_slice()),
                target.len() as u64,
                &attrs,
            )?
        } else if meta.is_dir() {
            store.put(path.as_bytes(), &mut io::empty(), 0, &attrs)?
        } else {
            let mut file = File::open(entry.path())
                .with_context(|| format!("opening {}", entry.path().display()))?;
            store.put(path.as_bytes(), &mut file, meta.len(), &attrs)?
        };
        debug!(path = %path, written, "mirrored");
        stats.entries += 1;
        stats.bytes += written;
    }
    Ok(stats)
}

fn local_attributes(meta: &fs::Metadata) -> FileAttributes {
    let mtime = meta
        .modified()
        .map(|t| DateTime::<Utc>::from(t).timestamp())
        .unwrap_or(0);
    FileAttributes::new(mtime, local_mode(meta))
}

#[cfg(unix)]
fn local_mode(meta: &fs::Metadata) -> FileMode {
    use std::os::unix::fs::MetadataExt;
    FileMode::from_bits(meta.mode())
}

#[cfg(not(unix))]
fn local_mode(meta: &fs::Metadata) -> FileMode {
    let file_type = meta.file_type();
    if file_type.is_symlink() {
        FileMode::symlink()
    } else if file_type.is_dir() {
        FileMode::directory(0o755)
    } else if meta.permissions().readonly() {
        FileMode::regular(0o444)
    } else {
        FileMode::regular(0o644)
    }
}

#[cfg(unix)]
fn link_target(path: &Path) -> io::Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Ok(fs::read_link(path)?.as_os_str().as_bytes().to_vec())
}

#[cfg(not(unix))]
fn link_target(path: &Path) -> io::Result<Vec<u8>> {
    Ok(fs::read_link(path)?.to_string_lossy().into_owned().into_bytes())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EntryView {
    path: String,
    size: u64,
    mtime: i64,
    mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    symlink_target: Option<String>,
}

impl From<&FileEntry> for EntryView {
    fn from(entry: &FileEntry) -> Self {
        Self {
            path: entry.path_lossy().into_owned(),
            size: entry.size,
            mtime: entry.mtime,
            mode: format!("0{:o}", entry.mode.bits()),
            symlink_target: entry
                .symlink_target
                .as_deref()
                .map(|t| String::from_utf8_lossy(t).into_owned()),
        }
    }
}

fn format_mtime(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn format_line(entry: &FileEntry) -> String {
    let mut line = format!(
        "{} {:>12} {} {}",
        entry.mode,
        entry.size,
        format_mtime(entry.mtime),
        entry.path_lossy()
    );
    if let Some(target) = &entry.symlink_target {
        line.push_str(" -> ");
        line.push_str(&String::from_utf8_lossy(target));
    }
    line
}

fn print_entries(entries: &FileEntryList, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let views: Vec<EntryView> = entries.iter().map(EntryView::from).collect();
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        OutputFormat::Text => {
            for entry in entries {
                let line = format_line(entry);
                if entry.mode.is_dir() {
                    println!("{}", line.blue());
                } else {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketsync_store::{ListOptions, MemoryBackend};
    use std::collections::HashMap;

    fn memory_store() -> TreeStore<MemoryBackend> {
        TreeStore::open(MemoryBackend::default(), "backup/site1").unwrap()
    }

    fn paths(list: &FileEntryList) -> Vec<String> {
        list.iter().map(|e| e.path_lossy().into_owned()).collect()
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    #[test]
    fn env_fills_empty_settings() {
        let env: HashMap<&str, &str> = [
            (ENDPOINT_VAR, "http://localhost:9000"),
            (ACCESS_KEY_VAR, "minio"),
            (SECRET_KEY_VAR, "minio123"),
        ]
        .into_iter()
        .collect();
        let config = apply_env(StoreConfig::default(), |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.endpoint, "http://localhost:9000");
        assert_eq!(config.access_key_id, "minio");
        assert_eq!(config.secret_access_key, "minio123");
    }

    #[test]
    fn explicit_settings_win_over_env() {
        let base = StoreConfig {
            endpoint: "s3.internal".into(),
            access_key_id: "file-id".into(),
            secret_access_key: "file-secret".into(),
            ..Default::default()
        };
        let config = apply_env(base, |_| Some("from-env".into()));
        assert_eq!(config.endpoint, "s3.internal");
        assert_eq!(config.access_key_id, "file-id");
    }

    #[test]
    fn partial_env_credentials_are_ignored() {
        let config = apply_env(StoreConfig::default(), |k| {
            (k == ACCESS_KEY_VAR).then(|| "only-id".to_string())
        });
        assert!(config.access_key_id.is_empty());
    }

    // -----------------------------------------------------------------------
    // Path mapping
    // -----------------------------------------------------------------------

    #[test]
    fn relative_keys() {
        assert_eq!(relative_key(".", Path::new("")).unwrap(), ".");
        assert_eq!(relative_key(".", Path::new("a/b")).unwrap(), "a/b");
        assert_eq!(relative_key("www", Path::new("")).unwrap(), "www");
        assert_eq!(relative_key("www", Path::new("css/site.css")).unwrap(), "www/css/site.css");
        assert!(relative_key(".", Path::new("../x")).is_err());
    }

    #[test]
    fn root_path_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        fs::write(&file, "x").unwrap();
        assert_eq!(root_path(dir.path(), None).unwrap(), ".");
        assert_eq!(root_path(&file, None).unwrap(), "notes.txt");
        assert_eq!(root_path(&file, Some("docs/n.txt")).unwrap(), "docs/n.txt");
        assert!(root_path(&dir.path().join("missing"), None).is_err());
    }

    // -----------------------------------------------------------------------
    // Mirroring
    // -----------------------------------------------------------------------

    #[test]
    fn mirror_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), "abc").unwrap();

        let store = memory_store();
        let stats = mirror_path(&store, dir.path(), ".").unwrap();
        assert_eq!(stats, MirrorStats { entries: 4, bytes: 8 });

        let list = store.list_with(ListOptions { fetch_metadata: true }).unwrap();
        assert_eq!(paths(&list), [".", "a.txt", "sub", "sub/b.txt"]);
        assert!(list[0].mode.is_dir());
        assert!(list[1].mode.is_regular());
        assert_eq!(list[1].size, 5);
        assert!(list[2].mode.is_dir());

        let local_mtime = local_attributes(&fs::metadata(dir.path().join("a.txt")).unwrap()).mtime;
        assert_eq!(list[1].mtime, local_mtime);
    }

    #[test]
    fn mirror_single_file_under_alias() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("report.csv");
        fs::write(&file, "1,2,3").unwrap();

        let store = memory_store();
        mirror_path(&store, &file, "data/report.csv").unwrap();
        assert_eq!(store.backend().keys(), ["backup/site1/data/report.csv"]);
    }

    #[cfg(unix)]
    #[test]
    fn mirror_symlink() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("target.txt"), "t").unwrap();
        std::os::unix::fs::symlink("target.txt", dir.path().join("link")).unwrap();

        let store = memory_store();
        mirror_path(&store, dir.path(), ".").unwrap();
        assert_eq!(store.read_link("link").unwrap(), b"target.txt");
        let entry = store.stat("link").unwrap().unwrap();
        assert!(entry.mode.is_symlink());
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    #[test]
    fn text_line_layout() {
        let entry = FileEntry::new("a/b/file.txt", 11, 1000, FileMode::regular(0o644));
        assert_eq!(
            format_line(&entry),
            "-rw-r--r--           11 1970-01-01 00:16:40 a/b/file.txt"
        );

        let mut link = FileEntry::new("l", 4, 0, FileMode::symlink());
        link.symlink_target = Some(b"dest".to_vec());
        assert!(format_line(&link).ends_with("l -> dest"));
        assert!(format_line(&link).starts_with("lrwxrwxrwx"));
    }

    #[test]
    fn json_view() {
        let entry = FileEntry::new("d", 0, 5, FileMode::directory(0o755));
        let json = serde_json::to_value(EntryView::from(&entry)).unwrap();
        assert_eq!(json["path"], "d");
        assert_eq!(json["mode"], "040755");
        assert!(json.get("symlink_target").is_none());
    }
}
