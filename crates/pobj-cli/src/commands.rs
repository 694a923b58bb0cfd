use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use pobj_backend::{Backend, ErasedBackend, FileBackend, KeyValueBackend};
use pobj_codec::{envelope, JsonCodec};
use pobj_object::PersistentObject;
use pobj_store::atomic::read_if_exists;
use pobj_store::{DefaultsDatabase, KeyValueStore};
use serde_json::Value;
use tracing::{debug, info};

use crate::cli::{Cli, Command, SetArgs, StoreArgs};
use crate::config::{CliConfig, StoreConfig};

/// The record a command operates on.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    File(PathBuf),
    Defaults { database: PathBuf, key: String },
}

impl Target {
    /// Combine command-line arguments with the config file; arguments win.
    pub fn resolve(args: &StoreArgs, config: &StoreConfig) -> anyhow::Result<Self> {
        if let Some(path) = &args.file {
            return Ok(Self::File(path.clone()));
        }
        if args.defaults.is_none() && args.key.is_none() {
            if let Some(path) = &config.file {
                if config.defaults.is_some() {
                    bail!("config [store] sets both `file` and `defaults`");
                }
                return Ok(Self::File(path.clone()));
            }
        }

        let database = args.defaults.clone().or_else(|| config.defaults.clone());
        let key = args.key.clone().or_else(|| config.key.clone());
        match (database, key) {
            (Some(database), Some(key)) => Ok(Self::Defaults { database, key }),
            (Some(_), None) => bail!("--defaults needs a --key"),
            (None, Some(_)) => bail!("--key needs a --defaults database"),
            (None, None) => bail!("no record given; pass --file, or --defaults with --key"),
        }
    }
}

/// A backend for the target, plus the database it lives in, if any.
struct Opened {
    backend: ErasedBackend<Value>,
    database: Option<Arc<DefaultsDatabase>>,
}

/// How a command uses its record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    Read,
    /// The record is about to be replaced, so a corrupt database is reset.
    Write,
}

fn open(target: &Target, access: Access) -> anyhow::Result<Opened> {
    match target {
        Target::File(path) => Ok(Opened {
            backend: FileBackend::<Value, _>::new(path, JsonCodec::pretty()).into(),
            database: None,
        }),
        Target::Defaults { database, key } => {
            let db = match access {
                Access::Read => DefaultsDatabase::open(database),
                Access::Write => DefaultsDatabase::open_or_reset(database),
            }
            .with_context(|| format!("cannot open defaults database {}", database.display()))?;
            debug!(path = %db.path().display(), key = %key, ?access, "defaults database ready");

            let db = Arc::new(db);
            let backend =
                KeyValueBackend::<Value, _>::new(db.clone(), key.as_str(), JsonCodec::new())?;
            Ok(Opened {
                backend: backend.into(),
                database: Some(db),
            })
        }
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    let target = Target::resolve(&cli.store, &config.store)?;
    debug!(?target, "record resolved");
    match cli.command {
        Command::Show => cmd_show(&target),
        Command::Set(args) => cmd_set(&target, args),
        Command::Clear => cmd_clear(&target),
        Command::Inspect => cmd_inspect(&target),
    }
}

/// Read the stored value without touching the record.
pub fn load_value(target: &Target) -> anyhow::Result<Option<Value>> {
    Ok(open(target, Access::Read)?.backend.unarchive())
}

/// Replace the stored value, save, and synchronize. Returns the record's
/// location.
pub fn store_value(target: &Target, value: Option<Value>) -> anyhow::Result<String> {
    let object = PersistentObject::new(open(target, Access::Write)?.backend);
    let present = value.is_some();
    object.reset(value);
    object.save().context("save failed")?;
    object.synchronize().context("synchronize failed")?;
    info!(location = %object.location(), present, "record stored");
    Ok(object.location())
}

fn cmd_show(target: &Target) -> anyhow::Result<()> {
    match load_value(target)? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("{}", "(none)".dimmed()),
    }
    Ok(())
}

fn cmd_set(target: &Target, args: SetArgs) -> anyhow::Result<()> {
    let value: Value = serde_json::from_str(&args.json).context("value is not valid JSON")?;
    let location = store_value(target, Some(value))?;
    println!("{} Saved {}", "✓".green().bold(), location.bold());
    Ok(())
}

fn cmd_clear(target: &Target) -> anyhow::Result<()> {
    let location = store_value(target, None)?;
    println!("{} Cleared {}", "✓".green().bold(), location.bold());
    Ok(())
}

fn cmd_inspect(target: &Target) -> anyhow::Result<()> {
    let opened = open(target, Access::Read)?;
    println!("Record: {}", opened.backend.location().bold());

    let raw = match target {
        Target::File(path) => read_if_exists(path)
            .with_context(|| format!("cannot read {}", path.display()))?,
        Target::Defaults { key, .. } => match &opened.database {
            Some(db) => db.get(key)?,
            None => None,
        },
    };
    let Some(raw) = raw else {
        println!("{}", "(no record)".dimmed());
        return Ok(());
    };

    println!("Size: {} bytes", raw.len());
    if let Target::File(_) = target {
        describe_envelope(&raw);
    }
    print!("{}", hex_dump(&raw));
    Ok(())
}

fn describe_envelope(raw: &[u8]) {
    match envelope::inspect(raw) {
        Ok(header) => {
            println!(
                "Envelope: version {}, payload {} bytes, crc32 {:08x}",
                header.version, header.payload_len, header.checksum
            );
            match envelope::open(raw) {
                Ok(_) => println!("Integrity: {}", "ok".green()),
                Err(e) => println!("Integrity: {} ({e})", "damaged".red()),
            }
        }
        Err(e) => println!("Envelope: {} ({e})", "unreadable".red()),
    }
}

/// Classic 16-bytes-per-line dump: offset, hex bytes, printable ASCII.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in data.chunks(16).enumerate() {
        out.push_str(&hex_line(line * 16, chunk));
    }
    out
}

fn hex_line(offset: usize, chunk: &[u8]) -> String {
    let encoded = hex::encode(chunk);
    let bytes: Vec<&str> = (0..encoded.len())
        .step_by(2)
        .map(|i| &encoded[i..i + 2])
        .collect();
    let ascii: String = chunk
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect();
    format!("{offset:08x}  {:<47}  |{ascii}|\n", bytes.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(file: Option<&str>, defaults: Option<&str>, key: Option<&str>) -> StoreArgs {
        StoreArgs {
            file: file.map(PathBuf::from),
            defaults: defaults.map(PathBuf::from),
            key: key.map(String::from),
        }
    }

    #[test]
    fn resolve_file_argument() {
        let target =
            Target::resolve(&args(Some("p.json"), None, None), &StoreConfig::default()).unwrap();
        assert_eq!(target, Target::File("p.json".into()));
    }

    #[test]
    fn resolve_merges_key_from_config() {
        let config = StoreConfig {
            key: Some("profile".into()),
            ..Default::default()
        };
        let target = Target::resolve(&args(None, Some("app.db"), None), &config).unwrap();
        assert_eq!(
            target,
            Target::Defaults {
                database: "app.db".into(),
                key: "profile".into()
            }
        );
    }

    #[test]
    fn resolve_arguments_override_config_file() {
        let config = StoreConfig {
            file: Some("from-config.json".into()),
            ..Default::default()
        };
        let target = Target::resolve(&args(None, Some("app.db"), Some("k")), &config).unwrap();
        assert!(matches!(target, Target::Defaults { .. }));
    }

    #[test]
    fn resolve_rejects_incomplete_targets() {
        let none = StoreConfig::default();
        assert!(Target::resolve(&args(None, None, None), &none).is_err());
        assert!(Target::resolve(&args(None, Some("app.db"), None), &none).is_err());
        assert!(Target::resolve(&args(None, None, Some("k")), &none).is_err());

        let both = StoreConfig {
            file: Some("p.json".into()),
            defaults: Some("app.db".into()),
            key: Some("k".into()),
        };
        assert!(Target::resolve(&args(None, None, None), &both).is_err());
    }

    #[test]
    fn set_then_show_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::File(dir.path().join("p.json"));

        assert_eq!(load_value(&target).unwrap(), None);
        let location = store_value(&target, Some(json!({"name": "Amanda", "age": 29}))).unwrap();
        assert!(location.starts_with("file:"));
        assert_eq!(load_value(&target).unwrap(), Some(json!({"name": "Amanda", "age": 29})));

        store_value(&target, None).unwrap();
        assert_eq!(load_value(&target).unwrap(), None);
        assert!(!dir.path().join("p.json").exists());
    }

    #[test]
    fn set_then_show_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::Defaults {
            database: dir.path().join("app.db"),
            key: "profile".into(),
        };

        store_value(&target, Some(json!([1, 2, 3]))).unwrap();
        assert_eq!(load_value(&target).unwrap(), Some(json!([1, 2, 3])));
    }

    #[test]
    fn set_replaces_corrupt_defaults_database() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("app.db");
        std::fs::write(&database, b"not a database").unwrap();
        let target = Target::Defaults {
            database,
            key: "profile".into(),
        };

        assert!(load_value(&target).is_err());
        store_value(&target, Some(json!({"name": "Amanda"}))).unwrap();
        assert_eq!(load_value(&target).unwrap(), Some(json!({"name": "Amanda"})));
    }

    #[test]
    fn file_record_is_an_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        store_value(&Target::File(path.clone()), Some(json!("hi"))).unwrap();

        let raw = std::fs::read(&path).unwrap();
        let header = envelope::inspect(&raw).unwrap();
        assert_eq!(header.payload_len as usize, raw.len() - envelope::HEADER_SIZE);
        assert_eq!(envelope::open(&raw).unwrap(), b"\"hi\"");
    }

    #[test]
    fn hex_dump_layout() {
        let dump = hex_dump(b"POBJ\x01abcdefghijklmno");
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000  50 4f 42 4a 01 61"));
        assert!(lines[0].ends_with("|POBJ.abcdefghijk|"));
        assert!(lines[1].starts_with("00000010  6c 6d 6e 6f"));
        assert!(lines[1].ends_with("|lmno|"));
    }

    #[test]
    fn hex_dump_empty() {
        assert_eq!(hex_dump(&[]), "");
    }
}
