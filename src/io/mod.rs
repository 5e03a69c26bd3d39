//! File helpers: bincode archive groups and YAML input files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{self, format_err, Context};
use bincode;
use serde::{de::DeserializeOwned, Serialize};
use serde_yaml;

pub(crate) mod format;

/// An enumerated type for binary files owned by `kspectra`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KSpectraFileType {
    /// Variant for a file holding one archive group.
    Grp,
}

impl KSpectraFileType {
    /// Returns the extension of the file type.
    pub fn ext(&self) -> String {
        match self {
            KSpectraFileType::Grp => "kspectra.grp".to_string(),
        }
    }

    fn path<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        let mut path = name.as_ref().to_path_buf();
        path.set_extension(self.ext());
        path
    }
}

/// Deserialises a value from a binary file named `name`, with the extension of `file_type`
/// appended.
pub fn read_kspectra_binary<T, P>(name: P, file_type: KSpectraFileType) -> Result<T, anyhow::Error>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = file_type.path(name);
    let file = File::open(&path).with_context(|| format!("Unable to open {}", path.display()))?;
    bincode::deserialize_from(BufReader::new(file))
        .map_err(|err| format_err!("Unable to decode {}: {err}", path.display()))
}

/// Serialises a value into a binary file named `name`, with the extension of `file_type`
/// appended. An existing file is overwritten.
pub fn write_kspectra_binary<T, P>(
    name: P,
    file_type: KSpectraFileType,
    value: &T,
) -> Result<(), anyhow::Error>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = file_type.path(name);
    let file =
        File::create(&path).with_context(|| format!("Unable to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, value)
        .map_err(|err| format_err!("Unable to encode {}: {err}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Reads a YAML input file. The name is used as given.
pub fn read_kspectra_yaml<T, P>(name: P) -> Result<T, anyhow::Error>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let file = File::open(name.as_ref())
        .with_context(|| format!("Unable to open {}", name.as_ref().display()))?;
    serde_yaml::from_reader(BufReader::new(file)).map_err(|err| format_err!(err))
}

/// Writes a value as YAML to `<name>.yml`.
pub fn write_kspectra_yaml<T, P>(name: P, value: &T) -> Result<(), anyhow::Error>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let mut path = name.as_ref().to_path_buf();
    path.set_extension("yml");
    let file =
        File::create(&path).with_context(|| format!("Unable to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_yaml::to_writer(&mut writer, value).map_err(|err| format_err!(err))?;
    writer.flush()?;
    Ok(())
}
