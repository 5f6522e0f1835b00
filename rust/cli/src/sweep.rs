//! TOML sweep files: a `[defaults]` table merged into every `[[cases]]` entry.
//!
//! ```toml
//! [defaults]
//! state_size = 64
//! num_heads = 2
//!
//! [[cases]]
//! sequence_length = 32
//!
//! [[cases]]
//! cu_seqlens = [0, 7, 19]
//! input_state = true
//! ```

use std::{fs, path::Path};

use gru_config::CaseConfig;
use serde::Deserialize;

use crate::{CliError, Result};

#[derive(Debug, Deserialize)]
struct SweepFile {
    #[serde(default)]
    defaults: toml::Table,
    #[serde(default)]
    cases: Vec<toml::Table>,
}

pub fn parse_sweep(text: &str) -> Result<Vec<CaseConfig>> {
    let file: SweepFile = toml::from_str(text)?;
    if file.cases.is_empty() {
        return Err(CliError::EmptySweep);
    }

    file.cases
        .into_iter()
        .map(|case| {
            let mut merged = file.defaults.clone();
            merged.extend(case);
            Ok(toml::Value::Table(merged).try_into::<CaseConfig>()?)
        })
        .collect()
}

pub fn load_sweep(path: impl AsRef<Path>) -> Result<Vec<CaseConfig>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_sweep(&text)
}
